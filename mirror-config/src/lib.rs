//! Configuration types and loading for mirror jobs.
//!
//! The [`shared`] module holds the serde-deserializable configuration sections, [`load`]
//! assembles them from configuration files and environment variables, and [`environment`]
//! resolves the runtime environment that selects the override file.

use std::fmt;

use secrecy::{ExposeSecret, Secret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub mod environment;
pub mod load;
pub mod shared;

/// A [`SecretString`] that can be serialized back into configuration files.
///
/// Debug output stays redacted, only explicit serialization exposes the value.
#[derive(Clone)]
pub struct SerializableSecretString(SecretString);

impl SerializableSecretString {
    /// Returns the wrapped secret.
    pub fn secret(&self) -> &SecretString {
        &self.0
    }
}

impl ExposeSecret<String> for SerializableSecretString {
    fn expose_secret(&self) -> &String {
        self.0.expose_secret()
    }
}

impl From<String> for SerializableSecretString {
    fn from(value: String) -> Self {
        Self(Secret::new(value))
    }
}

impl From<SerializableSecretString> for SecretString {
    fn from(value: SerializableSecretString) -> Self {
        value.0
    }
}

impl fmt::Debug for SerializableSecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Serialize for SerializableSecretString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.0.expose_secret())
    }
}

impl<'de> Deserialize<'de> for SerializableSecretString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(Self(Secret::new(value)))
    }
}
