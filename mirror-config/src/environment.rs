use std::fmt;
use std::io;
use std::str::FromStr;

/// Environment variable selecting which override file is loaded.
pub const APP_ENVIRONMENT_ENV_NAME: &str = "APP_ENVIRONMENT";

const DEV_ENV_NAME: &str = "dev";
const PROD_ENV_NAME: &str = "prod";

/// Runtime environment of a mirror process.
///
/// The environment only decides which `configuration/{env}.*` file is layered on top of the
/// base configuration, it has no other effect on behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Dev,
    Prod,
}

impl Environment {
    /// Reads the environment from [`APP_ENVIRONMENT_ENV_NAME`], falling back to [`Environment::Dev`]
    /// when the variable is unset.
    pub fn load() -> Result<Environment, io::Error> {
        match std::env::var(APP_ENVIRONMENT_ENV_NAME) {
            Ok(value) => value.parse(),
            Err(_) => Ok(Environment::default()),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => DEV_ENV_NAME,
            Environment::Prod => PROD_ENV_NAME,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = io::Error;

    /// Parses `dev` or `prod`, ignoring ASCII case.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.eq_ignore_ascii_case(DEV_ENV_NAME) {
            return Ok(Environment::Dev);
        }
        if value.eq_ignore_ascii_case(PROD_ENV_NAME) {
            return Ok(Environment::Prod);
        }

        Err(io::Error::other(format!(
            "`{value}` is not a supported environment, expected `{DEV_ENV_NAME}` or `{PROD_ENV_NAME}`"
        )))
    }
}
