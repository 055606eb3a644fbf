//! Shorthands for building and returning [`crate::error::MirrorError`]s.

/// Builds a [`crate::error::MirrorError`] from a kind, a static description and optionally a
/// detail and a source.
///
/// A bare detail expression is converted with `to_string()`, `detail = expr` moves an owned
/// value instead.
#[macro_export]
macro_rules! mirror_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::MirrorError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, source: $source:expr) => {
        $crate::error::MirrorError::from(($kind, $desc)).with_source($source)
    };
    ($kind:expr, $desc:expr, detail = $detail:expr) => {
        $crate::error::MirrorError::from(($kind, $desc, $detail))
    };
    ($kind:expr, $desc:expr, detail = $detail:expr, source: $source:expr) => {
        $crate::error::MirrorError::from(($kind, $desc, $detail)).with_source($source)
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::MirrorError::from(($kind, $desc, $detail.to_string()))
    };
    ($kind:expr, $desc:expr, $detail:expr, source: $source:expr) => {
        $crate::error::MirrorError::from(($kind, $desc, $detail.to_string())).with_source($source)
    };
}

/// Returns early with a [`crate::error::MirrorError`] built by [`mirror_error!`].
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return ::core::result::Result::Err($crate::mirror_error!($($arg)*))
    };
}
