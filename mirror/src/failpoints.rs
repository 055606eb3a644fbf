//! Named failpoints used to exercise crash and retry paths.
//!
//! They compile to nothing unless the `failpoints` feature is enabled.

use fail::fail_point;

use crate::error::MirrorResult;

/// Fires after the window is planned and before the merge statements run.
pub const NORMALIZE_BEFORE_MERGE: &str = "normalize.before_merge";

/// Fires after the merge statements ran and before the normalize cursor moves, inside the
/// merge transaction.
pub const NORMALIZE_BEFORE_CURSOR_UPDATE: &str = "normalize.before_cursor_update";

/// Fires after the raw rows are appended and before the sync cursor moves, inside the sync
/// transaction.
pub const SYNC_BEFORE_COMMIT: &str = "sync.before_commit";

/// Returns an error when the failpoint `name` is configured to `return`.
pub fn mirror_fail_point(name: &str) -> MirrorResult<()> {
    fail_point!(name, |_| {
        crate::bail!(
            crate::error::ErrorKind::InjectedFailure,
            "A failpoint returned an error",
            format!("failpoint '{name}' was triggered")
        );
    });

    Ok(())
}
