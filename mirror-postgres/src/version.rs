//! Postgres server versions in the `server_version_num` format,
//! `MAJOR * 10000 + MINOR * 100 + PATCH`.

use std::num::NonZeroI32;

use sqlx::PgExecutor;

/// First version with the `merge` statement.
pub const POSTGRES_15: i32 = 150000;

/// Returns [`true`] if the server version is known and at least `required_version`.
pub fn meets_version(server_version: Option<NonZeroI32>, required_version: i32) -> bool {
    server_version.is_some_and(|v| v.get() >= required_version)
}

/// Reads `server_version_num` of the connected server.
pub async fn server_version<'c, E>(executor: E) -> sqlx::Result<Option<NonZeroI32>>
where
    E: PgExecutor<'c>,
{
    let version = sqlx::query_scalar::<_, i32>("select current_setting('server_version_num')::integer")
        .fetch_one(executor)
        .await?;

    Ok(NonZeroI32::new(version))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_needs_postgres_15() {
        assert!(meets_version(NonZeroI32::new(150000), POSTGRES_15));
        assert!(meets_version(NonZeroI32::new(170002), POSTGRES_15));
        assert!(!meets_version(NonZeroI32::new(140011), POSTGRES_15));
    }

    #[test]
    fn unknown_version_never_meets() {
        assert!(!meets_version(None, POSTGRES_15));
    }
}
