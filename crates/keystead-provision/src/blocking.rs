//! Runs synchronous vault work (PBKDF2, SQLite) on the blocking pool.

use keystead_vault::{Result, VaultError};

/// Execute `f` via `tokio::task::spawn_blocking` and flatten the join error
/// into [`VaultError::Internal`].
pub(crate) async fn vault_task<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| VaultError::Internal(format!("vault task failed: {e}")))?
}
