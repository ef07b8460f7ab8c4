//! Authentication context for storage requests.

use async_trait::async_trait;

use crate::result::AppResult;

/// Supplies credentials for object storage requests.
///
/// Returns an [`ErrorKind::Authentication`](crate::error::ErrorKind::Authentication)
/// error when no usable credential is available.
#[async_trait]
pub trait AuthProvider: Send + Sync + std::fmt::Debug + 'static {
    /// Current bearer token.
    async fn bearer_token(&self) -> AppResult<String>;
}
