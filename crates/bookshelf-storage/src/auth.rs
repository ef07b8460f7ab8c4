//! Authentication providers for object storage.

use std::fmt;

use async_trait::async_trait;

use bookshelf_core::error::AppError;
use bookshelf_core::result::AppResult;
use bookshelf_core::traits::AuthProvider;

/// Bearer token fixed at construction, usually taken from configuration.
#[derive(Clone)]
pub struct StaticTokenAuth {
    token: String,
}

impl StaticTokenAuth {
    /// Create a provider returning `token`. An empty token means "signed out".
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl fmt::Debug for StaticTokenAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticTokenAuth")
            .field("token", &if self.token.is_empty() { "<none>" } else { "<redacted>" })
            .finish()
    }
}

#[async_trait]
impl AuthProvider for StaticTokenAuth {
    async fn bearer_token(&self) -> AppResult<String> {
        if self.token.trim().is_empty() {
            return Err(AppError::authentication(
                "No storage access token configured",
            ));
        }
        Ok(self.token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bookshelf_core::error::ErrorKind;

    #[tokio::test]
    async fn test_empty_token_is_unauthenticated() {
        let err = StaticTokenAuth::new("").bearer_token().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Authentication);
    }

    #[test]
    fn test_debug_redacts_token() {
        let rendered = format!("{:?}", StaticTokenAuth::new("secret-token"));
        assert!(!rendered.contains("secret-token"));
    }
}
