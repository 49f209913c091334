//! Bearer token supply for both clients

use async_trait::async_trait;

use crate::error::ClientResult;

/// Supplies the bearer token each request is authorized with
///
/// Called once per request, so implementations that refresh tokens can
/// hand out a fresh one without the clients knowing.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn access_token(&self) -> ClientResult<String>;
}

/// A token obtained once up front
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken(..)")
    }
}

#[async_trait]
impl AccessTokenProvider for StaticToken {
    async fn access_token(&self) -> ClientResult<String> {
        Ok(self.0.clone())
    }
}

/// `Authorization` header value for a token, adding the scheme if missing
pub fn authorization_value(token: &str) -> String {
    let token = token.trim();
    let has_scheme = token
        .get(..7)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("bearer "));
    if has_scheme && token.len() > 7 {
        token.to_string()
    } else {
        format!("Bearer {}", token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorization_value() {
        assert_eq!(authorization_value("abc"), "Bearer abc");
        assert_eq!(authorization_value("Bearer abc"), "Bearer abc");
        assert_eq!(authorization_value("bearer abc"), "bearer abc");
    }

    #[tokio::test]
    async fn test_static_token() {
        let token = StaticToken::new("t0k");
        assert_eq!(token.access_token().await.unwrap(), "t0k");
        assert_eq!(format!("{:?}", token), "StaticToken(..)");
    }
}
