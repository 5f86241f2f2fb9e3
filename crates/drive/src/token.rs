//! Bearer token sources.

use futures_util::future::{self, BoxFuture};

use crate::client::Error;

/// Supplies an OAuth bearer token on demand.
///
/// Called once per upload session, right before initiation. Implementations
/// that refresh credentials do so inside `token`.
pub trait TokenProvider: Send + Sync {
    fn token(&self) -> BoxFuture<'_, Result<String, Error>>;
}

/// A fixed token injected by the host.
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

impl TokenProvider for StaticToken {
    fn token(&self) -> BoxFuture<'_, Result<String, Error>> {
        if self.0.is_empty() {
            return Box::pin(future::ready(Err(Error::Token("empty access token".into()))));
        }
        Box::pin(future::ready(Ok(self.0.clone())))
    }
}
