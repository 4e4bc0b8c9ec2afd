//! Connection authorization.

use replidb_sync_protocol::CloseReason;
use std::collections::HashSet;

/// Decides whether a connection may open.
///
/// A rejection carries the typed close reason the client will receive, so
/// the client can distinguish "refresh your token" from "give up".
pub trait Authenticator: Send + Sync {
    /// Authorizes a connection by its presented token.
    fn authorize(&self, token: Option<&str>) -> Result<(), CloseReason>;
}

/// Accepts every connection. The default for local and test setups.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl Authenticator for AllowAll {
    fn authorize(&self, _token: Option<&str>) -> Result<(), CloseReason> {
        Ok(())
    }
}

/// Accepts connections presenting one of a fixed set of tokens.
#[derive(Debug, Default)]
pub struct StaticTokenAuth {
    tokens: HashSet<String>,
}

impl StaticTokenAuth {
    /// Creates a validator over the given tokens.
    pub fn new(tokens: impl IntoIterator<Item = String>) -> Self {
        Self {
            tokens: tokens.into_iter().collect(),
        }
    }
}

impl Authenticator for StaticTokenAuth {
    fn authorize(&self, token: Option<&str>) -> Result<(), CloseReason> {
        match token {
            Some(token) if self.tokens.contains(token) => Ok(()),
            Some(_) => Err(CloseReason::TokenExpired),
            None => Err(CloseReason::Unauthorized),
        }
    }
}
