//! Authentication hook for the connection handshake.
//!
//! The hub doesn't issue or verify tokens itself. It reads `name` and
//! `token` from the upgrade request's query string and asks an
//! [`Authenticator`] who the client is.

use std::future::Future;

use chiphub_protocol::{ConnectionId, Identity};
use chiphub_transport::UpgradeRequest;

use crate::AuthError;

/// Longest display name [`NameAuthenticator`] accepts, in characters.
pub const MAX_NAME_LEN: usize = 32;

/// What a client presented when it connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// The connection the hub assigned.
    pub connection: ConnectionId,
    pub name: Option<String>,
    pub token: Option<String>,
}

impl Credentials {
    /// Reads `name` and `token` from the upgrade query.
    pub fn from_request(connection: ConnectionId, request: &UpgradeRequest) -> Self {
        Self {
            connection,
            name: request.param("name").map(str::to_owned),
            token: request.param("token").map(str::to_owned),
        }
    }
}

/// Resolves handshake credentials to an identity.
///
/// ```rust
/// use chiphub::{AuthError, Authenticator, Credentials};
/// use chiphub_protocol::Identity;
///
/// /// Accepts one shared token; the name comes from the query.
/// struct SharedSecret(String);
///
/// impl Authenticator for SharedSecret {
///     async fn authenticate(
///         &self,
///         credentials: &Credentials,
///     ) -> Result<Identity, AuthError> {
///         if credentials.token.as_deref() != Some(self.0.as_str()) {
///             return Err(AuthError::Rejected("bad token".into()));
///         }
///         let name = credentials.name.clone().ok_or(AuthError::Missing("name"))?;
///         Ok(Identity { id: credentials.connection, name })
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<Identity, AuthError>> + Send;
}

/// Trusts the `name` query parameter. For development and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NameAuthenticator;

impl Authenticator for NameAuthenticator {
    async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> Result<Identity, AuthError> {
        let name = credentials
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or(AuthError::Missing("name"))?;
        if name.chars().count() > MAX_NAME_LEN {
            return Err(AuthError::Rejected(format!(
                "name longer than {MAX_NAME_LEN} characters"
            )));
        }
        Ok(Identity {
            id: credentials.connection,
            name: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(target: &str) -> Credentials {
        Credentials::from_request(
            ConnectionId::new(4),
            &UpgradeRequest::from_target(target),
        )
    }

    #[tokio::test]
    async fn test_name_authenticator_accepts_trimmed_name() {
        let id = NameAuthenticator
            .authenticate(&creds("/ws?name=+alice+"))
            .await
            .unwrap();
        assert_eq!(id.name, "alice");
        assert_eq!(id.id, ConnectionId::new(4));
    }

    #[tokio::test]
    async fn test_name_authenticator_requires_name() {
        let err = NameAuthenticator
            .authenticate(&creds("/ws?token=abc"))
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::Missing("name"));

        let err = NameAuthenticator
            .authenticate(&creds("/ws?name=%20"))
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::Missing("name"));
    }

    #[tokio::test]
    async fn test_name_authenticator_limits_length() {
        let target = format!("/ws?name={}", "x".repeat(MAX_NAME_LEN + 1));
        let err = NameAuthenticator.authenticate(&creds(&target)).await.unwrap_err();
        assert!(matches!(err, AuthError::Rejected(_)));
    }
}
