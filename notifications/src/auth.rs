//! Authorization oracle for new streaming connections.
//!
//! A connection's first message carries a short-lived bearer credential;
//! the fan-out service validates it exactly once, via the storefront's
//! authorization service, before registering a mailbox. Token formats and
//! signing are that service's business — this module only asks the oracle
//! and relays the answer.

use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Identity returned by the oracle for a valid credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claims {
    /// The authenticated user.
    pub user_id: i64,
    /// Whether the user holds admin rights.
    pub is_admin: bool,
}

/// Errors from credential validation.
#[derive(Error, Debug)]
pub enum AuthError {
    /// The oracle rejected the credential.
    #[error("authorization rejected: {0}")]
    Rejected(String),

    /// The oracle could not be reached.
    #[error("authorization service unreachable: {0}")]
    Unreachable(String),
}

/// Validates bearer credentials for new streaming connections.
pub trait Authorizer: Send + Sync {
    /// Validate a bearer credential, returning the caller's identity.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Rejected`] for an invalid credential and
    /// [`AuthError::Unreachable`] when the oracle cannot be consulted.
    fn authorize(
        &self,
        bearer: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Claims, AuthError>> + Send + '_>>;
}

#[derive(Debug, Deserialize)]
struct AuthorizationResponse {
    id: i64,
    #[serde(rename = "isAdmin", default)]
    is_admin: bool,
}

/// HTTP client for the storefront's authorization service.
pub struct HttpAuthorizer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpAuthorizer {
    /// Create an authorizer that calls `endpoint` (e.g.
    /// `http://authorization:8080/authorize`).
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

impl Authorizer for HttpAuthorizer {
    fn authorize(
        &self,
        bearer: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Claims, AuthError>> + Send + '_>> {
        let bearer = bearer.to_string();

        Box::pin(async move {
            let response = self
                .client
                .get(&self.endpoint)
                .header(reqwest::header::AUTHORIZATION, format!("Bearer {bearer}"))
                .send()
                .await
                .map_err(|e| AuthError::Unreachable(e.to_string()))?;

            if !response.status().is_success() {
                return Err(AuthError::Rejected(format!(
                    "status {}",
                    response.status()
                )));
            }

            let body: AuthorizationResponse = response
                .json()
                .await
                .map_err(|e| AuthError::Rejected(format!("malformed claims: {e}")))?;

            Ok(Claims {
                user_id: body.id,
                is_admin: body.is_admin,
            })
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn claims_parse_from_oracle_response() {
        let body: AuthorizationResponse =
            serde_json::from_str(r#"{"id":42,"isAdmin":false}"#).unwrap();
        assert_eq!(body.id, 42);
        assert!(!body.is_admin);
    }

    #[test]
    fn is_admin_defaults_to_false() {
        let body: AuthorizationResponse = serde_json::from_str(r#"{"id":7}"#).unwrap();
        assert!(!body.is_admin);
    }
}
