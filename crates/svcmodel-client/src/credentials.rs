//! Client credentials.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use svcmodel_channels::{BindingParameters, SecurityToken, SecurityTokenProvider, TokenKind};
use svcmodel_core::{Error, Result};

use crate::endpoint::ServiceEndpoint;
use crate::inspector::EndpointBehavior;

/// Credentials presented by a client.
///
/// Added to a channel factory as a behavior, they become the token source of
/// the message security layer and of authenticating HTTP transports.
#[derive(Clone, Default)]
pub struct ClientCredentials {
    user_name: Option<(String, String)>,
    certificate: Option<(String, String)>,
    windows: Option<String>,
}

impl ClientCredentials {
    /// No credentials
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the user name and password
    pub fn with_user_name(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.user_name = Some((username.into(), password.into()));
        self
    }

    /// Set the client certificate by subject and thumbprint
    pub fn with_certificate(mut self, subject: impl Into<String>, thumbprint: impl Into<String>) -> Self {
        self.certificate = Some((subject.into(), thumbprint.into()));
        self
    }

    /// Set the Windows principal
    pub fn with_windows(mut self, principal: impl Into<String>) -> Self {
        self.windows = Some(principal.into());
        self
    }

    /// Configured user name
    pub fn user_name(&self) -> Option<&str> {
        self.user_name.as_ref().map(|(u, _)| u.as_str())
    }

    fn token_for(&self, kind: TokenKind) -> Option<SecurityToken> {
        match kind {
            TokenKind::UserName => self.user_name.as_ref().map(|(username, password)| {
                SecurityToken::UserName {
                    username: username.clone(),
                    password: password.clone(),
                }
            }),
            TokenKind::Certificate => {
                self.certificate
                    .as_ref()
                    .map(|(subject, thumbprint)| SecurityToken::Certificate {
                        subject: subject.clone(),
                        thumbprint: thumbprint.clone(),
                    })
            }
            TokenKind::Windows => self
                .windows
                .as_ref()
                .map(|principal| SecurityToken::Windows {
                    principal: principal.clone(),
                }),
        }
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("user_name", &self.user_name())
            .field("certificate", &self.certificate.as_ref().map(|(s, _)| s))
            .field("windows", &self.windows)
            .finish()
    }
}

#[async_trait]
impl SecurityTokenProvider for ClientCredentials {
    async fn token(&self, kind: TokenKind, _timeout: Duration) -> Result<SecurityToken> {
        self.token_for(kind).ok_or_else(|| {
            Error::invalid_operation(format!(
                "the client credentials do not include a {:?} credential",
                kind
            ))
        })
    }
}

impl EndpointBehavior for ClientCredentials {
    fn add_binding_parameters(
        &self,
        _endpoint: &ServiceEndpoint,
        parameters: &mut BindingParameters,
    ) -> Result<()> {
        parameters.token_provider = Some(Arc::new(self.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tokens_by_kind() {
        let creds = ClientCredentials::new()
            .with_user_name("alice", "pw")
            .with_certificate("CN=alice", "ab12");
        let token = creds
            .token(TokenKind::UserName, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(token.kind(), TokenKind::UserName);
        let cert = creds
            .token(TokenKind::Certificate, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(cert.kind(), TokenKind::Certificate);

        let err = creds
            .token(TokenKind::Windows, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
    }

    #[test]
    fn debug_hides_password() {
        let creds = ClientCredentials::new().with_user_name("alice", "hunter2");
        let text = format!("{:?}", creds);
        assert!(text.contains("alice"));
        assert!(!text.contains("hunter2"));
    }
}
