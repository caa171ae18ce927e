use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_sts::error::ProvideErrorMetadata;
use chrono::{DateTime, Utc};
use std::fmt;
use tracing::info;

use crate::error::EngineError;

/// Bound session duration for every exchange; credentials are single-use and
/// never outlive one pipeline run.
pub const SESSION_DURATION_SECS: i32 = 3600;

/// A delegated, time-boxed capability obtained through one trust exchange.
/// Not serializable; the secret half is only reachable through `env_vars`
/// (subprocess environments) and `as_provider` (SDK clients).
#[derive(Clone)]
pub struct AssumedCredentials {
    pub access_key_id: String,
    secret_access_key: String,
    session_token: String,
    pub expiration: DateTime<Utc>,
}

impl AssumedCredentials {
    pub fn new(
        access_key_id: String,
        secret_access_key: String,
        session_token: String,
        expiration: DateTime<Utc>,
    ) -> Self {
        Self { access_key_id, secret_access_key, session_token, expiration }
    }

    /// Environment triple handed to pipeline subprocesses.
    pub fn env_vars(&self) -> Vec<(&'static str, String)> {
        vec![
            ("AWS_ACCESS_KEY_ID", self.access_key_id.clone()),
            ("AWS_SECRET_ACCESS_KEY", self.secret_access_key.clone()),
            ("AWS_SESSION_TOKEN", self.session_token.clone()),
        ]
    }

    /// Static credentials provider for in-process SDK clients.
    pub fn as_provider(&self) -> aws_credential_types::Credentials {
        aws_credential_types::Credentials::new(
            self.access_key_id.clone(),
            self.secret_access_key.clone(),
            Some(self.session_token.clone()),
            None,
            "vela-assumed-role",
        )
    }
}

impl fmt::Debug for AssumedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssumedCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &"<redacted>")
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// One delegated-trust exchange per operation. Callers discard the returned
/// credentials once the operation's subprocess calls complete; nothing is
/// persisted and nothing is retried, since a wrong or stale external id will
/// not self-correct.
#[async_trait]
pub trait CredentialBroker: Send + Sync + 'static {
    async fn assume(
        &self,
        account_id: &str,
        region: &str,
        role_name: &str,
        external_id: &str,
        session_label: &str,
    ) -> Result<AssumedCredentials, EngineError>;
}

/// Broker backed by the real STS `AssumeRole` call.
#[derive(Debug, Clone, Copy, Default)]
pub struct StsBroker;

#[async_trait]
impl CredentialBroker for StsBroker {
    async fn assume(
        &self,
        account_id: &str,
        region: &str,
        role_name: &str,
        external_id: &str,
        session_label: &str,
    ) -> Result<AssumedCredentials, EngineError> {
        let role_arn = format!("arn:aws:iam::{account_id}:role/{role_name}");
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_owned()))
            .load()
            .await;
        let client = aws_sdk_sts::Client::new(&config);
        let response = client
            .assume_role()
            .role_arn(&role_arn)
            .role_session_name(session_label)
            .external_id(external_id)
            .duration_seconds(SESSION_DURATION_SECS)
            .send()
            .await
            .map_err(|err| {
                let service_err = err.into_service_error();
                let message = service_err
                    .meta()
                    .message()
                    .unwrap_or("assume role rejected")
                    .to_owned();
                EngineError::Credential { role_arn: role_arn.clone(), message }
            })?;
        let creds = response.credentials().ok_or_else(|| EngineError::Credential {
            role_arn: role_arn.clone(),
            message: "assume-role response contained no credentials".into(),
        })?;
        let expiration = DateTime::<Utc>::from_timestamp(creds.expiration().secs(), 0).unwrap_or_else(Utc::now);
        info!(
            event = "credentials.assumed",
            role_arn = %role_arn,
            session = %session_label,
            expires = %expiration,
        );
        Ok(AssumedCredentials::new(
            creds.access_key_id().to_owned(),
            creds.secret_access_key().to_owned(),
            creds.session_token().to_owned(),
            expiration,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_redacts_secrets() {
        let creds = AssumedCredentials::new(
            "AKIAEXAMPLE".into(),
            "very-secret".into(),
            "token-secret".into(),
            Utc::now(),
        );
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("AKIAEXAMPLE"));
        assert!(!rendered.contains("very-secret"));
        assert!(!rendered.contains("token-secret"));
    }

    #[test]
    fn env_vars_cover_the_standard_triple() {
        let creds = AssumedCredentials::new("ak".into(), "sk".into(), "st".into(), Utc::now());
        let keys: Vec<&str> = creds.env_vars().iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec!["AWS_ACCESS_KEY_ID", "AWS_SECRET_ACCESS_KEY", "AWS_SESSION_TOKEN"]);
    }
}
