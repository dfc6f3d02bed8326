//! Per-group client session establishment.

use std::{collections::HashMap, fmt, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use url::Url;
use vigil_model::{ScopedCredentials, Secret, ServiceGroup};

use crate::error::SessionError;

pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";
const TOKEN_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// An authenticated session for one service endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSession {
    pub group: ServiceGroup,
    pub scope: String,
    pub access_token: Secret,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Every session a batch needs. Owned exclusively by one boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSet {
    sessions: Vec<ServiceSession>,
}

impl SessionSet {
    pub fn new(sessions: Vec<ServiceSession>) -> Self {
        Self { sessions }
    }

    pub fn sessions(&self) -> &[ServiceSession] {
        &self.sessions
    }

    pub fn primary(&self) -> Option<&ServiceSession> {
        self.sessions.first()
    }

    pub fn for_scope(&self, scope: &str) -> Option<&ServiceSession> {
        self.sessions.iter().find(|session| session.scope == scope)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Establishes only the sessions required by a batch's group.
#[async_trait]
pub trait SessionProvider: Send + Sync + fmt::Debug {
    async fn establish(&self, credentials: &ScopedCredentials) -> Result<SessionSet, SessionError>;
}

/// Token scopes requested per service group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupScopes(HashMap<ServiceGroup, Vec<String>>);

impl GroupScopes {
    pub fn scopes(&self, group: ServiceGroup) -> &[String] {
        self.0.get(&group).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn set(&mut self, group: ServiceGroup, scopes: Vec<String>) {
        self.0.insert(group, scopes);
    }
}

impl Default for GroupScopes {
    fn default() -> Self {
        let mut scopes = HashMap::new();
        scopes.insert(
            ServiceGroup::Directory,
            vec!["https://graph.microsoft.com/.default".to_string()],
        );
        scopes.insert(
            ServiceGroup::Mail,
            vec!["https://outlook.office365.com/.default".to_string()],
        );
        scopes.insert(
            ServiceGroup::Compliance,
            vec!["https://ps.compliance.protection.outlook.com/.default".to_string()],
        );
        scopes.insert(
            ServiceGroup::Platform,
            vec![
                "https://graph.microsoft.com/.default".to_string(),
                "https://api.spaces.skype.com/.default".to_string(),
            ],
        );
        Self(scopes)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Client-credentials token acquisition against the identity authority.
#[derive(Debug, Clone)]
pub struct OAuthSessionProvider {
    http: reqwest::Client,
    authority: Url,
    scopes: GroupScopes,
}

impl OAuthSessionProvider {
    pub fn new(http: reqwest::Client, authority: Url, scopes: GroupScopes) -> Self {
        Self {
            http,
            authority,
            scopes,
        }
    }

    fn token_endpoint(&self, group: ServiceGroup, tenant_id: &str) -> Result<Url, SessionError> {
        let base = self.authority.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}/{tenant_id}/oauth2/v2.0/token")).map_err(|err| {
            SessionError::Transport {
                group,
                message: format!("invalid token endpoint: {err}"),
            }
        })
    }

    async fn request_token(
        &self,
        credentials: &ScopedCredentials,
        secret: &Secret,
        scope: &str,
    ) -> Result<ServiceSession, SessionError> {
        let group = credentials.group;
        let endpoint = self.token_endpoint(group, &credentials.tenant_id)?;
        let form = [
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", secret.expose()),
            ("scope", scope),
            ("grant_type", "client_credentials"),
        ];

        let response = self
            .http
            .post(endpoint)
            .timeout(TOKEN_REQUEST_TIMEOUT)
            .form(&form)
            .send()
            .await
            .map_err(|err| SessionError::Transport {
                group,
                message: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SessionError::Rejected {
                group,
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = response.json().await.map_err(|err| SessionError::Transport {
            group,
            message: format!("invalid token response: {err}"),
        })?;

        debug!(%group, scope, "token acquired");
        Ok(ServiceSession {
            group,
            scope: scope.to_string(),
            access_token: Secret::new(token.access_token),
            expires_at: token
                .expires_in
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
        })
    }
}

#[async_trait]
impl SessionProvider for OAuthSessionProvider {
    #[instrument(skip(self, credentials), fields(group = %credentials.group))]
    async fn establish(&self, credentials: &ScopedCredentials) -> Result<SessionSet, SessionError> {
        let group = credentials.group;
        validate_credentials(credentials)?;
        let secret = credentials
            .client_secret
            .as_ref()
            .ok_or(SessionError::MissingCredential {
                group,
                field: "client_secret",
            })?;

        let mut sessions = Vec::new();
        for scope in self.scopes.scopes(group) {
            sessions.push(self.request_token(credentials, secret, scope).await?);
        }

        info!(%group, sessions = sessions.len(), "batch sessions established");
        Ok(SessionSet::new(sessions))
    }
}

/// Hands out a fixed token for every scope. Used offline and in tests.
#[derive(Debug, Clone)]
pub struct StaticSessionProvider {
    token: Secret,
    scopes: GroupScopes,
}

impl StaticSessionProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Secret::new(token),
            scopes: GroupScopes::default(),
        }
    }
}

#[async_trait]
impl SessionProvider for StaticSessionProvider {
    async fn establish(&self, credentials: &ScopedCredentials) -> Result<SessionSet, SessionError> {
        let group = credentials.group;
        Ok(SessionSet::new(
            self.scopes
                .scopes(group)
                .iter()
                .map(|scope| ServiceSession {
                    group,
                    scope: scope.clone(),
                    access_token: self.token.clone(),
                    expires_at: None,
                })
                .collect(),
        ))
    }
}

/// Mail and compliance sessions are bound to the tenant's primary domain;
/// platform sessions to its admin endpoint.
pub fn validate_credentials(credentials: &ScopedCredentials) -> Result<(), SessionError> {
    let group = credentials.group;
    if credentials.client_id.trim().is_empty() {
        return Err(SessionError::MissingCredential {
            group,
            field: "client_id",
        });
    }
    match group {
        ServiceGroup::Mail | ServiceGroup::Compliance if credentials.organization.is_none() => {
            Err(SessionError::MissingCredential {
                group,
                field: "organization",
            })
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_model::TargetCredentials;

    fn scoped(group: ServiceGroup, organization: Option<&str>) -> ScopedCredentials {
        ScopedCredentials::for_group(
            group,
            &TargetCredentials {
                tenant_id: "tenant".into(),
                client_id: "client".into(),
                client_secret: Some(Secret::new("secret")),
                organization: organization.map(str::to_string),
                admin_url: None,
                display_name: None,
            },
        )
    }

    #[test]
    fn mail_sessions_require_an_organization() {
        assert_eq!(
            validate_credentials(&scoped(ServiceGroup::Mail, None)),
            Err(SessionError::MissingCredential {
                group: ServiceGroup::Mail,
                field: "organization",
            })
        );
        assert!(validate_credentials(&scoped(ServiceGroup::Directory, None)).is_ok());
    }

    #[test]
    fn token_endpoint_is_tenant_scoped() {
        let provider = OAuthSessionProvider::new(
            reqwest::Client::new(),
            Url::parse("https://login.example/").unwrap(),
            GroupScopes::default(),
        );
        assert_eq!(
            provider
                .token_endpoint(ServiceGroup::Directory, "contoso")
                .unwrap()
                .as_str(),
            "https://login.example/contoso/oauth2/v2.0/token"
        );
    }

    #[tokio::test]
    async fn static_provider_only_covers_the_batch_group() {
        let sessions = StaticSessionProvider::new("token")
            .establish(&scoped(ServiceGroup::Directory, None))
            .await
            .unwrap();
        assert_eq!(sessions.len(), 1);
        assert!(
            sessions
                .sessions()
                .iter()
                .all(|session| session.group == ServiceGroup::Directory)
        );
        assert_eq!(
            sessions.primary().map(|s| s.access_token.expose()),
            Some("token")
        );
    }
}
