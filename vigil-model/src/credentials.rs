use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::ServiceGroup;

/// Secret string that never prints and is wiped on drop.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Full credential bundle supplied by the caller for one tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetCredentials {
    pub tenant_id: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<Secret>,
    /// Primary tenant domain, required by mail and compliance sessions.
    #[serde(default)]
    pub organization: Option<String>,
    /// Tenant admin endpoint, required by platform sessions.
    #[serde(default)]
    pub admin_url: Option<Url>,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// The subset of [`TargetCredentials`] one service group needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopedCredentials {
    pub group: ServiceGroup,
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: Option<Secret>,
    pub organization: Option<String>,
    pub admin_url: Option<Url>,
}

impl ScopedCredentials {
    pub fn for_group(group: ServiceGroup, credentials: &TargetCredentials) -> Self {
        let organization = match group {
            ServiceGroup::Mail | ServiceGroup::Compliance => {
                credentials.organization.clone()
            }
            ServiceGroup::Directory | ServiceGroup::Platform => None,
        };
        let admin_url = match group {
            ServiceGroup::Platform => credentials.admin_url.clone(),
            _ => None,
        };

        Self {
            group,
            tenant_id: credentials.tenant_id.clone(),
            client_id: credentials.client_id.clone(),
            client_secret: credentials.client_secret.clone(),
            organization,
            admin_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle() -> TargetCredentials {
        TargetCredentials {
            tenant_id: "tenant".into(),
            client_id: "client".into(),
            client_secret: Some(Secret::new("hunter2")),
            organization: Some("contoso.example".into()),
            admin_url: Some(Url::parse("https://contoso-admin.example").unwrap()),
            display_name: None,
        }
    }

    #[test]
    fn scoped_credentials_only_carry_what_the_group_needs() {
        let directory = ScopedCredentials::for_group(ServiceGroup::Directory, &bundle());
        assert!(directory.organization.is_none());
        assert!(directory.admin_url.is_none());

        let mail = ScopedCredentials::for_group(ServiceGroup::Mail, &bundle());
        assert_eq!(mail.organization.as_deref(), Some("contoso.example"));
        assert!(mail.admin_url.is_none());

        let platform = ScopedCredentials::for_group(ServiceGroup::Platform, &bundle());
        assert!(platform.admin_url.is_some());
    }

    #[test]
    fn secrets_are_redacted_in_debug_output() {
        let rendered = format!("{:?}", bundle());
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("Secret(***)"));
    }
}
