use serde::{Deserialize, Serialize};
use url::Url;
use vigil_model::{BatchRequest, ScanId, ServiceGroup};

use super::session::SessionSet;

/// Everything a check invocation may use. Built once per batch after its
/// sessions are established and handed to every check in that batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchContext {
    pub scan_id: ScanId,
    pub tenant_id: String,
    pub technology: String,
    pub group: ServiceGroup,
    pub organization: Option<String>,
    pub admin_url: Option<Url>,
    pub sessions: SessionSet,
}

impl BatchContext {
    pub fn new(request: &BatchRequest, sessions: SessionSet) -> Self {
        let credentials = &request.batch.credentials;
        Self {
            scan_id: request.scan_id,
            tenant_id: request.tenant_id.clone(),
            technology: request.technology.clone(),
            group: request.batch.group,
            organization: credentials.organization.clone(),
            admin_url: credentials.admin_url.clone(),
            sessions,
        }
    }
}
