#![allow(dead_code)]

use std::{
    collections::HashMap,
    fs,
    path::Path,
    sync::Arc,
    time::Duration,
};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Notify;
use vigil_core::{
    BatchContext, BatchRunner, CheckError, CheckRegistry, InMemoryScanStore, InProcessBoundary,
    ScanManager, ScanStore, SessionError, SessionProvider,
    executor::{CheckOutcome, CheckRunner, SessionSet, StaticSessionProvider},
};
use vigil_model::{
    BatchCheck, CheckStatus, Scan, ScanId, ScopedCredentials, ServiceGroup, TargetCredentials,
};

pub const TECHNOLOGY: &str = "m365";

/// A check tree under `<tmp>/m365/`.
#[derive(Debug)]
pub struct CheckTree {
    dir: TempDir,
}

impl CheckTree {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        fs::create_dir_all(dir.path().join(TECHNOLOGY))?;
        Ok(Self { dir })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn add(&self, name: &str, body: &str) -> Result<()> {
        fs::write(self.dir.path().join(TECHNOLOGY).join(format!("{name}.ps1")), body)?;
        Ok(())
    }

    pub fn registry(&self) -> CheckRegistry {
        CheckRegistry::new(self.root())
    }
}

pub fn credentials() -> TargetCredentials {
    TargetCredentials {
        tenant_id: "tenant-a".into(),
        client_id: "client-a".into(),
        client_secret: None,
        organization: Some("contoso.example".into()),
        admin_url: None,
        display_name: Some("Contoso".into()),
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    Pass,
    Fail,
    Error,
    Panic,
    /// Signal `blocked` and never finish.
    Block,
}

/// Check runner whose outcome per check id is fixed up front.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    behaviors: HashMap<String, Behavior>,
    gate: Option<Arc<Notify>>,
    pub blocked: Arc<Notify>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, check_id: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(check_id.to_string(), behavior);
        self
    }

    /// Hold the first check until the gate is notified.
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }
}

#[async_trait]
impl CheckRunner for ScriptedRunner {
    async fn run(&self, check: &BatchCheck, _context: &BatchContext) -> Result<CheckOutcome, CheckError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
            gate.notify_one();
        }
        match self
            .behaviors
            .get(check.id.as_str())
            .copied()
            .unwrap_or(Behavior::Pass)
        {
            Behavior::Pass => Ok(CheckOutcome::new(CheckStatus::Pass)),
            Behavior::Fail => Ok(CheckOutcome::new(CheckStatus::Fail)
                .with_details(vec![serde_json::json!({ "finding": check.id.as_str() })])),
            Behavior::Error => Err(CheckError::Failed(format!("{} blew up", check.id))),
            Behavior::Panic => panic!("check {} panicked", check.id),
            Behavior::Block => {
                self.blocked.notify_one();
                std::future::pending().await
            }
        }
    }
}

/// Fails session setup for one group, delegates the rest.
#[derive(Debug)]
pub struct FailingSessions {
    pub group: ServiceGroup,
    inner: StaticSessionProvider,
}

impl FailingSessions {
    pub fn new(group: ServiceGroup) -> Self {
        Self {
            group,
            inner: StaticSessionProvider::new("token"),
        }
    }
}

#[async_trait]
impl SessionProvider for FailingSessions {
    async fn establish(&self, credentials: &ScopedCredentials) -> Result<SessionSet, SessionError> {
        if credentials.group == self.group {
            return Err(SessionError::Rejected {
                group: credentials.group,
                status: 401,
                body: "invalid_client".into(),
            });
        }
        self.inner.establish(credentials).await
    }
}

pub fn batch_runner(runner: ScriptedRunner) -> BatchRunner {
    BatchRunner::new(Arc::new(StaticSessionProvider::new("token")), Arc::new(runner))
}

pub fn manager(tree: &CheckTree, runner: BatchRunner) -> (ScanManager, Arc<InMemoryScanStore>) {
    let store = Arc::new(InMemoryScanStore::new());
    let boundary = Arc::new(InProcessBoundary::new(runner, Duration::from_secs(30)));
    let manager = ScanManager::builder(tree.registry(), boundary, store.clone()).build();
    (manager, store)
}

/// Poll until the scan is terminal.
pub async fn wait_terminal(store: &dyn ScanStore, scan_id: ScanId) -> Result<Scan> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(scan) = store.get_scan(scan_id).await? {
            if scan.is_terminal() {
                return Ok(scan);
            }
        }
        if tokio::time::Instant::now() > deadline {
            return Err(anyhow!("scan {scan_id} did not finish"));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
