use std::{collections::HashMap, fmt, sync::Arc};

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use vigil_model::{CheckResult, Scan, ScanId, ScanStatus, TargetCredentials, TargetRef};

use super::{
    ScanAccepted, ScanControlError, ScanPreview, ScanRequest, ScanSubscription,
};
use crate::{
    executor::IsolationBoundary,
    planner::BatchPlanner,
    registry::{CheckRegistry, RegistryQuery},
    relay::{CallbackDispatcher, ProgressRelay, RelaySettings},
    store::ScanStore,
};

/// Command dispatcher and read model for scans.
#[derive(Clone)]
pub struct ScanManager {
    pub(super) inner: Arc<ScanManagerInner>,
}

impl fmt::Debug for ScanManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let active = self.inner.active.try_read().ok().map(|guard| guard.len());
        f.debug_struct("ScanManager")
            .field("active_scans", &active)
            .field("boundary", &self.inner.boundary.name())
            .field("checks_root", &self.inner.registry.root())
            .field("store", &self.inner.store)
            .finish()
    }
}

pub(super) struct ScanManagerInner {
    pub(super) registry: CheckRegistry,
    pub(super) planner: BatchPlanner,
    pub(super) boundary: Arc<dyn IsolationBoundary>,
    pub(super) store: Arc<dyn ScanStore>,
    pub(super) relay: RelaySettings,
    pub(super) http: reqwest::Client,
    pub(super) active: RwLock<HashMap<ScanId, Arc<ScanRun>>>,
}

/// Handle to one scan that has not reached a terminal state.
#[derive(Debug)]
pub(super) struct ScanRun {
    pub(super) scan_id: ScanId,
    pub(super) relay: Arc<ProgressRelay>,
    pub(super) cancel: CancellationToken,
}

#[derive(Debug)]
pub struct ScanManagerBuilder {
    registry: CheckRegistry,
    boundary: Arc<dyn IsolationBoundary>,
    store: Arc<dyn ScanStore>,
    planner: BatchPlanner,
    relay: RelaySettings,
    http: Option<reqwest::Client>,
}

impl ScanManagerBuilder {
    pub fn planner(mut self, planner: BatchPlanner) -> Self {
        self.planner = planner;
        self
    }

    pub fn relay(mut self, relay: RelaySettings) -> Self {
        self.relay = relay;
        self
    }

    /// Client used for progress callbacks.
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    pub fn build(self) -> ScanManager {
        ScanManager {
            inner: Arc::new(ScanManagerInner {
                registry: self.registry,
                planner: self.planner,
                boundary: self.boundary,
                store: self.store,
                relay: self.relay,
                http: self.http.unwrap_or_default(),
                active: RwLock::new(HashMap::new()),
            }),
        }
    }
}

impl ScanManager {
    pub fn builder(
        registry: CheckRegistry,
        boundary: Arc<dyn IsolationBoundary>,
        store: Arc<dyn ScanStore>,
    ) -> ScanManagerBuilder {
        ScanManagerBuilder {
            registry,
            boundary,
            store,
            planner: BatchPlanner::default(),
            relay: RelaySettings::default(),
            http: None,
        }
    }

    pub fn store(&self) -> Arc<dyn ScanStore> {
        Arc::clone(&self.inner.store)
    }

    pub fn registry(&self) -> &CheckRegistry {
        &self.inner.registry
    }

    /// Accept a scan and run it on a background task.
    #[instrument(skip(self, request), fields(technology = %request.technology))]
    pub async fn start_scan(&self, request: ScanRequest) -> Result<ScanAccepted, ScanControlError> {
        let (run, scan) = self.prepare(&request).await?;
        let accepted = ScanAccepted {
            scan_id: scan.id,
            status: scan.status,
        };

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.drive(run, scan, request).await;
        });

        info!(scan_id = %accepted.scan_id, "scan accepted");
        Ok(accepted)
    }

    /// Run a scan to its terminal state on the caller's task.
    #[instrument(skip(self, request), fields(technology = %request.technology))]
    pub async fn execute(&self, request: ScanRequest) -> Result<Scan, ScanControlError> {
        let (run, scan) = self.prepare(&request).await?;
        Ok(self.inner.drive(run, scan, request).await)
    }

    /// Request cancellation. Takes effect at the next safe point; the
    /// in-flight boundary is terminated.
    #[instrument(skip(self))]
    pub async fn cancel_scan(&self, scan_id: ScanId) -> Result<ScanAccepted, ScanControlError> {
        let run = self.inner.active.read().await.get(&scan_id).cloned();
        let Some(run) = run else {
            return match self.inner.store.get_scan(scan_id).await? {
                Some(scan) if scan.is_terminal() => Err(ScanControlError::ScanTerminal),
                Some(_) => Err(ScanControlError::internal("scan has no coordinator")),
                None => Err(ScanControlError::ScanNotFound),
            };
        };

        run.cancel.cancel();
        let status = self
            .inner
            .store
            .get_scan(run.scan_id)
            .await?
            .map(|scan| scan.status)
            .unwrap_or(ScanStatus::Pending);
        info!(%scan_id, "scan cancellation requested");
        Ok(ScanAccepted { scan_id, status })
    }

    pub async fn snapshot(&self, scan_id: ScanId) -> Result<Scan, ScanControlError> {
        self.inner
            .store
            .get_scan(scan_id)
            .await?
            .ok_or(ScanControlError::ScanNotFound)
    }

    pub async fn results(&self, scan_id: ScanId) -> Result<Vec<CheckResult>, ScanControlError> {
        Ok(self.inner.store.results(scan_id).await?)
    }

    pub async fn list(&self, limit: usize) -> Result<Vec<Scan>, ScanControlError> {
        Ok(self.inner.store.list_scans(limit).await?)
    }

    pub async fn active_scans(&self) -> Vec<ScanId> {
        self.inner.active.read().await.keys().copied().collect()
    }

    /// Snapshot plus every event after `since`, and a live receiver while
    /// the scan is still running.
    pub async fn subscribe(
        &self,
        scan_id: ScanId,
        since: u64,
    ) -> Result<ScanSubscription, ScanControlError> {
        let run = self.inner.active.read().await.get(&scan_id).cloned();
        let (history, receiver) = match &run {
            Some(run) => {
                let (history, rx) = run.relay.bus().subscribe_with_history(since);
                (history, Some(rx))
            }
            None => (Vec::new(), None),
        };
        let snapshot = self.snapshot(scan_id).await?;
        Ok(ScanSubscription {
            snapshot,
            history,
            receiver,
        })
    }

    /// Load and plan without executing anything.
    pub async fn plan(
        &self,
        query: RegistryQuery,
        credentials: Option<TargetCredentials>,
    ) -> Result<ScanPreview, ScanControlError> {
        let registry = self.inner.registry.clone();
        let loaded = tokio::task::spawn_blocking(move || registry.load(&query))
            .await
            .map_err(ScanControlError::internal)??;

        let credentials = credentials.unwrap_or_else(|| TargetCredentials {
            tenant_id: String::new(),
            client_id: String::new(),
            client_secret: None,
            organization: None,
            admin_url: None,
            display_name: None,
        });
        let plan = self.inner.planner.plan(&loaded.checks, &credentials);
        Ok(ScanPreview {
            plan,
            registry_warnings: loaded.warnings,
        })
    }

    async fn prepare(
        &self,
        request: &ScanRequest,
    ) -> Result<(Arc<ScanRun>, Scan), ScanControlError> {
        if request.technology.trim().is_empty() {
            return Err(ScanControlError::InvalidRequest("technology_required".into()));
        }
        if request.credentials.tenant_id.trim().is_empty() {
            return Err(ScanControlError::InvalidRequest("tenant_id_required".into()));
        }

        let scan_id = request.scan_id.unwrap_or_default();
        let scan = Scan::new(
            scan_id,
            TargetRef {
                tenant_id: request.credentials.tenant_id.clone(),
                display_name: request.credentials.display_name.clone(),
            },
            request.technology.clone(),
        );
        // Insert-if-absent; a reused id surfaces as `ScanExists`.
        self.inner.store.insert_scan(&scan).await?;

        let dispatcher = request.callback_url.clone().map(|url| {
            CallbackDispatcher::spawn(self.inner.http.clone(), url, &self.inner.relay.callback)
        });
        let relay = Arc::new(ProgressRelay::new(&self.inner.relay, dispatcher));
        relay.status(&scan);

        let run = Arc::new(ScanRun {
            scan_id,
            relay,
            cancel: CancellationToken::new(),
        });
        self.inner.register_run(Arc::clone(&run)).await;
        Ok((run, scan))
    }
}

impl ScanManagerInner {
    async fn register_run(&self, run: Arc<ScanRun>) {
        let mut guard = self.active.write().await;
        if guard.insert(run.scan_id, run).is_some() {
            warn!("replaced an active scan run with the same id");
        }
    }

    pub(super) async fn unregister_run(&self, scan_id: ScanId) {
        self.active.write().await.remove(&scan_id);
    }
}
