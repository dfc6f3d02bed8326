use std::collections::{HashMap, hash_map};

use async_trait::async_trait;
use parking_lot::RwLock;
use vigil_model::{CheckCounters, CheckResult, Scan, ScanId};

use super::{ScanStore, StoreResult};
use crate::error::StoreError;

#[derive(Debug)]
struct Entry {
    scan: Scan,
    results: Vec<CheckResult>,
}

/// Process-local store. State is lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryScanStore {
    entries: RwLock<HashMap<ScanId, Entry>>,
}

impl InMemoryScanStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScanStore for InMemoryScanStore {
    async fn insert_scan(&self, scan: &Scan) -> StoreResult<()> {
        match self.entries.write().entry(scan.id) {
            hash_map::Entry::Occupied(_) => Err(StoreError::ScanExists(scan.id)),
            hash_map::Entry::Vacant(slot) => {
                slot.insert(Entry {
                    scan: scan.clone(),
                    results: Vec::new(),
                });
                Ok(())
            }
        }
    }

    async fn update_scan(&self, scan: &Scan) -> StoreResult<()> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(&scan.id)
            .ok_or(StoreError::ScanNotFound(scan.id))?;
        if entry.scan.is_terminal() {
            return Err(StoreError::ScanTerminal(scan.id));
        }
        entry.scan = scan.clone();
        Ok(())
    }

    async fn get_scan(&self, id: ScanId) -> StoreResult<Option<Scan>> {
        Ok(self.entries.read().get(&id).map(|entry| entry.scan.clone()))
    }

    async fn list_scans(&self, limit: usize) -> StoreResult<Vec<Scan>> {
        let entries = self.entries.read();
        let mut scans: Vec<Scan> = entries.values().map(|entry| entry.scan.clone()).collect();
        scans.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        scans.truncate(limit);
        Ok(scans)
    }

    async fn append_results(&self, id: ScanId, results: &[CheckResult]) -> StoreResult<usize> {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(&id).ok_or(StoreError::ScanNotFound(id))?;
        if entry.scan.is_terminal() {
            return Err(StoreError::ScanTerminal(id));
        }
        entry.results.extend_from_slice(results);
        Ok(results.len())
    }

    async fn results(&self, id: ScanId) -> StoreResult<Vec<CheckResult>> {
        self.entries
            .read()
            .get(&id)
            .map(|entry| entry.results.clone())
            .ok_or(StoreError::ScanNotFound(id))
    }

    async fn counters(&self, id: ScanId) -> StoreResult<CheckCounters> {
        self.entries
            .read()
            .get(&id)
            .map(|entry| CheckCounters::from_results(&entry.results))
            .ok_or(StoreError::ScanNotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use vigil_model::{CheckId, CheckStatus, ScanStatus, ServiceGroup, TargetRef};

    fn scan() -> Scan {
        Scan::new(
            ScanId::new(),
            TargetRef {
                tenant_id: "tenant".into(),
                display_name: None,
            },
            "m365",
        )
    }

    fn result(scan_id: ScanId, id: &str, status: CheckStatus) -> CheckResult {
        CheckResult {
            scan_id,
            check_id: CheckId::new(id),
            status,
            category: ServiceGroup::Mail,
            tenant_id: "tenant".into(),
            start_time: Utc::now(),
            end_time: Utc::now(),
            duration: 0.0,
            details: Vec::new(),
            error: None,
            metadata: None,
        }
    }

    #[tokio::test]
    async fn counters_are_reconciled_from_persisted_results() {
        let store = InMemoryScanStore::new();
        let scan = scan();
        store.insert_scan(&scan).await.unwrap();
        store
            .append_results(
                scan.id,
                &[
                    result(scan.id, "a", CheckStatus::Pass),
                    result(scan.id, "b", CheckStatus::Error),
                ],
            )
            .await
            .unwrap();

        let counters = store.counters(scan.id).await.unwrap();
        assert_eq!(counters.completed, 2);
        assert_eq!(counters.passed, 1);
        assert_eq!(counters.errors, 1);
    }

    #[tokio::test]
    async fn terminal_scans_accept_no_more_writes() {
        let store = InMemoryScanStore::new();
        let mut scan = scan();
        store.insert_scan(&scan).await.unwrap();
        scan.status = ScanStatus::Cancelled;
        store.update_scan(&scan).await.unwrap();

        assert!(matches!(
            store
                .append_results(scan.id, &[result(scan.id, "late", CheckStatus::Pass)])
                .await,
            Err(StoreError::ScanTerminal(_))
        ));
        scan.status = ScanStatus::Completed;
        assert!(matches!(
            store.update_scan(&scan).await,
            Err(StoreError::ScanTerminal(_))
        ));
        assert!(store.results(scan.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn inserting_an_existing_id_keeps_the_first_record() {
        let store = InMemoryScanStore::new();
        let scan = scan();
        store.insert_scan(&scan).await.unwrap();
        store
            .append_results(scan.id, &[result(scan.id, "a", CheckStatus::Pass)])
            .await
            .unwrap();

        let mut replay = scan.clone();
        replay.technology = "azure".into();
        assert!(matches!(
            store.insert_scan(&replay).await,
            Err(StoreError::ScanExists(_))
        ));
        let stored = store.get_scan(scan.id).await.unwrap().unwrap();
        assert_eq!(stored.technology, "m365");
        assert_eq!(store.results(scan.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_scans_are_reported() {
        let store = InMemoryScanStore::new();
        let id = ScanId::new();
        assert!(store.get_scan(id).await.unwrap().is_none());
        assert!(matches!(
            store.results(id).await,
            Err(StoreError::ScanNotFound(_))
        ));
    }
}
