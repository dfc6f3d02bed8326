#![allow(dead_code)]

use std::{collections::HashMap, fs, path::Path, sync::Arc, time::Duration};

use anyhow::{Result, anyhow};
use axum_test::TestServer;
use serde_json::{Value, json};
use tempfile::TempDir;
use vigil_core::{
    BatchRunner, CheckRegistry, InMemoryScanStore, InProcessBoundary, ScanManager,
    ScriptCheckRunner,
    executor::{Interpreter, StaticSessionProvider},
};
use vigil_server::{AppState, create_app};

pub const TECHNOLOGY: &str = "m365";

pub const PASS: &str = r#"echo '{"status": "Pass"}'"#;
pub const FAIL: &str = r#"echo '{"status": "Fail", "details": [{"setting": "disabled"}]}'"#;

/// Shell check units under `<tmp>/m365/`. The leading comment carries the
/// call pattern the classifier keys on.
#[derive(Debug)]
pub struct ShellChecks {
    dir: TempDir,
}

impl ShellChecks {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        fs::create_dir_all(dir.path().join(TECHNOLOGY))?;
        Ok(Self { dir })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn add(&self, name: &str, marker: &str, body: &str) -> Result<()> {
        let source = format!("#!/bin/sh\n# {marker}\n{body}\n");
        fs::write(
            self.dir.path().join(TECHNOLOGY).join(format!("{name}.sh")),
            source,
        )?;
        Ok(())
    }

    /// One mail, one directory and one platform check.
    pub fn three_groups() -> Result<Self> {
        let checks = Self::new()?;
        checks.add("p1", "Get-SPOTenant", PASS)?;
        checks.add("m1", "Get-Mailbox", FAIL)?;
        checks.add("d1", "Get-MgUser", PASS)?;
        Ok(checks)
    }
}

pub fn shell_runner() -> ScriptCheckRunner {
    let interpreters = HashMap::from([("sh".to_string(), Interpreter::new("sh", &[]))]);
    ScriptCheckRunner::new(interpreters, Duration::from_secs(20))
}

pub fn scan_manager(checks: &ShellChecks) -> ScanManager {
    let runner = BatchRunner::new(
        Arc::new(StaticSessionProvider::new("offline-token")),
        Arc::new(shell_runner()),
    );
    let boundary = Arc::new(InProcessBoundary::new(runner, Duration::from_secs(30)));
    let registry = CheckRegistry::new(checks.root()).with_extensions(["sh"]);
    ScanManager::builder(registry, boundary, Arc::new(InMemoryScanStore::new())).build()
}

pub fn test_server(checks: &ShellChecks) -> Result<TestServer> {
    let state = AppState::new(scan_manager(checks), 50);
    TestServer::new(create_app(state)).map_err(|err| anyhow!(err.to_string()))
}

pub fn scan_body(technology: &str) -> Value {
    json!({
        "technology": technology,
        "credentials": {
            "tenant_id": "tenant-a",
            "client_id": "client-a",
            "organization": "contoso.example",
            "display_name": "Contoso"
        }
    })
}

/// Poll the snapshot endpoint until the scan is terminal.
pub async fn wait_terminal(server: &TestServer, scan_id: &str) -> Result<Value> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    loop {
        let scan: Value = server
            .get(&format!("/api/v1/scans/{scan_id}"))
            .await
            .json();
        if matches!(
            scan["status"].as_str(),
            Some("completed" | "failed" | "cancelled")
        ) {
            return Ok(scan);
        }
        if tokio::time::Instant::now() > deadline {
            return Err(anyhow!("scan {scan_id} did not finish: {scan}"));
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
