mod support;

use anyhow::Result;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use serde_json::Value;
use support::{FAIL, PASS, ShellChecks, TECHNOLOGY, scan_body, test_server, wait_terminal};
use uuid::Uuid;

fn slow_checks() -> Result<ShellChecks> {
    let checks = ShellChecks::new()?;
    checks.add("m1", "Get-Mailbox", FAIL)?;
    checks.add("d1", "Get-MgUser", &format!("sleep 1\n{PASS}"))?;
    checks.add("p1", "Get-SPOTenant", PASS)?;
    Ok(checks)
}

fn event_names(body: &str) -> Vec<&str> {
    body.lines()
        .filter_map(|line| line.strip_prefix("event: "))
        .collect()
}

#[tokio::test]
async fn live_stream_starts_with_snapshot_and_ends_on_terminal_status() -> Result<()> {
    let checks = slow_checks()?;
    let server = test_server(&checks)?;

    let accepted: Value = server
        .post("/api/v1/scans")
        .json(&scan_body(TECHNOLOGY))
        .await
        .json();
    let scan_id = accepted["scan_id"].as_str().unwrap_or_default().to_string();

    let response = server.get(&format!("/api/v1/scans/{scan_id}/events")).await;
    response.assert_status_success();
    let body = response.text();
    let names = event_names(&body);

    assert_eq!(names.first().copied(), Some("snapshot"));
    assert!(names.contains(&"scan-started"));
    assert_eq!(
        names.iter().filter(|name| **name == "batch-completed").count(),
        3
    );
    assert_eq!(names.last().copied(), Some("status"));
    let last_data = body
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .last()
        .unwrap_or_default();
    let last: Value = serde_json::from_str(last_data)?;
    assert_eq!(last["status"], "completed");
    assert_eq!(last["progress_percentage"], 100);
    Ok(())
}

#[tokio::test]
async fn resume_skips_events_up_to_last_event_id() -> Result<()> {
    let checks = slow_checks()?;
    let server = test_server(&checks)?;

    let accepted: Value = server
        .post("/api/v1/scans")
        .json(&scan_body(TECHNOLOGY))
        .await
        .json();
    let scan_id = accepted["scan_id"].as_str().unwrap_or_default().to_string();

    let response = server
        .get(&format!("/api/v1/scans/{scan_id}/events"))
        .add_header(
            HeaderName::from_static("last-event-id"),
            HeaderValue::from_static("1"),
        )
        .await;
    response.assert_status_success();
    let body = response.text();

    assert!(body.starts_with("event: snapshot"), "snapshot must lead: {body}");
    assert!(!body.contains("\nid: 1\n"), "resume stream repeated skipped id");
    assert!(body.contains("\nid: 2\n"), "resume stream missed the next event");
    Ok(())
}

#[tokio::test]
async fn finished_scan_streams_only_its_snapshot() -> Result<()> {
    let checks = ShellChecks::new()?;
    checks.add("m1", "Get-Mailbox", PASS)?;
    let server = test_server(&checks)?;

    let accepted: Value = server
        .post("/api/v1/scans")
        .json(&scan_body(TECHNOLOGY))
        .await
        .json();
    let scan_id = accepted["scan_id"].as_str().unwrap_or_default().to_string();
    wait_terminal(&server, &scan_id).await?;

    let body = server
        .get(&format!("/api/v1/scans/{scan_id}/events"))
        .await
        .text();
    assert_eq!(event_names(&body), ["snapshot"]);
    assert!(body.contains("\"status\":\"completed\""));
    Ok(())
}

#[tokio::test]
async fn unknown_scan_has_no_stream() -> Result<()> {
    let checks = ShellChecks::new()?;
    let server = test_server(&checks)?;

    server
        .get(&format!("/api/v1/scans/{}/events", Uuid::now_v7()))
        .await
        .assert_status(StatusCode::NOT_FOUND);
    Ok(())
}
