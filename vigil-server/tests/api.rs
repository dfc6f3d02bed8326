mod support;

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::{Value, json};
use support::{PASS, ShellChecks, TECHNOLOGY, scan_body, test_server, wait_terminal};
use uuid::Uuid;

#[tokio::test]
async fn health_reports_ok() -> Result<()> {
    let checks = ShellChecks::new()?;
    let server = test_server(&checks)?;

    let body: Value = server.get("/health").await.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["active_scans"], 0);
    Ok(())
}

#[tokio::test]
async fn scan_runs_to_completion_in_group_order() -> Result<()> {
    let checks = ShellChecks::three_groups()?;
    let server = test_server(&checks)?;

    let response = server.post("/api/v1/scans").json(&scan_body(TECHNOLOGY)).await;
    response.assert_status(StatusCode::ACCEPTED);
    let accepted: Value = response.json();
    assert_eq!(accepted["status"], "pending");
    let scan_id = accepted["scan_id"].as_str().unwrap_or_default().to_string();

    let scan = wait_terminal(&server, &scan_id).await?;
    assert_eq!(scan["status"], "completed");
    assert_eq!(scan["total_checks"], 3);
    assert_eq!(scan["passed"], 2);
    assert_eq!(scan["failed"], 1);
    assert_eq!(scan["progress_percentage"], 100);
    assert_eq!(scan["target"]["display_name"], "Contoso");

    let results: Value = server
        .get(&format!("/api/v1/scans/{scan_id}/results"))
        .await
        .json();
    assert_eq!(results["count"], 3);
    let order: Vec<_> = results["results"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .map(|item| item["CheckId"].as_str().unwrap_or_default().to_string())
                .collect()
        })
        .unwrap_or_default();
    assert_eq!(order, ["m1", "d1", "p1"]);
    assert_eq!(results["results"][0]["Category"], "mail-service");
    assert_eq!(results["results"][0]["Status"], "Fail");
    assert_eq!(results["results"][0]["Details"][0]["setting"], "disabled");

    let listing: Value = server.get("/api/v1/scans").await.json();
    assert_eq!(listing["count"], 1);
    assert_eq!(listing["scans"][0]["id"], scan_id.as_str());
    Ok(())
}

#[tokio::test]
async fn invalid_requests_are_rejected_with_error_bodies() -> Result<()> {
    let checks = ShellChecks::three_groups()?;
    let server = test_server(&checks)?;

    let response = server.post("/api/v1/scans").json(&scan_body("  ")).await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(
        body,
        json!({ "error": { "message": "technology_required", "status": 400 } })
    );

    let response = server
        .get(&format!("/api/v1/scans/{}", Uuid::now_v7()))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(response.json::<Value>()["error"]["message"], "scan_not_found");

    let response = server
        .get(&format!("/api/v1/scans/{}/results", Uuid::now_v7()))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn duplicate_scan_ids_conflict() -> Result<()> {
    let checks = ShellChecks::three_groups()?;
    let server = test_server(&checks)?;
    let scan_id = Uuid::now_v7().to_string();

    let mut body = scan_body(TECHNOLOGY);
    body["scan_id"] = json!(scan_id);
    server
        .post("/api/v1/scans")
        .json(&body)
        .await
        .assert_status(StatusCode::ACCEPTED);

    let response = server.post("/api/v1/scans").json(&body).await;
    response.assert_status(StatusCode::CONFLICT);
    assert_eq!(response.json::<Value>()["error"]["message"], "scan_already_exists");

    wait_terminal(&server, &scan_id).await?;
    Ok(())
}

#[tokio::test]
async fn missing_technology_directory_fails_the_scan() -> Result<()> {
    let checks = ShellChecks::three_groups()?;
    let server = test_server(&checks)?;

    let accepted: Value = server
        .post("/api/v1/scans")
        .json(&scan_body("azure"))
        .await
        .json();
    let scan_id = accepted["scan_id"].as_str().unwrap_or_default().to_string();

    let scan = wait_terminal(&server, &scan_id).await?;
    assert_eq!(scan["status"], "failed");
    assert!(scan["error_message"].as_str().is_some());
    Ok(())
}

#[tokio::test]
async fn cancelling_a_running_scan_then_a_finished_one() -> Result<()> {
    let checks = ShellChecks::new()?;
    checks.add("m1", "Get-Mailbox", PASS)?;
    checks.add("d1", "Get-MgUser", &format!("sleep 15\n{PASS}"))?;
    checks.add("p1", "Get-SPOTenant", PASS)?;
    let server = test_server(&checks)?;

    let accepted: Value = server
        .post("/api/v1/scans")
        .json(&scan_body(TECHNOLOGY))
        .await
        .json();
    let scan_id = accepted["scan_id"].as_str().unwrap_or_default().to_string();

    // Wait until the slow directory check is in flight.
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(10);
    loop {
        let scan: Value = server.get(&format!("/api/v1/scans/{scan_id}")).await.json();
        if scan["current_check"] == "d1" {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "d1 never started: {scan}");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    server
        .post(&format!("/api/v1/scans/{scan_id}/cancel"))
        .await
        .assert_status(StatusCode::ACCEPTED);

    let scan = wait_terminal(&server, &scan_id).await?;
    assert_eq!(scan["status"], "cancelled");

    let results: Value = server
        .get(&format!("/api/v1/scans/{scan_id}/results"))
        .await
        .json();
    assert_eq!(results["count"], 1);
    assert_eq!(results["results"][0]["CheckId"], "m1");

    let response = server
        .post(&format!("/api/v1/scans/{scan_id}/cancel"))
        .await;
    response.assert_status(StatusCode::GONE);
    assert_eq!(response.json::<Value>()["error"]["message"], "scan_already_terminal");
    Ok(())
}

#[tokio::test]
async fn check_listing_shows_batch_assignment() -> Result<()> {
    let checks = ShellChecks::three_groups()?;
    checks.add("x1", "Get-Mailbox | Get-MgUser", PASS)?;
    let server = test_server(&checks)?;

    let listing: Value = server.get("/api/v1/checks/m365").await.json();
    assert_eq!(listing["total"], 4);
    let batches: Vec<(String, u64)> = listing["batches"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .map(|b| {
                    (
                        b["group"].as_str().unwrap_or_default().to_string(),
                        b["checks"].as_u64().unwrap_or_default(),
                    )
                })
                .collect()
        })
        .unwrap_or_default();
    assert_eq!(
        batches,
        [
            ("mail-service".to_string(), 2),
            ("directory-service".to_string(), 1),
            ("platform-service".to_string(), 1),
        ]
    );
    let warnings = listing["warnings"].as_array().cloned().unwrap_or_default();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].as_str().unwrap_or_default().contains("x1"));

    let filtered: Value = server
        .get("/api/v1/checks/m365")
        .add_query_param("ids", "d1,p1")
        .await
        .json();
    assert_eq!(filtered["total"], 2);

    server
        .get("/api/v1/checks/azure")
        .await
        .assert_status(StatusCode::NOT_FOUND);
    Ok(())
}
