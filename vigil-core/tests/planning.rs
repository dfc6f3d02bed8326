mod support;

use std::collections::HashSet;

use anyhow::Result;
use support::{CheckTree, credentials};
use vigil_core::{
    AmbiguityPolicy, BatchPlanner, DependencyClassifier, RegistryQuery,
    planner::UNSUPPORTED_CHECK,
};
use vigil_model::{ServiceGroup, Severity};

fn mixed_tree() -> Result<CheckTree> {
    let tree = CheckTree::new()?;
    for i in 0..4 {
        tree.add(&format!("mail-{i}"), "Get-Mailbox -ResultSize Unlimited")?;
    }
    for i in 0..3 {
        tree.add(&format!("dir-{i}"), "Get-MgDirectorySetting")?;
    }
    for i in 0..3 {
        tree.add(&format!("misc-{i}"), "Write-Output 'no service call'")?;
    }
    Ok(tree)
}

#[test]
fn mixed_tree_plans_three_batches_in_group_order() -> Result<()> {
    let tree = mixed_tree()?;
    let loaded = tree.registry().load(&RegistryQuery::new("m365"))?;
    let plan = BatchPlanner::default().plan(&loaded.checks, &credentials());

    assert_eq!(
        plan.batch_sizes(),
        vec![
            (ServiceGroup::Mail, 4),
            (ServiceGroup::Directory, 3),
            (ServiceGroup::Platform, 3),
        ]
    );

    let mut seen = HashSet::new();
    for batch in &plan.batches {
        for id in batch.check_ids() {
            assert!(seen.insert(id.clone()), "{id} planned twice");
        }
    }
    assert_eq!(seen.len(), loaded.checks.len());
    Ok(())
}

#[test]
fn ambiguous_check_lands_once_with_a_warning() -> Result<()> {
    let tree = mixed_tree()?;
    tree.add("both", "Get-Mailbox; Get-MgUser")?;
    let loaded = tree.registry().load(&RegistryQuery::new("m365"))?;
    let plan = BatchPlanner::default().plan(&loaded.checks, &credentials());

    let holders: Vec<_> = plan
        .batches
        .iter()
        .filter(|batch| batch.check_ids().any(|id| id.as_str() == "both"))
        .map(|batch| batch.group)
        .collect();
    assert_eq!(holders, vec![ServiceGroup::Mail]);
    assert_eq!(plan.warnings.len(), 1);
    assert_eq!(plan.warnings[0].check_id.as_str(), "both");
    assert_eq!(
        plan.warnings[0].matched,
        vec![ServiceGroup::Mail, ServiceGroup::Directory]
    );
    Ok(())
}

#[test]
fn reject_policy_marks_ambiguous_checks_unsupported() -> Result<()> {
    let tree = mixed_tree()?;
    tree.add("both", "Get-Mailbox; Get-MgUser")?;
    let loaded = tree.registry().load(&RegistryQuery::new("m365"))?;
    let planner = BatchPlanner::new(DependencyClassifier::new(), AmbiguityPolicy::Reject);
    let plan = planner.plan(&loaded.checks, &credentials());

    let rejected: Vec<_> = plan
        .batches
        .iter()
        .flat_map(|batch| batch.checks.iter())
        .filter(|check| check.rejection.is_some())
        .collect();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].id.as_str(), "both");
    assert_eq!(rejected[0].rejection.as_deref(), Some(UNSUPPORTED_CHECK));
    assert_eq!(plan.total_checks(), 11);
    Ok(())
}

#[test]
fn declared_services_override_markers_and_severity_filters() -> Result<()> {
    let tree = CheckTree::new()?;
    tree.add(
        "tagged",
        r#"# vigil:metadata:begin
# {"id": "1.1.1", "severity": "high", "services": ["compliance"]}
# vigil:metadata:end
Get-Mailbox"#,
    )?;
    tree.add(
        "low",
        r#"# vigil:metadata:begin
# {"id": "1.1.2", "severity": "low"}
# vigil:metadata:end
Get-MgUser"#,
    )?;
    tree.add("untagged", "Get-MgUser")?;

    let loaded = tree
        .registry()
        .load(&RegistryQuery::new("m365").with_min_severity(Severity::Medium))?;
    let ids: Vec<_> = loaded.checks.iter().map(|c| c.id.as_str()).collect();
    // Sorted by path: tagged.ps1, untagged.ps1; low is filtered out.
    assert_eq!(ids, ["1.1.1", "untagged"]);

    let plan = BatchPlanner::default().plan(&loaded.checks, &credentials());
    assert_eq!(
        plan.batch_sizes(),
        vec![(ServiceGroup::Directory, 1), (ServiceGroup::Compliance, 1)]
    );
    // Declared tags win over the mail marker in the source text.
    assert!(plan.warnings.is_empty());
    Ok(())
}
