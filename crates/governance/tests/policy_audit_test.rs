//! Integration tests for the capability policy, enforcer and file audit log.

use std::sync::Arc;

use agent_relay_core::{Operation, OperationGate};
use agent_relay_governance::{
    AuditFilter, AuditOutcome, AuditStore, CapabilityEnforcer, CapabilityPolicy, FileAuditStore,
};

const POLICY: &str = r#"
version: "7"
bots:
  - id: helper
    persona: "You are Helper."
    operations: [read-file, delegate, write-file, execute-shell]
  - id: reader
    operations: [read-file]
"#;

#[tokio::test]
async fn test_load_drops_and_denials_land_in_audit_log() {
    let dir = tempfile::tempdir().unwrap();
    let audit = Arc::new(FileAuditStore::new(dir.path().join("logs/audit.jsonl")));
    let policy = CapabilityPolicy::from_yaml(POLICY).unwrap();

    assert_eq!(policy.record_drops(audit.as_ref()).await.unwrap(), 1);

    let enforcer = CapabilityEnforcer::new(audit.clone());
    let reader = policy.allowed_operations("reader").unwrap();
    assert!(enforcer
        .authorize("reader", &reader, Operation::ReadFile)
        .await
        .is_ok());
    assert!(enforcer
        .authorize("reader", &reader, Operation::Delegate)
        .await
        .is_err());

    let all = audit.query(AuditFilter::default()).await.unwrap();
    assert_eq!(all.len(), 2);
    assert!(all.iter().all(|e| e.outcome == AuditOutcome::Denied));

    let load = audit
        .query(AuditFilter {
            action: Some("policy_load".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(load.len(), 1);
    assert_eq!(load[0].actor, "helper");
    let metadata = load[0].metadata.as_ref().unwrap();
    assert_eq!(metadata["dropped"], serde_json::json!(["write-file", "execute-shell"]));
    assert_eq!(metadata["policy_version"], "7");

    let denied = audit
        .query(AuditFilter {
            actor: Some("reader".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(denied.len(), 1);
    assert_eq!(denied[0].resource, "delegate");
}

#[tokio::test]
async fn test_directive_reflects_computed_profile() {
    let policy = CapabilityPolicy::from_yaml(POLICY).unwrap();
    let helper = policy.allowed_operations("helper").unwrap();

    let directive = policy.directive("helper", &helper);
    assert!(directive.starts_with("You are Helper."));
    assert!(directive.contains("read-file, delegate"));
    assert!(!directive.contains("execute-shell."));
    assert!(directive.contains("human operator"));
}
