use nettune_agent::{AgentConfig, AgentServices, AutoRollbackOutcome, NetTuneAgent};
use nettune_apply::{ApplyState, HostLock, InMemoryCheckpointStore};
use nettune_bench::Decision;
use nettune_common::testing::ScriptedExecutor;
use nettune_common::{AuditAction, AuditFilter, CommandOutput, MemoryAuditLog, WorkloadProfile};
use nettune_policy::CardRegistry;
use std::path::PathBuf;
use std::sync::Arc;

const STEADY_PING: &str = "64 bytes from 8.8.8.8: icmp_seq=1 ttl=117 time=10.0 ms\n\
                           64 bytes from 8.8.8.8: icmp_seq=2 ttl=117 time=30.0 ms\n\
                           2 packets transmitted, 2 received, 0% packet loss, time 1001ms\n";

const SLOWER_PING: &str = "64 bytes from 8.8.8.8: icmp_seq=1 ttl=117 time=40.0 ms\n\
                           64 bytes from 8.8.8.8: icmp_seq=2 ttl=117 time=80.0 ms\n\
                           2 packets transmitted, 2 received, 0% packet loss, time 1001ms\n";

const FASTER_PING: &str = "64 bytes from 8.8.8.8: icmp_seq=1 ttl=117 time=19.0 ms\n\
                           64 bytes from 8.8.8.8: icmp_seq=2 ttl=117 time=19.0 ms\n\
                           2 packets transmitted, 2 received, 0% packet loss, time 1001ms\n";

fn cards_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../cards")
}

struct Harness {
    exec: Arc<ScriptedExecutor>,
    audit: Arc<MemoryAuditLog>,
    agent: NetTuneAgent,
    _dir: tempfile::TempDir,
}

/// A host at somaxconn=128 that reports 4096 once the first snapshot is taken
fn harness(after_ping: &str) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let exec = Arc::new(ScriptedExecutor::new());
    exec.on_once(&["sysctl", "-a"], CommandOutput::success("net.core.somaxconn = 128\n"));
    exec.on(&["sysctl", "-a"], CommandOutput::success("net.core.somaxconn = 4096\n"));
    exec.on(
        &["ip", "-j", "link", "show"],
        CommandOutput::success(r#"[{"ifname":"eth0","mtu":1500}]"#),
    );
    exec.on_once(&["ping"], CommandOutput::success(STEADY_PING));
    exec.on_once(&["ping"], CommandOutput::success(after_ping));

    let mut config = AgentConfig::with_state_dir(dir.path());
    config.benchmark.samples = 1;
    let audit = Arc::new(MemoryAuditLog::new());
    let services = AgentServices {
        executor: exec.clone(),
        audit: audit.clone(),
        store: Arc::new(InMemoryCheckpointStore::new()),
        cards: Some(CardRegistry::load_dir(&cards_dir()).unwrap()),
        lock: Arc::new(HostLock::in_process()),
    };
    Harness { exec, audit, agent: NetTuneAgent::with_services(config, services), _dir: dir }
}

fn plan() -> serde_json::Value {
    serde_json::json!({
        "iface": "eth0",
        "profile": "gaming",
        "changes": { "sysctl": { "net.core.somaxconn": 4096 } }
    })
}

#[tokio::test]
async fn test_regression_is_rolled_back_end_to_end() {
    let h = harness(SLOWER_PING);

    let report = h.agent.validate_change_plan(&plan());
    assert!(report.ok, "{:?}", report.issues);
    let rendered = h.agent.render_change_plan(&plan()).rendered.unwrap();

    let before = h.agent.test_network_performance(WorkloadProfile::Gaming, None).await.unwrap();
    let change = h.agent.apply_rendered_plan(&rendered, false).await;
    assert_eq!(change.state, ApplyState::Applied, "{:?}", change.errors);
    assert_eq!(h.exec.count(&["sysctl", "-w", "net.core.somaxconn=4096"]), 1);
    let checkpoint_id = change.checkpoint_id.clone().unwrap();

    let after = h.agent.test_network_performance(WorkloadProfile::Gaming, None).await.unwrap();
    let outcome = h
        .agent
        .auto_validate_and_rollback(&before, &after, WorkloadProfile::Gaming, &checkpoint_id, true)
        .await;

    assert_eq!(outcome.decision.decision, Decision::Rollback);
    assert_eq!(outcome.outcome, AutoRollbackOutcome::RolledBack);
    assert_eq!(h.exec.count(&["sysctl", "-w", "net.core.somaxconn=128"]), 1);

    let filter = AuditFilter { checkpoint_id: Some(checkpoint_id), ..Default::default() };
    let actions: Vec<_> = h.agent.search_audit_log(&filter).iter().map(|e| e.action).collect();
    assert_eq!(actions.first(), Some(&AuditAction::CreateCheckpoint));
    assert!(actions.contains(&AuditAction::ApplyPlan));
    assert!(actions.contains(&AuditAction::Rollback));
    assert_eq!(actions.last(), Some(&AuditAction::AutoRollback));
}

#[tokio::test]
async fn test_improvement_is_kept_end_to_end() {
    let h = harness(FASTER_PING);
    let rendered = h.agent.render_change_plan(&plan()).rendered.unwrap();

    let before = h.agent.test_network_performance(WorkloadProfile::Gaming, None).await.unwrap();
    let change = h.agent.apply_rendered_plan(&rendered, false).await;
    let after = h.agent.test_network_performance(WorkloadProfile::Gaming, None).await.unwrap();

    let checkpoint_id = change.checkpoint_id.unwrap();
    let outcome = h
        .agent
        .auto_validate_and_rollback(&before, &after, WorkloadProfile::Gaming, &checkpoint_id, true)
        .await;
    assert_eq!(outcome.outcome, AutoRollbackOutcome::Kept);
    assert_eq!(h.exec.count(&["sysctl", "-w", "net.core.somaxconn=128"]), 0);
    assert_eq!(h.agent.list_checkpoints().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_rollback_to_unknown_checkpoint_fails() {
    let h = harness(SLOWER_PING);
    let before = h.agent.test_network_performance(WorkloadProfile::Gaming, None).await.unwrap();
    let after = h.agent.test_network_performance(WorkloadProfile::Gaming, None).await.unwrap();

    let outcome = h
        .agent
        .auto_validate_and_rollback(&before, &after, WorkloadProfile::Gaming, "ckpt-missing", true)
        .await;
    assert_eq!(outcome.outcome, AutoRollbackOutcome::RollbackFailed);
    let entries = h.audit.entries();
    let last = entries.last().unwrap();
    assert_eq!(last.action, AuditAction::AutoRollback);
    assert!(!last.success);
}

#[tokio::test]
async fn test_policy_card_rejects_plan() {
    let h = harness(STEADY_PING);
    let plan = serde_json::json!({
        "iface": "eth0",
        "profile": "throughput",
        "changes": { "sysctl": { "net.ipv4.tcp_congestion_control": "vegas" } }
    });
    let response = h.agent.render_change_plan(&plan);
    assert!(!response.ok);
    assert!(response.rendered.is_none());
    assert!(h.exec.calls().is_empty());
}

#[test]
fn test_agent_from_config_loads_cards() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AgentConfig::with_state_dir(dir.path());
    config.cards_dir = Some(cards_dir());

    let agent = NetTuneAgent::from_config(config).unwrap();
    let cards = agent.list_config_cards();
    assert!(cards.iter().any(|c| c.id == "net.core.somaxconn"));
    assert!(agent.get_config_card("net.ipv4.tcp_congestion_control").is_ok());
}
