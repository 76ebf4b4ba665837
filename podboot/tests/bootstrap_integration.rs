//! End-to-end bootstrap runs against a temporary state directory.

use podboot::config::{DirectorySpec, StepConfig, StepKind};
use podboot::db::JournalStore;
use podboot::env::{ENVIRONMENT_PROFILE, PublishedEnvironment};
use podboot::pipeline::{Criticality, Phase};
use podboot::supervisor::{ReadinessCheck, RestartPolicy, ServiceDescriptor};
use podboot::{BootConfig, BootOutcome, BootStatus, Bootstrap, StatusReport};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

fn sh(script: &str) -> Vec<String> {
    vec!["/bin/sh".into(), "-c".into(), script.into()]
}

fn process_env() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("GITHUB_TOKEN".to_string(), "ghp_test".to_string()),
        ("UNRELATED_HOST_VAR".to_string(), "leak".to_string()),
    ])
}

fn base_config(root: &Path) -> BootConfig {
    BootConfig {
        state_dir: root.join("state"),
        home_dir: root.join("home"),
        base_path: "/usr/bin:/bin".into(),
        readiness_timeout_ms: 5_000,
        stop_timeout_ms: 1_000,
        steps: vec![
            StepConfig {
                name: "credentials".into(),
                phase: Phase::ENVIRONMENT,
                criticality: Criticality::Critical,
                kind: StepKind::Credentials {
                    required: vec![],
                    optional: vec!["GITHUB_TOKEN".into(), "BRAVE_API_KEY".into()],
                },
            },
            StepConfig {
                name: "home".into(),
                phase: Phase::ENVIRONMENT,
                criticality: Criticality::Critical,
                kind: StepKind::Directories {
                    paths: vec![DirectorySpec {
                        path: root.join("home/.local/bin"),
                        mode: 0o755,
                        on_path: true,
                    }],
                },
            },
            StepConfig {
                name: "browser_dependencies".into(),
                phase: Phase::PACKAGES,
                criticality: Criticality::BestEffort,
                kind: StepKind::Command {
                    creates: None,
                    binary: None,
                    check: Some(sh("exit 1")),
                    alternatives: vec![sh("exit 3")],
                    path: vec![],
                    env: BTreeMap::new(),
                    run_as_owner: false,
                },
            },
        ],
        services: vec![],
        ..BootConfig::default()
    }
}

fn env_dump_service(root: &Path) -> ServiceDescriptor {
    let mut service = ServiceDescriptor::new(
        "envdump",
        sh(&format!(
            "env > {0}/service.env; touch {0}/ready; exec sleep 30",
            root.display()
        )),
    );
    service.restart = RestartPolicy::OnFailure;
    service.readiness = ReadinessCheck::Path {
        path: root.join("ready"),
    };
    service.depends_on = vec!["home".into(), "browser_dependencies".into()];
    service
}

#[tokio::test]
async fn test_run_reaches_ready_with_snapshot_only_environment() {
    let dir = TempDir::new().unwrap();
    let mut config = base_config(dir.path());
    config.services = vec![env_dump_service(dir.path())];
    let state_dir = config.state_dir.clone();

    let outcome = Bootstrap::new(config, process_env())
        .run(tokio::time::sleep(Duration::from_secs(2)))
        .await
        .unwrap();

    assert!(matches!(outcome, BootOutcome::Ready), "{outcome:?}");
    assert_eq!(outcome.exit_code(), 0);

    let report = StatusReport::load(&state_dir).unwrap();
    assert_eq!(report.status, BootStatus::Ready);
    assert!(report.healthy);

    let service_env = std::fs::read_to_string(dir.path().join("service.env")).unwrap();
    assert!(service_env.contains("GITHUB_TOKEN=ghp_test"));
    assert!(!service_env.contains("UNRELATED_HOST_VAR"));
    assert!(service_env.contains(&format!(
        "PATH={}",
        dir.path().join("home/.local/bin").display()
    )));
}

#[tokio::test]
async fn test_critical_failure_starts_no_services() {
    let dir = TempDir::new().unwrap();
    let mut config = base_config(dir.path());
    config.steps[0].kind = StepKind::Credentials {
        required: vec!["ANTHROPIC_API_KEY".into()],
        optional: vec![],
    };
    config.services = vec![env_dump_service(dir.path())];
    let state_dir = config.state_dir.clone();

    let outcome = Bootstrap::new(config, process_env())
        .run(std::future::pending())
        .await
        .unwrap();

    assert!(matches!(outcome, BootOutcome::Failed(_)));
    assert_eq!(outcome.exit_code(), 2);
    assert!(!dir.path().join("service.env").exists());

    let report = StatusReport::load(&state_dir).unwrap();
    assert_eq!(report.status, BootStatus::Failed);
    assert!(report.failure.unwrap().contains("ANTHROPIC_API_KEY"));
}

#[tokio::test]
async fn test_readiness_timeout_marks_unhealthy() {
    let dir = TempDir::new().unwrap();
    let mut config = base_config(dir.path());
    config.readiness_timeout_ms = 300;
    let mut service = ServiceDescriptor::new("idle", sh("exec sleep 30"));
    service.readiness = ReadinessCheck::Tcp {
        host: "127.0.0.1".into(),
        port: 1,
    };
    config.services = vec![service];
    let state_dir = config.state_dir.clone();

    let outcome = Bootstrap::new(config, process_env())
        .run(tokio::time::sleep(Duration::from_secs(1)))
        .await
        .unwrap();

    assert!(matches!(outcome, BootOutcome::NotReady(_)));
    assert_eq!(outcome.exit_code(), 3);

    let report = StatusReport::load(&state_dir).unwrap();
    assert_eq!(report.status, BootStatus::StartingServices);
    assert!(!report.healthy);
}

#[tokio::test]
async fn test_repeated_init_is_observably_idempotent() {
    let dir = TempDir::new().unwrap();
    let config = base_config(dir.path());
    let state_dir = config.state_dir.clone();
    let journal_path = config.journal_path();

    let first = Bootstrap::new(config.clone(), process_env())
        .init_only(std::future::pending())
        .await
        .unwrap();
    assert!(matches!(first, BootOutcome::Initialized));

    let profile = state_dir.join(ENVIRONMENT_PROFILE);
    let before = std::fs::metadata(&profile).unwrap().modified().unwrap();
    let published = PublishedEnvironment::load_from_dir(&state_dir).unwrap();

    let second = Bootstrap::new(config, process_env())
        .init_only(std::future::pending())
        .await
        .unwrap();
    assert!(matches!(second, BootOutcome::Initialized));

    assert_eq!(std::fs::metadata(&profile).unwrap().modified().unwrap(), before);
    assert_eq!(
        PublishedEnvironment::load_from_dir(&state_dir).unwrap(),
        published
    );

    let journal = JournalStore::open(&journal_path).unwrap();
    let completed = journal.completed_steps().unwrap();
    assert!(completed.contains("home"));
    assert!(!completed.contains("browser_dependencies"));
}

#[tokio::test]
async fn test_signal_during_init_abandons_step() {
    let dir = TempDir::new().unwrap();
    let mut config = base_config(dir.path());
    config.steps.push(StepConfig {
        name: "slow".into(),
        phase: Phase::PACKAGES,
        criticality: Criticality::Critical,
        kind: StepKind::Command {
            creates: Some(dir.path().join("never")),
            binary: None,
            check: None,
            alternatives: vec![sh("sleep 30")],
            path: vec![],
            env: BTreeMap::new(),
            run_as_owner: false,
        },
    });

    let started = std::time::Instant::now();
    let outcome = Bootstrap::new(config, process_env())
        .run(tokio::time::sleep(Duration::from_millis(500)))
        .await
        .unwrap();

    assert!(matches!(outcome, BootOutcome::Interrupted));
    assert!(started.elapsed() < Duration::from_secs(10));
}
