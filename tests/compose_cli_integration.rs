//! ---
//! dcu_section: "15-testing"
//! dcu_subsection: "integration-tests"
//! dcu_type: "source"
//! dcu_scope: "code"
//! dcu_description: "Update runs through the compose driver against a scripted docker binary."
//! dcu_version: "v0.0.0-prealpha"
//! dcu_owner: "tbd"
//! ---
#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use dcu_common::config::ComposeConfig;
use dcu_core::{RestartStep, StalenessVerdict, UpdateAction, UpdateError, Updater};
use dcu_runtime::{ComposeCli, ImageIdentity, ServiceManifest, ServiceName};
use tempfile::TempDir;

/// Answers the handful of docker commands the driver issues. `web` runs an old
/// image; pulling swaps in a listing where `myapp/web:latest` points elsewhere.
const FAKE_DOCKER: &str = r#"#!/bin/sh
here="$(cd "$(dirname "$0")" && pwd)"
echo "$*" >> "$here/calls.log"
case "$1" in
  version)
    if [ -f "$here/daemon-down" ]; then
      echo "Cannot connect to the Docker daemon at unix:///var/run/docker.sock." >&2
      exit 1
    fi
    echo "24.0.7"
    ;;
  image)
    cat "$here/images.jsonl"
    ;;
  container)
    echo '[{"Id":"c0ffee","Image":"sha256:aaa111","Config":{"Image":"myapp/web:latest"}}]'
    ;;
  compose)
    shift 3
    case "$1" in
      config)
        echo '{"name":"shop","services":{"web":{"image":"myapp/web:latest"},"db":{"image":"postgres:16"}}}'
        ;;
      ps)
        if [ "$3" = "web" ]; then echo c0ffee; fi
        ;;
      pull)
        cp "$here/images.after.jsonl" "$here/images.jsonl"
        ;;
      stop)
        if [ -f "$here/fail-stop" ]; then echo "stop refused" >&2; exit 1; fi
        ;;
      rm|up)
        ;;
      *)
        echo "unexpected compose command: $*" >&2
        exit 3
        ;;
    esac
    ;;
  *)
    echo "unexpected command: $*" >&2
    exit 3
    ;;
esac
"#;

const IMAGES_BEFORE: &str = r#"{"ID":"sha256:aaa111","Repository":"myapp/web","Tag":"latest"}
{"ID":"sha256:ddd444","Repository":"postgres","Tag":"16"}
"#;

const IMAGES_AFTER: &str = r#"{"ID":"sha256:bbb222","Repository":"myapp/web","Tag":"latest"}
{"ID":"sha256:aaa111","Repository":"<none>","Tag":"<none>"}
{"ID":"sha256:ddd444","Repository":"postgres","Tag":"16"}
"#;

/// One scenario at a time: a fork elsewhere must not hold a freshly written script open.
static SERIAL: Mutex<()> = Mutex::new(());

struct Sandbox {
    dir: TempDir,
    _serial: MutexGuard<'static, ()>,
}

impl Sandbox {
    fn new() -> Self {
        let serial = SERIAL.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let dir = tempfile::tempdir().expect("tempdir");
        let script = dir.path().join("docker");
        fs::write(&script, FAKE_DOCKER).expect("write fake docker");
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).expect("chmod");
        fs::write(dir.path().join("images.jsonl"), IMAGES_BEFORE).expect("images");
        fs::write(dir.path().join("images.after.jsonl"), IMAGES_AFTER).expect("images");
        fs::write(dir.path().join("docker-compose.yml"), "services: {}\n").expect("compose file");
        Self {
            dir,
            _serial: serial,
        }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn flag(&self, name: &str) {
        fs::write(self.path().join(name), "").expect("flag file");
    }

    fn driver(&self) -> Arc<ComposeCli> {
        let config = ComposeConfig {
            file: self.path().join("docker-compose.yml"),
            docker_binary: self.path().join("docker").display().to_string(),
            command_timeout: None,
        };
        Arc::new(ComposeCli::from_config(&config).expect("driver"))
    }

    fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.log_path())
            .unwrap_or_default()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    fn log_path(&self) -> PathBuf {
        self.path().join("calls.log")
    }
}

fn names(raw: &[&str]) -> Vec<ServiceName> {
    raw.iter().map(|name| ServiceName::from(*name)).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stale_service_is_recreated_through_compose() {
    let sandbox = Sandbox::new();
    let driver = sandbox.driver();

    let declared = driver.service_names().await.expect("service names");
    assert_eq!(declared, names(&["web", "db"]));

    let report = Updater::new(driver.clone(), driver)
        .run_update(declared, 2, true)
        .await;

    assert!(report.is_success(), "{:?}", report.overall_error);
    let web = report.outcome("web").expect("web outcome");
    assert_eq!(web.action, UpdateAction::Restarted);
    assert_eq!(
        web.verdict,
        Some(StalenessVerdict::Stale {
            current: ImageIdentity::parse("aaa111").expect("id"),
            target: ImageIdentity::parse("bbb222").expect("id"),
        })
    );
    let db = report.outcome("db").expect("db outcome");
    assert_eq!(db.action, UpdateAction::None);
    assert_eq!(db.verdict, Some(StalenessVerdict::NotRunning));
    assert!(db.warning.is_some());

    let calls = sandbox.calls();
    let restart: Vec<&str> = calls
        .iter()
        .map(String::as_str)
        .filter(|call| {
            call.ends_with("stop web") || call.ends_with("rm -f web") || call.ends_with("up -d web")
        })
        .collect();
    assert_eq!(
        restart,
        vec![
            "compose -f docker-compose.yml stop web",
            "compose -f docker-compose.yml rm -f web",
            "compose -f docker-compose.yml up -d web",
        ]
    );
    assert!(!calls.iter().any(|call| call.ends_with("pull db")));
}

#[tokio::test]
async fn failed_stop_is_reported_with_its_step() {
    let sandbox = Sandbox::new();
    sandbox.flag("fail-stop");
    let driver = sandbox.driver();

    let report = Updater::new(driver.clone(), driver)
        .run_update(names(&["web"]), 1, false)
        .await;

    match report.overall_error.as_ref().expect("run fails") {
        UpdateError::Aggregate { failed, total, first } => {
            assert_eq!((*failed, *total), (1, 1));
            assert!(matches!(
                &**first,
                UpdateError::Step {
                    step: RestartStep::Stop,
                    ..
                }
            ));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!sandbox.calls().iter().any(|call| call.ends_with("up -d web")));
}

#[tokio::test]
async fn unreachable_daemon_aborts_before_any_service() {
    let sandbox = Sandbox::new();
    sandbox.flag("daemon-down");
    let driver = sandbox.driver();

    let report = Updater::new(driver.clone(), driver)
        .run_update(names(&["web", "db"]), 3, false)
        .await;

    assert!(report.outcomes.is_empty());
    assert!(report
        .overall_error
        .as_ref()
        .is_some_and(UpdateError::is_runtime_unavailable));
    assert_eq!(sandbox.calls().len(), 1);
}
