//! ---
//! dcu_section: "05-cli"
//! dcu_subsection: "binary"
//! dcu_type: "source"
//! dcu_scope: "code"
//! dcu_description: "Per-service spinners and status lines printed while a run is in flight."
//! dcu_version: "v0.0.0-prealpha"
//! dcu_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::env;
use std::io::{self, IsTerminal};
use std::time::Duration;

use dcu_core::{StalenessVerdict, UpdateAction, UpdateObserver, UpdateOutcome};
use dcu_runtime::ServiceName;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use parking_lot::Mutex;

const SPINNER_TICK: Duration = Duration::from_millis(100);

/// Environment variables set by common CI systems.
const CI_ENV_VARS: [&str; 9] = [
    "CI",
    "CONTINUOUS_INTEGRATION",
    "BUILD_NUMBER",
    "JENKINS_URL",
    "TRAVIS",
    "CIRCLECI",
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "BUILDKITE",
];

/// True when both stdout and stderr are terminals and no CI variable is set.
pub fn is_interactive() -> bool {
    io::stdout().is_terminal() && io::stderr().is_terminal() && !running_in_ci()
}

fn running_in_ci() -> bool {
    CI_ENV_VARS
        .iter()
        .any(|name| env::var_os(name).is_some_and(|value| !value.is_empty()))
}

#[derive(Debug, PartialEq, Eq)]
pub enum StatusLine {
    Stdout(String),
    Stderr(String),
}

/// Line reported for a finished service, if any.
pub fn render_outcome(outcome: &UpdateOutcome) -> Option<StatusLine> {
    let service = &outcome.service;
    match outcome.action {
        UpdateAction::Restarted => Some(StatusLine::Stdout(format!("✅ Updated {service}"))),
        UpdateAction::Failed => {
            let reason = outcome
                .error
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "unknown error".to_owned());
            Some(StatusLine::Stderr(format!(
                "❌ Failed to update {service}: {reason}"
            )))
        }
        UpdateAction::None => match (&outcome.warning, &outcome.verdict) {
            (Some(warning), _) => Some(StatusLine::Stdout(format!("⚠️  {warning}"))),
            (None, Some(StalenessVerdict::NotRunning)) => None,
            (None, _) => Some(StatusLine::Stdout(format!(
                "✅ {service} is already up to date"
            ))),
        },
    }
}

/// One spinner per in-flight service, finished in place with its status line.
struct Spinners {
    multi: MultiProgress,
    active: Mutex<HashMap<ServiceName, ProgressBar>>,
}

impl Spinners {
    fn new(target: ProgressDrawTarget) -> Self {
        Self {
            multi: MultiProgress::with_draw_target(target),
            active: Mutex::new(HashMap::new()),
        }
    }

    fn start(&self, service: &ServiceName) {
        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(
            ProgressStyle::with_template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(format!("Updating {service}"));
        bar.enable_steady_tick(SPINNER_TICK);
        self.active.lock().insert(service.clone(), bar);
    }

    fn finish(&self, outcome: &UpdateOutcome) {
        let line = render_outcome(outcome).map(|line| match line {
            StatusLine::Stdout(line) | StatusLine::Stderr(line) => line,
        });
        let bar = self.active.lock().remove(&outcome.service);
        match (bar, line) {
            (Some(bar), Some(line)) => bar.finish_with_message(line),
            (Some(bar), None) => bar.finish_and_clear(),
            (None, Some(line)) => {
                if self.multi.println(&line).is_err() {
                    eprintln!("{line}");
                }
            }
            (None, None) => {}
        }
    }
}

/// Spinners on a terminal, plain status lines otherwise.
pub struct ConsoleProgress {
    spinners: Option<Spinners>,
}

impl ConsoleProgress {
    pub fn new(interactive: bool) -> Self {
        Self {
            spinners: interactive.then(|| Spinners::new(ProgressDrawTarget::stderr())),
        }
    }

    #[cfg(test)]
    fn with_draw_target(target: ProgressDrawTarget) -> Self {
        Self {
            spinners: Some(Spinners::new(target)),
        }
    }
}

impl UpdateObserver for ConsoleProgress {
    fn service_started(&self, service: &ServiceName) {
        if let Some(spinners) = &self.spinners {
            spinners.start(service);
        }
    }

    fn service_finished(&self, outcome: &UpdateOutcome) {
        if let Some(spinners) = &self.spinners {
            spinners.finish(outcome);
            return;
        }
        match render_outcome(outcome) {
            Some(StatusLine::Stdout(line)) => println!("{line}"),
            Some(StatusLine::Stderr(line)) => eprintln!("{line}"),
            None => {}
        }
    }
}
