//! Operation dispatcher
//!
//! Fans commands, playbooks, and file pushes out to a host selection
//! through the backend runner. Each operation class carries its own
//! in-flight gate so a double click cannot launch a second run, and
//! every completion path releases the gate. Outcomes are folded into a
//! single partitioned result and one summary notification.

mod log;

pub use log::{CommandLog, LogLine, LOG_CAP};

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::api::types::{ExecuteRequest, PlaybookRequest, TargetSelector, UploadResponse};
use crate::api::ApiClient;
use crate::error::{ConsoleError, Result};
use crate::events::{ConsoleEvent, EventBus, Severity};

/// Operation classes, each with an independent in-flight gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Command,
    Upload,
    Playbook,
}

impl OperationKind {
    fn name(self) -> &'static str {
        match self {
            OperationKind::Command => "command",
            OperationKind::Upload => "upload",
            OperationKind::Playbook => "playbook",
        }
    }
}

/// Host-scoped diagnostic for a failed or unreachable target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostDiagnostic {
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// The three outcome partitions of a fan-out operation. A host appears
/// in exactly one partition.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Partitions {
    pub succeeded: Vec<String>,
    pub failed: Vec<HostDiagnostic>,
    pub unreachable: Vec<HostDiagnostic>,
}

impl Partitions {
    /// Reject overlapping partitions. When the caller resolved the
    /// target set itself (explicit id selector), `expected` carries its
    /// size and the union must account for every targeted host; with
    /// the "all" sentinel the backend owns resolution and only
    /// disjointness can be checked (partitions are keyed by host name,
    /// not id, so membership itself is unverifiable client-side).
    pub fn validate(&self, expected: Option<usize>) -> Result<()> {
        let mut seen = BTreeSet::new();
        let all = self
            .succeeded
            .iter()
            .chain(self.failed.iter().map(|d| &d.host))
            .chain(self.unreachable.iter().map(|d| &d.host));
        for host in all {
            if !seen.insert(host.as_str()) {
                return Err(ConsoleError::Contract(format!(
                    "host '{}' appears in more than one result partition",
                    host
                )));
            }
        }
        if let Some(count) = expected {
            if seen.len() != count {
                return Err(ConsoleError::Contract(format!(
                    "result partitions cover {} hosts, expected {}",
                    seen.len(),
                    count
                )));
            }
        }
        Ok(())
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.unreachable.is_empty()
    }
}

/// Overall classification of a fan-out run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Every targeted host succeeded
    Full,
    /// Some hosts succeeded, some did not
    Partial,
    /// Nothing succeeded, or the run itself failed
    Failure,
}

/// Result of a dispatched operation.
#[derive(Debug, Clone, Serialize)]
pub struct OperationResult {
    pub outcome: Outcome,
    pub partitions: Partitions,
    /// Free-form runner output, already rendered for the log pane
    pub log: String,
}

impl OperationResult {
    fn classify(success: bool, partitions: Partitions, log: String) -> Self {
        let outcome = if success && partitions.is_clean() {
            Outcome::Full
        } else if success {
            Outcome::Partial
        } else {
            Outcome::Failure
        };
        Self {
            outcome,
            partitions,
            log,
        }
    }
}

/// RAII release for an operation-class gate.
struct GateGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct Dispatcher {
    api: Arc<ApiClient>,
    events: EventBus,
    log: CommandLog,
    command_gate: AtomicBool,
    upload_gate: AtomicBool,
    playbook_gate: AtomicBool,
}

impl Dispatcher {
    pub fn new(api: Arc<ApiClient>, events: EventBus) -> Self {
        Self {
            api,
            events,
            log: CommandLog::new(),
            command_gate: AtomicBool::new(false),
            upload_gate: AtomicBool::new(false),
            playbook_gate: AtomicBool::new(false),
        }
    }

    pub fn log(&self) -> &CommandLog {
        &self.log
    }

    pub fn in_flight(&self, kind: OperationKind) -> bool {
        self.gate(kind).load(Ordering::Acquire)
    }

    fn gate(&self, kind: OperationKind) -> &AtomicBool {
        match kind {
            OperationKind::Command => &self.command_gate,
            OperationKind::Upload => &self.upload_gate,
            OperationKind::Playbook => &self.playbook_gate,
        }
    }

    fn acquire(&self, kind: OperationKind) -> Result<GateGuard<'_>> {
        let flag = self.gate(kind);
        if flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ConsoleError::Busy(kind.name()));
        }
        Ok(GateGuard { flag })
    }

    fn validate_selector(selector: &TargetSelector) -> Result<()> {
        if selector.is_empty() {
            return Err(ConsoleError::Validation(
                "no target hosts selected".to_string(),
            ));
        }
        Ok(())
    }

    /// Pull recent runner output from the server into the local log.
    pub async fn seed_log(&self) -> Result<()> {
        let entries = self.api.server_logs(LOG_CAP).await?;
        for entry in entries {
            self.log.append(render_json(&entry));
        }
        Ok(())
    }

    /// Run a shell command on the selected hosts.
    pub async fn run_command(
        &self,
        command: &str,
        targets: TargetSelector,
    ) -> Result<OperationResult> {
        let _gate = self.acquire(OperationKind::Command)?;

        if command.trim().is_empty() {
            return Err(ConsoleError::Validation("command is empty".to_string()));
        }
        Self::validate_selector(&targets)?;

        info!("dispatching command to {:?}", targets);
        let request = ExecuteRequest {
            command: command.to_string(),
            hosts: targets,
        };
        let response = match self.api.execute(&request).await {
            Ok(value) => value,
            Err(e) => {
                self.events
                    .notify(Severity::Error, format!("Command dispatch failed: {}", e));
                return Err(e);
            }
        };

        // The runner's per-host output is rendered verbatim into the log
        let rendered = render_json(&response);
        self.log.append(rendered.clone());

        let success = response
            .get("success")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let result = OperationResult::classify(success, Partitions::default(), rendered);

        self.events.notify(
            if success { Severity::Success } else { Severity::Error },
            if success {
                "Command completed".to_string()
            } else {
                "Command failed on one or more hosts".to_string()
            },
        );

        Ok(result)
    }

    /// Push a local file to the selected hosts, publishing byte-level
    /// progress as the stream drains.
    pub async fn push_file(
        &self,
        local_path: &Path,
        remote_path: &str,
        targets: TargetSelector,
    ) -> Result<OperationResult> {
        let _gate = self.acquire(OperationKind::Upload)?;

        if remote_path.trim().is_empty() {
            return Err(ConsoleError::Validation(
                "destination path is empty".to_string(),
            ));
        }
        Self::validate_selector(&targets)?;

        let tracked = crate::files::transfer::tracked_file_part(&self.events, local_path).await?;
        let file_name = tracked.file_name;
        let transfer_id = tracked.transfer_id;

        // The selector rides along as a JSON-encoded form field
        let form = reqwest::multipart::Form::new()
            .part("file", tracked.part)
            .text("remote_path", remote_path.to_string())
            .text("hosts", serde_json::to_string(&targets)?);

        info!("pushing {} to {:?}", file_name, remote_path);
        let response = match self.api.upload_multipart(form).await {
            Ok(r) => r,
            Err(e) => {
                self.events.emit(ConsoleEvent::UploadFinished {
                    transfer_id,
                    error: Some(e.to_string()),
                });
                self.events
                    .notify(Severity::Error, format!("Upload failed: {}", e));
                return Err(e);
            }
        };

        self.events.emit(ConsoleEvent::UploadFinished {
            transfer_id,
            error: if response.success {
                None
            } else {
                Some(response.message.clone())
            },
        });
        let result = self.fold_upload(response)?;
        self.notify_outcome(&result, "Upload");
        Ok(result)
    }

    fn fold_upload(&self, response: UploadResponse) -> Result<OperationResult> {
        let partitions = Partitions {
            succeeded: response.details.succeeded,
            failed: response
                .details
                .failed
                .into_iter()
                .map(|(host, detail)| HostDiagnostic {
                    host,
                    detail: Some(detail),
                })
                .collect(),
            unreachable: Vec::new(),
        };
        partitions.validate(None)?;

        let log = if response.message.is_empty() {
            String::new()
        } else {
            response.message
        };
        Ok(OperationResult::classify(response.success, partitions, log))
    }

    /// Run a playbook against the selected hosts. `All` is encoded as an
    /// empty id list for the runner.
    pub async fn run_playbook(
        &self,
        playbook: &str,
        targets: TargetSelector,
    ) -> Result<OperationResult> {
        let _gate = self.acquire(OperationKind::Playbook)?;

        if playbook.trim().is_empty() {
            return Err(ConsoleError::Validation("playbook is empty".to_string()));
        }
        Self::validate_selector(&targets)?;

        let expected = match &targets {
            TargetSelector::All => None,
            TargetSelector::Hosts(ids) => Some(ids.len()),
        };
        let host_ids = match targets {
            TargetSelector::All => Vec::new(),
            TargetSelector::Hosts(ids) => ids,
        };
        let request = PlaybookRequest {
            playbook: playbook.to_string(),
            host_ids,
        };

        let response = match self.api.run_playbook(&request).await {
            Ok(r) => r,
            Err(e) => {
                self.events
                    .notify(Severity::Error, format!("Playbook dispatch failed: {}", e));
                return Err(e);
            }
        };

        let partitions = Partitions {
            succeeded: response.summary.success,
            failed: response
                .summary
                .failed
                .into_iter()
                .map(|host| HostDiagnostic { host, detail: None })
                .collect(),
            unreachable: response
                .summary
                .unreachable
                .into_iter()
                .map(|host| HostDiagnostic { host, detail: None })
                .collect(),
        };
        partitions.validate(expected)?;

        let log = response.logs.join("\n");
        self.log.append(log.clone());

        if !response.success {
            warn!("playbook exited with code {}", response.return_code);
        }

        let result = OperationResult::classify(response.success, partitions, log);
        self.notify_outcome(&result, "Playbook");
        Ok(result)
    }

    fn notify_outcome(&self, result: &OperationResult, what: &str) {
        let (severity, message) = match result.outcome {
            Outcome::Full => (
                Severity::Success,
                format!("{} succeeded on all hosts", what),
            ),
            Outcome::Partial => (
                Severity::Warning,
                format!(
                    "{} partially succeeded ({} ok, {} failed, {} unreachable)",
                    what,
                    result.partitions.succeeded.len(),
                    result.partitions.failed.len(),
                    result.partitions.unreachable.len()
                ),
            ),
            Outcome::Failure => (Severity::Error, format!("{} failed", what)),
        };
        self.events.notify(severity, message);
    }
}

fn render_json(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
