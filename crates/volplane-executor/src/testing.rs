//! In-memory transport that records what it is asked to run.
//!
//! Commands succeed with empty output unless a rule matches. Rules are
//! checked in insertion order; the first whose pattern is a substring of
//! the command wins.

use crate::error::ExecError;
use crate::transport::{RemoteCommandTransport, TransportSettings};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// One `exec_commands` invocation as observed by the transport
#[derive(Debug, Clone)]
pub struct RecordedBatch {
    pub host: String,
    /// Commands that were actually run, up to and including a failing one
    pub commands: Vec<String>,
    pub started: Instant,
    pub finished: Instant,
}

#[derive(Debug, Clone)]
enum Rule {
    Fail { pattern: String, stderr: String },
    Unreachable { pattern: String },
    Respond { pattern: String, output: String },
}

impl Rule {
    fn pattern(&self) -> &str {
        match self {
            Self::Fail { pattern, .. }
            | Self::Unreachable { pattern }
            | Self::Respond { pattern, .. } => pattern,
        }
    }
}

pub struct RecordingTransport {
    settings: TransportSettings,
    delay: Duration,
    rules: Mutex<Vec<Rule>>,
    batches: Mutex<Vec<RecordedBatch>>,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::with_settings(TransportSettings::default())
    }

    #[must_use]
    pub fn with_settings(settings: TransportSettings) -> Self {
        Self {
            settings,
            delay: Duration::ZERO,
            rules: Mutex::new(Vec::new()),
            batches: Mutex::new(Vec::new()),
        }
    }

    /// Hold every batch for `delay` before running it
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Make commands containing `pattern` fail with `stderr`
    pub fn fail_on(&self, pattern: &str, stderr: &str) {
        self.rules.lock().push(Rule::Fail {
            pattern: pattern.to_string(),
            stderr: stderr.to_string(),
        });
    }

    /// Make commands containing `pattern` lose the connection to the host
    pub fn unreachable_on(&self, pattern: &str) {
        self.rules.lock().push(Rule::Unreachable {
            pattern: pattern.to_string(),
        });
    }

    /// Make commands containing `pattern` print `output`
    pub fn respond(&self, pattern: &str, output: &str) {
        self.rules.lock().push(Rule::Respond {
            pattern: pattern.to_string(),
            output: output.to_string(),
        });
    }

    pub fn clear_rules(&self) {
        self.rules.lock().clear();
    }

    #[must_use]
    pub fn batches(&self) -> Vec<RecordedBatch> {
        self.batches.lock().clone()
    }

    /// Every command run so far, across all hosts, in execution order
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.batches
            .lock()
            .iter()
            .flat_map(|b| b.commands.iter().cloned())
            .collect()
    }

    /// Commands run so far that contain `pattern`
    #[must_use]
    pub fn commands_matching(&self, pattern: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| c.contains(pattern))
            .collect()
    }

    fn matching_rule(&self, command: &str) -> Option<Rule> {
        self.rules
            .lock()
            .iter()
            .find(|r| command.contains(r.pattern()))
            .cloned()
    }
}

#[async_trait]
impl RemoteCommandTransport for RecordingTransport {
    async fn exec_commands(
        &self,
        host: &str,
        commands: &[String],
        _timeout: Duration,
    ) -> Result<Vec<String>, ExecError> {
        let started = Instant::now();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let mut ran = Vec::new();
        let mut outputs = Vec::new();
        let mut failure = None;
        for (step, command) in commands.iter().enumerate() {
            ran.push(command.clone());
            match self.matching_rule(command) {
                Some(Rule::Fail { stderr, .. }) => {
                    failure = Some(ExecError::CommandFailed {
                        host: host.to_string(),
                        step,
                        command: command.clone(),
                        output: outputs.clone(),
                        stderr,
                    });
                    break;
                }
                Some(Rule::Unreachable { .. }) => {
                    failure = Some(ExecError::connection(host, "connection reset by peer"));
                    break;
                }
                Some(Rule::Respond { output, .. }) => outputs.push(output),
                None => outputs.push(String::new()),
            }
        }

        self.batches.lock().push(RecordedBatch {
            host: host.to_string(),
            commands: ran,
            started,
            finished: Instant::now(),
        });
        match failure {
            Some(e) => Err(e),
            None => Ok(outputs),
        }
    }

    fn settings(&self) -> &TransportSettings {
        &self.settings
    }
}
