//! Allowlisted command execution

use crate::command::{Binary, CommandLine};
use crate::error::{NetTuneError, NetTuneResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::process::Stdio;
use std::time::Duration;

/// Characters a shell would interpret. Arguments containing them are
/// refused even though no shell is involved.
const FORBIDDEN_CHARS: &[char] = &[';', '|', '&', '$', '`', '<', '>', '\n', '\r', '\0'];

/// Result of running one command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub ok: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    #[serde(default)]
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self { ok: true, code: Some(0), stdout: stdout.into(), ..Default::default() }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self { ok: false, code: Some(code), stderr: stderr.into(), ..Default::default() }
    }

    pub fn timeout(after: Duration) -> Self {
        Self {
            ok: false,
            timed_out: true,
            stderr: format!("timed out after {:?}", after),
            ..Default::default()
        }
    }

    /// Short description of why the command failed
    pub fn error_message(&self) -> String {
        if self.timed_out {
            return self.stderr.clone();
        }
        let detail = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };
        match self.code {
            Some(code) => format!("exit code {}: {}", code, detail),
            None => detail.to_string(),
        }
    }
}

/// Runs commands on behalf of the pipeline
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run one command. `Err` means the command was refused before it
    /// started; a command that ran and failed is an `Ok` with `ok == false`.
    async fn run(&self, cmd: &CommandLine, timeout: Duration) -> NetTuneResult<CommandOutput>;
}

/// Executor that spawns real processes for allowlisted tools only
pub struct AllowlistedExecutor {
    allowed: BTreeSet<Binary>,
}

impl AllowlistedExecutor {
    pub fn new(allowed: impl IntoIterator<Item = Binary>) -> Self {
        Self { allowed: allowed.into_iter().collect() }
    }

    /// Build from tool names; unknown names are ignored with a warning
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        let allowed = names
            .iter()
            .filter_map(|n| {
                let found = Binary::from_name(n.as_ref());
                if found.is_none() {
                    tracing::warn!("Ignoring unknown tool in allowlist: {}", n.as_ref());
                }
                found
            })
            .collect();
        Self { allowed }
    }

    pub fn is_allowed(&self, binary: Binary) -> bool {
        self.allowed.contains(&binary)
    }

    fn admit(&self, cmd: &CommandLine) -> NetTuneResult<()> {
        if !self.is_allowed(cmd.binary) {
            return Err(NetTuneError::NotAllowed(format!("{} is not allowlisted", cmd.binary)));
        }
        if let Some(bad) = cmd.args.iter().find(|a| a.contains(FORBIDDEN_CHARS)) {
            return Err(NetTuneError::NotAllowed(format!(
                "argument contains shell metacharacters: {:?}",
                bad
            )));
        }
        Ok(())
    }
}

impl Default for AllowlistedExecutor {
    fn default() -> Self {
        Self::new(Binary::ALL)
    }
}

#[async_trait]
impl CommandExecutor for AllowlistedExecutor {
    async fn run(&self, cmd: &CommandLine, timeout: Duration) -> NetTuneResult<CommandOutput> {
        self.admit(cmd)?;
        tracing::debug!("exec: {}", cmd);

        let child = tokio::process::Command::new(cmd.binary.name())
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(timeout, child).await {
            Err(_) => {
                tracing::warn!("Command timed out after {:?}: {}", timeout, cmd);
                return Ok(CommandOutput::timeout(timeout));
            }
            Ok(Err(e)) => {
                return Ok(CommandOutput {
                    ok: false,
                    code: None,
                    stderr: format!("failed to start {}: {}", cmd.binary, e),
                    ..Default::default()
                });
            }
            Ok(Ok(output)) => output,
        };

        Ok(CommandOutput {
            ok: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            timed_out: false,
        })
    }
}
