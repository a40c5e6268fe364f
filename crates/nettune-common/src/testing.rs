//! Scripted executor for tests

use crate::command::CommandLine;
use crate::error::{NetTuneError, NetTuneResult};
use crate::exec::{CommandExecutor, CommandOutput};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

struct Rule {
    prefix: Vec<String>,
    output: CommandOutput,
}

/// Records every command and replies with scripted outputs matched by
/// argv prefix. One-shot rules are consulted before persistent ones;
/// anything unmatched succeeds with empty output.
#[derive(Default)]
pub struct ScriptedExecutor {
    once: Mutex<VecDeque<Rule>>,
    always: Mutex<Vec<Rule>>,
    refuse: Mutex<Vec<Vec<String>>>,
    calls: Mutex<Vec<CommandLine>>,
}

fn to_prefix(prefix: &[&str]) -> Vec<String> {
    prefix.iter().map(|s| s.to_string()).collect()
}

fn matches(cmd: &CommandLine, prefix: &[String]) -> bool {
    let refs: Vec<&str> = prefix.iter().map(String::as_str).collect();
    cmd.starts_with(&refs)
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply to every matching command
    pub fn on(&self, prefix: &[&str], output: CommandOutput) -> &Self {
        self.always.lock().push(Rule { prefix: to_prefix(prefix), output });
        self
    }

    /// Reply to the next matching command only
    pub fn on_once(&self, prefix: &[&str], output: CommandOutput) -> &Self {
        self.once.lock().push_back(Rule { prefix: to_prefix(prefix), output });
        self
    }

    /// Refuse matching commands as if they were not allowlisted
    pub fn refuse(&self, prefix: &[&str]) -> &Self {
        self.refuse.lock().push(to_prefix(prefix));
        self
    }

    pub fn calls(&self) -> Vec<CommandLine> {
        self.calls.lock().clone()
    }

    pub fn count(&self, prefix: &[&str]) -> usize {
        self.calls.lock().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn run(&self, cmd: &CommandLine, _timeout: Duration) -> NetTuneResult<CommandOutput> {
        if self.refuse.lock().iter().any(|p| matches(cmd, p)) {
            return Err(NetTuneError::NotAllowed(cmd.to_string()));
        }
        self.calls.lock().push(cmd.clone());

        {
            let mut once = self.once.lock();
            if let Some(pos) = once.iter().position(|r| matches(cmd, &r.prefix)) {
                if let Some(rule) = once.remove(pos) {
                    return Ok(rule.output);
                }
            }
        }
        let always = self.always.lock();
        Ok(always
            .iter()
            .find(|r| matches(cmd, &r.prefix))
            .map(|r| r.output.clone())
            .unwrap_or_else(|| CommandOutput::success("")))
    }
}
