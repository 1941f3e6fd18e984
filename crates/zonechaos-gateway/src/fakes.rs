//! ---
//! zc_section: "05-networking-external-interfaces"
//! zc_subsection: "module"
//! zc_type: "source"
//! zc_scope: "code"
//! zc_description: "Control-plane gateway and command execution."
//! zc_version: "v0.0.0-prealpha"
//! zc_owner: "tbd"
//! ---
//! Scripted control plane used by unit and scenario tests.
//!
//! Responses are selected by substring: among all registered patterns that
//! occur in a command, the longest one wins. Every call is recorded together
//! with the tokio clock reading so tests can assert ordering and timing.
use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::{CommandOutput, ControlPlane, GatewayError};

/// One command observed by the fake.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// Command line as issued.
    pub command: String,
    /// Tokio clock reading when the call was issued.
    pub at: Instant,
}

#[derive(Debug, Clone)]
enum Reply {
    Output(CommandOutput),
    Error(GatewayError),
}

#[derive(Debug)]
struct Rule {
    pattern: String,
    queued: VecDeque<Reply>,
    last: Reply,
    hits: usize,
    fail_on: Option<(usize, GatewayError)>,
}

impl Rule {
    fn next(&mut self) -> Reply {
        self.hits += 1;
        if let Some((nth, err)) = &self.fail_on {
            if *nth == self.hits {
                return Reply::Error(err.clone());
            }
        }
        match self.queued.pop_front() {
            Some(reply) => {
                self.last = reply.clone();
                reply
            }
            None => self.last.clone(),
        }
    }
}

#[derive(Debug)]
struct ScriptInner {
    rules: Vec<Rule>,
    calls: Vec<RecordedCall>,
    fallback: CommandOutput,
}

/// Fake [`ControlPlane`] answering from canned responses.
#[derive(Debug)]
pub struct ScriptedGateway {
    inner: Mutex<ScriptInner>,
}

impl Default for ScriptedGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedGateway {
    /// Fake answering every unmatched command with empty success.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ScriptInner {
                rules: Vec::new(),
                calls: Vec::new(),
                fallback: CommandOutput::success(""),
            }),
        }
    }

    /// Replace the response used for commands no rule matches.
    pub fn with_fallback(self, fallback: CommandOutput) -> Self {
        self.inner.lock().fallback = fallback;
        self
    }

    /// Always answer commands containing `pattern` with `output`.
    pub fn on(&self, pattern: impl Into<String>, output: CommandOutput) -> &Self {
        self.push_rule(pattern.into(), VecDeque::new(), Reply::Output(output));
        self
    }

    /// Answer successive matches with `outputs`; the final entry repeats.
    pub fn on_sequence(&self, pattern: impl Into<String>, outputs: Vec<CommandOutput>) -> &Self {
        let mut queued: VecDeque<Reply> = outputs.into_iter().map(Reply::Output).collect();
        let last = queued
            .pop_back()
            .unwrap_or_else(|| Reply::Output(CommandOutput::success("")));
        queued.push_back(last.clone());
        self.push_rule(pattern.into(), queued, last);
        self
    }

    /// Answer commands containing `pattern` with a transport error.
    pub fn fail_with(&self, pattern: impl Into<String>, error: GatewayError) -> &Self {
        self.push_rule(pattern.into(), VecDeque::new(), Reply::Error(error));
        self
    }

    /// Fail only the `nth` (1-based) match of `pattern` with a transport error.
    ///
    /// Other matches keep the rule's regular replies, or empty success when
    /// the pattern had no rule yet.
    pub fn fail_on_nth(&self, pattern: impl Into<String>, nth: usize, error: GatewayError) -> &Self {
        let pattern = pattern.into();
        let mut inner = self.inner.lock();
        match inner.rules.iter_mut().find(|rule| rule.pattern == pattern) {
            Some(rule) => rule.fail_on = Some((nth, error)),
            None => inner.rules.push(Rule {
                pattern,
                queued: VecDeque::new(),
                last: Reply::Output(CommandOutput::success("")),
                hits: 0,
                fail_on: Some((nth, error)),
            }),
        }
        self
    }

    fn push_rule(&self, pattern: String, queued: VecDeque<Reply>, last: Reply) {
        let mut inner = self.inner.lock();
        inner.rules.retain(|rule| rule.pattern != pattern);
        inner.rules.push(Rule {
            pattern,
            queued,
            last,
            hits: 0,
            fail_on: None,
        });
    }

    /// All calls observed so far, in issue order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.inner.lock().calls.clone()
    }

    /// Command lines observed so far, in issue order.
    pub fn commands(&self) -> Vec<String> {
        self.inner
            .lock()
            .calls
            .iter()
            .map(|call| call.command.clone())
            .collect()
    }

    /// Number of issued commands containing `pattern`.
    pub fn count_matching(&self, pattern: &str) -> usize {
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|call| call.command.contains(pattern))
            .count()
    }

    /// Index of the first issued command containing `pattern`.
    pub fn position(&self, pattern: &str) -> Option<usize> {
        self.inner
            .lock()
            .calls
            .iter()
            .position(|call| call.command.contains(pattern))
    }

    /// First recorded call containing `pattern`.
    pub fn first_call(&self, pattern: &str) -> Option<RecordedCall> {
        self.inner
            .lock()
            .calls
            .iter()
            .find(|call| call.command.contains(pattern))
            .cloned()
    }
}

#[async_trait]
impl ControlPlane for ScriptedGateway {
    async fn execute(&self, command: &str) -> Result<CommandOutput, GatewayError> {
        let mut inner = self.inner.lock();
        inner.calls.push(RecordedCall {
            command: command.to_owned(),
            at: Instant::now(),
        });
        let fallback = inner.fallback.clone();
        let reply = inner
            .rules
            .iter_mut()
            .filter(|rule| command.contains(rule.pattern.as_str()))
            .max_by_key(|rule| rule.pattern.len())
            .map(Rule::next);
        match reply {
            Some(Reply::Output(output)) => Ok(output),
            Some(Reply::Error(err)) => Err(err),
            None => Ok(fallback),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn longest_pattern_wins() {
        let gateway = ScriptedGateway::new();
        gateway
            .on("subnet show", CommandOutput::success("generic"))
            .on("subnet show --name SubnetA", CommandOutput::success("specific"));
        let out = gateway
            .execute("az network vnet subnet show --name SubnetA")
            .await
            .unwrap();
        assert_eq!(out.trimmed(), "specific");
        let out = gateway
            .execute("az network vnet subnet show --name SubnetB")
            .await
            .unwrap();
        assert_eq!(out.trimmed(), "generic");
    }

    #[tokio::test]
    async fn sequence_repeats_final_reply() {
        let gateway = ScriptedGateway::new();
        gateway.on_sequence(
            "probe",
            vec![CommandOutput::failure(1, "no"), CommandOutput::success("yes")],
        );
        assert_eq!(gateway.execute("probe").await.unwrap().status, 1);
        assert_eq!(gateway.execute("probe").await.unwrap().trimmed(), "yes");
        assert_eq!(gateway.execute("probe").await.unwrap().trimmed(), "yes");
        assert_eq!(gateway.count_matching("probe"), 3);
    }

    #[tokio::test]
    async fn nth_match_fails_once() {
        let gateway = ScriptedGateway::new();
        gateway
            .on("az vmss list", CommandOutput::success("aks-a-vmss"))
            .fail_on_nth(
                "az vmss list",
                2,
                GatewayError::Spawn {
                    command: "az vmss list".into(),
                    message: "connection reset".into(),
                },
            );
        assert!(gateway.execute("az vmss list").await.is_ok());
        assert!(gateway.execute("az vmss list").await.is_err());
        assert_eq!(
            gateway.execute("az vmss list").await.unwrap().trimmed(),
            "aks-a-vmss"
        );
    }

    #[tokio::test]
    async fn unmatched_commands_use_fallback() {
        let gateway = ScriptedGateway::new().with_fallback(CommandOutput::failure(9, "nope"));
        let out = gateway.execute("anything").await.unwrap();
        assert_eq!(out.status, 9);
        assert_eq!(gateway.position("anything"), Some(0));
    }
}
