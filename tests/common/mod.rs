//! Shared test support: a scripted gateway standing in for remote models

#![allow(dead_code)]

use async_trait::async_trait;
use quorum::llm::{ChatMessage, GatewayError, ModelGateway};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// One scripted reply for a model
enum Reply {
    Ok { text: String, delay_ms: u64 },
    Fail,
}

/// Gateway returning queued per-model replies and recording every call
///
/// Replies are consumed in invocation order: the first queued reply for a
/// council model serves its Stage 1 call, the second its Stage 2 call.
/// Models with no queued reply get a generic answer, so tests only script
/// what they assert on.
#[derive(Default)]
pub struct ScriptedGateway {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<(String, Vec<ChatMessage>)>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ok(&self, model: &str, text: &str) {
        self.push(
            model,
            Reply::Ok {
                text: text.to_string(),
                delay_ms: 0,
            },
        );
    }

    pub fn push_ok_delayed(&self, model: &str, text: &str, delay_ms: u64) {
        self.push(
            model,
            Reply::Ok {
                text: text.to_string(),
                delay_ms,
            },
        );
    }

    pub fn push_fail(&self, model: &str) {
        self.push(model, Reply::Fail);
    }

    fn push(&self, model: &str, reply: Reply) {
        self.scripts
            .lock()
            .unwrap()
            .entry(model.to_string())
            .or_default()
            .push_back(reply);
    }

    /// All recorded calls as (model, messages), in invocation order
    pub fn calls(&self) -> Vec<(String, Vec<ChatMessage>)> {
        self.calls.lock().unwrap().clone()
    }

    /// Messages from the nth recorded call to the given model
    pub fn call_messages(&self, model: &str, nth: usize) -> Vec<ChatMessage> {
        self.calls()
            .into_iter()
            .filter(|(m, _)| m == model)
            .nth(nth)
            .map(|(_, messages)| messages)
            .unwrap_or_else(|| panic!("no call {} recorded for model {}", nth, model))
    }
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn invoke(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<String, GatewayError> {
        self.calls
            .lock()
            .unwrap()
            .push((model.to_string(), messages.to_vec()));

        let reply = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(model)
            .and_then(|queue| queue.pop_front());

        match reply {
            Some(Reply::Ok { text, delay_ms }) => {
                if delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                Ok(text)
            }
            Some(Reply::Fail) => Err(GatewayError::Network("scripted failure".to_string())),
            None => Ok(format!("scripted answer from {}", model)),
        }
    }
}
