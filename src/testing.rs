//! Test doubles shared by unit tests.

use anyhow::{bail, Result};
use artisync_core::billing::TokenUsage;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::model::{ModelClient, ModelRequest, ModelResponse, RequestPurpose};

/// Replays queued replies per request purpose and records every request.
/// A purpose with no queued reply fails the call.
pub struct ScriptedClient {
    replies: Mutex<HashMap<RequestPurpose, VecDeque<String>>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, purpose: RequestPurpose, reply: &str) {
        self.replies
            .lock()
            .unwrap()
            .entry(purpose)
            .or_default()
            .push_back(reply.to_string());
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls_for(&self, purpose: RequestPurpose) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.purpose == purpose)
            .count()
    }
}

#[async_trait]
impl ModelClient for ScriptedClient {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse> {
        self.requests.lock().unwrap().push(request.clone());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .get_mut(&request.purpose)
            .and_then(|q| q.pop_front());
        match reply {
            Some(text) => Ok(ModelResponse {
                text,
                usage: TokenUsage::new(100, 20),
                model: "scripted".to_string(),
            }),
            None => bail!("no scripted reply for {}", request.purpose.as_str()),
        }
    }
}
