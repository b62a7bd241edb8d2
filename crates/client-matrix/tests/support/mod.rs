//! In-memory transport answering from a fixed script.

#![allow(dead_code)]

use std::{collections::VecDeque, sync::Arc, time::Duration};

use async_trait::async_trait;
use client_core::{Credential, SessionStore, SyncStatus};
use client_matrix::{ApiRequest, Transport, TransportError};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::watch;

pub const WAIT: Duration = Duration::from_secs(5);

enum Step {
    Reply(Result<String, TransportError>),
    Delayed(Duration, Result<String, TransportError>),
}

/// Pops one scripted reply per request and records what was asked.
/// Once the script runs out every further request hangs, like an idle long-poll.
pub struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<ApiRequest>>,
    count: watch::Sender<usize>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        let (count, _) = watch::channel(0);
        Arc::new(Self {
            steps: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            count,
        })
    }

    pub fn reply(&self, body: Value) {
        self.steps.lock().push_back(Step::Reply(Ok(body.to_string())));
    }

    pub fn reply_raw(&self, body: &str) {
        self.steps.lock().push_back(Step::Reply(Ok(body.to_owned())));
    }

    pub fn reply_after(&self, delay: Duration, body: Value) {
        self.steps
            .lock()
            .push_back(Step::Delayed(delay, Ok(body.to_string())));
    }

    pub fn fail(&self, err: TransportError) {
        self.steps.lock().push_back(Step::Reply(Err(err)));
    }

    pub fn fail_status(&self, status: u16, body: Value) {
        self.fail(TransportError::Status {
            status,
            body: body.to_string(),
        });
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// `since` of every request so far, in order.
    pub fn since_values(&self) -> Vec<Option<String>> {
        self.requests
            .lock()
            .iter()
            .map(|request| request.query_param("since").map(str::to_owned))
            .collect()
    }

    pub async fn wait_for_requests(&self, count: usize) {
        let mut seen = self.count.subscribe();
        tokio::time::timeout(WAIT, seen.wait_for(|seen| *seen >= count))
            .await
            .expect("requests should arrive in time")
            .expect("transport alive");
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn request(&self, request: ApiRequest) -> Result<String, TransportError> {
        self.requests.lock().push(request);
        let step = self.steps.lock().pop_front();
        self.count.send_modify(|count| *count += 1);
        match step {
            Some(Step::Reply(result)) => result,
            Some(Step::Delayed(delay, result)) => {
                tokio::time::sleep(delay).await;
                result
            }
            None => std::future::pending().await,
        }
    }
}

pub fn logged_in_session() -> SessionStore {
    let session = SessionStore::new();
    session.set(Credential::new("tok", "@alice:example.org", "example.org").with_device_id("DEV"));
    session
}

pub async fn wait_for_status(
    status: &mut watch::Receiver<SyncStatus>,
    predicate: impl FnMut(&SyncStatus) -> bool,
) -> SyncStatus {
    tokio::time::timeout(WAIT, status.wait_for(predicate))
        .await
        .expect("status should change in time")
        .expect("engine alive")
        .clone()
}

pub fn message(event_id: &str, body: &str) -> Value {
    json!({
        "event_id": event_id,
        "type": "m.room.message",
        "sender": "@bob:example.org",
        "origin_server_ts": 1_700_000_000_000_u64,
        "content": {"msgtype": "m.text", "body": body}
    })
}

pub fn sync_body(next_batch: &str, room_id: &str, timeline: Vec<Value>) -> Value {
    json!({
        "next_batch": next_batch,
        "rooms": {"join": {room_id: {"timeline": {"events": timeline}}}}
    })
}

pub fn empty_sync(next_batch: &str) -> Value {
    json!({"next_batch": next_batch})
}
