//! Scripted transport for unit tests. Never touches the network.

use serde_json::{Value, json};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::rc::Rc;

use crate::client::Client;
use crate::error::{Error, Result};
use crate::server::{ServerConfig, ServerRegistry};
use crate::transport::Transport;

#[derive(Debug, Default)]
struct StubState {
    statuses: VecDeque<Value>,
    submit: Option<Value>,
    series: HashMap<String, Value>,
    email_reply: Option<Value>,
    failing_downloads: HashSet<String>,
    fail_status: bool,
    calls: Vec<String>,
    downloads: Vec<String>,
}

/// Cloning shares the script, so a test keeps a handle after boxing one into a [`Client`].
#[derive(Debug, Clone, Default)]
pub(crate) struct StubTransport {
    state: Rc<RefCell<StubState>>,
}

impl StubTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queues a reply for `op=exp_status`. The last queued reply repeats.
    pub(crate) fn push_status(&self, reply: Value) {
        self.state.borrow_mut().statuses.push_back(reply);
    }

    pub(crate) fn set_submit(&self, reply: Value) {
        self.state.borrow_mut().submit = Some(reply);
    }

    pub(crate) fn add_series(&self, name: &str, reply: Value) {
        self.state
            .borrow_mut()
            .series
            .insert(name.to_lowercase(), reply);
    }

    pub(crate) fn set_email_reply(&self, reply: Value) {
        self.state.borrow_mut().email_reply = Some(reply);
    }

    pub(crate) fn fail_download(&self, url: &str) {
        self.state
            .borrow_mut()
            .failing_downloads
            .insert(url.to_string());
    }

    pub(crate) fn fail_status_queries(&self) {
        self.state.borrow_mut().fail_status = true;
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.borrow().calls.clone()
    }

    pub(crate) fn status_calls(&self) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|u| query_param(u, "op").as_deref() == Some("exp_status"))
            .count()
    }

    pub(crate) fn downloads(&self) -> Vec<String> {
        self.state.borrow().downloads.clone()
    }
}

fn query_param(url: &str, key: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    parsed
        .query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

impl Transport for StubTransport {
    fn get_json(&self, url: &str) -> Result<Value> {
        let mut state = self.state.borrow_mut();
        state.calls.push(url.to_string());

        if url.contains("checkAddress.sh") {
            return Ok(state.email_reply.clone().unwrap_or_else(|| json!({"status": 2})));
        }

        match query_param(url, "op").as_deref() {
            Some("exp_status") => {
                if state.fail_status {
                    return Err(Error::transport(url, "connection refused"));
                }
                let reply = if state.statuses.len() > 1 {
                    state.statuses.pop_front()
                } else {
                    state.statuses.front().cloned()
                };
                reply.ok_or_else(|| Error::UnexpectedReply("no scripted status reply".to_string()))
            }
            Some("exp_request") => Ok(state.submit.clone().unwrap_or_else(|| {
                json!({"status": 2, "requestid": "JSOC_20240101_001", "wait": 0})
            })),
            Some("series_struct") => {
                let ds = query_param(url, "ds").unwrap_or_default().to_lowercase();
                Ok(state
                    .series
                    .get(&ds)
                    .cloned()
                    .unwrap_or_else(|| json!({"status": 1, "error": format!("unknown series {ds}")})))
            }
            _ => Err(Error::transport(url, "unscripted request")),
        }
    }

    fn download(&self, url: &str, target: &Path) -> Result<u64> {
        let failing = {
            let mut state = self.state.borrow_mut();
            state.downloads.push(url.to_string());
            state.failing_downloads.contains(url)
        };
        if failing {
            return Err(Error::transport(url, "connection reset"));
        }
        let body = format!("content of {url}");
        std::fs::write(target, body.as_bytes())?;
        Ok(body.len() as u64)
    }
}

pub(crate) fn jsoc_server() -> ServerConfig {
    ServerRegistry::with_defaults()
        .and_then(|r| r.resolve("jsoc"))
        .unwrap()
}

pub(crate) fn stub_client(stub: &StubTransport) -> Client {
    Client::with_transport(jsoc_server(), stub.clone())
}

pub(crate) fn hmi_series_reply() -> Value {
    json!({
        "status": 0,
        "primekeys": ["T_REC", "CAMERA"],
        "keywords": [
            {"name": "T_REC", "type": "time"},
            {"name": "CAMERA", "type": "int"}
        ],
        "segments": [{"name": "magnetogram"}]
    })
}
