#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use drive_qa::credential::Credential;
use drive_qa::remote::{RemoteError, RemoteResourceClient};

pub const BASE: &str = "https://graph.test/v1.0";

/// In-memory storage provider keyed by full request URL.
#[derive(Default)]
pub struct FakeProvider {
    json: HashMap<String, Result<Value, RemoteError>>,
    bytes: HashMap<String, Result<Vec<u8>, RemoteError>>,
    delays: HashMap<String, u64>,
    pub calls: Mutex<Vec<String>>,
    pub tokens: Mutex<Vec<String>>,
}

impl FakeProvider {
    pub fn json(mut self, url: impl Into<String>, body: Value) -> Self {
        self.json.insert(url.into(), Ok(body));
        self
    }

    pub fn json_err(mut self, url: impl Into<String>, err: RemoteError) -> Self {
        self.json.insert(url.into(), Err(err));
        self
    }

    pub fn bytes(mut self, url: impl Into<String>, body: &[u8]) -> Self {
        self.bytes.insert(url.into(), Ok(body.to_vec()));
        self
    }

    pub fn delay(mut self, url: impl Into<String>, millis: u64) -> Self {
        self.delays.insert(url.into(), millis);
        self
    }

    /// Registers a permission listing granting `roles` on one item.
    pub fn roles(self, drive: &str, item: &str, roles: &[&str]) -> Self {
        let url = format!("{}/drives/{}/items/{}/permissions", BASE, drive, item);
        self.json(url, json!({"value": [{"roles": roles}]}))
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    async fn record(&self, url: &str, cred: &Credential) {
        self.calls.lock().unwrap().push(url.to_string());
        self.tokens.lock().unwrap().push(cred.header_value());
        if let Some(ms) = self.delays.get(url) {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
        }
    }
}

#[async_trait]
impl RemoteResourceClient for FakeProvider {
    async fn get_json(&self, url: &str, cred: &Credential) -> Result<Value, RemoteError> {
        self.record(url, cred).await;
        self.json
            .get(url)
            .cloned()
            .unwrap_or(Err(RemoteError::NotFound))
    }

    async fn get_bytes(&self, url: &str, cred: &Credential) -> Result<Vec<u8>, RemoteError> {
        self.record(url, cred).await;
        self.bytes.get(url).cloned().unwrap_or(Err(RemoteError::Status {
            status: 404,
            body: "itemNotFound".to_string(),
        }))
    }
}

pub fn cred() -> Credential {
    Credential::parse("Bearer test-token").unwrap()
}

pub fn item(id: &str, name: &str) -> Value {
    json!({"id": id, "name": name, "file": {"mimeType": "application/octet-stream"}})
}

pub fn folder(id: &str, name: &str) -> Value {
    json!({"id": id, "name": name, "folder": {"childCount": 1}})
}
