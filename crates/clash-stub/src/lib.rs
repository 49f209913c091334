//! In-memory stand-in for the rule management (RMS) and results analysis
//! (RAS) services
//!
//! Serves the routes both clients call, accepts paging through headers or
//! query parameters, records every request and can be told to fail an
//! operation with a given status.

pub mod fixtures;
mod routes;

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// One request as the stub saw it
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Operation label, e.g. `list tests`
    pub operation: String,
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    /// Header names lowercased
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Injected failure; the first `after` calls still succeed
#[derive(Debug, Clone, Copy)]
pub(crate) struct Failure {
    pub status: u16,
    pub after: usize,
}

#[derive(Debug, Default)]
pub(crate) struct StubData {
    pub tests: Vec<Value>,
    pub results: Vec<Value>,
    pub result_bodies: HashMap<String, Value>,
    pub rules: Vec<Value>,
    pub templates: Vec<Value>,
    pub history: Vec<Value>,
    pub requests: Vec<RecordedRequest>,
    pub failures: HashMap<String, Failure>,
    pub max_page_size: Option<usize>,
    /// Pages keep answering with the token they were asked for
    pub stuck_paging: bool,
    /// Clash body attached to results created by runs
    pub run_body: Option<Value>,
}

pub(crate) type SharedData = Arc<Mutex<StubData>>;

pub(crate) fn lock(data: &SharedData) -> MutexGuard<'_, StubData> {
    data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle to a running stub; the server stops when dropped
pub struct StubServer {
    base_url: String,
    data: SharedData,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl StubServer {
    /// Bind an ephemeral local port and start serving
    pub async fn start() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let data: SharedData = Arc::new(Mutex::new(StubData::default()));
        let app = routes::router(Arc::clone(&data));

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = server.await {
                tracing::warn!(error = %e, "Stub server stopped with error");
            }
        });

        Ok(Self {
            base_url: format!("http://{}", addr),
            data,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    /// Base URL serving both services
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Add a test row, assigning an id when it has none; returns the id
    pub fn seed_test(&self, mut row: Value) -> String {
        let id = routes::ensure_id(&mut row);
        lock(&self.data).tests.push(row);
        id
    }

    /// Add result metadata and, optionally, the body served by id
    pub fn seed_result(&self, metadata: Value, body: Option<Value>) {
        let mut data = lock(&self.data);
        if let (Some(id), Some(body)) = (metadata.get("id").and_then(Value::as_str), body) {
            data.result_bodies.insert(id.to_string(), body);
        }
        data.results.push(metadata);
    }

    /// Overwrite the status code of a stored result
    pub fn set_result_status(&self, id: &str, status: i64) {
        let mut data = lock(&self.data);
        let row = data
            .results
            .iter_mut()
            .find(|row| row.get("id").and_then(Value::as_str) == Some(id))
            .and_then(Value::as_object_mut);
        if let Some(row) = row {
            row.insert("status".into(), Value::from(status));
        }
    }

    pub fn seed_rule(&self, mut row: Value) -> String {
        let id = routes::ensure_id(&mut row);
        lock(&self.data).rules.push(row);
        id
    }

    pub fn seed_template(&self, row: Value) {
        lock(&self.data).templates.push(row);
    }

    pub fn seed_history(&self, row: Value) {
        lock(&self.data).history.push(row);
    }

    /// Clash body every result created by a run is served with
    pub fn set_run_body(&self, body: Value) {
        lock(&self.data).run_body = Some(body);
    }

    /// Cap pages below what clients ask for, to force several pages
    pub fn set_max_page_size(&self, size: usize) {
        lock(&self.data).max_page_size = Some(size.max(1));
    }

    /// Answer every call of `operation` with `status` until cleared
    pub fn fail(&self, operation: &str, status: u16) {
        self.fail_after(operation, 0, status);
    }

    /// Let `successes` calls of `operation` through, then fail the rest
    pub fn fail_after(&self, operation: &str, successes: usize, status: u16) {
        lock(&self.data).failures.insert(
            operation.to_string(),
            Failure {
                status,
                after: successes,
            },
        );
    }

    /// Report more data on every page without ever advancing the token
    pub fn set_stuck_paging(&self) {
        lock(&self.data).stuck_paging = true;
    }

    pub fn clear_failures(&self) {
        lock(&self.data).failures.clear();
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.data).requests.clone()
    }

    pub fn requests_for(&self, operation: &str) -> Vec<RecordedRequest> {
        lock(&self.data)
            .requests
            .iter()
            .filter(|request| request.operation == operation)
            .cloned()
            .collect()
    }

    pub fn clear_requests(&self) {
        lock(&self.data).requests.clear();
    }

    pub fn tests(&self) -> Vec<Value> {
        lock(&self.data).tests.clone()
    }

    pub fn rules(&self) -> Vec<Value> {
        lock(&self.data).rules.clone()
    }

    pub fn results(&self) -> Vec<Value> {
        lock(&self.data).results.clone()
    }

    pub fn result_body(&self, id: &str) -> Option<Value> {
        lock(&self.data).result_bodies.get(id).cloned()
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
