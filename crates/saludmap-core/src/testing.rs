//! In-memory test doubles shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc;

use crate::location::{PositionError, PositionOptions, PositionProvider, PositionStream, RawPosition};
use crate::proxy::{FetchedResource, Transport, TransportError};
use crate::store::DurableStore;

pub async fn temp_store() -> (tempfile::TempDir, Arc<DurableStore>) {
    let dir = tempfile::tempdir().unwrap();
    let store = DurableStore::open(dir.path()).await.unwrap();
    (dir, Arc::new(store))
}

// ===== Positioning =====

type WatchSender = mpsc::UnboundedSender<Result<RawPosition, PositionError>>;

/// Answers one-shot requests from a queue and forwards `emit_watch` values
/// to the most recent watch stream.
#[derive(Default)]
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<Result<RawPosition, PositionError>>>,
    watch: Mutex<Option<WatchSender>>,
    last_options: Mutex<Option<PositionOptions>>,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_position(&self, response: Result<RawPosition, PositionError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn emit_watch(&self, value: Result<RawPosition, PositionError>) {
        if let Some(tx) = self.watch.lock().unwrap().as_ref() {
            let _ = tx.unbounded_send(value);
        }
    }

    pub fn last_options(&self) -> Option<PositionOptions> {
        *self.last_options.lock().unwrap()
    }
}

#[async_trait]
impl PositionProvider for ScriptedProvider {
    async fn current_position(&self, options: PositionOptions) -> Result<RawPosition, PositionError> {
        *self.last_options.lock().unwrap() = Some(options);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.responses.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Err(PositionError::Unavailable("no scripted position".into())))
    }

    fn watch_position(&self, options: PositionOptions) -> PositionStream {
        *self.last_options.lock().unwrap() = Some(options);
        let (tx, rx) = mpsc::unbounded();
        *self.watch.lock().unwrap() = Some(tx);
        Box::pin(rx)
    }
}

// ===== Network =====

/// Serves canned bodies by exact URL, or by prefix for URLs registered
/// with `insert_prefix`. Unknown URLs are 404s.
#[derive(Default)]
pub struct MockTransport {
    exact: Mutex<HashMap<String, FetchedResource>>,
    prefixes: Mutex<Vec<(String, FetchedResource)>>,
    failing: Mutex<Vec<String>>,
    offline: AtomicBool,
    calls: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: &str, content_type: &str, body: Vec<u8>) {
        self.exact
            .lock()
            .unwrap()
            .insert(url.to_string(), resource(content_type, body));
    }

    pub fn insert_prefix(&self, prefix: &str, content_type: &str, body: Vec<u8>) {
        self.prefixes
            .lock()
            .unwrap()
            .push((prefix.to_string(), resource(content_type, body)));
    }

    /// URLs containing `needle` fail with a server error.
    pub fn fail_matching(&self, needle: &str) {
        self.failing.lock().unwrap().push(needle.to_string());
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn resource(content_type: &str, body: Vec<u8>) -> FetchedResource {
    FetchedResource {
        content_type: Some(content_type.to_string()),
        body,
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch(&self, url: &str) -> Result<FetchedResource, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(TransportError::Unreachable(url.to_string()));
        }
        if self.failing.lock().unwrap().iter().any(|n| url.contains(n.as_str())) {
            return Err(TransportError::ServerError(url.to_string()));
        }
        if let Some(found) = self.exact.lock().unwrap().get(url) {
            return Ok(found.clone());
        }
        self.prefixes
            .lock()
            .unwrap()
            .iter()
            .find(|(prefix, _)| url.starts_with(prefix.as_str()))
            .map(|(_, found)| found.clone())
            .ok_or_else(|| TransportError::NotFound(url.to_string()))
    }
}
