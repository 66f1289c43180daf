//! Programmable in-memory transport for tests.
//!
//! [`ScriptedTransport`] answers calls per endpoint address with configurable latency,
//! one-shot scripted outcomes and a fallback behaviour, and counts what it was asked to do.
//! All waiting goes through `tokio::time`, so paused-clock tests stay deterministic.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::transport::{Transport, TransportCall, TransportError};

type Handler = Arc<dyn Fn(&str, &Value) -> Result<Value, TransportError> + Send + Sync>;

/// One scripted answer: wait `latency`, then return `result`.
#[derive(Debug, Clone)]
pub struct Scripted {
    pub latency: Duration,
    pub result: Result<Value, TransportError>,
}

#[derive(Default)]
struct EndpointScript {
    latency: Duration,
    queued: VecDeque<Scripted>,
    fallback: Option<Handler>,
    started: usize,
    completed: usize,
    batches: usize,
    methods: Vec<String>,
}

/// In-memory [`Transport`] with per-address scripts.
///
/// Without a script the transport echoes the call back as
/// `{"endpoint": address, "method": method, "params": params}`.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    scripts: Arc<Mutex<HashMap<String, EndpointScript>>>,
    total: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Default latency for every call to `address`.
    #[must_use]
    pub fn with_latency(self, address: &str, latency: Duration) -> Self {
        self.scripts.lock().entry(address.to_string()).or_default().latency = latency;
        self
    }

    /// Fallback behaviour for `address` once its one-shot script is exhausted.
    #[must_use]
    pub fn with_handler<F>(self, address: &str, handler: F) -> Self
    where
        F: Fn(&str, &Value) -> Result<Value, TransportError> + Send + Sync + 'static,
    {
        self.scripts.lock().entry(address.to_string()).or_default().fallback = Some(Arc::new(handler));
        self
    }

    /// Every call to `address` fails with `error` unless a one-shot script says otherwise.
    #[must_use]
    pub fn failing(self, address: &str, error: TransportError) -> Self {
        self.with_handler(address, move |_, _| Err(error.clone()))
    }

    /// Queues a one-shot answer for the next call to `address`.
    pub fn push(&self, address: &str, latency: Duration, result: Result<Value, TransportError>) {
        self.scripts
            .lock()
            .entry(address.to_string())
            .or_default()
            .queued
            .push_back(Scripted { latency, result });
    }

    /// Calls to `address` that started, including cancelled ones.
    #[must_use]
    pub fn calls(&self, address: &str) -> usize {
        self.scripts.lock().get(address).map_or(0, |script| script.started)
    }

    /// Calls to `address` that ran to completion.
    #[must_use]
    pub fn completed(&self, address: &str) -> usize {
        self.scripts.lock().get(address).map_or(0, |script| script.completed)
    }

    /// Combined requests received by `address`.
    #[must_use]
    pub fn batches(&self, address: &str) -> usize {
        self.scripts.lock().get(address).map_or(0, |script| script.batches)
    }

    /// Methods called on `address`, in order.
    #[must_use]
    pub fn methods(&self, address: &str) -> Vec<String> {
        self.scripts.lock().get(address).map(|script| script.methods.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    fn begin(&self, address: &str, method: &str, params: &Value) -> Scripted {
        self.total.fetch_add(1, Ordering::SeqCst);
        let mut scripts = self.scripts.lock();
        let script = scripts.entry(address.to_string()).or_default();
        script.started += 1;
        script.methods.push(method.to_string());

        if let Some(next) = script.queued.pop_front() {
            return next;
        }
        let result = match &script.fallback {
            Some(handler) => handler(method, params),
            None => Ok(json!({ "endpoint": address, "method": method, "params": params })),
        };
        Scripted { latency: script.latency, result }
    }

    fn finish(&self, address: &str) {
        if let Some(script) = self.scripts.lock().get_mut(address) {
            script.completed += 1;
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(
        &self,
        address: &str,
        method: &str,
        params: &Value,
        _timeout: Duration,
    ) -> Result<Value, TransportError> {
        let Scripted { latency, result } = self.begin(address, method, params);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.finish(address);
        result
    }

    async fn execute_batch(
        &self,
        address: &str,
        calls: &[TransportCall],
        _timeout: Duration,
    ) -> Result<Vec<Result<Value, TransportError>>, TransportError> {
        self.scripts.lock().entry(address.to_string()).or_default().batches += 1;

        let answers: Vec<Scripted> =
            calls.iter().map(|call| self.begin(address, &call.method, &call.params)).collect();
        let latency = answers.iter().map(|answer| answer.latency).max().unwrap_or_default();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        for _ in &answers {
            self.finish(address);
        }
        Ok(answers.into_iter().map(|answer| answer.result).collect())
    }
}

impl std::fmt::Debug for ScriptedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedTransport").field("total_calls", &self.total_calls()).finish()
    }
}
