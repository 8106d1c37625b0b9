//! Mock duration providers

use super::constants::*;
use async_trait::async_trait;
use duration_resolver::duration::{DurationCandidate, DurationProvider, ProviderError, TrackQuery};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, Semaphore};

/// Always answers with the same duration and records queried titles.
pub struct StaticProvider {
    name: &'static str,
    duration: i32,
    titles: Mutex<Vec<String>>,
}

impl StaticProvider {
    pub fn agreeing(name: &'static str) -> Arc<Self> {
        Self::with_duration(name, AGREED_DURATION)
    }

    pub fn with_duration(name: &'static str, duration: i32) -> Arc<Self> {
        Arc::new(Self {
            name,
            duration,
            titles: Mutex::new(Vec::new()),
        })
    }

    pub fn titles(&self) -> Vec<String> {
        self.titles.lock().unwrap().clone()
    }
}

#[async_trait]
impl DurationProvider for StaticProvider {
    fn name(&self) -> &str {
        self.name
    }

    async fn lookup(&self, query: &TrackQuery) -> Result<Vec<DurationCandidate>, ProviderError> {
        self.titles.lock().unwrap().push(query.title.clone());
        Ok(vec![DurationCandidate::new(self.duration, 0.95, 0.9)])
    }
}

/// Blocks its `gate_at`-th lookup until the test releases it.
pub struct GatedProvider {
    name: &'static str,
    gate_at: usize,
    calls: AtomicUsize,
    pub reached: Notify,
    release: Semaphore,
}

impl GatedProvider {
    pub fn new(name: &'static str, gate_at: usize) -> Arc<Self> {
        Arc::new(Self {
            name,
            gate_at,
            calls: AtomicUsize::new(0),
            reached: Notify::new(),
            release: Semaphore::new(0),
        })
    }

    pub fn release(&self) {
        self.release.add_permits(1);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DurationProvider for GatedProvider {
    fn name(&self) -> &str {
        self.name
    }

    async fn lookup(&self, _query: &TrackQuery) -> Result<Vec<DurationCandidate>, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.gate_at {
            self.reached.notify_one();
            if let Ok(permit) = self.release.acquire().await {
                permit.forget();
            }
        }
        Ok(vec![DurationCandidate::new(AGREED_DURATION, 0.95, 0.9)])
    }
}

/// Never answers.
pub struct HangingProvider {
    pub called: Notify,
}

impl HangingProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            called: Notify::new(),
        })
    }
}

#[async_trait]
impl DurationProvider for HangingProvider {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn lookup(&self, _query: &TrackQuery) -> Result<Vec<DurationCandidate>, ProviderError> {
        self.called.notify_one();
        futures::future::pending::<()>().await;
        Ok(vec![])
    }
}
