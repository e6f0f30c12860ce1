//! Shared in-process fakes for the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use coordination::{
    Capability, CapabilitySet, CircuitBreakerConfig, CompatibilityMap, FailoverEngine, FailoverRules,
    ProviderCatalog, ProviderRegistry, ProviderSpec, ScoringConfig, SharedProviderRegistry,
};
use tidywatch_agents::{AIService, Provider, ProviderError, ProviderRequest, ProviderResponse, ProviderSet};

// ── Scripted provider ──

/// What a fake does on one call.
#[derive(Debug, Clone)]
pub enum Behavior {
    Reply(String),
    /// Connection-level failure; counts against the provider.
    Fail,
    /// Never answers; relies on the dispatcher timeout.
    Hang,
    /// Plugin bug.
    Panic,
}

/// How a fake answers health checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Failing,
    Hang,
    Panic,
}

pub struct FakeProvider {
    id: String,
    capabilities: CapabilitySet,
    script: Mutex<VecDeque<Behavior>>,
    fallback: Behavior,
    delay: Duration,
    health: Health,
    calls: AtomicUsize,
    probes: AtomicUsize,
    requests: Mutex<Vec<(String, ProviderRequest)>>,
}

impl FakeProvider {
    /// Answers every call with `fallback` once the script runs out.
    pub fn new(id: &str, fallback: Behavior) -> Self {
        Self {
            id: id.to_string(),
            capabilities: CapabilitySet::from([Capability::Vision, Capability::MetadataInput]),
            script: Mutex::new(VecDeque::new()),
            fallback,
            delay: Duration::ZERO,
            health: Health::Healthy,
            calls: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(id: &str, text: impl Into<String>) -> Self {
        Self::new(id, Behavior::Reply(text.into()))
    }

    pub fn failing(id: &str) -> Self {
        Self::new(id, Behavior::Fail)
    }

    pub fn local(mut self) -> Self {
        self.capabilities.insert(Capability::LocalInference);
        self
    }

    pub fn without(mut self, capability: Capability) -> Self {
        self.capabilities.remove(&capability);
        self
    }

    pub fn with_script(self, steps: impl IntoIterator<Item = Behavior>) -> Self {
        self.script.lock().unwrap().extend(steps);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Health probes fail.
    pub fn unhealthy(self) -> Self {
        self.with_health(Health::Failing)
    }

    pub fn with_health(mut self, health: Health) -> Self {
        self.health = health;
        self
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// (model, request) for every call, in order.
    pub fn requests(&self) -> Vec<(String, ProviderRequest)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for FakeProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> CapabilitySet {
        self.capabilities.clone()
    }

    async fn analyze(&self, model: &str, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .push((model.to_string(), request.clone()));
        let behavior = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match behavior {
            Behavior::Reply(text) => Ok(ProviderResponse {
                text,
                model: model.to_string(),
                tokens_used: Some(42),
            }),
            Behavior::Fail => Err(ProviderError::Transport(format!("{} refused the connection", self.id))),
            Behavior::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            Behavior::Panic => panic!("{} plugin bug", self.id),
        }
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        match self.health {
            Health::Healthy => Ok(()),
            Health::Failing => Err(ProviderError::Http {
                status: 503,
                body: "unavailable".into(),
            }),
            Health::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            Health::Panic => panic!("{} health endpoint bug", self.id),
        }
    }
}

// ── Replies ──

/// A reply with `n` well-formed tasks.
pub fn tasks_reply(n: usize) -> String {
    let tasks: Vec<String> = (0..n)
        .map(|i| {
            format!(
                r#"{{"description":"Tidy item {i}","priority":{},"estimated_duration":5,"confidence":0.8}}"#,
                (i % 5) + 1
            )
        })
        .collect();
    format!(r#"{{"tasks":[{}],"confidence":0.8}}"#, tasks.join(","))
}

pub fn empty_reply() -> String {
    r#"{"tasks":[]}"#.to_string()
}

// ── Engine assembly ──

pub fn registry(specs: Vec<ProviderSpec>) -> SharedProviderRegistry {
    ProviderRegistry::new(
        ProviderCatalog::new(specs),
        CircuitBreakerConfig::default(),
        ScoringConfig::default(),
    )
    .shared()
}

pub fn service_with_rules(
    specs: Vec<ProviderSpec>,
    fakes: &[Arc<FakeProvider>],
    rules: FailoverRules,
    timeout: Duration,
) -> AIService {
    let registry = registry(specs);
    let mut providers = ProviderSet::new();
    for fake in fakes {
        providers.register(fake.clone());
    }
    let failover = FailoverEngine::new(rules, CompatibilityMap::new(), registry);
    AIService::new(providers, failover, timeout)
}

pub fn service(specs: Vec<ProviderSpec>, fakes: &[Arc<FakeProvider>]) -> AIService {
    service_with_rules(specs, fakes, FailoverRules::default(), Duration::from_secs(5))
}

// ── Images ──

/// A small solid-colour PNG.
pub fn png(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb(rgb));
    let mut out = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut out), image::ImageOutputFormat::Png)
        .unwrap();
    out
}
