//! Config file → registry → failover → privacy, wired the way the runtime wires them.

use std::sync::Arc;
use std::time::Duration;

use coordination::{
    EngineConfig, FailoverEngine, FailoverReason, HealthState, JsonFileUsageRepository, Locality,
    PrivacyLevel, PrivacyProcessor, ProviderRegistry, SharedProviderRegistry,
};

const CONFIG: &str = r#"
[[providers]]
id = "ollama"
priority = 1
models = ["llava:13b", "llava:7b"]
default_model = "llava:13b"
local = true
capabilities = ["vision", "local_inference"]

[[providers]]
id = "openai"
priority = 2
models = ["gpt-4o", "gpt-4o-mini"]
default_model = "gpt-4o"
capabilities = ["vision", "metadata_input"]

[compatibility]
"gpt-4o" = ["llava:13b"]

[privacy]
default_level = "sanitized"
zones = { bedroom = "local", office = "metadata_only" }
"#;

fn registry(config: &EngineConfig) -> SharedProviderRegistry {
    ProviderRegistry::new(
        config.catalog(),
        config.circuit_breaker.clone(),
        config.scoring.clone(),
    )
    .shared()
}

fn engine(config: &EngineConfig, registry: SharedProviderRegistry) -> FailoverEngine {
    FailoverEngine::new(config.failover.clone(), config.compatibility.clone(), registry)
}

#[test]
fn failover_sequence_follows_configured_phases() {
    let config = EngineConfig::from_toml_str(CONFIG).unwrap();
    let failover = engine(&config, registry(&config));

    assert_eq!(
        failover.primary(Locality::Any),
        Some(("ollama".to_string(), "llava:13b".to_string()))
    );

    let steps = failover.sequence("openai", "gpt-4o", Locality::Any);
    let summary: Vec<(&str, &str, FailoverReason)> = steps
        .iter()
        .map(|s| (s.provider.as_str(), s.model.as_str(), s.reason))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("openai", "gpt-4o-mini", FailoverReason::SameProviderFallback),
            ("ollama", "llava:13b", FailoverReason::CompatibleModelFallback),
        ]
    );

    // Remote models drop out entirely for on-device jobs.
    let local = failover.sequence("openai", "gpt-4o", Locality::LocalOnly);
    assert!(local.iter().all(|s| s.provider == "ollama"));
    assert_eq!(local.len(), 1);
}

#[test]
fn open_circuit_moves_primary_to_next_provider() {
    let config = EngineConfig::from_toml_str(CONFIG).unwrap();
    let registry = registry(&config);
    let failover = engine(&config, registry.clone());

    for _ in 0..config.circuit_breaker.failure_threshold {
        registry.record_attempt("ollama", Duration::from_millis(200), false);
    }

    assert_eq!(registry.get_state("ollama").unwrap().state, HealthState::CircuitOpen);
    assert!(!registry.is_available("ollama"));
    assert_eq!(
        failover.primary(Locality::Any),
        Some(("openai".to_string(), "gpt-4o".to_string()))
    );
    // No local provider left.
    assert_eq!(failover.primary(Locality::LocalOnly), None);

    let status = registry.snapshot_all();
    assert!(!status["ollama"].available);
    assert_eq!(status["ollama"].usage.failures, u64::from(config.circuit_breaker.failure_threshold));
}

#[test]
fn usage_counters_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("usage.json");
    let config = EngineConfig::from_toml_str(CONFIG).unwrap();

    let first = ProviderRegistry::new(
        config.catalog(),
        config.circuit_breaker.clone(),
        config.scoring.clone(),
    )
    .with_usage_repository(Arc::new(JsonFileUsageRepository::new(&path)));
    first.record_attempt("openai", Duration::from_millis(800), true);
    first.record_attempt("openai", Duration::from_millis(900), false);
    assert!(first.persist_usage().unwrap());

    let second = ProviderRegistry::new(
        config.catalog(),
        config.circuit_breaker.clone(),
        config.scoring.clone(),
    )
    .with_usage_repository(Arc::new(JsonFileUsageRepository::new(&path)));
    assert_eq!(second.load_usage().unwrap(), 2);

    let usage = second.usage_snapshot();
    assert_eq!(usage["openai"].requests, 2);
    assert_eq!(usage["openai"].successes, 1);
    assert_eq!(usage["openai"].failures, 1);
    assert_eq!(usage["ollama"].requests, 0);
    // Breaker state is not persisted.
    assert_eq!(second.get_state("openai").unwrap().failure_count, 0);
}

#[test]
fn zone_overrides_pick_privacy_tier() {
    let config = EngineConfig::from_toml_str(CONFIG).unwrap();
    let privacy = PrivacyProcessor::new(config.privacy.clone());

    assert_eq!(privacy.level_for("bedroom", None), PrivacyLevel::Local);
    assert_eq!(privacy.level_for("office", None), PrivacyLevel::MetadataOnly);
    assert_eq!(privacy.level_for("kitchen", None), PrivacyLevel::Sanitized);
    assert_eq!(privacy.level_for("bedroom", Some(PrivacyLevel::Raw)), PrivacyLevel::Raw);
    assert_eq!(PrivacyLevel::Local.locality(), Locality::LocalOnly);
    assert!(privacy.remote_health_checks_allowed());
}
