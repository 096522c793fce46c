//! Cross-crate behaviour of the detection service against mock collaborators.

use std::sync::Arc;
use std::time::Duration;

use safari_foundation::{CircuitState, DetectionService, HealthStatus, SoftmaxHead};
use safari_kernel::config::DetectionServiceConfig;
use safari_kernel::{
    DetectionError, DetectionRequest, ManualClock, OperationKind, SessionId, Tensor, UNKNOWN_LABEL,
};
use safari_testing::{
    BackendMode, FixedHead, MockBackend, ScriptedExtractor, TEST_LAYER_SIZE, UnreachableCache,
    engine_with, test_config,
};

struct Harness {
    service: DetectionService,
    backend: Arc<MockBackend>,
    extractor: Arc<ScriptedExtractor>,
    clock: Arc<ManualClock>,
}

fn harness_with(config: DetectionServiceConfig, extractor: ScriptedExtractor) -> Harness {
    let backend = Arc::new(MockBackend::new(TEST_LAYER_SIZE));
    let extractor = Arc::new(extractor);
    let clock = Arc::new(ManualClock::new(1_000));
    let labels: Vec<String> = config.species.labels.clone();
    let head = SoftmaxHead::new(labels, TEST_LAYER_SIZE, 3).unwrap();

    let service = DetectionService::builder(config)
        .clock(clock.clone())
        .feature_extractor(extractor.clone())
        .species_model(engine_with(backend.clone()), Arc::new(head))
        .build()
        .unwrap();

    Harness {
        service,
        backend,
        extractor,
        clock,
    }
}

fn harness() -> Harness {
    let mut config = test_config();
    config.model.confidence_threshold = 0.0;
    harness_with(config, ScriptedExtractor::new(TEST_LAYER_SIZE))
}

fn species(value: f32) -> DetectionRequest {
    DetectionRequest::species(Tensor::from_vec(vec![value; 4]))
}

#[tokio::test]
async fn test_breaker_opens_fails_fast_and_recovers() {
    let h = harness();
    h.backend.set_mode(BackendMode::NaN);

    for i in 0..5 {
        let err = h.service.detect(species(i as f32)).await.unwrap_err();
        assert!(matches!(err, DetectionError::ModelInferenceError(_)), "{err:?}");
    }
    assert_eq!(h.service.circuit_state(), CircuitState::Open);

    // Rejected without touching extractor or backend
    let (extracted, forwarded) = (h.extractor.call_count(), h.backend.call_count());
    let err = h.service.detect(species(9.0)).await.unwrap_err();
    assert!(matches!(err, DetectionError::ServiceUnavailable { .. }));
    assert_eq!(h.extractor.call_count(), extracted);
    assert_eq!(h.backend.call_count(), forwarded);

    h.clock.advance(Duration::from_secs(30));
    assert_eq!(h.service.circuit_state(), CircuitState::HalfOpen);

    h.backend.set_mode(BackendMode::Identity);
    h.service.detect(species(10.0)).await.unwrap();
    assert_eq!(h.service.circuit_state(), CircuitState::Closed);

    let metrics = h.service.circuit_metrics();
    assert_eq!(metrics.total_failures, 5);
    assert_eq!(metrics.total_rejected, 1);
}

#[tokio::test]
async fn test_persistent_instability_fails_after_one_retry() {
    let h = harness();
    h.backend.set_mode(BackendMode::NaN);

    let err = h.service.detect(species(1.0)).await.unwrap_err();
    assert!(matches!(err, DetectionError::ModelInferenceError(_)));
    // one propagate plus one retry after the reset
    assert_eq!(h.backend.call_count(), 2);
    assert_eq!(h.service.circuit_metrics().total_failures, 1);

    h.backend.set_mode(BackendMode::Identity);
    let ok = h.service.detect(species(1.0)).await.unwrap();
    assert!(!ok.metrics.retried);
    assert!(!ok.cached);
}

#[tokio::test]
async fn test_cache_hit_skips_compute() {
    let h = harness();
    let first = h.service.detect(species(0.5)).await.unwrap();
    let second = h.service.detect(species(0.5)).await.unwrap();

    assert!(!first.cached);
    assert!(second.cached);
    assert_eq!(first.label, second.label);
    assert_eq!(h.extractor.call_count(), 1);
    assert_eq!(h.service.performance().cache.hits, 1);
}

#[tokio::test]
async fn test_unknown_results_are_not_cached_but_count_as_success() {
    let backend = Arc::new(MockBackend::new(TEST_LAYER_SIZE));
    let extractor = Arc::new(ScriptedExtractor::new(TEST_LAYER_SIZE));
    let service = DetectionService::builder(test_config())
        .clock(Arc::new(ManualClock::new(0)))
        .feature_extractor(extractor.clone())
        .species_model(
            engine_with(backend),
            Arc::new(FixedHead::new(&["lion", "zebra"], &[0.55, 0.45])),
        )
        .build()
        .unwrap();

    for _ in 0..2 {
        let result = service.detect(species(0.3)).await.unwrap();
        assert_eq!(result.label, UNKNOWN_LABEL);
        assert!(!result.cached);
    }
    assert_eq!(extractor.call_count(), 2);
    assert_eq!(service.circuit_metrics().total_successes, 2);
}

#[tokio::test]
async fn test_rate_limit_rejects_before_compute() {
    let mut config = test_config();
    config.model.confidence_threshold = 0.0;
    config.cache.enabled = false;
    config
        .rate_limits
        .operations
        .insert("detect_species".into(), safari_kernel::config::RateLimitRule::new(3, 60));
    let h = harness_with(config, ScriptedExtractor::new(TEST_LAYER_SIZE));

    for i in 0..3 {
        h.service.detect(species(i as f32)).await.unwrap();
    }
    let err = h.service.detect(species(4.0)).await.unwrap_err();
    assert!(matches!(err, DetectionError::RateLimitExceeded { limit: 3, .. }));
    assert_eq!(h.extractor.call_count(), 3);

    h.clock.advance(Duration::from_secs(60));
    h.service.detect(species(5.0)).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_batch_preserves_order_under_out_of_order_completion() {
    let mut config = test_config();
    config.model.confidence_threshold = 0.0;
    config.model.batch_size = 32;
    // item i finishes after (32 - i) ms: last in, first out
    let delays = (0..32).map(|i| Duration::from_millis(32 - i)).collect();
    let h = harness_with(config, ScriptedExtractor::new(TEST_LAYER_SIZE).with_delays(delays));

    let items: Vec<DetectionRequest> = (0..32)
        .map(|i| species(i as f32).with_correlation_id(format!("item-{i}")))
        .collect();
    let report = h
        .service
        .batch_detect(items, OperationKind::Species, 32)
        .await
        .unwrap();

    let order = h.extractor.completion_order();
    assert_ne!(order, (0..32).collect::<Vec<_>>(), "items should complete out of order");

    assert_eq!(report.batch_size, 32);
    assert_eq!(report.successful_detections, 32);
    for (i, item) in report.results.iter().enumerate() {
        assert_eq!(item.index(), i);
        assert_eq!(item.result().unwrap().correlation_id, format!("item-{i}"));
    }
}

#[tokio::test]
async fn test_oversized_batch_is_rejected_wholesale() {
    let h = harness();
    let items: Vec<DetectionRequest> = (0..33).map(|i| species(i as f32)).collect();
    let err = h
        .service
        .batch_detect(items, OperationKind::Species, 32)
        .await
        .unwrap_err();
    assert_eq!(err, DetectionError::BatchTooLarge { size: 33, max: 32 });
    assert_eq!(h.extractor.call_count(), 0);
}

const STEP_MS: u64 = 7;
const STREAM: [f32; 4] = [0.1, 0.7, -0.4, 0.3];

fn session_service(clock: Arc<ManualClock>) -> DetectionService {
    let mut config = test_config();
    config.model.confidence_threshold = 0.0;
    DetectionService::builder(config).clock(clock).build().unwrap()
}

/// Feed step `k` of the stream to `session` at `base_ms + k * STEP_MS`.
async fn stream_step(
    service: &DetectionService,
    clock: &ManualClock,
    session: SessionId,
    base_ms: u64,
    k: usize,
) -> (String, f32) {
    clock.set(base_ms + k as u64 * STEP_MS);
    let input = Tensor::from_vec(vec![STREAM[k]; 32]);
    let result = service
        .detect(DetectionRequest::species(input).with_session(session))
        .await
        .unwrap();
    assert!(!result.cached);
    (result.label, result.confidence)
}

#[tokio::test]
async fn test_sessions_are_isolated_under_any_interleaving() {
    const A_BASE: u64 = 10_000;
    const B_BASE: u64 = 20_000;

    // a,a,a,a then b,b,b,b
    let clock = Arc::new(ManualClock::new(0));
    let service = session_service(clock.clone());
    let a = service.open_session(OperationKind::Species).unwrap();
    let b = service.open_session(OperationKind::Species).unwrap();
    let mut sequential_a = Vec::new();
    let mut sequential_b = Vec::new();
    for k in 0..STREAM.len() {
        sequential_a.push(stream_step(&service, &clock, a, A_BASE, k).await);
    }
    for k in 0..STREAM.len() {
        sequential_b.push(stream_step(&service, &clock, b, B_BASE, k).await);
    }

    // a,b,a,b,... on a fresh service with the same weights
    let clock = Arc::new(ManualClock::new(0));
    let service = session_service(clock.clone());
    let a = service.open_session(OperationKind::Species).unwrap();
    let b = service.open_session(OperationKind::Species).unwrap();
    let mut alternating_a = Vec::new();
    let mut alternating_b = Vec::new();
    for k in 0..STREAM.len() {
        alternating_a.push(stream_step(&service, &clock, a, A_BASE, k).await);
        alternating_b.push(stream_step(&service, &clock, b, B_BASE, k).await);
    }

    // the recurrent state actually moves between steps
    assert!(
        sequential_a.windows(2).all(|w| w[0].1 != w[1].1),
        "{sequential_a:?}"
    );
    assert_eq!(sequential_a, sequential_b);
    assert_eq!(alternating_a, sequential_a);
    assert_eq!(alternating_b, sequential_b);

    service.close_session(a).unwrap();
    let err = service
        .detect(DetectionRequest::species(Tensor::from_vec(vec![0.1; 32])).with_session(a))
        .await
        .unwrap_err();
    assert!(matches!(err, DetectionError::SessionNotFound(_)));
    assert_eq!(service.session_count(), 1);
}

#[tokio::test]
async fn test_shared_session_carries_state_across_streams() {
    let clock = Arc::new(ManualClock::new(0));
    let service = session_service(clock.clone());
    let isolated = service.open_session(OperationKind::Species).unwrap();
    let mut expected = Vec::new();
    for k in 0..STREAM.len() {
        expected.push(stream_step(&service, &clock, isolated, 10_000, k).await);
    }

    // both streams routed into one buffer
    let shared = service.open_session(OperationKind::Species).unwrap();
    let mut first = Vec::new();
    let mut second = Vec::new();
    for k in 0..STREAM.len() {
        first.push(stream_step(&service, &clock, shared, 10_000, k).await);
        second.push(stream_step(&service, &clock, shared, 20_000, k).await);
    }

    assert_eq!(first[0], expected[0]);
    assert_ne!(second, expected);
    assert_ne!(first, expected);
}

#[tokio::test]
async fn test_unknown_session_never_reaches_breaker() {
    let h = harness();
    let err = h
        .service
        .detect(species(1.0).with_session(SessionId::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, DetectionError::SessionNotFound(_)));
    assert_eq!(h.service.circuit_metrics().total_requests, 0);
    assert_eq!(h.extractor.call_count(), 0);
}

#[tokio::test]
async fn test_unreachable_cache_degrades_but_serves() {
    let mut config = test_config();
    config.model.confidence_threshold = 0.0;
    let service = DetectionService::builder(config)
        .clock(Arc::new(ManualClock::new(0)))
        .cache_store(Arc::new(UnreachableCache))
        .build()
        .unwrap();

    let result = service.detect(species(0.2)).await.unwrap();
    assert!(!result.cached);

    let health = service.health_check().await;
    assert_eq!(health.status, HealthStatus::Degraded);
    assert!(!health.cache);
}

#[tokio::test]
async fn test_failing_model_probe_is_unhealthy() {
    let h = harness();
    h.backend.set_mode(BackendMode::Error);
    let health = h.service.health_check().await;
    assert_eq!(health.status, HealthStatus::Unhealthy);
    assert!(!health.models.species.available);
    assert!(health.models.fossil.available);
}
