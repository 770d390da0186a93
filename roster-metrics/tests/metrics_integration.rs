//! Integration tests for dispatch metrics
//!
//! Instruments are created against the global no-op meter provider, so these
//! verify the locally tracked values and that recording never panics.
#![allow(clippy::expect_used, clippy::unwrap_used)]

use roster_metrics::{DispatchMetrics, MetricsConfig, init_metrics, is_enabled, try_metrics};

#[test]
fn test_queue_size_gauge_tracks_latest_value() {
    let metrics = DispatchMetrics::new().expect("Failed to create dispatch metrics");
    assert_eq!(metrics.queue_size(), 0);

    metrics.set_queue_size(42);
    assert_eq!(metrics.queue_size(), 42);

    metrics.set_queue_size(7);
    assert_eq!(metrics.queue_size(), 7);
}

#[test]
fn test_available_tokens_per_channel() {
    let metrics = DispatchMetrics::new().expect("Failed to create dispatch metrics");
    assert_eq!(metrics.available_tokens("sms"), None);

    metrics.set_available_tokens("sms", 480.5);
    metrics.set_available_tokens("messenger", 0.0);

    assert_eq!(metrics.available_tokens("sms"), Some(480.5));
    assert_eq!(metrics.available_tokens("messenger"), Some(0.0));
}

#[test]
fn test_recording_does_not_panic() {
    let metrics = DispatchMetrics::new().expect("Failed to create dispatch metrics");

    metrics.record_outcome("primary_success", "messenger");
    metrics.record_outcome("queued", "messenger");
    metrics.record_channel_attempt("sms", true, 0.120);
    metrics.record_channel_attempt("messenger", false, 10.0);
    metrics.record_dropped("expired", 3);
}

#[test]
fn test_disabled_metrics_are_a_no_op() {
    let config = MetricsConfig {
        enabled: false,
        ..MetricsConfig::default()
    };

    init_metrics(&config).expect("disabled init never fails");
    assert!(!is_enabled());
    assert!(try_metrics().is_none());
}
