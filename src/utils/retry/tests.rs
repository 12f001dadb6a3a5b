use super::*;
use backon::BackoffBuilder;

fn fast(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        initial_interval_ms: 100,
        multiplier: 2.0,
        max_interval_ms: 500,
        max_attempts,
    }
}

#[test]
fn test_default_config() {
    let config = RetryConfig::default();
    assert_eq!(config.initial_interval(), Duration::from_secs(1));
    assert!((config.multiplier - 2.0).abs() < f64::EPSILON);
    assert_eq!(config.max_interval(), Duration::from_secs(120));
    assert_eq!(config.max_attempts, 100);
    assert!(config.validate().is_ok());
}

#[test]
fn test_exponential_backoff() {
    let config = RetryConfig {
        max_interval_ms: 10_000,
        ..fast(5)
    };

    assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
    assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
    assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
    assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
    assert_eq!(config.delay_for_attempt(4), Duration::from_millis(800));
}

#[test]
fn test_delay_capped_at_max() {
    let config = fast(10);

    // 100 * 2^3 = 800, should be capped at 500
    assert_eq!(config.delay_for_attempt(4), Duration::from_millis(500));
    assert_eq!(config.delay_for_attempt(100), Duration::from_millis(500));
}

#[test]
fn test_default_reaches_cap_after_eight_retries() {
    let config = RetryConfig::default();
    assert_eq!(config.delay_for_attempt(7), Duration::from_secs(64));
    assert_eq!(config.delay_for_attempt(8), Duration::from_secs(120));
}

#[test]
fn test_backoff_bounds_attempts_and_tracks_delay_for_attempt() {
    let config = fast(5);
    let delays: Vec<Duration> = config.backoff().build().collect();

    assert_eq!(delays.len(), (config.max_attempts - 1) as usize);
    for (i, delay) in delays.iter().enumerate() {
        let expected = config.delay_for_attempt(i as u32 + 1);
        let drift = if *delay > expected {
            *delay - expected
        } else {
            expected - *delay
        };
        assert!(drift <= Duration::from_micros(1), "delay {i}: {delay:?} vs {expected:?}");
    }
}

#[test]
fn test_single_attempt_has_no_delays() {
    assert_eq!(fast(1).backoff().build().count(), 0);
}

#[test]
fn test_validate_rejects_bad_values() {
    assert!(matches!(fast(0).validate(), Err(ConfigError::Invalid(_))));

    let shrinking = RetryConfig {
        multiplier: 0.5,
        ..fast(3)
    };
    assert!(shrinking.validate().is_err());

    let inverted = RetryConfig {
        initial_interval_ms: 1000,
        max_interval_ms: 10,
        ..fast(3)
    };
    assert!(inverted.validate().is_err());
}
