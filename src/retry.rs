use std::time::Duration;

use rand::Rng;

/// Delay before the next replay after `failures` stopped passes in a row.
pub fn backoff(failures: u32) -> Duration {
    let base: u64 = if failures > 19 {
        2851203
    } else {
        (1.52f64.powi(failures as i32) * 1000f64).round() as u64
    };

    Duration::from_millis(base + rand::thread_rng().gen_range(0..1000))
}

#[test]
fn test_backoff() {
    let backoff = backoff(19).as_millis();

    assert!(backoff >= 2851203);
    assert!(backoff < 2852203);
}

#[test]
fn test_backoff_max() {
    let backoff = backoff(20).as_millis();

    assert!(backoff >= 2851203);
    assert!(backoff < 2852203);
}

#[test]
fn test_backoff_first_failure() {
    let backoff = backoff(0).as_millis();

    assert!(backoff >= 1000);
    assert!(backoff < 2000);
}
