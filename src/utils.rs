pub fn now_ts() -> f64 {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    now.as_secs_f64()
}

/// Wall-clock Unix time in milliseconds, used for envelope and metric timestamps.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub fn millis(d: std::time::Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clocks_agree_roughly() {
        let secs = now_ts();
        let ms = now_millis() as f64 / 1000.0;
        assert!((secs - ms).abs() < 5.0);
    }

    #[test]
    fn millis_saturates() {
        assert_eq!(millis(std::time::Duration::from_millis(1500)), 1500);
        assert_eq!(millis(std::time::Duration::MAX), u64::MAX);
    }
}
