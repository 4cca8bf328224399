use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current UNIX timestamp in milliseconds.
///
/// Client requests are stamped with this value; together with the client id
/// it forms the `requester:timestamp` round key. A clock set before the epoch
/// yields `0` rather than panicking.
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_time_non_zero() {
        assert!(current_time_millis() > 0);
    }

    #[test]
    fn test_current_time_monotonic() {
        let t1 = current_time_millis();
        let t2 = current_time_millis();
        assert!(t2 >= t1);
    }
}
