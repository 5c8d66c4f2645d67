use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current UNIX timestamp in seconds.
///
/// A clock set before the epoch yields 0 rather than panicking.
pub fn current_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn epoch_secs() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
    }

    #[test]
    fn test_block_timestamp_is_whole_seconds() {
        let before = epoch_secs();
        let stamp = current_time();
        let after = epoch_secs();
        assert!((before..=after).contains(&stamp));
        // A millisecond clock would land far past this bound.
        assert!(stamp < 1 << 40);
    }

    #[test]
    fn test_fits_ledger_timestamp_field() {
        let stamp = current_time();
        let stored = u64::from_le_bytes(stamp.to_le_bytes());
        assert_eq!(stored, stamp);
        assert!(stamp > 1_600_000_000, "clock reads before 2020: {}", stamp);
    }
}
