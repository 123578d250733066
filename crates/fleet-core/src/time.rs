//! Wall-clock helpers. Every persisted timestamp is epoch milliseconds.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as epoch milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_are_past_2020() {
        assert!(epoch_millis() > 1_600_000_000_000);
    }
}
