//! Property-based tests for the capture ring

use mdm_telemetry::{LogMessage, LogRing};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_ring_is_bounded_and_keeps_newest(
        capacity in 1usize..64,
        count in 0usize..256,
    ) {
        let mut ring = LogRing::new(capacity);
        for i in 0..count {
            ring.push(LogMessage::new(format!("{i}"), i as u64));
            prop_assert!(ring.len() <= capacity);
        }

        let kept: Vec<u64> = ring.iter().map(|m| m.captured_at_ms).collect();
        let start = count.saturating_sub(capacity) as u64;
        let expected: Vec<u64> = (start..count as u64).collect();
        prop_assert_eq!(kept, expected);
        prop_assert_eq!(ring.evicted(), start);
    }

    #[test]
    fn prop_take_all_preserves_order(texts in prop::collection::vec("[a-z]{0,12}", 0..50)) {
        let mut ring = LogRing::new(100);
        for (i, text) in texts.iter().enumerate() {
            ring.push(LogMessage::new(text.clone(), i as u64));
        }
        let taken: Vec<String> = ring.take_all().into_iter().map(|m| m.text).collect();
        prop_assert_eq!(taken, texts);
        prop_assert!(ring.is_empty());
    }
}
