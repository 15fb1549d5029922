//! Property tests for delayed-task promotion.

use std::sync::Arc;
use std::time::Duration;

use mdm_dispatch::TaskQueue;
use mdm_platform::ManualClock;
use parking_lot::Mutex;
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_promotion_is_deadline_ascending(delays in prop::collection::vec(0u64..1_000, 1..40)) {
        let clock = ManualClock::new(0);
        let queue = TaskQueue::new(64, Arc::new(clock.clone()));
        let fired = Arc::new(Mutex::new(Vec::new()));
        for delay in &delays {
            let fired = Arc::clone(&fired);
            let delay = *delay;
            queue.enqueue_delayed(move || fired.lock().push(delay), Duration::from_millis(delay));
        }
        clock.advance(1_000);
        prop_assert_eq!(queue.process(), delays.len());

        let fired = fired.lock().clone();
        let mut sorted = delays.clone();
        sorted.sort_unstable();
        prop_assert_eq!(fired, sorted);
    }

    #[test]
    fn prop_nothing_fires_early(delays in prop::collection::vec(1u64..500, 1..20), now in 0u64..500) {
        let clock = ManualClock::new(0);
        let queue = TaskQueue::new(32, Arc::new(clock.clone()));
        for delay in &delays {
            queue.enqueue_delayed(|| {}, Duration::from_millis(*delay));
        }
        clock.set(now);
        let due = delays.iter().filter(|d| **d <= now).count();
        prop_assert_eq!(queue.process(), due);
        prop_assert_eq!(queue.delayed_len(), delays.len() - due);
    }
}
