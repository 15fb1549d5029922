//! Cross-thread behaviour of the queue and broadcaster.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use mdm_dispatch::{EventBroadcaster, TaskQueue};
use mdm_platform::{ManualClock, SystemClock};
use parking_lot::Mutex;

#[test]
fn blocking_enqueue_applies_backpressure() -> Result<(), String> {
    let queue = Arc::new(TaskQueue::new(1, Arc::new(SystemClock::new())));
    // Claim the consumer role on this thread.
    assert_eq!(queue.process(), 0);

    let counter = Arc::new(AtomicUsize::new(0));
    let producer = {
        let queue = Arc::clone(&queue);
        let counter = Arc::clone(&counter);
        thread::spawn(move || {
            for _ in 0..10 {
                let counter = Arc::clone(&counter);
                queue
                    .enqueue(move || { counter.fetch_add(1, Ordering::SeqCst); }, true)
                    .map_err(|e| e.to_string())?;
            }
            Ok::<(), String>(())
        })
    };

    let mut executed = 0;
    while executed < 10 {
        executed += queue.run_once(Duration::from_millis(50));
    }
    producer
        .join()
        .map_err(|e| format!("producer panicked: {e:?}"))??;
    assert_eq!(counter.load(Ordering::SeqCst), 10);
    Ok(())
}

#[test]
fn delayed_tasks_promote_in_deadline_order() {
    let clock = ManualClock::new(0);
    let queue = TaskQueue::new(8, Arc::new(clock.clone()));
    let order = Arc::new(Mutex::new(Vec::new()));
    for (label, delay) in [("c", 30u64), ("a", 10), ("b", 20)] {
        let order = Arc::clone(&order);
        queue.enqueue_delayed(move || order.lock().push(label), Duration::from_millis(delay));
    }
    clock.advance(25);
    assert_eq!(queue.process(), 2);
    clock.advance(10);
    assert_eq!(queue.process(), 1);
    assert_eq!(*order.lock(), vec!["a", "b", "c"]);
}

#[test]
fn due_tasks_that_do_not_fit_stay_delayed() {
    let clock = ManualClock::new(0);
    let queue = TaskQueue::new(2, Arc::new(clock.clone()));
    let order = Arc::new(Mutex::new(Vec::new()));
    for i in 0..3u32 {
        let order = Arc::clone(&order);
        queue.enqueue_delayed(move || order.lock().push(i), Duration::from_millis(u64::from(i)));
    }
    clock.advance(10);
    assert_eq!(queue.process(), 2);
    assert_eq!(queue.delayed_len(), 1);
    assert_eq!(queue.process(), 1);
    assert_eq!(*order.lock(), vec![0, 1, 2]);
}

#[test]
fn tasks_enqueued_while_draining_run_in_same_pass() {
    let queue = Arc::new(TaskQueue::new(4, Arc::new(SystemClock::new())));
    let hits = Arc::new(AtomicUsize::new(0));
    let (q, h) = (Arc::clone(&queue), Arc::clone(&hits));
    let enqueued = queue.enqueue(
        move || {
            h.fetch_add(1, Ordering::SeqCst);
            let h2 = Arc::clone(&h);
            // Blocking from inside a task must not deadlock.
            let _queued = q.enqueue(move || { h2.fetch_add(1, Ordering::SeqCst); }, true);
        },
        false,
    );
    assert!(enqueued.is_ok());
    assert_eq!(queue.process(), 2);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[test]
fn concurrent_subscribers_all_register() {
    let broadcaster = Arc::new(EventBroadcaster::<usize>::new());
    let total = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let broadcaster = Arc::clone(&broadcaster);
            let total = Arc::clone(&total);
            thread::spawn(move || {
                for _ in 0..25 {
                    let total = Arc::clone(&total);
                    broadcaster.subscribe(move |v| {
                        total.fetch_add(*v, Ordering::SeqCst);
                    });
                }
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.join().is_ok());
    }
    assert_eq!(broadcaster.len(), 200);
    broadcaster.publish(&1);
    assert_eq!(total.load(Ordering::SeqCst), 200);
}

#[test]
fn publish_via_runs_on_dispatch_thread() {
    let queue = TaskQueue::new(4, Arc::new(SystemClock::new()));
    assert_eq!(queue.process(), 0);
    let dispatch_thread = thread::current().id();

    let broadcaster = Arc::new(EventBroadcaster::<bool>::new());
    let observed = Arc::new(Mutex::new(None));
    {
        let observed = Arc::clone(&observed);
        broadcaster.subscribe(move |online| {
            *observed.lock() = Some((*online, thread::current().id()));
        });
    }

    thread::scope(|s| {
        s.spawn(|| {
            assert!(broadcaster.publish_via(&queue, true, true).is_ok());
        });
    });
    assert!(observed.lock().is_none());
    assert_eq!(queue.process(), 1);
    assert_eq!(*observed.lock(), Some((true, dispatch_thread)));
}
