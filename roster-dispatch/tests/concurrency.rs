//! The limiter, queue and tracker under contention
#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::{collections::BTreeMap, sync::atomic::{AtomicUsize, Ordering}};

use roster_dispatch::{
    Channel, ChannelRateLimit, MessageQueue, Outcome, QueueItem, RateLimitConfig, RateLimiter,
    SendRequest, SendTracker, TokenBucket,
};

#[test]
fn test_bucket_never_grants_more_than_capacity() {
    let bucket = TokenBucket::new(400, 0.0);
    let granted = AtomicUsize::new(0);

    std::thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                for _ in 0..100 {
                    if bucket.try_consume(1) {
                        granted.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }
    });

    assert_eq!(granted.load(Ordering::Relaxed), 400);
    assert!(bucket.available_tokens().abs() < f64::EPSILON);
}

#[test]
fn test_channels_are_independent_under_load() {
    let limiter = RateLimiter::new(RateLimitConfig {
        channel_limits: BTreeMap::from([
            (
                Channel::Messenger,
                ChannelRateLimit {
                    capacity: 100,
                    refill_per_minute: 0.0,
                },
            ),
            (
                Channel::Sms,
                ChannelRateLimit {
                    capacity: 500,
                    refill_per_minute: 0.0,
                },
            ),
        ]),
    });
    let messenger = AtomicUsize::new(0);
    let sms = AtomicUsize::new(0);

    std::thread::scope(|s| {
        for t in 0..8 {
            let (limiter, messenger, sms) = (&limiter, &messenger, &sms);
            s.spawn(move || {
                let (channel, granted) = if t % 2 == 0 {
                    (Channel::Messenger, messenger)
                } else {
                    (Channel::Sms, sms)
                };
                for _ in 0..200 {
                    if limiter.try_acquire(channel) {
                        granted.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }
    });

    assert_eq!(messenger.load(Ordering::Relaxed), 100);
    assert_eq!(sms.load(Ordering::Relaxed), 500);
}

#[test]
fn test_producers_and_consumers_share_the_queue() {
    let queue = MessageQueue::new(1_000);
    let consumed = AtomicUsize::new(0);

    std::thread::scope(|s| {
        for t in 0..4 {
            let queue = &queue;
            s.spawn(move || {
                for n in 0..200 {
                    let request = SendRequest::new(
                        "Member",
                        "+447700900123",
                        format!("{t}-{n}"),
                        Channel::Messenger,
                    );
                    assert!(queue.enqueue(QueueItem::from_request(&request)).is_queued());
                }
            });
        }
        for _ in 0..2 {
            let (queue, consumed) = (&queue, &consumed);
            s.spawn(move || {
                for _ in 0..100 {
                    consumed.fetch_add(queue.dequeue_batch(3).len(), Ordering::Relaxed);
                }
            });
        }
    });

    assert_eq!(consumed.load(Ordering::Relaxed) + queue.len(), 800);
}

#[test]
fn test_tracker_counts_are_exact() {
    let tracker = SendTracker::new();

    std::thread::scope(|s| {
        for t in 0..8 {
            let tracker = &tracker;
            s.spawn(move || {
                for n in 0..250 {
                    let outcome = if n % 5 == 0 {
                        Outcome::FallbackSuccess
                    } else {
                        Outcome::PrimarySuccess
                    };
                    tracker.record_result(outcome, Channel::Messenger);
                    tracker.record_job_result(if t % 2 == 0 { "even" } else { "odd" }, outcome);
                }
            });
        }
    });

    let stats = tracker.statistics();
    assert_eq!(stats.total, 2_000);
    assert_eq!(stats.count(Outcome::FallbackSuccess), 400);
    assert!((stats.fallback_rate - 20.0).abs() < f64::EPSILON);
    assert!((stats.success_rate - 100.0).abs() < f64::EPSILON);

    let even = tracker.job_statistics("even").expect("job recorded");
    assert_eq!(even.total, 1_000);
    assert_eq!(tracker.job_ids(), vec!["even".to_string(), "odd".to_string()]);
}
