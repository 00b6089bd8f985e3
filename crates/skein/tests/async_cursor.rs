//! Awaiting cursor advances against producers on other threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use skein::prelude::*;
use skein_test_utils::{init_tracing, TestSeries};
use tokio::time::timeout;

const DEADLINE: Duration = Duration::from_secs(20);

fn value_for(key: u64) -> u64 {
    key * 2 + 1
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn producer_wakes_waiting_consumer() {
    init_tracing();
    let series = TestSeries::<u64, u64>::new(8);
    let mut cursor = series.async_cursor();

    let producer = {
        let series = Arc::clone(&series);
        tokio::spawn(async move {
            for key in 0..200u64 {
                series.append(key, value_for(key)).unwrap();
                if key % 16 == 0 {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            }
            series.complete();
        })
    };

    let seen = timeout(DEADLINE, async {
        let mut seen = 0u64;
        while cursor.move_next_async().await.unwrap() {
            let row = cursor.with_cursor(|c| (c.current_key(), c.current_value()));
            assert_eq!(row, (Some(seen), Some(value_for(seen))));
            seen += 1;
        }
        seen
    })
    .await
    .expect("consumer stalled");

    producer.await.unwrap();
    assert_eq!(seen, 200);
    let metrics = cursor.metrics();
    assert_eq!(metrics.sync_completions + metrics.async_completions, 201);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_completions_lose_nothing() {
    const ROWS: u64 = 5_000;
    let series = TestSeries::<u64, u64>::with_source(16, 256, skein::block::PooledSource);
    let mut cursor = series.async_cursor();
    let completer = cursor.completer();
    let stop = Arc::new(AtomicBool::new(false));

    let hammers: Vec<_> = (0..3)
        .map(|_| {
            let completer = Arc::clone(&completer);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    completer.try_complete();
                    thread::yield_now();
                }
            })
        })
        .collect();
    let writer = {
        let series = Arc::clone(&series);
        thread::spawn(move || {
            for key in 0..ROWS {
                series.append(key, value_for(key)).unwrap();
            }
            series.complete();
        })
    };

    let seen = timeout(DEADLINE, async {
        let mut seen = 0u64;
        while cursor.move_next_async().await.unwrap() {
            seen += 1;
        }
        seen
    })
    .await
    .expect("an update was lost");

    stop.store(true, Ordering::Relaxed);
    for hammer in hammers {
        hammer.join().unwrap();
    }
    writer.join().unwrap();
    assert_eq!(seen, ROWS);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn available_rows_never_arm() {
    let series = TestSeries::<u64, u64>::new(8);
    for key in 0..50 {
        series.append(key, value_for(key)).unwrap();
    }
    series.complete();
    let mut cursor = series.async_cursor();

    let mut seen = 0;
    while cursor.move_next_async().await.unwrap() {
        seen += 1;
    }
    assert_eq!(seen, 50);
    let metrics = cursor.metrics();
    assert_eq!(metrics.parks, 0);
    assert_eq!(metrics.async_completions, 0);
    assert_eq!(metrics.sync_completions, 51);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn out_of_order_error_reaches_the_waiter_once() {
    let series = TestSeries::<u64, u64>::new(8);
    for key in [10, 20, 30] {
        series.append(key, value_for(key)).unwrap();
    }
    let mut cursor = series.async_cursor();
    for _ in 0..3 {
        assert!(cursor.move_next_async().await.unwrap());
    }

    let writer = {
        let series = Arc::clone(&series);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            series.append(15, value_for(15)).unwrap();
        })
    };
    let err = timeout(DEADLINE, cursor.move_next_async())
        .await
        .expect("error not delivered")
        .unwrap_err();
    writer.join().unwrap();
    assert_eq!(err.key(), Some(&30));

    assert!(cursor.with_cursor(|c| c.move_at(&15, Lookup::Eq)));
    assert!(cursor.move_next_async().await.unwrap());
    assert_eq!(cursor.with_cursor(|c| c.current_key()), Some(20));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_wait_leaves_cursor_reusable() {
    let series = TestSeries::<u64, u64>::new(8);
    let mut cursor = series.async_cursor();

    let cancelled = timeout(Duration::from_millis(20), cursor.move_next_async()).await;
    assert!(cancelled.is_err());
    assert!(cursor.awaiter().is_completed());

    series.append(1, value_for(1)).unwrap();
    assert!(cursor.move_next_async().await.unwrap());
    assert_eq!(cursor.with_cursor(|c| c.current_key()), Some(1));

    series.complete();
    assert!(!cursor.move_next_async().await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropped_cursor_stops_notifications() {
    let series = TestSeries::<u64, u64>::new(8);
    let cursor = series.async_cursor();
    let awaiter = Arc::downgrade(cursor.awaiter());
    drop(cursor);
    assert!(awaiter.upgrade().is_none());
    series.append(1, value_for(1)).unwrap();
    series.complete();
}
