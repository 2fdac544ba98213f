use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::time::timeout;
use turnstile::Semaphore;

// a cancellation deadline racing a concurrent release must resolve the
// waiter exactly once: either it got the weight (and returns it on drop)
// or it was cancelled cleanly. in both cases the weight ends up back in
// the pool.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn release_races_cancellation() {
    let sem = Arc::new(Semaphore::new(1));

    for _ in 0..500 {
        let held = sem.acquire(1).await.unwrap();

        let sem2 = sem.clone();
        let waiter = tokio::spawn(async move {
            match timeout(Duration::from_micros(50), sem2.acquire(1)).await {
                Ok(permit) => drop(permit),
                Err(_elapsed) => {}
            }
        });

        tokio::task::yield_now().await;
        drop(held);
        waiter.await.unwrap();

        assert_eq!(sem.available(), 1, "weight leaked or double-granted");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn capacity_never_exceeded() {
    const CAPACITY: u64 = 4;

    let sem = Arc::new(Semaphore::new(CAPACITY));
    let in_use = Arc::new(AtomicU64::new(0));

    let mut tasks = Vec::new();
    for i in 0..16u64 {
        let sem = sem.clone();
        let in_use = in_use.clone();
        tasks.push(tokio::spawn(async move {
            for j in 0..100u64 {
                let weight = (i + j) % 3 + 1;
                let permit = sem.acquire(weight).await.unwrap();

                let now = in_use.fetch_add(weight, Ordering::SeqCst) + weight;
                assert!(now <= CAPACITY, "{now} units in use, capacity {CAPACITY}");

                tokio::task::yield_now().await;

                in_use.fetch_sub(weight, Ordering::SeqCst);
                drop(permit);
            }
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(in_use.load(Ordering::SeqCst), 0);
    assert_eq!(sem.available(), CAPACITY);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_storm_leaks_nothing() {
    const CAPACITY: u64 = 2;

    let sem = Arc::new(Semaphore::new(CAPACITY));

    let mut tasks = Vec::new();
    for i in 0..32u64 {
        let sem = sem.clone();
        tasks.push(tokio::spawn(async move {
            for j in 0..50u64 {
                let weight = (i + j) % 2 + 1;
                let deadline = Duration::from_micros((i * 7 + j) % 200);
                if let Ok(permit) = timeout(deadline, sem.acquire(weight)).await {
                    tokio::task::yield_now().await;
                    drop(permit.unwrap());
                }
            }
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(sem.available(), CAPACITY);
}
