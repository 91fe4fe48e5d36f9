use crate::{Error, Pool, PoolConfig};
use core::time::Duration;
use portable_atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc as std_mpsc};
use std::time::Instant;
use tokio::runtime::Handle;

const WAIT: Duration = Duration::from_secs(10);

fn alive_tasks() -> usize {
    Handle::current().metrics().num_alive_tasks()
}

/// Task bookkeeping is released a moment after a join handle resolves, so
/// poll briefly instead of comparing once.
async fn assert_tasks_return_to(baseline: usize) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while alive_tasks() != baseline {
        assert!(
            Instant::now() < deadline,
            "{} tasks still alive, expected {baseline}",
            alive_tasks()
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

/// A job body that parks its thread until the returned sender fires.
fn gate() -> (std_mpsc::Sender<()>, impl FnOnce() + Send + 'static) {
    let (tx, rx) = std_mpsc::channel::<()>();
    let rx = Mutex::new(rx);
    (tx, move || {
        let _ = rx.lock().unwrap().recv();
    })
}

#[test]
fn construction_outside_a_runtime_fails() {
    assert_eq!(Pool::new(2, 2).unwrap_err(), Error::NoRuntime);
}

#[tokio::test]
async fn construction_rejects_zero_workers() {
    assert!(matches!(
        Pool::new(0, 10),
        Err(Error::InvalidConfig { .. })
    ));
}

#[tokio::test]
async fn construction_rejects_an_oversized_queue() {
    assert!(matches!(
        Pool::new(2, usize::MAX >> 2),
        Err(Error::InvalidConfig { .. })
    ));
    assert!(matches!(
        Pool::new(usize::MAX, 2),
        Err(Error::InvalidConfig { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn await_all_waits_for_every_job() -> crate::Result<()> {
    const JOBS: usize = 100;
    let pool = Pool::new(100, 10_000)?;
    let counter = Arc::new(AtomicU64::new(0));

    pool.set_expected_completions(JOBS);
    for _ in 0..JOBS {
        let counter = Arc::clone(&counter);
        let done = pool.completion();
        pool.submit(move || {
            counter.fetch_add(1, Ordering::Relaxed);
            done.done().unwrap();
        })
        .await?;
    }

    pool.await_all_timeout(WAIT).await?;
    assert_eq!(counter.load(Ordering::Relaxed), JOBS as u64);
    pool.release().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ten_thousand_jobs_then_release_restores_task_count() -> crate::Result<()> {
    const JOBS: usize = 10_000;
    let baseline = alive_tasks();

    let pool = Pool::new(5, 10)?;
    assert_eq!(alive_tasks(), baseline + 6);

    let counter = Arc::new(AtomicU64::new(0));
    pool.set_expected_completions(JOBS);
    for _ in 0..JOBS {
        let counter = Arc::clone(&counter);
        let done = pool.completion();
        pool.submit(move || {
            counter.fetch_add(1, Ordering::Relaxed);
            done.done().unwrap();
        })
        .await?;
    }

    pool.await_all_timeout(WAIT).await?;
    assert_eq!(counter.load(Ordering::Relaxed), JOBS as u64);
    // Workers record a job after its body returns.
    wait_until(|| pool.stats().completed == JOBS as u64).await;

    pool.release().await?;
    assert_tasks_return_to(baseline).await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_never_exceeds_worker_count() -> crate::Result<()> {
    const WORKERS: usize = 4;
    const JOBS: usize = 200;
    let pool = Pool::new(WORKERS, 32)?;
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    pool.set_expected_completions(JOBS);
    for _ in 0..JOBS {
        let in_flight = Arc::clone(&in_flight);
        let peak = Arc::clone(&peak);
        let done = pool.completion().guard();
        pool.submit(move || {
            let _done = done;
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_micros(500));
            in_flight.fetch_sub(1, Ordering::SeqCst);
        })
        .await?;
    }

    pool.await_all_timeout(WAIT).await?;
    let peak = peak.load(Ordering::SeqCst);
    assert!(peak >= 1 && peak <= WORKERS, "peak concurrency was {peak}");
    pool.release().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_worker_serializes_jobs() -> crate::Result<()> {
    let pool = Pool::new(1, 4)?;
    let flag = Arc::new(AtomicBool::new(false));
    let (open, blocked) = gate();

    pool.set_expected_completions(2);
    let done = pool.completion().guard();
    pool.submit(move || {
        let _done = done;
        blocked();
    })
    .await?;

    let job_flag = Arc::clone(&flag);
    let done = pool.completion().guard();
    pool.submit(move || {
        let _done = done;
        job_flag.store(true, Ordering::SeqCst);
    })
    .await?;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!flag.load(Ordering::SeqCst));

    open.send(()).unwrap();
    pool.await_all_timeout(WAIT).await?;
    assert!(flag.load(Ordering::SeqCst));
    pool.release().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn idle_release_is_quick() -> crate::Result<()> {
    let baseline = alive_tasks();
    let pool = Pool::new(8, 8)?;
    wait_until(|| pool.stats().idle_workers == 8).await;

    let start = Instant::now();
    pool.release().await?;
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_tasks_return_to(baseline).await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_worker_returns_to_idle_after_a_batch() -> crate::Result<()> {
    const WORKERS: usize = 6;
    let pool = Pool::new(WORKERS, 64)?;

    pool.set_expected_completions(500);
    for _ in 0..500 {
        let done = pool.completion().guard();
        pool.submit(move || drop(done)).await?;
    }
    pool.await_all_timeout(WAIT).await?;

    wait_until(|| pool.stats().idle_workers == WORKERS).await;
    assert_eq!(pool.stats().active, 0);
    pool.release().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn release_waits_for_in_flight_jobs() -> crate::Result<()> {
    let pool = Pool::new(2, 4)?;
    let finished = Arc::new(AtomicBool::new(false));

    let job_finished = Arc::clone(&finished);
    pool.submit(move || {
        std::thread::sleep(Duration::from_millis(100));
        job_finished.store(true, Ordering::SeqCst);
    })
    .await?;
    wait_until(|| pool.stats().active == 1).await;

    pool.release().await?;
    assert!(finished.load(Ordering::SeqCst));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn jobs_queued_before_release_still_run() -> crate::Result<()> {
    const JOBS: usize = 50;
    let pool = Pool::new(2, 100)?;
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..JOBS {
        let counter = Arc::clone(&counter);
        pool.submit(move || {
            std::thread::sleep(Duration::from_millis(1));
            counter.fetch_add(1, Ordering::Relaxed);
        })
        .await?;
    }

    pool.release().await?;
    assert_eq!(counter.load(Ordering::Relaxed), JOBS);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn panicking_job_does_not_cost_a_worker() -> crate::Result<()> {
    let pool = Pool::new(1, 4)?;
    let ran = Arc::new(AtomicBool::new(false));

    pool.set_expected_completions(2);
    let done = pool.completion().guard();
    pool.submit(move || {
        let _done = done;
        panic!("job failure");
    })
    .await?;

    let job_ran = Arc::clone(&ran);
    let done = pool.completion().guard();
    pool.submit(move || {
        let _done = done;
        job_ran.store(true, Ordering::SeqCst);
    })
    .await?;

    pool.await_all_timeout(WAIT).await?;
    assert!(ran.load(Ordering::SeqCst));

    wait_until(|| pool.stats().idle_workers == 1).await;
    let stats = pool.stats();
    assert_eq!(stats.panicked, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.active, 0);
    pool.release().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn try_submit_reports_a_full_queue() -> crate::Result<()> {
    let pool = Pool::new(1, 1)?;
    let (open, blocked) = gate();

    pool.submit(blocked).await?;
    wait_until(|| pool.stats().active == 1).await;

    // The dispatcher takes this one and parks waiting for the busy worker.
    pool.submit(|| {}).await?;
    wait_until(|| pool.stats().queued == 0).await;

    pool.try_submit(|| {})?;
    assert_eq!(pool.try_submit(|| {}), Err(Error::QueueFull));
    assert_eq!(
        pool.submit_timeout(|| {}, Duration::from_millis(50)).await,
        Err(Error::Timeout)
    );

    open.send(()).unwrap();
    pool.release().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn zero_capacity_queue_is_a_rendezvous() -> crate::Result<()> {
    let pool = Pool::new(1, 0)?;
    let (open, blocked) = gate();
    let counter = Arc::new(AtomicUsize::new(0));

    pool.set_expected_completions(3);
    let done = pool.completion().guard();
    pool.submit(move || {
        let _done = done;
        blocked();
    })
    .await?;
    wait_until(|| pool.stats().active == 1).await;

    // Taken by the dispatcher straight away, even though no worker is free.
    let job_counter = Arc::clone(&counter);
    let done = pool.completion().guard();
    tokio::time::timeout(
        Duration::from_secs(1),
        pool.submit(move || {
            let _done = done;
            job_counter.fetch_add(1, Ordering::Relaxed);
        }),
    )
    .await
    .map_err(|_| Error::Timeout)??;

    // The dispatcher is now parked on the busy worker, so nobody takes this
    // one. It sits in the hand-off slot and counts as submitted.
    let job_counter = Arc::clone(&counter);
    let done = pool.completion().guard();
    pool.submit_timeout(
        move || {
            let _done = done;
            job_counter.fetch_add(1, Ordering::Relaxed);
        },
        Duration::from_millis(100),
    )
    .await?;
    assert_eq!(pool.stats().queued, 1);

    // With the slot occupied, a timeout means the job never runs.
    let job_counter = Arc::clone(&counter);
    let fourth = pool
        .submit_timeout(
            move || {
                job_counter.fetch_add(100, Ordering::Relaxed);
            },
            Duration::from_millis(100),
        )
        .await;
    assert_eq!(fourth, Err(Error::Timeout));

    open.send(()).unwrap();
    pool.await_all_timeout(WAIT).await?;
    assert_eq!(counter.load(Ordering::Relaxed), 2);
    pool.release().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn submissions_after_release_are_rejected() -> crate::Result<()> {
    let pool = Pool::new(2, 2)?;
    let submitter = pool.submitter();
    pool.release().await?;

    assert_eq!(submitter.submit(|| {}).await, Err(Error::Released));
    assert_eq!(submitter.try_submit(|| {}), Err(Error::Released));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn jobs_can_submit_follow_up_jobs() -> crate::Result<()> {
    let pool = Pool::new(2, 8)?;
    let counter = Arc::new(AtomicUsize::new(0));

    pool.set_expected_completions(2);
    let submitter = pool.submitter();
    let completion = pool.completion();
    let job_counter = Arc::clone(&counter);
    pool.submit(move || {
        let _done = completion.guard();
        let follow_up = completion.guard();
        let counter = Arc::clone(&job_counter);
        submitter
            .blocking_submit(move || {
                let _done = follow_up;
                counter.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        job_counter.fetch_add(1, Ordering::Relaxed);
    })
    .await?;

    pool.await_all_timeout(WAIT).await?;
    assert_eq!(counter.load(Ordering::Relaxed), 2);
    pool.release().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submitters_share_the_queue() -> crate::Result<()> {
    const SUBMITTERS: usize = 8;
    const PER_SUBMITTER: usize = 250;
    let pool = Pool::with_config(
        PoolConfig::builder()
            .worker_count(3)
            .queue_capacity(4)
            .build()?,
    )?;
    let counter = Arc::new(AtomicUsize::new(0));
    pool.set_expected_completions(SUBMITTERS * PER_SUBMITTER);

    let tasks = (0..SUBMITTERS).map(|_| {
        let submitter = pool.submitter();
        let completion = pool.completion();
        let counter = Arc::clone(&counter);
        async move {
            for _ in 0..PER_SUBMITTER {
                let counter = Arc::clone(&counter);
                let done = completion.guard();
                submitter
                    .submit(move || {
                        let _done = done;
                        counter.fetch_add(1, Ordering::Relaxed);
                    })
                    .await?;
            }
            Ok::<_, Error>(())
        }
    });
    futures::future::try_join_all(tasks).await?;

    pool.await_all_timeout(WAIT).await?;
    assert_eq!(counter.load(Ordering::Relaxed), SUBMITTERS * PER_SUBMITTER);
    pool.release().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn release_timeout_reports_a_stuck_job() -> crate::Result<()> {
    let pool = Pool::new(1, 1)?;
    let (open, blocked) = gate();
    pool.submit(blocked).await?;
    wait_until(|| pool.stats().active == 1).await;

    assert_eq!(
        pool.release_timeout(Duration::from_millis(50)).await,
        Err(Error::Timeout)
    );
    open.send(()).unwrap();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dropped_pool_tears_itself_down() -> crate::Result<()> {
    let baseline = alive_tasks();
    let pool = Pool::new(4, 4)?;
    wait_until(|| pool.stats().idle_workers == 4).await;
    drop(pool);

    assert_tasks_return_to(baseline).await;
    Ok(())
}
