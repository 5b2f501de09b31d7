//! Wall-clock instrumentation for synchronous and asynchronous call paths.
//!
//! Every helper logs a start event naming the operation and its arguments, runs the
//! work exactly once, and logs the elapsed time when the work is over. The end event
//! comes from a drop guard, so it is emitted on early returns, panics, and when an
//! async caller drops the future before it completes.
//!
//! Results and errors pass through untouched.

use std::{
    fmt::Debug,
    future::Future,
    time::{Duration, Instant},
};

use tracing::info;

/// Drop guard that logs how long it was alive.
#[must_use = "the end event is logged when the guard is dropped"]
pub struct Timing {
    op: &'static str,
    start: Instant,
}

impl Timing {
    pub fn start(op: &'static str, args: &dyn Debug) -> Timing {
        info!(op, "starting with args {args:?}");
        Timing {
            op,
            start: Instant::now(),
        }
    }

    fn start_formatted(op: &'static str, args: String) -> Timing {
        info!(op, "starting with args {args}");
        Timing {
            op,
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for Timing {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        info!(
            op = self.op,
            "finished in {:.3} ms",
            elapsed.as_secs_f64() * 1000.0
        );
    }
}

pub fn timed_sync<R>(op: &'static str, args: &dyn Debug, f: impl FnOnce() -> R) -> R {
    let _timing = Timing::start(op, args);
    f()
}

/// Like [`timed_sync`] but returns the elapsed time next to the result.
pub fn measure_sync<R>(op: &'static str, args: &dyn Debug, f: impl FnOnce() -> R) -> (R, Duration) {
    let timing = Timing::start(op, args);
    let res = f();
    (res, timing.elapsed())
}

/// The clock starts at the first poll, not when this function is called.
///
/// `args` is rendered eagerly so the returned future doesn't borrow it.
pub fn timed<F: Future>(
    op: &'static str,
    args: &dyn Debug,
    fut: F,
) -> impl Future<Output = F::Output> {
    let args = format!("{args:?}");
    async move {
        let _timing = Timing::start_formatted(op, args);
        fut.await
    }
}

pub fn measure<F: Future>(
    op: &'static str,
    args: &dyn Debug,
    fut: F,
) -> impl Future<Output = (F::Output, Duration)> {
    let args = format!("{args:?}");
    async move {
        let timing = Timing::start_formatted(op, args);
        let res = fut.await;
        (res, timing.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use super::*;

    #[test]
    fn sync_passes_result_through() {
        let calls = AtomicUsize::new(0);
        let res: Result<u32, String> = timed_sync("ok", &(1, "two"), || {
            calls.fetch_add(1, Ordering::Relaxed);
            Ok(42)
        });
        assert_eq!(res, Ok(42));
        assert_eq!(calls.load(Ordering::Relaxed), 1);

        let res: Result<u32, String> = timed_sync("err", &(), || Err("boom".to_owned()));
        assert_eq!(res, Err("boom".to_owned()));
    }

    #[test]
    fn sync_measures_wall_time() {
        let (v, elapsed) = measure_sync("sleep", &10, || {
            std::thread::sleep(Duration::from_millis(10));
            "done"
        });
        assert_eq!(v, "done");
        assert!(elapsed >= Duration::from_millis(10), "{elapsed:?}");
    }

    #[test]
    fn sync_panic_propagates() {
        let res = std::panic::catch_unwind(|| timed_sync("panics", &(), || panic!("inner")));
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn async_passes_result_through() {
        let res: Result<(), std::io::Error> = timed(
            "async-err",
            &"path",
            async { Err(std::io::Error::new(std::io::ErrorKind::Other, "nope")) },
        )
        .await;
        let err = res.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::Other);
        assert_eq!(err.to_string(), "nope");
    }

    #[tokio::test]
    async fn async_measures_full_round_trip() {
        let (v, elapsed) = measure("offload", &(), async {
            tokio::task::spawn_blocking(|| {
                std::thread::sleep(Duration::from_millis(10));
                7
            })
            .await
            .unwrap()
        })
        .await;
        assert_eq!(v, 7);
        assert!(elapsed >= Duration::from_millis(10), "{elapsed:?}");
    }

    #[tokio::test]
    async fn async_runs_work_once_and_only_when_polled() {
        let calls = AtomicUsize::new(0);
        let fut = timed("lazy", &(), async {
            calls.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(calls.load(Ordering::Relaxed), 0);
        fut.await;
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn async_dropped_before_completion() {
        let res = tokio::time::timeout(
            Duration::from_millis(10),
            timed("never", &(), std::future::pending::<()>()),
        )
        .await;
        assert!(res.is_err());
    }
}
