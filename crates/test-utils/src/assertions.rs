//! Polling assertions for eventually-consistent state.
//!
//! Team changes land on the next rekey trigger, not when they are submitted,
//! so tests observe them by polling instead of sleeping a fixed time.

use std::{future::Future, time::Duration};

use tokio::time::{Instant, sleep};

/// Interval between condition checks.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Polls a synchronous condition until it holds or `timeout` expires.
///
/// Returns `true` if the condition held before the deadline. The condition is
/// checked once more after the deadline.
///
/// # Example
///
/// ```no_run
/// use std::sync::{
///     Arc,
///     atomic::{AtomicBool, Ordering},
/// };
/// use std::time::Duration;
///
/// use teamchain_test_utils::assert_eventually;
///
/// # async fn demo() {
/// let flag = Arc::new(AtomicBool::new(false));
/// let setter = flag.clone();
/// tokio::spawn(async move { setter.store(true, Ordering::SeqCst) });
///
/// assert!(assert_eventually(Duration::from_millis(200), || flag.load(Ordering::SeqCst)).await);
/// # }
/// ```
pub async fn assert_eventually<F>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(POLL_INTERVAL).await;
    }
    condition()
}

/// Polls an async condition until it holds or `timeout` expires.
///
/// Use this when the observed state sits behind an async call, such as a
/// membership load.
pub async fn assert_eventually_async<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition().await {
            return true;
        }
        sleep(POLL_INTERVAL).await;
    }
    condition().await
}
