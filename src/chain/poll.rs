//! Bounded fixed-interval polling
//!
//! Chain effects (submitted transactions, freshly created vaults) only become
//! observable after a finality delay, and the RPC offers no push
//! notification. Every wait in this service goes through this helper so the
//! attempt budget and spacing are explicit at the call site and the lookup
//! can be injected in tests.

use std::future::Future;
use tokio::time::Duration;

/// Poll `lookup` until `is_pending` reports a settled result or the attempt
/// budget runs out.
///
/// The first attempt runs immediately; the fixed `interval` is slept between
/// attempts only. Returns `None` when every attempt was still pending.
pub async fn poll_until<T, F, Fut, P>(
    max_attempts: u32,
    interval: Duration,
    mut lookup: F,
    mut is_pending: P,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = T>,
    P: FnMut(&T) -> bool,
{
    for attempt in 1..=max_attempts {
        let result = lookup().await;
        if !is_pending(&result) {
            return Some(result);
        }
        if attempt < max_attempts {
            tokio::time::sleep(interval).await;
        }
    }
    None
}
