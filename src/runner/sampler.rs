//! Periodic sampling source for the asynchronous adapter.

use std::future::Future;
use std::time::Duration;

use futures::Stream;
use tokio::time::{interval, Interval, MissedTickBehavior};

/// Adapt a sampling closure into a stream that yields one sample per period.
///
/// Ticks are aligned to multiples of the period from the first sample, so a
/// slow sample does not drift the schedule; ticks missed while sampling are
/// skipped rather than bunched up.
pub fn sample<T, F, Fut>(period: Duration, mut f: F) -> impl Stream<Item = anyhow::Result<T>> + Send
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    futures::stream::unfold(None::<Interval>, move |ticker| {
        let sampled = f();
        async move {
            let mut ticker = match ticker {
                Some(ticker) => ticker,
                None => {
                    let mut ticker = interval(period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    // Consume the immediate first tick.
                    ticker.tick().await;
                    ticker
                }
            };
            ticker.tick().await;
            let item = sampled.await;
            Some((item, Some(ticker)))
        }
    })
}
