use crate::{LastFmError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

/// Cooperative cancellation for a fetch session.
///
/// - `cancel()` flips a boolean and wakes sleepers.
/// - `reset()` clears the flag so the token can be reused.
/// - Pacing and backoff sleeps select on either the timer or cancellation.
#[derive(Clone, Debug)]
pub struct CancellationState {
    tx: watch::Sender<bool>,
}

impl Default for CancellationState {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationState {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn reset(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Fail with [`LastFmError::Cancelled`] if the flag is already set.
pub fn check_cancelled(cancel_rx: Option<&watch::Receiver<bool>>) -> Result<()> {
    match cancel_rx {
        Some(rx) if *rx.borrow() => Err(LastFmError::Cancelled),
        _ => Ok(()),
    }
}

/// Sleep for `duration`, waking early with [`LastFmError::Cancelled`] on cancellation.
///
/// Without a receiver this is a plain sleep.
pub async fn sleep_with_cancel(
    cancel_rx: Option<watch::Receiver<bool>>,
    duration: Duration,
) -> Result<()> {
    let Some(mut cancel_rx) = cancel_rx else {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
        return Ok(());
    };

    if *cancel_rx.borrow() {
        return Err(LastFmError::Cancelled);
    }
    if duration.is_zero() {
        return Ok(());
    }

    let sleeper = tokio::time::sleep(duration);
    tokio::pin!(sleeper);
    tokio::select! {
        _ = &mut sleeper => Ok(()),
        _ = wait_for_cancel(&mut cancel_rx) => Err(LastFmError::Cancelled),
    }
}

/// Run `operation`, abandoning it with [`LastFmError::Cancelled`] on cancellation.
pub async fn run_with_cancel<T, Fut>(
    cancel_rx: Option<watch::Receiver<bool>>,
    operation: Fut,
) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    let Some(mut cancel_rx) = cancel_rx else {
        return operation.await;
    };

    if *cancel_rx.borrow() {
        return Err(LastFmError::Cancelled);
    }

    tokio::select! {
        result = operation => result,
        _ = wait_for_cancel(&mut cancel_rx) => Err(LastFmError::Cancelled),
    }
}

async fn wait_for_cancel(cancel_rx: &mut watch::Receiver<bool>) {
    loop {
        if cancel_rx.changed().await.is_err() {
            // No sender left, so nothing can cancel any more.
            std::future::pending::<()>().await;
        }
        if *cancel_rx.borrow() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes_without_cancellation() {
        let state = CancellationState::new();
        let start = tokio::time::Instant::now();
        sleep_with_cancel(Some(state.subscribe()), Duration::from_millis(1000))
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_wakes_sleeper() {
        let state = CancellationState::new();
        let rx = state.subscribe();
        let canceller = state.clone();

        let handle = tokio::spawn(async move {
            sleep_with_cancel(Some(rx), Duration::from_secs(3600)).await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        canceller.cancel();

        assert_eq!(handle.await.unwrap(), Err(LastFmError::Cancelled));
    }

    #[tokio::test]
    async fn test_already_cancelled_returns_immediately() {
        let state = CancellationState::new();
        state.cancel();
        assert!(state.is_cancelled());
        assert_eq!(
            sleep_with_cancel(Some(state.subscribe()), Duration::ZERO).await,
            Err(LastFmError::Cancelled)
        );
        assert_eq!(
            check_cancelled(Some(&state.subscribe())),
            Err(LastFmError::Cancelled)
        );

        state.reset();
        assert!(check_cancelled(Some(&state.subscribe())).is_ok());
        assert!(check_cancelled(None).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_abandons_operation() {
        let state = CancellationState::new();
        let rx = state.subscribe();
        let canceller = state.clone();

        let handle = tokio::spawn(async move {
            run_with_cancel(Some(rx), async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(1)
            })
            .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        canceller.cancel();

        assert_eq!(handle.await.unwrap(), Err(LastFmError::Cancelled));
        assert_eq!(run_with_cancel(None, async { Ok(2) }).await, Ok(2));
    }
}
