//! # History aggregation
//!
//! [`ScrobbleFetcher`] walks a user's recent tracks page by page, retrying
//! failed pages, pacing requests, reporting progress after every page and
//! stopping early once an optional scrobble cap is reached.
//!
//! Pages are fetched strictly one after another: the total page count is only
//! known after a response arrives, and the accumulator belongs to a single
//! session.

use crate::api::LastFmApiClient;
use crate::cancel::{check_cancelled, run_with_cancel, sleep_with_cancel, CancellationState};
use crate::retry::{retry_with_backoff, RetryFailure};
use crate::types::{Credentials, FetchConfig, FetchProgress, ScrobbleRecord};
use crate::{LastFmError, Result};

/// Aggregation driver for a user's complete listening history.
///
/// # Examples
///
/// ```rust,no_run
/// use scrobble_doctor::{Credentials, FetchConfig, LastFmApiClientImpl, ScrobbleFetcher};
///
/// #[tokio::main]
/// async fn main() -> scrobble_doctor::Result<()> {
///     let client = LastFmApiClientImpl::new(Box::new(http_client::native::NativeClient::new()));
///     let fetcher = ScrobbleFetcher::new(client, FetchConfig::default());
///
///     let scrobbles = fetcher
///         .fetch_all(&Credentials::new("rj", "api-key"), Some(1000), |progress| {
///             println!(
///                 "page {}/{}: {} scrobbles",
///                 progress.current_page, progress.total_pages, progress.scrobbles_fetched
///             );
///         })
///         .await?;
///
///     println!("{} scrobbles fetched", scrobbles.len());
///     Ok(())
/// }
/// ```
pub struct ScrobbleFetcher<C: LastFmApiClient> {
    client: C,
    config: FetchConfig,
    cancellation: Option<CancellationState>,
}

impl<C: LastFmApiClient> ScrobbleFetcher<C> {
    pub fn new(client: C, config: FetchConfig) -> Self {
        Self {
            client,
            config,
            cancellation: None,
        }
    }

    /// Honour `cancellation` before every request and during every delay.
    pub fn with_cancellation(mut self, cancellation: CancellationState) -> Self {
        self.cancellation = Some(cancellation);
        self
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Fetch the whole history, or the first `max_scrobbles` entries of it.
    ///
    /// `on_progress` is called once per completed page. A cap of `None` or
    /// `Some(0)` fetches everything. Records without a timestamp (the track
    /// currently playing) never make it into the result.
    pub async fn fetch_all<F>(
        &self,
        credentials: &Credentials,
        max_scrobbles: Option<usize>,
        on_progress: F,
    ) -> Result<Vec<ScrobbleRecord>>
    where
        F: FnMut(FetchProgress) + Send,
    {
        let cancel_rx = self.cancellation.as_ref().map(|c| c.subscribe());
        fetch_all_with(
            &self.client,
            &self.config,
            cancel_rx,
            credentials,
            max_scrobbles,
            on_progress,
        )
        .await
    }
}

/// Driver loop shared by [`ScrobbleFetcher`] and the session loader.
pub(crate) async fn fetch_all_with<C, F>(
    client: &C,
    config: &FetchConfig,
    cancel_rx: Option<tokio::sync::watch::Receiver<bool>>,
    credentials: &Credentials,
    max_scrobbles: Option<usize>,
    mut on_progress: F,
) -> Result<Vec<ScrobbleRecord>>
where
    C: LastFmApiClient + ?Sized,
    F: FnMut(FetchProgress) + Send,
{
    credentials.validate()?;

    let cap = max_scrobbles.filter(|&max| max > 0);
    let page_size = config.effective_page_size();
    let mut scrobbles: Vec<ScrobbleRecord> = Vec::new();
    let mut page: u32 = 1;
    let mut total_pages: u32 = 1;

    log::info!(
        "Fetching scrobbles for '{}' ({})",
        credentials.username,
        cap.map(|c| format!("up to {c}"))
            .unwrap_or_else(|| "all".to_string())
    );

    while page <= total_pages {
        if let Some(cap) = cap {
            if scrobbles.len() >= cap {
                log::debug!("Reached cap of {cap} scrobbles before page {page}");
                break;
            }
        }

        check_cancelled(cancel_rx.as_ref())?;

        let operation_name = format!("recent tracks page {page}");
        let request_cancel_rx = cancel_rx.clone();
        let fetched = retry_with_backoff(
            &config.retry,
            &operation_name,
            cancel_rx.clone(),
            move |attempt| {
                log::trace!("Fetching page {page}, attempt {attempt}");
                run_with_cancel(
                    request_cancel_rx.clone(),
                    client.get_recent_tracks_page(credentials, page, page_size),
                )
            },
            |attempt, error| {
                log::debug!("Attempt {attempt} for page {page} failed: {error}");
            },
        )
        .await;

        let page_result = match fetched {
            Ok(retry_result) => retry_result.result,
            Err(RetryFailure::Exhausted {
                attempts,
                last_error,
            }) => {
                return Err(LastFmError::PageFetchExhausted {
                    page,
                    attempts,
                    message: last_error.to_string(),
                });
            }
            Err(RetryFailure::Aborted(error)) => return Err(error),
        };

        let received = page_result.records.len();
        scrobbles.extend(
            page_result
                .records
                .into_iter()
                .filter(|record| !record.is_now_playing()),
        );

        if page > 1 && page_result.total_pages != total_pages {
            log::debug!(
                "Total pages changed from {total_pages} to {}",
                page_result.total_pages
            );
        }
        total_pages = page_result.total_pages;

        log::debug!(
            "Page {page}/{total_pages}: {received} records, {} scrobbles so far",
            scrobbles.len()
        );

        on_progress(FetchProgress {
            current_page: page,
            total_pages,
            scrobbles_fetched: scrobbles.len(),
            scrobbles: config.include_live_results.then(|| scrobbles.clone()),
        });

        page += 1;

        sleep_with_cancel(cancel_rx.clone(), config.page_delay).await?;
    }

    if let Some(cap) = cap {
        scrobbles.truncate(cap);
    }

    log::info!(
        "Fetched {} scrobbles for '{}'",
        scrobbles.len(),
        credentials.username
    );

    Ok(scrobbles)
}
