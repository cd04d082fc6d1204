//! # Fetch sessions for UI consumers
//!
//! A UI needs more than a future: it renders a loading flag, progress, the
//! scrobbles fetched so far, and finally either the full history or an error.
//! [`HistoryLoader`] runs the aggregation driver and publishes all of that as a
//! [`LoaderState`] through a `tokio::sync::watch` channel.
//!
//! Every call to [`HistoryLoader::load`] starts a new session. Starting a
//! session cancels the previous one, and state updates from a superseded
//! session are dropped, so a slow old fetch can never overwrite a newer one.

use crate::api::LastFmApiClient;
use crate::cancel::CancellationState;
use crate::fetch::fetch_all_with;
use crate::types::{Credentials, FetchConfig, FetchProgress, ScrobbleRecord};
use crate::{LastFmError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::watch;

/// Everything a UI renders for the current fetch session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoaderState {
    /// Id of the session this state belongs to (0 before the first load)
    pub session_id: u64,
    /// True while the session is fetching
    pub is_loading: bool,
    /// Latest progress snapshot, without the live collection
    pub progress: FetchProgress,
    /// Scrobbles fetched so far by the running session
    pub live_data: Vec<ScrobbleRecord>,
    /// Final history once the session succeeded
    pub data: Option<Vec<ScrobbleRecord>>,
    /// Terminal error of the session, if it failed
    #[serde(skip)]
    pub error: Option<LastFmError>,
}

impl LoaderState {
    /// Live data while loading, the final history afterwards.
    pub fn current_data(&self) -> &[ScrobbleRecord] {
        if self.is_loading {
            &self.live_data
        } else {
            self.data.as_deref().unwrap_or_default()
        }
    }
}

struct ActiveSession {
    id: u64,
    cancellation: CancellationState,
}

/// Runs history fetches on behalf of a UI and publishes their state.
///
/// ```rust,no_run
/// use scrobble_doctor::{Credentials, FetchConfig, HistoryLoader, LastFmApiClientImpl};
///
/// # tokio_test::block_on(async {
/// let client = LastFmApiClientImpl::new(Box::new(http_client::native::NativeClient::new()));
/// let loader = HistoryLoader::new(client, FetchConfig::default());
///
/// let mut state = loader.subscribe();
/// tokio::spawn(async move {
///     while state.changed().await.is_ok() {
///         let snapshot = state.borrow_and_update().clone();
///         println!("{} scrobbles loaded", snapshot.current_data().len());
///     }
/// });
///
/// loader.load(&Credentials::new("rj", "api-key"), None).await?;
/// # Ok::<(), scrobble_doctor::LastFmError>(())
/// # });
/// ```
pub struct HistoryLoader<C: LastFmApiClient> {
    client: C,
    config: FetchConfig,
    state_tx: watch::Sender<LoaderState>,
    active: Mutex<ActiveSession>,
}

impl<C: LastFmApiClient> HistoryLoader<C> {
    pub fn new(client: C, config: FetchConfig) -> Self {
        let (state_tx, _) = watch::channel(LoaderState::default());
        Self {
            client,
            config,
            state_tx,
            active: Mutex::new(ActiveSession {
                id: 0,
                cancellation: CancellationState::new(),
            }),
        }
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> LoaderState {
        self.state_tx.borrow().clone()
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<LoaderState> {
        self.state_tx.subscribe()
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Fetch the history for `credentials`, superseding any running session.
    ///
    /// The returned result is the session's own outcome. A session that was
    /// superseded or cancelled returns [`LastFmError::Cancelled`] and leaves
    /// the published state untouched.
    pub async fn load(
        &self,
        credentials: &Credentials,
        max_scrobbles: Option<usize>,
    ) -> Result<Vec<ScrobbleRecord>> {
        let (session_id, cancel_rx) = self.begin_session();
        log::debug!("Starting fetch session {session_id}");

        let session_rx = cancel_rx.clone();
        let result = fetch_all_with(
            &self.client,
            &self.config,
            Some(cancel_rx),
            credentials,
            max_scrobbles,
            |mut progress: FetchProgress| {
                if *session_rx.borrow() {
                    return;
                }
                let live = progress.scrobbles.take();
                self.publish(session_id, |state| {
                    state.progress = progress;
                    if let Some(live) = live {
                        state.live_data = live;
                    }
                });
            },
        )
        .await;

        let published = self.publish(session_id, |state| {
            state.is_loading = false;
            match &result {
                Ok(scrobbles) => state.data = Some(scrobbles.clone()),
                Err(LastFmError::Cancelled) => {}
                Err(e) => state.error = Some(e.clone()),
            }
        });
        if !published {
            log::debug!("Fetch session {session_id} was superseded; dropping its outcome");
        }

        result
    }

    /// Cancel the running session, if any.
    ///
    /// The loading flag is cleared; no error is recorded. Progress of a page
    /// request still in flight is discarded.
    pub fn cancel(&self) {
        let session_id = {
            let active = self.lock_active();
            active.cancellation.cancel();
            active.id
        };
        self.publish(session_id, |state| state.is_loading = false);
    }

    fn begin_session(&self) -> (u64, watch::Receiver<bool>) {
        let mut active = self.lock_active();
        active.cancellation.cancel();

        active.id += 1;
        active.cancellation = CancellationState::new();
        let cancel_rx = active.cancellation.subscribe();
        let session_id = active.id;

        self.state_tx.send_replace(LoaderState {
            session_id,
            is_loading: true,
            ..Default::default()
        });

        (session_id, cancel_rx)
    }

    /// Apply `update` if `session_id` is still the published session.
    fn publish(&self, session_id: u64, update: impl FnOnce(&mut LoaderState)) -> bool {
        self.state_tx.send_if_modified(|state| {
            if state.session_id != session_id {
                return false;
            }
            update(state);
            true
        })
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, ActiveSession> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
