//! Data types for Last.fm listening history retrieval.
//!
//! This module contains the data contracts shared between the page fetcher,
//! the aggregation driver and UI consumers: scrobble records, decoded pages,
//! progress snapshots, credentials, fetch configuration and the client event
//! system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{broadcast, watch};

/// Largest page size the recent tracks endpoint accepts.
pub const MAX_PAGE_SIZE: u32 = 200;

// ================================================================================================
// SCROBBLE DATA
// ================================================================================================

/// A single play event from a user's listening history.
///
/// Records are only created by decoding a remote response and are never
/// mutated afterwards.
///
/// # Examples
///
/// ```rust
/// use scrobble_doctor::ScrobbleRecord;
///
/// let record = ScrobbleRecord {
///     name: "Paranoid Android".to_string(),
///     artist: "Radiohead".to_string(),
///     album: "OK Computer".to_string(),
///     timestamp: Some(1640995200),
///     url: "https://www.last.fm/music/Radiohead/_/Paranoid+Android".to_string(),
///     now_playing: false,
///     mbid: None,
///     artist_mbid: None,
///     album_mbid: None,
/// };
///
/// assert!(!record.is_now_playing());
/// println!("{record}");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScrobbleRecord {
    /// The track name/title
    pub name: String,
    /// The artist name, empty when Last.fm has none
    pub artist: String,
    /// The album name, empty when Last.fm has none
    pub album: String,
    /// Unix timestamp of the play.
    ///
    /// `None` only for the currently playing track, which never appears in an
    /// aggregated history.
    pub timestamp: Option<u64>,
    /// Canonical Last.fm web URL of the track
    pub url: String,
    /// Whether Last.fm flagged this entry as currently playing
    #[serde(default)]
    pub now_playing: bool,
    /// MusicBrainz id of the track, if known
    #[serde(default)]
    pub mbid: Option<String>,
    /// MusicBrainz id of the artist, if known
    #[serde(default)]
    pub artist_mbid: Option<String>,
    /// MusicBrainz id of the album, if known
    #[serde(default)]
    pub album_mbid: Option<String>,
}

impl ScrobbleRecord {
    /// True for the "now playing" sentinel, i.e. a record without a play timestamp.
    pub fn is_now_playing(&self) -> bool {
        self.timestamp.is_none()
    }

    /// The play time as a UTC date, if the record has a timestamp.
    pub fn scrobbled_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp
            .and_then(|ts| DateTime::from_timestamp(ts as i64, 0))
    }
}

impl std::fmt::Display for ScrobbleRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let artist = if self.artist.trim().is_empty() {
            "(missing)"
        } else {
            self.artist.as_str()
        };
        write!(f, "{artist} - {}", self.name)?;
        if !self.album.trim().is_empty() {
            write!(f, " [{}]", self.album)?;
        }
        Ok(())
    }
}

/// One decoded page of the recent tracks endpoint.
///
/// # Examples
///
/// ```rust
/// use scrobble_doctor::PageResult;
///
/// let page = PageResult {
///     records: vec![],
///     page: 1,
///     total_pages: 5,
///     per_page: Some(200),
///     total: Some(812),
/// };
///
/// assert!(page.has_next_page());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageResult {
    /// Records on this page, in the order the service returned them.
    ///
    /// This may include the "now playing" sentinel.
    pub records: Vec<ScrobbleRecord>,
    /// Current page number (1-indexed)
    pub page: u32,
    /// Total number of pages as reported by the service.
    ///
    /// The value may change between requests; the latest one wins.
    pub total_pages: u32,
    /// Page size reported by the service
    pub per_page: Option<u32>,
    /// Total number of scrobbles reported by the service
    pub total: Option<u64>,
}

impl PageResult {
    /// Whether the service reports more pages after this one.
    pub fn has_next_page(&self) -> bool {
        self.page < self.total_pages
    }
}

/// Progress snapshot emitted after every completed page.
///
/// Snapshots are immutable values; every page produces a new one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchProgress {
    /// Page that was just fetched (1-indexed, 0 before the first page)
    pub current_page: u32,
    /// Latest total page count reported by the service
    pub total_pages: u32,
    /// Number of scrobbles accumulated so far
    pub scrobbles_fetched: usize,
    /// Copy of the accumulated scrobbles for live display, when enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scrobbles: Option<Vec<ScrobbleRecord>>,
}

impl FetchProgress {
    /// The page count to show next to the current page.
    ///
    /// With a scrobble cap the fetch stops after `ceil(max / page_size)`
    /// pages, bounded by the reported total once it is known.
    pub fn display_total_pages(&self, max_scrobbles: Option<usize>, page_size: u32) -> u32 {
        match max_scrobbles.filter(|&max| max > 0) {
            Some(max) => {
                let page_size = page_size.clamp(1, MAX_PAGE_SIZE) as usize;
                let capped = max.div_ceil(page_size).min(u32::MAX as usize) as u32;
                if self.total_pages > 0 {
                    capped.min(self.total_pages)
                } else {
                    capped
                }
            }
            None => self.total_pages,
        }
    }
}

/// Username and API key identifying whose history to fetch.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Last.fm username
    pub username: String,
    /// Last.fm API key
    pub api_key: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            api_key: api_key.into(),
        }
    }

    /// Check that neither field is blank.
    pub fn validate(&self) -> crate::Result<()> {
        if self.username.trim().is_empty() {
            return Err(crate::LastFmError::Input(
                "username must not be empty".to_string(),
            ));
        }
        if self.api_key.trim().is_empty() {
            return Err(crate::LastFmError::Input(
                "API key must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

// ================================================================================================
// FETCH CONFIGURATION
// ================================================================================================

/// Configuration for the per-page retry policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts per page, including the first one
    pub max_attempts: u32,
    /// Fixed delay between two attempts for the same page
    pub backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(1000),
        }
    }
}

impl RetryConfig {
    /// Create a config that tries each page exactly once
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Create a config with a custom attempt count
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Attempt count actually used; zero is treated as a single attempt
    pub fn effective_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Configuration for a full history fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    /// Records requested per page (clamped to 1..=200)
    pub page_size: u32,
    /// Per-page retry policy
    pub retry: RetryConfig,
    /// Pause after every page to stay under Last.fm's informal rate limits
    pub page_delay: Duration,
    /// Attach a copy of the accumulated scrobbles to every progress snapshot
    pub include_live_results: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            page_size: MAX_PAGE_SIZE,
            retry: RetryConfig::default(),
            page_delay: Duration::from_millis(50),
            include_live_results: true,
        }
    }
}

impl FetchConfig {
    /// Create a new config with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set custom retry configuration
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the number of records requested per page
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the pause between two page requests
    pub fn with_page_delay(mut self, page_delay: Duration) -> Self {
        self.page_delay = page_delay;
        self
    }

    /// Set the delay between retry attempts
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry.backoff = backoff;
        self
    }

    /// Enable/disable live result copies in progress snapshots
    pub fn with_live_results(mut self, enabled: bool) -> Self {
        self.include_live_results = enabled;
        self
    }

    /// Page size actually sent to the service
    pub fn effective_page_size(&self) -> u32 {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }
}

// ================================================================================================
// EVENT SYSTEM
// ================================================================================================

/// Request information for client events
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestInfo {
    /// The HTTP method (GET, POST, etc.)
    pub method: String,
    /// The full URI being requested, with the API key redacted
    pub uri: String,
    /// Query parameters as key-value pairs, with the API key redacted
    pub query_params: Vec<(String, String)>,
    /// Path without query parameters
    pub path: String,
}

impl RequestInfo {
    /// Create RequestInfo from a parsed URL and method.
    ///
    /// The `api_key` query parameter never leaves this function in clear text.
    pub fn from_url_and_method(url: &http_types::Url, method: &str) -> Self {
        let query_params: Vec<(String, String)> = url
            .query_pairs()
            .map(|(key, value)| {
                let value = if key == "api_key" {
                    "<redacted>".to_string()
                } else {
                    value.into_owned()
                };
                (key.into_owned(), value)
            })
            .collect();

        let mut redacted = url.clone();
        if !query_params.is_empty() {
            redacted
                .query_pairs_mut()
                .clear()
                .extend_pairs(query_params.iter());
        }

        Self {
            method: method.to_string(),
            uri: redacted.to_string(),
            query_params,
            path: url.path().to_string(),
        }
    }

    /// Get a short description of the request for logging
    pub fn short_description(&self) -> String {
        let mut desc = format!("{} {}", self.method, self.path);
        let interesting: Vec<String> = self
            .query_params
            .iter()
            .filter(|(k, _)| k == "user" || k == "page")
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        if !interesting.is_empty() {
            desc.push_str(&format!("?{}", interesting.join("&")));
        }
        desc
    }
}

/// Event type to describe internal HTTP client activity
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ClientEvent {
    /// Request started
    RequestStarted {
        /// Request details
        request: RequestInfo,
    },
    /// Request completed with a response (any status)
    RequestCompleted {
        /// Request details
        request: RequestInfo,
        /// HTTP status code
        status_code: u16,
        /// Duration of the request in milliseconds
        duration_ms: u64,
    },
    /// Request failed before a response arrived
    RequestFailed {
        /// Request details
        request: RequestInfo,
        /// Transport error message
        error: String,
    },
}

/// Type alias for the broadcast receiver
pub type ClientEventReceiver = broadcast::Receiver<ClientEvent>;

/// Type alias for the watch receiver
pub type ClientEventWatcher = watch::Receiver<Option<ClientEvent>>;

/// Shared event broadcasting state that persists across client clones
#[derive(Clone)]
pub struct SharedEventBroadcaster {
    event_tx: broadcast::Sender<ClientEvent>,
    last_event_tx: watch::Sender<Option<ClientEvent>>,
}

impl SharedEventBroadcaster {
    /// Create a new shared event broadcaster
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(100);
        let (last_event_tx, _) = watch::channel(None);

        Self {
            event_tx,
            last_event_tx,
        }
    }

    /// Broadcast an event to all subscribers
    pub fn broadcast_event(&self, event: ClientEvent) {
        let _ = self.event_tx.send(event.clone());
        self.last_event_tx.send_replace(Some(event));
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> ClientEventReceiver {
        self.event_tx.subscribe()
    }

    /// Watch the most recent event
    pub fn watch(&self) -> ClientEventWatcher {
        self.last_event_tx.subscribe()
    }

    /// Get the latest event
    pub fn latest_event(&self) -> Option<ClientEvent> {
        self.last_event_tx.borrow().clone()
    }
}

impl Default for SharedEventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SharedEventBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedEventBroadcaster")
            .field("subscribers", &self.event_tx.receiver_count())
            .finish()
    }
}

// ================================================================================================
// TESTS
// ================================================================================================
