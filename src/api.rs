use crate::types::{
    ClientEvent, ClientEventReceiver, Credentials, PageResult, RequestInfo, ScrobbleRecord,
    SharedEventBroadcaster, MAX_PAGE_SIZE,
};
use crate::{LastFmError, Result};
use async_trait::async_trait;
use http_client::{HttpClient, Request};
use http_types::{Method, Url};
use serde::Deserialize;
use std::sync::Arc;

/// Base endpoint of the Last.fm web service.
pub const DEFAULT_API_URL: &str = "https://ws.audioscrobbler.com/2.0/";

// =============================================================================
// LastFmApiClient trait and implementation
// =============================================================================

/// A single-attempt fetcher for one page of a user's recent tracks.
///
/// Implementations perform exactly one network round trip per call and never
/// retry; retrying is the aggregation driver's job.
///
/// # Mocking Support
///
/// When the `mock` feature is enabled, this crate provides `MockLastFmApiClient`
/// that implements this trait using the `mockall` library.
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait LastFmApiClient: Send + Sync {
    /// Fetch page `page` (1-based) of `limit` records.
    async fn get_recent_tracks_page(
        &self,
        credentials: &Credentials,
        page: u32,
        limit: u32,
    ) -> Result<PageResult>;
}

#[async_trait]
impl<C: LastFmApiClient + ?Sized> LastFmApiClient for Arc<C> {
    async fn get_recent_tracks_page(
        &self,
        credentials: &Credentials,
        page: u32,
        limit: u32,
    ) -> Result<PageResult> {
        (**self)
            .get_recent_tracks_page(credentials, page, limit)
            .await
    }
}

/// [`LastFmApiClient`] backed by any [`HttpClient`] implementation.
#[derive(Clone)]
pub struct LastFmApiClientImpl {
    client: Arc<dyn HttpClient + Send + Sync>,
    base_url: String,
    broadcaster: Arc<SharedEventBroadcaster>,
}

impl LastFmApiClientImpl {
    /// Create a client talking to the public Last.fm endpoint.
    ///
    /// ```rust,no_run
    /// use scrobble_doctor::LastFmApiClientImpl;
    ///
    /// let http_client = http_client::native::NativeClient::new();
    /// let client = LastFmApiClientImpl::new(Box::new(http_client));
    /// ```
    pub fn new(client: Box<dyn HttpClient + Send + Sync>) -> Self {
        Self::with_base_url(client, DEFAULT_API_URL.to_string())
    }

    /// Create a client with a custom endpoint, e.g. a local test server.
    pub fn with_base_url(client: Box<dyn HttpClient + Send + Sync>, base_url: String) -> Self {
        Self {
            client: Arc::from(client),
            base_url,
            broadcaster: Arc::new(SharedEventBroadcaster::new()),
        }
    }

    /// Create a new client that reports its events through this client's broadcaster.
    pub fn with_shared_broadcaster(&self, client: Box<dyn HttpClient + Send + Sync>) -> Self {
        Self {
            client: Arc::from(client),
            base_url: self.base_url.clone(),
            broadcaster: self.broadcaster.clone(),
        }
    }

    pub fn subscribe(&self) -> ClientEventReceiver {
        self.broadcaster.subscribe()
    }

    pub fn latest_event(&self) -> Option<ClientEvent> {
        self.broadcaster.latest_event()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn recent_tracks_url(&self, credentials: &Credentials, page: u32, limit: u32) -> Result<Url> {
        let url = format!(
            "{}?method=user.getrecenttracks&user={}&api_key={}&format=json&limit={}&page={}",
            self.base_url,
            urlencoding::encode(&credentials.username),
            urlencoding::encode(&credentials.api_key),
            limit.clamp(1, MAX_PAGE_SIZE),
            page.max(1)
        );
        url.parse::<Url>()
            .map_err(|e| LastFmError::Http(format!("invalid request URL: {e}")))
    }
}

impl std::fmt::Debug for LastFmApiClientImpl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LastFmApiClientImpl")
            .field("base_url", &self.base_url)
            .field("broadcaster", &self.broadcaster)
            .finish()
    }
}

#[async_trait]
impl LastFmApiClient for LastFmApiClientImpl {
    async fn get_recent_tracks_page(
        &self,
        credentials: &Credentials,
        page: u32,
        limit: u32,
    ) -> Result<PageResult> {
        let url = self.recent_tracks_url(credentials, page, limit)?;

        let request_info = RequestInfo::from_url_and_method(&url, "GET");
        let request_start = std::time::Instant::now();
        log::debug!("Requesting {}", request_info.short_description());

        self.broadcaster
            .broadcast_event(ClientEvent::RequestStarted {
                request: request_info.clone(),
            });

        let request = Request::new(Method::Get, url);
        let mut response = match self.client.send(request).await {
            Ok(response) => response,
            Err(e) => {
                self.broadcaster.broadcast_event(ClientEvent::RequestFailed {
                    request: request_info,
                    error: e.to_string(),
                });
                return Err(LastFmError::Http(e.to_string()));
            }
        };

        let status = response.status();
        self.broadcaster
            .broadcast_event(ClientEvent::RequestCompleted {
                request: request_info,
                status_code: status.into(),
                duration_ms: request_start.elapsed().as_millis() as u64,
            });

        let body = response.body_bytes().await;

        if !status.is_success() {
            log::debug!("Recent tracks request for page {page} failed with status {status}");
            return Err(LastFmError::RemoteRequest {
                status: status.into(),
                message: body
                    .ok()
                    .and_then(|bytes| parse_api_error(&String::from_utf8_lossy(&bytes)))
                    .map(|e| e.message),
            });
        }

        let body = body.map_err(|e| LastFmError::Http(e.to_string()))?;
        let body = String::from_utf8(body)
            .map_err(|e| LastFmError::Decode(format!("response is not UTF-8: {e}")))?;

        if let Some(api_error) = parse_api_error(&body) {
            log::debug!(
                "Recent tracks request for page {page} returned error {}: {}",
                api_error.error,
                api_error.message
            );
            return Err(LastFmError::RemoteRequest {
                status: status.into(),
                message: Some(api_error.message),
            });
        }

        parse_recent_tracks_response(&body)
    }
}

// =============================================================================
// Wire format
// =============================================================================

#[derive(Deserialize)]
pub struct ApiRecentTracksResponse {
    pub recenttracks: ApiRecentTracks,
}

#[derive(Deserialize)]
pub struct ApiRecentTracks {
    #[serde(default)]
    pub track: OneOrMany<ApiTrack>,
    #[serde(rename = "@attr")]
    pub attr: ApiPaginationAttr,
}

/// Last.fm collapses single-element lists into a bare object.
#[derive(Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

#[derive(Deserialize)]
pub struct ApiTrack {
    pub name: String,
    #[serde(default)]
    pub mbid: Option<String>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub artist: ApiTextField,
    #[serde(default)]
    pub album: ApiTextField,
    pub date: Option<ApiDate>,
    #[serde(rename = "@attr")]
    pub attr: Option<ApiTrackAttr>,
}

#[derive(Deserialize, Default)]
pub struct ApiTextField {
    #[serde(rename = "#text", default)]
    pub text: Option<String>,
    #[serde(default)]
    pub mbid: Option<String>,
}

#[derive(Deserialize)]
pub struct ApiDate {
    pub uts: String,
}

#[derive(Deserialize)]
pub struct ApiTrackAttr {
    pub nowplaying: Option<String>,
}

#[derive(Deserialize)]
pub struct ApiPaginationAttr {
    pub page: String,
    #[serde(rename = "totalPages")]
    pub total_pages: String,
    #[serde(rename = "perPage", default)]
    pub per_page: Option<String>,
    #[serde(default)]
    pub total: Option<String>,
}

/// Error envelope Last.fm returns instead of a result.
#[derive(Deserialize, Debug)]
pub struct ApiErrorResponse {
    pub error: u32,
    #[serde(default)]
    pub message: String,
}

fn parse_api_error(body: &str) -> Option<ApiErrorResponse> {
    if !body.contains("\"error\"") {
        return None;
    }
    serde_json::from_str(body).ok()
}

fn parse_count<T: std::str::FromStr>(field: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| LastFmError::Decode(format!("{field} is not an integer: {value:?}")))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Decode a `user.getrecenttracks` JSON body into a [`PageResult`].
///
/// The "now playing" entry is kept with `timestamp: None`; filtering it out of
/// the history is up to the caller.
pub fn parse_recent_tracks_response(json: &str) -> Result<PageResult> {
    let response: ApiRecentTracksResponse =
        serde_json::from_str(json).map_err(|e| LastFmError::Decode(e.to_string()))?;

    let attr = response.recenttracks.attr;
    let page: u32 = parse_count("page", &attr.page)?;
    let total_pages: u32 = parse_count("totalPages", &attr.total_pages)?;
    let per_page: Option<u32> = attr
        .per_page
        .as_deref()
        .map(|v| parse_count("perPage", v))
        .transpose()?;
    let total: Option<u64> = attr
        .total
        .as_deref()
        .map(|v| parse_count("total", v))
        .transpose()?;

    let records = response
        .recenttracks
        .track
        .into_vec()
        .into_iter()
        .map(|t| -> Result<ScrobbleRecord> {
            let timestamp = t
                .date
                .as_ref()
                .map(|d| parse_count::<u64>("date.uts", &d.uts))
                .transpose()?;
            let now_playing = t
                .attr
                .as_ref()
                .and_then(|a| a.nowplaying.as_deref())
                .is_some_and(|v| v == "true");
            Ok(ScrobbleRecord {
                name: t.name,
                artist: t.artist.text.unwrap_or_default(),
                album: t.album.text.unwrap_or_default(),
                timestamp,
                url: t.url,
                now_playing,
                mbid: non_empty(t.mbid),
                artist_mbid: non_empty(t.artist.mbid),
                album_mbid: non_empty(t.album.mbid),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    log::trace!(
        "Decoded page {page}/{total_pages} with {} records",
        records.len()
    );

    Ok(PageResult {
        records,
        page,
        total_pages,
        per_page,
        total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_recent_tracks() {
        let json = r##"{
            "recenttracks": {
                "track": [
                    {
                        "name": "Now Playing",
                        "url": "https://www.last.fm/music/Some+Artist/_/Now+Playing",
                        "artist": {"#text": "Some Artist", "mbid": ""},
                        "album": {"#text": "Some Album", "mbid": ""},
                        "@attr": {"nowplaying": "true"}
                    },
                    {
                        "name": "Test Track",
                        "mbid": "5d1f3c2e",
                        "url": "https://www.last.fm/music/Test+Artist/_/Test+Track",
                        "artist": {"#text": "Test Artist", "mbid": "a74b1b7f"},
                        "album": {"#text": "Test Album", "mbid": ""},
                        "date": {"uts": "1700000000", "#text": "14 Nov 2023, 22:13"}
                    }
                ],
                "@attr": {
                    "user": "rj",
                    "page": "1",
                    "perPage": "200",
                    "totalPages": "5",
                    "total": "812"
                }
            }
        }"##;

        let page = parse_recent_tracks_response(json).unwrap();
        assert_eq!(page.records.len(), 2);
        assert!(page.records[0].is_now_playing());
        assert!(page.records[0].now_playing);

        let track = &page.records[1];
        assert_eq!(track.name, "Test Track");
        assert_eq!(track.artist, "Test Artist");
        assert_eq!(track.album, "Test Album");
        assert_eq!(track.timestamp, Some(1700000000));
        assert_eq!(track.mbid.as_deref(), Some("5d1f3c2e"));
        assert_eq!(track.artist_mbid.as_deref(), Some("a74b1b7f"));
        assert_eq!(track.album_mbid, None);

        assert_eq!(page.page, 1);
        assert_eq!(page.total_pages, 5);
        assert_eq!(page.per_page, Some(200));
        assert_eq!(page.total, Some(812));
        assert!(page.has_next_page());
    }

    #[test]
    fn test_parse_single_track_object() {
        let json = r##"{
            "recenttracks": {
                "track": {
                    "name": "Only Track",
                    "url": "https://www.last.fm/music/A/_/Only+Track",
                    "artist": {"#text": "A"},
                    "album": {"#text": ""},
                    "date": {"uts": "1600000000"}
                },
                "@attr": {"page": "3", "totalPages": "3"}
            }
        }"##;

        let page = parse_recent_tracks_response(json).unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].album, "");
        assert!(!page.has_next_page());
        assert_eq!(page.per_page, None);
    }

    #[test]
    fn test_parse_missing_text_fields() {
        let json = r##"{
            "recenttracks": {
                "track": [
                    {"name": "Untagged", "artist": {}, "date": {"uts": "1"}}
                ],
                "@attr": {"page": "1", "totalPages": "1"}
            }
        }"##;

        let page = parse_recent_tracks_response(json).unwrap();
        assert_eq!(page.records[0].artist, "");
        assert_eq!(page.records[0].album, "");
        assert_eq!(page.records[0].url, "");
    }

    #[test]
    fn test_parse_empty_history() {
        let json = r##"{
            "recenttracks": {
                "track": [],
                "@attr": {"page": "1", "totalPages": "0", "total": "0"}
            }
        }"##;

        let page = parse_recent_tracks_response(json).unwrap();
        assert!(page.records.is_empty());
        assert_eq!(page.total_pages, 0);
    }

    #[test]
    fn test_parse_rejects_bad_counts() {
        let json = r##"{
            "recenttracks": {
                "track": [],
                "@attr": {"page": "1", "totalPages": "many"}
            }
        }"##;

        match parse_recent_tracks_response(json) {
            Err(LastFmError::Decode(msg)) => assert!(msg.contains("totalPages")),
            other => panic!("Expected decode error, got: {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_recent_tracks_response("<html>Service Unavailable</html>"),
            Err(LastFmError::Decode(_))
        ));
        assert!(matches!(
            parse_recent_tracks_response(r#"{"recenttracks": {}}"#),
            Err(LastFmError::Decode(_))
        ));
    }

    #[test]
    fn test_parse_api_error_envelope() {
        let error = parse_api_error(r#"{"error": 6, "message": "User not found"}"#).unwrap();
        assert_eq!(error.error, 6);
        assert_eq!(error.message, "User not found");
        assert!(parse_api_error(r#"{"recenttracks": {}}"#).is_none());
    }
}
