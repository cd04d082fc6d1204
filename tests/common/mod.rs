#![allow(dead_code)]
use async_trait::async_trait;
use http_types::StatusCode;
use scrobble_doctor::{
    Credentials, FetchConfig, LastFmApiClient, LastFmError, PageResult, Result, ScrobbleRecord,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Fetch config without pacing or backoff delays.
pub fn instant_config() -> FetchConfig {
    FetchConfig::default()
        .with_page_delay(Duration::ZERO)
        .with_retry_backoff(Duration::ZERO)
}

pub fn credentials(username: &str) -> Credentials {
    Credentials::new(username, "test_api_key")
}

pub fn scrobble(name: &str, artist: &str, album: &str, timestamp: u64) -> ScrobbleRecord {
    ScrobbleRecord {
        name: name.to_string(),
        artist: artist.to_string(),
        album: album.to_string(),
        timestamp: Some(timestamp),
        url: format!(
            "https://www.last.fm/music/{}/_/{}",
            urlencoding::encode(artist),
            urlencoding::encode(name)
        ),
        now_playing: false,
        mbid: None,
        artist_mbid: None,
        album_mbid: None,
    }
}

pub fn now_playing(name: &str, artist: &str) -> ScrobbleRecord {
    ScrobbleRecord {
        timestamp: None,
        now_playing: true,
        ..scrobble(name, artist, "Live", 0)
    }
}

/// `count` complete scrobbles named `<prefix> <n>`, newest first.
pub fn scrobbles(prefix: &str, count: usize, newest_timestamp: u64) -> Vec<ScrobbleRecord> {
    (0..count)
        .map(|i| {
            scrobble(
                &format!("{prefix} {i}"),
                "Artist",
                "Album",
                newest_timestamp - i as u64,
            )
        })
        .collect()
}

pub fn page(records: Vec<ScrobbleRecord>, page: u32, total_pages: u32) -> PageResult {
    PageResult {
        records,
        page,
        total_pages,
        per_page: Some(200),
        total: None,
    }
}

/// Split `records` into pages of `page_size`, all reporting the same total.
pub fn paginate(records: Vec<ScrobbleRecord>, page_size: usize) -> Vec<PageResult> {
    let chunks: Vec<Vec<ScrobbleRecord>> = records
        .chunks(page_size)
        .map(|chunk| chunk.to_vec())
        .collect();
    let total_pages = chunks.len() as u32;
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| page(chunk, i as u32 + 1, total_pages))
        .collect()
}

// =============================================================================
// Scripted page fetcher
// =============================================================================

#[derive(Default)]
struct ScriptState {
    failures: HashMap<(String, u32), VecDeque<LastFmError>>,
    calls: Vec<(String, u32, u32)>,
}

/// [`LastFmApiClient`] serving canned pages per username.
///
/// Failures queued with [`ScriptedApiClient::failing`] are returned, one per
/// call, before the page itself is served.
#[derive(Clone, Default)]
pub struct ScriptedApiClient {
    histories: Arc<HashMap<String, Vec<PageResult>>>,
    state: Arc<Mutex<ScriptState>>,
    latency: Duration,
}

impl ScriptedApiClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(mut self, username: &str, pages: Vec<PageResult>) -> Self {
        Arc::make_mut(&mut self.histories).insert(username.to_string(), pages);
        self
    }

    pub fn failing(self, username: &str, page: u32, errors: Vec<LastFmError>) -> Self {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert((username.to_string(), page), errors.into());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Pages requested so far, in order.
    pub fn requested_pages(&self, username: &str) -> Vec<u32> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(user, _, _)| user == username)
            .map(|(_, page, _)| *page)
            .collect()
    }

    pub fn requested_limits(&self) -> Vec<u32> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .map(|(_, _, limit)| *limit)
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }
}

#[async_trait]
impl LastFmApiClient for ScriptedApiClient {
    async fn get_recent_tracks_page(
        &self,
        credentials: &Credentials,
        page: u32,
        limit: u32,
    ) -> Result<PageResult> {
        let failure = {
            let mut state = self.state.lock().unwrap();
            state
                .calls
                .push((credentials.username.clone(), page, limit));
            state
                .failures
                .get_mut(&(credentials.username.clone(), page))
                .and_then(|queue| queue.pop_front())
        };

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if let Some(error) = failure {
            return Err(error);
        }

        self.histories
            .get(&credentials.username)
            .and_then(|pages| pages.get(page as usize - 1))
            .cloned()
            .ok_or_else(|| LastFmError::RemoteRequest {
                status: 404,
                message: Some(format!("no page {page} for {}", credentials.username)),
            })
    }
}

// =============================================================================
// Fake HTTP transport
// =============================================================================

#[derive(Debug, Clone)]
pub enum FakeResponse {
    Status(u16, String),
    Bytes(u16, Vec<u8>),
    TransportError(String),
}

#[derive(Debug, Default)]
struct FakeHttpState {
    responses: VecDeque<FakeResponse>,
    requests: Vec<String>,
}

/// [`http_client::HttpClient`] answering from a queue of canned responses.
#[derive(Debug, Clone, Default)]
pub struct FakeHttpClient {
    state: Arc<Mutex<FakeHttpState>>,
}

impl FakeHttpClient {
    pub fn new(responses: Vec<FakeResponse>) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeHttpState {
                responses: responses.into(),
                requests: Vec::new(),
            })),
        }
    }

    pub fn ok(body: &str) -> FakeResponse {
        FakeResponse::Status(200, body.to_string())
    }

    /// URLs requested so far.
    pub fn requests(&self) -> Vec<String> {
        self.state.lock().unwrap().requests.clone()
    }
}

#[async_trait]
impl http_client::HttpClient for FakeHttpClient {
    async fn send(
        &self,
        req: http_client::Request,
    ) -> std::result::Result<http_client::Response, http_types::Error> {
        let next = {
            let mut state = self.state.lock().unwrap();
            state.requests.push(req.url().to_string());
            state.responses.pop_front()
        };

        match next {
            Some(FakeResponse::Status(code, body)) => {
                let status = StatusCode::try_from(code)?;
                let mut response = http_types::Response::new(status);
                response.set_body(body);
                Ok(response)
            }
            Some(FakeResponse::Bytes(code, bytes)) => {
                let status = StatusCode::try_from(code)?;
                let mut response = http_types::Response::new(status);
                response.set_body(bytes);
                Ok(response)
            }
            Some(FakeResponse::TransportError(message)) => Err(http_types::Error::from_str(
                StatusCode::BadGateway,
                message,
            )),
            None => Err(http_types::Error::from_str(
                StatusCode::BadGateway,
                "no scripted response left",
            )),
        }
    }
}

/// JSON body for one page of `user.getrecenttracks`.
pub fn recent_tracks_json(records: &[ScrobbleRecord], page: u32, total_pages: u32) -> String {
    let tracks: Vec<serde_json::Value> = records
        .iter()
        .map(|r| {
            let mut track = serde_json::json!({
                "name": r.name,
                "url": r.url,
                "mbid": "",
                "artist": {"#text": r.artist, "mbid": ""},
                "album": {"#text": r.album, "mbid": ""},
            });
            match r.timestamp {
                Some(ts) => {
                    track["date"] = serde_json::json!({"uts": ts.to_string(), "#text": ""});
                }
                None => {
                    track["@attr"] = serde_json::json!({"nowplaying": "true"});
                }
            }
            track
        })
        .collect();

    serde_json::json!({
        "recenttracks": {
            "track": tracks,
            "@attr": {
                "user": "test_user",
                "page": page.to_string(),
                "perPage": "200",
                "totalPages": total_pages.to_string(),
                "total": (records.len() as u64).to_string(),
            }
        }
    })
    .to_string()
}
