//! # scrobble-doctor
//!
//! Fetch a Last.fm user's complete listening history through the public web
//! API and find the scrobbles whose artist or album metadata is missing.
//!
//! The crate is organised in layers:
//!
//! - [`api`]: one HTTP request for one page of recent tracks ([`LastFmApiClient`]).
//! - [`fetch`]: the aggregation driver ([`ScrobbleFetcher`]) with per-page
//!   retry, request pacing, progress reporting and an optional scrobble cap.
//! - [`session`]: [`HistoryLoader`], which exposes a running fetch to a UI as
//!   watchable state and discards results of superseded sessions.
//! - [`audit`]: grouping of scrobbles with missing metadata.

pub mod api;
pub mod audit;
pub mod cancel;
pub mod error;
pub mod fetch;
pub mod retry;
pub mod session;
pub mod types;

pub use api::{LastFmApiClient, LastFmApiClientImpl};
#[cfg(feature = "mock")]
pub use api::MockLastFmApiClient;
pub use audit::{find_problem_tracks, AuditSummary, MissingFields, ProblemTrack};
pub use cancel::CancellationState;
pub use error::LastFmError;
pub use fetch::ScrobbleFetcher;
pub use session::{HistoryLoader, LoaderState};
pub use types::{
    ClientEvent, ClientEventReceiver, ClientEventWatcher, Credentials, FetchConfig, FetchProgress,
    PageResult, RequestInfo, RetryConfig, ScrobbleRecord, SharedEventBroadcaster,
};

pub type Result<T> = std::result::Result<T, LastFmError>;
