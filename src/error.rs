use thiserror::Error;

/// Error types for fetching a Last.fm listening history.
///
/// Single page requests fail with [`LastFmError::RemoteRequest`],
/// [`LastFmError::Decode`] or [`LastFmError::Http`]. Those are recoverable at the
/// per-page retry boundary and only reach the caller wrapped in
/// [`LastFmError::PageFetchExhausted`] once every attempt for a page has failed.
///
/// # Error Handling Examples
///
/// ```rust,no_run
/// use scrobble_doctor::{Credentials, LastFmApiClientImpl, LastFmError, ScrobbleFetcher};
///
/// #[tokio::main]
/// async fn main() {
///     let client = LastFmApiClientImpl::new(Box::new(http_client::native::NativeClient::new()));
///     let fetcher = ScrobbleFetcher::new(client, Default::default());
///     let credentials = Credentials::new("username", "api-key");
///
///     match fetcher.fetch_all(&credentials, Some(500), |_| {}).await {
///         Ok(scrobbles) => println!("Fetched {} scrobbles", scrobbles.len()),
///         Err(LastFmError::Input(msg)) => eprintln!("Check the form: {msg}"),
///         Err(LastFmError::PageFetchExhausted { page, attempts, message }) => {
///             eprintln!("Page {page} failed {attempts} times: {message}");
///         }
///         Err(e) => eprintln!("Other error: {e}"),
///     }
/// }
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LastFmError {
    /// HTTP/network related errors.
    ///
    /// Connection failures, DNS errors and failures while reading the
    /// response body end up here.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The remote service answered with a non-success status code.
    ///
    /// `message` holds the service's own error text when the body carried
    /// its JSON error envelope.
    #[error("Last.fm API error: {status}{}", message.as_deref().map(|m| format!(" ({m})")).unwrap_or_default())]
    RemoteRequest {
        /// HTTP status code of the response
        status: u16,
        /// Error message reported by the service, if any
        message: Option<String>,
    },

    /// The response body could not be decoded into a page of scrobbles.
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// A single page failed on every retry attempt.
    ///
    /// The whole aggregation stops at this point and no further pages are
    /// requested.
    #[error("Failed to fetch page {page} after {attempts} attempts: {message}")]
    PageFetchExhausted {
        /// The 1-based page number that could not be fetched
        page: u32,
        /// Number of attempts made for that page
        attempts: u32,
        /// Message of the last underlying error
        message: String,
    },

    /// Missing or blank username or API key.
    #[error("Invalid input: {0}")]
    Input(String),

    /// The fetch session was cancelled or superseded by a newer one.
    #[error("Fetch cancelled")]
    Cancelled,
}

impl LastFmError {
    /// Whether the per-page retry policy may try again after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LastFmError::Http(_) | LastFmError::RemoteRequest { .. } | LastFmError::Decode(_)
        )
    }

    /// HTTP status code carried by the error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            LastFmError::RemoteRequest { status, .. } => Some(*status),
            _ => None,
        }
    }
}
