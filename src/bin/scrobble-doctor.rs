use clap::Parser;
use scrobble_doctor::{
    find_problem_tracks, AuditSummary, Credentials, FetchConfig, HistoryLoader, LastFmApiClientImpl,
};
use std::env;
use std::sync::Arc;

/// Find Last.fm scrobbles with missing artist or album metadata
#[derive(Parser)]
#[command(
    name = "scrobble-doctor",
    about = "Find Last.fm scrobbles with missing artist or album metadata",
    long_about = None
)]
struct Cli {
    /// Last.fm username (defaults to LASTFM_USERNAME)
    username: Option<String>,

    /// Last.fm API key (defaults to LASTFM_API_KEY)
    #[arg(long)]
    api_key: Option<String>,

    /// Stop after this many scrobbles (0 fetches the whole history)
    #[arg(long, default_value_t = 0)]
    max: usize,

    /// Number of problem tracks to list
    #[arg(long, default_value_t = 25)]
    limit: usize,

    /// Show detailed debug information
    #[arg(long)]
    verbose: bool,
}

fn resolve(value: Option<String>, var: &str) -> Result<String, String> {
    value
        .or_else(|| env::var(var).ok())
        .ok_or_else(|| format!("{var} environment variable not set"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Cli::parse();

    let mut logger = env_logger::Builder::from_default_env();
    if args.verbose {
        logger.filter_module("scrobble_doctor", log::LevelFilter::Debug);
    }
    logger.init();

    let credentials = match (
        resolve(args.username, "LASTFM_USERNAME"),
        resolve(args.api_key, "LASTFM_API_KEY"),
    ) {
        (Ok(username), Ok(api_key)) => Credentials::new(username, api_key),
        (Err(e), _) | (_, Err(e)) => {
            eprintln!("❌ Error: {e}");
            eprintln!();
            eprintln!("Pass the username and --api-key, or set:");
            eprintln!("  LASTFM_USERNAME=your_lastfm_username");
            eprintln!("  LASTFM_API_KEY=your_api_key");
            std::process::exit(1);
        }
    };

    let http_client = http_client::native::NativeClient::new();
    let client = LastFmApiClientImpl::new(Box::new(http_client));
    let config = FetchConfig::default();
    let page_size = config.effective_page_size();
    let max = Some(args.max).filter(|&m| m > 0);

    let loader = Arc::new(HistoryLoader::new(client, config));

    // Print progress as the loader publishes it
    let mut state_rx = loader.subscribe();
    let progress_printer = tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let state = state_rx.borrow_and_update().clone();
            if state.progress.current_page == 0 {
                continue;
            }
            println!(
                "📥 Page {}/{}: {} scrobbles, {} problem tracks so far",
                state.progress.current_page,
                state.progress.display_total_pages(max, page_size),
                state.progress.scrobbles_fetched,
                find_problem_tracks(state.current_data()).len()
            );
            if !state.is_loading {
                break;
            }
        }
    });

    println!("🔍 Scanning scrobbles for {}...", credentials.username);
    let result = loader.load(&credentials, max).await;
    progress_printer.abort();

    let scrobbles = match result {
        Ok(scrobbles) => scrobbles,
        Err(e) => {
            eprintln!("❌ Scan failed: {e}");
            std::process::exit(1);
        }
    };

    let summary = AuditSummary::from_records(&scrobbles);
    println!();
    println!(
        "✅ Scanned {} scrobbles: {} problem tracks ({} missing artist, {} missing album)",
        summary.total_scrobbles, summary.issues, summary.missing_artist, summary.missing_album
    );

    if summary.is_clean() {
        println!("🎉 Every scrobble has an artist and an album");
        return Ok(());
    }

    println!();
    for problem in find_problem_tracks(&scrobbles).iter().take(args.limit) {
        let when = problem
            .scrobble
            .scrobbled_at()
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!(
            "  {:>4}x  {}  (missing: {})  last {}",
            problem.count, problem.scrobble, problem.missing, when
        );
        println!(
            "         {}",
            problem.library_edit_url(&credentials.username)
        );
    }
    if summary.issues > args.limit {
        println!("  ... and {} more", summary.issues - args.limit);
    }

    Ok(())
}
