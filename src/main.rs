//! CLI entry point: `crawler <threads> [max_depth] [max_queue_size]`.
//!
//! Exit codes (spec.md §6): `0` normal shutdown, `2` invalid arguments,
//! `3` fatal initialisation, `130` on signal-requested shutdown.

use crawler::error::exit_code;
use crawler::{Config, CrawlerError, CrawlerOrchestrator};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(e @ CrawlerError::Config(_)) => {
            log::error!("invalid arguments: {e}");
            std::process::exit(exit_code::INVALID_ARGS);
        }
        Err(e) => {
            log::error!("fatal initialisation error: {e}");
            std::process::exit(exit_code::FATAL_INIT);
        }
    };

    let (orchestrator, storage_rx) = match CrawlerOrchestrator::bootstrap(config).await {
        Ok(parts) => parts,
        Err(e) => {
            log::error!("fatal initialisation error: {e}");
            std::process::exit(exit_code::FATAL_INIT);
        }
    };

    let cause = match orchestrator.run(storage_rx).await {
        Ok(cause) => cause,
        Err(e) => {
            log::error!("crawl run failed: {e}");
            std::process::exit(exit_code::FATAL_INIT);
        }
    };

    std::process::exit(crawler::exit_code_for(&cause));
}
