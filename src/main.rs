use beacon_gateway::app::{self, Options};
use beacon_gateway::logging::init_logging;
use clap::Parser;
use std::panic::{self, PanicHookInfo};

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd) that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();
    init_logging(options.verbose);

    match app::run(options).await {
        Ok(summary) => {
            tracing::info!(
                advertisements = summary.advertisements,
                uploads = summary.uploads,
                accepted = summary.accepted,
                failed = summary.failed,
                "gateway stopped"
            );
            std::process::exit(EXIT_SUCCESS)
        }
        Err(why) => {
            tracing::error!(error = %why, "gateway failed");
            std::process::exit(EXIT_ERROR);
        }
    }
}
