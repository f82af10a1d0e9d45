//! Load-test driver: `loadtest --NUM_CLIENTS=100 --MESSAGES_PER_CLIENT=50`.
//!
//! Exits 0 once the results file is written, 1 on bad arguments, a missed
//! deadline, or a failed write.

use std::process::ExitCode;

use tracing::{error, info};

use wsrelay::harness::{HarnessConfig, LoadTestCoordinator};
use wsrelay::logging;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match HarnessConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("loadtest: {e}");
            return ExitCode::FAILURE;
        }
    };
    logging::init(&config.log_level);

    let results_dir = config.results_dir.clone();
    let file_name = config.results_file_name();
    let coordinator = LoadTestCoordinator::new(config);

    let report = match coordinator.run().await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "load test failed");
            return ExitCode::FAILURE;
        }
    };

    match report.write_to(&results_dir, &file_name) {
        Ok(path) => {
            info!(path = %path.display(), "results saved");
            println!("{}", report.summary());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "could not save results");
            ExitCode::FAILURE
        }
    }
}
