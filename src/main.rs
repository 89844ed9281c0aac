use std::{path::PathBuf, process::ExitCode, sync::Arc};

use log::error;

use procwatch::app::cli;
use procwatch::logging::init_logging;
use procwatch::{HostConfig, TaskManager};

fn main() -> ExitCode {
    let config_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(HostConfig::default_path);

    let config = match HostConfig::load_or_default(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {}", config_path.display(), e);
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config.log_level);

    let registry = match config.registry() {
        Ok(registry) => registry,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let manager = TaskManager::new(registry, Arc::new(config.working_dir.clone()), config.poll_interval());
    match cli::run_cli(manager, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
