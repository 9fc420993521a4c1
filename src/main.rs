use std::{process::ExitCode, sync::Arc};

use clap::Parser;
use log::{debug, error};

use journal_memos::{App, Cli, Config, FsVault, MemoService, Result};

pub fn initialize_logger(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_secs()
        .format_module_path(true)
        .init();

    debug!("Logger initialized");
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);
    debug!("Using vault at {}", config.vault_dir.display());

    let vault = Arc::new(FsVault::new(config.vault_dir.clone()));
    let service = Arc::new(MemoService::new(vault, config.clone()));
    let app = App::new(service, config, cli.config.clone(), cli.verbose);

    app.run(cli.command).await
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    initialize_logger(cli.verbose);

    debug!("Application starting up");
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("{} {}", console::style("error:").red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
