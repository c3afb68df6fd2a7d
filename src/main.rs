use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fanlink::{
    boot,
    cli::{self, config::DaemonConfig, master, slave},
};

fn main() -> Result<()> {
    let matches = cli::parse_args();

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            running.store(false, Ordering::Relaxed);
        })?;
    }

    match matches.subcommand() {
        Some(("master", sub)) => {
            boot::init_logging(sub.get_flag("verbose"));
            let config = cli::master_config(sub)?;
            master::run(&config, running)
        }
        Some(("daemon", _)) => {
            // Configuration errors go to stderr before any logger exists,
            // matching how a broken unit file should surface.
            let config = DaemonConfig::from_env().map_err(|err| {
                eprintln!("{err}");
                eprintln!("Please set all required environment variables before running the daemon.");
                err
            })?;
            boot::init_logging(config.verbose);
            log::info!("Fan temperature daemon starting");
            let result = slave::run(&config, running);
            log::info!("Fan temperature daemon stopped");
            result
        }
        _ => unreachable!("subcommand is required"),
    }
}
