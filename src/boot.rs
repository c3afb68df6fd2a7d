use chrono::Local;
use log::LevelFilter;
use std::io::{self, Write};

use env_logger::{Builder, Target};

/// Multi-writer for logging to both file and stdout
struct DualWriter {
    file: std::fs::File,
    stdout: io::Stdout,
}

impl Write for DualWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write_all(buf)?;
        self.stdout.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.stdout.flush()?;
        Ok(())
    }
}

/// Set up logging for either subcommand. With `FANLINK_LOG_FILE` set, log
/// lines go to that file and the terminal; otherwise plain `env_logger`.
/// `verbose` lowers the default filter to debug (RUST_LOG still overrides).
pub fn init_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    match std::env::var("FANLINK_LOG_FILE").ok() {
        Some(path) => {
            if let Err(err) = init_dual_logger(&path, level) {
                eprintln!("Failed to initialize file logger at '{path}': {err}");
                init_terminal_logger(level);
            }
        }
        None => init_terminal_logger(level),
    }
}

fn init_terminal_logger(level: LevelFilter) {
    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter_level(level)
        .parse_default_env()
        .init();
}

/// Dual logger used when a log file is configured (outputs to both file and
/// terminal).
fn init_dual_logger(path: &str, level: LevelFilter) -> io::Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;

    let dual_writer = DualWriter {
        file,
        stdout: io::stdout(),
    };

    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .target(Target::Pipe(Box::new(dual_writer)))
        .filter_level(level)
        .parse_default_env()
        .init();

    log::info!("Logger initialized - logging to file and terminal");

    Ok(())
}
