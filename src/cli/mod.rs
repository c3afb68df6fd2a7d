pub mod config;
pub mod master;
pub mod slave;

use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Arg, ArgMatches, Command};

use crate::protocol::scheduler::PollTimings;
use self::config::{parse_baud_rate, MasterConfig};

/// Parse command line arguments and return ArgMatches.
pub fn parse_args() -> ArgMatches {
    Command::new("fanlink")
        .about("Serial temperature polling: fan-controller master and sensor daemon")
        .subcommand_required(true)
        .subcommand(
            Command::new("master")
                .about("Poll sensor units round-robin over multiplexed serial channels")
                .arg(
                    Arg::new("port")
                        .long("port")
                        .short('p')
                        .help("Serial port for one device channel (repeat per device, device order)")
                        .value_name("PORT")
                        .action(clap::ArgAction::Append)
                        .required(true),
                )
                .arg(
                    Arg::new("baud-rate")
                        .long("baud-rate")
                        .short('b')
                        .help("Baud rate shared by all channels")
                        .value_name("BAUD")
                        .default_value("115200"),
                )
                .arg(
                    Arg::new("poll-interval")
                        .long("poll-interval")
                        .help("Milliseconds between poll cycle starts")
                        .value_name("MS")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("1000"),
                )
                .arg(
                    Arg::new("response-timeout")
                        .long("response-timeout")
                        .help("Milliseconds to wait for one device's response")
                        .value_name("MS")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("200"),
                )
                .arg(
                    Arg::new("switch-delay")
                        .long("switch-delay")
                        .help("Milliseconds to let a channel stabilize after switching")
                        .value_name("MS")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("50"),
                )
                .arg(
                    Arg::new("max-missed-polls")
                        .long("max-missed-polls")
                        .help("Consecutive misses before a device is marked disconnected")
                        .value_name("N")
                        .value_parser(clap::value_parser!(u32))
                        .default_value("10"),
                )
                .arg(
                    Arg::new("verbose")
                        .long("verbose")
                        .short('v')
                        .help("Enable debug logging")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("daemon")
                .about("Answer POLL requests with CPU/NVMe temperatures (FAN_TEMP_* environment)"),
        )
        .get_matches()
}

/// Build the master configuration from parsed `master` subcommand arguments.
pub fn master_config(matches: &ArgMatches) -> Result<MasterConfig> {
    let ports: Vec<String> = matches
        .get_many::<String>("port")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();

    let baud_raw = matches
        .get_one::<String>("baud-rate")
        .ok_or_else(|| anyhow!("baud rate missing"))?;
    let baud_rate =
        parse_baud_rate(baud_raw).ok_or_else(|| anyhow!("Unsupported baud rate: {baud_raw}"))?;

    let ms = |name: &str| -> Duration {
        Duration::from_millis(*matches.get_one::<u64>(name).unwrap_or(&0))
    };

    Ok(MasterConfig {
        ports,
        baud_rate,
        timings: PollTimings {
            poll_interval: ms("poll-interval"),
            response_timeout: ms("response-timeout"),
        },
        port_switch_delay: ms("switch-delay"),
        max_missed_polls: *matches.get_one::<u32>("max-missed-polls").unwrap_or(&10),
        ..MasterConfig::default()
    })
}
