use clap::{Arg, ArgMatches, Command};
use std::time::Duration;

pub const ARG_REDIS_URL: &str = "redis-url";
pub const ARG_STORE_TIMEOUT_MS: &str = "store-timeout-ms";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub redis_url: String,
    pub timeout: Duration,
}

impl Options {
    /// Parse store arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the Redis URL is missing.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let redis_url = match matches.get_one::<String>(ARG_REDIS_URL) {
            Some(value) if !value.trim().is_empty() => value.trim().to_string(),
            _ => anyhow::bail!("missing required argument: --{ARG_REDIS_URL}"),
        };
        let timeout = Duration::from_millis(
            matches
                .get_one::<u64>(ARG_STORE_TIMEOUT_MS)
                .copied()
                .unwrap_or(2000),
        );
        Ok(Self { redis_url, timeout })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_REDIS_URL)
                .long(ARG_REDIS_URL)
                .help("Redis connection string for rate limit counters")
                .env("GUARDIA_REDIS_URL")
                .required(true),
        )
        .arg(
            Arg::new(ARG_STORE_TIMEOUT_MS)
                .long(ARG_STORE_TIMEOUT_MS)
                .help("Upper bound for every store call in milliseconds")
                .env("GUARDIA_STORE_TIMEOUT_MS")
                .default_value("2000")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}
