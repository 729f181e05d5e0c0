use clap::{Arg, ArgMatches, Command};
use std::time::Duration;

pub const ARG_RATE_LIMIT_WINDOW_MS: &str = "rate-limit-window-ms";
pub const ARG_RATE_LIMIT_MAX: &str = "rate-limit-max";
pub const ARG_AUTH_RATE_LIMIT_WINDOW_MS: &str = "auth-rate-limit-window-ms";
pub const ARG_AUTH_RATE_LIMIT_MAX: &str = "auth-rate-limit-max";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    pub window: Duration,
    pub max_requests: u32,
    pub auth_window: Duration,
    pub auth_max_requests: u32,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        let millis = |id: &str, default: u64| {
            Duration::from_millis(matches.get_one::<u64>(id).copied().unwrap_or(default))
        };
        Self {
            window: millis(ARG_RATE_LIMIT_WINDOW_MS, 900_000),
            max_requests: matches
                .get_one::<u32>(ARG_RATE_LIMIT_MAX)
                .copied()
                .unwrap_or(100),
            auth_window: millis(ARG_AUTH_RATE_LIMIT_WINDOW_MS, 900_000),
            auth_max_requests: matches
                .get_one::<u32>(ARG_AUTH_RATE_LIMIT_MAX)
                .copied()
                .unwrap_or(5),
        }
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_RATE_LIMIT_WINDOW_MS)
                .long(ARG_RATE_LIMIT_WINDOW_MS)
                .help("General API rate limit window in milliseconds (0 disables)")
                .env("GUARDIA_RATE_LIMIT_WINDOW_MS")
                .default_value("900000")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_MAX)
                .long(ARG_RATE_LIMIT_MAX)
                .help("Requests allowed per client per window")
                .env("GUARDIA_RATE_LIMIT_MAX")
                .default_value("100")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_AUTH_RATE_LIMIT_WINDOW_MS)
                .long(ARG_AUTH_RATE_LIMIT_WINDOW_MS)
                .help("Authentication attempt window in milliseconds")
                .env("GUARDIA_AUTH_RATE_LIMIT_WINDOW_MS")
                .default_value("900000")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_AUTH_RATE_LIMIT_MAX)
                .long(ARG_AUTH_RATE_LIMIT_MAX)
                .help("Authentication attempts allowed per client per window")
                .env("GUARDIA_AUTH_RATE_LIMIT_MAX")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
}
