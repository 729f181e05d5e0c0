use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;
use std::time::Duration;

pub const ARG_SESSION_TIMEOUT_MINUTES: &str = "session-timeout-minutes";
pub const ARG_SESSION_WARNING_MINUTES: &str = "session-warning-minutes";
pub const ARG_SESSION_SWEEP_SECONDS: &str = "session-sweep-seconds";
pub const ARG_TOTP_ISSUER: &str = "totp-issuer";
pub const ARG_BACKUP_CODE_KEY: &str = "backup-code-key";

#[derive(Debug, Clone)]
pub struct Options {
    pub session_timeout_minutes: i64,
    pub session_warning_minutes: i64,
    pub session_sweep: Duration,
    pub totp_issuer: String,
    /// `None` falls back to the CSRF secret.
    pub backup_code_key: Option<SecretString>,
}

impl Options {
    /// Parse session and two-factor arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the warning threshold is not shorter than the idle timeout.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let session_timeout_minutes = matches
            .get_one::<i64>(ARG_SESSION_TIMEOUT_MINUTES)
            .copied()
            .unwrap_or(60);
        let session_warning_minutes = matches
            .get_one::<i64>(ARG_SESSION_WARNING_MINUTES)
            .copied()
            .unwrap_or(5);
        if session_warning_minutes >= session_timeout_minutes {
            anyhow::bail!(
                "--{ARG_SESSION_WARNING_MINUTES} must be lower than --{ARG_SESSION_TIMEOUT_MINUTES}"
            );
        }

        let session_sweep = Duration::from_secs(
            matches
                .get_one::<u64>(ARG_SESSION_SWEEP_SECONDS)
                .copied()
                .unwrap_or(3600),
        );

        let totp_issuer = matches
            .get_one::<String>(ARG_TOTP_ISSUER)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "Guardia".to_string());

        let backup_code_key = matches
            .get_one::<String>(ARG_BACKUP_CODE_KEY)
            .filter(|v| !v.trim().is_empty())
            .map(|v| SecretString::from(v.clone()));

        Ok(Self {
            session_timeout_minutes,
            session_warning_minutes,
            session_sweep,
            totp_issuer,
            backup_code_key,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_session_args(command);
    with_two_factor_args(command)
}

fn with_session_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SESSION_TIMEOUT_MINUTES)
                .long(ARG_SESSION_TIMEOUT_MINUTES)
                .help("Idle timeout reported to clients, in minutes")
                .env("GUARDIA_SESSION_TIMEOUT_MINUTES")
                .default_value("60")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_SESSION_WARNING_MINUTES)
                .long(ARG_SESSION_WARNING_MINUTES)
                .help("Minutes before the idle timeout at which clients are warned")
                .env("GUARDIA_SESSION_WARNING_MINUTES")
                .default_value("5")
                .value_parser(clap::value_parser!(i64).range(0..)),
        )
        .arg(
            Arg::new(ARG_SESSION_SWEEP_SECONDS)
                .long(ARG_SESSION_SWEEP_SECONDS)
                .help("Interval of the expired-session sweep in seconds")
                .env("GUARDIA_SESSION_SWEEP_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}

fn with_two_factor_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TOTP_ISSUER)
                .long(ARG_TOTP_ISSUER)
                .help("Issuer shown in authenticator apps")
                .env("GUARDIA_TOTP_ISSUER")
                .default_value("Guardia"),
        )
        .arg(
            Arg::new(ARG_BACKUP_CODE_KEY)
                .long(ARG_BACKUP_CODE_KEY)
                .help("Key for backup code digests (defaults to the CSRF secret)")
                .long_help(
                    "HMAC key for stored backup code digests. Changing it invalidates every\nissued backup code. Defaults to the CSRF secret when unset.",
                )
                .env("GUARDIA_BACKUP_CODE_KEY")
                .hide_env_values(true),
        )
}
