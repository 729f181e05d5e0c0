use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_CSRF_SECRET: &str = "csrf-secret";
pub const ARG_CSRF_EXEMPT_PATH: &str = "csrf-exempt-path";
pub const ARG_PUBLIC_ORIGIN: &str = "public-origin";

#[derive(Debug, Clone)]
pub struct Options {
    pub secret: SecretString,
    pub exempt_paths: Vec<String>,
    pub public_origin: String,
}

impl Options {
    /// Parse CSRF arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the secret is missing or blank.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let secret = match matches.get_one::<String>(ARG_CSRF_SECRET) {
            Some(value) if !value.trim().is_empty() => SecretString::from(value.clone()),
            _ => anyhow::bail!("missing required argument: --{ARG_CSRF_SECRET}"),
        };

        let exempt_paths = matches
            .get_many::<String>(ARG_CSRF_EXEMPT_PATH)
            .map(|values| {
                values
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let public_origin = matches
            .get_one::<String>(ARG_PUBLIC_ORIGIN)
            .cloned()
            .unwrap_or_else(|| "https://localhost".to_string());

        Ok(Self {
            secret,
            exempt_paths,
            public_origin,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_CSRF_SECRET)
                .long(ARG_CSRF_SECRET)
                .help("Secret used to sign CSRF tokens")
                .long_help(
                    "Secret used to HMAC-sign CSRF tokens. Every replica must share the same value,\notherwise tokens issued by one instance are rejected by another.",
                )
                .env("GUARDIA_CSRF_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_CSRF_EXEMPT_PATH)
                .long(ARG_CSRF_EXEMPT_PATH)
                .help("Extra path prefix that skips CSRF validation (repeatable)")
                .env("GUARDIA_CSRF_EXEMPT_PATHS")
                .value_delimiter(',')
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new(ARG_PUBLIC_ORIGIN)
                .long(ARG_PUBLIC_ORIGIN)
                .help("Origin of the web frontend (CORS, secure cookies)")
                .env("GUARDIA_PUBLIC_ORIGIN")
                .default_value("https://localhost"),
        )
}
