use crate::{
    api::{self, RateLimitRules, ServerConfig},
    csrf::CsrfConfig,
    rate_limit::RateLimitPolicy,
    session::SessionConfig,
    two_factor::TwoFactorConfig,
};
use anyhow::Result;
use secrecy::SecretString;
use std::time::Duration;
use tracing::info;
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub redis_url: String,
    pub store_timeout: Duration,
    pub csrf_secret: SecretString,
    pub csrf_exempt_paths: Vec<String>,
    pub public_origin: String,
    pub rate_limit_window: Duration,
    pub rate_limit_max: u32,
    pub auth_rate_limit_window: Duration,
    pub auth_rate_limit_max: u32,
    pub session_timeout_minutes: i64,
    pub session_warning_minutes: i64,
    pub session_sweep: Duration,
    pub totp_issuer: String,
    pub backup_code_key: Option<SecretString>,
}

/// Execute the server action.
/// # Errors
/// Returns an error if a store is unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);
    let config = server_config(&args);
    api::new(args.port, args.dsn, config).await
}

fn server_config(args: &Args) -> ServerConfig {
    let csrf = CsrfConfig::new();
    let mut exempt = csrf.exempt_prefixes().to_vec();
    exempt.extend(args.csrf_exempt_paths.iter().cloned());

    let rate_limits = RateLimitRules::new(
        RateLimitPolicy::api()
            .with_window(args.rate_limit_window)
            .with_max_requests(args.rate_limit_max),
        RateLimitPolicy::auth()
            .with_window(args.auth_rate_limit_window)
            .with_max_requests(args.auth_rate_limit_max),
    );

    ServerConfig {
        redis_url: args.redis_url.clone(),
        public_origin: args.public_origin.clone(),
        csrf_secret: args.csrf_secret.clone(),
        csrf: csrf.with_exempt_prefixes(exempt),
        rate_limits,
        sessions: SessionConfig::new()
            .with_idle_timeout_minutes(args.session_timeout_minutes)
            .with_warning_threshold_minutes(args.session_warning_minutes),
        two_factor: TwoFactorConfig::new()
            .with_issuer(args.totp_issuer.clone())
            .with_backup_code_key(
                args.backup_code_key
                    .clone()
                    .unwrap_or_else(|| args.csrf_secret.clone()),
            ),
        store_timeout: args.store_timeout,
        session_sweep: args.session_sweep,
    }
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("dsn", redact_url(&args.dsn)),
        ("redis_url", redact_url(&args.redis_url)),
        ("public_origin", args.public_origin.clone()),
        ("csrf_exempt_paths", args.csrf_exempt_paths.join(",")),
        (
            "rate_limit",
            format!(
                "{}/{}ms",
                args.rate_limit_max,
                args.rate_limit_window.as_millis()
            ),
        ),
        (
            "auth_rate_limit",
            format!(
                "{}/{}ms",
                args.auth_rate_limit_max,
                args.auth_rate_limit_window.as_millis()
            ),
        ),
        ("store_timeout", format!("{}ms", args.store_timeout.as_millis())),
        (
            "session_idle",
            format!(
                "{}m (warn {}m)",
                args.session_timeout_minutes, args.session_warning_minutes
            ),
        ),
        ("session_sweep", format!("{}s", args.session_sweep.as_secs())),
        ("totp_issuer", args.totp_issuer.clone()),
        (
            "backup_code_key",
            if args.backup_code_key.is_some() {
                "set".to_string()
            } else {
                "csrf secret".to_string()
            },
        ),
    ];
    log_entries("Startup configuration", &entries);
}

fn redact_url(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-url".to_string(),
    }
}

fn log_entries(title: &str, entries: &[(&str, String)]) {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!("{}\n\n{title}:", guardia_banner());
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn guardia_banner() -> String {
    let short_hash = short_commit(crate::GIT_COMMIT_HASH);
    GUARDIA_BANNER.replace(
        "{VERSION}",
        &format!(" - {} - {}", env!("CARGO_PKG_VERSION"), short_hash),
    )
}

fn short_commit(hash: &str) -> String {
    let trimmed = hash.trim();
    trimmed.get(..7).unwrap_or(trimmed).to_string()
}

const GUARDIA_BANNER: &str = r"
   _______
  |   |   |
  |---+---|   G U A R D I A {VERSION}
  |   |   |
   \  |  /
    \_|_/";
