//! Maps validated CLI matches to the action the binary runs.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{auth, csrf, rate_limit, store};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let store_opts = store::Options::parse(matches)?;
    let csrf_opts = csrf::Options::parse(matches)?;
    let rate_limit_opts = rate_limit::Options::parse(matches);
    let auth_opts = auth::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        redis_url: store_opts.redis_url,
        store_timeout: store_opts.timeout,
        csrf_secret: csrf_opts.secret,
        csrf_exempt_paths: csrf_opts.exempt_paths,
        public_origin: csrf_opts.public_origin,
        rate_limit_window: rate_limit_opts.window,
        rate_limit_max: rate_limit_opts.max_requests,
        auth_rate_limit_window: rate_limit_opts.auth_window,
        auth_rate_limit_max: rate_limit_opts.auth_max_requests,
        session_timeout_minutes: auth_opts.session_timeout_minutes,
        session_warning_minutes: auth_opts.session_warning_minutes,
        session_sweep: auth_opts.session_sweep,
        totp_issuer: auth_opts.totp_issuer,
        backup_code_key: auth_opts.backup_code_key,
    }))
}
