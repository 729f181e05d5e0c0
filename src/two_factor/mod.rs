//! Two-factor authentication (TOTP + backup codes).
//!
//! Flow Overview:
//! 1) `setup` creates a *pending* enrollment: 256-bit secret, QR code,
//!    ten backup codes (returned once, stored as keyed HMAC-SHA256 digests).
//! 2) `enable` confirms the pending enrollment with a first TOTP code.
//! 3) `verify` accepts a TOTP code for the current step or one step either
//!    side, else consumes a backup code with a conditional store update.
//! 4) `disable` and `regenerate_backup_codes` require a successful verify.
//!
//! State machine: `none -> pending -> enabled -> disabled`. A disabled
//! enrollment has its secret and codes purged and may be set up again.
//!
//! Every verification attempt is appended to the audit trail with the method
//! used. Secrets and codes are never logged.

mod codes;
mod memory;
mod models;
mod repo;
mod service;

pub use codes::{BACKUP_CODE_COUNT, DRIFT_STEPS, TOTP_PERIOD_SECONDS};
pub use memory::MemoryTwoFactorStore;
pub use models::{
    AuditEntry, SetupResult, TwoFactorAction, TwoFactorEnrollment, TwoFactorState,
    TwoFactorStatus, VerificationMethod, VerifyOutcome,
};
pub use repo::{PgTwoFactorStore, TwoFactorStore};
pub use service::{TwoFactorConfig, TwoFactorError, TwoFactorService};
