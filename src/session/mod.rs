//! Session lifecycle.
//!
//! State machine per session: `active -> revoked | expired`. Both end states
//! are terminal; every store revocation is conditional on the row still
//! being active.
//!
//! - Sessions live 30 days from creation. Expiry is enforced on read and by a
//!   periodic sweep.
//! - A user keeps at most 10 active sessions. Creating one more revokes the
//!   least recently active (`max_sessions`).
//! - `last_activity` is refreshed at most once per hour of inactivity, as a
//!   best-effort write.
//! - Session ids are UUID v4 values carried in the `guardia_session` cookie or
//!   as a bearer token. No session state is cached in-process.

mod device;
mod memory;
mod models;
mod repo;
mod service;

pub use device::{DeviceInfo, DeviceType};
pub use memory::MemorySessionStore;
pub use models::{
    CreatedSession, InvalidSession, RevokeOutcome, RevokeReason, Session, SessionSummary,
    SessionValidation,
};
pub use repo::{PgSessionStore, SessionStore};
pub use service::{IdleStatus, SessionConfig, SessionError, SessionManager, spawn_expiry_sweeper};
