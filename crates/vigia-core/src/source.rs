//! Ticket source seam.
//!
//! The polling controller only ever talks to the portal through this
//! trait, so the matching and ledger logic is testable with an in-memory
//! fake and the real HTTP client stays swappable.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::ticket::{RawTicket, TicketDetail};

/// Failures raised by a ticket source. `Auth` and `SessionExpired` are
/// session-level (the controller re-authenticates); the rest are
/// per-item (the controller skips the item and keeps going).
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("session expired")]
    SessionExpired,

    #[error("network error: {0}")]
    Network(String),

    #[error("cannot parse portal page: {0}")]
    Parse(String),

    #[error("ticket {id}: {reason}")]
    Ticket { id: String, reason: String },

    #[error("image {reference}: {reason}")]
    Image { reference: String, reason: String },
}

/// A portal that yields tickets. The production implementation drives a
/// GLPI web session; tests use an in-memory fake.
#[async_trait]
pub trait TicketSource: Send + Sync {
    /// Open a fresh portal session, replacing any existing one.
    async fn establish_session(&mut self) -> Result<(), SourceError>;

    /// Whether a session handle currently exists. Says nothing about
    /// whether the portal still honors it.
    fn has_session(&self) -> bool;

    /// Probe the portal for session liveness. Probe failures count as
    /// "not alive" so the controller simply re-authenticates.
    async fn is_session_alive(&self) -> bool;

    /// The full current ticket list.
    async fn fetch_tickets(&self) -> Result<Vec<RawTicket>, SourceError>;

    /// Extended detail for one ticket.
    async fn fetch_detail(&self, ticket: &RawTicket) -> Result<TicketDetail, SourceError>;

    /// Download one inline image to a local file, using the
    /// authenticated session.
    async fn download_image(&self, reference: &str) -> Result<PathBuf, SourceError>;

    /// Release the session. Best-effort; never fails.
    async fn close_session(&mut self);
}
