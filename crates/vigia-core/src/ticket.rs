//! Ticket data model shared by the source, scorer and notifier.

use std::path::PathBuf;

/// One ticket row scraped from the portal list. Fresh every cycle,
/// never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTicket {
    /// Portal ticket id, when the link exposes one.
    pub id: Option<String>,
    pub title: String,
    pub category: String,
    pub link: String,
}

impl RawTicket {
    /// Ledger identifier: the portal id, or the full link for portals
    /// that hide it. Both stay stable across cycles and knowledge-base
    /// edits.
    pub fn identifier(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.link)
    }
}

/// Extended detail fetched per ticket before notifying.
#[derive(Debug, Clone, Default)]
pub struct TicketDetail {
    pub description: String,
    /// Inline image references from the ticket body (portal URLs).
    pub image_refs: Vec<String>,
    /// Pending tickets are skipped entirely: no mail, no ledger entry.
    pub is_pending: bool,
}

/// Payload handed to the notifier for one qualifying ticket.
#[derive(Debug, Clone)]
pub struct Alert {
    /// Same identifier the ledger records.
    pub ticket_id: String,
    /// Title of the matched knowledge entry, not of the ticket.
    pub entry_title: String,
    pub link: String,
    pub description: String,
    pub image_paths: Vec<PathBuf>,
}
