//! Core matching and deduplication engine for the GLPI watcher.
//!
//! Everything that decides *whether* a ticket deserves an alert lives
//! here: text normalization, the keyword knowledge base, the whole-word
//! match scorer and the persistent sent-ledger. Talking to the portal
//! and sending mail are behind the [`source::TicketSource`] and
//! [`notify::Notifier`] seams; this crate does no network I/O.

pub mod knowledge;
pub mod ledger;
pub mod matcher;
pub mod normalize;
pub mod notify;
pub mod source;
pub mod ticket;
