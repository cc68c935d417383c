//! vigiad daemon library - exposes modules for testing.

pub mod config;
pub mod glpi;
pub mod mailer;
pub mod poller;
