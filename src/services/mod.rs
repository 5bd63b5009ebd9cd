//! Service layer for the digester.
//!
//! This module contains:
//! - The content provider client (`PostProvider`, `RedditClient`)
//! - Notification sinks (`Mailer`, `ResendMailer`, `GmailMailer`, `LogMailer`)
//! - Digest rendering (`digest::render`)
//! - The schedule lifecycle manager (`ScheduleService`)

pub mod digest;
mod mailer;
mod reddit;
mod schedules;

pub use mailer::{GmailMailer, LogMailer, Mailer, ResendMailer, build_mailer};
pub use reddit::{PostPage, PostProvider, RedditClient};
pub use schedules::{ReconcileReport, ScheduleService};

#[cfg(test)]
pub(crate) use schedules::tests::{FakeTrigger, input as sample_input};
