//! downwatch-notify — the single alert a run may send, and who receives it.
//!
//! [`Alert::compose`] turns the notify-worthy reconciliation results of one
//! run into a subject/body pair. A [`Notifier`] publishes it: the
//! [`WebhookNotifier`] POSTs it as JSON, the [`LogNotifier`] only logs it.
//! Publishing is fire-and-forget from the engine's point of view; failures
//! are reported back but never retried.

pub mod alert;
pub mod notifier;

pub use alert::{Alert, AlertPrefixes, MAX_SUBJECT_CHARS};
pub use notifier::{LogNotifier, Notifier, NotifyError, PublishFuture, WebhookNotifier};
