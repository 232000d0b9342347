//! Postgres persistence for templates, notifications and recipient groups.

pub mod groups;
pub mod notifications;
pub mod templates;

pub use groups::{GroupRepository, PgGroupMembership};
pub use notifications::NotificationRepository;
pub use templates::TemplateRepository;
