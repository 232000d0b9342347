use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery state of a notification.
///
/// `Pending` is the only non-terminal state. Transitions are driven by the
/// notifier's `DeliveryStateMachine`; nothing leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    Pending,
    Delivered,
    Rejected,
    Disabled,
}

impl DeliveryState {
    /// Whether no further transition is possible from this state.
    pub fn is_terminal(self) -> bool {
        !matches!(self, DeliveryState::Pending)
    }
}

impl std::fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryState::Pending => write!(f, "pending"),
            DeliveryState::Delivered => write!(f, "delivered"),
            DeliveryState::Rejected => write!(f, "rejected"),
            DeliveryState::Disabled => write!(f, "disabled"),
        }
    }
}

/// Where a template's HTML comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ContentMode {
    /// HTML authored in the rich-text editor.
    Editor,
    /// HTML ingested from an uploaded archive.
    Archive,
}

impl std::fmt::Display for ContentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentMode::Editor => write!(f, "editor"),
            ContentMode::Archive => write!(f, "archive"),
        }
    }
}

/// Which member field holds the address for a given channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressField {
    Phone,
    Email,
}

impl std::fmt::Display for AddressField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressField::Phone => write!(f, "phone"),
            AddressField::Email => write!(f, "email"),
        }
    }
}

/// Who a notification is addressed to.
///
/// Recipient groups take precedence; `address` (or the address of `user_id`)
/// is the direct fallback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientTarget {
    /// Explicit channel address (e.g. a phone number).
    #[serde(default)]
    pub address: Option<String>,
    /// Explicit recipient identity.
    #[serde(default)]
    pub user_id: Option<Uuid>,
    /// Recipient group references, expanded at dispatch time.
    #[serde(default)]
    pub groups: Vec<Uuid>,
}

impl RecipientTarget {
    pub fn address(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            ..Self::default()
        }
    }

    pub fn user(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::default()
        }
    }

    pub fn groups(groups: Vec<Uuid>) -> Self {
        Self {
            groups,
            ..Self::default()
        }
    }
}

/// A member of a recipient group as exposed by the membership store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Member {
    pub user_id: Uuid,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl Member {
    /// The member's address for `field`, treating blank values as absent.
    pub fn address(&self, field: AddressField) -> Option<&str> {
        let value = match field {
            AddressField::Phone => self.phone.as_deref(),
            AddressField::Email => self.email.as_deref(),
        };
        value.map(str::trim).filter(|v| !v.is_empty())
    }
}

/// A timestamped line in a notification's delivery log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryNote {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// A unit of outbound communication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    /// Template the content was rendered from, if any.
    pub template_id: Option<Uuid>,
    pub subject: Option<String>,
    pub text: String,
    pub html: Option<String>,
    pub target: RecipientTarget,
    pub state: DeliveryState,
    pub sent_at: Option<DateTime<Utc>>,
    pub log: Vec<DeliveryNote>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Create a pending notification with already-rendered content.
    pub fn new(text: impl Into<String>, target: RecipientTarget) -> Self {
        Self {
            id: Uuid::new_v4(),
            template_id: None,
            subject: None,
            text: text.into(),
            html: None,
            target,
            state: DeliveryState::Pending,
            sent_at: None,
            log: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Append a line to the delivery log.
    pub fn note(&mut self, message: impl Into<String>) {
        self.log.push(DeliveryNote {
            at: Utc::now(),
            message: message.into(),
        });
    }
}

/// A reusable content source for notifications.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Template {
    pub id: Uuid,
    /// Name shown to administrators.
    pub title: String,
    pub subject: String,
    pub text: String,
    pub content_mode: ContentMode,
    /// Editor HTML, or the ingested archive document in archive mode.
    pub html: String,
    /// Original file name of the uploaded archive.
    pub archive_name: Option<String>,
    /// SHA-256 of the archive bytes last ingested.
    pub archive_digest: Option<String>,
    /// Storage path of the last successful extraction.
    pub archive_path: Option<String>,
    pub category_id: Option<Uuid>,
    pub event: Option<i32>,
    pub is_active: bool,
    pub is_delete_after: bool,
    pub send_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Template {
    /// A new, active editor-mode template.
    pub fn new(title: impl Into<String>, text: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            subject: String::new(),
            text: text.into(),
            content_mode: ContentMode::Editor,
            html: String::new(),
            archive_name: None,
            archive_digest: None,
            archive_path: None,
            category_id: None,
            event: None,
            is_active: true,
            is_delete_after: false,
            send_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Per-recipient result of one send attempt. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchOutcome {
    pub address: String,
    /// Provider message identifier, when one was returned.
    pub message_id: Option<String>,
    pub delivered: bool,
    pub error: Option<String>,
}
