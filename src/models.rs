use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Alert severity tiers, most urgent first. Ordering matters: the scanner
/// sorts by `rank()` and the dispatcher only emails the top three tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Expired,
    Critical,
    Warning,
    Info,
}

impl AlertLevel {
    pub fn rank(self) -> u8 {
        match self {
            AlertLevel::Expired => 0,
            AlertLevel::Critical => 1,
            AlertLevel::Warning => 2,
            AlertLevel::Info => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlertLevel::Expired => "expired",
            AlertLevel::Critical => "critical",
            AlertLevel::Warning => "warning",
            AlertLevel::Info => "info",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "expired" => Some(AlertLevel::Expired),
            "critical" => Some(AlertLevel::Critical),
            "warning" => Some(AlertLevel::Warning),
            "info" => Some(AlertLevel::Info),
            _ => None,
        }
    }

    /// Label used in rendered emails and CLI output.
    pub fn label(self) -> &'static str {
        match self {
            AlertLevel::Expired => "EXPIRED",
            AlertLevel::Critical => "URGENT - 7 DAYS",
            AlertLevel::Warning => "WARNING - 30 DAYS",
            AlertLevel::Info => "REMINDER - 90 DAYS",
        }
    }
}

/// Closed set of credential document types. Only a subset carries expiry
/// dates worth alerting on; see `is_tracked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Medical,
    License,
    Logbook,
    Identity,
    Radio,
    Contract,
}

impl DocumentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentKind::Medical => "medical",
            DocumentKind::License => "license",
            DocumentKind::Logbook => "logbook",
            DocumentKind::Identity => "identity",
            DocumentKind::Radio => "radio",
            DocumentKind::Contract => "contract",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "medical" => Some(DocumentKind::Medical),
            "license" => Some(DocumentKind::License),
            "logbook" => Some(DocumentKind::Logbook),
            "identity" => Some(DocumentKind::Identity),
            "radio" => Some(DocumentKind::Radio),
            "contract" => Some(DocumentKind::Contract),
            _ => None,
        }
    }

    /// Logbooks and contracts are kept on file but never expire.
    pub fn is_tracked(self) -> bool {
        matches!(
            self,
            DocumentKind::Medical
                | DocumentKind::License
                | DocumentKind::Radio
                | DocumentKind::Identity
        )
    }

    pub fn display_name(self) -> &'static str {
        match self {
            DocumentKind::Medical => "Aeromedical Certificate",
            DocumentKind::License => "Pilot License (FI/IRI/CRI)",
            DocumentKind::Logbook => "Flight Logbook",
            DocumentKind::Identity => "Identity Document",
            DocumentKind::Radio => "Radio Operator Certificate",
            DocumentKind::Contract => "Instructor Agreement",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub id: Uuid,
    pub name: String,
    pub kind: DocumentKind,
    pub expiry_date: Option<NaiveDate>,
    pub is_archived: bool,
}

#[derive(Debug, Clone)]
pub struct InstructorRecord {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    pub documents: Vec<DocumentRecord>,
}

/// Derived per-document alert. Recomputed on every scan, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct ExpiryAlert {
    pub instructor_id: Uuid,
    pub instructor_name: String,
    pub instructor_email: String,
    pub document_id: Uuid,
    pub document_name: String,
    pub document_kind: DocumentKind,
    pub expiry_date: NaiveDate,
    pub days_remaining: i64,
    pub level: AlertLevel,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AlertSummary {
    pub total: usize,
    pub expired: usize,
    pub critical: usize,
    pub warning: usize,
    pub info: usize,
}

#[derive(Debug, Clone)]
pub struct RecipientGroup {
    pub name: String,
    pub alerts: Vec<ExpiryAlert>,
}

/// Append-only audit row, one per dispatch attempt per alert.
#[derive(Debug, Clone)]
pub struct NotificationLogEntry {
    pub id: Uuid,
    pub alert_level: AlertLevel,
    pub recipient_email: String,
    pub recipient_name: String,
    pub document_kind: DocumentKind,
    pub document_name: String,
    pub expiry_date: NaiveDate,
    pub days_remaining: i64,
    pub sent_at: DateTime<Utc>,
    pub email_sent: bool,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    InfoOnly,
    AlreadySentToday,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecipientOutcome {
    pub email: String,
    pub name: String,
    pub sent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub alerts_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub total_alerts: usize,
    pub instructors_notified: usize,
    pub results: Vec<RecipientOutcome>,
}
