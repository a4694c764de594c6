// src/message.rs

//! Email requests and the delivery records that track them.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;
use uuid::Uuid;

use crate::error::ValidationError;

static ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("address pattern is a valid regex")
});

/// Content supplied by a caller when submitting an email
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailContent {
    #[serde(rename = "to")]
    pub recipient: String,
    #[serde(rename = "from")]
    pub sender: String,
    pub subject: String,
    pub body: String,
}

impl EmailContent {
    pub fn new(
        recipient: impl Into<String>,
        sender: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            sender: sender.into(),
            subject: subject.into(),
            body: body.into(),
        }
    }

    /// Check that every field is present and both addresses look like addresses
    pub fn validate(&self) -> Result<(), ValidationError> {
        let fields = [
            ("to", &self.recipient),
            ("from", &self.sender),
            ("subject", &self.subject),
            ("body", &self.body),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(ValidationError::MissingField(name));
            }
        }

        for (name, value) in [("to", &self.recipient), ("from", &self.sender)] {
            if !ADDRESS.is_match(value) {
                return Err(ValidationError::InvalidAddress {
                    field: name,
                    value: value.clone(),
                });
            }
        }

        Ok(())
    }

    /// Deduplication key. Two contents share a fingerprint only when all four
    /// fields are byte-for-byte equal; fields are length-prefixed so no choice
    /// of separators inside the values can make different contents collide.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut key = String::with_capacity(
            self.recipient.len() + self.sender.len() + self.subject.len() + self.body.len() + 32,
        );
        for field in [&self.recipient, &self.sender, &self.subject, &self.body] {
            key.push_str(&field.len().to_string());
            key.push(':');
            key.push_str(field);
        }
        Fingerprint(key)
    }
}

/// Content fingerprint used by the idempotency index
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

/// An accepted email. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Email {
    pub id: Uuid,
    #[serde(flatten)]
    pub content: EmailContent,
    pub timestamp: DateTime<Utc>,
}

impl Email {
    pub fn new(content: EmailContent) -> Self {
        Self {
            id: Uuid::new_v4(),
            content,
            timestamp: Utc::now(),
        }
    }
}

/// Lifecycle of a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Retrying,
    Sent,
    Failed,
}

impl DeliveryStatus {
    /// Sent and Failed are final; nothing moves a record out of them
    pub fn is_terminal(self) -> bool {
        matches!(self, DeliveryStatus::Sent | DeliveryStatus::Failed)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Retrying => "retrying",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Tracking state for one accepted email
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRecord {
    pub id: Uuid,
    pub status: DeliveryStatus,
    /// Backend currently or last used; empty until the first attempt
    pub provider: String,
    /// Number of backends tried so far
    pub attempts: u32,
    pub last_attempt: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeliveryRecord {
    pub fn pending(email: &Email) -> Self {
        Self {
            id: email.id,
            status: DeliveryStatus::Pending,
            provider: String::new(),
            attempts: 0,
            last_attempt: email.timestamp,
            error: None,
        }
    }
}
