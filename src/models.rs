//! Core data model: rules, conditions, actions, and the ephemeral
//! matchable representation of a provider message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// A single field this crate can match against, and the legal operators
/// for it. The operator/field combinations accepted here correspond to
/// the table in the rule compiler (see `rule_compiler::compile`); this
/// type itself accepts any string operator so the compiler can decide
/// whether it is translatable server-side or needs client evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    From,
    To,
    Subject,
    Label,
    BodySnippet,
    Body,
    DateAge,
    HasAttachment,
    AttachmentFilename,
    MessageSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Contains,
    NotContains,
    Equals,
    NotEquals,
    StartsWith,
    EndsWith,
    OlderThan,
    NewerThan,
    Is,
    GreaterThan,
    LessThan,
}

/// One condition of a rule: `field operator value`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub field: Field,
    pub operator: Operator,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conjunction {
    And,
    Or,
}

/// What to do with emails that match a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Trash,
    MarkRead,
    MarkUnread,
    AddLabel,
    RemoveLabel,
    DeletePermanent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    /// Required when `action_type` is `AddLabel` or `RemoveLabel`.
    #[serde(default)]
    pub label_name: Option<String>,
}

impl Action {
    /// An action is usable only if its required parameters are present.
    /// Invalid actions are dropped with a warning at evaluation time, not
    /// rejected at save time.
    pub fn is_valid(&self) -> bool {
        match self.action_type {
            ActionType::AddLabel | ActionType::RemoveLabel => self.label_name.is_some(),
            _ => true,
        }
    }

    /// The key matched emails are aggregated under for batched execution:
    /// `"<type>"` or `"<type>:<label_name>"`.
    pub fn key(&self) -> Option<String> {
        if !self.is_valid() {
            return None;
        }
        let type_str = match self.action_type {
            ActionType::Trash => "trash",
            ActionType::MarkRead => "mark_read",
            ActionType::MarkUnread => "mark_unread",
            ActionType::AddLabel => "add_label",
            ActionType::RemoveLabel => "remove_label",
            ActionType::DeletePermanent => "delete_permanent",
        };
        match &self.label_name {
            Some(label) if matches!(self.action_type, ActionType::AddLabel | ActionType::RemoveLabel) => {
                Some(format!("{}:{}", type_str, label))
            }
            _ => Some(type_str.to_string()),
        }
    }
}

/// A persistent rule: a named set of conditions combined by `conjunction`,
/// and the actions to take on a match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub conjunction: Conjunction,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

fn default_enabled() -> bool {
    true
}

impl Rule {
    /// Build a new rule with a freshly generated id.
    pub fn new(
        name: impl Into<String>,
        conjunction: Conjunction,
        conditions: Vec<Condition>,
        actions: Vec<Action>,
    ) -> Self {
        Self {
            id: format!("rule_{}", Uuid::new_v4().simple()),
            name: name.into(),
            enabled: true,
            conjunction,
            conditions,
            actions,
        }
    }

    pub fn matches_id_or_name(&self, id_or_name: &str) -> bool {
        self.id == id_or_name || self.name.eq_ignore_ascii_case(id_or_name)
    }
}

/// The ephemeral, derived view of a provider message used for client-side
/// predicate evaluation. Produced by the executor from a raw message;
/// which optional fields are populated depends on the format requested
/// from the adapter (`metadata` vs `full`).
#[derive(Debug, Clone, Default)]
pub struct MatchableEmail {
    pub id: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body_snippet: String,
    pub labels: HashSet<String>,
    pub body: Option<String>,
    pub has_attachment: Option<bool>,
    pub attachment_filenames: Vec<String>,
    pub size_bytes: Option<u64>,
    pub internal_timestamp: Option<DateTime<Utc>>,
}

/// Custom deserializers for Gmail API types.
pub mod deserializers {
    use chrono::{DateTime, Utc};
    use serde::{
        de::{self, Deserializer},
        Deserialize,
    };

    /// Deserialize a Gmail timestamp (milliseconds since epoch as string).
    pub fn deserialize_gmail_timestamp<'de, D>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<String> = Option::deserialize(deserializer)?;
        match opt {
            Some(s) => {
                let millis = s.parse::<i64>().map_err(de::Error::custom)?;
                let dt = DateTime::from_timestamp_millis(millis)
                    .ok_or_else(|| de::Error::custom("Invalid timestamp"))?;
                Ok(Some(dt))
            }
            None => Ok(None),
        }
    }

    /// Deserialize base64url encoded data.
    pub fn deserialize_base64url<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

        let opt: Option<String> = Option::deserialize(deserializer)?;
        match opt {
            Some(s) => {
                let decoded = URL_SAFE_NO_PAD.decode(s).map_err(de::Error::custom)?;
                Ok(Some(decoded))
            }
            None => Ok(None),
        }
    }
}
