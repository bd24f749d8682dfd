//! The Provider Adapter: the minimal Gmail verb set the core needs,
//! wrapped in the rate limiter and circuit breaker.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use google_gmail1::{
    api::{BatchModifyMessagesRequest, Label, Message, MessagePart},
    hyper_rustls, hyper_util, Gmail,
};
use std::collections::HashSet;

use crate::circuit_breaker::CircuitBreaker;
use crate::error::{GmailError, Result};
use crate::models::MatchableEmail;
use crate::rate_limiter::RateLimiter;

pub type HttpsConnector =
    hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>;

/// Format requested from `GetMessage`; determines which fields the
/// provider populates (and therefore which rule conditions can be
/// evaluated once the message arrives).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFormat {
    Metadata,
    Full,
    Minimal,
    Raw,
}

impl MessageFormat {
    fn as_str(self) -> &'static str {
        match self {
            MessageFormat::Metadata => "metadata",
            MessageFormat::Full => "full",
            MessageFormat::Minimal => "minimal",
            MessageFormat::Raw => "raw",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageStub {
    pub id: String,
    pub thread_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct MessageList {
    pub messages: Vec<MessageStub>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LabelInfo {
    pub id: String,
    pub name: String,
}

/// The verb set the executor and label resolver are built against.
#[async_trait]
pub trait GmailClient: Send + Sync {
    /// A single page of message stubs matching `query`.
    async fn list_messages(
        &self,
        query: &str,
        max_results: u32,
        page_token: Option<&str>,
    ) -> Result<MessageList>;

    /// Fetch one message in the given format.
    async fn get_message(&self, id: &str, format: MessageFormat) -> Result<Message>;

    /// Add/remove labels on up to 1000 messages in one call.
    async fn batch_modify_labels(
        &self,
        ids: &[String],
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<usize>;

    /// Move messages to trash (adds the `TRASH` label).
    async fn batch_trash(&self, ids: &[String]) -> Result<usize>;

    /// Mark messages read or unread (adds/removes `UNREAD`).
    async fn batch_mark_read(&self, ids: &[String], read: bool) -> Result<usize>;

    /// Permanently delete messages. Irreversible.
    async fn batch_delete(&self, ids: &[String]) -> Result<usize>;

    /// All labels in the account, for populating the Label Cache.
    async fn list_labels(&self) -> Result<Vec<LabelInfo>>;

    /// Create a label with the exact name given (no sanitization, no
    /// hierarchy handling — that's the Label Resolver's job).
    async fn create_label(&self, name: &str) -> Result<String>;
}

/// Production client: wraps the Gmail hub with the rate limiter's
/// smoothing/retry policy and the circuit breaker's failure tripwire.
pub struct ProductionGmailClient {
    hub: Gmail<HttpsConnector>,
    rate_limiter: RateLimiter,
    circuit_breaker: CircuitBreaker,
}

impl ProductionGmailClient {
    pub fn new(hub: Gmail<HttpsConnector>, rate_limiter: RateLimiter, circuit_breaker: CircuitBreaker) -> Self {
        Self {
            hub,
            rate_limiter,
            circuit_breaker,
        }
    }

    /// Run `op` through the circuit breaker's admission check and the
    /// rate limiter's smoothing/retry loop. A tripped breaker surfaces
    /// as `ProviderFatal`, matching how an exhausted retry does.
    async fn execute<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        if let Err(e) = self.circuit_breaker.check_request().await {
            return Err(GmailError::ProviderFatal(e.to_string()));
        }

        match self.rate_limiter.call(op).await {
            Ok(value) => {
                self.circuit_breaker.record_success().await;
                Ok(value)
            }
            Err(e) => {
                self.circuit_breaker.record_failure(&e).await;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl GmailClient for ProductionGmailClient {
    async fn list_messages(
        &self,
        query: &str,
        max_results: u32,
        page_token: Option<&str>,
    ) -> Result<MessageList> {
        self.execute(|| async {
            let mut call = self
                .hub
                .users()
                .messages_list("me")
                .q(query)
                .max_results(max_results);
            if let Some(token) = page_token {
                call = call.page_token(token);
            }

            let (_, response) = call
                .add_scope("https://www.googleapis.com/auth/gmail.modify")
                .doit()
                .await?;

            let messages = response
                .messages
                .unwrap_or_default()
                .into_iter()
                .filter_map(|m| match (m.id, m.thread_id) {
                    (Some(id), Some(thread_id)) => Some(MessageStub { id, thread_id }),
                    _ => None,
                })
                .collect();

            Ok(MessageList {
                messages,
                next_page_token: response.next_page_token,
            })
        })
        .await
    }

    async fn get_message(&self, id: &str, format: MessageFormat) -> Result<Message> {
        self.execute(|| async {
            let (_, msg) = self
                .hub
                .users()
                .messages_get("me", id)
                .format(format.as_str())
                .add_scope("https://www.googleapis.com/auth/gmail.modify")
                .doit()
                .await?;
            Ok(msg)
        })
        .await
    }

    async fn batch_modify_labels(
        &self,
        ids: &[String],
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let add = (!add_label_ids.is_empty()).then(|| add_label_ids.to_vec());
        let remove = (!remove_label_ids.is_empty()).then(|| remove_label_ids.to_vec());

        self.execute(|| async {
            let request = BatchModifyMessagesRequest {
                ids: Some(ids.to_vec()),
                add_label_ids: add.clone(),
                remove_label_ids: remove.clone(),
            };
            self.hub
                .users()
                .messages_batch_modify(request, "me")
                .add_scope("https://www.googleapis.com/auth/gmail.modify")
                .doit()
                .await?;
            Ok(ids.len())
        })
        .await
    }

    async fn batch_trash(&self, ids: &[String]) -> Result<usize> {
        self.batch_modify_labels(ids, &["TRASH".to_string()], &[]).await
    }

    async fn batch_mark_read(&self, ids: &[String], read: bool) -> Result<usize> {
        if read {
            self.batch_modify_labels(ids, &[], &["UNREAD".to_string()]).await
        } else {
            self.batch_modify_labels(ids, &["UNREAD".to_string()], &[]).await
        }
    }

    async fn batch_delete(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.execute(|| async {
            self.hub
                .users()
                .messages_batch_delete(
                    google_gmail1::api::BatchDeleteMessagesRequest {
                        ids: Some(ids.to_vec()),
                    },
                    "me",
                )
                .add_scope("https://www.googleapis.com/auth/gmail.modify")
                .doit()
                .await?;
            Ok(ids.len())
        })
        .await
    }

    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        self.execute(|| async {
            let (_, response) = self
                .hub
                .users()
                .labels_list("me")
                .add_scope("https://www.googleapis.com/auth/gmail.labels")
                .doit()
                .await?;

            Ok(response
                .labels
                .unwrap_or_default()
                .into_iter()
                .filter_map(|label| match (label.id, label.name) {
                    (Some(id), Some(name)) => Some(LabelInfo { id, name }),
                    _ => None,
                })
                .collect())
        })
        .await
    }

    async fn create_label(&self, name: &str) -> Result<String> {
        self.execute(|| async {
            let label = Label {
                name: Some(name.to_string()),
                message_list_visibility: Some("show".to_string()),
                label_list_visibility: Some("labelShow".to_string()),
                ..Default::default()
            };

            let (_, created) = self
                .hub
                .users()
                .labels_create(label, "me")
                .add_scope("https://www.googleapis.com/auth/gmail.labels")
                .doit()
                .await?;

            created
                .id
                .ok_or_else(|| GmailError::LabelError("created label has no id".to_string()))
        })
        .await
    }
}

#[async_trait]
impl GmailClient for std::sync::Arc<ProductionGmailClient> {
    async fn list_messages(
        &self,
        query: &str,
        max_results: u32,
        page_token: Option<&str>,
    ) -> Result<MessageList> {
        self.as_ref().list_messages(query, max_results, page_token).await
    }

    async fn get_message(&self, id: &str, format: MessageFormat) -> Result<Message> {
        self.as_ref().get_message(id, format).await
    }

    async fn batch_modify_labels(
        &self,
        ids: &[String],
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<usize> {
        self.as_ref()
            .batch_modify_labels(ids, add_label_ids, remove_label_ids)
            .await
    }

    async fn batch_trash(&self, ids: &[String]) -> Result<usize> {
        self.as_ref().batch_trash(ids).await
    }

    async fn batch_mark_read(&self, ids: &[String], read: bool) -> Result<usize> {
        self.as_ref().batch_mark_read(ids, read).await
    }

    async fn batch_delete(&self, ids: &[String]) -> Result<usize> {
        self.as_ref().batch_delete(ids).await
    }

    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        self.as_ref().list_labels().await
    }

    async fn create_label(&self, name: &str) -> Result<String> {
        self.as_ref().create_label(name).await
    }
}

/// Convert a raw Gmail message into the domain object the rule compiler's
/// client-side predicate evaluator works against. Which optional fields
/// come out populated depends on the `MessageFormat` the message was
/// fetched with (`metadata` omits the body; `full` includes it).
pub fn message_to_matchable(msg: &Message) -> MatchableEmail {
    let id = msg.id.clone().unwrap_or_default();
    let labels: HashSet<String> = msg.label_ids.clone().unwrap_or_default().into_iter().collect();

    let mut from = String::new();
    let mut to = String::new();
    let mut subject = String::new();

    if let Some(headers) = msg.payload.as_ref().and_then(|p| p.headers.as_ref()) {
        for header in headers {
            if let (Some(name), Some(value)) = (&header.name, &header.value) {
                match name.to_lowercase().as_str() {
                    "from" => from = value.clone(),
                    "to" => to = value.clone(),
                    "subject" => subject = value.clone(),
                    _ => {}
                }
            }
        }
    }

    let (has_attachment, attachment_filenames, body) = msg
        .payload
        .as_ref()
        .map(collect_parts)
        .unwrap_or((false, Vec::new(), None));

    let internal_timestamp = msg
        .internal_date
        .and_then(DateTime::from_timestamp_millis);

    MatchableEmail {
        id,
        from,
        to,
        subject,
        body_snippet: msg.snippet.clone().unwrap_or_default(),
        labels,
        body,
        has_attachment: Some(has_attachment),
        attachment_filenames,
        size_bytes: msg.size_estimate.map(|s| s as u64),
        internal_timestamp,
    }
}

/// Walk a message's MIME tree collecting attachment filenames and the
/// first decodable plain-text body part.
fn collect_parts(part: &MessagePart) -> (bool, Vec<String>, Option<String>) {
    let mut has_attachment = false;
    let mut filenames = Vec::new();
    let mut body = None;
    collect_parts_into(part, &mut has_attachment, &mut filenames, &mut body);
    (has_attachment, filenames, body)
}

fn collect_parts_into(
    part: &MessagePart,
    has_attachment: &mut bool,
    filenames: &mut Vec<String>,
    body: &mut Option<String>,
) {
    if let Some(filename) = part.filename.as_ref().filter(|f| !f.is_empty()) {
        *has_attachment = true;
        filenames.push(filename.clone());
    }

    if body.is_none() {
        let is_text = part
            .mime_type
            .as_deref()
            .map(|m| m.starts_with("text/plain"))
            .unwrap_or(false);
        if is_text {
            if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_ref()) {
                if let Ok(decoded) = URL_SAFE_NO_PAD.decode(data) {
                    *body = String::from_utf8(decoded).ok();
                }
            }
        }
    }

    if let Some(parts) = part.parts.as_ref() {
        for child in parts {
            collect_parts_into(child, has_attachment, filenames, body);
        }
    }
}
