//! The Label Resolver: translates between label names and ids with a
//! bounded number of API calls per lookup, and creates hierarchical
//! labels on demand.

use regex::Regex;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::client::GmailClient;
use crate::error::{GmailError, Result};

/// Gmail's built-in labels. Resolving one of these never touches the
/// cache or the API: the name and id are the same string.
const SYSTEM_LABELS: &[&str] = &[
    "INBOX",
    "SENT",
    "TRASH",
    "SPAM",
    "DRAFT",
    "UNREAD",
    "STARRED",
    "IMPORTANT",
    "CHAT",
    "CATEGORY_PERSONAL",
    "CATEGORY_SOCIAL",
    "CATEGORY_PROMOTIONS",
    "CATEGORY_UPDATES",
    "CATEGORY_FORUMS",
];

fn system_label_id(name: &str) -> Option<&'static str> {
    let upper = name.to_uppercase();
    SYSTEM_LABELS.iter().find(|&&l| l == upper).copied()
}

#[derive(Default)]
struct Cache {
    name_to_id: HashMap<String, String>,
    id_to_name: HashMap<String, String>,
}

impl Cache {
    fn insert(&mut self, name: String, id: String) {
        self.name_to_id.insert(name.to_lowercase(), id.clone());
        self.id_to_name.insert(id, name);
    }
}

/// Resolves label names to ids (and back) against a small bounded
/// number of `ListLabels` calls, and creates labels under a hierarchy
/// with sanitized names.
pub struct LabelManager<C: GmailClient> {
    client: C,
    cache: RwLock<Cache>,
}

impl<C: GmailClient> LabelManager<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            cache: RwLock::new(Cache::default()),
        }
    }

    async fn refresh(&self) -> Result<()> {
        let labels = self.client.list_labels().await?;
        let mut cache = self.cache.write().await;
        for label in labels {
            cache.insert(label.name, label.id);
        }
        Ok(())
    }

    /// Look up a label's id by name. Resolves system labels without any
    /// API call. For a user label, checks the cache first; on a miss,
    /// refreshes the cache and rechecks at most twice before giving up.
    pub async fn resolve_name(&self, name: &str) -> Result<Option<String>> {
        if let Some(id) = system_label_id(name) {
            return Ok(Some(id.to_string()));
        }

        let key = name.to_lowercase();
        {
            let cache = self.cache.read().await;
            if let Some(id) = cache.name_to_id.get(&key) {
                return Ok(Some(id.clone()));
            }
        }

        for _ in 0..2 {
            self.refresh().await?;
            let cache = self.cache.read().await;
            if let Some(id) = cache.name_to_id.get(&key) {
                return Ok(Some(id.clone()));
            }
        }

        Ok(None)
    }

    /// Look up a label's display name by id. Resolves system labels
    /// without any API call. For a user label not yet in the cache,
    /// refreshes once; if still unresolved, falls back to returning the
    /// id itself (accepted limitation: the caller sees the raw id
    /// instead of the display name it was last given).
    pub async fn resolve_id(&self, id: &str) -> Result<String> {
        if SYSTEM_LABELS.contains(&id) {
            return Ok(id.to_string());
        }

        {
            let cache = self.cache.read().await;
            if let Some(name) = cache.id_to_name.get(id) {
                return Ok(name.clone());
            }
        }

        self.refresh().await?;
        let cache = self.cache.read().await;
        Ok(cache.id_to_name.get(id).cloned().unwrap_or_else(|| id.to_string()))
    }

    /// Resolve a label name to its id, creating the label (and any
    /// missing parent labels in its `/`-separated hierarchy) if it
    /// doesn't exist yet.
    pub async fn get_or_create(&self, name: &str) -> Result<String> {
        let sanitized = sanitize_label_name(name)?;

        if let Some(id) = self.resolve_name(&sanitized).await? {
            return Ok(id);
        }

        if sanitized.contains('/') {
            self.ensure_parent_labels(&sanitized).await?;
        }

        info!(label = %sanitized, "creating label");
        let id = self.client.create_label(&sanitized).await?;
        self.cache.write().await.insert(sanitized, id.clone());
        Ok(id)
    }

    async fn ensure_parent_labels(&self, full_name: &str) -> Result<()> {
        let parts: Vec<&str> = full_name.split('/').collect();

        for i in 1..parts.len() {
            let parent_path = parts[..i].join("/");
            if self.resolve_name(&parent_path).await?.is_some() {
                continue;
            }

            debug!(parent = %parent_path, "creating parent label");
            let id = self.client.create_label(&parent_path).await?;
            self.cache.write().await.insert(parent_path, id);
        }

        Ok(())
    }
}

/// Sanitize a label name to comply with Gmail's requirements: strip
/// invalid characters, collapse whitespace, trim/collapse slashes,
/// title-case each path segment, and cap the overall length at 50
/// characters without cutting mid-word.
pub fn sanitize_label_name(name: &str) -> Result<String> {
    if name.trim().is_empty() {
        return Err(GmailError::InvalidParameter(
            "label name cannot be empty".to_string(),
        ));
    }

    let mut sanitized = name.trim().to_string();

    let invalid_chars = Regex::new(r"[^\w\s/\-]").unwrap();
    sanitized = invalid_chars.replace_all(&sanitized, " ").to_string();

    let multiple_spaces = Regex::new(r"\s+").unwrap();
    sanitized = multiple_spaces.replace_all(&sanitized, " ").to_string();

    sanitized = sanitized.trim_matches('/').to_string();

    let consecutive_slashes = Regex::new(r"/+").unwrap();
    sanitized = consecutive_slashes.replace_all(&sanitized, "/").to_string();

    sanitized = sanitized
        .split('/')
        .map(|segment| {
            segment
                .split_whitespace()
                .map(title_case_word)
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("/");

    if sanitized.len() > 50 {
        sanitized = sanitized[..50].to_string();
        if let Some(last_space) = sanitized.rfind([' ', '/']) {
            sanitized = sanitized[..last_space].to_string();
        }
    }
    sanitized = sanitized.trim_end_matches('/').to_string();

    if sanitized.is_empty() {
        return Err(GmailError::InvalidParameter(
            "sanitized label name is empty".to_string(),
        ));
    }

    Ok(sanitized)
}

fn title_case_word(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => first
            .to_uppercase()
            .chain(chars.as_str().to_lowercase().chars())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{LabelInfo, MessageFormat, MessageList};
    use async_trait::async_trait;
    use google_gmail1::api::Message;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakeClient {
        labels: Vec<LabelInfo>,
        list_calls: Arc<AtomicUsize>,
        created: std::sync::Mutex<Vec<String>>,
    }

    impl FakeClient {
        fn new(labels: Vec<(&str, &str)>) -> Self {
            Self {
                labels: labels
                    .into_iter()
                    .map(|(id, name)| LabelInfo {
                        id: id.to_string(),
                        name: name.to_string(),
                    })
                    .collect(),
                list_calls: Arc::new(AtomicUsize::new(0)),
                created: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl GmailClient for FakeClient {
        async fn list_messages(
            &self,
            _query: &str,
            _max_results: u32,
            _page_token: Option<&str>,
        ) -> Result<MessageList> {
            Ok(MessageList::default())
        }

        async fn get_message(&self, _id: &str, _format: MessageFormat) -> Result<Message> {
            Err(GmailError::NotFound("unused in this test".to_string()))
        }

        async fn batch_modify_labels(
            &self,
            _ids: &[String],
            _add: &[String],
            _remove: &[String],
        ) -> Result<usize> {
            Ok(0)
        }

        async fn batch_trash(&self, _ids: &[String]) -> Result<usize> {
            Ok(0)
        }

        async fn batch_mark_read(&self, _ids: &[String], _read: bool) -> Result<usize> {
            Ok(0)
        }

        async fn batch_delete(&self, _ids: &[String]) -> Result<usize> {
            Ok(0)
        }

        async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.labels.clone())
        }

        async fn create_label(&self, name: &str) -> Result<String> {
            let id = format!("Label_{}", name.replace('/', "_"));
            self.created.lock().unwrap().push(name.to_string());
            Ok(id)
        }
    }

    #[tokio::test]
    async fn test_resolve_name_system_label_skips_api() {
        let client = FakeClient::new(vec![]);
        let calls = client.list_calls.clone();
        let manager = LabelManager::new(client);

        let id = manager.resolve_name("inbox").await.unwrap();
        assert_eq!(id.as_deref(), Some("INBOX"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_resolve_name_hits_cache_after_one_refresh() {
        let client = FakeClient::new(vec![("Label_1", "News")]);
        let calls = client.list_calls.clone();
        let manager = LabelManager::new(client);

        let id = manager.resolve_name("news").await.unwrap();
        assert_eq!(id.as_deref(), Some("Label_1"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // second lookup of the same name should come from cache, no more calls
        let id2 = manager.resolve_name("News").await.unwrap();
        assert_eq!(id2.as_deref(), Some("Label_1"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resolve_name_unknown_label_makes_at_most_two_calls() {
        let client = FakeClient::new(vec![("Label_1", "News")]);
        let calls = client.list_calls.clone();
        let manager = LabelManager::new(client);

        let id = manager.resolve_name("does-not-exist").await.unwrap();
        assert_eq!(id, None);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_resolve_id_falls_back_to_id_itself() {
        let client = FakeClient::new(vec![]);
        let manager = LabelManager::new(client);

        let name = manager.resolve_id("Label_999").await.unwrap();
        assert_eq!(name, "Label_999");
    }

    #[tokio::test]
    async fn test_resolve_id_system_label() {
        let client = FakeClient::new(vec![]);
        let manager = LabelManager::new(client);
        let name = manager.resolve_id("TRASH").await.unwrap();
        assert_eq!(name, "TRASH");
    }

    #[tokio::test]
    async fn test_get_or_create_returns_existing_id() {
        let client = FakeClient::new(vec![("Label_1", "News")]);
        let manager = LabelManager::new(client);

        let id = manager.get_or_create("news").await.unwrap();
        assert_eq!(id, "Label_1");
    }

    #[tokio::test]
    async fn test_get_or_create_builds_hierarchy() {
        let client = FakeClient::new(vec![]);
        let manager = LabelManager::new(client);

        let id = manager.get_or_create("Newsletters/Tech").await.unwrap();
        assert_eq!(id, "Label_Newsletters_Tech");

        // the parent should now resolve from cache without a new label being created for it
        let parent_id = manager.resolve_name("Newsletters").await.unwrap();
        assert_eq!(parent_id.as_deref(), Some("Label_Newsletters"));
    }

    #[test]
    fn test_sanitize_label_name() {
        let cases = vec![
            ("github notifications", "Github Notifications"),
            ("Test/Label", "Test/Label"),
            ("test//double//slash", "Test/Double/Slash"),
            ("/leading/slash/", "Leading/Slash"),
            ("Invalid@Chars!", "Invalid Chars"),
            ("   extra   spaces   ", "Extra Spaces"),
        ];
        for (input, expected) in cases {
            assert_eq!(sanitize_label_name(input).unwrap(), expected);
        }
    }

    #[test]
    fn test_sanitize_label_name_enforces_max_length() {
        let long_name = "This Is A Very Long Label Name That Exceeds The Maximum Length Limit";
        let result = sanitize_label_name(long_name).unwrap();
        assert!(result.len() <= 50);
    }

    #[test]
    fn test_sanitize_label_name_rejects_empty() {
        assert!(sanitize_label_name("   ").is_err());
        assert!(sanitize_label_name("@@@").is_err());
    }
}
