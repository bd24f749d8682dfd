//! The Pipeline Executor: compiles each enabled rule's server query, pages
//! through candidates, fetches details only where the residual predicate
//! needs them, aggregates matched actions, and flushes them through the
//! Provider Adapter in bounded chunks.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::client::{message_to_matchable, GmailClient, MessageFormat};
use crate::config::ExecutorConfig;
use crate::error::{GmailError, Result};
use crate::exclusions::ExclusionManager;
use crate::label_manager::LabelManager;
use crate::models::{Action, ActionType, MatchableEmail, Rule};
use crate::rule_compiler;
use crate::rule_store::RuleStore;

/// One non-fatal failure recorded during a run. A failed page fetch,
/// detail fetch, or flush does not abort the run; it's recorded here and
/// the run continues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunError {
    pub rule_id: Option<String>,
    pub email_id: Option<String>,
    pub message: String,
}

/// What happened (or would happen, under `dry_run`) for one action key.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ActionOutcome {
    pub count: usize,
    /// Populated only when `executor.include_detailed_ids` is set —
    /// large runs would otherwise bloat the summary.
    pub email_ids: Vec<String>,
}

/// The externally observable result of one run.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunSummary {
    pub total_emails_scanned: usize,
    pub emails_matching_any_rule: usize,
    pub rules_applied_counts: HashMap<String, usize>,
    pub actions_planned_or_taken: HashMap<String, ActionOutcome>,
    pub errors: Vec<RunError>,
    pub dry_run: bool,
}

/// Which rules to run this pass, and an optional ad hoc query ANDed onto
/// every rule's own server query.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub rule_ids: Option<Vec<String>>,
    pub user_query: Option<String>,
}

/// Coarse run phase, checkpointed so a crashed or cancelled run can
/// report how far it got. Simpler than a classify/label/filter workflow:
/// a rule pipeline run either scans-and-matches, or flushes the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunPhase {
    Scanning,
    Applying,
    Complete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCheckpoint {
    pub run_id: String,
    pub phase: RunPhase,
    pub rule_index: usize,
    pub emails_matched: usize,
    pub updated_at: DateTime<Utc>,
}

impl RunCheckpoint {
    fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            phase: RunPhase::Scanning,
            rule_index: 0,
            emails_matched: 0,
            updated_at: Utc::now(),
        }
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| GmailError::StoreIo(format!("serializing checkpoint: {e}")))?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = tokio::fs::read_to_string(path).await?;
        let checkpoint = serde_json::from_str(&raw)
            .map_err(|e| GmailError::StoreParse(format!("invalid checkpoint: {e}")))?;
        Ok(Some(checkpoint))
    }
}

/// One best-effort reversible operation taken during a run.
/// `delete_permanent` has no reverse and is never recorded here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RollbackOperation {
    LabelApplied { message_id: String, label_id: String },
    LabelRemoved { message_id: String, label_id: String },
    Trashed { message_id: String },
    MarkedRead { message_id: String },
    MarkedUnread { message_id: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RollbackLog {
    pub operations: Vec<RollbackOperation>,
}

impl RollbackLog {
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| GmailError::StoreIo(format!("serializing rollback log: {e}")))?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }
}

fn combine_queries(server_query: Option<&str>, user_query: Option<&str>) -> Option<String> {
    let user_query = user_query.filter(|q| !q.is_empty());
    match (server_query, user_query) {
        (Some(s), Some(u)) => Some(format!("({u}) ({s})")),
        (Some(s), None) => Some(s.to_string()),
        (None, Some(u)) => Some(u.to_string()),
        (None, None) => None,
    }
}

/// Runs rules end to end against a provider mailbox: single-threaded per
/// run, so rule ordering and action aggregation are deterministic. A job
/// manager may run many `Executor::run` calls concurrently across
/// different mailboxes/credentials.
pub struct Executor<C: GmailClient + Clone> {
    client: C,
    label_manager: Arc<LabelManager<C>>,
    rule_store: Arc<RuleStore>,
    exclusions_path: PathBuf,
    checkpoint_path: PathBuf,
    rollback_path: PathBuf,
    config: ExecutorConfig,
}

impl<C: GmailClient + Clone> Executor<C> {
    pub fn new(
        client: C,
        label_manager: Arc<LabelManager<C>>,
        rule_store: Arc<RuleStore>,
        exclusions_path: PathBuf,
        checkpoint_path: PathBuf,
        rollback_path: PathBuf,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            client,
            label_manager,
            rule_store,
            exclusions_path,
            checkpoint_path,
            rollback_path,
            config,
        }
    }

    pub async fn run(
        &self,
        run_id: &str,
        options: RunOptions,
        cancel: Arc<AtomicBool>,
    ) -> Result<RunSummary> {
        let rules: Vec<Rule> = self
            .rule_store
            .load()
            .await?
            .into_iter()
            .filter(|r| r.enabled)
            .filter(|r| {
                options
                    .rule_ids
                    .as_ref()
                    .map(|ids| ids.iter().any(|id| r.matches_id_or_name(id)))
                    .unwrap_or(true)
            })
            .collect();

        let exclusions = ExclusionManager::load(&self.exclusions_path).await?;

        let mut summary = RunSummary {
            dry_run: self.config.dry_run,
            ..Default::default()
        };
        let mut matched_email_ids: HashSet<String> = HashSet::new();
        let mut aggregated: HashMap<String, (Action, Vec<String>)> = HashMap::new();
        let mut rollback = RollbackLog::default();
        let mut checkpoint = RunCheckpoint::new(run_id);

        'rules: for (rule_index, rule) in rules.iter().enumerate() {
            if cancel.load(Ordering::SeqCst) {
                info!(run_id, "run cancelled before rule {rule_index}");
                break;
            }
            checkpoint.rule_index = rule_index;

            let compiled = rule_compiler::compile(rule);
            let query = combine_queries(compiled.server_query.as_deref(), options.user_query.as_deref());
            let format = if compiled.needs_body {
                MessageFormat::Full
            } else {
                MessageFormat::Metadata
            };

            let mut page_token: Option<String> = None;
            let mut rule_matched_count = 0usize;

            loop {
                if cancel.load(Ordering::SeqCst) {
                    break 'rules;
                }

                let page = match self
                    .client
                    .list_messages(query.as_deref().unwrap_or(""), self.config.page_size, page_token.as_deref())
                    .await
                {
                    Ok(page) => page,
                    Err(e) => {
                        summary.errors.push(RunError {
                            rule_id: Some(rule.id.clone()),
                            email_id: None,
                            message: e.to_string(),
                        });
                        break;
                    }
                };

                summary.total_emails_scanned += page.messages.len();
                let candidate_ids: Vec<String> = page.messages.iter().map(|m| m.id.clone()).collect();

                let matches: Vec<MatchableEmail> = if compiled.needs_details {
                    self.fetch_and_filter(&candidate_ids, format, rule, &cancel, &mut summary).await
                } else {
                    candidate_ids
                        .into_iter()
                        .map(|id| MatchableEmail {
                            id,
                            ..Default::default()
                        })
                        .collect()
                };

                for email in matches {
                    if cancel.load(Ordering::SeqCst) {
                        break 'rules;
                    }

                    if matched_email_ids.insert(email.id.clone()) {
                        summary.emails_matching_any_rule += 1;
                    }
                    rule_matched_count += 1;

                    if cancel.load(Ordering::SeqCst) {
                        break 'rules;
                    }

                    for (action, key) in rule_compiler::usable_actions(&rule.actions) {
                        if action.action_type == ActionType::DeletePermanent
                            && !self.config.allow_delete_permanent
                        {
                            warn!(
                                rule = %rule.name,
                                email = %email.id,
                                "delete_permanent skipped: executor.allow_delete_permanent is false"
                            );
                            continue;
                        }

                        let exclusion_key = format!("{}:{}", email.id, key);
                        if exclusions.is_excluded(&exclusion_key) {
                            debug!(email = %email.id, action = %key, "skipped: excluded");
                            continue;
                        }

                        aggregated
                            .entry(key)
                            .or_insert_with(|| (action.clone(), Vec::new()))
                            .1
                            .push(email.id.clone());
                    }

                    checkpoint.emails_matched += 1;
                    if checkpoint.emails_matched % self.config.checkpoint_interval.max(1) == 0 {
                        checkpoint.updated_at = Utc::now();
                        if let Err(e) = checkpoint.save(&self.checkpoint_path).await {
                            warn!(error = %e, "failed to save checkpoint");
                        }
                    }
                }

                page_token = page.next_page_token;
                if page_token.is_none() {
                    break;
                }
                if let Some(limit) = self.config.scan_limit {
                    if summary.total_emails_scanned >= limit {
                        break;
                    }
                }
            }

            if rule_matched_count > 0 {
                summary
                    .rules_applied_counts
                    .insert(rule.id.clone(), rule_matched_count);
            }
        }

        checkpoint.phase = RunPhase::Applying;
        let _ = checkpoint.save(&self.checkpoint_path).await;

        self.flush(&mut aggregated, &mut summary, &mut rollback).await;

        checkpoint.phase = RunPhase::Complete;
        let _ = checkpoint.save(&self.checkpoint_path).await;
        if !rollback.operations.is_empty() {
            let _ = rollback.save(&self.rollback_path).await;
        }

        Ok(summary)
    }

    /// Fetch message details for a page of candidates with bounded
    /// concurrency, then evaluate the rule's residual predicate against
    /// each. Label ids on the message are translated to display names
    /// first, since `rule_compiler::evaluate`'s label matching compares
    /// against names.
    async fn fetch_and_filter(
        &self,
        ids: &[String],
        format: MessageFormat,
        rule: &Rule,
        cancel: &Arc<AtomicBool>,
        summary: &mut RunSummary,
    ) -> Vec<MatchableEmail> {
        let concurrency = self.config.detail_fetch_concurrency.max(1);
        let client = self.client.clone();

        let results = stream::iter(ids.iter().cloned())
            .map(|id| {
                let client = client.clone();
                async move {
                    let res = client.get_message(&id, format).await;
                    (id, res)
                }
            })
            .buffer_unordered(concurrency)
            .collect::<Vec<_>>()
            .await;

        let mut out = Vec::new();
        for (id, res) in results {
            if cancel.load(Ordering::SeqCst) {
                break;
            }
            match res {
                Ok(msg) => {
                    let mut email = message_to_matchable(&msg);
                    email.id = id;
                    email.labels = self.resolve_label_names(&email.labels).await;
                    if rule_compiler::evaluate(rule, &email) {
                        out.push(email);
                    }
                }
                Err(e) => {
                    summary.errors.push(RunError {
                        rule_id: Some(rule.id.clone()),
                        email_id: Some(id),
                        message: e.to_string(),
                    });
                }
            }
        }
        out
    }

    async fn resolve_label_names(&self, ids: &HashSet<String>) -> HashSet<String> {
        let mut names = HashSet::with_capacity(ids.len());
        for id in ids {
            let name = self
                .label_manager
                .resolve_id(id)
                .await
                .unwrap_or_else(|_| id.clone());
            names.insert(name);
        }
        names
    }

    /// Flush aggregated actions through the Provider Adapter in chunks of
    /// `executor.flush_chunk_size`. Under `dry_run` the summary is still
    /// populated but no adapter write call is made.
    async fn flush(
        &self,
        aggregated: &mut HashMap<String, (Action, Vec<String>)>,
        summary: &mut RunSummary,
        rollback: &mut RollbackLog,
    ) {
        let chunk_size = self.config.flush_chunk_size.max(1);

        for (key, (action, ids)) in aggregated.drain() {
            let ids: Vec<String> = ids.into_iter().collect::<std::collections::BTreeSet<_>>().into_iter().collect();

            let outcome = summary
                .actions_planned_or_taken
                .entry(key.clone())
                .or_default();
            if self.config.include_detailed_ids {
                outcome.email_ids.extend(ids.iter().cloned());
            }

            if summary.dry_run {
                outcome.count += ids.len();
                continue;
            }

            for chunk in ids.chunks(chunk_size) {
                match self.apply_action(&action, chunk, rollback).await {
                    Ok(()) => outcome.count += chunk.len(),
                    Err(e) => summary.errors.push(RunError {
                        rule_id: None,
                        email_id: None,
                        message: format!("flush failed for action {key}: {e}"),
                    }),
                }
            }
        }
    }

    async fn apply_action(&self, action: &Action, ids: &[String], rollback: &mut RollbackLog) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        match action.action_type {
            ActionType::Trash => {
                self.client.batch_trash(ids).await?;
                rollback.operations.extend(
                    ids.iter()
                        .map(|id| RollbackOperation::Trashed { message_id: id.clone() }),
                );
            }
            ActionType::MarkRead => {
                self.client.batch_mark_read(ids, true).await?;
                rollback.operations.extend(
                    ids.iter()
                        .map(|id| RollbackOperation::MarkedRead { message_id: id.clone() }),
                );
            }
            ActionType::MarkUnread => {
                self.client.batch_mark_read(ids, false).await?;
                rollback.operations.extend(
                    ids.iter()
                        .map(|id| RollbackOperation::MarkedUnread { message_id: id.clone() }),
                );
            }
            ActionType::AddLabel => {
                let label_name = action.label_name.as_deref().unwrap_or_default();
                let label_id = self.label_manager.get_or_create(label_name).await?;
                self.client.batch_modify_labels(ids, &[label_id.clone()], &[]).await?;
                rollback.operations.extend(ids.iter().map(|id| RollbackOperation::LabelApplied {
                    message_id: id.clone(),
                    label_id: label_id.clone(),
                }));
            }
            ActionType::RemoveLabel => {
                let label_name = action.label_name.as_deref().unwrap_or_default();
                match self.label_manager.resolve_name(label_name).await? {
                    Some(label_id) => {
                        self.client.batch_modify_labels(ids, &[], &[label_id.clone()]).await?;
                        rollback.operations.extend(ids.iter().map(|id| RollbackOperation::LabelRemoved {
                            message_id: id.clone(),
                            label_id: label_id.clone(),
                        }));
                    }
                    None => {
                        warn!(label = %label_name, "remove_label skipped: label not found");
                        return Err(GmailError::LabelError(format!(
                            "remove_label: label {label_name} not found"
                        )));
                    }
                }
            }
            ActionType::DeletePermanent => {
                self.client.batch_delete(ids).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{LabelInfo, MessageList, MessageStub};
    use crate::models::{Condition, Conjunction, Field, Operator};
    use async_trait::async_trait;
    use google_gmail1::api::Message;
    use std::sync::Mutex as StdMutex;
    use tempfile::tempdir;

    #[derive(Clone)]
    struct FakeClient(Arc<FakeState>);

    struct FakeState {
        messages: Vec<(String, Message)>,
        trashed: StdMutex<Vec<Vec<String>>>,
        modified: StdMutex<Vec<(Vec<String>, Vec<String>, Vec<String>)>>,
        deleted: StdMutex<Vec<Vec<String>>>,
        labels: StdMutex<Vec<LabelInfo>>,
    }

    impl FakeClient {
        fn new(messages: Vec<(&str, Message)>) -> Self {
            Self(Arc::new(FakeState {
                messages: messages.into_iter().map(|(id, m)| (id.to_string(), m)).collect(),
                trashed: StdMutex::new(Vec::new()),
                modified: StdMutex::new(Vec::new()),
                deleted: StdMutex::new(Vec::new()),
                labels: StdMutex::new(Vec::new()),
            }))
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
            Ok(MessageList {
                messages: self
                    .0
                    .messages
                    .iter()
                    .map(|(id, _)| MessageStub {
                        id: id.clone(),
                        thread_id: id.clone(),
                    })
                    .collect(),
                next_page_token: None,
            })
        }

        async fn get_message(&self, id: &str, _format: MessageFormat) -> Result<Message> {
            self.0
                .messages
                .iter()
                .find(|(mid, _)| mid == id)
                .map(|(_, msg)| msg.clone())
                .ok_or_else(|| GmailError::MessageNotFound(id.to_string()))
        }

        async fn batch_modify_labels(
            &self,
            ids: &[String],
            add: &[String],
            remove: &[String],
        ) -> Result<usize> {
            self.0
                .modified
                .lock()
                .unwrap()
                .push((ids.to_vec(), add.to_vec(), remove.to_vec()));
            Ok(ids.len())
        }

        async fn batch_trash(&self, ids: &[String]) -> Result<usize> {
            self.0.trashed.lock().unwrap().push(ids.to_vec());
            Ok(ids.len())
        }

        async fn batch_mark_read(&self, ids: &[String], _read: bool) -> Result<usize> {
            Ok(ids.len())
        }

        async fn batch_delete(&self, ids: &[String]) -> Result<usize> {
            self.0.deleted.lock().unwrap().push(ids.to_vec());
            Ok(ids.len())
        }

        async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
            Ok(self.0.labels.lock().unwrap().clone())
        }

        async fn create_label(&self, name: &str) -> Result<String> {
            let id = format!("Label_{}", name.replace(' ', "_"));
            self.0.labels.lock().unwrap().push(LabelInfo {
                id: id.clone(),
                name: name.to_string(),
            });
            Ok(id)
        }
    }

    fn message_with_snippet(id: &str, snippet: &str) -> (&str, Message) {
        (
            id,
            Message {
                id: Some(id.to_string()),
                snippet: Some(snippet.to_string()),
                payload: Some(Default::default()),
                ..Default::default()
            },
        )
    }

    fn newsletter_rule(label: &str) -> Rule {
        Rule::new(
            "cleanup",
            Conjunction::And,
            vec![Condition {
                field: Field::BodySnippet,
                operator: Operator::Contains,
                value: "newsletter".to_string(),
            }],
            vec![Action {
                action_type: ActionType::AddLabel,
                label_name: Some(label.to_string()),
            }],
        )
    }

    async fn setup(
        messages: Vec<(&str, Message)>,
        rules: Vec<Rule>,
        config: ExecutorConfig,
    ) -> (Executor<FakeClient>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let client = FakeClient::new(messages);
        let label_manager = Arc::new(LabelManager::new(client.clone()));
        let rule_store = Arc::new(RuleStore::new(dir.path().join("rules.json")));
        for rule in rules {
            rule_store.add(rule).await.unwrap();
        }

        let executor = Executor::new(
            client,
            label_manager,
            rule_store,
            dir.path().join("exclusions.json"),
            dir.path().join("checkpoint.json"),
            dir.path().join("rollback.json"),
            config,
        );
        (executor, dir)
    }

    fn test_config() -> ExecutorConfig {
        ExecutorConfig {
            scan_limit: None,
            page_size: 50,
            flush_chunk_size: 500,
            dry_run: false,
            include_detailed_ids: true,
            checkpoint_interval: 1,
            detail_fetch_concurrency: 5,
            allow_delete_permanent: false,
        }
    }

    #[tokio::test]
    async fn test_dry_run_does_not_call_write_verbs() {
        let messages = vec![message_with_snippet("m1", "weekly newsletter here")];
        let mut config = test_config();
        config.dry_run = true;
        let (executor, _dir) = setup(messages, vec![newsletter_rule("News")], config).await;

        let summary = executor
            .run("run1", RunOptions::default(), Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();

        assert!(summary.dry_run);
        assert_eq!(summary.actions_planned_or_taken["add_label:News"].count, 1);
        assert!(executor.client.0.modified.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_real_run_applies_label_action_and_creates_label() {
        let messages = vec![message_with_snippet("m1", "weekly newsletter here")];
        let (executor, _dir) = setup(messages, vec![newsletter_rule("News")], test_config()).await;

        let summary = executor
            .run("run1", RunOptions::default(), Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();

        assert_eq!(summary.emails_matching_any_rule, 1);
        let modified = executor.client.0.modified.lock().unwrap();
        assert_eq!(modified.len(), 1);
        assert_eq!(modified[0].0, vec!["m1".to_string()]);
        assert_eq!(modified[0].1, vec!["Label_News".to_string()]);
    }

    #[tokio::test]
    async fn test_exclusion_skips_matched_email() {
        let messages = vec![message_with_snippet("m1", "weekly newsletter here")];
        let (executor, dir) = setup(messages, vec![newsletter_rule("News")], test_config()).await;

        let mut manager = ExclusionManager::new();
        manager.add("m1:add_label:News".to_string(), None);
        manager.save(&dir.path().join("exclusions.json")).await.unwrap();

        let summary = executor
            .run("run1", RunOptions::default(), Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();

        assert_eq!(summary.emails_matching_any_rule, 1);
        assert!(summary.actions_planned_or_taken.is_empty());
        assert!(executor.client.0.modified.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_checkpoint_written_to_disk() {
        let messages = vec![message_with_snippet("m1", "weekly newsletter here")];
        let (executor, dir) = setup(messages, vec![newsletter_rule("News")], test_config()).await;

        executor
            .run("run1", RunOptions::default(), Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();

        let checkpoint = RunCheckpoint::load(&dir.path().join("checkpoint.json"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(checkpoint.phase, RunPhase::Complete);
        assert_eq!(checkpoint.emails_matched, 1);
    }

    #[tokio::test]
    async fn test_rollback_log_records_reversible_actions() {
        let messages = vec![message_with_snippet("m1", "weekly newsletter here")];
        let (executor, dir) = setup(messages, vec![newsletter_rule("News")], test_config()).await;

        executor
            .run("run1", RunOptions::default(), Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();

        let raw = tokio::fs::read_to_string(dir.path().join("rollback.json"))
            .await
            .unwrap();
        let log: RollbackLog = serde_json::from_str(&raw).unwrap();
        assert_eq!(log.operations.len(), 1);
        assert!(matches!(log.operations[0], RollbackOperation::LabelApplied { .. }));
    }

    #[tokio::test]
    async fn test_delete_permanent_skipped_when_not_allowed() {
        let messages = vec![message_with_snippet("m1", "weekly newsletter here")];
        let rule = Rule::new(
            "purge",
            Conjunction::And,
            vec![Condition {
                field: Field::BodySnippet,
                operator: Operator::Contains,
                value: "newsletter".to_string(),
            }],
            vec![Action {
                action_type: ActionType::DeletePermanent,
                label_name: None,
            }],
        );
        let (executor, _dir) = setup(messages, vec![rule], test_config()).await;

        let summary = executor
            .run("run1", RunOptions::default(), Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();

        assert!(!summary.actions_planned_or_taken.contains_key("delete_permanent"));
        assert!(executor.client.0.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_before_first_rule_yields_empty_summary() {
        let messages = vec![message_with_snippet("m1", "weekly newsletter here")];
        let (executor, _dir) = setup(messages, vec![newsletter_rule("News")], test_config()).await;

        let summary = executor
            .run("run1", RunOptions::default(), Arc::new(AtomicBool::new(true)))
            .await
            .unwrap();

        assert_eq!(summary.total_emails_scanned, 0);
        assert_eq!(summary.emails_matching_any_rule, 0);
    }

    #[tokio::test]
    async fn test_rule_ids_filter_restricts_to_named_rule() {
        let messages = vec![message_with_snippet("m1", "weekly newsletter here")];
        let rule_a = newsletter_rule("News");
        let rule_b = Rule::new("other", Conjunction::And, vec![], vec![]);
        let (executor, _dir) = setup(messages, vec![rule_a.clone(), rule_b], test_config()).await;

        let summary = executor
            .run(
                "run1",
                RunOptions {
                    rule_ids: Some(vec!["cleanup".to_string()]),
                    user_query: None,
                },
                Arc::new(AtomicBool::new(false)),
            )
            .await
            .unwrap();

        assert_eq!(summary.rules_applied_counts.len(), 1);
        assert!(summary.rules_applied_counts.contains_key(&rule_a.id));
    }
}
