//! Persistent rule storage: a JSON array of [`Rule`] objects, loaded and
//! saved atomically (write to temp file, then rename).

use crate::error::{GmailError, Result};
use crate::models::Rule;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// CRUD over the rule file. Mirrors the atomic-write and skip-invalid-on-
/// load discipline the distilled spec requires (§6).
pub struct RuleStore {
    path: PathBuf,
}

impl RuleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load rules from disk. A missing file is treated as an empty store,
    /// not an error. Individual rules that fail to parse are logged and
    /// skipped rather than failing the whole load (forward compatibility
    /// with unknown fields is handled by serde's default `#[serde]`
    /// attributes on `Rule`).
    pub async fn load(&self) -> Result<Vec<Rule>> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "rules file not found, starting empty");
            return Ok(Vec::new());
        }

        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| GmailError::StoreIo(format!("reading {}: {e}", self.path.display())))?;

        let values: Vec<serde_json::Value> = serde_json::from_str(&raw)
            .map_err(|e| GmailError::StoreParse(format!("invalid JSON in rules file: {e}")))?;

        let mut rules = Vec::with_capacity(values.len());
        let mut skipped = 0usize;
        for (i, value) in values.into_iter().enumerate() {
            match serde_json::from_value::<Rule>(value) {
                Ok(rule) => rules.push(rule),
                Err(e) => {
                    skipped += 1;
                    warn!(index = i, error = %e, "skipping invalid rule");
                }
            }
        }

        if skipped > 0 {
            warn!(valid = rules.len(), skipped, "loaded rules with some invalid entries");
        } else {
            debug!(count = rules.len(), "loaded rules");
        }
        Ok(rules)
    }

    /// Save the full rule set atomically: write to a sibling temp file
    /// then rename over the target, so a crash mid-write never leaves a
    /// truncated rules file.
    pub async fn save(&self, rules: &[Rule]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| GmailError::StoreIo(format!("creating {}: {e}", parent.display())))?;
        }

        let json = serde_json::to_string_pretty(rules)
            .map_err(|e| GmailError::StoreIo(format!("serializing rules: {e}")))?;

        let tmp_path = tmp_path_for(&self.path);
        tokio::fs::write(&tmp_path, json)
            .await
            .map_err(|e| GmailError::StoreIo(format!("writing {}: {e}", tmp_path.display())))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| GmailError::StoreIo(format!("renaming into {}: {e}", self.path.display())))?;

        info!(count = rules.len(), path = %self.path.display(), "saved rules");
        Ok(())
    }

    /// Add a new rule, enforcing the name-uniqueness invariant.
    pub async fn add(&self, rule: Rule) -> Result<Rule> {
        let mut rules = self.load().await?;
        if rules.iter().any(|r| r.name.eq_ignore_ascii_case(&rule.name)) {
            return Err(GmailError::InvalidParameter(format!(
                "a rule named '{}' already exists",
                rule.name
            )));
        }
        rules.push(rule.clone());
        self.save(&rules).await?;
        Ok(rule)
    }

    /// Replace an existing rule (matched by id) in place.
    pub async fn replace(&self, updated: Rule) -> Result<()> {
        let mut rules = self.load().await?;
        let idx = rules
            .iter()
            .position(|r| r.id == updated.id)
            .ok_or_else(|| GmailError::NotFound(format!("rule '{}' not found", updated.id)))?;
        if rules
            .iter()
            .enumerate()
            .any(|(i, r)| i != idx && r.name.eq_ignore_ascii_case(&updated.name))
        {
            return Err(GmailError::InvalidParameter(format!(
                "a rule named '{}' already exists",
                updated.name
            )));
        }
        rules[idx] = updated;
        self.save(&rules).await
    }

    /// Delete a rule by id or case-insensitive name.
    pub async fn delete(&self, id_or_name: &str) -> Result<()> {
        let mut rules = self.load().await?;
        let before = rules.len();
        rules.retain(|r| !r.matches_id_or_name(id_or_name));
        if rules.len() == before {
            return Err(GmailError::NotFound(format!(
                "rule '{id_or_name}' not found"
            )));
        }
        self.save(&rules).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Conjunction;
    use tempfile::tempdir;

    fn sample_rule(name: &str) -> Rule {
        Rule::new(name, Conjunction::And, vec![], vec![])
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = RuleStore::new(dir.path().join("rules.json"));
        let rules = store.load().await.unwrap();
        assert!(rules.is_empty());
    }

    #[tokio::test]
    async fn test_add_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let store = RuleStore::new(dir.path().join("rules.json"));
        store.add(sample_rule("Rule One")).await.unwrap();
        store.add(sample_rule("Rule Two")).await.unwrap();

        let rules = store.load().await.unwrap();
        assert_eq!(rules.len(), 2);
    }

    #[tokio::test]
    async fn test_add_duplicate_name_rejected() {
        let dir = tempdir().unwrap();
        let store = RuleStore::new(dir.path().join("rules.json"));
        store.add(sample_rule("Dup")).await.unwrap();
        let err = store.add(sample_rule("dup")).await.unwrap_err();
        assert!(matches!(err, GmailError::InvalidParameter(_)));
    }

    #[tokio::test]
    async fn test_delete_by_name_case_insensitive() {
        let dir = tempdir().unwrap();
        let store = RuleStore::new(dir.path().join("rules.json"));
        store.add(sample_rule("ToDelete")).await.unwrap();
        store.delete("todelete").await.unwrap();
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_missing_rule_not_found() {
        let dir = tempdir().unwrap();
        let store = RuleStore::new(dir.path().join("rules.json"));
        let err = store.delete("nope").await.unwrap_err();
        assert!(matches!(err, GmailError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_invalid_json_is_store_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rules.json");
        tokio::fs::write(&path, "not json").await.unwrap();
        let store = RuleStore::new(path);
        let err = store.load().await.unwrap_err();
        assert!(matches!(err, GmailError::StoreParse(_)));
    }

    #[tokio::test]
    async fn test_skips_invalid_rule_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rules.json");
        let json = r#"[
            {"id": "rule_1", "name": "Good", "conjunction": "and", "conditions": [], "actions": []},
            {"id": "rule_2"}
        ]"#;
        tokio::fs::write(&path, json).await.unwrap();
        let store = RuleStore::new(path);
        let rules = store.load().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].name, "Good");
    }

    #[tokio::test]
    async fn test_replace_updates_existing_rule() {
        let dir = tempdir().unwrap();
        let store = RuleStore::new(dir.path().join("rules.json"));
        let rule = store.add(sample_rule("Original")).await.unwrap();

        let mut updated = rule.clone();
        updated.enabled = false;
        store.replace(updated).await.unwrap();

        let rules = store.load().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert!(!rules[0].enabled);
    }
}
