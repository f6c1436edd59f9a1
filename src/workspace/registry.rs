use super::{EngineConfig, Workspace};
use crate::embedding::EmbeddingProvider;
use crate::error::{AmemError, Result};
use crate::retrieval::{Hit, SearchOptions};
use crate::storage::FeedbackStore;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Owns one [`Workspace`] per name
///
/// Workspaces are created on first reference and rehydrated from the
/// feedback store, so a fresh process sees everything indexed before.
pub struct WorkspaceRegistry {
    settings: EngineConfig,
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn FeedbackStore>,
    workspaces: BTreeMap<String, Workspace>,
}

impl WorkspaceRegistry {
    pub fn new(
        settings: EngineConfig,
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn FeedbackStore>,
    ) -> Self {
        Self {
            settings,
            provider,
            store,
            workspaces: BTreeMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn FeedbackStore> {
        &self.store
    }

    /// Open a workspace, creating and rehydrating it on first reference
    pub fn open(&mut self, name: &str) -> Result<&mut Workspace> {
        if !self.workspaces.contains_key(name) {
            let mut workspace = Workspace::new(
                name,
                self.settings.clone(),
                Arc::clone(&self.provider),
                Arc::clone(&self.store),
            )?;
            self.store.ensure_workspace(name)?;
            let items = workspace.rehydrate()?;
            tracing::debug!("Opened workspace '{}' ({} stored items)", name, items);
            self.workspaces.insert(name.to_string(), workspace);
        }

        self.workspaces
            .get_mut(name)
            .ok_or_else(|| AmemError::not_found("workspace", name))
    }

    pub fn get(&self, name: &str) -> Option<&Workspace> {
        self.workspaces.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Workspace> {
        self.workspaces.get_mut(name)
    }

    /// Drop an open workspace from memory; stored items and feedback stay
    pub fn close(&mut self, name: &str) -> bool {
        self.workspaces.remove(name).is_some()
    }

    /// Names of the open workspaces
    pub fn names(&self) -> Vec<&str> {
        self.workspaces.keys().map(String::as_str).collect()
    }

    /// Every workspace the store knows about, open or not
    pub fn known(&self) -> Result<Vec<String>> {
        self.store.list_workspaces()
    }

    /// Search every open workspace and merge the hits by score
    pub fn search_all(&self, query: &str, options: &SearchOptions) -> Result<Vec<(String, Hit)>> {
        let mut merged = Vec::new();
        for (name, workspace) in &self.workspaces {
            merged.extend(
                workspace
                    .search(query, options)?
                    .into_iter()
                    .map(|hit| (name.clone(), hit)),
            );
        }

        merged.sort_by(|a, b| {
            b.1.score
                .partial_cmp(&a.1.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        merged.truncate(options.k);
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::storage::StorageManager;
    use tempfile::TempDir;

    fn registry(dir: &TempDir) -> WorkspaceRegistry {
        let store = StorageManager::new(dir.path().to_path_buf(), 1024).unwrap();
        WorkspaceRegistry::new(
            EngineConfig::default(),
            Arc::new(HashingEmbedder::with_defaults().unwrap()),
            Arc::new(store),
        )
    }

    #[test]
    fn test_open_creates_once() {
        let dir = TempDir::new().unwrap();
        let mut registry = registry(&dir);

        registry
            .open("w1")
            .unwrap()
            .add("a.md", "login flow with sessions", &[], None)
            .unwrap();
        assert_eq!(registry.open("w1").unwrap().index().len(), 1);
        assert_eq!(registry.names(), vec!["w1"]);
        assert_eq!(registry.known().unwrap(), vec!["w1".to_string()]);

        assert!(registry.open("bad name").is_err());
        assert!(registry.names().len() == 1);
    }

    #[test]
    fn test_close_and_reopen_rehydrates() {
        let dir = TempDir::new().unwrap();
        let mut registry = registry(&dir);
        registry
            .open("w1")
            .unwrap()
            .add("a.md", "login flow with sessions", &[], None)
            .unwrap();

        assert!(registry.close("w1"));
        assert!(!registry.close("w1"));
        assert!(registry.get("w1").is_none());

        assert_eq!(registry.open("w1").unwrap().index().len(), 1);
    }

    #[test]
    fn test_search_all_merges_workspaces() {
        let dir = TempDir::new().unwrap();
        let mut registry = registry(&dir);
        registry
            .open("docs")
            .unwrap()
            .add("jwt.md", "JWT token validation guide", &[], None)
            .unwrap();
        registry
            .open("code")
            .unwrap()
            .add("db.rs", "database connection pool", &[], None)
            .unwrap();

        let hits = registry
            .search_all("JWT validation", &SearchOptions::new(5))
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, "docs");
        assert!(hits[0].1.score >= hits[1].1.score);

        let top_only = registry
            .search_all("JWT validation", &SearchOptions::new(1))
            .unwrap();
        assert_eq!(top_only.len(), 1);
    }
}
