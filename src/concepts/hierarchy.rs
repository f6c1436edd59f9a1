use super::generality::{compare_generality, node_id, Generality};
use super::ConceptConfig;
use crate::embedding::{centroid, cosine, HashingEmbedder};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Id of the synthetic root node
pub const ROOT_ID: &str = "root";
/// Label of the synthetic root node
pub const ROOT_LABEL: &str = "root";

/// Maturity of a concept node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Tentative,
    Stable,
}

/// A node of the concept tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptNode {
    pub id: String,
    pub label: String,
    /// `None` only for the root
    pub parent: Option<String>,
    /// Ordered child ids
    pub children: Vec<String>,
    /// Label embedding (mean of label and child for promoted nodes)
    #[serde(skip)]
    pub centroid: Vec<f32>,
    /// Number of sources tagged with this concept
    pub support_docs: u32,
    pub status: NodeStatus,
}

/// Where an inserted label ended up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Placement {
    /// Blank label, resolved to the root
    Root,
    /// Label already present; nothing changed
    Existing,
    /// Attached as a new child of `parent`
    Child { parent: String },
    /// Same level as a visited node; no node created, the label is an alias of `into`
    Merged { into: String },
    /// Inserted above `over`, which became its child
    Promoted { over: String },
}

/// Result of [`ConceptHierarchy::insert`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertOutcome {
    /// Id of the node holding the label
    pub id: String,
    pub placement: Placement,
}

impl InsertOutcome {
    fn new(id: impl Into<String>, placement: Placement) -> Self {
        Self {
            id: id.into(),
            placement,
        }
    }

    /// Attach point: the parent for new children, the merge target for merged labels
    pub fn attach_point(&self) -> &str {
        match &self.placement {
            Placement::Child { parent } => parent,
            Placement::Merged { into } => into,
            _ => &self.id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConceptAction {
    Insert,
    Merge,
    Promotion,
}

/// Audit record of a tree mutation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptEvent {
    pub time: DateTime<Utc>,
    pub action: ConceptAction,
    pub from: Option<String>,
    pub to: String,
    pub reason: String,
}

/// Nested, serializable view of the tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptTree {
    pub id: String,
    pub label: String,
    pub support_docs: u32,
    pub status: NodeStatus,
    pub children: Vec<ConceptTree>,
}

/// Single-rooted concept tree stored as an arena keyed by node id
///
/// Nodes reference each other only by id, so promotion is a handful of key
/// reassignments. The root is the most general anchor: it is never merged
/// into and never promoted over.
pub struct ConceptHierarchy {
    nodes: BTreeMap<String, ConceptNode>,
    /// Merged label id -> node that absorbed it
    aliases: BTreeMap<String, String>,
    events: Vec<ConceptEvent>,
    embedder: HashingEmbedder,
    config: ConceptConfig,
}

impl ConceptHierarchy {
    pub fn new(embedder: HashingEmbedder, config: ConceptConfig) -> Self {
        let root = ConceptNode {
            id: ROOT_ID.to_string(),
            label: ROOT_LABEL.to_string(),
            parent: None,
            children: Vec::new(),
            centroid: embedder.embed(ROOT_LABEL),
            support_docs: 0,
            status: NodeStatus::Stable,
        };

        let mut nodes = BTreeMap::new();
        nodes.insert(root.id.clone(), root);

        Self {
            nodes,
            aliases: BTreeMap::new(),
            events: Vec::new(),
            embedder,
            config,
        }
    }

    /// Node id a label maps to under this hierarchy's configuration
    pub fn id_for(&self, label: &str) -> String {
        if label.trim().is_empty() {
            return ROOT_ID.to_string();
        }
        node_id(label, self.config.max_label_len)
    }

    /// Node holding `label`, directly or through a same-level merge
    pub fn node_for(&self, label: &str) -> Option<String> {
        let id = self.id_for(label);
        if self.nodes.contains_key(&id) {
            return Some(id);
        }
        self.aliases
            .get(&id)
            .filter(|target| self.nodes.contains_key(target.as_str()))
            .cloned()
    }

    /// Insert `label` starting from the root
    pub fn insert(&mut self, label: &str) -> InsertOutcome {
        self.insert_from(label, ROOT_ID)
    }

    /// Insert `label`, starting the descent at node `start`
    pub fn insert_from(&mut self, label: &str, start: &str) -> InsertOutcome {
        let label = label.trim();
        if label.is_empty() {
            return InsertOutcome::new(ROOT_ID, Placement::Root);
        }

        let id = self.id_for(label);
        if let Some(existing) = self.node_for(label) {
            return InsertOutcome::new(existing, Placement::Existing);
        }

        let mut current = if self.nodes.contains_key(start) {
            start.to_string()
        } else {
            tracing::warn!("Unknown start node '{}', inserting from root", start);
            ROOT_ID.to_string()
        };

        loop {
            let Some(node) = self.nodes.get(&current) else {
                // Only reachable through a broken child list; fall back to the root
                tracing::warn!("Dangling child reference '{}'", current);
                self.attach(&id, label, ROOT_ID, "attach");
                return InsertOutcome::new(id, Placement::Child { parent: ROOT_ID.into() });
            };

            let decision = if node.parent.is_none() {
                Generality::MoreSpecific
            } else {
                compare_generality(label, &node.label)
            };

            match decision {
                Generality::SameLevel => {
                    let into = node.parent.clone().unwrap_or_else(|| ROOT_ID.to_string());
                    tracing::debug!("Merged concept '{}' into '{}'", id, into);
                    self.aliases.insert(id.clone(), into.clone());
                    self.record(ConceptAction::Merge, Some(id), &into, "same_level");
                    return InsertOutcome::new(into.clone(), Placement::Merged { into });
                }
                Generality::MoreSpecific => {
                    let next = node
                        .children
                        .iter()
                        .find(|cid| {
                            self.nodes.get(cid.as_str()).is_some_and(|child| {
                                self.is_related(label, &child.label, Some(node.label.as_str()))
                            })
                        })
                        .cloned();

                    match next {
                        Some(child) => current = child,
                        None => {
                            self.attach(&id, label, &current, "attach");
                            return InsertOutcome::new(id, Placement::Child { parent: current });
                        }
                    }
                }
                Generality::MoreGeneral => {
                    return match self.handle_promotion(label, &current) {
                        Some(new_id) => InsertOutcome::new(new_id, Placement::Promoted { over: current }),
                        None => InsertOutcome::new(ROOT_ID, Placement::Root),
                    };
                }
            }
        }
    }

    /// Insert `label` as the new parent of `node`
    ///
    /// The label node takes `node`'s position in the old parent's child list.
    /// Returns the new node id, or `None` when `node` is unknown, is the root,
    /// or the label already exists.
    pub fn handle_promotion(&mut self, label: &str, node: &str) -> Option<String> {
        let new_id = self.id_for(label);
        if node == ROOT_ID || new_id == ROOT_ID {
            tracing::warn!("Refusing to promote '{}' over the root", label);
            return None;
        }
        if self.nodes.contains_key(&new_id) {
            tracing::warn!("Cannot promote existing concept '{}' over '{}'", new_id, node);
            return None;
        }

        let Some(target) = self.nodes.get(node) else {
            tracing::warn!("Promotion target '{}' no longer exists", node);
            return None;
        };
        let Some(old_parent) = target.parent.clone() else {
            tracing::warn!("Promotion target '{}' has no parent", node);
            return None;
        };

        let label_vec = self.embedder.embed(label);
        let merged = centroid(&[label_vec.as_slice(), target.centroid.as_slice()]);

        self.nodes.insert(
            new_id.clone(),
            ConceptNode {
                id: new_id.clone(),
                label: label.trim().to_string(),
                parent: Some(old_parent.clone()),
                children: vec![node.to_string()],
                centroid: merged,
                support_docs: 0,
                status: NodeStatus::Tentative,
            },
        );

        if let Some(parent) = self.nodes.get_mut(&old_parent) {
            match parent.children.iter().position(|c| c == node) {
                Some(pos) => parent.children[pos] = new_id.clone(),
                None => parent.children.push(new_id.clone()),
            }
        }
        if let Some(target) = self.nodes.get_mut(node) {
            target.parent = Some(new_id.clone());
        }

        tracing::debug!("Promoted concept '{}' over '{}'", new_id, node);
        self.record(ConceptAction::Promotion, Some(node.to_string()), &new_id, "more_general");
        Some(new_id)
    }

    /// True when `concept` is close to `node_label` and closer to it than to the parent
    pub fn is_related(&self, concept: &str, node_label: &str, parent_label: Option<&str>) -> bool {
        let v = self.embedder.embed(concept);
        let sim = cosine(&v, &self.embedder.embed(node_label));
        let sim_parent = parent_label
            .map(|p| cosine(&v, &self.embedder.embed(p)))
            .unwrap_or(0.0);
        sim >= self.config.related_threshold.max(sim_parent + self.config.related_margin)
    }

    /// Labels of every non-root node related to `concept`
    pub fn related(&self, concept: &str) -> Vec<String> {
        self.nodes
            .values()
            .filter(|n| n.parent.is_some())
            .filter(|n| self.is_related(concept, &n.label, None))
            .map(|n| n.label.clone())
            .collect()
    }

    /// Count one more source tagged with `label`; returns the node's new status
    pub fn record_support(&mut self, label: &str) -> Option<NodeStatus> {
        let id = self.node_for(label)?;
        let stable_at = self.config.stable_support;
        let node = self.nodes.get_mut(&id)?;

        node.support_docs += 1;
        if node.status == NodeStatus::Tentative && node.support_docs >= stable_at {
            node.status = NodeStatus::Stable;
            tracing::debug!("Concept '{}' is now stable", id);
        }
        Some(node.status)
    }

    /// Ids on the path from the root to the node closest to `query`
    pub fn resolve_ids(&self, query: &str) -> Vec<String> {
        let qv = self.embedder.embed(query);

        let mut best = ROOT_ID;
        let mut best_sim = cosine(&qv, &self.embedder.embed(ROOT_LABEL));

        for (id, node) in &self.nodes {
            if id == ROOT_ID {
                continue;
            }
            // Own label, not the promotion centroid
            let sim = cosine(&qv, &self.embedder.embed(&node.label));
            if sim > best_sim {
                best = id;
                best_sim = sim;
            }
        }

        self.path_ids(best)
    }

    /// Human-readable path of the node closest to `query`, e.g. `root > Auth > JWT`
    pub fn resolve_path(&self, query: &str) -> String {
        self.labels_of(&self.resolve_ids(query)).join(" > ")
    }

    /// Labels from the root down to node `id`
    pub fn path_of(&self, id: &str) -> Option<Vec<String>> {
        if !self.nodes.contains_key(id) {
            return None;
        }
        Some(self.labels_of(&self.path_ids(id)))
    }

    fn path_ids(&self, id: &str) -> Vec<String> {
        let mut path = Vec::new();
        let mut cursor = Some(id.to_string());
        while let Some(current) = cursor {
            // Cycle guard: a path can never be longer than the tree
            if path.len() > self.nodes.len() {
                tracing::warn!("Cycle detected while resolving path of '{}'", id);
                break;
            }
            cursor = self.nodes.get(&current).and_then(|n| n.parent.clone());
            path.push(current);
        }
        path.reverse();
        path
    }

    fn labels_of(&self, ids: &[String]) -> Vec<String> {
        ids.iter()
            .filter_map(|id| self.nodes.get(id))
            .map(|n| n.label.clone())
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&ConceptNode> {
        self.nodes.get(id)
    }

    pub fn root(&self) -> Option<&ConceptNode> {
        self.nodes.get(ROOT_ID)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ConceptNode> {
        self.nodes.values()
    }

    /// Number of concepts, excluding the root
    pub fn len(&self) -> usize {
        self.nodes.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Longest root-to-leaf edge count
    pub fn depth(&self) -> usize {
        self.depth_of(ROOT_ID, 0)
    }

    fn depth_of(&self, id: &str, guard: usize) -> usize {
        if guard > self.nodes.len() {
            return 0;
        }
        self.nodes
            .get(id)
            .and_then(|n| {
                n.children
                    .iter()
                    .map(|c| 1 + self.depth_of(c, guard + 1))
                    .max()
            })
            .unwrap_or(0)
    }

    pub fn events(&self) -> &[ConceptEvent] {
        &self.events
    }

    /// Nested view of the whole tree
    pub fn tree(&self) -> ConceptTree {
        self.subtree(ROOT_ID, 0)
    }

    fn subtree(&self, id: &str, guard: usize) -> ConceptTree {
        let Some(node) = self.nodes.get(id) else {
            return ConceptTree {
                id: id.to_string(),
                label: id.to_string(),
                support_docs: 0,
                status: NodeStatus::Tentative,
                children: Vec::new(),
            };
        };

        let children = if guard > self.nodes.len() {
            Vec::new()
        } else {
            node.children.iter().map(|c| self.subtree(c, guard + 1)).collect()
        };

        ConceptTree {
            id: node.id.clone(),
            label: node.label.clone(),
            support_docs: node.support_docs,
            status: node.status,
            children,
        }
    }

    /// Verify the structural invariants of the tree
    ///
    /// Exactly one root, every other node has one existing parent that lists
    /// it exactly once, child pointers agree with parent pointers, and every
    /// node is reachable from the root (which rules out cycles).
    pub fn check_invariants(&self) -> Result<(), String> {
        let roots: Vec<_> = self.nodes.values().filter(|n| n.parent.is_none()).collect();
        if roots.len() != 1 || roots[0].id != ROOT_ID {
            return Err(format!(
                "expected exactly one root '{}', found {:?}",
                ROOT_ID,
                roots.iter().map(|n| &n.id).collect::<Vec<_>>()
            ));
        }

        for node in self.nodes.values() {
            if let Some(parent_id) = &node.parent {
                let parent = self
                    .nodes
                    .get(parent_id)
                    .ok_or_else(|| format!("'{}' has missing parent '{}'", node.id, parent_id))?;
                let listed = parent.children.iter().filter(|c| *c == &node.id).count();
                if listed != 1 {
                    return Err(format!(
                        "'{}' listed {} times by parent '{}'",
                        node.id, listed, parent_id
                    ));
                }
            }

            for child in &node.children {
                let child_node = self
                    .nodes
                    .get(child)
                    .ok_or_else(|| format!("'{}' has missing child '{}'", node.id, child))?;
                if child_node.parent.as_deref() != Some(node.id.as_str()) {
                    return Err(format!("'{}' does not point back to '{}'", child, node.id));
                }
            }
        }

        let mut seen = HashSet::new();
        let mut stack = vec![ROOT_ID.to_string()];
        while let Some(id) = stack.pop() {
            if !seen.insert(id.clone()) {
                return Err(format!("'{}' reached twice", id));
            }
            if let Some(node) = self.nodes.get(&id) {
                stack.extend(node.children.iter().cloned());
            }
        }
        if seen.len() != self.nodes.len() {
            return Err(format!(
                "{} of {} nodes reachable from the root",
                seen.len(),
                self.nodes.len()
            ));
        }

        Ok(())
    }

    fn attach(&mut self, id: &str, label: &str, parent: &str, reason: &str) {
        let node = ConceptNode {
            id: id.to_string(),
            label: label.to_string(),
            parent: Some(parent.to_string()),
            children: Vec::new(),
            centroid: self.embedder.embed(label),
            support_docs: 0,
            status: NodeStatus::Tentative,
        };
        self.nodes.insert(id.to_string(), node);

        if let Some(p) = self.nodes.get_mut(parent) {
            if !p.children.iter().any(|c| c == id) {
                p.children.push(id.to_string());
            }
        }

        tracing::debug!("Inserted concept '{}' under '{}'", id, parent);
        self.record(ConceptAction::Insert, Some(parent.to_string()), id, reason);
    }

    fn record(&mut self, action: ConceptAction, from: Option<String>, to: &str, reason: &str) {
        self.events.push(ConceptEvent {
            time: Utc::now(),
            action,
            from,
            to: to.to_string(),
            reason: reason.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hierarchy() -> ConceptHierarchy {
        let embedder = HashingEmbedder::new("concepts_test", 256).unwrap();
        ConceptHierarchy::new(embedder, ConceptConfig::default())
    }

    #[test]
    fn test_empty_tree_resolves_to_root() {
        let tree = hierarchy();
        assert_eq!(tree.resolve_path("anything at all"), "root");
        assert_eq!(tree.len(), 0);
        assert_eq!(tree.depth(), 0);
        assert!(tree.check_invariants().is_ok());
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut tree = hierarchy();
        let first = tree.insert("Authentication");
        assert_eq!(first.id, "node_authentication");
        assert_eq!(first.placement, Placement::Child { parent: ROOT_ID.into() });

        let again = tree.insert("authentication");
        assert_eq!(again.id, first.id);
        assert_eq!(again.placement, Placement::Existing);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.events().len(), 1);
    }

    #[test]
    fn test_blank_label_maps_to_root() {
        let mut tree = hierarchy();
        let outcome = tree.insert("   ");
        assert_eq!(outcome.id, ROOT_ID);
        assert_eq!(outcome.placement, Placement::Root);
        assert!(tree.is_empty());
    }

    #[test]
    fn test_specific_label_descends_into_related_child() {
        let mut tree = hierarchy();
        tree.insert("JWT");
        let outcome = tree.insert("JWT validation");

        assert_eq!(outcome.placement, Placement::Child { parent: "node_jwt".into() });
        assert_eq!(
            tree.path_of(&outcome.id).unwrap(),
            vec!["root", "JWT", "JWT validation"]
        );
        assert_eq!(tree.depth(), 2);
        assert!(tree.check_invariants().is_ok());
    }

    #[test]
    fn test_general_label_is_promoted() {
        let mut tree = hierarchy();
        tree.insert("Billing");
        tree.insert("JWT token validation");
        let outcome = tree.insert("JWT validation");

        assert_eq!(
            outcome.placement,
            Placement::Promoted { over: "node_jwt_token_validation".into() }
        );

        // Promoted node takes the old node's slot under the root
        let root = tree.root().unwrap();
        assert_eq!(root.children, vec!["node_billing", "node_jwt_validation"]);
        let promoted = tree.get("node_jwt_validation").unwrap();
        assert_eq!(promoted.children, vec!["node_jwt_token_validation"]);
        assert_eq!(
            tree.get("node_jwt_token_validation").unwrap().parent.as_deref(),
            Some("node_jwt_validation")
        );

        let event = tree.events().last().unwrap();
        assert_eq!(event.action, ConceptAction::Promotion);
        assert_eq!(event.from.as_deref(), Some("node_jwt_token_validation"));
        assert_eq!(event.to, "node_jwt_validation");
        assert!(tree.check_invariants().is_ok());
    }

    #[test]
    fn test_same_level_merges_into_parent() {
        let mut tree = hierarchy();
        tree.insert("JWT validation");
        // Related to "JWT validation" and equally specific
        let outcome = tree.insert("JWT verification");

        assert_eq!(outcome.id, ROOT_ID);
        assert_eq!(outcome.placement, Placement::Merged { into: ROOT_ID.into() });
        assert_eq!(outcome.attach_point(), ROOT_ID);
        assert_eq!(tree.len(), 1);
        assert!(tree.get("node_jwt_verification").is_none());
        assert_eq!(tree.node_for("JWT verification").as_deref(), Some(ROOT_ID));

        let event = tree.events().last().unwrap();
        assert_eq!(event.action, ConceptAction::Merge);
        assert_eq!(event.to, ROOT_ID);

        let again = tree.insert("jwt verification");
        assert_eq!(again.placement, Placement::Existing);
        assert_eq!(again.id, ROOT_ID);
        assert_eq!(tree.events().len(), 2);
        assert!(tree.check_invariants().is_ok());
    }

    #[test]
    fn test_resolve_uses_label_embedding_after_promotion() {
        let mut tree = hierarchy();
        tree.insert("JWT token validation");
        tree.insert("JWT validation");

        // Closer to the merged centroid of the promoted node than to either
        // label, but closer to the child's own label than to the parent's
        let ids = tree.resolve_ids("JWT validation JWT validation token");
        assert_eq!(
            ids,
            vec![
                ROOT_ID.to_string(),
                "node_jwt_validation".to_string(),
                "node_jwt_token_validation".to_string(),
            ]
        );
    }

    #[test]
    fn test_promotion_on_missing_node_is_noop() {
        let mut tree = hierarchy();
        assert!(tree.handle_promotion("Security", "node_missing").is_none());
        assert!(tree.handle_promotion("Security", ROOT_ID).is_none());
        assert!(tree.is_empty());
        assert!(tree.check_invariants().is_ok());
    }

    #[test]
    fn test_resolve_path_picks_closest_node() {
        let mut tree = hierarchy();
        tree.insert("JWT");
        tree.insert("JWT validation");
        tree.insert("Database");

        assert_eq!(tree.resolve_path("JWT validation"), "root > JWT > JWT validation");
        assert_eq!(
            tree.resolve_ids("database"),
            vec![ROOT_ID.to_string(), "node_database".to_string()]
        );
    }

    #[test]
    fn test_record_support_stabilizes() {
        let mut tree = hierarchy();
        tree.insert("Caching");

        assert_eq!(tree.record_support("Caching"), Some(NodeStatus::Tentative));
        assert_eq!(tree.record_support("caching"), Some(NodeStatus::Tentative));
        assert_eq!(tree.record_support("Caching"), Some(NodeStatus::Stable));
        assert_eq!(tree.get("node_caching").unwrap().support_docs, 3);
        assert_eq!(tree.record_support("Unknown"), None);
    }

    #[test]
    fn test_tree_view_and_related() {
        let mut tree = hierarchy();
        tree.insert("JWT");
        tree.insert("JWT validation");
        tree.insert("Database");

        let view = tree.tree();
        assert_eq!(view.id, ROOT_ID);
        assert_eq!(view.children.len(), 2);
        assert_eq!(view.children[0].children[0].label, "JWT validation");

        let related = tree.related("JWT");
        assert!(related.contains(&"JWT".to_string()));
        assert!(!related.contains(&"Database".to_string()));
    }
}
