//! Immutable activity tree model.
//!
//! The tree is built once per course version from the manifest
//! collaborator's flat descriptor, validated, and never mutated afterwards.
//! Nodes live in an arena (flat vector, integer indices) with a string-id
//! index on the side, which keeps serialization cheap and makes cyclic
//! references impossible to represent once built.

use regex::Regex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::error::ManifestError;
use crate::core::rollup::{RollupAspect, RollupOutcome, RollupRule};
use crate::core::rules::{ExitAction, PostAction, PreAction, Rule};

/// Index of a node inside the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActivityId(u32);

impl ActivityId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

fn default_true() -> bool {
    true
}

/// Per-cluster navigation permissions. Defaults follow the SCORM sequencing
/// defaults: choice and flow on, forward-only off, choice-exit on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMode {
    #[serde(default = "default_true")]
    pub choice: bool,
    #[serde(default = "default_true")]
    pub flow: bool,
    #[serde(default)]
    pub forward_only: bool,
    #[serde(default = "default_true")]
    pub choice_exit: bool,
}

impl Default for ControlMode {
    fn default() -> Self {
        Self {
            choice: true,
            flow: true,
            forward_only: false,
            choice_exit: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LimitConditions {
    #[serde(default)]
    pub attempt_limit: Option<u32>,
    #[serde(default)]
    pub attempt_absolute_duration_limit_secs: Option<u64>,
}

/// One activity as supplied by the content-ingestion collaborator, in
/// document order. `parent: None` marks the root.
#[derive(Debug, Clone, Deserialize)]
pub struct RawActivity {
    pub identifier: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub parent: Option<String>,
    /// Explicit leaf declaration; inferred from childlessness when absent.
    #[serde(default)]
    pub leaf: Option<bool>,
    #[serde(default)]
    pub control_mode: Option<ControlMode>,
    #[serde(default)]
    pub pre_condition_rules: Vec<Rule<PreAction>>,
    #[serde(default)]
    pub exit_condition_rules: Vec<Rule<ExitAction>>,
    #[serde(default)]
    pub post_condition_rules: Vec<Rule<PostAction>>,
    #[serde(default)]
    pub rollup_rules: Vec<RollupRule>,
    #[serde(default)]
    pub limit_conditions: LimitConditions,
    #[serde(default)]
    pub launch_data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTreeDescriptor {
    #[serde(default)]
    pub title: String,
    pub activities: Vec<RawActivity>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityNode {
    pub id: String,
    pub title: String,
    pub parent: Option<ActivityId>,
    pub children: Vec<ActivityId>,
    pub leaf: bool,
    pub control_mode: ControlMode,
    pub pre_condition_rules: Vec<Rule<PreAction>>,
    pub exit_condition_rules: Vec<Rule<ExitAction>>,
    pub post_condition_rules: Vec<Rule<PostAction>>,
    pub rollup_rules: Vec<RollupRule>,
    pub limit_conditions: LimitConditions,
    pub launch_data: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityTree {
    title: String,
    nodes: Vec<ActivityNode>,
    root: ActivityId,
    #[serde(skip)]
    index: FxHashMap<String, ActivityId>,
}

impl ActivityTree {
    pub fn build(desc: &RawTreeDescriptor) -> Result<Self, ManifestError> {
        if desc.activities.is_empty() {
            return Err(ManifestError::Empty);
        }

        let id_re = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.:\-]*$").expect("static pattern");

        let mut nodes: Vec<ActivityNode> = Vec::with_capacity(desc.activities.len());
        let mut index: FxHashMap<String, ActivityId> = FxHashMap::default();

        for (pos, raw) in desc.activities.iter().enumerate() {
            if !id_re.is_match(&raw.identifier) {
                return Err(ManifestError::InvalidIdentifier(raw.identifier.clone()));
            }
            if index.contains_key(&raw.identifier) {
                return Err(ManifestError::DuplicateIdentifier(raw.identifier.clone()));
            }
            validate_rollup_rules(&raw.identifier, &raw.rollup_rules)?;
            index.insert(raw.identifier.clone(), ActivityId(pos as u32));
            nodes.push(ActivityNode {
                id: raw.identifier.clone(),
                title: raw.title.clone(),
                parent: None,
                children: Vec::new(),
                leaf: raw.leaf.unwrap_or(false),
                control_mode: raw.control_mode.clone().unwrap_or_default(),
                pre_condition_rules: raw.pre_condition_rules.clone(),
                exit_condition_rules: raw.exit_condition_rules.clone(),
                post_condition_rules: raw.post_condition_rules.clone(),
                rollup_rules: raw.rollup_rules.clone(),
                limit_conditions: raw.limit_conditions.clone(),
                launch_data: raw.launch_data.clone(),
            });
        }

        // Wire parent/child edges in document order.
        let mut root: Option<ActivityId> = None;
        for (pos, raw) in desc.activities.iter().enumerate() {
            let aid = ActivityId(pos as u32);
            match &raw.parent {
                None => match root {
                    None => root = Some(aid),
                    Some(existing) => {
                        return Err(ManifestError::MultipleRoots(
                            nodes[existing.index()].id.clone(),
                            raw.identifier.clone(),
                        ));
                    }
                },
                Some(parent_id) => {
                    let parent =
                        *index
                            .get(parent_id)
                            .ok_or_else(|| ManifestError::UnknownParent {
                                child: raw.identifier.clone(),
                                parent: parent_id.clone(),
                            })?;
                    nodes[aid.index()].parent = Some(parent);
                    nodes[parent.index()].children.push(aid);
                }
            }
        }
        let root = root.ok_or(ManifestError::NoRoot)?;

        for node in &nodes {
            if node.leaf && !node.children.is_empty() {
                return Err(ManifestError::LeafWithChildren(node.id.clone()));
            }
        }

        // Every node must be reachable from the root through child edges;
        // a node with a valid parent that the root cannot reach sits on a
        // parent-reference cycle.
        let mut reachable = vec![false; nodes.len()];
        let mut stack = vec![root];
        while let Some(aid) = stack.pop() {
            if reachable[aid.index()] {
                continue;
            }
            reachable[aid.index()] = true;
            stack.extend(nodes[aid.index()].children.iter().copied());
        }
        if let Some(pos) = reachable.iter().position(|r| !r) {
            return Err(ManifestError::Cycle(nodes[pos].id.clone()));
        }

        // Finalize leaf flags for nodes that left it unspecified.
        for node in &mut nodes {
            if node.children.is_empty() {
                node.leaf = true;
            }
        }

        // Attempt bookkeeping exists only for leaves, so a cluster-level
        // limit could never fire.
        for node in &nodes {
            if !node.leaf && node.limit_conditions != LimitConditions::default() {
                return Err(ManifestError::ClusterLimitConditions(node.id.clone()));
            }
        }

        Ok(Self {
            title: desc.title.clone(),
            nodes,
            root,
            index,
        })
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn root(&self) -> ActivityId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<ActivityId> {
        self.index.get(id).copied()
    }

    pub fn node(&self, aid: ActivityId) -> &ActivityNode {
        &self.nodes[aid.index()]
    }

    pub fn parent(&self, aid: ActivityId) -> Option<ActivityId> {
        self.nodes[aid.index()].parent
    }

    pub fn children(&self, aid: ActivityId) -> &[ActivityId] {
        &self.nodes[aid.index()].children
    }

    pub fn is_leaf(&self, aid: ActivityId) -> bool {
        self.nodes[aid.index()].leaf
    }

    /// Ancestor chain starting at the parent, ending at the root.
    pub fn ancestors(&self, aid: ActivityId) -> Vec<ActivityId> {
        let mut chain = Vec::new();
        let mut cur = self.parent(aid);
        while let Some(a) = cur {
            chain.push(a);
            cur = self.parent(a);
        }
        chain
    }

    /// Deepest node that is an ancestor-or-self of both arguments.
    pub fn common_ancestor(&self, a: ActivityId, b: ActivityId) -> ActivityId {
        let mut seen = vec![false; self.nodes.len()];
        let mut cur = Some(a);
        while let Some(n) = cur {
            seen[n.index()] = true;
            cur = self.parent(n);
        }
        let mut cur = Some(b);
        while let Some(n) = cur {
            if seen[n.index()] {
                return n;
            }
            cur = self.parent(n);
        }
        self.root
    }

    /// Lazy pre-order traversal of the leaves under `from` (inclusive when
    /// `from` is itself a leaf). Finite and restartable: each call returns a
    /// fresh iterator.
    pub fn pre_order_leaves(&self, from: ActivityId) -> PreOrderLeaves<'_> {
        PreOrderLeaves {
            tree: self,
            stack: vec![from],
        }
    }

    /// Content hash of the published tree, stable across round-trips.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.title.as_bytes());
        for node in &self.nodes {
            let encoded = serde_json::to_string(node).expect("node serializes");
            hasher.update(encoded.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let mut tree: ActivityTree = serde_json::from_str(json)?;
        tree.index = tree
            .nodes
            .iter()
            .enumerate()
            .map(|(pos, node)| (node.id.clone(), ActivityId(pos as u32)))
            .collect();
        Ok(tree)
    }
}

fn validate_rollup_rules(id: &str, rules: &[RollupRule]) -> Result<(), ManifestError> {
    for rule in rules {
        let coherent = match rule.aspect {
            RollupAspect::Completion => matches!(
                rule.outcome,
                RollupOutcome::Completed | RollupOutcome::Incomplete | RollupOutcome::NotAttempted
            ),
            RollupAspect::Satisfaction => matches!(
                rule.outcome,
                RollupOutcome::Passed | RollupOutcome::Failed | RollupOutcome::Unknown
            ),
        };
        if !coherent {
            return Err(ManifestError::InvalidRollupRule(id.to_string()));
        }
    }
    Ok(())
}

pub struct PreOrderLeaves<'a> {
    tree: &'a ActivityTree,
    stack: Vec<ActivityId>,
}

impl<'a> Iterator for PreOrderLeaves<'a> {
    type Item = ActivityId;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(aid) = self.stack.pop() {
            let node = self.tree.node(aid);
            if node.leaf {
                return Some(aid);
            }
            // Reverse push keeps document order on pop.
            self.stack.extend(node.children.iter().rev().copied());
        }
        None
    }
}
