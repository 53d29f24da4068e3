//! Builds the include graph over a submission's parsed TeX files.
//!
//! Nodes live in a flat arena (`Vec<GraphNode>`) addressed by index, the same
//! shape the teacher uses for its document graph (`graphs/graph.rs`,
//! `graphs/builder.rs`) to avoid cyclic owning pointers — a TeX include
//! cycle (two files `\input`-ing each other) must not become a Rust `Rc`
//! cycle.

use std::collections::HashMap;

use crate::types::{NodeId, ParsedTeXFile, TeXFileIssue};

/// A small list of files that are conditionally loaded by packages and
/// legitimately go unresolved; don't warn about them.
const SUPPRESSED_UNRESOLVED_WARNINGS: &[&str] = &["svglov3.clo"];

#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: NodeId,
    pub filename: String,
    pub parsed: ParsedTeXFile,
    pub children: Vec<NodeId>,
    pub parents: Vec<NodeId>,
}

#[derive(Debug, Default)]
pub struct IncludeGraph {
    pub nodes: Vec<GraphNode>,
    name_to_id: HashMap<String, NodeId>,
    pub warnings: Vec<TeXFileIssue>,
}

impl IncludeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every parsed file as a node before wiring any edges, so
    /// includes can resolve against each other regardless of traversal
    /// order.
    pub fn add_file(&mut self, parsed: ParsedTeXFile) -> NodeId {
        let id = self.nodes.len();
        self.name_to_id.insert(parsed.filename.clone(), id);
        self.nodes.push(GraphNode { id, filename: parsed.filename.clone(), parsed, children: Vec::new(), parents: Vec::new() });
        id
    }

    pub fn node(&self, id: NodeId) -> &GraphNode {
        &self.nodes[id]
    }

    pub fn find_by_name(&self, name: &str) -> Option<NodeId> {
        self.name_to_id.get(name).copied()
    }

    /// Wire edges from every node's resolved includes to matching nodes.
    /// Unresolvable includes that aren't in the suppression list produce a
    /// warning but never abort graph construction.
    pub fn link_includes(&mut self) {
        use crate::types::IssueType;

        let mut edges: Vec<(NodeId, NodeId)> = Vec::new();
        let mut warnings = Vec::new();

        for node in &self.nodes {
            for inc in &node.parsed.includes {
                let target_name = inc.resolved.as_deref().unwrap_or(&inc.requested);
                if let Some(&target_id) = self.name_to_id.get(target_name) {
                    edges.push((node.id, target_id));
                } else if let Some(&target_id) = self.name_to_id.get(&inc.requested) {
                    edges.push((node.id, target_id));
                } else {
                    let base = std::path::Path::new(&inc.requested)
                        .file_name()
                        .and_then(|s| s.to_str())
                        .unwrap_or(&inc.requested);
                    if !SUPPRESSED_UNRESOLVED_WARNINGS.contains(&base) {
                        warnings.push(TeXFileIssue::new(
                            IssueType::FileNotFound,
                            format!("{} referenced by {} could not be resolved", inc.requested, node.filename),
                            Some(node.filename.clone()),
                        ));
                    }
                }
            }
        }

        for (from, to) in edges {
            if !self.nodes[from].children.contains(&to) {
                self.nodes[from].children.push(to);
            }
            if !self.nodes[to].parents.contains(&from) {
                self.nodes[to].parents.push(from);
            }
        }

        self.warnings = warnings;
    }

    /// Nodes with no incoming edges, excluding package/class/config files
    /// (`.sty`/`.cls`/`.clo`) which are never themselves compilation entry
    /// points even when nothing happens to include them.
    pub fn roots(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.parents.is_empty())
            .filter(|n| !is_auxiliary_extension(&n.filename))
            .map(|n| n.id)
            .collect()
    }

    /// Depth-first collection of every node reachable from `root`, `root`
    /// included. Cycle-safe via a visited set.
    pub fn reachable(&self, root: NodeId) -> Vec<NodeId> {
        let mut visited = vec![false; self.nodes.len()];
        let mut order = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if visited[id] {
                continue;
            }
            visited[id] = true;
            order.push(id);
            for &child in self.nodes[id].children.iter().rev() {
                if !visited[child] {
                    stack.push(child);
                }
            }
        }
        order
    }
}

fn is_auxiliary_extension(filename: &str) -> bool {
    let lower = filename.to_lowercase();
    lower.ends_with(".sty") || lower.ends_with(".cls") || lower.ends_with(".clo")
}
