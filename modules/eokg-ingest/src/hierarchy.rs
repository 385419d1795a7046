//! Builds the ScienceKeyword tree from flat (term, parent) rows.
//!
//! Each keyword is identified by its full normalized path from the root, so
//! the same term under two parents yields two nodes. Rows are resolved in
//! passes: a row waits until every row that could supply its parent has
//! settled, then attaches to the single matching node. Rows that never settle
//! are part of (or hang below) a parent cycle.

use std::collections::{HashMap, HashSet};
use std::fmt;

use tracing::warn;

use eokg_common::{global_id, normalize, NormalizedKey};

use crate::sources::keywords::{KeywordRow, PATH_SEPARATOR};

#[derive(Debug, Clone, PartialEq)]
pub struct KeywordNode {
    pub global_id: String,
    /// Term as first seen in the source.
    pub name: String,
    pub name_key: String,
    /// Normalized path, root first, joined with ` > `.
    pub path: String,
    pub depth: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// The row's ancestor chain loops back on itself.
    Cycle,
    /// A bare parent name matches more than one keyword.
    AmbiguousParent(usize),
    /// The parent exists only in rows that were themselves rejected.
    UnresolvedParent,
    /// The path would be deeper than the configured limit.
    TooDeep,
    EmptyTerm,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Cycle => f.write_str("parent cycle"),
            RejectReason::AmbiguousParent(n) => write!(f, "parent matches {n} keywords"),
            RejectReason::UnresolvedParent => f.write_str("parent could not be resolved"),
            RejectReason::TooDeep => f.write_str("path exceeds depth limit"),
            RejectReason::EmptyTerm => f.write_str("empty term"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRow {
    pub offset: usize,
    pub term: String,
    pub reason: RejectReason,
}

#[derive(Debug, Default)]
pub struct Hierarchy {
    pub nodes: Vec<KeywordNode>,
    /// (parent globalId, child globalId)
    pub edges: Vec<(String, String)>,
    pub rejected: Vec<RejectedRow>,
    /// Offsets of rows whose parent never appears; they were loaded as roots.
    pub orphans: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    Pending,
    Resolved(usize),
    Rejected,
}

struct Row<'a> {
    source: &'a KeywordRow,
    term: String,
    /// Normalized parent segments; empty for roots.
    parent: Vec<String>,
}

pub struct HierarchyBuilder {
    max_depth: usize,
}

impl HierarchyBuilder {
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth: max_depth.max(1),
        }
    }

    pub fn build(&self, input: &[KeywordRow]) -> Hierarchy {
        let mut out = Hierarchy::default();
        let mut rows = Vec::with_capacity(input.len());
        for source in input {
            match normalize(&source.term) {
                NormalizedKey::Key(term) => rows.push(Row {
                    source,
                    term,
                    parent: parent_segments(source.parent.as_deref()),
                }),
                NormalizedKey::Absent => reject(&mut out, source, RejectReason::EmptyTerm),
            }
        }

        let mut producers: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, row) in rows.iter().enumerate() {
            producers.entry(row.term.clone()).or_default().push(i);
        }

        let mut state = vec![State::Pending; rows.len()];
        let mut by_path: HashMap<String, usize> = HashMap::new();
        let mut edges: HashSet<(usize, usize)> = HashSet::new();

        for (i, row) in rows.iter_mut().enumerate() {
            if row.parent.len() == 1 && row.parent[0] == row.term {
                state[i] = State::Rejected;
                reject(&mut out, row.source, RejectReason::Cycle);
            } else if let Some(last) = row.parent.last() {
                if !producers.contains_key(last.as_str()) {
                    warn!(
                        term = %row.source.term,
                        parent = ?row.source.parent,
                        offset = row.source.offset,
                        "Parent never appears; loading as root"
                    );
                    out.orphans.push(row.source.offset);
                    row.parent.clear();
                }
            }
        }

        loop {
            let mut progressed = false;
            for i in 0..rows.len() {
                if state[i] != State::Pending {
                    continue;
                }
                let row = &rows[i];

                let parent = if row.parent.is_empty() {
                    None
                } else {
                    let last = row.parent[row.parent.len() - 1].as_str();
                    let candidates = producers.get(last).map(Vec::as_slice).unwrap_or_default();
                    if candidates.iter().any(|&p| state[p] == State::Pending) {
                        continue;
                    }
                    let mut matches: Vec<usize> = candidates
                        .iter()
                        .filter_map(|&p| match state[p] {
                            State::Resolved(node) => Some(node),
                            _ => None,
                        })
                        .filter(|&node| ends_with(&out.nodes[node].path, &row.parent))
                        .collect();
                    matches.sort_unstable();
                    matches.dedup();

                    progressed = true;
                    match matches.as_slice() {
                        [node] => Some(*node),
                        [] => {
                            state[i] = State::Rejected;
                            reject(&mut out, row.source, RejectReason::UnresolvedParent);
                            continue;
                        }
                        many => {
                            state[i] = State::Rejected;
                            reject(&mut out, row.source, RejectReason::AmbiguousParent(many.len()));
                            continue;
                        }
                    }
                };

                progressed = true;
                let (path, depth) = match parent {
                    Some(p) => (
                        format!("{}{PATH_SEPARATOR}{}", out.nodes[p].path, row.term),
                        out.nodes[p].depth + 1,
                    ),
                    None => (row.term.clone(), 1),
                };
                if depth > self.max_depth {
                    state[i] = State::Rejected;
                    reject(&mut out, row.source, RejectReason::TooDeep);
                    continue;
                }

                let node = *by_path.entry(path.clone()).or_insert_with(|| {
                    out.nodes.push(KeywordNode {
                        global_id: global_id(&path),
                        name: row.source.term.trim().to_string(),
                        name_key: row.term.clone(),
                        path,
                        depth,
                    });
                    out.nodes.len() - 1
                });
                if let Some(p) = parent {
                    if edges.insert((p, node)) {
                        out.edges.push((out.nodes[p].global_id.clone(), out.nodes[node].global_id.clone()));
                    }
                }
                state[i] = State::Resolved(node);
            }
            if !progressed {
                break;
            }
        }

        for (i, row) in rows.iter().enumerate() {
            if state[i] == State::Pending {
                let reason = if self.loops_back(row, &rows, &producers, &state) {
                    RejectReason::Cycle
                } else {
                    RejectReason::UnresolvedParent
                };
                reject(&mut out, row.source, reason);
            }
        }

        out.rejected.sort_by_key(|r| r.offset);
        out
    }

    /// Follow pending parents from `row`, up to the depth limit. Returns true
    /// if the walk comes back to `row`'s own term or runs past the limit.
    fn loops_back(&self, row: &Row, rows: &[Row], producers: &HashMap<String, Vec<usize>>, state: &[State]) -> bool {
        let mut current = row;
        for _ in 0..self.max_depth {
            let Some(last) = current.parent.last() else {
                return false;
            };
            if *last == row.term {
                return true;
            }
            let next = producers
                .get(last.as_str())
                .and_then(|ps| ps.iter().find(|&&p| state[p] == State::Pending));
            match next {
                Some(&p) => current = &rows[p],
                None => return false,
            }
        }
        true
    }
}

fn reject(out: &mut Hierarchy, source: &KeywordRow, reason: RejectReason) {
    warn!(term = %source.term, offset = source.offset, %reason, "Keyword row rejected");
    out.rejected.push(RejectedRow {
        offset: source.offset,
        term: source.term.clone(),
        reason,
    });
}

fn parent_segments(parent: Option<&str>) -> Vec<String> {
    parent
        .map(|p| {
            p.split('>')
                .filter_map(|segment| match normalize(segment) {
                    NormalizedKey::Key(k) => Some(k),
                    NormalizedKey::Absent => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Normalized path for an ordered list of raw levels. Shared with dataset keyword links.
pub fn keyword_path(levels: &[String]) -> Option<String> {
    let segments: Vec<String> = levels
        .iter()
        .filter_map(|l| normalize(l).as_str().map(str::to_string))
        .collect();
    (!segments.is_empty()).then(|| segments.join(PATH_SEPARATOR))
}

fn ends_with(path: &str, suffix: &[String]) -> bool {
    let segments: Vec<&str> = path.split(PATH_SEPARATOR).collect();
    segments.len() >= suffix.len()
        && segments[segments.len() - suffix.len()..]
            .iter()
            .zip(suffix)
            .all(|(a, b)| *a == b.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(pairs: &[(&str, Option<&str>)]) -> Vec<KeywordRow> {
        pairs
            .iter()
            .enumerate()
            .map(|(i, (term, parent))| KeywordRow::new(i, term, *parent))
            .collect()
    }

    fn path_of<'a>(h: &'a Hierarchy, name: &str) -> Vec<&'a str> {
        h.nodes.iter().filter(|n| n.name == name).map(|n| n.path.as_str()).collect()
    }

    #[test]
    fn three_row_chain() {
        let h = HierarchyBuilder::new(16).build(&rows(&[("A", None), ("B", Some("A")), ("C", Some("B"))]));
        assert_eq!(h.nodes.len(), 3);
        assert_eq!(h.edges.len(), 2);
        assert!(h.rejected.is_empty());
        assert_eq!(path_of(&h, "C"), vec!["a > b > c"]);
    }

    #[test]
    fn children_before_parents_still_resolve() {
        let h = HierarchyBuilder::new(16).build(&rows(&[("C", Some("B")), ("B", Some("A")), ("A", None)]));
        assert_eq!(h.nodes.len(), 3);
        assert_eq!(h.edges.len(), 2);
        let c = h.nodes.iter().find(|n| n.name == "C").unwrap();
        assert_eq!(c.depth, 3);
        assert_eq!(c.global_id, global_id("a > b > c"));
    }

    #[test]
    fn self_parent_is_rejected() {
        let h = HierarchyBuilder::new(16).build(&rows(&[("D", Some("D"))]));
        assert!(h.nodes.is_empty());
        assert_eq!(h.rejected.len(), 1);
        assert_eq!(h.rejected[0].reason, RejectReason::Cycle);
    }

    #[test]
    fn two_node_cycle_is_rejected() {
        let h = HierarchyBuilder::new(16).build(&rows(&[("X", Some("Y")), ("Y", Some("X")), ("Z", None)]));
        assert_eq!(h.nodes.len(), 1);
        assert_eq!(h.rejected.len(), 2);
        assert!(h.rejected.iter().all(|r| r.reason == RejectReason::Cycle));
    }

    #[test]
    fn descendants_of_rejected_rows_are_reported() {
        let h = HierarchyBuilder::new(16).build(&rows(&[("D", Some("D")), ("E", Some("D"))]));
        assert!(h.nodes.is_empty());
        assert_eq!(h.rejected[1].reason, RejectReason::UnresolvedParent);
    }

    #[test]
    fn unknown_parent_becomes_root() {
        let h = HierarchyBuilder::new(16).build(&rows(&[("B", Some("Nowhere"))]));
        assert_eq!(h.nodes.len(), 1);
        assert!(h.edges.is_empty());
        assert_eq!(h.orphans, vec![0]);
        assert_eq!(h.nodes[0].path, "b");
    }

    #[test]
    fn same_term_under_two_parents_gets_two_nodes() {
        let h = HierarchyBuilder::new(16).build(&rows(&[
            ("Ocean", None),
            ("Land", None),
            ("Temperature", Some("Ocean")),
            ("Temperature", Some("Land")),
        ]));
        assert_eq!(path_of(&h, "Temperature"), vec!["ocean > temperature", "land > temperature"]);
    }

    #[test]
    fn bare_parent_name_with_two_matches_is_ambiguous() {
        let h = HierarchyBuilder::new(16).build(&rows(&[
            ("Ocean", None),
            ("Land", None),
            ("Temperature", Some("Ocean")),
            ("Temperature", Some("Land")),
            ("Anomaly", Some("Temperature")),
            ("Trend", Some("Ocean > Temperature")),
        ]));
        let anomaly = h.rejected.iter().find(|r| r.term == "Anomaly").unwrap();
        assert_eq!(anomaly.reason, RejectReason::AmbiguousParent(2));
        assert_eq!(path_of(&h, "Trend"), vec!["ocean > temperature > trend"]);
    }

    #[test]
    fn duplicate_rows_collapse() {
        let h = HierarchyBuilder::new(16).build(&rows(&[("A", None), ("B", Some("A")), ("B", Some("a"))]));
        assert_eq!(h.nodes.len(), 2);
        assert_eq!(h.edges.len(), 1);
    }

    #[test]
    fn depth_limit_rejects_long_chains() {
        let h = HierarchyBuilder::new(2).build(&rows(&[("A", None), ("B", Some("A")), ("C", Some("B"))]));
        assert_eq!(h.nodes.len(), 2);
        assert_eq!(h.rejected[0].reason, RejectReason::TooDeep);
    }

    #[test]
    fn keyword_path_matches_tree_paths() {
        let levels = vec!["ATMOSPHERE".to_string(), " Aerosols ".to_string()];
        assert_eq!(keyword_path(&levels).as_deref(), Some("atmosphere > aerosols"));
        assert_eq!(keyword_path(&[]), None);
    }
}
