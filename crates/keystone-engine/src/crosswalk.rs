//! Crosswalk graph: direct rule lookup and bounded multi-hop path
//! discovery over identifier spaces.
//!
//! The graph keeps edges in insertion order so path results are
//! deterministic. Traversal is an explicit breadth-first search with a
//! per-branch visited set; the cycle guard plus the hop ceiling bound
//! the frontier even over a cyclic rule graph.

use std::collections::HashMap;

use keystone_types::crosswalk::{Confidence, CrosswalkPath, CrosswalkRule, KeyTransform};
use keystone_types::ids::IdSpace;

/// Default hop ceiling for path discovery.
pub const DEFAULT_MAX_HOPS: u32 = 5;

/// Directed graph of identifier spaces connected by crosswalk rules.
pub struct CrosswalkGraph {
    /// All rules, insertion-ordered. Edge indices refer into this.
    rules: Vec<CrosswalkRule>,
    /// Active out-edges per space. A bidirectional rule is indexed in
    /// both directions. Values are (edge index, target space).
    edges: HashMap<IdSpace, Vec<(usize, IdSpace)>>,
}

impl CrosswalkGraph {
    /// Build a graph from rule rows. Inactive rules are kept for
    /// identity lookup but never indexed as edges.
    #[must_use]
    pub fn new(rules: Vec<CrosswalkRule>) -> Self {
        let mut edges: HashMap<IdSpace, Vec<(usize, IdSpace)>> = HashMap::new();
        for (idx, rule) in rules.iter().enumerate() {
            if !rule.active {
                continue;
            }
            edges
                .entry(rule.from_space.clone())
                .or_default()
                .push((idx, rule.to_space.clone()));
            if rule.bidirectional {
                edges
                    .entry(rule.to_space.clone())
                    .or_default()
                    .push((idx, rule.from_space.clone()));
            }
        }
        Self { rules, edges }
    }

    /// Number of rules loaded (active and inactive).
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Look up a rule by id.
    #[must_use]
    pub fn rule(&self, rule_id: &str) -> Option<&CrosswalkRule> {
        self.rules.iter().find(|r| r.rule_id.as_str() == rule_id)
    }

    /// O(edges-of-`from`) lookup of the first active one-hop edge from
    /// `from` to `to`. Absence is not an error: it signals no
    /// resolvable relationship.
    #[must_use]
    pub fn direct_rule(&self, from: &IdSpace, to: &IdSpace) -> Option<&CrosswalkRule> {
        self.edges.get(from).and_then(|outs| {
            outs.iter()
                .find(|(_, target)| target == to)
                .map(|(idx, _)| &self.rules[*idx])
        })
    }

    /// Discover every acyclic path from `from` to `to` within
    /// `max_hops`, breadth-first.
    ///
    /// Results are ordered by ascending hop count; ties break by edge
    /// insertion order, so discovery is deterministic. A branch
    /// terminates when it would revisit a space already on it.
    #[must_use]
    pub fn find_paths(&self, from: &IdSpace, to: &IdSpace, max_hops: u32) -> Vec<CrosswalkPath> {
        // One frontier entry per partial path: (current space,
        // edge indices taken, spaces on the branch).
        let mut frontier: Vec<(IdSpace, Vec<usize>, Vec<IdSpace>)> =
            vec![(from.clone(), Vec::new(), vec![from.clone()])];
        let mut found = Vec::new();

        for _hop in 0..max_hops {
            let mut next_frontier = Vec::new();
            for (space, taken, visited) in &frontier {
                let Some(outs) = self.edges.get(space) else {
                    continue;
                };
                for (idx, target) in outs {
                    if visited.contains(target) {
                        continue;
                    }
                    let mut taken = taken.clone();
                    taken.push(*idx);
                    if target == to {
                        found.push(self.materialize(from, to, &taken));
                        continue;
                    }
                    let mut visited = visited.clone();
                    visited.push(target.clone());
                    next_frontier.push((target.clone(), taken, visited));
                }
            }
            if next_frontier.is_empty() {
                break;
            }
            frontier = next_frontier;
        }
        found
    }

    /// Resolve the transform chain a rule implies, applied in order
    /// to rewrite a key from the rule's `from_space` into its
    /// `to_space`.
    ///
    /// A rule carrying its own transform is a one-edge chain. A rule
    /// without one is resolved through path discovery between its
    /// spaces within `max_hops`: the first discovered path whose every
    /// edge carries a transform wins; a bidirectional edge walked in
    /// reverse contributes its inverse (prefix rewrites invert
    /// cleanly). `None` signals no resolvable route.
    #[must_use]
    pub fn transform_route(&self, rule_id: &str, max_hops: u32) -> Option<Vec<KeyTransform>> {
        let rule = self.rule(rule_id)?;
        if let Some(transform) = &rule.transform {
            return Some(vec![transform.clone()]);
        }
        'paths: for path in self.find_paths(&rule.from_space, &rule.to_space, max_hops) {
            let mut current = rule.from_space.clone();
            let mut chain = Vec::with_capacity(path.rules.len());
            for rid in &path.rules {
                let Some(edge) = self.rule(rid.as_str()) else {
                    continue 'paths;
                };
                if edge.from_space == current {
                    let Some(transform) = &edge.transform else {
                        continue 'paths;
                    };
                    chain.push(transform.clone());
                    current = edge.to_space.clone();
                } else if edge.bidirectional && edge.to_space == current {
                    let Some(transform) = &edge.transform else {
                        continue 'paths;
                    };
                    chain.push(KeyTransform {
                        strip_prefix: transform.add_prefix.clone(),
                        add_prefix: transform.strip_prefix.clone(),
                    });
                    current = edge.from_space.clone();
                } else {
                    continue 'paths;
                }
            }
            return Some(chain);
        }
        None
    }

    fn materialize(&self, from: &IdSpace, to: &IdSpace, taken: &[usize]) -> CrosswalkPath {
        let reliability = taken
            .iter()
            .map(|idx| self.rules[*idx].confidence)
            .fold(Confidence::High, weaker);
        CrosswalkPath {
            from_space: from.clone(),
            to_space: to.clone(),
            rules: taken.iter().map(|idx| self.rules[*idx].rule_id.clone()).collect(),
            hops: taken.len() as u32,
            reliability,
        }
    }
}

/// The weaker of two confidence labels.
fn weaker(a: Confidence, b: Confidence) -> Confidence {
    use Confidence::{High, Low, Medium};
    match (a, b) {
        (Low, _) | (_, Low) => Low,
        (Medium, _) | (_, Medium) => Medium,
        (High, High) => High,
    }
}
