//! Revision DAG resolver.
//!
//! Answers three questions: is the graph valid, what are its heads, and
//! which steps lead from the applied state to a target.
//!
//! Edges run from a revision to its requirements (parents and
//! `depends_on`). The applied set is always closed under requirements;
//! only its maximal elements ("tips") are stored in the bookkeeping table.
//!
//! Topological order is deterministic: among revisions that are ready,
//! those that some other revision in the walk lists in `depends_on` go
//! first, then ids in lexicographic order.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::revision::Revision;

/// Direction of a plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("upgrade"),
            Direction::Down => f.write_str("downgrade"),
        }
    }
}

/// One revision applied in one direction, with the bookkeeping tips
/// expected before it and written after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanStep {
    pub revision: String,
    pub direction: Direction,
    pub before: Vec<String>,
    pub after: Vec<String>,
}

/// Ordered list of steps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// `None` for an empty plan.
    pub fn direction(&self) -> Option<Direction> {
        self.steps.first().map(|s| s.direction)
    }

    /// Revision ids in application order.
    pub fn revisions(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.revision.as_str()).collect()
    }

    /// Tips after the last step.
    pub fn final_tips(&self) -> Option<&[String]> {
        self.steps.last().map(|s| s.after.as_slice())
    }
}

/// Where to go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The single head; fails if history has diverged.
    Head,
    /// Every head.
    Heads,
    /// Nothing applied.
    Base,
    /// An id, unique id prefix, branch label or `label@head`.
    Revision(String),
    /// `+N` / `-N` steps from the current state.
    Relative(i64),
}

impl Target {
    pub fn parse(spec: &str) -> Target {
        let spec = spec.trim();
        match spec {
            "head" => Target::Head,
            "heads" => Target::Heads,
            "base" => Target::Base,
            _ => {
                if spec.starts_with('+') || spec.starts_with('-') {
                    if let Ok(n) = spec.parse::<i64>() {
                        return Target::Relative(n);
                    }
                }
                Target::Revision(spec.to_string())
            }
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Head => f.write_str("head"),
            Target::Heads => f.write_str("heads"),
            Target::Base => f.write_str("base"),
            Target::Revision(r) => f.write_str(r),
            Target::Relative(n) => write!(f, "{:+}", n),
        }
    }
}

/// A validated revision DAG.
#[derive(Debug, Clone)]
pub struct RevisionGraph {
    revisions: BTreeMap<String, Revision>,
    /// Revisions listing the key as a parent.
    children: BTreeMap<String, BTreeSet<String>>,
    /// Revisions listing the key as a parent or dependency.
    dependents: BTreeMap<String, BTreeSet<String>>,
    /// Deterministic topological order of every revision.
    order: Vec<String>,
}

impl RevisionGraph {
    /// Build and validate the graph.
    pub fn new(revisions: Vec<Revision>) -> Result<Self> {
        let mut map: BTreeMap<String, Revision> = BTreeMap::new();
        for rev in revisions {
            if let Some(existing) = map.get(&rev.id) {
                return Err(Error::DuplicateRevisionId {
                    id: rev.id.clone(),
                    first: existing.location(),
                    second: rev.location(),
                });
            }
            map.insert(rev.id.clone(), rev);
        }

        let mut labels: BTreeMap<&str, &str> = BTreeMap::new();
        for rev in map.values() {
            let parents = rev.parent_ids();
            let distinct: BTreeSet<&String> = parents.iter().collect();
            if distinct.len() != parents.len() {
                return Err(Error::MalformedRevision {
                    location: rev.location(),
                    reason: "down_revision lists the same parent twice".into(),
                });
            }
            for label in &rev.branch_labels {
                if let Some(other) = labels.insert(label, &rev.id) {
                    return Err(Error::MalformedRevision {
                        location: rev.location(),
                        reason: format!(
                            "branch label '{}' is already used by revision '{}'",
                            label, other
                        ),
                    });
                }
            }
            for parent in parents {
                if !map.contains_key(parent) {
                    return Err(Error::DanglingParent {
                        revision: rev.id.clone(),
                        missing: parent.clone(),
                        relation: "parent",
                    });
                }
            }
            for dep in &rev.depends_on {
                if !map.contains_key(dep) {
                    return Err(Error::DanglingParent {
                        revision: rev.id.clone(),
                        missing: dep.clone(),
                        relation: "dependency",
                    });
                }
            }
        }

        let mut children: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut dependents: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for rev in map.values() {
            for parent in rev.parent_ids() {
                children
                    .entry(parent.clone())
                    .or_default()
                    .insert(rev.id.clone());
            }
            for req in rev.requirements() {
                dependents
                    .entry(req.clone())
                    .or_default()
                    .insert(rev.id.clone());
            }
        }

        let mut graph = Self {
            revisions: map,
            children,
            dependents,
            order: Vec::new(),
        };

        let all: BTreeSet<&str> = graph.revisions.keys().map(String::as_str).collect();
        let order = graph.topo_sort(&all);
        if order.len() != graph.revisions.len() {
            let placed: BTreeSet<&String> = order.iter().collect();
            let revisions = graph
                .revisions
                .keys()
                .filter(|id| !placed.contains(id))
                .cloned()
                .collect();
            return Err(Error::CyclicHistory { revisions });
        }
        graph.order = order;
        graph.check_merges()?;
        Ok(graph)
    }

    /// Merge parents must be pairwise concurrent.
    fn check_merges(&self) -> Result<()> {
        for rev in self.revisions.values().filter(|r| r.parents.is_merge()) {
            let parents = rev.parent_ids();
            for p in parents {
                for q in parents {
                    if p != q && self.ancestors(q).contains(p.as_str()) {
                        return Err(Error::RedundantMergeParent {
                            revision: rev.id.clone(),
                            ancestor: p.clone(),
                            descendant: q.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Kahn's algorithm restricted to `subset`. Returns fewer ids than
    /// `subset` holds when a cycle prevents completion.
    fn topo_sort(&self, subset: &BTreeSet<&str>) -> Vec<String> {
        let mut indegree: BTreeMap<&str, usize> = BTreeMap::new();
        let mut wanted: BTreeSet<&str> = BTreeSet::new();
        for &id in subset {
            let rev = &self.revisions[id];
            let count = rev
                .requirements()
                .filter(|r| subset.contains(r.as_str()))
                .count();
            indegree.insert(id, count);
            for dep in &rev.depends_on {
                if subset.contains(dep.as_str()) {
                    wanted.insert(dep.as_str());
                }
            }
        }

        let rank = |id: &str| if wanted.contains(id) { 0u8 } else { 1u8 };
        let mut ready: BTreeSet<(u8, &str)> = indegree
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(id, _)| (rank(id), *id))
            .collect();

        let mut order = Vec::with_capacity(subset.len());
        while let Some(next) = ready.pop_first() {
            let id = next.1;
            order.push(id.to_string());
            if let Some(deps) = self.dependents.get(id) {
                for dependent in deps {
                    if let Some(n) = indegree.get_mut(dependent.as_str()) {
                        *n -= 1;
                        if *n == 0 {
                            ready.insert((rank(dependent), dependent.as_str()));
                        }
                    }
                }
            }
        }
        order
    }

    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Revision> {
        self.revisions.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.revisions.contains_key(id)
    }

    /// All revisions in deterministic topological order (oldest first).
    pub fn ordered(&self) -> impl Iterator<Item = &Revision> {
        self.order.iter().map(|id| &self.revisions[id])
    }

    /// Revisions nothing depends on, sorted by id.
    pub fn heads(&self) -> Vec<&Revision> {
        self.revisions
            .values()
            .filter(|r| self.dependents.get(&r.id).is_none_or(|d| d.is_empty()))
            .collect()
    }

    pub fn head_ids(&self) -> Vec<String> {
        self.heads().into_iter().map(|r| r.id.clone()).collect()
    }

    /// Revisions without parents.
    pub fn bases(&self) -> Vec<&Revision> {
        self.revisions
            .values()
            .filter(|r| r.parents.is_root())
            .collect()
    }

    pub fn children(&self, id: &str) -> Vec<&str> {
        self.children
            .get(id)
            .map(|c| c.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn is_head(&self, id: &str) -> bool {
        self.dependents.get(id).is_none_or(|d| d.is_empty())
    }

    pub fn is_branchpoint(&self, id: &str) -> bool {
        self.children.get(id).is_some_and(|c| c.len() > 1)
    }

    /// `id` and everything it requires, transitively.
    pub fn ancestors(&self, id: &str) -> BTreeSet<&str> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(rev) = self.revisions.get(current) else {
                continue;
            };
            if seen.insert(rev.id.as_str()) {
                stack.extend(rev.requirements().map(String::as_str));
            }
        }
        seen
    }

    /// Union of ancestors of every id. Unknown ids are bookkeeping
    /// corruption: they can only come from the database.
    pub fn closure<S: AsRef<str>>(&self, ids: &[S]) -> Result<BTreeSet<&str>> {
        let mut set = BTreeSet::new();
        for id in ids {
            let id = id.as_ref();
            if !self.contains(id) {
                return Err(Error::BookkeepingCorrupt(format!("unknown revision '{}'", id)));
            }
            set.extend(self.ancestors(id));
        }
        Ok(set)
    }

    /// Maximal elements of an applied set, sorted.
    pub fn tips(&self, applied: &BTreeSet<&str>) -> Vec<String> {
        applied
            .iter()
            .filter(|id| {
                self.dependents
                    .get(**id)
                    .is_none_or(|d| !d.iter().any(|x| applied.contains(x.as_str())))
            })
            .map(|id| id.to_string())
            .collect()
    }

    /// Resolve an id, unique id prefix, branch label or `label@head`.
    pub fn resolve(&self, spec: &str) -> Result<&Revision> {
        if let Some(rev) = self.revisions.get(spec) {
            return Ok(rev);
        }

        if let Some(label) = spec.strip_suffix("@head") {
            let labeled = self
                .labeled(label)
                .ok_or_else(|| Error::UnknownTarget(spec.to_string()))?;
            let heads: Vec<&Revision> = self
                .heads()
                .into_iter()
                .filter(|h| self.ancestors(&h.id).contains(labeled.id.as_str()))
                .collect();
            return match heads.as_slice() {
                [one] => Ok(one),
                _ => Err(Error::AmbiguousTarget {
                    target: spec.to_string(),
                    candidates: heads.iter().map(|h| h.id.clone()).collect(),
                }),
            };
        }

        if let Some(rev) = self.labeled(spec) {
            return Ok(rev);
        }

        let matches: Vec<&Revision> = self
            .revisions
            .range(spec.to_string()..)
            .take_while(|(id, _)| id.starts_with(spec))
            .map(|(_, rev)| rev)
            .collect();
        match matches.as_slice() {
            [one] => Ok(one),
            [] => Err(Error::UnknownTarget(spec.to_string())),
            many => Err(Error::AmbiguousTarget {
                target: spec.to_string(),
                candidates: many.iter().map(|r| r.id.clone()).collect(),
            }),
        }
    }

    fn labeled(&self, label: &str) -> Option<&Revision> {
        self.revisions
            .values()
            .find(|r| r.branch_labels.contains(label))
    }

    /// The tips a non-relative target stands for.
    pub fn target_tips(&self, target: &Target) -> Result<Vec<String>> {
        match target {
            Target::Base => Ok(Vec::new()),
            Target::Heads => Ok(self.head_ids()),
            Target::Head => {
                let heads = self.head_ids();
                if heads.len() > 1 {
                    return Err(Error::DivergentHistory { heads });
                }
                Ok(heads)
            }
            Target::Revision(spec) => Ok(vec![self.resolve(spec)?.id.clone()]),
            Target::Relative(n) => Err(Error::UnknownTarget(format!("{:+}", n))),
        }
    }

    /// Plan from the current tips to `target`.
    pub fn plan_to<S: AsRef<str>>(&self, current: &[S], target: &Target) -> Result<Plan> {
        let Target::Relative(n) = *target else {
            let tips = self.target_tips(target)?;
            return self.plan(current, &tips);
        };

        let (mut plan, wanted) = if n >= 0 {
            (self.plan(current, &self.target_tips(&Target::Head)?)?, n as usize)
        } else {
            (self.plan(current, &[] as &[String])?, n.unsigned_abs() as usize)
        };
        let expected = if n >= 0 { Direction::Up } else { Direction::Down };
        if wanted == 0 {
            return Ok(Plan::default());
        }
        if plan.direction() != Some(expected) || plan.len() < wanted {
            return Err(Error::UnknownTarget(format!(
                "{:+} (only {} step(s) available)",
                n,
                if plan.direction() == Some(expected) { plan.len() } else { 0 }
            )));
        }
        plan.steps.truncate(wanted);
        Ok(plan)
    }

    /// Plan between two sets of tips.
    pub fn plan<S: AsRef<str>, T: AsRef<str>>(&self, current: &[S], target: &[T]) -> Result<Plan> {
        for id in target {
            let id: &str = id.as_ref();
            if !self.contains(id) {
                return Err(Error::UnknownTarget(id.to_string()));
            }
        }
        let from = self.closure(current)?;
        let to = self.closure(target)?;

        if from == to {
            return Ok(Plan::default());
        }

        let (direction, order) = if to.is_subset(&from) {
            let pending: BTreeSet<&str> = from.difference(&to).copied().collect();
            let mut order = self.topo_sort(&pending);
            order.reverse();
            (Direction::Down, order)
        } else if from.is_subset(&to) {
            let pending: BTreeSet<&str> = to.difference(&from).copied().collect();
            (Direction::Up, self.topo_sort(&pending))
        } else {
            let mut heads: BTreeSet<String> = self.tips(&from).into_iter().collect();
            heads.extend(self.tips(&to));
            return Err(Error::DivergentHistory {
                heads: heads.into_iter().collect(),
            });
        };

        let mut applied = from;
        let mut steps = Vec::with_capacity(order.len());
        for id in &order {
            let before = self.tips(&applied);
            let rev = &self.revisions[id];
            match direction {
                Direction::Up => applied.insert(rev.id.as_str()),
                Direction::Down => applied.remove(rev.id.as_str()),
            };
            steps.push(PlanStep {
                revision: rev.id.clone(),
                direction,
                before,
                after: self.tips(&applied),
            });
        }
        Ok(Plan { steps })
    }

    /// Revisions newest first, for display.
    pub fn history(&self) -> impl Iterator<Item = &Revision> {
        self.order.iter().rev().map(|id| &self.revisions[id])
    }
}
