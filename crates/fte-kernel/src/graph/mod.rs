//! Dependency graph
//!
//! Nodes are facts, edges run from a dependency to the fact that depends on
//! it. A graph is only ever handed out after it has been proven acyclic.

use petgraph::algo::toposort;
use petgraph::dot::{Config, Dot};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{DfsPostOrder, Reversed};
use petgraph::Direction;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::error::EngineError;
use crate::types::{FactDefinitionVersion, FactId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Edge weight: the target depends on the source
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedsInto;

impl fmt::Display for FeedsInto {
    fn fmt(&self, _f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Ok(())
    }
}

/// Acyclic graph over a set of versions
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    inner: DiGraph<FactId, FeedsInto>,
    index: BTreeMap<FactId, NodeIndex>,
}

impl DependencyGraph {
    /// Build and prove acyclic
    ///
    /// # Errors
    /// [`EngineError::UnknownDependency`] when a dependency is not among
    /// `versions`; [`EngineError::CycleDetected`] with the full cycle.
    pub fn build<'a, I>(versions: I) -> Result<Self, EngineError>
    where
        I: IntoIterator<Item = &'a FactDefinitionVersion>,
    {
        let versions: Vec<&FactDefinitionVersion> = versions.into_iter().collect();
        let mut graph = Self::default();
        for v in &versions {
            graph.node(&v.fact);
        }
        for v in &versions {
            let to = graph.index[&v.fact];
            for dep in v.dependency_ids() {
                let Some(&from) = graph.index.get(dep) else {
                    return Err(EngineError::UnknownDependency {
                        fact: v.fact.clone(),
                        dependency: dep.clone(),
                    });
                };
                graph.inner.update_edge(from, to, FeedsInto);
            }
        }
        if let Some(path) = graph.find_cycle() {
            return Err(EngineError::cycle(path));
        }
        Ok(graph)
    }

    fn node(&mut self, id: &FactId) -> NodeIndex {
        if let Some(&ix) = self.index.get(id) {
            return ix;
        }
        let ix = self.inner.add_node(id.clone());
        self.index.insert(id.clone(), ix);
        ix
    }

    fn sorted(&self, ix: NodeIndex, dir: Direction) -> Vec<NodeIndex> {
        let mut out: Vec<NodeIndex> = self.inner.neighbors_directed(ix, dir).collect();
        out.sort_by(|a, b| self.inner[*a].cmp(&self.inner[*b]));
        out.dedup();
        out
    }

    /// White/gray/black DFS along "depends on" with an explicit stack
    fn find_cycle(&self) -> Option<Vec<FactId>> {
        let mut color: HashMap<NodeIndex, Color> = HashMap::new();
        for &start in self.index.values() {
            if color.get(&start).copied().unwrap_or(Color::White) != Color::White {
                continue;
            }
            color.insert(start, Color::Gray);
            let mut stack: Vec<(NodeIndex, Vec<NodeIndex>, usize)> =
                vec![(start, self.sorted(start, Direction::Incoming), 0)];
            while let Some((node, deps, pos)) = stack.last_mut() {
                let Some(&next) = deps.get(*pos) else {
                    color.insert(*node, Color::Black);
                    stack.pop();
                    continue;
                };
                *pos += 1;
                match color.get(&next).copied().unwrap_or(Color::White) {
                    Color::White => {
                        color.insert(next, Color::Gray);
                        stack.push((next, self.sorted(next, Direction::Incoming), 0));
                    }
                    Color::Gray => {
                        let at = stack.iter().position(|(n, _, _)| *n == next).unwrap_or(0);
                        let mut path: Vec<FactId> =
                            stack[at..].iter().map(|(n, _, _)| self.inner[*n].clone()).collect();
                        path.push(self.inner[next].clone());
                        return Some(path);
                    }
                    Color::Black => {}
                }
            }
        }
        None
    }

    #[must_use]
    pub fn contains(&self, id: &FactId) -> bool {
        self.index.contains_key(id)
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.inner.node_count()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.inner.edge_count()
    }

    /// Facts in identifier order
    pub fn facts(&self) -> impl Iterator<Item = &FactId> {
        self.index.keys()
    }

    /// Direct dependencies of `id`
    #[must_use]
    pub fn dependencies(&self, id: &FactId) -> Vec<FactId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Facts that directly depend on `id`
    #[must_use]
    pub fn dependents(&self, id: &FactId) -> Vec<FactId> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &FactId, dir: Direction) -> Vec<FactId> {
        self.index.get(id).map_or_else(Vec::new, |&ix| {
            self.sorted(ix, dir)
                .into_iter()
                .map(|n| self.inner[n].clone())
                .collect()
        })
    }

    /// Dependency closure of `root`, every dependency before its dependents,
    /// `root` last
    ///
    /// The registry digests this closure into the lineage part of every
    /// instance cache key.
    ///
    /// # Errors
    /// [`EngineError::UnknownFact`] when `root` is not in the graph.
    pub fn topo_order(&self, root: &FactId) -> Result<Vec<FactId>, EngineError> {
        let &start = self
            .index
            .get(root)
            .ok_or_else(|| EngineError::UnknownFact(root.clone()))?;
        let reversed = Reversed(&self.inner);
        let mut dfs = DfsPostOrder::new(reversed, start);
        let mut order = Vec::new();
        while let Some(ix) = dfs.next(reversed) {
            order.push(self.inner[ix].clone());
        }
        Ok(order)
    }

    /// Every fact, dependencies first
    #[must_use]
    pub fn order(&self) -> Vec<FactId> {
        toposort(&self.inner, None)
            .map(|ixs| ixs.into_iter().map(|ix| self.inner[ix].clone()).collect())
            .unwrap_or_default()
    }

    /// Graphviz rendering
    #[must_use]
    pub fn to_dot(&self) -> String {
        format!("{}", Dot::with_config(&self.inner, &[Config::EdgeNoLabel]))
    }
}
