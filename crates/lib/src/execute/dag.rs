//! Build graph for target dependency management.
//!
//! This module turns a flat list of [`TargetDecl`]s into a validated directed
//! acyclic graph and computes parallel execution waves.
//!
//! Edges come from three places:
//! - explicit task dependencies
//! - file dependencies that are the output of another target
//! - tree dependencies containing the output of another target

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::target::{Dependency, TargetDecl};

use super::types::ConfigError;

/// A validated graph of target declarations.
///
/// Immutable once built. Edges point from a dependency to its dependent.
#[derive(Debug)]
pub struct BuildGraph {
  /// The underlying graph.
  graph: DiGraph<TargetDecl, ()>,

  /// Map from target name to node index.
  nodes: HashMap<String, NodeIndex>,
}

impl BuildGraph {
  /// Build the graph from every declared target.
  ///
  /// # Errors
  ///
  /// - `DuplicateTarget` if two targets share a name
  /// - `DuplicateOutput` if two targets declare the same output
  /// - `DanglingDependency` if a task dependency names no target
  /// - `Cycle` if the dependencies form a cycle
  pub fn build(decls: Vec<TargetDecl>) -> Result<Self, ConfigError> {
    let mut graph = DiGraph::new();
    let mut nodes = HashMap::new();
    let mut producers: HashMap<PathBuf, NodeIndex> = HashMap::new();

    // First pass: nodes and output ownership
    for decl in decls {
      if decl.name.is_empty() {
        return Err(ConfigError::InvalidDeclaration {
          target: String::new(),
          message: "target name is empty".to_string(),
        });
      }
      if nodes.contains_key(&decl.name) {
        return Err(ConfigError::DuplicateTarget(decl.name));
      }

      let outputs = decl.outputs.clone();
      let name = decl.name.clone();
      let idx = graph.add_node(decl);

      for output in outputs {
        if let Some(&first) = producers.get(&output) {
          let first: &TargetDecl = &graph[first];
          return Err(ConfigError::DuplicateOutput {
            path: output,
            first: first.name.clone(),
            second: name,
          });
        }
        producers.insert(output, idx);
      }
      nodes.insert(name, idx);
    }

    // Second pass: edges from dependency to dependent
    let mut edges = Vec::new();
    for idx in graph.node_indices() {
      let decl = &graph[idx];
      for dep in &decl.deps {
        match dep {
          Dependency::Task(name) => {
            let &dep_idx = nodes.get(name).ok_or_else(|| ConfigError::DanglingDependency {
              target: decl.name.clone(),
              dependency: name.clone(),
            })?;
            edges.push((dep_idx, idx));
          }
          Dependency::File(path) => {
            if let Some(&dep_idx) = producers.get(path)
              && dep_idx != idx
            {
              edges.push((dep_idx, idx));
            }
          }
          Dependency::Tree(root) => {
            edges.extend(
              producers
                .iter()
                .filter(|&(output, &dep_idx)| dep_idx != idx && output.starts_with(root))
                .map(|(_, &dep_idx)| (dep_idx, idx)),
            );
          }
        }
      }
    }

    for (from, to) in edges {
      graph.update_edge(from, to, ());
    }

    let dag = Self { graph, nodes };
    dag.verify_acyclic()?;
    Ok(dag)
  }

  /// Verify that the graph is acyclic, reporting the members of every cycle.
  fn verify_acyclic(&self) -> Result<(), ConfigError> {
    let mut cyclic: BTreeSet<String> = BTreeSet::new();

    for component in tarjan_scc(&self.graph) {
      let is_cycle = component.len() > 1 || self.graph.contains_edge(component[0], component[0]);
      if is_cycle {
        cyclic.extend(component.into_iter().map(|idx| self.graph[idx].name.clone()));
      }
    }

    if cyclic.is_empty() {
      Ok(())
    } else {
      Err(ConfigError::Cycle {
        nodes: cyclic.into_iter().collect(),
      })
    }
  }

  /// Check that every file or tree dependency of the selected targets either
  /// exists or is produced by a target in the graph.
  pub fn check_sources(&self, selection: &BTreeSet<String>) -> Result<(), ConfigError> {
    for decl in self.graph.node_weights().filter(|d| selection.contains(&d.name)) {
      for dep in &decl.deps {
        let Some(path) = dep.path() else {
          continue;
        };
        if path.exists() || self.is_produced(dep, path) {
          continue;
        }
        return Err(ConfigError::MissingSource {
          target: decl.name.clone(),
          path: path.to_path_buf(),
        });
      }
    }
    Ok(())
  }

  fn is_produced(&self, dep: &Dependency, path: &Path) -> bool {
    self.graph.node_weights().any(|decl| {
      decl.outputs.iter().any(|output| match dep {
        Dependency::Tree(_) => output.starts_with(path),
        _ => output == path,
      })
    })
  }

  /// Get a target by name.
  pub fn get(&self, name: &str) -> Option<&TargetDecl> {
    self.nodes.get(name).map(|&idx| &self.graph[idx])
  }

  /// Get all target declarations, in declaration order.
  pub fn targets(&self) -> impl Iterator<Item = &TargetDecl> {
    self.graph.node_weights()
  }

  /// Get the number of targets in the graph.
  pub fn len(&self) -> usize {
    self.graph.node_count()
  }

  pub fn is_empty(&self) -> bool {
    self.graph.node_count() == 0
  }

  /// Get the direct dependencies of a target, implicit ones included.
  pub fn dependencies(&self, name: &str) -> Vec<&str> {
    self.neighbors(name, Direction::Incoming)
  }

  /// Get the targets that directly depend on a target.
  pub fn dependents(&self, name: &str) -> Vec<&str> {
    self.neighbors(name, Direction::Outgoing)
  }

  fn neighbors(&self, name: &str, direction: Direction) -> Vec<&str> {
    let Some(&idx) = self.nodes.get(name) else {
      return Vec::new();
    };

    let mut names: Vec<&str> = self
      .graph
      .neighbors_directed(idx, direction)
      .map(|n| self.graph[n].name.as_str())
      .collect();
    names.sort_unstable();
    names
  }

  /// The named targets plus everything they transitively depend on.
  ///
  /// An empty selection selects the whole graph.
  pub fn closure<S: AsRef<str>>(&self, names: &[S]) -> Result<BTreeSet<String>, ConfigError> {
    if names.is_empty() {
      return Ok(self.nodes.keys().cloned().collect());
    }

    let mut selected = HashSet::new();
    let mut stack = Vec::new();
    for name in names {
      let name = name.as_ref();
      let &idx = self
        .nodes
        .get(name)
        .ok_or_else(|| ConfigError::UnknownTarget(name.to_string()))?;
      stack.push(idx);
    }

    while let Some(idx) = stack.pop() {
      if selected.insert(idx) {
        stack.extend(self.graph.neighbors_directed(idx, Direction::Incoming));
      }
    }

    Ok(selected.into_iter().map(|idx| self.graph[idx].name.clone()).collect())
  }

  /// Get targets organized into parallel execution waves.
  ///
  /// Each wave contains targets whose dependencies are all in previous
  /// waves. Only targets in `selection` are returned; the selection must be
  /// closed under dependencies (see [`closure`](Self::closure)). Names within
  /// a wave are sorted.
  pub fn waves(&self, selection: &BTreeSet<String>) -> Vec<Vec<String>> {
    // Kahn's algorithm variant computing levels
    let mut in_degree: HashMap<NodeIndex, usize> = HashMap::new();
    for idx in self.graph.node_indices() {
      in_degree.insert(idx, self.graph.neighbors_directed(idx, Direction::Incoming).count());
    }

    let mut waves: Vec<Vec<String>> = Vec::new();
    let mut ready: Vec<NodeIndex> = self.graph.node_indices().filter(|idx| in_degree[idx] == 0).collect();

    while !ready.is_empty() {
      let mut next = Vec::new();
      let mut wave = Vec::new();

      for &idx in &ready {
        let name = &self.graph[idx].name;
        if selection.contains(name) {
          wave.push(name.clone());
        }
        for neighbor in self.graph.neighbors_directed(idx, Direction::Outgoing) {
          if let Some(deg) = in_degree.get_mut(&neighbor) {
            *deg = deg.saturating_sub(1);
            if *deg == 0 {
              next.push(neighbor);
            }
          }
        }
      }

      if !wave.is_empty() {
        wave.sort();
        waves.push(wave);
      }
      ready = next;
    }

    waves
  }

  /// All targets in a topological order.
  pub fn topological(&self) -> Vec<&TargetDecl> {
    let all: BTreeSet<String> = self.nodes.keys().cloned().collect();
    self
      .waves(&all)
      .into_iter()
      .flatten()
      .filter_map(|name| self.nodes.get(&name).map(|&idx| &self.graph[idx]))
      .collect()
  }
}
