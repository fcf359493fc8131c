//! The dependency graph: an arena of [`Node`]s and [`Edge`]s built from a
//! [`Spec`].
//!
//! Paths are interned into [`NodeId`]s once, at graph construction time,
//! so the rest of the engine (scan, plan, runner) can work with cheap
//! `Copy` indices instead of cloning [`RawString`]s around.

use crate::mtime::Timestamp;
use crate::spec::{BuildRule, DepStyle, Spec};
use indexmap::IndexMap;
use raw_string::{RawStr, RawString};
use std::fmt;

/// An index into [`Graph::nodes`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeId(pub u32);

/// An index into [`Graph::edges`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct EdgeId(pub u32);

/// A file, known to the graph either because it's an input/output of some
/// edge, or because it was named directly on the command line.
#[derive(Debug)]
pub struct Node {
	/// The canonical path of this file.
	pub path: RawString,
	/// The edge which produces this file, if any.
	///
	/// A node has at most one producing edge.
	pub in_edge: Option<EdgeId>,
	/// The edges which use this file as an input.
	pub out_edges: Vec<EdgeId>,
	/// The modification time of the file, as of the last `stat`.
	///
	/// `None` means either "not yet stat'd" or "does not exist"; the two
	/// are distinguished by [`Node::stated`].
	pub mtime: Option<Timestamp>,
	/// Whether `mtime` reflects an actual `stat` call this build.
	pub stated: bool,
	/// Whether this node is considered out of date.
	pub dirty: bool,
}

impl Node {
	fn new(path: RawString) -> Self {
		Node {
			path,
			in_edge: None,
			out_edges: Vec::new(),
			mtime: None,
			stated: false,
			dirty: false,
		}
	}
}

/// A use of a rule: inputs, outputs, and the evaluated command to run.
#[derive(Debug)]
pub struct Edge {
	/// The name of the rule this edge came from. `"phony"` for phony edges.
	pub rule_name: String,
	/// All inputs: explicit, then implicit, then order-only.
	pub inputs: Vec<NodeId>,
	/// How many entries of `inputs` (from the front) are explicit.
	pub n_explicit_inputs: usize,
	/// How many entries of `inputs` (from the front, after the explicit
	/// ones) are implicit. The remainder are order-only.
	pub n_implicit_inputs: usize,
	/// All outputs: explicit, then implicit.
	pub outputs: Vec<NodeId>,
	/// How many entries of `outputs` (from the front) are explicit.
	pub n_explicit_outputs: usize,
	/// The shell command to run. `None` iff `is_phony`.
	pub command: RawString,
	pub description: RawString,
	pub depfile: RawString,
	pub deps: Option<DepStyle>,
	pub msvc_deps_prefix: RawString,
	pub generator: bool,
	pub restat: bool,
	pub rspfile: RawString,
	pub rspfile_content: RawString,
	/// The pool this edge runs in. Empty string means the default,
	/// unbounded pool.
	pub pool: String,
	/// The declared depth of `pool`. `None` for the default pool.
	pub pool_depth: Option<u16>,
	/// Inputs discovered by a depfile/deps-log lookup during this build.
	/// Not part of the static graph; reset at the start of every scan.
	pub extra_implicit_inputs: Vec<NodeId>,
	/// Set once every input's producing edge has reported success.
	pub outputs_ready: bool,
	/// Set if dynamic deps (depfile or deps-log) were expected but missing.
	pub deps_missing: bool,
	/// Whether `scan::recompute_dirty` has already visited this edge.
	pub scanned: bool,
}

impl Edge {
	/// Whether this is a `phony` edge (produces no subprocess).
	pub fn is_phony(&self) -> bool {
		self.rule_name == "phony"
	}

	/// Whether this edge should run attached to the console.
	pub fn use_console(&self) -> bool {
		self.pool == "console"
	}

	pub fn explicit_inputs(&self) -> &[NodeId] {
		&self.inputs[..self.n_explicit_inputs]
	}

	pub fn implicit_inputs(&self) -> &[NodeId] {
		&self.inputs[self.n_explicit_inputs..self.n_explicit_inputs + self.n_implicit_inputs]
	}

	pub fn order_only_inputs(&self) -> &[NodeId] {
		&self.inputs[self.n_explicit_inputs + self.n_implicit_inputs..]
	}

	pub fn explicit_outputs(&self) -> &[NodeId] {
		&self.outputs[..self.n_explicit_outputs]
	}

	pub fn implicit_outputs(&self) -> &[NodeId] {
		&self.outputs[self.n_explicit_outputs..]
	}

	/// All inputs whose staleness should be considered for dirty
	/// propagation: explicit, implicit, and dynamically-discovered, but
	/// *not* order-only.
	pub fn dirty_relevant_inputs(&self) -> impl Iterator<Item = &NodeId> {
		self.inputs[..self.n_explicit_inputs + self.n_implicit_inputs]
			.iter()
			.chain(self.extra_implicit_inputs.iter())
	}
}

/// The error produced when a [`Spec`] cannot be turned into a [`Graph`].
#[derive(Debug)]
pub enum GraphError {
	/// Two build rules claim to produce the same output.
	MultipleProducers { path: RawString },
}

impl fmt::Display for GraphError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			GraphError::MultipleProducers { path } => {
				write!(f, "multiple rules generate {}", path)
			}
		}
	}
}

impl std::error::Error for GraphError {}

/// The dependency graph built from a [`Spec`]: arenas of [`Node`]s and
/// [`Edge`]s, plus the path → [`NodeId`] index used to intern paths.
#[derive(Debug)]
pub struct Graph {
	pub nodes: Vec<Node>,
	pub edges: Vec<Edge>,
	path_to_id: IndexMap<RawString, NodeId>,
	/// The targets to build when none are given on the command line.
	pub default_targets: Vec<NodeId>,
	pub build_dir: Option<RawString>,
}

impl std::ops::Index<NodeId> for Graph {
	type Output = Node;
	fn index(&self, id: NodeId) -> &Node {
		&self.nodes[id.0 as usize]
	}
}

impl std::ops::IndexMut<NodeId> for Graph {
	fn index_mut(&mut self, id: NodeId) -> &mut Node {
		&mut self.nodes[id.0 as usize]
	}
}

impl std::ops::Index<EdgeId> for Graph {
	type Output = Edge;
	fn index(&self, id: EdgeId) -> &Edge {
		&self.edges[id.0 as usize]
	}
}

impl std::ops::IndexMut<EdgeId> for Graph {
	fn index_mut(&mut self, id: EdgeId) -> &mut Edge {
		&mut self.edges[id.0 as usize]
	}
}

impl Graph {
	/// Build a [`Graph`] from a parsed [`Spec`].
	pub fn from_spec(spec: &Spec) -> Result<Self, GraphError> {
		let mut graph = Graph {
			nodes: Vec::new(),
			edges: Vec::new(),
			path_to_id: IndexMap::new(),
			default_targets: Vec::new(),
			build_dir: spec.build_dir.clone(),
		};

		for rule in &spec.build_rules {
			graph.add_build_rule(rule)?;
		}

		for target in &spec.default_targets {
			graph.default_targets.push(graph.intern(target));
		}

		Ok(graph)
	}

	/// Look up or create the [`NodeId`] for `path`.
	pub fn intern(&mut self, path: &RawStr) -> NodeId {
		if let Some(&id) = self.path_to_id.get(path) {
			return id;
		}
		let id = NodeId(self.nodes.len() as u32);
		self.nodes.push(Node::new(path.to_owned()));
		self.path_to_id.insert(path.to_owned(), id);
		id
	}

	/// Look up the [`NodeId`] for `path`, if it is known to the graph.
	pub fn lookup(&self, path: &RawStr) -> Option<NodeId> {
		self.path_to_id.get(path).copied()
	}

	/// Iterate over every known path and its [`NodeId`], in the order the
	/// paths were first seen.
	pub fn iter_paths(&self) -> impl Iterator<Item = (&RawStr, NodeId)> {
		self.path_to_id.iter().map(|(p, &id)| (p.as_ref(), id))
	}

	fn add_build_rule(&mut self, rule: &BuildRule) -> Result<(), GraphError> {
		let inputs: Vec<NodeId> = rule.inputs.iter().map(|p| self.intern(p)).collect();
		let outputs: Vec<NodeId> = rule.outputs.iter().map(|p| self.intern(p)).collect();
		let order_deps: Vec<NodeId> = rule.order_deps.iter().map(|p| self.intern(p)).collect();

		let n_explicit_inputs = rule.n_explicit_inputs;
		let n_implicit_inputs = rule.inputs.len() - rule.n_explicit_inputs;

		let mut all_inputs = inputs;
		all_inputs.extend(order_deps);

		let (
			rule_name,
			command,
			description,
			depfile,
			deps,
			msvc_deps_prefix,
			generator,
			restat,
			rspfile,
			rspfile_content,
			pool,
			pool_depth,
		) = match &rule.command {
			Some(cmd) => (
				cmd.rule_name.clone(),
				cmd.command.clone(),
				cmd.description.clone(),
				cmd.depfile.clone(),
				cmd.deps,
				cmd.msvc_deps_prefix.clone(),
				cmd.generator,
				cmd.restat,
				cmd.rspfile.clone(),
				cmd.rspfile_content.clone(),
				cmd.pool.clone(),
				cmd.pool_depth,
			),
			None => (
				"phony".to_string(),
				RawString::new(),
				RawString::new(),
				RawString::new(),
				None,
				RawString::new(),
				false,
				false,
				RawString::new(),
				RawString::new(),
				String::new(),
				None,
			),
		};

		let edge_id = EdgeId(self.edges.len() as u32);
		self.edges.push(Edge {
			rule_name,
			inputs: all_inputs,
			n_explicit_inputs,
			n_implicit_inputs,
			outputs,
			n_explicit_outputs: rule.n_explicit_outputs,
			command,
			description,
			depfile,
			deps,
			msvc_deps_prefix,
			generator,
			restat,
			rspfile,
			rspfile_content,
			pool,
			pool_depth,
			extra_implicit_inputs: Vec::new(),
			outputs_ready: false,
			deps_missing: false,
			scanned: false,
		});

		for &input in &self[edge_id].inputs {
			self[input].out_edges.push(edge_id);
		}
		for i in 0..self[edge_id].outputs.len() {
			let output = self[edge_id].outputs[i];
			if let Some(existing) = self[output].in_edge {
				if existing != edge_id {
					return Err(GraphError::MultipleProducers {
						path: self[output].path.clone(),
					});
				}
			}
			self[output].in_edge = Some(edge_id);
		}

		Ok(())
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::spec::read_from;
	use std::path::Path;

	#[test]
	fn builds_a_simple_graph() {
		let spec = read_from(
			Path::new("build.ninja"),
			b"rule cc\n  command = cc -c $in -o $out\nbuild out.o: cc in.c\n",
		)
		.unwrap();
		let graph = Graph::from_spec(&spec).unwrap();
		assert_eq!(graph.nodes.len(), 2);
		assert_eq!(graph.edges.len(), 1);
		let out = graph.lookup(RawStr::from_str("out.o")).unwrap();
		let edge = graph[out].in_edge.unwrap();
		assert_eq!(graph[edge].command, "cc -c in.c -o out.o");
		assert!(!graph[edge].is_phony());
	}

	#[test]
	fn phony_edges_have_no_command() {
		let spec = read_from(Path::new("build.ninja"), b"build all: phony a b\n").unwrap();
		let graph = Graph::from_spec(&spec).unwrap();
		let all = graph.lookup(RawStr::from_str("all")).unwrap();
		let edge = graph[all].in_edge.unwrap();
		assert!(graph[edge].is_phony());
		assert_eq!(graph[edge].inputs.len(), 2);
	}

	#[test]
	fn duplicate_output_is_an_error() {
		let spec = read_from(
			Path::new("build.ninja"),
			b"rule cc\n  command = touch $out\nbuild out: cc a\nbuild out: cc b\n",
		)
		.unwrap();
		match Graph::from_spec(&spec) {
			Err(GraphError::MultipleProducers { .. }) => {}
			_ => panic!("expected MultipleProducers"),
		}
	}
}
