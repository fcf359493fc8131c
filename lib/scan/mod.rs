//! Dependency scanning: deciding which nodes and edges are out of date.
//!
//! Grounded on the teacher's (now superseded) `outdated` module (mtime
//! comparison via a [`StatCache`]-like cache) generalised from a flat
//! `BuildRule` list to the arena [`Graph`], and on
//! `RecomputeDirty`/`RecomputeOutputsDirty` from the original C++
//! `build.cc`.

use crate::buildlog::BuildLog;
use crate::deplog::DepLog;
use crate::disk::DiskInterface;
use crate::graph::{EdgeId, Graph, NodeId};
use log::debug;
use raw_string::RawString;
use std::collections::HashSet;
use std::fmt;

/// An error encountered while scanning the graph for dirty nodes.
#[derive(Debug)]
pub enum ScanError {
	/// A leaf input (no rule produces it) does not exist on disk.
	MissingInput {
		path: RawString,
		needed_by: Option<RawString>,
	},
	/// The graph contains a dependency cycle.
	Cycle { path: RawString },
	/// A `stat` call failed.
	Disk(std::io::Error),
}

impl fmt::Display for ScanError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			ScanError::MissingInput {
				path,
				needed_by: Some(dep),
			} => write!(f, "{}: {} not found, and there's no rule to make it", dep, path),
			ScanError::MissingInput { path, needed_by: None } => {
				write!(f, "{}: not found, and there's no rule to make it", path)
			}
			ScanError::Cycle { path } => write!(f, "dependency cycle involving {}", path),
			ScanError::Disk(e) => write!(f, "{}", e),
		}
	}
}

impl std::error::Error for ScanError {}

impl From<std::io::Error> for ScanError {
	fn from(e: std::io::Error) -> Self {
		ScanError::Disk(e)
	}
}

/// Recursively recompute dirty state for `target` and everything it
/// (transitively) depends on.
///
/// Idempotent: calling this again after a successful build, with the same
/// build/deps logs updated to match, marks every reachable edge clean.
pub fn recompute_dirty(
	graph: &mut Graph,
	disk: &impl DiskInterface,
	build_log: &BuildLog,
	dep_log: &DepLog,
	target: NodeId,
) -> Result<(), ScanError> {
	let mut visiting = HashSet::new();
	visit_node(graph, disk, build_log, dep_log, target, None, &mut visiting)
}

fn visit_node(
	graph: &mut Graph,
	disk: &impl DiskInterface,
	build_log: &BuildLog,
	dep_log: &DepLog,
	node: NodeId,
	needed_by: Option<&RawString>,
	visiting: &mut HashSet<NodeId>,
) -> Result<(), ScanError> {
	if graph[node].stated && graph[node].in_edge.is_none() {
		// Leaf, already stat'd: either it exists (done) or it's missing (we
		// would have errored the first time).
		return Ok(());
	}

	let in_edge = graph[node].in_edge;

	match in_edge {
		None => {
			let mtime = disk.stat(graph[node].path.as_ref())?;
			graph[node].mtime = mtime;
			graph[node].stated = true;
			if mtime.is_none() {
				graph[node].dirty = true;
				return Err(ScanError::MissingInput {
					path: graph[node].path.clone(),
					needed_by: needed_by.cloned(),
				});
			}
			Ok(())
		}
		Some(edge_id) => {
			if graph[edge_id].scanned {
				return Ok(());
			}
			if !visiting.insert(node) {
				return Err(ScanError::Cycle {
					path: graph[node].path.clone(),
				});
			}
			visit_edge(graph, disk, build_log, dep_log, edge_id, visiting)?;
			visiting.remove(&node);
			Ok(())
		}
	}
}

fn visit_edge(
	graph: &mut Graph,
	disk: &impl DiskInterface,
	build_log: &BuildLog,
	dep_log: &DepLog,
	edge_id: EdgeId,
	visiting: &mut HashSet<NodeId>,
) -> Result<(), ScanError> {
	let first_output = graph[edge_id].outputs.first().copied();
	let own_output_path = first_output.map(|n| graph[n].path.clone());

	// Visit all statically-declared inputs first.
	let inputs: Vec<NodeId> = graph[edge_id].inputs.clone();
	for input in inputs {
		visit_node(graph, disk, build_log, dep_log, input, own_output_path.as_ref(), visiting)?;
	}

	// Load dynamic deps from the deps log, for deps=gcc|msvc edges.
	if graph[edge_id].deps.is_some() {
		match first_output.and_then(|n| dep_log.get(graph[n].path.as_ref())) {
			Some(info) => {
				let extra: Vec<RawString> = info.deps().map(|p| p.to_owned()).collect();
				let extra_ids: Vec<NodeId> = extra.iter().map(|p| graph.intern(p)).collect();
				for &input in &extra_ids {
					visit_node(graph, disk, build_log, dep_log, input, own_output_path.as_ref(), visiting)?;
				}
				graph[edge_id].extra_implicit_inputs = extra_ids;
			}
			None => {
				graph[edge_id].deps_missing = true;
			}
		}
	}

	// Stat every output.
	let outputs: Vec<NodeId> = graph[edge_id].outputs.clone();
	let mut oldest_output = None;
	let mut any_output_missing = false;
	for &output in &outputs {
		let mtime = disk.stat(graph[output].path.as_ref())?;
		graph[output].mtime = mtime;
		graph[output].stated = true;
		match mtime {
			None => any_output_missing = true,
			Some(t) => {
				oldest_output = Some(oldest_output.map_or(t, |o: crate::mtime::Timestamp| o.min(t)));
			}
		}
	}

	let hash_mismatch = match own_output_path {
		Some(ref path) => {
			let recorded = build_log.command_hash(path.as_ref());
			let current = crate::buildlog::murmur_hash_64a(graph[edge_id].command.as_bytes());
			recorded.map_or(true, |r| r != current)
		}
		None => false,
	};

	let dirty_input = graph[edge_id]
		.dirty_relevant_inputs()
		.any(|&n| graph[n].dirty || oldest_output.map_or(false, |o| graph[n].mtime.map_or(true, |m| m > o)));

	let dirty = any_output_missing || hash_mismatch || dirty_input || graph[edge_id].deps_missing;

	if dirty {
		if let Some(ref path) = own_output_path {
			debug!(
				"{} is dirty (missing output: {}, hash mismatch: {}, dirty input: {}, missing deps: {})",
				path, any_output_missing, hash_mismatch, dirty_input, graph[edge_id].deps_missing
			);
		}
		for &output in &outputs {
			graph[output].dirty = true;
		}
	}

	graph[edge_id].scanned = true;
	Ok(())
}

/// Re-derive whether `edge_id`'s outputs are still dirty, using only the
/// mtimes and dirty flags already recorded in `graph` (no disk access).
///
/// Used by `Plan::clean_node` after a restat: the producing edge of one of
/// `edge_id`'s inputs just finished without changing its output's mtime, so
/// `edge_id`'s own dirtiness needs to be reconsidered without re-running its
/// command.
pub fn recheck_edge_dirty(graph: &Graph, build_log: &BuildLog, edge_id: EdgeId) -> bool {
	let edge = &graph[edge_id];
	let own_output_path = edge.outputs.first().map(|&n| graph[n].path.clone());

	let mut oldest_output = None;
	let mut any_output_missing = false;
	for &output in &edge.outputs {
		match graph[output].mtime {
			None => any_output_missing = true,
			Some(t) => {
				oldest_output = Some(oldest_output.map_or(t, |o: crate::mtime::Timestamp| o.min(t)));
			}
		}
	}

	let hash_mismatch = match own_output_path {
		Some(ref path) => {
			let recorded = build_log.command_hash(path.as_ref());
			let current = crate::buildlog::murmur_hash_64a(edge.command.as_bytes());
			recorded.map_or(true, |r| r != current)
		}
		None => false,
	};

	let dirty_input = edge
		.dirty_relevant_inputs()
		.any(|&n| graph[n].dirty || oldest_output.map_or(false, |o| graph[n].mtime.map_or(true, |m| m > o)));

	any_output_missing || hash_mismatch || dirty_input || edge.deps_missing
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::disk::MemoryDisk;
	use crate::spec::read_from;
	use raw_string::RawStr;
	use std::path::Path;

	fn setup(ninja: &[u8]) -> (Graph, MemoryDisk) {
		let spec = read_from(Path::new("build.ninja"), ninja).unwrap();
		let graph = Graph::from_spec(&spec).unwrap();
		(graph, MemoryDisk::new())
	}

	#[test]
	fn missing_leaf_input_is_an_error() {
		let (mut graph, disk) = setup(b"rule cc\n  command = touch $out\nbuild out: cc in.c\n");
		let build_log = BuildLog::new();
		let dep_log = DepLog::new();
		let out = graph.lookup(RawStr::from_str("out")).unwrap();
		match recompute_dirty(&mut graph, &disk, &build_log, &dep_log, out) {
			Err(ScanError::MissingInput { .. }) => {}
			other => panic!("expected MissingInput, got {:?}", other),
		}
	}

	#[test]
	fn missing_output_is_dirty() {
		let (mut graph, disk) = setup(b"rule cc\n  command = touch $out\nbuild out: cc in.c\n");
		disk.seed("in.c", b"int main(){}");
		let build_log = BuildLog::new();
		let dep_log = DepLog::new();
		let out = graph.lookup(RawStr::from_str("out")).unwrap();
		recompute_dirty(&mut graph, &disk, &build_log, &dep_log, out).unwrap();
		assert!(graph[out].dirty);
	}

	#[test]
	fn up_to_date_output_is_clean() {
		let (mut graph, disk) = setup(b"rule cc\n  command = touch $out\nbuild out: cc in.c\n");
		disk.seed("in.c", b"int main(){}");
		disk.seed("out", b"binary");
		let build_log = BuildLog::new();
		let dep_log = DepLog::new();
		let out = graph.lookup(RawStr::from_str("out")).unwrap();
		recompute_dirty(&mut graph, &disk, &build_log, &dep_log, out).unwrap();
		assert!(!graph[out].dirty);
	}

	#[test]
	fn stale_input_marks_output_dirty() {
		let (mut graph, disk) = setup(b"rule cc\n  command = touch $out\nbuild out: cc in.c\n");
		disk.seed("out", b"binary");
		disk.seed("in.c", b"int main(){}"); // written after "out" -> newer
		let build_log = BuildLog::new();
		let dep_log = DepLog::new();
		let out = graph.lookup(RawStr::from_str("out")).unwrap();
		recompute_dirty(&mut graph, &disk, &build_log, &dep_log, out).unwrap();
		assert!(graph[out].dirty);
	}
}
