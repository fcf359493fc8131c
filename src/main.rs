mod logger;
mod options;
mod subtools;

use ninj::build::Builder;
use ninj::buildlog::BuildLog;
use ninj::deplog::DepLogMut;
use ninj::disk::RealDisk;
use ninj::graph::{Graph, NodeId};
use ninj::plan::Plan;
use ninj::scan::recompute_dirty;
use ninj::spec::{self, canonicalize_path_in_place};
use options::Options;
use raw_string::RawString;
use std::path::PathBuf;
use std::process::exit;
use structopt::StructOpt;

fn main() {
	let options = Options::from_args();

	log::set_max_level(if options.verbose {
		log::LevelFilter::Debug
	} else {
		log::LevelFilter::Info
	});
	let _ = log::set_boxed_logger(Box::new(logger::Logger));

	if let Some(tool) = options.tool.clone() {
		match subtools::run_subtool(&tool, &options) {
			Ok(()) => exit(0),
			Err(e) => {
				eprintln!("ninj: error: {}", e);
				exit(1);
			}
		}
	}

	match run_build(&options) {
		Ok(()) => exit(0),
		Err(e) => {
			eprintln!("ninj: error: {}", e);
			exit(1);
		}
	}
}

/// The directory relative to which `.ninja_log`/`.ninja_deps` are stored, as
/// set by a `builddir = ...` statement in the manifest.
pub(crate) fn build_dir_path(spec: &spec::Spec) -> PathBuf {
	use raw_string::unix::RawStrExt;
	match &spec.build_dir {
		Some(dir) => dir.as_path().to_owned(),
		None => PathBuf::from("."),
	}
}

fn run_build(options: &Options) -> Result<(), Box<dyn std::error::Error>> {
	let spec = spec::read(&options.file)?;
	let mut graph = Graph::from_spec(&spec)?;
	let dir = build_dir_path(&spec);

	let log_path = dir.join(".ninja_log");
	let mut build_log = if log_path.is_file() {
		BuildLog::read(&log_path)?
	} else {
		BuildLog::new()
	};
	let mut dep_log = DepLogMut::open(dir.join(".ninja_deps"))?;

	let target_nodes = resolve_targets(&graph, options)?;
	if target_nodes.is_empty() {
		println!("ninj: nothing to build.");
		return Ok(());
	}

	let disk = RealDisk::new();
	for &target in &target_nodes {
		recompute_dirty(&mut graph, &disk, &build_log, &dep_log, target)?;
	}

	let mut plan = Plan::new();
	for &target in &target_nodes {
		plan.add_target(&graph, target)?;
	}

	if !plan.more_to_do() {
		println!("ninj: no work to do.");
		return Ok(());
	}

	let config = options.build_config();
	let mut builder = Builder::new(&mut graph, &disk, &mut build_log, &mut dep_log, &config)?;
	builder.build(plan)?;

	build_log.write(&log_path)?;

	Ok(())
}

/// Resolve the command-line target arguments (or the manifest's `default`
/// statement(s), or every root node) into graph [`NodeId`]s.
fn resolve_targets(graph: &Graph, options: &Options) -> Result<Vec<NodeId>, Box<dyn std::error::Error>> {
	if !options.targets.is_empty() {
		let mut nodes = Vec::with_capacity(options.targets.len());
		for target in &options.targets {
			let mut path = RawString::from(target.as_str());
			canonicalize_path_in_place(&mut path);
			match graph.lookup(path.as_ref()) {
				Some(id) => nodes.push(id),
				None => return Err(format!("unknown target: {}", target).into()),
			}
		}
		return Ok(nodes);
	}

	if !graph.default_targets.is_empty() {
		return Ok(graph.default_targets.clone());
	}

	// No targets given and no `default` statement: build every node that's
	// the output of some rule, but isn't itself consumed by another rule.
	Ok(graph
		.nodes
		.iter()
		.enumerate()
		.filter(|(_, node)| node.in_edge.is_some() && node.out_edges.is_empty())
		.map(|(i, _)| NodeId(i as u32))
		.collect())
}
