use crate::build_dir_path;
use crate::options::Options;
use ninj::deplog::DepLogMut;
use ninj::graph::Graph;
use ninj::mtime::{mtime, Timestamp};
use raw_string::unix::RawStrExt;
use std::io::{Error, ErrorKind};

/// Dump the dependency log, restricted to paths the current manifest still
/// knows about, flagging entries whose on-disk mtime has moved past what
/// was last recorded.
pub(super) fn main(opt: &Options) -> Result<(), Error> {
	let spec = ninj::spec::read(&opt.file).map_err(|e| Error::new(ErrorKind::Other, e.to_string()))?;
	let graph = Graph::from_spec(&spec).map_err(|e| Error::new(ErrorKind::Other, e.to_string()))?;
	let dep_log = DepLogMut::open(build_dir_path(&spec).join(".ninja_deps"))?;

	for (path, deps) in dep_log.iter() {
		if graph.lookup(path).is_none() {
			continue;
		}

		let current = mtime(path.as_path()).ok().flatten();
		let recorded = deps.mtime();
		let status = match (recorded, current) {
			(Some(r), Some(c)) if c <= r => "VALID",
			_ => "STALE",
		};

		println!("{}: #deps {}, deps mtime {} ({})", path, deps.deps().len(), recorded.map_or(0, Timestamp::to_nanos), status);
		for dep in deps.deps() {
			println!("    {}", dep);
		}
		println!();
	}

	Ok(())
}
