//! `-t <tool>` subtools: small read-only inspectors over the manifest and
//! the on-disk logs, grounded on the teacher's (previously unwired)
//! `src/subtools` scaffolding, adapted to the `ninj` library's graph/log
//! types.

mod deps;
mod graph;
mod log;
mod rules;
mod spec;
mod targets;

use crate::options::Options;
use std::io::{Error, ErrorKind};

static SUBTOOLS: &[(&str, fn(&Options) -> Result<(), Error>)] = &[
	("targets", targets::main),
	("rules", rules::main),
	("graph", self::graph::main),
	("deps", deps::main),
	("log", log::main),
	("spec", spec::main),
	("list", list),
];

pub(super) fn run_subtool(tool: &str, options: &Options) -> Result<(), Error> {
	match SUBTOOLS.iter().find(|(name, _)| *name == tool) {
		Some((_, main)) => main(options),
		None => Err(Error::new(ErrorKind::Other, format!("unknown tool: {:?}", tool))),
	}
}

fn list(_: &Options) -> Result<(), Error> {
	println!("subtools:");
	for (name, _) in SUBTOOLS {
		println!("  {}", name);
	}
	Ok(())
}
