use crate::options::Options;
use std::io::{Error, ErrorKind};

/// Print `output: rule` for every build statement in the manifest.
pub(super) fn main(opt: &Options) -> Result<(), Error> {
	let spec = ninj::spec::read(&opt.file).map_err(|e| Error::new(ErrorKind::Other, e.to_string()))?;
	for rule in &spec.build_rules {
		let rule_name = rule.command.as_ref().map_or("phony", |c| c.rule_name.as_str());
		for output in &rule.outputs {
			println!("{}: {}", output, rule_name);
		}
	}
	Ok(())
}
