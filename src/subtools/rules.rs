use crate::options::Options;
use std::collections::BTreeSet;
use std::io::{Error, ErrorKind};

/// Print the names of every rule actually used by some build statement.
///
/// Unlike the original ninja, this only lists rules that are actually used,
/// not every rule declared in the manifest.
pub(super) fn main(opt: &Options) -> Result<(), Error> {
	let spec = ninj::spec::read(&opt.file).map_err(|e| Error::new(ErrorKind::Other, e.to_string()))?;

	let mut rule_names = BTreeSet::new();
	let mut phony = false;

	for rule in &spec.build_rules {
		match &rule.command {
			Some(command) => {
				rule_names.insert(command.rule_name.clone());
			}
			None => phony = true,
		}
	}

	if phony {
		rule_names.insert("phony".to_string());
	}

	for name in rule_names {
		println!("{}", name);
	}

	Ok(())
}
