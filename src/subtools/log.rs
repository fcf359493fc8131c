use crate::build_dir_path;
use crate::options::Options;
use ninj::buildlog::BuildLog;
use std::io::{Error, ErrorKind};

/// Dump the parsed build log.
pub(super) fn main(opt: &Options) -> Result<(), Error> {
	let spec = ninj::spec::read(&opt.file).map_err(|e| Error::new(ErrorKind::Other, e.to_string()))?;
	let build_log = BuildLog::read(build_dir_path(&spec).join(".ninja_log"))?;
	println!("{:#?}", build_log);
	Ok(())
}
