use crate::options::Options;
use std::io::{Error, ErrorKind};

/// Dump the parsed-and-resolved manifest.
pub(super) fn main(opt: &Options) -> Result<(), Error> {
	let spec = ninj::spec::read(&opt.file).map_err(|e| Error::new(ErrorKind::Other, e.to_string()))?;
	println!("{:#?}", spec);
	Ok(())
}
