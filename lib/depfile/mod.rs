//! Parsing of dynamically-discovered dependency lists: Makefile-fragment
//! `depfile`s (as written by gcc/clang with `-M`/`-MMD`) and MSVC's
//! `/showIncludes` compiler output.
//!
//! Grounded on the teacher's `src/depfile::read_deps_file` state machine for
//! the `gcc` style; the `msvc` submodule is new, reconstructed from the
//! original C++ `CLParser`/`build.cc::ExtractDeps` (§4.3 of the
//! specification), since the distilled spec describes its contract but the
//! teacher never implemented it.

pub mod msvc;

use raw_string::{RawStr, RawString};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Error as IoError, Read};
use std::mem::replace;
use std::path::Path;

/// An error encountered while parsing a Makefile-fragment depfile.
#[derive(Debug)]
pub enum DepfileError {
	/// A rule in the depfile names more than one output.
	MultipleOutputs,
	/// The file ended in the middle of a rule.
	UnexpectedEof,
	/// The underlying file could not be read.
	Io(IoError),
}

impl fmt::Display for DepfileError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			DepfileError::MultipleOutputs => {
				write!(f, "rule in dependency file has multiple outputs")
			}
			DepfileError::UnexpectedEof => write!(f, "unexpected end of file"),
			DepfileError::Io(e) => write!(f, "{}", e),
		}
	}
}

impl std::error::Error for DepfileError {}

impl From<IoError> for DepfileError {
	fn from(e: IoError) -> Self {
		DepfileError::Io(e)
	}
}

/// The target and dependency list parsed out of a single rule in a
/// Makefile-fragment depfile.
#[derive(Debug, Clone)]
pub struct ParsedDeps {
	pub target: RawString,
	pub deps: Vec<RawString>,
}

/// Read a Makefile-style dependency file, as written by `gcc -M`/`-MMD`.
///
/// `f` is called once for every rule found in the file (ninja-generated
/// depfiles have exactly one). The first argument is the target, the
/// second is the list of dependencies.
pub fn read_deps_file(
	file_name: &Path,
	f: impl FnMut(RawString, Vec<RawString>) -> Result<(), DepfileError>,
) -> Result<(), DepfileError> {
	read_deps_file_from(File::open(file_name)?, f)
}

/// Parse the full contents of a Makefile-style dependency file in one go,
/// returning every rule found in it.
pub fn parse_deps_file(contents: &[u8]) -> Result<Vec<ParsedDeps>, DepfileError> {
	let mut rules = Vec::new();
	read_deps_file_from(contents, |target, deps| {
		rules.push(ParsedDeps { target, deps });
		Ok(())
	})?;
	Ok(rules)
}

#[derive(Default)]
struct State {
	/// The (incomplete) path we're currently reading.
	path: RawString,
	/// The target, once we've finished reading it.
	target: Option<RawString>,
	/// The rest of the paths we've finished reading.
	deps: Vec<RawString>,
}

impl State {
	fn add_part(&mut self, s: &RawStr) {
		self.path.push_str(s);
	}
	fn finish_path(&mut self) -> Result<(), DepfileError> {
		if !self.path.is_empty() {
			let mut path = replace(&mut self.path, RawString::new());
			if self.target.is_none() && path.last() == Some(b':') {
				path.pop();
				crate::spec::canonicalize_path_in_place(&mut path);
				self.target = Some(path);
			} else if self.target.is_none() {
				return Err(DepfileError::MultipleOutputs);
			} else {
				crate::spec::canonicalize_path_in_place(&mut path);
				self.deps.push(path);
			}
		}
		Ok(())
	}
	fn finish_deps(
		&mut self,
		f: &mut impl FnMut(RawString, Vec<RawString>) -> Result<(), DepfileError>,
	) -> Result<(), DepfileError> {
		self.finish_path()?;
		if let Some(target) = self.target.take() {
			f(target, replace(&mut self.deps, Vec::new()))?;
		}
		Ok(())
	}
}

fn read_deps_file_from(
	file: impl Read,
	mut f: impl FnMut(RawString, Vec<RawString>) -> Result<(), DepfileError>,
) -> Result<(), DepfileError> {
	let mut file = BufReader::new(file);

	let mut state = State::default();

	let mut line = RawString::new();

	loop {
		line.clear();
		if file.read_until(b'\n', &mut line.as_mut_bytes())? == 0 {
			break;
		}

		if line.last() == Some(b'\n') {
			line.pop();
		}

		if cfg!(windows) && line.last() == Some(b'\r') {
			line.pop();
		}

		let mut write_offset = 0;
		let mut read_offset = 0;

		loop {
			match memchr::memchr2(b' ', b'\\', line[read_offset..].as_bytes())
				.map(|i| i + read_offset)
			{
				Some(i) if line[i] == b'\\' && i + 1 == line.len() => {
					// Backslash at the end of the line: continuation.
					state.add_part(&line[write_offset..i]);
					state.finish_path()?;
					break;
				}
				Some(i) if line[i] == b'\\' => {
					// Backslash before character.
					let c = line[i + 1];
					match c {
						b' ' | b'\\' | b'#' | b'*' | b'[' | b']' | b'|' => {
							// Escaped character. Drop the '\'.
							state.add_part(&line[write_offset..i]);
							write_offset = i + 1;
						}
						_ => (), // Keep the '\'.
					}
					read_offset = i + 2;
				}
				Some(i) => {
					// A space.
					debug_assert_eq!(line[i], b' ');
					state.add_part(&line[write_offset..i]);
					state.finish_path()?;
					write_offset = i + 1;
					read_offset = i + 1;
				}
				None => {
					// End of the line.
					state.add_part(&line[write_offset..]);
					state.finish_deps(&mut f)?;
					break;
				}
			}
		}
	}

	if state.target.is_none() {
		Ok(())
	} else {
		Err(DepfileError::UnexpectedEof)
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use std::io::Cursor;

	fn check(input: &str, mut expected: &[(&str, &[&str])]) {
		let file = Cursor::new(input);
		read_deps_file_from(file, |target, deps| {
			assert_eq!(target, expected[0].0);
			assert!(deps.iter().eq(expected[0].1.iter()));
			expected = &expected[1..];
			Ok(())
		})
		.unwrap();
		assert!(expected.is_empty());
	}

	#[test]
	fn simple() {
		check(
			r#"
output: input input2 input3 \
 input4 input5 \
 input6

output2: input7

output3: input8 \

"#,
			&[
				(
					"output",
					&["input", "input2", "input3", "input4", "input5", "input6"],
				),
				("output2", &["input7"]),
				("output3", &["input8"]),
			],
		);
	}

	#[test]
	fn escapes() {
		check(
			r#"
bloep\ bloep: a\ b\*c\\d\ab"#,
			&[("bloep bloep", &["a b*c\\d\\ab"])],
		);
	}

	#[test]
	fn colons() {
		check(
			r#"
output: in:put in:put:2:"#,
			&[("output", &["in:put", "in:put:2:"])],
		);
	}

	#[test]
	fn no_deps() {
		check(
			r#"
hello:
world:

test: \

test2:"#,
			&[
				("hello", &[]),
				("world", &[]),
				("test", &[]),
				("test2", &[]),
			],
		);
	}

	#[test]
	fn truncated() {
		let file = Cursor::new(
			r#"
output: input input2 input3 \
 input4 input5 \"#,
		);
		assert!(parse_deps_file(file.get_ref()).is_err());
	}

	#[test]
	fn multiple_outputs() {
		let file = Cursor::new(
			r#"
output output2: input input2 input3 \
 input4 input5 \"#,
		);
		assert!(parse_deps_file(file.get_ref()).is_err());
	}
}
