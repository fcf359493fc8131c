//! Scanning MSVC `/showIncludes` compiler output for included-file names.
//!
//! Reconstructed from the original C++ `CLParser`/`build.cc::ExtractDeps`:
//! every line beginning with a configurable prefix (default `"Note:
//! including file:"`) names one included file; everything else is passed
//! through unchanged so it can still be shown to the user. Unlike the `gcc`
//! depfile parser, this can never fail: any line that doesn't match the
//! prefix is just residual output.

use raw_string::{RawStr, RawString};

/// The default value of `msvc_deps_prefix` when a rule doesn't set one.
pub const DEFAULT_PREFIX: &str = "Note: including file:";

/// The result of scanning MSVC compiler output for include notes.
#[derive(Debug, Clone)]
pub struct ParsedOutput {
	/// Every file named after `prefix` on its own line, trimmed,
	/// deduplicated, and canonicalized. Order of first appearance.
	pub includes: Vec<RawString>,
	/// The input with every matched "including file" line removed, so it
	/// can be relayed to the user without the noise.
	pub residual_output: RawString,
}

/// Scan `output` for lines beginning with `prefix`, extracting the included
/// file named on each and stripping those lines from the residual output.
pub fn parse(output: &RawStr, prefix: &RawStr) -> ParsedOutput {
	let mut includes = Vec::new();
	let mut seen = std::collections::HashSet::new();
	let mut residual = RawString::new();
	let mut residual_has_lines = false;

	for line in split_lines(output) {
		let trimmed_line = trim_trailing_cr(line);
		if let Some(rest) = strip_prefix(trimmed_line, prefix) {
			let mut path = trim(rest).to_owned();
			crate::spec::canonicalize_path_in_place(&mut path);
			if seen.insert(path.clone()) {
				includes.push(path);
			}
		} else {
			if residual_has_lines {
				residual.push(b'\n');
			}
			residual.push_str(line);
			residual_has_lines = true;
		}
	}

	ParsedOutput {
		includes,
		residual_output: residual,
	}
}

fn split_lines(s: &RawStr) -> impl Iterator<Item = &RawStr> {
	let mut rest = Some(s);
	std::iter::from_fn(move || {
		let s = rest?;
		match memchr::memchr(b'\n', s.as_bytes()) {
			Some(i) => {
				rest = Some(&s[i + 1..]);
				Some(&s[..i])
			}
			None => {
				rest = None;
				if s.is_empty() {
					None
				} else {
					Some(s)
				}
			}
		}
	})
}

fn trim_trailing_cr(s: &RawStr) -> &RawStr {
	if s.last() == Some(b'\r') {
		&s[..s.len() - 1]
	} else {
		s
	}
}

fn strip_prefix<'a>(line: &'a RawStr, prefix: &RawStr) -> Option<&'a RawStr> {
	if line.len() >= prefix.len() && &line[..prefix.len()] == prefix {
		Some(&line[prefix.len()..])
	} else {
		None
	}
}

fn trim(s: &RawStr) -> &RawStr {
	let bytes = s.as_bytes();
	let start = bytes.iter().position(|&b| b != b' ' && b != b'\t').unwrap_or(bytes.len());
	let end = bytes.iter().rposition(|&b| b != b' ' && b != b'\t').map_or(start, |i| i + 1);
	&s[start..end]
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn extracts_included_files() {
		let input = RawStr::from_str(
			"Note: including file: c:\\foo\\bar.h\r\nsome compiler output\nNote: including file:  baz.h\n",
		);
		let result = parse(input, RawStr::from_str(DEFAULT_PREFIX));
		assert_eq!(result.includes.len(), 2);
		assert_eq!(result.includes[1], "baz.h");
		assert_eq!(result.residual_output, "some compiler output");
	}

	#[test]
	fn deduplicates_includes() {
		let input = RawStr::from_str("Note: including file: a.h\nNote: including file: a.h\n");
		let result = parse(input, RawStr::from_str(DEFAULT_PREFIX));
		assert_eq!(result.includes.len(), 1);
	}

	#[test]
	fn passthrough_when_no_matches() {
		let input = RawStr::from_str("compiling foo.c\nok\n");
		let result = parse(input, RawStr::from_str(DEFAULT_PREFIX));
		assert!(result.includes.is_empty());
		assert_eq!(result.residual_output, "compiling foo.c\nok");
	}

	#[test]
	fn custom_prefix() {
		let input = RawStr::from_str("INCLUDE: foo.h\n");
		let result = parse(input, RawStr::from_str("INCLUDE:"));
		assert_eq!(result.includes[0], "foo.h");
	}
}
