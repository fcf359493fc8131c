//! Command-line surface, matching the invocation contract: `-j`, `-l`, `-k`,
//! `-n`, `-v`, `-d keeprsp`/`-d keepdepfile`, `-t <tool>`, `-f <file>`.
//!
//! Uses `structopt`, the teacher's own (declared but never wired up)
//! dependency choice for argument parsing.

use ninj::build::{default_parallelism, BuildConfig};
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(name = "ninj", about = "a small build system, close to the metal")]
pub struct Options {
	/// Input build file.
	#[structopt(short = "f", long = "file", parse(from_os_str), default_value = "build.ninja")]
	pub file: PathBuf,

	/// Number of parallel jobs. Defaults to `2 + number of CPUs`.
	#[structopt(short = "j", long = "jobs")]
	pub jobs: Option<usize>,

	/// Don't start new jobs once the 1-minute load average reaches this value.
	#[structopt(short = "l", long = "load-average")]
	pub max_load_average: Option<f64>,

	/// Keep going until this many jobs fail (0 means never stop).
	#[structopt(short = "k", long = "keep-going", default_value = "1")]
	pub keep_going: usize,

	/// Dry run: print what would be done, without doing it.
	#[structopt(short = "n", long = "dry-run")]
	pub dry_run: bool,

	/// Show full commands, not their descriptions.
	#[structopt(short = "v", long = "verbose")]
	pub verbose: bool,

	/// Debug flags: `keeprsp`, `keepdepfile`.
	#[structopt(short = "d", long = "debug")]
	pub debug_flags: Vec<String>,

	/// Run a subtool (`targets`, `rules`, `graph`, `deps`, `log`, `spec`, `list`)
	/// instead of building.
	#[structopt(short = "t", long = "tool")]
	pub tool: Option<String>,

	/// Targets to build. Defaults to the manifest's `default` statement(s),
	/// or every root target if there is none.
	pub targets: Vec<String>,
}

impl Options {
	pub fn keep_rsp(&self) -> bool {
		self.debug_flags.iter().any(|f| f == "keeprsp")
	}

	pub fn keep_depfile(&self) -> bool {
		self.debug_flags.iter().any(|f| f == "keepdepfile")
	}

	pub fn build_config(&self) -> BuildConfig {
		BuildConfig {
			parallelism: self.jobs.unwrap_or_else(default_parallelism),
			max_load_average: self.max_load_average,
			failures_allowed: self.keep_going,
			dry_run: self.dry_run,
			verbose: self.verbose,
			keep_rsp: self.keep_rsp(),
			keep_depfile: self.keep_depfile(),
		}
	}
}
