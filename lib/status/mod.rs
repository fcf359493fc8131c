//! Progress reporting for the build loop.
//!
//! Grounded on the teacher's `src/status.rs`/`status/progressbar.rs` for
//! terminal detection and in-place status-line redraw (`term_size`,
//! `\x1b[K` line clearing), generalized here from its multi-worker
//! simulated-ETA table down to the single cooperative Builder's
//! start/finish event stream, combined with the `NINJA_STATUS` `%`-template
//! from the specification.

use crate::graph::{EdgeId, Graph};
use raw_string::{RawStr, RawString};
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::time::Instant;

/// A `NINJA_STATUS`-style status-line template names an unknown placeholder.
#[derive(Debug)]
pub struct BadStatusTemplate {
	pub placeholder: char,
}

impl std::fmt::Display for BadStatusTemplate {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "unknown placeholder %{} in NINJA_STATUS", self.placeholder)
	}
}

impl std::error::Error for BadStatusTemplate {}

const DEFAULT_TEMPLATE: &str = "[%f/%t] ";

/// Tracks build progress and renders the `NINJA_STATUS` status line.
pub struct BuildStatus {
	template: String,
	verbose: bool,
	smart_terminal: bool,
	total: usize,
	started: usize,
	finished: usize,
	build_start: Instant,
	/// Finish timestamps within the trailing window used for the "current"
	/// rate, oldest first.
	recent_finishes: VecDeque<Instant>,
	window: usize,
	console_active: bool,
}

impl BuildStatus {
	/// `parallelism` sizes the trailing window used for the current-rate
	/// smoother. Reads `NINJA_STATUS` from the environment for the
	/// status-line template, falling back to `"[%f/%t] "`.
	pub fn new(parallelism: usize, verbose: bool) -> Result<Self, BadStatusTemplate> {
		let template = std::env::var("NINJA_STATUS").unwrap_or_else(|_| DEFAULT_TEMPLATE.to_string());
		validate_template(&template)?;
		Ok(BuildStatus {
			template,
			verbose,
			smart_terminal: is_smart_terminal(),
			total: 0,
			started: 0,
			finished: 0,
			build_start: Instant::now(),
			recent_finishes: VecDeque::new(),
			window: parallelism.max(1),
			console_active: false,
		})
	}

	/// Tell the status printer how many command edges the plan wants to
	/// run, for the `%t`/`%u`/`%p` placeholders.
	pub fn plan_has_total_edges(&mut self, n: usize) {
		self.total = n;
	}

	pub fn build_started(&mut self) {
		self.build_start = Instant::now();
	}

	pub fn build_finished(&self) {
		if self.smart_terminal {
			eprintln!();
		}
	}

	pub fn edge_started(&mut self, graph: &Graph, edge: EdgeId) {
		self.started += 1;
		if graph[edge].use_console() {
			// The console job owns the terminal until it finishes; don't
			// interleave our own status line with its output.
			if self.smart_terminal {
				eprintln!();
			}
			self.console_active = true;
			return;
		}
		self.print_line(graph, edge);
	}

	/// `output` is the edge's captured, interleaved stdout+stderr (empty for
	/// console jobs, whose output already went straight to the terminal).
	pub fn edge_finished(&mut self, graph: &Graph, edge: EdgeId, success: bool, output: &RawStr) {
		self.finished += 1;
		self.recent_finishes.push_back(Instant::now());
		while self.recent_finishes.len() > self.window {
			self.recent_finishes.pop_front();
		}
		if graph[edge].use_console() {
			self.console_active = false;
		}
		if !success {
			eprintln!("FAILED: {}", graph[edge].command);
		}
		self.print_line(graph, edge);
		if !output.is_empty() {
			let shown = if self.smart_terminal { output.to_owned() } else { strip_ansi(output) };
			eprintln!("{}", shown);
		}
	}

	fn print_line(&self, graph: &Graph, edge: EdgeId) {
		if self.console_active {
			return;
		}
		let description: &RawStr = if self.verbose || graph[edge].description.is_empty() {
			graph[edge].command.as_ref()
		} else {
			graph[edge].description.as_ref()
		};
		let line = self.render(description);
		if self.smart_terminal {
			eprint!("\r{}\x1b[K", line);
		} else {
			eprintln!("{}", line);
		}
	}

	fn overall_rate(&self) -> f64 {
		let elapsed = self.build_start.elapsed().as_secs_f64();
		if elapsed <= 0.0 {
			0.0
		} else {
			self.finished as f64 / elapsed
		}
	}

	fn current_rate(&self) -> f64 {
		match (self.recent_finishes.front(), self.recent_finishes.back()) {
			(Some(first), Some(last)) if self.recent_finishes.len() > 1 => {
				let span = last.duration_since(*first).as_secs_f64();
				if span <= 0.0 {
					self.overall_rate()
				} else {
					(self.recent_finishes.len() - 1) as f64 / span
				}
			}
			_ => self.overall_rate(),
		}
	}

	fn render(&self, description: &RawStr) -> String {
		let mut out = String::new();
		let mut chars = self.template.chars();
		while let Some(c) = chars.next() {
			if c != '%' {
				out.push(c);
				continue;
			}
			match chars.next() {
				Some('s') => write!(out, "{}", self.started).unwrap(),
				Some('t') => write!(out, "{}", self.total).unwrap(),
				Some('r') => write!(out, "{}", self.started.saturating_sub(self.finished)).unwrap(),
				Some('u') => write!(out, "{}", self.total.saturating_sub(self.started)).unwrap(),
				Some('f') => write!(out, "{}", self.finished).unwrap(),
				Some('o') => write!(out, "{:.1}", self.overall_rate()).unwrap(),
				Some('c') => write!(out, "{:.1}", self.current_rate()).unwrap(),
				Some('p') => {
					let pct = if self.total == 0 {
						100.0
					} else {
						100.0 * self.finished as f64 / self.total as f64
					};
					write!(out, "{:3.0}%", pct).unwrap()
				}
				Some('e') => write!(out, "{:.3}", self.build_start.elapsed().as_secs_f64()).unwrap(),
				Some('%') => out.push('%'),
				_ => unreachable!("validated in BuildStatus::new"),
			}
		}
		write!(out, "{}", description).unwrap();
		out
	}
}

fn validate_template(template: &str) -> Result<(), BadStatusTemplate> {
	let mut chars = template.chars();
	while let Some(c) = chars.next() {
		if c == '%' {
			match chars.next() {
				Some('s') | Some('t') | Some('r') | Some('u') | Some('f') | Some('o') | Some('c') | Some('p')
				| Some('e') | Some('%') => {}
				Some(other) => return Err(BadStatusTemplate { placeholder: other }),
				None => return Err(BadStatusTemplate { placeholder: '\0' }),
			}
		}
	}
	Ok(())
}

/// Whether stderr looks like an interactive terminal, the way the teacher's
/// `status::terminal_width` detects one (via `term_size`, which returns
/// `None` when not attached to a tty).
pub fn is_smart_terminal() -> bool {
	term_size::dimensions().is_some()
}

/// Strip ANSI escape sequences (`CSI`/`\x1b[...<final byte>`) from captured
/// subprocess output, for emission to a non-smart terminal.
pub fn strip_ansi(input: &RawStr) -> RawString {
	let bytes = input.as_bytes();
	let mut out = Vec::with_capacity(bytes.len());
	let mut i = 0;
	while i < bytes.len() {
		if bytes[i] == 0x1b && bytes.get(i + 1) == Some(&b'[') {
			let mut j = i + 2;
			while j < bytes.len() && !(0x40..=0x7e).contains(&bytes[j]) {
				j += 1;
			}
			i = (j + 1).min(bytes.len());
		} else {
			out.push(bytes[i]);
			i += 1;
		}
	}
	RawString::from(out)
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn rejects_unknown_placeholder() {
		assert!(validate_template("%z").is_err());
	}

	#[test]
	fn accepts_every_documented_placeholder() {
		assert!(validate_template("%s %t %r %u %f %o %c %p %e %%").is_ok());
	}

	#[test]
	fn strips_simple_csi_sequences() {
		let input = RawStr::from_str("\x1b[31mred\x1b[0m plain");
		assert_eq!(strip_ansi(input), "red plain");
	}

	#[test]
	fn leaves_plain_text_alone() {
		let input = RawStr::from_str("no escapes here");
		assert_eq!(strip_ansi(input), "no escapes here");
	}
}
