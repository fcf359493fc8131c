//! The build loop: turning a [`Plan`] into finished edges, one
//! [`CommandRunner`] round-trip at a time.
//!
//! Grounded on the teacher's `worker::Worker::run` for the overall
//! start/wait/record shape, rewritten from a per-thread pull-loop around an
//! async build queue into a single cooperative loop around a [`Plan`] and a
//! [`CommandRunner`], per the main-loop contract in the specification.

use crate::buildlog::BuildLog;
use crate::depfile::{self, msvc, DepfileError};
use crate::deplog::DepLogMut;
use crate::disk::DiskInterface;
use crate::graph::{EdgeId, Graph, NodeId};
use crate::plan::{EdgeResult, Plan, PlanError};
use crate::runner::{CommandRunner, DryRunCommandRunner, Finished, RealCommandRunner, WaitOutcome};
use crate::scan::ScanError;
use crate::spec::DepStyle;
use crate::status::{BadStatusTemplate, BuildStatus};
use log::{debug, info, warn};
use raw_string::unix::RawStrExt;
use raw_string::{RawStr, RawString};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::time::Instant;

/// Tuning knobs for a [`Builder`], threaded through instead of read from
/// globals — grounded on the original C++ `BuildConfig` and the teacher's
/// convention of passing configuration by reference.
#[derive(Debug, Clone)]
pub struct BuildConfig {
	/// Maximum number of concurrent subprocesses.
	pub parallelism: usize,
	/// Refuse to start new subprocesses once the 1-minute load average
	/// reaches this value. `None` disables the check.
	pub max_load_average: Option<f64>,
	/// Number of failures to tolerate before stopping. `0` means unlimited.
	pub failures_allowed: usize,
	/// Evaluate and report what would run, without running it.
	pub dry_run: bool,
	/// Show full commands (instead of descriptions) in status output.
	pub verbose: bool,
	/// Keep `rspfile`s after a successful edge instead of deleting them.
	pub keep_rsp: bool,
	/// Keep `depfile`s after a successful edge instead of deleting them.
	pub keep_depfile: bool,
}

impl Default for BuildConfig {
	fn default() -> Self {
		BuildConfig {
			parallelism: default_parallelism(),
			max_load_average: None,
			failures_allowed: 1,
			dry_run: false,
			verbose: false,
			keep_rsp: false,
			keep_depfile: false,
		}
	}
}

/// `2 + number of CPUs`, ninja's own heuristic default for `-j`.
pub fn default_parallelism() -> usize {
	2 + std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// Everything that can go wrong in [`Builder::build`].
#[derive(Debug)]
pub enum BuildError {
	Plan(PlanError),
	Scan(ScanError),
	Io(io::Error),
	Depfile(DepfileError),
	BadStatusTemplate(BadStatusTemplate),
	/// Every allowed failure was used up.
	SubcommandsFailed,
	/// A failure earlier in the build made the remaining work unreachable.
	StuckDueToPreviousErrors,
	/// SIGINT (or equivalent) arrived mid-build.
	Interrupted,
}

impl fmt::Display for BuildError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			BuildError::Plan(e) => write!(f, "{}", e),
			BuildError::Scan(e) => write!(f, "{}", e),
			BuildError::Io(e) => write!(f, "{}", e),
			BuildError::Depfile(e) => write!(f, "{}", e),
			BuildError::BadStatusTemplate(e) => write!(f, "{}", e),
			BuildError::SubcommandsFailed => write!(f, "subcommand(s) failed"),
			BuildError::StuckDueToPreviousErrors => {
				write!(f, "cannot make progress due to previous errors")
			}
			BuildError::Interrupted => write!(f, "interrupted by user"),
		}
	}
}

impl std::error::Error for BuildError {}

impl From<PlanError> for BuildError {
	fn from(e: PlanError) -> Self {
		BuildError::Plan(e)
	}
}
impl From<ScanError> for BuildError {
	fn from(e: ScanError) -> Self {
		BuildError::Scan(e)
	}
}
impl From<io::Error> for BuildError {
	fn from(e: io::Error) -> Self {
		BuildError::Io(e)
	}
}
impl From<DepfileError> for BuildError {
	fn from(e: DepfileError) -> Self {
		BuildError::Depfile(e)
	}
}
impl From<BadStatusTemplate> for BuildError {
	fn from(e: BadStatusTemplate) -> Self {
		BuildError::BadStatusTemplate(e)
	}
}

/// Drives a [`Plan`] to completion: starts ready edges on a [`CommandRunner`],
/// records their results, and keeps the build/deps logs up to date.
pub struct Builder<'a, D: DiskInterface> {
	graph: &'a mut Graph,
	disk: &'a D,
	build_log: &'a mut BuildLog,
	dep_log: &'a mut DepLogMut,
	config: &'a BuildConfig,
	status: BuildStatus,
	build_start: Instant,
	edge_start_times: HashMap<EdgeId, Instant>,
}

impl<'a, D: DiskInterface> Builder<'a, D> {
	pub fn new(
		graph: &'a mut Graph,
		disk: &'a D,
		build_log: &'a mut BuildLog,
		dep_log: &'a mut DepLogMut,
		config: &'a BuildConfig,
	) -> Result<Self, BuildError> {
		let status = BuildStatus::new(config.parallelism, config.verbose)?;
		Ok(Builder {
			graph,
			disk,
			build_log,
			dep_log,
			config,
			status,
			build_start: Instant::now(),
			edge_start_times: HashMap::new(),
		})
	}

	/// Run `plan` to completion.
	pub fn build(&mut self, mut plan: Plan) -> Result<(), BuildError> {
		info!("starting build of {} edge(s), parallelism {}", plan.command_edges(), self.config.parallelism);
		self.status.plan_has_total_edges(plan.command_edges());
		self.build_start = Instant::now();
		self.status.build_started();

		let mut runner: Box<dyn CommandRunner> = if self.config.dry_run {
			Box::new(DryRunCommandRunner::new())
		} else {
			Box::new(RealCommandRunner::with_load_average(
				self.config.parallelism,
				self.config.max_load_average,
			))
		};

		let orig_failures_budget = if self.config.failures_allowed == 0 {
			usize::MAX
		} else {
			self.config.failures_allowed
		};
		let mut failures_budget = orig_failures_budget;
		let mut pending = 0usize;

		loop {
			if failures_budget > 0 && runner.can_run_more() {
				if let Some(edge_id) = plan.find_work() {
					self.start_edge(&mut *runner, edge_id)?;
					if self.graph[edge_id].is_phony() {
						plan.edge_finished(self.graph, edge_id, EdgeResult::Succeeded);
					} else {
						pending += 1;
					}
					continue;
				}
			}

			if pending > 0 {
				let result = match runner.wait_for_one()? {
					WaitOutcome::Finished(f) => f,
					WaitOutcome::Interrupted => {
						let still_running = runner.active_edges();
						runner.abort();
						self.clean_up_after_interrupt(&still_running);
						return Err(BuildError::Interrupted);
					}
				};
				pending -= 1;
				let success = self.finish_command(&mut plan, result)?;
				if !success && failures_budget > 0 {
					failures_budget -= 1;
				}
				continue;
			}

			if plan.more_to_do() {
				runner.abort();
				return Err(if failures_budget == 0 {
					BuildError::SubcommandsFailed
				} else if failures_budget < orig_failures_budget {
					BuildError::StuckDueToPreviousErrors
				} else {
					unreachable!("Plan still has work but nothing is running or ready")
				});
			}

			break;
		}

		info!("build finished in {:?}", self.build_start.elapsed());
		self.status.build_finished();
		Ok(())
	}

	fn start_edge(&mut self, runner: &mut dyn CommandRunner, edge_id: EdgeId) -> Result<(), BuildError> {
		if self.graph[edge_id].is_phony() {
			return Ok(());
		}

		let outputs: Vec<NodeId> = self.graph[edge_id].outputs.clone();
		for &output in &outputs {
			self.disk.make_dirs(self.graph[output].path.as_ref())?;
		}

		let rspfile = self.graph[edge_id].rspfile.clone();
		if !rspfile.is_empty() {
			let contents = self.graph[edge_id].rspfile_content.clone();
			self.disk.write(rspfile.as_ref(), contents.as_bytes())?;
		}

		self.status.edge_started(self.graph, edge_id);
		self.edge_start_times.insert(edge_id, Instant::now());

		let command = self.graph[edge_id].command.clone();
		let use_console = self.graph[edge_id].use_console();
		debug!("starting edge {:?}: {}", edge_id, command);
		runner.start(edge_id, command.as_ref(), use_console)?;
		Ok(())
	}

	fn finish_command(&mut self, plan: &mut Plan, result: Finished) -> Result<bool, BuildError> {
		let edge_id = result.edge;
		let mut success = result.success;
		let mut recorded_deps: Option<(RawString, Vec<RawString>)> = None;
		// What to show the user: raw captured output, unless this is a
		// `deps=msvc` edge, in which case the `/showIncludes` notes are
		// stripped out first so they don't show up as noise.
		let mut display_output = result.output.clone();

		if success {
			match self.graph[edge_id].deps {
				Some(DepStyle::Gcc) => {
					let depfile_path = self.graph[edge_id].depfile.clone();
					let mut parsed = None;
					match depfile::read_deps_file(depfile_path.as_path(), |target, deps| {
						parsed = Some((target, deps));
						Ok(())
					}) {
						Ok(()) => recorded_deps = parsed,
						Err(_) => success = false,
					}
				}
				Some(DepStyle::Msvc) => {
					let prefix = if self.graph[edge_id].msvc_deps_prefix.is_empty() {
						RawStr::from_str(msvc::DEFAULT_PREFIX).to_owned()
					} else {
						self.graph[edge_id].msvc_deps_prefix.clone()
					};
					let parsed = msvc::parse(result.output.as_ref(), prefix.as_ref());
					if let Some(&output) = self.graph[edge_id].outputs.first() {
						recorded_deps = Some((self.graph[output].path.clone(), parsed.includes));
					}
					display_output = parsed.residual_output;
				}
				None => {}
			}
		}

		self.status.edge_finished(self.graph, edge_id, success, display_output.as_ref());

		if !success {
			plan.edge_finished(self.graph, edge_id, EdgeResult::Failed);
			return Ok(false);
		}

		let mut effective_mtime = None;
		if !self.config.dry_run {
			let outputs: Vec<NodeId> = self.graph[edge_id].outputs.clone();
			let restat = self.graph[edge_id].restat;
			let mut any_cleaned = false;
			for &output in &outputs {
				let previous = self.graph[output].mtime;
				let path = self.graph[output].path.clone();
				// The command just wrote this output directly, bypassing
				// `disk`, so the cache `disk.stat` populated before the
				// build (or the last time this path was stat'd) is stale:
				// drop it before re-stating.
				self.disk.forget(path.as_ref());
				let mtime = self.disk.stat(path.as_ref())?;
				self.graph[output].mtime = mtime;
				self.graph[output].stated = true;
				if restat && mtime == previous {
					any_cleaned = true;
					plan.clean_node(self.graph, self.build_log, output);
				}
			}

			effective_mtime = if any_cleaned {
				let inputs: Vec<NodeId> = self.graph[edge_id].dirty_relevant_inputs().copied().collect();
				inputs.iter().filter_map(|&n| self.graph[n].mtime).max()
			} else {
				outputs.iter().filter_map(|&n| self.graph[n].mtime).max()
			};
		}

		plan.edge_finished(self.graph, edge_id, EdgeResult::Succeeded);

		let start_time = self
			.edge_start_times
			.remove(&edge_id)
			.unwrap_or(self.build_start);
		self.build_log.add_entry(
			self.graph[edge_id].outputs.iter().map(|&n| self.graph[n].path.as_ref()),
			self.graph[edge_id].command.as_ref(),
			self.build_start,
			start_time,
			Instant::now(),
			effective_mtime,
		);

		let rspfile = self.graph[edge_id].rspfile.clone();
		if !rspfile.is_empty() && !self.config.keep_rsp {
			self.disk.remove(rspfile.as_ref())?;
		}

		if let Some((output_path, deps)) = recorded_deps {
			self.dep_log.insert_deps(output_path, effective_mtime, deps)?;
		}

		let depfile = self.graph[edge_id].depfile.clone();
		if !depfile.is_empty() && !self.config.keep_depfile {
			self.disk.remove(depfile.as_ref())?;
		}

		Ok(true)
	}

	/// After an interrupted build, clean up the outputs of edges that were
	/// still running: delete an output if its `mtime` changed since it was
	/// last stat'd (so a partially-written file isn't mistaken for a
	/// finished one), or unconditionally if the edge declares a depfile
	/// (whose own partial contents can't be trusted either). A `generator`
	/// edge's outputs are left alone unless they actually changed, since
	/// that's usually the `build.ninja` file itself.
	fn clean_up_after_interrupt(&mut self, still_running: &[EdgeId]) {
		for &edge_id in still_running {
			let has_depfile = !self.graph[edge_id].depfile.is_empty();
			let generator = self.graph[edge_id].generator;
			let outputs: Vec<NodeId> = self.graph[edge_id].outputs.clone();
			for &output in &outputs {
				let previous = self.graph[output].mtime;
				let path = self.graph[output].path.clone();
				self.disk.forget(path.as_ref());
				let current = self.disk.stat(path.as_ref()).unwrap_or(previous);
				let changed = current != previous;
				if changed || (has_depfile && !generator) {
					let _ = self.disk.remove(path.as_ref());
				}
			}
			if has_depfile {
				let depfile = self.graph[edge_id].depfile.clone();
				let _ = self.disk.remove(depfile.as_ref());
			}
		}
	}
}
