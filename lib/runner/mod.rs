//! Running the shell commands for edges.
//!
//! Grounded on the teacher's `worker::subprocess::listen_to_child`
//! poll-based pipe multiplexer, generalized here from one child at a time to
//! many: [`RealCommandRunner`] polls every running child's stdout/stderr
//! pipes together, so up to `-j` commands can be in flight and have their
//! output collected concurrently. The poll set also carries a self-pipe
//! written from a SIGINT handler, so a console-attached build can be woken
//! out of `wait_for_one` the moment the user hits Ctrl-C.

use crate::graph::EdgeId;
use log::warn;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::poll::{poll, EventFlags, PollFd};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::pipe;
use raw_string::unix::RawStrExt;
use raw_string::{RawStr, RawString};
use std::fs::File;
use std::io::{Read, Result as IoResult};
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Once;

/// Set by [`handle_interrupt`], cleared by whichever `wait_for_one` call
/// next observes it.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);
static SIGNAL_WRITE_FD: AtomicI32 = AtomicI32::new(-1);
static SIGNAL_READ_FD: AtomicI32 = AtomicI32::new(-1);
static INSTALL_HANDLER: Once = Once::new();

extern "C" fn handle_interrupt(_signum: i32) {
	INTERRUPTED.store(true, Ordering::SeqCst);
	let fd = SIGNAL_WRITE_FD.load(Ordering::SeqCst);
	if fd >= 0 {
		let _ = nix::unistd::write(fd, &[0u8]);
	}
}

/// Installs (once per process) a `SIGINT` handler that wakes up
/// [`RealCommandRunner::wait_for_one`]'s poll loop via a self-pipe, and
/// returns the read end of that pipe.
fn ensure_sigint_handler() -> RawFd {
	INSTALL_HANDLER.call_once(|| {
		let (read_fd, write_fd) = pipe().expect("failed to create signal self-pipe");
		fcntl(write_fd, FcntlArg::F_SETFL(OFlag::O_NONBLOCK)).expect("failed to configure signal self-pipe");
		SIGNAL_READ_FD.store(read_fd, Ordering::SeqCst);
		SIGNAL_WRITE_FD.store(write_fd, Ordering::SeqCst);
		let action = SigAction::new(SigHandler::Handler(handle_interrupt), SaFlags::empty(), SigSet::empty());
		unsafe { sigaction(Signal::SIGINT, &action) }.expect("failed to install SIGINT handler");
	});
	SIGNAL_READ_FD.load(Ordering::SeqCst)
}

fn drain_signal_pipe(fd: RawFd) {
	let mut buf = [0u8; 64];
	loop {
		match nix::unistd::read(fd, &mut buf) {
			Ok(n) if n > 0 => continue,
			_ => break,
		}
	}
}

/// What [`CommandRunner::wait_for_one`] observed.
pub enum WaitOutcome {
	/// A started command finished running.
	Finished(Finished),
	/// A `SIGINT` (or equivalent) arrived before any command finished.
	Interrupted,
}

/// A finished (or failed-to-run) command, as reported by
/// [`CommandRunner::wait_for_one`].
pub struct Finished {
	pub edge: EdgeId,
	pub success: bool,
	/// Captured, interleaved stdout+stderr. Empty for console jobs, whose
	/// output went straight to the terminal.
	pub output: RawString,
}

/// Something that can run edge commands, for real or not.
pub trait CommandRunner {
	/// Whether another command could be started right now (purely a
	/// capacity check; doesn't look at pools).
	fn can_run_more(&self) -> bool;

	/// Start running `command` for `edge`. If `use_console` is set, the
	/// child inherits this process's stdio instead of having it captured,
	/// and the caller must ensure no other command runs concurrently with
	/// it.
	fn start(&mut self, edge: EdgeId, command: &RawStr, use_console: bool) -> IoResult<()>;

	/// Block until at least one started command finishes, or an interrupt
	/// signal arrives.
	///
	/// Panics if no command is currently running.
	fn wait_for_one(&mut self) -> IoResult<WaitOutcome>;

	/// The edges currently running.
	fn active_edges(&self) -> Vec<EdgeId>;

	/// Whether there's no command currently running.
	fn is_empty(&self) -> bool {
		self.active_edges().is_empty()
	}

	/// Kill every currently-running command, without waiting for their
	/// output.
	fn abort(&mut self);
}

struct ActiveChild {
	edge: EdgeId,
	child: Child,
	stdout: Option<File>,
	stderr: Option<File>,
	buffer: Vec<u8>,
	console: bool,
}

/// Runs commands as real subprocesses, capturing and multiplexing the
/// output of every concurrently-running one.
pub struct RealCommandRunner {
	max_jobs: usize,
	max_load_average: Option<f64>,
	children: Vec<ActiveChild>,
	signal_read_fd: RawFd,
}

impl RealCommandRunner {
	pub fn new(max_jobs: usize) -> Self {
		Self::with_load_average(max_jobs, None)
	}

	/// Like [`RealCommandRunner::new`], but also refuses to start another
	/// command while at least one is already running and the 1-minute load
	/// average is at or above `max_load_average` (a `Some(n)` where `n <= 0`
	/// disables the check, matching `-l`'s "any non-positive value means no
	/// limit" contract).
	pub fn with_load_average(max_jobs: usize, max_load_average: Option<f64>) -> Self {
		RealCommandRunner {
			max_jobs: max_jobs.max(1),
			max_load_average,
			children: Vec::new(),
			signal_read_fd: ensure_sigint_handler(),
		}
	}

	fn take_interrupt(&self) -> bool {
		if INTERRUPTED.swap(false, Ordering::SeqCst) {
			drain_signal_pipe(self.signal_read_fd);
			true
		} else {
			false
		}
	}
}

impl CommandRunner for RealCommandRunner {
	fn can_run_more(&self) -> bool {
		if self.children.len() >= self.max_jobs {
			return false;
		}
		match self.max_load_average {
			Some(limit) if limit > 0.0 && !self.children.is_empty() => load_average() < limit,
			_ => true,
		}
	}

	fn start(&mut self, edge: EdgeId, command: &RawStr, use_console: bool) -> IoResult<()> {
		let mut cmd = Command::new("/bin/sh");
		cmd.arg("-c").arg(command.as_osstr()).stdin(Stdio::null());
		if use_console {
			cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
		} else {
			cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
		}
		let mut child = cmd.spawn()?;
		let stdout = if use_console {
			None
		} else {
			child.stdout.take().map(|f| unsafe { into_file(f) })
		};
		let stderr = if use_console {
			None
		} else {
			child.stderr.take().map(|f| unsafe { into_file(f) })
		};
		self.children.push(ActiveChild {
			edge,
			child,
			stdout,
			stderr,
			buffer: Vec::new(),
			console: use_console,
		});
		Ok(())
	}

	fn wait_for_one(&mut self) -> IoResult<WaitOutcome> {
		assert!(!self.children.is_empty(), "wait_for_one with nothing running");

		if self.take_interrupt() {
			return Ok(WaitOutcome::Interrupted);
		}

		// Console jobs have no pipes to poll; just wait for them directly.
		// The only invariant we rely on (enforced by the console pool's
		// depth of 1) is that a console job never runs alongside others.
		if let Some(i) = self.children.iter().position(|c| c.console) {
			let active = self.children.remove(i);
			let ActiveChild { edge, mut child, .. } = active;
			let status = child.wait()?;
			if self.take_interrupt() {
				return Ok(WaitOutcome::Interrupted);
			}
			return Ok(WaitOutcome::Finished(Finished {
				edge,
				success: status.success(),
				output: RawString::new(),
			}));
		}

		loop {
			let mut poll_fds = Vec::with_capacity(self.children.len() * 2 + 1);
			poll_fds.push(PollFd::new(self.signal_read_fd, EventFlags::POLLIN));
			// (child index, is_stderr)
			let mut fd_owners = Vec::with_capacity(poll_fds.capacity());
			for (i, c) in self.children.iter().enumerate() {
				if let Some(f) = &c.stdout {
					poll_fds.push(PollFd::new(f.as_raw_fd(), EventFlags::POLLIN));
					fd_owners.push((i, false));
				}
				if let Some(f) = &c.stderr {
					poll_fds.push(PollFd::new(f.as_raw_fd(), EventFlags::POLLIN));
					fd_owners.push((i, true));
				}
			}

			if fd_owners.is_empty() {
				// Every remaining child has both pipes closed; just reap
				// the first one.
				let active = self.children.remove(0);
				let ActiveChild {
					edge, mut child, buffer, ..
				} = active;
				let status = child.wait()?;
				if self.take_interrupt() {
					return Ok(WaitOutcome::Interrupted);
				}
				return Ok(WaitOutcome::Finished(Finished {
					edge,
					success: status.success(),
					output: RawString::from(buffer),
				}));
			}

			poll(&mut poll_fds, -1).map_err(|e| e.as_errno().unwrap())?;

			if poll_fds[0].revents().map_or(false, |r| r.contains(EventFlags::POLLIN)) {
				drain_signal_pipe(self.signal_read_fd);
				INTERRUPTED.store(false, Ordering::SeqCst);
				return Ok(WaitOutcome::Interrupted);
			}

			let mut finished = None;
			for (slot, &(child_index, is_stderr)) in fd_owners.iter().enumerate() {
				let revents = match poll_fds[slot + 1].revents() {
					Some(r) => r,
					None => continue,
				};
				if revents.contains(EventFlags::POLLIN) {
					let c = &mut self.children[child_index];
					let fd = if is_stderr { &mut c.stderr } else { &mut c.stdout };
					if let Some(f) = fd {
						let mut chunk = [0u8; 4096];
						let n = f.read(&mut chunk).unwrap_or(0);
						c.buffer.extend_from_slice(&chunk[..n]);
					}
				}
				if revents.intersects(EventFlags::POLLERR | EventFlags::POLLHUP) {
					let c = &mut self.children[child_index];
					if is_stderr {
						c.stderr = None;
					} else {
						c.stdout = None;
					}
				}
			}

			for (i, c) in self.children.iter().enumerate() {
				if c.stdout.is_none() && c.stderr.is_none() {
					finished = Some(i);
					break;
				}
			}

			if let Some(i) = finished {
				let active = self.children.remove(i);
				let ActiveChild {
					edge, mut child, buffer, ..
				} = active;
				let status = child.wait()?;
				if self.take_interrupt() {
					return Ok(WaitOutcome::Interrupted);
				}
				return Ok(WaitOutcome::Finished(Finished {
					edge,
					success: status.success(),
					output: RawString::from(buffer),
				}));
			}
		}
	}

	fn active_edges(&self) -> Vec<EdgeId> {
		self.children.iter().map(|c| c.edge).collect()
	}

	fn abort(&mut self) {
		if !self.children.is_empty() {
			warn!("killing {} still-running subprocess(es)", self.children.len());
		}
		for c in &mut self.children {
			let _ = c.child.kill();
			let _ = c.child.wait();
		}
		self.children.clear();
	}
}

unsafe fn into_file(stream: impl IntoRawFd) -> File {
	File::from_raw_fd(stream.into_raw_fd())
}

/// The 1-minute load average, or `0.0` if the platform can't report one.
fn load_average() -> f64 {
	let mut loadavg = [0.0f64; 1];
	let n = unsafe { libc::getloadavg(loadavg.as_mut_ptr(), 1) };
	if n == 1 {
		loadavg[0]
	} else {
		0.0
	}
}

/// Runs nothing: used for `-n`/`--dry-run`. Every started command is
/// reported as an immediate, silent success, in the order it was started.
pub struct DryRunCommandRunner {
	pending: std::collections::VecDeque<EdgeId>,
}

impl DryRunCommandRunner {
	pub fn new() -> Self {
		DryRunCommandRunner {
			pending: std::collections::VecDeque::new(),
		}
	}
}

impl CommandRunner for DryRunCommandRunner {
	fn can_run_more(&self) -> bool {
		true
	}

	fn start(&mut self, edge: EdgeId, _command: &RawStr, _use_console: bool) -> IoResult<()> {
		self.pending.push_back(edge);
		Ok(())
	}

	fn wait_for_one(&mut self) -> IoResult<WaitOutcome> {
		if INTERRUPTED.swap(false, Ordering::SeqCst) {
			let fd = SIGNAL_READ_FD.load(Ordering::SeqCst);
			if fd >= 0 {
				drain_signal_pipe(fd);
			}
			return Ok(WaitOutcome::Interrupted);
		}
		let edge = self.pending.pop_front().expect("wait_for_one with nothing running");
		Ok(WaitOutcome::Finished(Finished {
			edge,
			success: true,
			output: RawString::new(),
		}))
	}

	fn active_edges(&self) -> Vec<EdgeId> {
		self.pending.iter().copied().collect()
	}

	fn abort(&mut self) {
		self.pending.clear();
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn dry_run_echoes_started_edges_in_order() {
		let mut runner = DryRunCommandRunner::new();
		runner.start(EdgeId(0), RawStr::from_str("true"), false).unwrap();
		runner.start(EdgeId(1), RawStr::from_str("true"), false).unwrap();
		assert_eq!(runner.active_edges(), vec![EdgeId(0), EdgeId(1)]);
		let first = match runner.wait_for_one().unwrap() {
			WaitOutcome::Finished(f) => f,
			WaitOutcome::Interrupted => panic!("unexpected interrupt"),
		};
		assert_eq!(first.edge, EdgeId(0));
		assert!(first.success);
		let second = match runner.wait_for_one().unwrap() {
			WaitOutcome::Finished(f) => f,
			WaitOutcome::Interrupted => panic!("unexpected interrupt"),
		};
		assert_eq!(second.edge, EdgeId(1));
	}

	#[test]
	fn dry_run_can_always_run_more() {
		let runner = DryRunCommandRunner::new();
		assert!(runner.can_run_more());
	}
}
