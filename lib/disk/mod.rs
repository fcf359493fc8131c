//! Abstracts the filesystem operations the engine needs, so tests can run
//! against an in-memory filesystem instead of the real one.

use crate::mtime::{mtime, Timestamp};
use raw_string::{RawStr, RawString};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io::{Error, ErrorKind};
use std::path::{Path, PathBuf};

/// The result of trying to read a file.
#[derive(Debug)]
pub enum ReadFileError {
	/// The file does not exist.
	NotFound,
	/// Some other I/O error occurred.
	OtherError(Error),
}

impl From<Error> for ReadFileError {
	fn from(e: Error) -> Self {
		if e.kind() == ErrorKind::NotFound {
			ReadFileError::NotFound
		} else {
			ReadFileError::OtherError(e)
		}
	}
}

/// Everything the engine needs from a filesystem.
///
/// `RealDisk` talks to the actual filesystem; `MemoryDisk` is an in-memory
/// stand-in used by engine-level tests.
///
/// Implementations are expected to cache `stat` results for the duration of
/// a single build; [`RealDisk`] does so via a [`StatCache`][crate::mtime::StatCache].
/// A subprocess writes its outputs directly, without going through this
/// trait, so callers that need to observe a fresh mtime after running a
/// command (the dirty scan never does; the Builder always does, right
/// after a command finishes) must [`forget`][DiskInterface::forget] the
/// path first to bypass that cache.
pub trait DiskInterface {
	/// The modification time of `path`, or `None` if it does not exist.
	fn stat(&self, path: &RawStr) -> Result<Option<Timestamp>, Error>;
	/// Read the full contents of `path`.
	fn read(&self, path: &RawStr) -> Result<Vec<u8>, ReadFileError>;
	/// Overwrite (or create) `path` with `contents`.
	fn write(&self, path: &RawStr, contents: &[u8]) -> Result<(), Error>;
	/// Create `path` and all of its parent directories.
	fn make_dirs(&self, path: &RawStr) -> Result<(), Error>;
	/// Remove a file. Removing a file that doesn't exist is not an error.
	fn remove(&self, path: &RawStr) -> Result<(), Error>;
	/// Drop any cached `stat` result for `path`, so the next `stat` call
	/// reads the filesystem again. A no-op for implementations (like
	/// [`MemoryDisk`]) that don't cache.
	fn forget(&self, path: &RawStr) {
		let _ = path;
	}
}

/// A [`DiskInterface`] backed by the real filesystem.
///
/// Caches `stat` results for the lifetime of this `RealDisk`; construct a
/// fresh one per build so stale caches don't leak between builds.
#[derive(Default)]
pub struct RealDisk {
	cache: RefCell<BTreeMap<RawString, Option<Timestamp>>>,
}

impl RealDisk {
	pub fn new() -> Self {
		RealDisk {
			cache: RefCell::new(BTreeMap::new()),
		}
	}

	fn to_std_path(path: &RawStr) -> PathBuf {
		#[cfg(unix)]
		{
			use raw_string::unix::RawStrExt;
			path.as_path().to_owned()
		}
		#[cfg(not(unix))]
		{
			Path::new(path.to_str().expect("non-UTF-8 path on non-unix target")).to_owned()
		}
	}
}

impl DiskInterface for RealDisk {
	fn stat(&self, path: &RawStr) -> Result<Option<Timestamp>, Error> {
		if let Some(cached) = self.cache.borrow().get(path.as_ref()) {
			return Ok(*cached);
		}
		let result = mtime(&Self::to_std_path(path))?;
		self.cache
			.borrow_mut()
			.insert(path.to_owned(), result);
		Ok(result)
	}

	fn read(&self, path: &RawStr) -> Result<Vec<u8>, ReadFileError> {
		Ok(std::fs::read(Self::to_std_path(path))?)
	}

	fn write(&self, path: &RawStr, contents: &[u8]) -> Result<(), Error> {
		std::fs::write(Self::to_std_path(path), contents)
	}

	fn make_dirs(&self, path: &RawStr) -> Result<(), Error> {
		let std_path = Self::to_std_path(path);
		if let Some(parent) = std_path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		Ok(())
	}

	fn remove(&self, path: &RawStr) -> Result<(), Error> {
		match std::fs::remove_file(Self::to_std_path(path)) {
			Ok(()) => Ok(()),
			Err(ref e) if e.kind() == ErrorKind::NotFound => Ok(()),
			Err(e) => Err(e),
		}
	}

	fn forget(&self, path: &RawStr) {
		self.cache.borrow_mut().remove(path.as_ref());
	}
}

/// An in-memory file, as stored by [`MemoryDisk`].
#[derive(Clone, Debug)]
struct MemoryFile {
	contents: Vec<u8>,
	mtime: Timestamp,
}

/// An in-memory [`DiskInterface`], for tests.
///
/// Every operation is recorded in [`MemoryDisk::log`] so tests can assert on
/// exactly what the engine did (e.g. "no subprocess output was stat'd after
/// cleanup deleted it").
#[derive(Default)]
pub struct MemoryDisk {
	files: RefCell<BTreeMap<RawString, MemoryFile>>,
	directories: RefCell<std::collections::BTreeSet<RawString>>,
	next_mtime: RefCell<u64>,
	pub log: RefCell<Vec<String>>,
}

impl MemoryDisk {
	pub fn new() -> Self {
		MemoryDisk {
			files: RefCell::new(BTreeMap::new()),
			directories: RefCell::new(std::collections::BTreeSet::new()),
			next_mtime: RefCell::new(1),
			log: RefCell::new(Vec::new()),
		}
	}

	fn tick(&self) -> Timestamp {
		let mut n = self.next_mtime.borrow_mut();
		let t = Timestamp::from_nanos(*n).unwrap();
		*n += 1;
		t
	}

	/// Seed a file with specific contents, as if it was written before the
	/// build started. Each call advances the internal clock, so files
	/// written in the order a test expects get correspondingly ordered
	/// mtimes.
	pub fn seed(&self, path: &str, contents: &[u8]) {
		let mtime = self.tick();
		self.files.borrow_mut().insert(
			RawString::from(path),
			MemoryFile {
				contents: contents.to_vec(),
				mtime,
			},
		);
	}

	pub fn mtime_of(&self, path: &str) -> Option<Timestamp> {
		self.files
			.borrow()
			.get(RawStr::from_str(path))
			.map(|f| f.mtime)
	}
}

impl DiskInterface for MemoryDisk {
	fn stat(&self, path: &RawStr) -> Result<Option<Timestamp>, Error> {
		self.log.borrow_mut().push(format!("stat {}", path));
		Ok(self.files.borrow().get(path.as_ref()).map(|f| f.mtime))
	}

	fn read(&self, path: &RawStr) -> Result<Vec<u8>, ReadFileError> {
		self.log.borrow_mut().push(format!("read {}", path));
		self.files
			.borrow()
			.get(path.as_ref())
			.map(|f| f.contents.clone())
			.ok_or(ReadFileError::NotFound)
	}

	fn write(&self, path: &RawStr, contents: &[u8]) -> Result<(), Error> {
		self.log.borrow_mut().push(format!("write {}", path));
		let mtime = self.tick();
		self.files.borrow_mut().insert(
			path.to_owned(),
			MemoryFile {
				contents: contents.to_vec(),
				mtime,
			},
		);
		Ok(())
	}

	fn make_dirs(&self, path: &RawStr) -> Result<(), Error> {
		self.log.borrow_mut().push(format!("make_dirs {}", path));
		self.directories.borrow_mut().insert(path.to_owned());
		Ok(())
	}

	fn remove(&self, path: &RawStr) -> Result<(), Error> {
		self.log.borrow_mut().push(format!("remove {}", path));
		self.files.borrow_mut().remove(path.as_ref());
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn memory_disk_round_trip() {
		let disk = MemoryDisk::new();
		assert!(disk.stat(RawStr::from_str("a")).unwrap().is_none());
		disk.write(RawStr::from_str("a"), b"hello").unwrap();
		assert!(disk.stat(RawStr::from_str("a")).unwrap().is_some());
		assert_eq!(disk.read(RawStr::from_str("a")).unwrap(), b"hello");
		disk.remove(RawStr::from_str("a")).unwrap();
		assert!(disk.stat(RawStr::from_str("a")).unwrap().is_none());
		match disk.read(RawStr::from_str("a")) {
			Err(ReadFileError::NotFound) => {}
			_ => panic!("expected NotFound"),
		}
	}

	#[test]
	fn seeded_files_get_increasing_mtimes() {
		let disk = MemoryDisk::new();
		disk.seed("a", b"1");
		disk.seed("b", b"2");
		assert!(disk.mtime_of("a").unwrap() < disk.mtime_of("b").unwrap());
	}

	#[test]
	fn real_disk_round_trip() {
		let dir = tempfile::tempdir().unwrap();
		let path = RawString::from(dir.path().join("out/a.txt").to_str().unwrap());

		let disk = RealDisk::new();
		assert!(disk.stat(path.as_ref()).unwrap().is_none());
		disk.make_dirs(path.as_ref()).unwrap();
		disk.write(path.as_ref(), b"hello").unwrap();
		assert_eq!(disk.read(path.as_ref()).unwrap(), b"hello");
		assert!(disk.stat(path.as_ref()).unwrap().is_some());
		disk.remove(path.as_ref()).unwrap();
		assert!(!dir.path().join("out/a.txt").exists());
	}

	#[test]
	fn real_disk_caches_stat_across_calls() {
		let dir = tempfile::tempdir().unwrap();
		let path = RawString::from(dir.path().join("a.txt").to_str().unwrap());

		let disk = RealDisk::new();
		assert!(disk.stat(path.as_ref()).unwrap().is_none());
		std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
		// The miss above is cached: writing the file afterwards doesn't
		// change what a second `stat` through the same `RealDisk` reports.
		assert!(disk.stat(path.as_ref()).unwrap().is_none());
	}

	#[test]
	fn real_disk_forget_bypasses_cache() {
		let dir = tempfile::tempdir().unwrap();
		let path = RawString::from(dir.path().join("a.txt").to_str().unwrap());

		let disk = RealDisk::new();
		assert!(disk.stat(path.as_ref()).unwrap().is_none());
		std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
		disk.forget(path.as_ref());
		// Forgetting the cached miss lets the next `stat` see the write.
		assert!(disk.stat(path.as_ref()).unwrap().is_some());
	}
}
