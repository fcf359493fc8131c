//! This library crate contains all the re-usable parts of `ninj`, an
//! implementation of the `ninja` build system.
//!
//! # File formats
//!
//! This crate implements support for several file formats:
//!
//! - **`build.ninja` files**
//!
//!   The [`spec`] module contains everything you need to parse `build.ninja`
//!   files, including variable expansion, traversing other ninja files, and
//!   resolving build rules.
//!
//! - **`.ninja_log` files**
//!
//!   The [`buildlog`] module allows both reading from and writing to
//!   `.ninja_log` files,   which store how each target was built previously.
//!
//! - **`.ninja_deps` files**
//!
//!   The [`deplog`] module can read and write `.ninja_deps` files, which hold
//!   the dependency information discovered during previous builds.
//!
//! - **`Makefile`-style dependency files**
//!
//!   The [`depfile`] module can read `Makefile`-style dependency files which
//!   are written by some compilers, such as GCC and Clang.
//!
//! # Utilities
//!
//! Other than file formats, this crate also provides the following utilities:
//!
//! - **Error handling**
//!
//!   [`ErrorWithLocation`][error::ErrorWithLocation] adds location information
//!   (file name and line number) to an [`Error`][std::error::Error], so that
//!   the user can know where something went wrong while reading/parsing a file.
//!
//! - **Reading of `mtime`s**
//!
//!   The [`mtime`] module contains an [`mtime`][mtime::mtime] function, but
//!   also has a [`StatCache`][mtime::StatCache] which helps to reducing the
//!   number of `stat()` syscalls.
//!
//! # The build engine
//!
//! Beyond file formats, this crate implements the actual build engine:
//!
//! - [`disk`] abstracts away the filesystem, so the engine can run against
//!   an in-memory filesystem in tests.
//! - [`graph`] turns a [`spec::Spec`] into an arena-indexed dependency graph.
//! - [`scan`] walks that graph to decide which nodes are dirty.
//! - [`plan`] decides, given the dirty nodes, which edges are ready to run
//!   and in what order, respecting pool concurrency limits.
//! - [`runner`] runs the commands for ready edges as subprocesses.
//! - [`build`] ties `scan`, `plan` and `runner` together into the top-level
//!   build loop.
//! - [`status`] renders build progress.

pub mod build;
pub mod buildlog;
pub mod depfile;
pub mod deplog;
pub mod disk;
pub mod error;
pub mod graph;
pub mod mtime;
pub mod plan;
pub mod runner;
pub mod scan;
pub mod spec;
pub mod status;
