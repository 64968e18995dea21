#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Shared utilities for stackpm.
//!
//! Holds the filesystem seam the installer writes through. No logging here;
//! logging is set up by the CLI crate.

pub mod fs;

pub use fs::{atomic_write, FileStat, FileSystem, OsFileSystem};
