//! Filesystem collaborator used by file responses, the static handler and the editor.
//!
//! Paths are absolute, `/`-separated strings as on flash filesystems
//! (`/www/index.htm`). Two implementations ship with the crate:
//!
//! - [`MemoryFs`]: files held in memory, handy for baked-in assets and tests
//! - [`LocalFs`]: a directory of the host filesystem acting as the root

mod local;
mod memory;

pub use local::LocalFs;
pub use memory::MemoryFs;

use std::io;
use std::io::{Read, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    /// Create or truncate.
    Write,
    Append,
}

/// An open file or directory handle.
pub trait FsFile: Read + Write + Send {
    /// Full path the handle was opened with.
    fn name(&self) -> &str;

    fn size(&self) -> u64;

    fn is_directory(&self) -> bool;
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub size: u64,
    pub is_directory: bool,
}

pub trait FileSystem: Send + Sync {
    fn open(&self, path: &str, mode: OpenMode) -> io::Result<Box<dyn FsFile>>;

    fn exists(&self, path: &str) -> bool;

    fn remove(&self, path: &str) -> io::Result<()>;

    /// Entries directly below `dir`.
    fn list(&self, dir: &str) -> io::Result<Vec<DirEntry>>;
}

/// True when `path` opens as a regular file.
pub fn is_file(fs: &dyn FileSystem, path: &str) -> bool {
    fs.open(path, OpenMode::Read).is_ok_and(|file| !file.is_directory())
}
