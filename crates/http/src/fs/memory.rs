use super::{DirEntry, FileSystem, FsFile, OpenMode};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io;
use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;

/// A flat in-memory filesystem; directories exist implicitly as path prefixes.
#[derive(Debug, Clone, Default)]
pub struct MemoryFs {
    files: Arc<RwLock<BTreeMap<String, Bytes>>>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a file.
    pub fn insert(&self, path: impl Into<String>, content: impl Into<Bytes>) {
        self.files.write().insert(path.into(), content.into());
    }

    pub fn get(&self, path: &str) -> Option<Bytes> {
        self.files.read().get(path).cloned()
    }

    fn is_dir(&self, path: &str) -> bool {
        let prefix = dir_prefix(path);
        self.files.read().keys().any(|name| name.starts_with(&prefix))
    }
}

fn dir_prefix(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    format!("{trimmed}/")
}

impl FileSystem for MemoryFs {
    fn open(&self, path: &str, mode: OpenMode) -> io::Result<Box<dyn FsFile>> {
        match mode {
            OpenMode::Read => {
                if let Some(content) = self.get(path) {
                    return Ok(Box::new(MemoryFile { name: path.to_owned(), content, pos: 0, writer: None }));
                }
                if self.is_dir(path) {
                    return Ok(Box::new(MemoryFile { name: path.to_owned(), content: Bytes::new(), pos: 0, writer: None }.into_dir()));
                }
                Err(ErrorKind::NotFound.into())
            }
            OpenMode::Write | OpenMode::Append => {
                let initial = match mode {
                    OpenMode::Append => self.get(path).map(|b| b.to_vec()).unwrap_or_default(),
                    _ => Vec::new(),
                };
                self.insert(path, Bytes::from(initial.clone()));
                let writer = MemoryWriter { files: Arc::clone(&self.files), buffer: initial };
                Ok(Box::new(MemoryFile { name: path.to_owned(), content: Bytes::new(), pos: 0, writer: Some(writer) }))
            }
        }
    }

    fn exists(&self, path: &str) -> bool {
        self.files.read().contains_key(path) || self.is_dir(path)
    }

    fn remove(&self, path: &str) -> io::Result<()> {
        match self.files.write().remove(path) {
            Some(_) => Ok(()),
            None => Err(ErrorKind::NotFound.into()),
        }
    }

    fn list(&self, dir: &str) -> io::Result<Vec<DirEntry>> {
        let prefix = if dir == "/" || dir.is_empty() { "/".to_owned() } else { dir_prefix(dir) };
        let files = self.files.read();
        let mut entries: Vec<DirEntry> = Vec::new();
        for (name, content) in files.range(prefix.clone()..) {
            let Some(rest) = name.strip_prefix(&prefix) else {
                break;
            };
            match rest.split_once('/') {
                Some((sub_dir, _)) => {
                    if !entries.iter().any(|e| e.is_directory && e.name == sub_dir) {
                        entries.push(DirEntry { name: sub_dir.to_owned(), size: 0, is_directory: true });
                    }
                }
                None => entries.push(DirEntry { name: rest.to_owned(), size: content.len() as u64, is_directory: false }),
            }
        }
        Ok(entries)
    }
}

struct MemoryWriter {
    files: Arc<RwLock<BTreeMap<String, Bytes>>>,
    buffer: Vec<u8>,
}

struct MemoryFile {
    name: String,
    content: Bytes,
    pos: usize,
    writer: Option<MemoryWriter>,
}

struct MemoryDir(MemoryFile);

impl MemoryFile {
    fn into_dir(self) -> MemoryDir {
        MemoryDir(self)
    }
}

impl Read for MemoryFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = &self.content[self.pos..];
        let len = remaining.len().min(buf.len());
        buf[..len].copy_from_slice(&remaining[..len]);
        self.pos += len;
        Ok(len)
    }
}

impl Write for MemoryFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.writer {
            Some(writer) => {
                writer.buffer.extend_from_slice(buf);
                Ok(buf.len())
            }
            None => Err(io::Error::new(ErrorKind::PermissionDenied, "file opened for reading")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(writer) = &self.writer {
            writer.files.write().insert(self.name.clone(), Bytes::copy_from_slice(&writer.buffer));
        }
        Ok(())
    }
}

impl Drop for MemoryFile {
    fn drop(&mut self) {
        // committing never fails for the in-memory map
        let _ = self.flush();
    }
}

impl FsFile for MemoryFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        match &self.writer {
            Some(writer) => writer.buffer.len() as u64,
            None => self.content.len() as u64,
        }
    }

    fn is_directory(&self) -> bool {
        false
    }
}

impl Read for MemoryDir {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(ErrorKind::IsADirectory, "is a directory"))
    }
}

impl Write for MemoryDir {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(ErrorKind::IsADirectory, "is a directory"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl FsFile for MemoryDir {
    fn name(&self) -> &str {
        &self.0.name
    }

    fn size(&self) -> u64 {
        0
    }

    fn is_directory(&self) -> bool {
        true
    }
}
