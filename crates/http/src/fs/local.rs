use super::{DirEntry, FileSystem, FsFile, OpenMode};
use std::fs;
use std::fs::File;
use std::io;
use std::io::{ErrorKind, Read, Write};
use std::path::{Component, Path, PathBuf};

/// A host directory exposed as the filesystem root.
#[derive(Debug, Clone)]
pub struct LocalFs {
    root: PathBuf,
}

impl LocalFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Maps `/a/b` below the root; `..` and other non-normal components are refused.
    fn resolve(&self, path: &str) -> io::Result<PathBuf> {
        let mut resolved = self.root.clone();
        for component in Path::new(path.trim_start_matches('/')).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => return Err(io::Error::new(ErrorKind::PermissionDenied, "path escapes the filesystem root")),
            }
        }
        Ok(resolved)
    }
}

impl FileSystem for LocalFs {
    fn open(&self, path: &str, mode: OpenMode) -> io::Result<Box<dyn FsFile>> {
        let resolved = self.resolve(path)?;
        let (file, metadata) = match mode {
            OpenMode::Read => {
                let metadata = fs::metadata(&resolved)?;
                if metadata.is_dir() {
                    return Ok(Box::new(LocalFile { name: path.to_owned(), file: None, size: 0 }));
                }
                (File::open(&resolved)?, metadata)
            }
            OpenMode::Write => {
                let file = File::create(&resolved)?;
                let metadata = file.metadata()?;
                (file, metadata)
            }
            OpenMode::Append => {
                let file = File::options().create(true).append(true).open(&resolved)?;
                let metadata = file.metadata()?;
                (file, metadata)
            }
        };
        Ok(Box::new(LocalFile { name: path.to_owned(), file: Some(file), size: metadata.len() }))
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_ok_and(|p| p.exists())
    }

    fn remove(&self, path: &str) -> io::Result<()> {
        let resolved = self.resolve(path)?;
        if resolved.is_dir() { fs::remove_dir(resolved) } else { fs::remove_file(resolved) }
    }

    fn list(&self, dir: &str) -> io::Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(self.resolve(dir)?)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: metadata.len(),
                is_directory: metadata.is_dir(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

/// `file` is `None` for directories.
struct LocalFile {
    name: String,
    file: Option<File>,
    size: u64,
}

impl Read for LocalFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.file {
            Some(file) => file.read(buf),
            None => Err(io::Error::new(ErrorKind::IsADirectory, "is a directory")),
        }
    }
}

impl Write for LocalFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.file {
            Some(file) => {
                let written = file.write(buf)?;
                self.size += written as u64;
                Ok(written)
            }
            None => Err(io::Error::new(ErrorKind::IsADirectory, "is a directory")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.file {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl FsFile for LocalFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn is_directory(&self) -> bool {
        self.file.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refuses_parent_components() {
        let fs = LocalFs::new(std::env::temp_dir());
        assert!(fs.open("/../etc/passwd", OpenMode::Read).is_err());
        assert!(!fs.exists("/../etc"));
    }

    #[test]
    fn write_then_read() {
        let root = std::env::temp_dir().join(format!("ethweb-localfs-{}", std::process::id()));
        std::fs::create_dir_all(&root).unwrap();
        let fs = LocalFs::new(&root);

        let mut file = fs.open("/note.txt", OpenMode::Write).unwrap();
        file.write_all(b"stored").unwrap();
        drop(file);

        let mut file = fs.open("/note.txt", OpenMode::Read).unwrap();
        assert_eq!(file.size(), 6);
        let mut content = String::new();
        file.read_to_string(&mut content).unwrap();
        assert_eq!(content, "stored");

        assert!(fs.open("/", OpenMode::Read).unwrap().is_directory());
        assert_eq!(fs.list("/").unwrap().len(), 1);

        fs.remove("/note.txt").unwrap();
        std::fs::remove_dir_all(root).unwrap();
    }
}
