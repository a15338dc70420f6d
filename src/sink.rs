//! Output destinations.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, File};
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::path::OutputPath;

/// Receives extracted files. Paths are already sanitized and relative.
pub trait Sink {
    fn ensure_dir(&mut self, path: &OutputPath) -> io::Result<()>;

    /// Writes the concatenation of `chunks` to `path`, replacing any existing file.
    fn write_file(&mut self, path: &OutputPath, chunks: &[&[u8]]) -> io::Result<()>;
}

/// Writes below a directory on disk.
#[derive(Debug)]
pub struct FsSink {
    root: PathBuf,
}

impl FsSink {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Sink for FsSink {
    fn ensure_dir(&mut self, path: &OutputPath) -> io::Result<()> {
        fs::create_dir_all(path.under(&self.root))
    }

    fn write_file(&mut self, path: &OutputPath, chunks: &[&[u8]]) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            self.ensure_dir(&parent)?;
        }
        let mut file = File::create(path.under(&self.root))?;
        for chunk in chunks {
            file.write_all(chunk)?;
        }
        Ok(())
    }
}

/// Builds a stored (uncompressed) zip archive in memory.
///
/// Entries are buffered and only serialized by [`ZipSink::finish`], so a
/// rewritten path keeps its last content like on the other sinks.
#[derive(Debug, Default)]
pub struct ZipSink {
    dirs: Vec<OutputPath>,
    seen_dirs: HashSet<OutputPath>,
    files: Vec<(OutputPath, Vec<u8>)>,
    file_index: HashMap<OutputPath, usize>,
}

impl ZipSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn options() -> SimpleFileOptions {
        SimpleFileOptions::default().compression_method(CompressionMethod::Stored)
    }

    /// Writes directories, then files, each in first-seen order, and returns
    /// the archive bytes.
    pub fn finish(self) -> io::Result<Vec<u8>> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for dir in &self.dirs {
            writer
                .add_directory(dir.to_string(), Self::options())
                .map_err(io::Error::other)?;
        }
        for (path, content) in &self.files {
            writer
                .start_file(path.to_string(), Self::options())
                .map_err(io::Error::other)?;
            writer.write_all(content)?;
        }
        let cursor = writer.finish().map_err(io::Error::other)?;
        Ok(cursor.into_inner())
    }
}

impl Sink for ZipSink {
    fn ensure_dir(&mut self, path: &OutputPath) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            self.ensure_dir(&parent)?;
        }
        if self.seen_dirs.insert(path.clone()) {
            self.dirs.push(path.clone());
        }
        Ok(())
    }

    fn write_file(&mut self, path: &OutputPath, chunks: &[&[u8]]) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            self.ensure_dir(&parent)?;
        }
        let content = chunks.concat();
        match self.file_index.get(path) {
            Some(&i) => self.files[i].1 = content,
            None => {
                self.file_index.insert(path.clone(), self.files.len());
                self.files.push((path.clone(), content));
            }
        }
        Ok(())
    }
}

/// Keeps every file in memory, keyed by its `/`-separated path.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub dirs: HashSet<String>,
    pub files: BTreeMap<String, Vec<u8>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }
}

impl Sink for MemorySink {
    fn ensure_dir(&mut self, path: &OutputPath) -> io::Result<()> {
        self.dirs.insert(path.to_string());
        Ok(())
    }

    fn write_file(&mut self, path: &OutputPath, chunks: &[&[u8]]) -> io::Result<()> {
        self.files.insert(path.to_string(), chunks.concat());
        Ok(())
    }
}
