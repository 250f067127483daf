//! Lazy byte streams.
//!
//! A [`ByteStream`] is a finite, single-pass sequence of byte chunks. Streams
//! are restartable only by re-opening their source. A stream may remember the
//! file it was read from, which lets processors that need a real path on disk
//! skip copying the contents into a temporary file.

use crate::process::ProcessFailure;
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempPath};

/// Chunk size used when reading files.
pub const FILE_CHUNK_SIZE: usize = 16 * 1024;

/// A single item of a byte stream.
pub type Chunk = Result<Vec<u8>, StreamError>;

/// A resource kept alive until the stream (or process) holding it is done.
pub type Releasable = Box<dyn Send>;

/// Error produced while pulling bytes through a stream.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StreamError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// Failed to read a file
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Failed to start an external command
    #[error("Failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    /// External command exited unsuccessfully
    #[error(transparent)]
    Process(#[from] ProcessFailure),
    /// In-process transform failed
    #[error("{processor} failed: {message}")]
    Transform { processor: String, message: String },
    /// Error attributed to a specific input file
    #[error("{}: {source}", path.display())]
    InFile {
        path: PathBuf,
        #[source]
        source: Box<StreamError>,
    },
}

impl StreamError {
    /// Attach the input file an error came from.
    pub fn in_file(path: impl Into<PathBuf>, source: StreamError) -> Self {
        StreamError::InFile { path: path.into(), source: Box::new(source) }
    }

    /// The error with any file attribution stripped.
    pub fn root(&self) -> &StreamError {
        match self {
            StreamError::InFile { source, .. } => source.root(),
            other => other,
        }
    }

    /// The process failure behind this error, if any.
    pub fn process_failure(&self) -> Option<&ProcessFailure> {
        match self.root() {
            StreamError::Process(failure) => Some(failure),
            _ => None,
        }
    }
}

/// A lazy, finite, single-pass sequence of byte chunks.
pub struct ByteStream {
    chunks: Box<dyn Iterator<Item = Chunk> + Send>,
    /// File holding exactly the bytes this stream yields, if any
    path: Option<PathBuf>,
    /// Resources released when the stream is dropped
    keep: Vec<Releasable>,
}

impl ByteStream {
    /// Wrap an iterator of chunks.
    pub fn new<I>(chunks: I) -> Self
    where
        I: Iterator<Item = Chunk> + Send + 'static,
    {
        Self { chunks: Box::new(chunks), path: None, keep: Vec::new() }
    }

    /// A stream yielding a single buffer.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Self::empty();
        }
        Self::new(std::iter::once(Ok(bytes)))
    }

    /// A stream yielding nothing.
    pub fn empty() -> Self {
        Self::new(std::iter::empty())
    }

    /// Stream the contents of a file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StreamError> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|source| StreamError::Read { path: path.to_path_buf(), source })?;
        let mut stream = Self::new(FileChunks::new(file, path));
        stream.path = Some(path.to_path_buf());
        Ok(stream)
    }

    /// Stream the contents of a temporary file, deleting it once the stream is dropped.
    pub fn from_temp(file: NamedTempFile) -> Result<Self, StreamError> {
        let temp_path = file.into_temp_path();
        Self::from_temp_path(temp_path)
    }

    /// Stream a file that is deleted once the stream is dropped.
    pub fn from_temp_path(temp_path: TempPath) -> Result<Self, StreamError> {
        // Reopen by path: the writer may have replaced the file rather than written in place.
        let mut stream = Self::open(&temp_path)?;
        stream.keep.push(Box::new(temp_path));
        Ok(stream)
    }

    /// The file backing this stream, if its contents are exactly the file's contents.
    pub fn file_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Keep a resource alive for as long as this stream.
    pub fn keep_alive(mut self, resource: Releasable) -> Self {
        self.keep.push(resource);
        self
    }

    /// Write every chunk to `writer`, returning the number of bytes written.
    pub fn write_to<W: Write>(self, writer: &mut W) -> Result<u64, StreamError> {
        let mut written = 0u64;
        for chunk in self {
            let chunk = chunk?;
            writer.write_all(&chunk)?;
            written += chunk.len() as u64;
        }
        Ok(written)
    }

    /// Collect the whole stream into memory.
    pub fn into_bytes(self) -> Result<Vec<u8>, StreamError> {
        let mut buffer = Vec::new();
        self.write_to(&mut buffer)?;
        Ok(buffer)
    }

    /// Make the stream's contents available at a real path on disk.
    ///
    /// File-backed streams are used in place; anything else is written to a
    /// temporary file that is deleted when the returned value is dropped.
    pub fn materialize(self) -> Result<Materialized, StreamError> {
        if let Some(path) = self.path.clone() {
            return Ok(Materialized { path, _backing: Backing::Stream(self) });
        }

        let mut temp = temp_file()?;
        self.write_to(&mut temp)?;
        temp.flush()?;
        let temp_path = temp.into_temp_path();
        Ok(Materialized { path: temp_path.to_path_buf(), _backing: Backing::Temp(temp_path) })
    }
}

impl Iterator for ByteStream {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        self.chunks.next()
    }
}

impl fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteStream")
            .field("path", &self.path)
            .field("keep", &self.keep.len())
            .finish_non_exhaustive()
    }
}

/// A stream's contents available at a path on disk.
pub struct Materialized {
    path: PathBuf,
    _backing: Backing,
}

enum Backing {
    Stream(ByteStream),
    Temp(TempPath),
}

impl Materialized {
    /// Path holding the contents.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the contents were copied into a temporary file.
    pub fn is_temporary(&self) -> bool {
        matches!(self._backing, Backing::Temp(_))
    }
}

impl fmt::Debug for Materialized {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Materialized")
            .field("path", &self.path)
            .field("temporary", &self.is_temporary())
            .finish()
    }
}

/// Reads a file in fixed-size chunks, closing it at end of file.
pub struct FileChunks {
    file: Option<File>,
    path: PathBuf,
    chunk_size: usize,
}

impl FileChunks {
    /// Create a chunk reader over an open file.
    pub fn new(file: File, path: impl Into<PathBuf>) -> Self {
        Self { file: Some(file), path: path.into(), chunk_size: FILE_CHUNK_SIZE }
    }

    /// Set the chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }
}

impl Iterator for FileChunks {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let file = self.file.as_mut()?;
        let mut buffer = vec![0u8; self.chunk_size];
        loop {
            match file.read(&mut buffer) {
                Ok(0) => {
                    self.file = None;
                    return None;
                }
                Ok(n) => {
                    buffer.truncate(n);
                    return Some(Ok(buffer));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    self.file = None;
                    return Some(Err(StreamError::Read { path: self.path.clone(), source }));
                }
            }
        }
    }
}

/// Create a named temporary file in the system temp directory.
pub(crate) fn temp_file() -> io::Result<NamedTempFile> {
    tempfile::Builder::new().prefix("bundlepipe-").tempfile()
}
