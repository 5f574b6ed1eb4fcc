//! Lazy, bounded-memory reading of a file in fixed size chunks.
use std::{
    fs::File,
    io::{self, Read},
    path::{Path, PathBuf},
};

use bytes::Bytes;

use crate::error::{ConfigError, FileError};

/// A slice of a file, at most the chunk size long.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Chunk {
    seq: usize,
    data: Bytes,
    last: bool,
}

impl Chunk {
    /// Position of this chunk in the file, starting at 0.
    pub fn seq(&self) -> usize {
        self.seq
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether this is the final chunk of the file.
    pub fn is_last(&self) -> bool {
        self.last
    }
}

/// Splits a file into chunks. Every call to [`FileChunker::chunks`] reads the file from the start.
#[derive(Clone, Debug)]
pub struct FileChunker {
    path: PathBuf,
    chunk_size: usize,
}

impl FileChunker {
    pub fn new(path: impl Into<PathBuf>, chunk_size: usize) -> Result<FileChunker, ConfigError> {
        if chunk_size == 0 {
            return Err(ConfigError::ChunkSize(chunk_size));
        }
        Ok(FileChunker {
            path: path.into(),
            chunk_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn chunks(&self) -> Result<Chunks, FileError> {
        if !self.path.is_file() {
            return Err(FileError::NotFound {
                path: self.path.clone(),
            });
        }
        let file = File::open(&self.path).map_err(|e| self.read_error(e))?;
        let total_bytes = file.metadata().map_err(|e| self.read_error(e))?.len();
        let mut chunks = Chunks {
            file,
            path: self.path.clone(),
            chunk_size: self.chunk_size,
            total_bytes,
            next_seq: 0,
            ahead: None,
        };
        let first = chunks.read_chunk()?;
        if !first.is_empty() {
            chunks.ahead = Some(first);
        }
        Ok(chunks)
    }

    fn read_error(&self, source: io::Error) -> FileError {
        FileError::Read {
            path: self.path.clone(),
            source,
        }
    }
}

/// Iterator over the chunks of one file.
/// Holds at most one chunk ahead of the one handed out, to know which chunk is the last.
#[derive(Debug)]
pub struct Chunks {
    file: File,
    path: PathBuf,
    chunk_size: usize,
    total_bytes: u64,
    next_seq: usize,
    ahead: Option<Vec<u8>>,
}

impl Chunks {
    /// File length when it was opened.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_chunk(&mut self) -> Result<Vec<u8>, FileError> {
        let mut buf = Vec::with_capacity(self.chunk_size);
        (&mut self.file)
            .take(self.chunk_size as u64)
            .read_to_end(&mut buf)
            .map_err(|source| FileError::Read {
                path: self.path.clone(),
                source,
            })?;
        Ok(buf)
    }
}

impl Iterator for Chunks {
    type Item = Result<Chunk, FileError>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.ahead.take()?;
        let last = if current.len() < self.chunk_size {
            true
        } else {
            match self.read_chunk() {
                Ok(next) if next.is_empty() => true,
                Ok(next) => {
                    self.ahead = Some(next);
                    false
                }
                Err(e) => return Some(Err(e)),
            }
        };
        let chunk = Chunk {
            seq: self.next_seq,
            data: current.into(),
            last,
        };
        self.next_seq += 1;
        Some(Ok(chunk))
    }
}
