//! # Image Reader
//!
//! Ingests the whole executable into an owned buffer. The file handle stays
//! open for the lifetime of the load and is closed at teardown.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::{LoadError, LoadResult};

/// An executable file held entirely in memory
#[derive(Debug)]
pub struct Image {
    path: PathBuf,
    file: Option<File>,
    bytes: Vec<u8>,
}

impl Image {
    /// Read the file at `path`.
    ///
    /// A single read must return exactly the number of bytes the size query
    /// reported; anything else is an error.
    pub fn read(path: impl AsRef<Path>) -> LoadResult<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = File::open(&path).map_err(|source| LoadError::Open {
            path: path.clone(),
            source,
        })?;

        let size = file
            .seek(SeekFrom::End(0))
            .and_then(|size| file.seek(SeekFrom::Start(0)).map(|_| size))
            .map_err(|source| LoadError::Metadata {
                path: path.clone(),
                source,
            })?;

        let len = usize::try_from(size).map_err(|_| LoadError::OutOfMemory { size })?;
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(len)
            .map_err(|_| LoadError::OutOfMemory { size })?;
        bytes.resize(len, 0);

        let read = if len == 0 {
            0
        } else {
            file.read(&mut bytes).map_err(|source| LoadError::Read {
                path: path.clone(),
                source,
            })?
        };

        if read != len {
            return Err(LoadError::ShortRead {
                path,
                expected: size,
                actual: read as u64,
            });
        }

        log::debug!("read {} bytes from {}", len, path.display());

        Ok(Self {
            path,
            file: Some(file),
            bytes,
        })
    }

    /// Wrap bytes that did not come from a file
    #[cfg(test)]
    pub(crate) fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            path: PathBuf::from("<memory>"),
            file: None,
            bytes,
        }
    }

    /// The image contents
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Size in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Is the image empty?
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Where the image came from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Is the source file still open?
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Close the source file; the buffer stays valid
    pub fn close(&mut self) {
        if self.file.take().is_some() {
            log::trace!("closed {}", self.path.display());
        }
    }
}
