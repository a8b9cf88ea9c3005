use nix::errno::Errno;
use std::io;
use thiserror::Error;

/// Failures surfaced by path resolution, listing and reading.
///
/// None of these are retried; the first one aborts the current request.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no such entry: {0}")]
    NotFound(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("failed to read {len} bytes at offset {offset}: {source}")]
    Read {
        offset: u64,
        len: usize,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub fn to_errno(&self) -> Errno {
        match self {
            Self::NotFound(_) => Errno::ENOENT,
            Self::NotADirectory(_) => Errno::ENOTDIR,
            Self::Read { .. } => Errno::EIO,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
