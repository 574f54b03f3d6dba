// UART Echo - Store-and-Forward Relay
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod config;
pub mod echo;
pub mod metrics;
pub mod peripherals;
pub mod storage;
pub mod system;

use std::path::{Path, PathBuf};

pub use config::{EchoConfig, UartConfig};
pub use echo::{EchoLoop, Outcome, RelayState};
pub use metrics::{MetricsSummary, RelayMetrics};
pub use storage::{FileStore, MemStore, MountOptions};
pub use system::{SystemHandle, TASK_NAME};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to open {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Error writing to {path:?} ({written} <> {expected})")]
    ShortWrite {
        path: PathBuf,
        written: usize,
        expected: usize,
    },
    #[error("Destination holds {capacity} bytes but {needed} are needed (contents plus sentinel)")]
    BufferTooSmall { needed: usize, capacity: usize },
    #[error("Open file limit of {limit} reached")]
    TooManyOpenFiles { limit: usize },
    #[error("Failed to mount {base:?}: {reason}")]
    Mount { base: PathBuf, reason: String },
}

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum UartError {
    #[error("Invalid UART configuration: {0}")]
    InvalidConfig(String),
    #[error("UART I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Driver reported {reported} bytes for a {window} byte receive window")]
    Overrun { reported: usize, window: usize },
    #[error("UART peer disconnected")]
    Disconnected,
}

pub type UartResult<T> = Result<T, UartError>;

#[derive(Debug, thiserror::Error)]
pub enum EchoError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Uart(#[from] UartError),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Failed to spawn echo task: {0}")]
    TaskSpawn(#[source] std::io::Error),
    #[error("Echo task panicked")]
    TaskPanicked,
}

pub type EchoResult<T> = Result<T, EchoError>;

/// The receive/transmit side of a UART, as seen by the echo task.
pub trait SerialPort: Send {
    /// Wait at most `timeout_ticks` for data and copy what arrived into `buf`.
    /// Returns `Ok(0)` when the window passes without data.
    fn read_bytes(&mut self, buf: &mut [u8], timeout_ticks: u32) -> UartResult<usize>;

    /// Blocks until `data` has been queued for transmission.
    fn write_bytes(&mut self, data: &[u8]) -> UartResult<usize>;
}

/// Whole-file persistence against a mounted filesystem.
pub trait Storage: Send {
    /// Replace the contents of `path` with exactly `data`.
    fn write(&self, path: &Path, data: &[u8]) -> StorageResult<()>;

    /// Copy the contents of `path` into `dest` followed by a zero sentinel.
    ///
    /// `dest.len()` is the capacity; a file that does not fit together with
    /// its sentinel is rejected with [`StorageError::BufferTooSmall`]. An
    /// empty file copies nothing and returns `Ok(0)`.
    fn read(&self, path: &Path, dest: &mut [u8]) -> StorageResult<usize>;
}

impl<S: Storage + Sync + ?Sized> Storage for std::sync::Arc<S> {
    fn write(&self, path: &Path, data: &[u8]) -> StorageResult<()> {
        (**self).write(path, data)
    }

    fn read(&self, path: &Path, dest: &mut [u8]) -> StorageResult<usize> {
        (**self).read(path, dest)
    }
}

impl<P: SerialPort + ?Sized> SerialPort for Box<P> {
    fn read_bytes(&mut self, buf: &mut [u8], timeout_ticks: u32) -> UartResult<usize> {
        (**self).read_bytes(buf, timeout_ticks)
    }

    fn write_bytes(&mut self, data: &[u8]) -> UartResult<usize> {
        (**self).write_bytes(data)
    }
}
