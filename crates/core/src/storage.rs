// UART Echo - Store-and-Forward Relay
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{Storage, StorageError, StorageResult};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};
use uart_echo_config::StorageSection;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountOptions {
    pub base_path: PathBuf,
    pub max_files: usize,
    pub format_if_mount_failed: bool,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("spiffs"),
            max_files: 5,
            format_if_mount_failed: true,
        }
    }
}

impl From<&StorageSection> for MountOptions {
    fn from(section: &StorageSection) -> Self {
        Self {
            base_path: section.base_path.clone(),
            max_files: section.max_files,
            format_if_mount_failed: section.format_if_mount_failed,
        }
    }
}

/// Flash filesystem stand-in: a directory on the host filesystem.
///
/// Paths given to [`Storage`] calls are relative to the mount point.
#[derive(Debug, Clone)]
pub struct FileStore {
    base: PathBuf,
    max_files: usize,
    open_files: Arc<AtomicUsize>,
}

/// One open descriptor, released on drop.
#[derive(Debug)]
struct OpenSlot<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for OpenSlot<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FileStore {
    /// Mount `options.base_path`, formatting it if it is unusable and the
    /// options allow it.
    pub fn mount(options: MountOptions) -> StorageResult<Self> {
        let base = options.base_path.clone();
        if options.max_files == 0 {
            return Err(StorageError::Mount {
                base,
                reason: "max_files must be greater than zero".into(),
            });
        }

        match fs::metadata(&base) {
            Ok(meta) if meta.is_dir() && fs::read_dir(&base).is_ok() => {
                debug!("Mounting existing filesystem at {:?}", base);
            }
            Ok(_) => {
                if !options.format_if_mount_failed {
                    return Err(StorageError::Mount {
                        base,
                        reason: "mount point is not a usable directory".into(),
                    });
                }
                warn!("Mount point {:?} unusable, formatting", base);
                Self::format(&base)?;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("Creating filesystem at {:?}", base);
                fs::create_dir_all(&base).map_err(|e| StorageError::Mount {
                    base: base.clone(),
                    reason: e.to_string(),
                })?;
            }
            Err(e) => {
                return Err(StorageError::Mount {
                    base,
                    reason: e.to_string(),
                })
            }
        }

        Ok(Self {
            base,
            max_files: options.max_files,
            open_files: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn format(base: &Path) -> StorageResult<()> {
        let mount_error = |e: std::io::Error| StorageError::Mount {
            base: base.to_path_buf(),
            reason: e.to_string(),
        };
        if base.is_dir() {
            fs::remove_dir_all(base).map_err(mount_error)?;
        } else {
            fs::remove_file(base).map_err(mount_error)?;
        }
        fs::create_dir_all(base).map_err(mount_error)
    }

    pub fn base_path(&self) -> &Path {
        &self.base
    }

    pub fn open_files(&self) -> usize {
        self.open_files.load(Ordering::SeqCst)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.base.join(path)
    }

    fn acquire(&self) -> StorageResult<OpenSlot<'_>> {
        let prev = self.open_files.fetch_add(1, Ordering::SeqCst);
        if prev >= self.max_files {
            self.open_files.fetch_sub(1, Ordering::SeqCst);
            return Err(StorageError::TooManyOpenFiles {
                limit: self.max_files,
            });
        }
        Ok(OpenSlot {
            counter: &self.open_files,
        })
    }
}

impl Storage for FileStore {
    fn write(&self, path: &Path, data: &[u8]) -> StorageResult<()> {
        let full = self.resolve(path);
        let _slot = self.acquire()?;

        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(|source| StorageError::Open {
                path: full.clone(),
                source,
            })?;
        }
        let mut file = File::create(&full).map_err(|source| StorageError::Open {
            path: full.clone(),
            source,
        })?;

        let mut written = 0;
        while written < data.len() {
            match file.write(&data[written..]) {
                Ok(0) => break,
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(source) => return Err(StorageError::Io { path: full, source }),
            }
        }
        if written != data.len() {
            return Err(StorageError::ShortWrite {
                path: full,
                written,
                expected: data.len(),
            });
        }
        file.flush()
            .map_err(|source| StorageError::Io { path: full, source })
    }

    fn read(&self, path: &Path, dest: &mut [u8]) -> StorageResult<usize> {
        let full = self.resolve(path);
        let _slot = self.acquire()?;

        let mut file = File::open(&full).map_err(|source| StorageError::Open {
            path: full.clone(),
            source,
        })?;
        let io_error = |source| StorageError::Io {
            path: full.clone(),
            source,
        };

        let size = file.seek(SeekFrom::End(0)).map_err(io_error)?;
        file.seek(SeekFrom::Start(0)).map_err(io_error)?;
        if size == 0 {
            return Ok(0);
        }

        let size = usize::try_from(size).unwrap_or(usize::MAX);
        if size >= dest.len() {
            return Err(StorageError::BufferTooSmall {
                needed: size.saturating_add(1),
                capacity: dest.len(),
            });
        }

        // Copy until EOF, never past the slot reserved for the sentinel.
        let limit = dest.len() - 1;
        let mut copied = 0;
        loop {
            if copied == limit {
                let mut probe = [0u8; 1];
                if file.read(&mut probe).map_err(io_error)? != 0 {
                    return Err(StorageError::BufferTooSmall {
                        needed: dest.len() + 1,
                        capacity: dest.len(),
                    });
                }
                break;
            }
            match file.read(&mut dest[copied..limit]) {
                Ok(0) => break,
                Ok(n) => copied += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(io_error(e)),
            }
        }

        dest[copied] = 0;
        Ok(copied)
    }
}

#[derive(Debug, Default)]
struct MemState {
    files: HashMap<PathBuf, Vec<u8>>,
    fail_open: bool,
    truncate_writes_to: Option<usize>,
}

/// In-memory filesystem with the same semantics as [`FileStore`], plus fault
/// injection. Clones share the same files.
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    state: Arc<Mutex<MemState>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.lock().files.get(path.as_ref()).cloned()
    }

    /// Replace a file behind the echo task's back.
    pub fn put(&self, path: impl AsRef<Path>, data: &[u8]) {
        self.lock()
            .files
            .insert(path.as_ref().to_path_buf(), data.to_vec());
    }

    /// Make every open fail until cleared.
    pub fn fail_opens(&self, fail: bool) {
        self.lock().fail_open = fail;
    }

    /// Cap how many bytes each write actually stores.
    pub fn truncate_writes_to(&self, limit: Option<usize>) {
        self.lock().truncate_writes_to = limit;
    }
}

fn injected_open_failure(path: &Path) -> StorageError {
    StorageError::Open {
        path: path.to_path_buf(),
        source: std::io::Error::new(ErrorKind::Other, "injected open failure"),
    }
}

impl Storage for MemStore {
    fn write(&self, path: &Path, data: &[u8]) -> StorageResult<()> {
        let mut state = self.lock();
        if state.fail_open {
            return Err(injected_open_failure(path));
        }
        let written = state
            .truncate_writes_to
            .map_or(data.len(), |limit| limit.min(data.len()));
        state
            .files
            .insert(path.to_path_buf(), data[..written].to_vec());
        if written != data.len() {
            return Err(StorageError::ShortWrite {
                path: path.to_path_buf(),
                written,
                expected: data.len(),
            });
        }
        Ok(())
    }

    fn read(&self, path: &Path, dest: &mut [u8]) -> StorageResult<usize> {
        let state = self.lock();
        if state.fail_open {
            return Err(injected_open_failure(path));
        }
        let Some(file) = state.files.get(path) else {
            return Err(StorageError::Open {
                path: path.to_path_buf(),
                source: std::io::Error::from(ErrorKind::NotFound),
            });
        };
        if file.is_empty() {
            return Ok(0);
        }
        if file.len() >= dest.len() {
            return Err(StorageError::BufferTooSmall {
                needed: file.len() + 1,
                capacity: dest.len(),
            });
        }
        dest[..file.len()].copy_from_slice(file);
        dest[file.len()] = 0;
        Ok(file.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mount_in(dir: &Path) -> FileStore {
        FileStore::mount(MountOptions {
            base_path: dir.join("spiffs"),
            ..MountOptions::default()
        })
        .unwrap()
    }

    #[test]
    fn test_write_then_read_appends_sentinel() {
        let tmp = tempfile::tempdir().unwrap();
        let store = mount_in(tmp.path());
        let path = Path::new("uart_data.txt");

        store.write(path, b"hello").unwrap();
        let mut dest = [0xAAu8; 16];
        let n = store.read(path, &mut dest).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&dest[..5], b"hello");
        assert_eq!(dest[5], 0);
        assert_eq!(dest[6], 0xAA);
    }

    #[test]
    fn test_write_truncates_previous_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let store = mount_in(tmp.path());
        let path = Path::new("uart_data.txt");

        store.write(path, b"a much longer first chunk").unwrap();
        store.write(path, b"short").unwrap();
        assert_eq!(
            fs::read(store.base_path().join(path)).unwrap(),
            b"short".to_vec()
        );
    }

    #[test]
    fn test_read_empty_file_copies_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let store = mount_in(tmp.path());
        let path = Path::new("empty.txt");
        store.write(path, b"").unwrap();

        let mut dest = [0x55u8; 4];
        assert_eq!(store.read(path, &mut dest).unwrap(), 0);
        assert_eq!(dest, [0x55; 4]);
    }

    #[test]
    fn test_read_rejects_file_without_room_for_sentinel() {
        let tmp = tempfile::tempdir().unwrap();
        let store = mount_in(tmp.path());
        let path = Path::new("uart_data.txt");
        store.write(path, b"12345").unwrap();

        let mut exact = [0u8; 5];
        let err = store.read(path, &mut exact).unwrap_err();
        assert!(matches!(
            err,
            StorageError::BufferTooSmall {
                needed: 6,
                capacity: 5
            }
        ));
        assert_eq!(exact, [0u8; 5]);

        let mut fits = [0u8; 6];
        assert_eq!(store.read(path, &mut fits).unwrap(), 5);
    }

    #[test]
    fn test_read_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = mount_in(tmp.path());
        let mut dest = [0u8; 8];
        let err = store.read(Path::new("nope.txt"), &mut dest).unwrap_err();
        assert!(matches!(err, StorageError::Open { .. }));
    }

    #[test]
    fn test_nested_relay_path_is_created() {
        let tmp = tempfile::tempdir().unwrap();
        let store = mount_in(tmp.path());
        let path = Path::new("relay/chunk.bin");
        store.write(path, b"xyz").unwrap();
        let mut dest = [0u8; 8];
        assert_eq!(store.read(path, &mut dest).unwrap(), 3);
    }

    #[test]
    fn test_open_file_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::mount(MountOptions {
            base_path: tmp.path().join("fs"),
            max_files: 2,
            format_if_mount_failed: true,
        })
        .unwrap();

        let first = store.acquire().unwrap();
        let _second = store.acquire().unwrap();
        let err = store.write(Path::new("f.txt"), b"x").unwrap_err();
        assert!(matches!(err, StorageError::TooManyOpenFiles { limit: 2 }));
        assert_eq!(store.open_files(), 2);

        drop(first);
        store.write(Path::new("f.txt"), b"x").unwrap();
        assert_eq!(store.open_files(), 1);
    }

    #[test]
    fn test_mount_formats_unusable_mount_point() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("spiffs");
        fs::write(&base, b"corrupt").unwrap();

        let store = FileStore::mount(MountOptions {
            base_path: base.clone(),
            ..MountOptions::default()
        })
        .unwrap();
        assert!(store.base_path().is_dir());
    }

    #[test]
    fn test_mount_without_format_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("spiffs");
        fs::write(&base, b"corrupt").unwrap();

        let err = FileStore::mount(MountOptions {
            base_path: base,
            max_files: 5,
            format_if_mount_failed: false,
        })
        .unwrap_err();
        assert!(matches!(err, StorageError::Mount { .. }));
    }

    #[test]
    fn test_mount_keeps_existing_files() {
        let tmp = tempfile::tempdir().unwrap();
        let store = mount_in(tmp.path());
        store.write(Path::new("keep.txt"), b"kept").unwrap();

        let again = mount_in(tmp.path());
        let mut dest = [0u8; 8];
        assert_eq!(again.read(Path::new("keep.txt"), &mut dest).unwrap(), 4);
    }

    #[test]
    fn test_mem_store_short_write_keeps_partial_contents() {
        let store = MemStore::new();
        store.truncate_writes_to(Some(3));
        let err = store.write(Path::new("f"), b"hello").unwrap_err();
        assert!(matches!(
            err,
            StorageError::ShortWrite {
                written: 3,
                expected: 5,
                ..
            }
        ));
        assert_eq!(store.contents("f").unwrap(), b"hel".to_vec());
    }

    #[test]
    fn test_mem_store_matches_file_store_bounds() {
        let store = MemStore::new();
        store.put("f", b"abcd");
        let mut small = [0u8; 4];
        assert!(matches!(
            store.read(Path::new("f"), &mut small),
            Err(StorageError::BufferTooSmall {
                needed: 5,
                capacity: 4
            })
        ));
        let mut dest = [0xFFu8; 5];
        assert_eq!(store.read(Path::new("f"), &mut dest).unwrap(), 4);
        assert_eq!(dest, *b"abcd\0");
    }

    #[test]
    fn test_mem_store_injected_open_failure() {
        let store = MemStore::new();
        store.fail_opens(true);
        assert!(store.write(Path::new("f"), b"x").is_err());
        store.fail_opens(false);
        store.write(Path::new("f"), b"x").unwrap();
    }
}
