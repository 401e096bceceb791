//! Read-only contiguous byte views over the CSV source.
//!
//! A [`SourceView`] is backed by one of three origins: a memory-mapped file,
//! a caller-supplied buffer whose lifetime outlives the view, or an owned
//! buffer handed over by the host (the stream/URL path). Bytes are immutable
//! for the view's lifetime and every field span indexes into them.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::{debug, warn};
use memmap2::Mmap;

use crate::error::EngineError;

/// Size and modification time captured when a file origin is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WatchSnapshot {
    len: u64,
    mtime: Option<SystemTime>,
}

enum Backing {
    /// Memory-mapped file. The handle is kept so the mapping stays valid;
    /// drop order releases the map before the file.
    Mapped {
        map: Mmap,
        _file: File,
    },
    /// File that could not be mapped and was read whole, or bytes handed
    /// over by the host.
    Owned(Vec<u8>),
    /// Caller-retained buffer. The caller guarantees the pointed-to bytes
    /// outlive the view and stay unmodified.
    Borrowed {
        ptr: *const u8,
        len: usize,
    },
}

/// Read-only byte view with an explicit length.
pub struct SourceView {
    backing: Backing,
    path: Option<PathBuf>,
    watch: Option<WatchSnapshot>,
}

impl SourceView {
    /// Open a file origin: acquire the handle, map it read-only for its full
    /// length, and fall back to reading it whole if mapping fails. Open
    /// failures surface as a single "cannot open" kind.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| EngineError::CannotOpen {
            path: path.to_path_buf(),
            source,
        })?;
        let meta = file.metadata().map_err(|source| EngineError::CannotOpen {
            path: path.to_path_buf(),
            source,
        })?;
        if meta.len() > u32::MAX as u64 {
            return Err(EngineError::SourceTooLarge(meta.len()));
        }
        let watch = Some(WatchSnapshot {
            len: meta.len(),
            mtime: meta.modified().ok(),
        });

        // SAFETY: the file handle stays alive alongside the mapping and the
        // view never writes through it.
        let backing = match unsafe { Mmap::map(&file) } {
            Ok(map) => {
                debug!("mapped {} ({} bytes)", path.display(), map.len());
                Backing::Mapped { map, _file: file }
            }
            Err(err) => {
                warn!("mmap failed for {}, reading whole file: {err}", path.display());
                let bytes =
                    std::fs::read(path).map_err(|source| EngineError::CannotOpen {
                        path: path.to_path_buf(),
                        source,
                    })?;
                Backing::Owned(bytes)
            }
        };

        Ok(Self {
            backing,
            path: Some(path.to_path_buf()),
            watch,
        })
    }

    /// Take ownership of pre-collected bytes.
    pub fn from_owned(bytes: Vec<u8>) -> Result<Self, EngineError> {
        if bytes.len() as u64 > u32::MAX as u64 {
            return Err(EngineError::SourceTooLarge(bytes.len() as u64));
        }
        Ok(Self {
            backing: Backing::Owned(bytes),
            path: None,
            watch: None,
        })
    }

    /// View a caller-retained buffer without copying.
    ///
    /// # Safety
    ///
    /// `ptr` must point to `len` readable bytes that outlive the view and
    /// are not modified while it exists. A null `ptr` is only accepted with
    /// `len == 0`.
    pub unsafe fn from_raw_parts(ptr: *const u8, len: usize) -> Result<Self, EngineError> {
        if len as u64 > u32::MAX as u64 {
            return Err(EngineError::SourceTooLarge(len as u64));
        }
        Ok(Self {
            backing: Backing::Borrowed { ptr, len },
            path: None,
            watch: None,
        })
    }

    /// The viewed bytes.
    pub fn bytes(&self) -> &[u8] {
        match &self.backing {
            Backing::Mapped { map, .. } => map,
            Backing::Owned(bytes) => bytes,
            Backing::Borrowed { ptr, len } => {
                if *len == 0 || ptr.is_null() {
                    &[]
                } else {
                    // SAFETY: construction contract of `from_raw_parts`.
                    unsafe { std::slice::from_raw_parts(*ptr, *len) }
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        match &self.backing {
            Backing::Mapped { map, .. } => map.len(),
            Backing::Owned(bytes) => bytes.len(),
            Backing::Borrowed { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Re-stat a file origin and report whether its size or modification
    /// time changed since open. Non-file origins never report a change, and
    /// a file that can no longer be stat-ed counts as modified.
    pub fn modified_since_open(&self) -> bool {
        let (path, snapshot) = match (&self.path, self.watch) {
            (Some(path), Some(snapshot)) => (path, snapshot),
            _ => return false,
        };
        match std::fs::metadata(path) {
            Ok(meta) => {
                meta.len() != snapshot.len || meta.modified().ok() != snapshot.mtime
            }
            Err(_) => true,
        }
    }
}

impl std::fmt::Debug for SourceView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let origin = match &self.backing {
            Backing::Mapped { .. } => "mapped",
            Backing::Owned(_) => "owned",
            Backing::Borrowed { .. } => "borrowed",
        };
        f.debug_struct("SourceView")
            .field("origin", &origin)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_open_missing_file_is_cannot_open() {
        let err = SourceView::open("/definitely/not/here.csv").unwrap_err();
        assert!(matches!(err, EngineError::CannotOpen { .. }));
    }

    #[test]
    fn test_open_reads_file_bytes() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"a,b\n1,2\n").unwrap();
        tmp.flush().unwrap();

        let view = SourceView::open(tmp.path()).unwrap();
        assert_eq!(view.bytes(), b"a,b\n1,2\n");
        assert_eq!(view.len(), 8);
        assert!(!view.modified_since_open());
    }

    #[test]
    fn test_modified_since_open_detects_size_change() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"a,b\n").unwrap();
        tmp.flush().unwrap();

        let view = SourceView::open(tmp.path()).unwrap();
        tmp.write_all(b"more,data\n").unwrap();
        tmp.flush().unwrap();
        assert!(view.modified_since_open());
    }

    #[test]
    fn test_owned_origin() {
        let view = SourceView::from_owned(b"x,y\n".to_vec()).unwrap();
        assert_eq!(view.bytes(), b"x,y\n");
        assert!(!view.modified_since_open());
    }

    #[test]
    fn test_borrowed_origin_is_zero_copy() {
        let buf = b"p,q\n1,2\n".to_vec();
        let view = unsafe { SourceView::from_raw_parts(buf.as_ptr(), buf.len()) }.unwrap();
        assert_eq!(view.bytes().as_ptr(), buf.as_ptr());
        assert_eq!(view.bytes(), &buf[..]);
    }

    #[test]
    fn test_empty_borrowed_buffer() {
        let view = unsafe { SourceView::from_raw_parts(std::ptr::null(), 0) }.unwrap();
        assert!(view.is_empty());
        assert_eq!(view.bytes(), b"");
    }
}
