//! Bounded cache for unescaped field values.
//!
//! Unquoted fields are never cached; the host slices them straight out of
//! the source view. Quoted fields get an owned unescaped copy on first
//! access, accounted against a soft and a hard byte limit. Crossing the
//! soft limit is observable so the host can warn; crossing the hard limit
//! refuses further insertions while keeping existing entries. The cache is
//! per parser instance.

use std::collections::HashMap;

use log::warn;

/// Default soft limit: 256 MiB.
pub const DEFAULT_SOFT_LIMIT: usize = 256 * 1024 * 1024;
/// Default hard limit: 1 GiB.
pub const DEFAULT_HARD_LIMIT: usize = 1024 * 1024 * 1024;

/// Observable cache pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CacheStatus {
    Ok = 0,
    SoftLimitExceeded = 1,
    HardLimitExceeded = 2,
}

/// `(row, column) → owned unescaped bytes`, bounded by byte limits.
#[derive(Debug)]
pub struct FieldCache {
    entries: HashMap<(u64, u32), Box<[u8]>>,
    used_bytes: usize,
    soft_limit: usize,
    hard_limit: usize,
    hard_refused: bool,
    soft_warned: bool,
}

impl FieldCache {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            used_bytes: 0,
            soft_limit: DEFAULT_SOFT_LIMIT,
            hard_limit: DEFAULT_HARD_LIMIT,
            hard_refused: false,
            soft_warned: false,
        }
    }

    /// Bytes currently owned by cached values.
    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    pub fn status(&self) -> CacheStatus {
        if self.hard_refused {
            CacheStatus::HardLimitExceeded
        } else if self.used_bytes > self.soft_limit {
            CacheStatus::SoftLimitExceeded
        } else {
            CacheStatus::Ok
        }
    }

    pub fn set_soft_limit(&mut self, bytes: usize) {
        self.soft_limit = bytes;
        self.soft_warned = false;
    }

    pub fn set_hard_limit(&mut self, bytes: usize) {
        self.hard_limit = bytes;
    }

    /// Fetch the cached value for `(row, col)`, materializing it with
    /// `build` on first access. Returns `None` when the hard limit refuses
    /// the insertion; the caller then slices the raw bytes itself.
    pub fn get_or_insert_with(
        &mut self,
        row: u64,
        col: u32,
        build: impl FnOnce() -> Vec<u8>,
    ) -> Option<&[u8]> {
        let key = (row, col);
        if self.entries.contains_key(&key) {
            return self.entries.get(&key).map(|v| &**v);
        }

        let value = build();
        if self.used_bytes + value.len() > self.hard_limit {
            self.hard_refused = true;
            return None;
        }
        self.used_bytes += value.len();
        if self.used_bytes > self.soft_limit && !self.soft_warned {
            warn!(
                "field cache exceeded soft limit ({} of {} bytes)",
                self.used_bytes, self.soft_limit
            );
            self.soft_warned = true;
        }
        self.entries.insert(key, value.into_boxed_slice());
        self.entries.get(&key).map(|v| &**v)
    }

    /// Drop all entries and reset accounting and status.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.used_bytes = 0;
        self.hard_refused = false;
        self.soft_warned = false;
    }
}

impl Default for FieldCache {
    fn default() -> Self {
        Self::new()
    }
}
