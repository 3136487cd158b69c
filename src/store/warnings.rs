use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

const DEFAULT_CAPACITY: usize = 1024;

/// Remembers which descriptor paths were already reported as unreadable so
/// a broken file is logged once rather than on every discovery pass.
///
/// The set is bounded: once full, the oldest entry is forgotten and may be
/// reported again.
#[derive(Debug)]
pub struct WarnOnce {
    seen: HashSet<PathBuf>,
    order: VecDeque<PathBuf>,
    capacity: usize,
}

impl Default for WarnOnce {
    fn default() -> Self {
        Self::new()
    }
}

impl WarnOnce {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Returns true the first time a path is offered.
    pub fn first_time(&mut self, path: &Path) -> bool {
        if self.seen.contains(path) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(path.to_path_buf());
        self.order.push_back(path.to_path_buf());
        true
    }

    /// Forget a path that has become readable again, so a later breakage is
    /// reported.
    pub fn clear(&mut self, path: &Path) {
        if self.seen.remove(path) {
            self.order.retain(|p| p != path);
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
