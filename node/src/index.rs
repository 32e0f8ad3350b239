//! File index: the master/copy catalog and the two cache-consistency
//! state machines layered on top of it.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ConsistencyMode {
    Push,
    Pull,
}

impl std::fmt::Display for ConsistencyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsistencyMode::Push => write!(f, "push"),
            ConsistencyMode::Pull => write!(f, "pull"),
        }
    }
}

/// Cache-coherence metadata for one filename (spec.md §3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub origin_server: u32,
    pub version: i32,
    pub master_version: i32,
    /// Pull-mode only; unused (and meaningless) for master entries and in
    /// push mode, where validity is derived from `version == master_version`.
    pub is_valid: bool,
    pub ttr: u32,
    pub last_valid_time: i64,
    pub did_query: bool,
}

impl FileInfo {
    fn new_master(name: String, my_id: u32) -> Self {
        Self {
            name,
            origin_server: my_id,
            version: 0,
            master_version: 0,
            is_valid: true,
            ttr: 0,
            last_valid_time: now_secs(),
            did_query: false,
        }
    }

    fn new_copy(name: String, origin_server: u32, version: i32, ttr: u32) -> Self {
        Self {
            name,
            origin_server,
            version,
            master_version: version,
            is_valid: true,
            ttr,
            last_valid_time: now_secs(),
            did_query: false,
        }
    }

    /// Serving predicate from `searchFile` (spec.md §4.4): whether this
    /// entry may satisfy a QUERY_FILE_LOCATION.
    pub fn is_serving(&self, mode: ConsistencyMode) -> bool {
        match mode {
            ConsistencyMode::Push => self.version == self.master_version,
            ConsistencyMode::Pull => self.is_valid,
        }
    }
}

pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs() as i64
}

#[derive(Default)]
pub struct FileIndex {
    master: HashMap<String, FileInfo>,
    copy: HashMap<String, FileInfo>,
}

impl FileIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_master(&mut self, name: String, my_id: u32) {
        self.master
            .entry(name.clone())
            .or_insert_with(|| FileInfo::new_master(name, my_id));
    }

    pub fn add_copy(&mut self, name: String, origin_server: u32, version: i32, ttr: u32) {
        self.copy
            .insert(name.clone(), FileInfo::new_copy(name, origin_server, version, ttr));
    }

    pub fn master(&self, name: &str) -> Option<&FileInfo> {
        self.master.get(name)
    }

    pub fn master_mut(&mut self, name: &str) -> Option<&mut FileInfo> {
        self.master.get_mut(name)
    }

    pub fn copy(&self, name: &str) -> Option<&FileInfo> {
        self.copy.get(name)
    }

    pub fn copy_mut(&mut self, name: &str) -> Option<&mut FileInfo> {
        self.copy.get_mut(name)
    }

    pub fn masters(&self) -> impl Iterator<Item = &FileInfo> {
        self.master.values()
    }

    pub fn copies(&self) -> impl Iterator<Item = &FileInfo> {
        self.copy.values()
    }

    pub fn copies_mut(&mut self) -> impl Iterator<Item = &mut FileInfo> {
        self.copy.values_mut()
    }

    /// `searchFile`: true if served by the master index (refreshing its
    /// `last_valid_time`) or by a copy entry passing the serving predicate.
    pub fn search_file(&mut self, name: &str, mode: ConsistencyMode) -> bool {
        if let Some(info) = self.master.get_mut(name) {
            info.last_valid_time = now_secs();
            return true;
        }
        self.copy.get(name).is_some_and(|info| info.is_serving(mode))
    }

    /// Every copy entry whose `lastValidTime + ttr <= now` and not already
    /// querying: marks `did_query = true` and returns `(filename,
    /// origin_server)` pairs to emit QUERY_VALID for.
    pub fn due_for_ttr_check(&mut self, now: i64) -> Vec<(String, u32)> {
        let mut due = Vec::new();
        for info in self.copy.values_mut() {
            if !info.did_query && info.last_valid_time + info.ttr as i64 <= now {
                info.did_query = true;
                due.push((info.name.clone(), info.origin_server));
            }
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn master_entries_are_always_served() {
        let mut idx = FileIndex::new();
        idx.add_master("x".to_string(), 1);
        assert!(idx.search_file("x", ConsistencyMode::Push));
        assert_eq!(idx.master("x").unwrap().origin_server, 1);
        assert_eq!(idx.master("x").unwrap().version, 0);
    }

    #[test]
    fn push_mode_serves_only_matching_version() {
        let mut idx = FileIndex::new();
        idx.add_copy("z".to_string(), 1, 0, 0);
        assert!(idx.search_file("z", ConsistencyMode::Push));
        idx.copy_mut("z").unwrap().master_version = 1;
        assert!(!idx.search_file("z", ConsistencyMode::Push));
    }

    #[test]
    fn pull_mode_serves_by_is_valid_flag() {
        let mut idx = FileIndex::new();
        idx.add_copy("z".to_string(), 1, 0, 5);
        assert!(idx.search_file("z", ConsistencyMode::Pull));
        idx.copy_mut("z").unwrap().is_valid = false;
        assert!(!idx.search_file("z", ConsistencyMode::Pull));
    }

    #[test]
    fn ttr_check_fires_once_until_response_clears_did_query() {
        let mut idx = FileIndex::new();
        idx.add_copy("z".to_string(), 1, 0, 0);
        idx.copy_mut("z").unwrap().last_valid_time = 0;
        let due = idx.due_for_ttr_check(100);
        assert_eq!(due, vec![("z".to_string(), 1)]);
        // did_query now true, so a second check before any response is a no-op
        assert!(idx.due_for_ttr_check(200).is_empty());
    }

    #[test]
    fn unknown_file_is_not_served() {
        let mut idx = FileIndex::new();
        assert!(!idx.search_file("missing", ConsistencyMode::Push));
    }
}
