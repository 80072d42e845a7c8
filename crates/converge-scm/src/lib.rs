//! The SCM port: version control is modeled as an interface the engine
//! depends on, never a concrete VCS. `InMemoryScm` is a deterministic test
//! double, in the same spirit as a paper trading venue standing in for a
//! real broker — no randomness, no timestamps in its decision logic.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod git;
pub use git::GitCliScm;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Simulation {
    pub mergeable: bool,
    pub conflicts: Vec<String>,
    pub files_changed: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitLogEntry {
    pub sha: String,
    pub author: String,
    pub files: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Simulation must be pure (no working-tree mutation); execution must be
/// atomic (either the target ref advances or the call fails cleanly).
pub trait ScmPort: Send + Sync {
    fn simulate_merge(&self, source: &str, target: &str) -> Result<Simulation>;
    fn execute_merge(&self, source: &str, target: &str) -> Result<String>;
    fn log_entries(&self, max_commits: usize) -> Result<Vec<CommitLogEntry>>;
}

#[derive(Debug, Clone, Default)]
struct Branch {
    files: BTreeSet<String>,
    head_sha: Option<String>,
}

/// An in-memory repository model: branches are sets of changed files.
/// Two branches conflict if they touch any file in common and neither is
/// an ancestor of the other (approximated here as "both modified it").
pub struct InMemoryScm {
    inner: Mutex<InMemoryScmState>,
}

struct InMemoryScmState {
    branches: BTreeMap<String, Branch>,
    commits: Vec<CommitLogEntry>,
    merge_cache: BTreeMap<(String, String), String>,
    seq: u64,
}

impl InMemoryScm {
    pub fn new() -> Self {
        InMemoryScm {
            inner: Mutex::new(InMemoryScmState {
                branches: BTreeMap::new(),
                commits: Vec::new(),
                merge_cache: BTreeMap::new(),
                seq: 0,
            }),
        }
    }

    /// Test/demo setup: declare that `branch` touches `files`.
    pub fn set_branch_files(&self, branch: &str, files: &[&str]) {
        let mut st = self.inner.lock().expect("scm state poisoned");
        let b = st.branches.entry(branch.to_string()).or_default();
        b.files = files.iter().map(|s| s.to_string()).collect();
    }

    fn deterministic_sha(seq: u64, source: &str, target: &str) -> String {
        format!("merge:{source}->{target}:{seq:08x}")
    }
}

impl Default for InMemoryScm {
    fn default() -> Self {
        Self::new()
    }
}

impl ScmPort for InMemoryScm {
    fn simulate_merge(&self, source: &str, target: &str) -> Result<Simulation> {
        let st = self.inner.lock().expect("scm state poisoned");
        let source_branch = st.branches.get(source).cloned().unwrap_or_default();
        let target_branch = st.branches.get(target).cloned().unwrap_or_default();

        let conflicts: Vec<String> = source_branch
            .files
            .intersection(&target_branch.files)
            .cloned()
            .collect();

        let mut files_changed: Vec<String> = source_branch.files.into_iter().collect();
        files_changed.sort();

        Ok(Simulation {
            mergeable: conflicts.is_empty(),
            conflicts,
            files_changed,
        })
    }

    fn execute_merge(&self, source: &str, target: &str) -> Result<String> {
        let mut st = self.inner.lock().expect("scm state poisoned");

        let key = (source.to_string(), target.to_string());
        if let Some(existing) = st.merge_cache.get(&key) {
            return Ok(existing.clone());
        }

        let source_branch = st.branches.get(source).cloned().unwrap_or_default();
        let target_branch_files = st
            .branches
            .get(target)
            .map(|b| b.files.clone())
            .unwrap_or_default();

        let conflicts: Vec<String> = source_branch
            .files
            .intersection(&target_branch_files)
            .cloned()
            .collect();
        if !conflicts.is_empty() {
            return Err(anyhow!("merge conflict on files: {}", conflicts.join(", ")));
        }

        st.seq += 1;
        let seq = st.seq;
        let sha = Self::deterministic_sha(seq, source, target);

        let merged_files: BTreeSet<String> = target_branch_files
            .union(&source_branch.files)
            .cloned()
            .collect();
        let files_vec: Vec<String> = merged_files.iter().cloned().collect();

        let entry = st.branches.entry(target.to_string()).or_default();
        entry.files = merged_files;
        entry.head_sha = Some(sha.clone());

        st.commits.push(CommitLogEntry {
            sha: sha.clone(),
            author: "converge-scm".to_string(),
            files: files_vec,
            timestamp: Utc::now(),
        });
        st.merge_cache.insert(key, sha.clone());

        Ok(sha)
    }

    fn log_entries(&self, max_commits: usize) -> Result<Vec<CommitLogEntry>> {
        let st = self.inner.lock().expect("scm state poisoned");
        Ok(st.commits.iter().rev().take(max_commits).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_merge_is_mergeable() {
        let scm = InMemoryScm::new();
        scm.set_branch_files("feature/clean", &["src/a.rs"]);
        scm.set_branch_files("main", &[]);
        let sim = scm.simulate_merge("feature/clean", "main").unwrap();
        assert!(sim.mergeable);
        assert!(sim.conflicts.is_empty());
    }

    #[test]
    fn overlapping_files_conflict() {
        let scm = InMemoryScm::new();
        scm.set_branch_files("feature/a", &["src/shared.rs"]);
        scm.set_branch_files("main", &["src/shared.rs"]);
        let sim = scm.simulate_merge("feature/a", "main").unwrap();
        assert!(!sim.mergeable);
        assert_eq!(sim.conflicts, vec!["src/shared.rs".to_string()]);
    }

    #[test]
    fn execute_merge_is_idempotent_for_same_pair() {
        let scm = InMemoryScm::new();
        scm.set_branch_files("feature/clean", &["src/a.rs"]);
        let sha1 = scm.execute_merge("feature/clean", "main").unwrap();
        let sha2 = scm.execute_merge("feature/clean", "main").unwrap();
        assert_eq!(sha1, sha2);
    }

    #[test]
    fn execute_merge_fails_cleanly_on_conflict() {
        let scm = InMemoryScm::new();
        scm.set_branch_files("feature/a", &["src/shared.rs"]);
        scm.set_branch_files("main", &["src/shared.rs"]);
        assert!(scm.execute_merge("feature/a", "main").is_err());
    }
}
