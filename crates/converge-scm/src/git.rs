//! A real `ScmPort` backed by the `git` CLI. Simulation uses `git
//! merge-tree`, which computes a merge result without touching the
//! working tree or index, matching the port's purity requirement;
//! execution performs a real merge commit against `cwd`.

use std::path::PathBuf;
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};

use crate::{CommitLogEntry, ScmPort, Simulation};

pub struct GitCliScm {
    repo_path: PathBuf,
}

impl GitCliScm {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        GitCliScm {
            repo_path: repo_path.into(),
        }
    }

    fn git(&self, args: &[&str]) -> Result<String> {
        let out = Command::new("git")
            .arg("-C")
            .arg(&self.repo_path)
            .args(args)
            .output()
            .with_context(|| format!("spawn git {args:?}"))?;
        if !out.status.success() {
            return Err(anyhow!(
                "git {args:?} failed: {}",
                String::from_utf8_lossy(&out.stderr)
            ));
        }
        Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
    }

    fn rev_parse(&self, refname: &str) -> Result<String> {
        self.git(&["rev-parse", refname])
    }
}

impl ScmPort for GitCliScm {
    fn simulate_merge(&self, source: &str, target: &str) -> Result<Simulation> {
        let source_sha = self.rev_parse(source)?;
        let target_sha = self.rev_parse(target)?;

        let files_changed_raw = self.git(&["diff", "--name-only", &format!("{target_sha}...{source_sha}")])?;
        let files_changed: Vec<String> = files_changed_raw
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();

        let merge_tree_out = Command::new("git")
            .arg("-C")
            .arg(&self.repo_path)
            .args(["merge-tree", "--write-tree", &target_sha, &source_sha])
            .output()
            .context("spawn git merge-tree")?;

        if merge_tree_out.status.success() {
            Ok(Simulation {
                mergeable: true,
                conflicts: Vec::new(),
                files_changed,
            })
        } else {
            let conflicts = parse_conflicted_paths(&String::from_utf8_lossy(&merge_tree_out.stdout));
            Ok(Simulation {
                mergeable: false,
                conflicts,
                files_changed,
            })
        }
    }

    fn execute_merge(&self, source: &str, target: &str) -> Result<String> {
        self.git(&["checkout", target])?;
        self.git(&[
            "merge",
            "--no-ff",
            "-m",
            &format!("merge: {source} -> {target}"),
            source,
        ])?;
        self.rev_parse("HEAD")
    }

    fn log_entries(&self, max_commits: usize) -> Result<Vec<CommitLogEntry>> {
        let format = "%H%x1f%an%x1f%aI";
        let raw = self.git(&[
            "log",
            &format!("-n{max_commits}"),
            &format!("--pretty=format:{format}"),
        ])?;

        let mut entries = Vec::new();
        for line in raw.lines().filter(|l| !l.is_empty()) {
            let mut parts = line.split('\x1f');
            let sha = parts.next().unwrap_or_default().to_string();
            let author = parts.next().unwrap_or_default().to_string();
            let timestamp: DateTime<Utc> = parts
                .next()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(Utc::now);

            let files_raw = self.git(&["show", "--name-only", "--pretty=format:", &sha])?;
            let files = files_raw.lines().filter(|l| !l.is_empty()).map(str::to_string).collect();

            entries.push(CommitLogEntry {
                sha,
                author,
                files,
                timestamp,
            });
        }
        Ok(entries)
    }
}

fn parse_conflicted_paths(merge_tree_stdout: &str) -> Vec<String> {
    merge_tree_stdout
        .lines()
        .filter_map(|l| l.strip_prefix("CONFLICT ("))
        .filter_map(|l| l.rsplit_once("): ").map(|(_, path)| path.trim().to_string()))
        .collect()
}
