//! The check-running boundary: validation step 2 needs to run named CI
//! checks without the pipeline itself caring whether that means spawning
//! a subprocess, calling a CI API, or (in tests) returning a canned
//! result. Mirrors the `CommandRunner` split used for the coherence
//! harness.

use std::process::Command;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

pub const CHECK_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub passed: bool,
    pub details: String,
    pub duration: Duration,
}

pub trait CheckRunner: Send + Sync {
    fn run_check(&self, name: &str) -> Result<CheckOutcome>;
}

/// Invokes `name` as a shell command; the exit status is the verdict and
/// captured stdout is the detail string. The command a check name maps to
/// is left to the caller's environment (a Makefile target, a CI script).
pub struct SubprocessCheckRunner;

impl CheckRunner for SubprocessCheckRunner {
    fn run_check(&self, name: &str) -> Result<CheckOutcome> {
        let start = Instant::now();
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(name)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()?;

        loop {
            if let Some(status) = child.try_wait()? {
                let mut stdout = String::new();
                use std::io::Read;
                if let Some(mut out) = child.stdout.take() {
                    out.read_to_string(&mut stdout)?;
                }
                return Ok(CheckOutcome {
                    passed: status.success(),
                    details: stdout,
                    duration: start.elapsed(),
                });
            }
            if start.elapsed() > CHECK_TIMEOUT {
                let _ = child.kill();
                return Err(anyhow!("check '{name}' timed out after {:?}", CHECK_TIMEOUT));
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }
}

/// A fixed-table double for tests: checks not present in the table fail
/// closed rather than panicking, since a missing required check should
/// never be silently treated as passing.
#[derive(Default)]
pub struct FixedCheckRunner {
    pub results: std::collections::HashMap<String, bool>,
}

impl FixedCheckRunner {
    pub fn new() -> Self {
        FixedCheckRunner {
            results: std::collections::HashMap::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, passed: bool) -> Self {
        self.results.insert(name.into(), passed);
        self
    }
}

impl CheckRunner for FixedCheckRunner {
    fn run_check(&self, name: &str) -> Result<CheckOutcome> {
        let passed = self.results.get(name).copied().unwrap_or(false);
        Ok(CheckOutcome {
            passed,
            details: format!("fixed result for '{name}'"),
            duration: Duration::from_millis(0),
        })
    }
}
