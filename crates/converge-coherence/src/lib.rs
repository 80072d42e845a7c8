pub mod assertion;
pub mod harness;

pub use assertion::evaluate_assertion;
pub use harness::{
    cross_validate, evaluate_coherence, CoherenceQuestion, CoherenceReport, CommandRunner,
    HarnessConfig, QuestionOutcome, Severity, ShellCommandRunner, Verdict, CHECK_TIMEOUT,
    PASS_THRESHOLD, WARN_THRESHOLD,
};

use std::path::Path;

use anyhow::Result;
use converge_config::COHERENCE_HARNESS_CONFIG_PATH;

pub fn load_harness_config(explicit: Option<&Path>) -> Result<Option<HarnessConfig>> {
    let path = explicit
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| std::path::PathBuf::from(COHERENCE_HARNESS_CONFIG_PATH));
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(&path)?;
    let config: HarnessConfig = serde_json::from_str(&raw)?;
    Ok(Some(config))
}
