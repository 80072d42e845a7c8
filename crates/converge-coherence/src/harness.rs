use std::collections::HashMap;
use std::process::Command;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::assertion::evaluate_assertion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
}

impl Severity {
    fn penalty(self) -> f64 {
        match self {
            Severity::Critical => 30.0,
            Severity::High => 20.0,
            Severity::Medium => 10.0,
        }
    }
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoherenceQuestion {
    pub id: String,
    pub question: String,
    pub check: String,
    pub assertion: String,
    pub severity: Severity,
    pub category: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    pub version: String,
    pub questions: Vec<CoherenceQuestion>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestionOutcome {
    pub question_id: String,
    pub passed: bool,
    pub result: Option<f64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoherenceReport {
    pub score: f64,
    pub verdict: Verdict,
    pub outcomes: Vec<QuestionOutcome>,
    pub annotations: Vec<String>,
}

pub const CHECK_TIMEOUT: Duration = Duration::from_secs(60);
pub const PASS_THRESHOLD: f64 = 75.0;
pub const WARN_THRESHOLD: f64 = 60.0;

/// An external boundary so tests can swap in a fake runner instead of
/// spawning real shell commands.
pub trait CommandRunner: Send + Sync {
    fn run(&self, command: &str, timeout: Duration) -> Result<String>;
}

pub struct ShellCommandRunner;

impl CommandRunner for ShellCommandRunner {
    fn run(&self, command: &str, timeout: Duration) -> Result<String> {
        let start = Instant::now();
        let mut child = Command::new("sh").arg("-c").arg(command).stdout(std::process::Stdio::piped()).spawn()?;

        loop {
            if let Some(status) = child.try_wait()? {
                let mut stdout = String::new();
                use std::io::Read;
                if let Some(mut out) = child.stdout.take() {
                    out.read_to_string(&mut stdout)?;
                }
                if !status.success() {
                    return Err(anyhow!("command exited with {status}"));
                }
                return Ok(stdout);
            }
            if start.elapsed() > timeout {
                let _ = child.kill();
                return Err(anyhow!("command timed out after {:?}", timeout));
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }
}

fn parse_last_line_as_float(stdout: &str) -> Result<f64> {
    let last = stdout
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| anyhow!("no output produced"))?;
    last.trim()
        .parse::<f64>()
        .map_err(|e| anyhow!("could not parse '{last}' as a number: {e}"))
}

pub fn evaluate_coherence(
    config: &HarnessConfig,
    runner: &dyn CommandRunner,
    baselines: &HashMap<String, f64>,
) -> CoherenceReport {
    let mut outcomes = Vec::new();
    let mut penalty_sum = 0.0;

    for q in &config.questions {
        if !q.enabled {
            continue;
        }

        let baseline = baselines.get(&q.id).copied();
        match runner.run(&q.check, CHECK_TIMEOUT).and_then(|out| parse_last_line_as_float(&out)) {
            Ok(result) => {
                let passed = evaluate_assertion(&q.assertion, result, baseline);
                if !passed {
                    penalty_sum += q.severity.penalty();
                }
                outcomes.push(QuestionOutcome {
                    question_id: q.id.clone(),
                    passed,
                    result: Some(result),
                    error: None,
                });
            }
            Err(e) => {
                // A check that cannot even produce a number fails its
                // question outright; conservative-pass only applies to
                // assertion parsing, not to check execution.
                penalty_sum += q.severity.penalty();
                outcomes.push(QuestionOutcome {
                    question_id: q.id.clone(),
                    passed: false,
                    result: None,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    let score = (100.0 - penalty_sum).clamp(0.0, 100.0);
    let verdict = if score >= PASS_THRESHOLD {
        Verdict::Pass
    } else if score >= WARN_THRESHOLD {
        Verdict::Warn
    } else {
        Verdict::Fail
    };

    CoherenceReport {
        score,
        verdict,
        outcomes,
        annotations: Vec::new(),
    }
}

/// Cross-validation against a risk evaluation, run after the fact.
pub fn cross_validate(
    config: &HarnessConfig,
    report: &CoherenceReport,
    risk_score: f64,
    bombs_detected: bool,
    propagation_score: f64,
) -> Vec<String> {
    let mut annotations = Vec::new();

    if report.score > 75.0 && risk_score > 50.0 {
        annotations.push("score_mismatch".to_string());
    }
    if report.outcomes.iter().all(|o| o.passed) && bombs_detected {
        annotations.push("bomb_undetected".to_string());
    }
    let has_scope_category = config.questions.iter().any(|q| q.category == "scope");
    if propagation_score > 40.0 && !has_scope_category {
        annotations.push("missing_scope_validation".to_string());
    }

    annotations
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeRunner(f64);
    impl CommandRunner for FakeRunner {
        fn run(&self, _command: &str, _timeout: Duration) -> Result<String> {
            Ok(format!("{}", self.0))
        }
    }

    fn sample_config() -> HarnessConfig {
        HarnessConfig {
            version: "1".to_string(),
            questions: vec![CoherenceQuestion {
                id: "q1".to_string(),
                question: "is the test suite stable?".to_string(),
                check: "echo 10".to_string(),
                assertion: "result >= baseline".to_string(),
                severity: Severity::High,
                category: "stability".to_string(),
                enabled: true,
            }],
        }
    }

    #[test]
    fn missing_baseline_is_first_run_tolerant() {
        let config = sample_config();
        let runner = FakeRunner(5.0);
        let report = evaluate_coherence(&config, &runner, &HashMap::new());
        assert_eq!(report.verdict, Verdict::Pass);
        assert_eq!(report.score, 100.0);
    }

    #[test]
    fn failing_question_applies_severity_penalty() {
        let config = sample_config();
        let runner = FakeRunner(1.0);
        let mut baselines = HashMap::new();
        baselines.insert("q1".to_string(), 10.0);
        let report = evaluate_coherence(&config, &runner, &baselines);
        assert_eq!(report.score, 80.0);
        assert_eq!(report.verdict, Verdict::Pass);
    }

    #[test]
    fn cross_validation_flags_bomb_undetected() {
        let config = sample_config();
        let runner = FakeRunner(20.0);
        let mut baselines = HashMap::new();
        baselines.insert("q1".to_string(), 10.0);
        let report = evaluate_coherence(&config, &runner, &baselines);
        let annotations = cross_validate(&config, &report, 10.0, true, 10.0);
        assert!(annotations.contains(&"bomb_undetected".to_string()));
    }
}
