//! Data model shared by every component: events, intents, review tasks,
//! security findings, commit links, embeddings, and policy documents.
//!
//! This crate is dependency-free apart from serde/chrono and carries no
//! behavior; it exists so every other crate can agree on wire shapes
//! without pulling in storage or validation logic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An immutable, append-only log entry. Once written, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: String,
    pub trace_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub intent_id: Option<String>,
    pub agent_id: Option<String>,
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub evidence: Value,
}

/// Fields accepted when appending; `id`/`trace_id`/`timestamp` are filled
/// in by the log if absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewEvent {
    pub id: Option<String>,
    pub trace_id: Option<String>,
    pub event_type: String,
    pub intent_id: Option<String>,
    pub agent_id: Option<String>,
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub evidence: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IntentStatus {
    Ready,
    Validated,
    Queued,
    Merged,
    Rejected,
}

impl IntentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, IntentStatus::Merged | IntentStatus::Rejected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Ready => "READY",
            IntentStatus::Validated => "VALIDATED",
            IntentStatus::Queued => "QUEUED",
            IntentStatus::Merged => "MERGED",
            IntentStatus::Rejected => "REJECTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "READY" => Some(Self::Ready),
            "VALIDATED" => Some(Self::Validated),
            "QUEUED" => Some(Self::Queued),
            "MERGED" => Some(Self::Merged),
            "REJECTED" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginType {
    Human,
    Agent,
    Integration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub id: String,
    pub source: String,
    pub target: String,
    pub status: IntentStatus,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub risk_level: RiskLevel,
    pub priority: i32,
    #[serde(default)]
    pub semantic: Value,
    #[serde(default)]
    pub technical: Value,
    #[serde(default)]
    pub checks_required: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub retries: u32,
    pub tenant_id: Option<String>,
    pub plan_id: Option<String>,
    pub origin_type: OriginType,
    pub updated_at: DateTime<Utc>,
}

impl Intent {
    /// `"<owner>/<repo>:pr-<n>"` or `"<owner>/<repo>:mg-<first-12-of-sha>"`.
    pub fn webhook_id_pr(owner: &str, repo: &str, pr_number: u64) -> String {
        format!("{owner}/{repo}:pr-{pr_number}")
    }

    pub fn webhook_id_push(owner: &str, repo: &str, sha: &str) -> String {
        let short = &sha[..sha.len().min(12)];
        format!("{owner}/{repo}:mg-{short}")
    }

    pub fn technical_repo(&self) -> Option<&str> {
        self.technical.get("repo").and_then(Value::as_str)
    }

    pub fn scope_hint(&self) -> Option<&str> {
        self.technical.get("scope_hint").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Assigned,
    InReview,
    Escalated,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewTrigger {
    Policy,
    Conflict,
    Coherence,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewResolution {
    Approved,
    Rejected,
    Deferred,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewTask {
    pub id: String,
    pub intent_id: String,
    pub status: ReviewStatus,
    pub reviewer: Option<String>,
    pub priority: i32,
    pub risk_level: RiskLevel,
    pub trigger: ReviewTrigger,
    pub sla_deadline: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolution: Option<ReviewResolution>,
}

impl ReviewTask {
    /// low→72h, medium→48h, high→24h, critical→8h.
    pub fn sla_hours(risk_level: RiskLevel) -> i64 {
        match risk_level {
            RiskLevel::Low => 72,
            RiskLevel::Medium => 48,
            RiskLevel::High => 24,
            RiskLevel::Critical => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityCategory {
    Sast,
    Sca,
    Secrets,
    Iac,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecuritySeverity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityFinding {
    pub id: String,
    pub scanner: String,
    pub category: SecurityCategory,
    pub severity: SecuritySeverity,
    pub file: String,
    pub line: Option<u32>,
    pub rule: String,
    pub evidence: String,
    pub confidence: Option<f64>,
    pub intent_id: Option<String>,
    pub tenant_id: Option<String>,
    pub scan_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitRole {
    Head,
    Base,
    Merge,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitLink {
    pub intent_id: String,
    pub repo: String,
    pub sha: String,
    pub role: CommitRole,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub intent_id: String,
    pub model: String,
    pub dimension: u32,
    pub checksum: String,
    pub vector: Vec<f32>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPolicy {
    pub agent_id: String,
    pub tenant_id: String,
    pub rules: Value,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskPolicy {
    pub tenant_id: String,
    pub version: u32,
    pub thresholds: Value,
    pub mode: String,
    pub enforce_ratio: f64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceThresholds {
    pub tenant_id: String,
    pub thresholds: Value,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeOverride {
    pub tenant_id: String,
    pub mode: String,
    pub set_by: String,
    pub set_at: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueLock {
    pub lock_name: String,
    pub holder_pid: i64,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub delivery_id: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    pub event_type: Option<String>,
    pub intent_id: Option<String>,
    pub agent_id: Option<String>,
    pub tenant_id: Option<String>,
    pub trace_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

impl EventFilter {
    pub fn effective_limit(&self) -> u32 {
        self.limit.unwrap_or(200)
    }
}
