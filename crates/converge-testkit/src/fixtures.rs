//! Builders for the common test objects, so scenario tests read as intent
//! rather than struct-literal boilerplate.

use chrono::Utc;
use converge_schemas::{Intent, IntentStatus, OriginType, RiskLevel};

pub struct IntentBuilder {
    intent: Intent,
}

impl IntentBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        IntentBuilder {
            intent: Intent {
                id: id.into(),
                source: "feature/x".to_string(),
                target: "main".to_string(),
                status: IntentStatus::Ready,
                created_at: now,
                created_by: "agent-1".to_string(),
                risk_level: RiskLevel::Low,
                priority: 100,
                semantic: serde_json::json!({}),
                technical: serde_json::json!({}),
                checks_required: vec![],
                dependencies: vec![],
                retries: 0,
                tenant_id: None,
                plan_id: None,
                origin_type: OriginType::Agent,
                updated_at: now,
            },
        }
    }

    pub fn status(mut self, status: IntentStatus) -> Self {
        self.intent.status = status;
        self
    }

    pub fn risk_level(mut self, level: RiskLevel) -> Self {
        self.intent.risk_level = level;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.intent.priority = priority;
        self
    }

    pub fn dependencies(mut self, deps: Vec<String>) -> Self {
        self.intent.dependencies = deps;
        self
    }

    pub fn checks_required(mut self, checks: Vec<String>) -> Self {
        self.intent.checks_required = checks;
        self
    }

    pub fn source_target(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.intent.source = source.into();
        self.intent.target = target.into();
        self
    }

    pub fn technical(mut self, value: serde_json::Value) -> Self {
        self.intent.technical = value;
        self
    }

    pub fn build(self) -> Intent {
        self.intent
    }
}
