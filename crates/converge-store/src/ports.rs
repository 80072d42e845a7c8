//! Each port models one narrow responsibility (events, intents, locks,
//! reviews, deliveries, policy documents, embeddings, chain state).
//! `Store` composes them by trait bound, not inheritance, so a backend
//! only has to implement the ports it actually needs and tests can swap
//! in an in-memory type that implements every port without a base class.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use converge_eventlog::ChainState;
use converge_schemas::{
    AgentPolicy, ComplianceThresholds, Event, EventFilter, EmbeddingRecord, CommitLink,
    IntakeOverride, Intent, IntentStatus, NewEvent, ReviewTask, RiskPolicy, SecurityFinding,
};

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append(&self, event: NewEvent) -> Result<Event>;
    async fn query(&self, filter: &EventFilter) -> Result<Vec<Event>>;
    async fn count(&self, filter: &EventFilter) -> Result<u64>;
    async fn prune_events(&self, before: DateTime<Utc>, tenant_id: Option<&str>, dry_run: bool) -> Result<u64>;
}

#[async_trait]
pub trait ChainStateStore: Send + Sync {
    async fn load_chain_state(&self, chain_id: &str) -> Result<Option<ChainState>>;
    async fn save_chain_state(&self, state: &ChainState) -> Result<()>;
}

#[async_trait]
pub trait IntentStore: Send + Sync {
    async fn upsert_intent(&self, intent: &Intent) -> Result<()>;
    async fn get_intent(&self, id: &str) -> Result<Option<Intent>>;
    async fn list_by_status(&self, status: IntentStatus, tenant_id: Option<&str>) -> Result<Vec<Intent>>;
    /// Ordered `(priority ASC, created_at ASC)`, the order the queue
    /// processor must observe.
    async fn list_validated_for_queue(&self, limit: u32, tenant_id: Option<&str>) -> Result<Vec<Intent>>;
}

#[async_trait]
pub trait LockStore: Send + Sync {
    /// Deletes stale rows for `lock_name`, then attempts a unique insert.
    async fn acquire_queue_lock(&self, lock_name: &str, holder_pid: i64, ttl_seconds: i64) -> Result<bool>;
    /// Only releases when `holder_pid` matches the current holder.
    async fn release_queue_lock(&self, lock_name: &str, holder_pid: i64) -> Result<bool>;
    async fn force_release_queue_lock(&self, lock_name: &str) -> Result<()>;
    async fn lock_holder(&self, lock_name: &str) -> Result<Option<i64>>;
}

#[async_trait]
pub trait DeliveryStore: Send + Sync {
    async fn is_duplicate_delivery(&self, delivery_id: &str) -> Result<bool>;
    /// Insert-or-ignore; calling twice inserts exactly one row.
    async fn record_delivery(&self, delivery_id: &str) -> Result<()>;
}

#[async_trait]
pub trait ReviewStore: Send + Sync {
    async fn upsert_review_task(&self, task: &ReviewTask) -> Result<()>;
    async fn get_open_review_for_intent(&self, intent_id: &str) -> Result<Option<ReviewTask>>;
    /// Most recent review task for the intent regardless of status, used
    /// to read back a resolution after the task has gone to completed.
    async fn get_latest_review_for_intent(&self, intent_id: &str) -> Result<Option<ReviewTask>>;
    async fn list_open_review_tasks(&self) -> Result<Vec<ReviewTask>>;
}

#[async_trait]
pub trait SecurityFindingStore: Send + Sync {
    async fn insert_finding(&self, finding: &SecurityFinding) -> Result<()>;
    async fn list_findings_for_intent(&self, intent_id: &str) -> Result<Vec<SecurityFinding>>;
}

#[async_trait]
pub trait CommitLinkStore: Send + Sync {
    async fn insert_commit_link(&self, link: &CommitLink) -> Result<()>;
    async fn list_commit_links(&self, intent_id: &str) -> Result<Vec<CommitLink>>;
}

#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    async fn upsert_embedding(&self, record: &EmbeddingRecord) -> Result<()>;
    async fn get_embedding(&self, intent_id: &str, model: &str) -> Result<Option<EmbeddingRecord>>;
}

#[async_trait]
pub trait PolicyDocStore: Send + Sync {
    async fn get_risk_policy(&self, tenant_id: &str) -> Result<Option<RiskPolicy>>;
    async fn upsert_risk_policy(&self, policy: &RiskPolicy) -> Result<()>;
    async fn get_agent_policy(&self, agent_id: &str, tenant_id: &str) -> Result<Option<AgentPolicy>>;
    async fn upsert_agent_policy(&self, policy: &AgentPolicy) -> Result<()>;
    async fn get_compliance_thresholds(&self, tenant_id: &str) -> Result<Option<ComplianceThresholds>>;
    async fn upsert_compliance_thresholds(&self, thresholds: &ComplianceThresholds) -> Result<()>;
    async fn get_intake_override(&self, tenant_id: &str) -> Result<Option<IntakeOverride>>;
    async fn set_intake_override(&self, override_: &IntakeOverride) -> Result<()>;
}

/// Composition of every port, by trait bound rather than a base class.
pub trait Store:
    EventStore
    + ChainStateStore
    + IntentStore
    + LockStore
    + DeliveryStore
    + ReviewStore
    + SecurityFindingStore
    + CommitLinkStore
    + EmbeddingStore
    + PolicyDocStore
{
}

impl<T> Store for T where
    T: EventStore
        + ChainStateStore
        + IntentStore
        + LockStore
        + DeliveryStore
        + ReviewStore
        + SecurityFindingStore
        + CommitLinkStore
        + EmbeddingStore
        + PolicyDocStore
{
}
