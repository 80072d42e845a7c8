//! An in-memory `Store` backend for unit and scenario tests — same port
//! traits `PgStore` implements, so code under test cannot tell the
//! difference. Mirrors `converge_scm::InMemoryScm`'s deterministic,
//! no-hidden-clock design: every timestamp comes from the caller.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use converge_eventlog::ChainState;
use converge_schemas::{
    AgentPolicy, CommitLink, ComplianceThresholds, EmbeddingRecord, Event, EventFilter,
    IntakeOverride, Intent, IntentStatus, NewEvent, ReviewStatus, ReviewTask, RiskPolicy,
    SecurityFinding,
};
use converge_store::{
    ChainStateStore, CommitLinkStore, DeliveryStore, EmbeddingStore, EventStore, IntentStore,
    LockStore, PolicyDocStore, ReviewStore, SecurityFindingStore,
};

#[derive(Default)]
struct State {
    events: Vec<Event>,
    chains: HashMap<String, ChainState>,
    intents: HashMap<String, Intent>,
    locks: HashMap<String, (i64, DateTime<Utc>)>,
    deliveries: std::collections::HashSet<String>,
    reviews: HashMap<String, ReviewTask>,
    findings: Vec<SecurityFinding>,
    commit_links: Vec<CommitLink>,
    embeddings: HashMap<(String, String), EmbeddingRecord>,
    risk_policies: HashMap<String, RiskPolicy>,
    agent_policies: HashMap<(String, String), AgentPolicy>,
    compliance_thresholds: HashMap<String, ComplianceThresholds>,
    intake_overrides: HashMap<String, IntakeOverride>,
}

pub struct InMemoryStore {
    state: Mutex<State>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        InMemoryStore { state: Mutex::new(State::default()) }
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for InMemoryStore {
    async fn append(&self, event: NewEvent) -> Result<Event> {
        let mut st = self.state.lock().unwrap();
        let chain_id = event.tenant_id.clone().unwrap_or_else(|| "default".to_string());
        let mut chain = st.chains.remove(&chain_id).unwrap_or_else(|| ChainState::genesis(chain_id.clone()));

        let full = Event {
            id: event.id.unwrap_or_else(converge_eventlog::new_event_id),
            trace_id: event.trace_id.unwrap_or_else(converge_eventlog::new_trace_id),
            timestamp: Utc::now(),
            event_type: event.event_type,
            intent_id: event.intent_id,
            agent_id: event.agent_id,
            tenant_id: event.tenant_id,
            payload: event.payload,
            evidence: event.evidence,
        };
        chain.advance(&full);
        st.chains.insert(chain_id, chain);
        st.events.push(full.clone());
        Ok(full)
    }

    async fn query(&self, filter: &EventFilter) -> Result<Vec<Event>> {
        let st = self.state.lock().unwrap();
        let mut out: Vec<Event> = st
            .events
            .iter()
            .filter(|e| filter.event_type.as_deref().map_or(true, |v| e.event_type == v))
            .filter(|e| filter.intent_id.as_deref().map_or(true, |v| e.intent_id.as_deref() == Some(v)))
            .filter(|e| filter.agent_id.as_deref().map_or(true, |v| e.agent_id.as_deref() == Some(v)))
            .filter(|e| filter.tenant_id.as_deref().map_or(true, |v| e.tenant_id.as_deref() == Some(v)))
            .filter(|e| filter.trace_id.as_deref().map_or(true, |v| e.trace_id == v))
            .filter(|e| filter.since.map_or(true, |v| e.timestamp >= v))
            .filter(|e| filter.until.map_or(true, |v| e.timestamp <= v))
            .cloned()
            .collect();
        out.truncate(filter.effective_limit() as usize);
        Ok(out)
    }

    async fn count(&self, filter: &EventFilter) -> Result<u64> {
        Ok(self.query(filter).await?.len() as u64)
    }

    async fn prune_events(&self, before: DateTime<Utc>, tenant_id: Option<&str>, dry_run: bool) -> Result<u64> {
        let mut st = self.state.lock().unwrap();
        let matches: Vec<usize> = st
            .events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.timestamp < before && tenant_id.map_or(true, |t| e.tenant_id.as_deref() == Some(t)))
            .map(|(i, _)| i)
            .collect();
        let count = matches.len() as u64;
        if !dry_run {
            for idx in matches.into_iter().rev() {
                st.events.remove(idx);
            }
        }
        Ok(count)
    }
}

#[async_trait]
impl ChainStateStore for InMemoryStore {
    async fn load_chain_state(&self, chain_id: &str) -> Result<Option<ChainState>> {
        Ok(self.state.lock().unwrap().chains.get(chain_id).cloned())
    }

    async fn save_chain_state(&self, state: &ChainState) -> Result<()> {
        self.state.lock().unwrap().chains.insert(state.chain_id.clone(), state.clone());
        Ok(())
    }
}

#[async_trait]
impl IntentStore for InMemoryStore {
    async fn upsert_intent(&self, intent: &Intent) -> Result<()> {
        self.state.lock().unwrap().intents.insert(intent.id.clone(), intent.clone());
        Ok(())
    }

    async fn get_intent(&self, id: &str) -> Result<Option<Intent>> {
        Ok(self.state.lock().unwrap().intents.get(id).cloned())
    }

    async fn list_by_status(&self, status: IntentStatus, tenant_id: Option<&str>) -> Result<Vec<Intent>> {
        let mut out: Vec<Intent> = self
            .state
            .lock()
            .unwrap()
            .intents
            .values()
            .filter(|i| i.status == status)
            .filter(|i| tenant_id.map_or(true, |t| i.tenant_id.as_deref() == Some(t)))
            .cloned()
            .collect();
        out.sort_by_key(|i| i.created_at);
        Ok(out)
    }

    async fn list_validated_for_queue(&self, limit: u32, tenant_id: Option<&str>) -> Result<Vec<Intent>> {
        let mut out = self.list_by_status(IntentStatus::Validated, tenant_id).await?;
        out.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.created_at.cmp(&b.created_at)));
        out.truncate(limit as usize);
        Ok(out)
    }
}

#[async_trait]
impl LockStore for InMemoryStore {
    async fn acquire_queue_lock(&self, lock_name: &str, holder_pid: i64, ttl_seconds: i64) -> Result<bool> {
        let mut st = self.state.lock().unwrap();
        let now = Utc::now();
        if let Some((_, expires_at)) = st.locks.get(lock_name) {
            if *expires_at < now {
                st.locks.remove(lock_name);
            }
        }
        if st.locks.contains_key(lock_name) {
            return Ok(false);
        }
        st.locks.insert(lock_name.to_string(), (holder_pid, now + chrono::Duration::seconds(ttl_seconds)));
        Ok(true)
    }

    async fn release_queue_lock(&self, lock_name: &str, holder_pid: i64) -> Result<bool> {
        let mut st = self.state.lock().unwrap();
        match st.locks.get(lock_name) {
            Some((pid, _)) if *pid == holder_pid => {
                st.locks.remove(lock_name);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn force_release_queue_lock(&self, lock_name: &str) -> Result<()> {
        self.state.lock().unwrap().locks.remove(lock_name);
        Ok(())
    }

    async fn lock_holder(&self, lock_name: &str) -> Result<Option<i64>> {
        let st = self.state.lock().unwrap();
        Ok(st.locks.get(lock_name).filter(|(_, exp)| *exp >= Utc::now()).map(|(pid, _)| *pid))
    }
}

#[async_trait]
impl DeliveryStore for InMemoryStore {
    async fn is_duplicate_delivery(&self, delivery_id: &str) -> Result<bool> {
        Ok(self.state.lock().unwrap().deliveries.contains(delivery_id))
    }

    async fn record_delivery(&self, delivery_id: &str) -> Result<()> {
        self.state.lock().unwrap().deliveries.insert(delivery_id.to_string());
        Ok(())
    }
}

#[async_trait]
impl ReviewStore for InMemoryStore {
    async fn upsert_review_task(&self, task: &ReviewTask) -> Result<()> {
        self.state.lock().unwrap().reviews.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn get_open_review_for_intent(&self, intent_id: &str) -> Result<Option<ReviewTask>> {
        let st = self.state.lock().unwrap();
        Ok(st
            .reviews
            .values()
            .filter(|t| t.intent_id == intent_id)
            .filter(|t| !matches!(t.status, ReviewStatus::Completed | ReviewStatus::Cancelled))
            .max_by_key(|t| t.created_at)
            .cloned())
    }

    async fn get_latest_review_for_intent(&self, intent_id: &str) -> Result<Option<ReviewTask>> {
        let st = self.state.lock().unwrap();
        Ok(st
            .reviews
            .values()
            .filter(|t| t.intent_id == intent_id)
            .max_by_key(|t| t.created_at)
            .cloned())
    }

    async fn list_open_review_tasks(&self) -> Result<Vec<ReviewTask>> {
        let mut out: Vec<ReviewTask> = self
            .state
            .lock()
            .unwrap()
            .reviews
            .values()
            .filter(|t| !matches!(t.status, ReviewStatus::Completed | ReviewStatus::Cancelled))
            .cloned()
            .collect();
        out.sort_by_key(|t| t.sla_deadline);
        Ok(out)
    }
}

#[async_trait]
impl SecurityFindingStore for InMemoryStore {
    async fn insert_finding(&self, finding: &SecurityFinding) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        if !st.findings.iter().any(|f| f.id == finding.id) {
            st.findings.push(finding.clone());
        }
        Ok(())
    }

    async fn list_findings_for_intent(&self, intent_id: &str) -> Result<Vec<SecurityFinding>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .findings
            .iter()
            .filter(|f| f.intent_id.as_deref() == Some(intent_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CommitLinkStore for InMemoryStore {
    async fn insert_commit_link(&self, link: &CommitLink) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        if !st.commit_links.iter().any(|l| {
            l.intent_id == link.intent_id && l.repo == link.repo && l.sha == link.sha && l.role == link.role
        }) {
            st.commit_links.push(link.clone());
        }
        Ok(())
    }

    async fn list_commit_links(&self, intent_id: &str) -> Result<Vec<CommitLink>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .commit_links
            .iter()
            .filter(|l| l.intent_id == intent_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EmbeddingStore for InMemoryStore {
    async fn upsert_embedding(&self, record: &EmbeddingRecord) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .embeddings
            .insert((record.intent_id.clone(), record.model.clone()), record.clone());
        Ok(())
    }

    async fn get_embedding(&self, intent_id: &str, model: &str) -> Result<Option<EmbeddingRecord>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .embeddings
            .get(&(intent_id.to_string(), model.to_string()))
            .cloned())
    }
}

#[async_trait]
impl PolicyDocStore for InMemoryStore {
    async fn get_risk_policy(&self, tenant_id: &str) -> Result<Option<RiskPolicy>> {
        Ok(self.state.lock().unwrap().risk_policies.get(tenant_id).cloned())
    }

    async fn upsert_risk_policy(&self, policy: &RiskPolicy) -> Result<()> {
        self.state.lock().unwrap().risk_policies.insert(policy.tenant_id.clone(), policy.clone());
        Ok(())
    }

    async fn get_agent_policy(&self, agent_id: &str, tenant_id: &str) -> Result<Option<AgentPolicy>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .agent_policies
            .get(&(agent_id.to_string(), tenant_id.to_string()))
            .cloned())
    }

    async fn upsert_agent_policy(&self, policy: &AgentPolicy) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .agent_policies
            .insert((policy.agent_id.clone(), policy.tenant_id.clone()), policy.clone());
        Ok(())
    }

    async fn get_compliance_thresholds(&self, tenant_id: &str) -> Result<Option<ComplianceThresholds>> {
        Ok(self.state.lock().unwrap().compliance_thresholds.get(tenant_id).cloned())
    }

    async fn upsert_compliance_thresholds(&self, thresholds: &ComplianceThresholds) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .compliance_thresholds
            .insert(thresholds.tenant_id.clone(), thresholds.clone());
        Ok(())
    }

    async fn get_intake_override(&self, tenant_id: &str) -> Result<Option<IntakeOverride>> {
        Ok(self.state.lock().unwrap().intake_overrides.get(tenant_id).cloned())
    }

    async fn set_intake_override(&self, override_: &IntakeOverride) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .intake_overrides
            .insert(override_.tenant_id.clone(), override_.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge_schemas::{OriginType, RiskLevel};

    fn sample_intent(id: &str, priority: i32) -> Intent {
        Intent {
            id: id.to_string(),
            source: "feature/x".to_string(),
            target: "main".to_string(),
            status: IntentStatus::Validated,
            created_at: Utc::now(),
            created_by: "agent-1".to_string(),
            risk_level: RiskLevel::Low,
            priority,
            semantic: serde_json::json!({}),
            technical: serde_json::json!({}),
            checks_required: vec![],
            dependencies: vec![],
            retries: 0,
            tenant_id: None,
            plan_id: None,
            origin_type: OriginType::Agent,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn queue_listing_is_priority_ordered() {
        let store = InMemoryStore::new();
        store.upsert_intent(&sample_intent("b", 5)).await.unwrap();
        store.upsert_intent(&sample_intent("a", 1)).await.unwrap();
        let queued = store.list_validated_for_queue(10, None).await.unwrap();
        assert_eq!(queued[0].id, "a");
        assert_eq!(queued[1].id, "b");
    }

    #[tokio::test]
    async fn lock_acquire_is_exclusive_until_released() {
        let store = InMemoryStore::new();
        assert!(store.acquire_queue_lock("queue", 1, 60).await.unwrap());
        assert!(!store.acquire_queue_lock("queue", 2, 60).await.unwrap());
        assert!(store.release_queue_lock("queue", 1).await.unwrap());
        assert!(store.acquire_queue_lock("queue", 2, 60).await.unwrap());
    }

    #[tokio::test]
    async fn delivery_dedup_is_idempotent() {
        let store = InMemoryStore::new();
        assert!(!store.is_duplicate_delivery("d1").await.unwrap());
        store.record_delivery("d1").await.unwrap();
        store.record_delivery("d1").await.unwrap();
        assert!(store.is_duplicate_delivery("d1").await.unwrap());
    }
}
