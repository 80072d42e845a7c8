use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use converge_eventlog::ChainState;
use converge_schemas::{
    AgentPolicy, CommitLink, CommitRole, ComplianceThresholds, EmbeddingRecord, Event,
    EventFilter, IntakeOverride, Intent, IntentStatus, NewEvent, OriginType, ReviewResolution,
    ReviewStatus, ReviewTask, ReviewTrigger, RiskLevel, RiskPolicy, SecurityCategory,
    SecurityFinding, SecuritySeverity,
};

use crate::ports::{
    ChainStateStore, CommitLinkStore, DeliveryStore, EmbeddingStore, EventStore, IntentStore,
    LockStore, PolicyDocStore, ReviewStore, SecurityFindingStore,
};

pub const ENV_DB_URL: &str = "CONVERGE_DATABASE_URL";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .context("failed to connect to Postgres")?;
        Ok(PgStore { pool })
    }

    pub async fn connect_from_env() -> Result<Self> {
        let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
        Self::connect(&url).await
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("converge-store migrate failed")?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn status(&self) -> Result<bool> {
        sqlx::query("select 1").execute(&self.pool).await.context("status ping failed")?;
        Ok(true)
    }
}

fn row_to_event(row: &sqlx::postgres::PgRow) -> Result<Event, sqlx::Error> {
    Ok(Event {
        id: row.try_get("id")?,
        trace_id: row.try_get("trace_id")?,
        timestamp: row.try_get("ts_utc")?,
        event_type: row.try_get("event_type")?,
        intent_id: row.try_get("intent_id")?,
        agent_id: row.try_get("agent_id")?,
        tenant_id: row.try_get("tenant_id")?,
        payload: row.try_get("payload")?,
        evidence: row.try_get("evidence")?,
    })
}

#[async_trait]
impl EventStore for PgStore {
    async fn append(&self, event: NewEvent) -> Result<Event> {
        let chain_id = event.tenant_id.clone().unwrap_or_else(|| "default".to_string());
        let mut tx = self.pool.begin().await.context("append: begin tx failed")?;

        let state_row = sqlx::query("select last_hash, event_count from event_chain_state where chain_id = $1 for update")
            .bind(&chain_id)
            .fetch_optional(&mut *tx)
            .await
            .context("append: load chain state failed")?;

        let mut state = match state_row {
            Some(r) => ChainState {
                chain_id: chain_id.clone(),
                last_hash: r.try_get("last_hash")?,
                event_count: r.try_get::<i64, _>("event_count")? as u64,
            },
            None => ChainState::genesis(chain_id.clone()),
        };

        let id = event.id.unwrap_or_else(converge_eventlog::new_event_id);
        let trace_id = event.trace_id.unwrap_or_else(converge_eventlog::new_trace_id);
        let full = Event {
            id: id.clone(),
            trace_id: trace_id.clone(),
            timestamp: Utc::now(),
            event_type: event.event_type,
            intent_id: event.intent_id,
            agent_id: event.agent_id,
            tenant_id: event.tenant_id,
            payload: event.payload,
            evidence: event.evidence,
        };

        let prev_hash = state.last_hash.clone();
        let hash_self = state.advance(&full);

        sqlx::query(
            r#"
            insert into events (
              id, trace_id, ts_utc, event_type, intent_id, agent_id, tenant_id,
              payload, evidence, hash_prev, hash_self
            ) values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)
            "#,
        )
        .bind(&full.id)
        .bind(&full.trace_id)
        .bind(full.timestamp)
        .bind(&full.event_type)
        .bind(&full.intent_id)
        .bind(&full.agent_id)
        .bind(&full.tenant_id)
        .bind(&full.payload)
        .bind(&full.evidence)
        .bind(&prev_hash)
        .bind(&hash_self)
        .execute(&mut *tx)
        .await
        .context("append: insert event failed")?;

        sqlx::query(
            r#"
            insert into event_chain_state (chain_id, last_hash, event_count)
            values ($1, $2, $3)
            on conflict (chain_id) do update
                set last_hash = excluded.last_hash,
                    event_count = excluded.event_count
            "#,
        )
        .bind(&state.chain_id)
        .bind(&state.last_hash)
        .bind(state.event_count as i64)
        .execute(&mut *tx)
        .await
        .context("append: upsert chain state failed")?;

        tx.commit().await.context("append: commit failed")?;
        Ok(full)
    }

    async fn query(&self, filter: &EventFilter) -> Result<Vec<Event>> {
        let rows = sqlx::query(
            r#"
            select * from events
            where ($1::text is null or event_type = $1)
              and ($2::text is null or intent_id = $2)
              and ($3::text is null or agent_id = $3)
              and ($4::text is null or tenant_id = $4)
              and ($5::text is null or trace_id = $5)
              and ($6::timestamptz is null or ts_utc >= $6)
              and ($7::timestamptz is null or ts_utc <= $7)
            order by ts_utc asc
            limit $8
            "#,
        )
        .bind(&filter.event_type)
        .bind(&filter.intent_id)
        .bind(&filter.agent_id)
        .bind(&filter.tenant_id)
        .bind(&filter.trace_id)
        .bind(filter.since)
        .bind(filter.until)
        .bind(filter.effective_limit() as i64)
        .fetch_all(&self.pool)
        .await
        .context("query events failed")?;
        rows.iter().map(|r| row_to_event(r).map_err(Into::into)).collect()
    }

    async fn count(&self, filter: &EventFilter) -> Result<u64> {
        let row = sqlx::query(
            r#"
            select count(*)::bigint as n from events
            where ($1::text is null or event_type = $1)
              and ($2::text is null or intent_id = $2)
              and ($3::text is null or agent_id = $3)
              and ($4::text is null or tenant_id = $4)
              and ($5::text is null or trace_id = $5)
              and ($6::timestamptz is null or ts_utc >= $6)
              and ($7::timestamptz is null or ts_utc <= $7)
            "#,
        )
        .bind(&filter.event_type)
        .bind(&filter.intent_id)
        .bind(&filter.agent_id)
        .bind(&filter.tenant_id)
        .bind(&filter.trace_id)
        .bind(filter.since)
        .bind(filter.until)
        .fetch_one(&self.pool)
        .await
        .context("count events failed")?;
        Ok(row.try_get::<i64, _>("n")? as u64)
    }

    async fn prune_events(&self, before: DateTime<Utc>, tenant_id: Option<&str>, dry_run: bool) -> Result<u64> {
        if dry_run {
            let row = sqlx::query(
                "select count(*)::bigint as n from events where ts_utc < $1 and ($2::text is null or tenant_id = $2)",
            )
            .bind(before)
            .bind(tenant_id)
            .fetch_one(&self.pool)
            .await
            .context("prune_events dry-run count failed")?;
            return Ok(row.try_get::<i64, _>("n")? as u64);
        }

        let result = sqlx::query(
            "delete from events where ts_utc < $1 and ($2::text is null or tenant_id = $2)",
        )
        .bind(before)
        .bind(tenant_id)
        .execute(&self.pool)
        .await
        .context("prune_events delete failed")?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ChainStateStore for PgStore {
    async fn load_chain_state(&self, chain_id: &str) -> Result<Option<ChainState>> {
        let row = sqlx::query("select chain_id, last_hash, event_count from event_chain_state where chain_id = $1")
            .bind(chain_id)
            .fetch_optional(&self.pool)
            .await
            .context("load_chain_state failed")?;
        let Some(row) = row else { return Ok(None) };
        Ok(Some(ChainState {
            chain_id: row.try_get("chain_id")?,
            last_hash: row.try_get("last_hash")?,
            event_count: row.try_get::<i64, _>("event_count")? as u64,
        }))
    }

    async fn save_chain_state(&self, state: &ChainState) -> Result<()> {
        sqlx::query(
            r#"
            insert into event_chain_state (chain_id, last_hash, event_count)
            values ($1, $2, $3)
            on conflict (chain_id) do update
                set last_hash = excluded.last_hash,
                    event_count = excluded.event_count
            "#,
        )
        .bind(&state.chain_id)
        .bind(&state.last_hash)
        .bind(state.event_count as i64)
        .execute(&self.pool)
        .await
        .context("save_chain_state failed")?;
        Ok(())
    }
}

fn row_to_intent(row: &sqlx::postgres::PgRow) -> Result<Intent, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let risk_level: String = row.try_get("risk_level")?;
    let origin_type: String = row.try_get("origin_type")?;
    Ok(Intent {
        id: row.try_get("id")?,
        source: row.try_get("source")?,
        target: row.try_get("target")?,
        status: IntentStatus::parse(&status).unwrap_or(IntentStatus::Ready),
        created_at: row.try_get("created_at")?,
        created_by: row.try_get("created_by")?,
        risk_level: parse_risk_level(&risk_level),
        priority: row.try_get("priority")?,
        semantic: row.try_get("semantic")?,
        technical: row.try_get("technical")?,
        checks_required: serde_json::from_value(row.try_get("checks_required")?).unwrap_or_default(),
        dependencies: serde_json::from_value(row.try_get("dependencies")?).unwrap_or_default(),
        retries: row.try_get::<i32, _>("retries")? as u32,
        tenant_id: row.try_get("tenant_id")?,
        plan_id: row.try_get("plan_id")?,
        origin_type: parse_origin_type(&origin_type),
        updated_at: row.try_get("updated_at")?,
    })
}

fn parse_risk_level(s: &str) -> RiskLevel {
    match s {
        "low" => RiskLevel::Low,
        "medium" => RiskLevel::Medium,
        "high" => RiskLevel::High,
        _ => RiskLevel::Critical,
    }
}

fn parse_origin_type(s: &str) -> OriginType {
    match s {
        "human" => OriginType::Human,
        "agent" => OriginType::Agent,
        _ => OriginType::Integration,
    }
}

#[async_trait]
impl IntentStore for PgStore {
    async fn upsert_intent(&self, intent: &Intent) -> Result<()> {
        sqlx::query(
            r#"
            insert into intents (
              id, source, target, status, created_at, created_by, risk_level, priority,
              semantic, technical, checks_required, dependencies, retries, tenant_id,
              plan_id, origin_type, updated_at
            ) values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17)
            on conflict (id) do update set
              source = excluded.source,
              target = excluded.target,
              status = excluded.status,
              risk_level = excluded.risk_level,
              priority = excluded.priority,
              semantic = excluded.semantic,
              technical = excluded.technical,
              checks_required = excluded.checks_required,
              dependencies = excluded.dependencies,
              retries = excluded.retries,
              tenant_id = excluded.tenant_id,
              plan_id = excluded.plan_id,
              updated_at = excluded.updated_at
            "#,
        )
        .bind(&intent.id)
        .bind(&intent.source)
        .bind(&intent.target)
        .bind(intent.status.as_str())
        .bind(intent.created_at)
        .bind(&intent.created_by)
        .bind(intent.risk_level.as_str())
        .bind(intent.priority)
        .bind(&intent.semantic)
        .bind(&intent.technical)
        .bind(serde_json::to_value(&intent.checks_required)?)
        .bind(serde_json::to_value(&intent.dependencies)?)
        .bind(intent.retries as i32)
        .bind(&intent.tenant_id)
        .bind(&intent.plan_id)
        .bind(origin_type_str(intent.origin_type))
        .bind(intent.updated_at)
        .execute(&self.pool)
        .await
        .context("upsert_intent failed")?;
        Ok(())
    }

    async fn get_intent(&self, id: &str) -> Result<Option<Intent>> {
        let row = sqlx::query("select * from intents where id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("get_intent failed")?;
        row.as_ref().map(row_to_intent).transpose().map_err(Into::into)
    }

    async fn list_by_status(&self, status: IntentStatus, tenant_id: Option<&str>) -> Result<Vec<Intent>> {
        let rows = sqlx::query(
            "select * from intents where status = $1 and ($2::text is null or tenant_id = $2) order by created_at asc",
        )
        .bind(status.as_str())
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .context("list_by_status failed")?;
        rows.iter().map(|r| row_to_intent(r).map_err(Into::into)).collect()
    }

    async fn list_validated_for_queue(&self, limit: u32, tenant_id: Option<&str>) -> Result<Vec<Intent>> {
        let rows = sqlx::query(
            r#"
            select * from intents
            where status = 'VALIDATED' and ($1::text is null or tenant_id = $1)
            order by priority asc, created_at asc
            limit $2
            "#,
        )
        .bind(tenant_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("list_validated_for_queue failed")?;
        rows.iter().map(|r| row_to_intent(r).map_err(Into::into)).collect()
    }
}

fn origin_type_str(o: OriginType) -> &'static str {
    match o {
        OriginType::Human => "human",
        OriginType::Agent => "agent",
        OriginType::Integration => "integration",
    }
}

#[async_trait]
impl LockStore for PgStore {
    async fn acquire_queue_lock(&self, lock_name: &str, holder_pid: i64, ttl_seconds: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await.context("acquire_queue_lock: begin tx failed")?;

        sqlx::query("delete from queue_locks where lock_name = $1 and expires_at < now()")
            .bind(lock_name)
            .execute(&mut *tx)
            .await
            .context("acquire_queue_lock: stale-row delete failed")?;

        let inserted = sqlx::query(
            r#"
            insert into queue_locks (lock_name, holder_pid, acquired_at, expires_at)
            values ($1, $2, now(), now() + make_interval(secs => $3))
            on conflict (lock_name) do nothing
            "#,
        )
        .bind(lock_name)
        .bind(holder_pid)
        .bind(ttl_seconds as f64)
        .execute(&mut *tx)
        .await
        .context("acquire_queue_lock: insert failed")?;

        tx.commit().await.context("acquire_queue_lock: commit failed")?;
        Ok(inserted.rows_affected() == 1)
    }

    async fn release_queue_lock(&self, lock_name: &str, holder_pid: i64) -> Result<bool> {
        let result = sqlx::query("delete from queue_locks where lock_name = $1 and holder_pid = $2")
            .bind(lock_name)
            .bind(holder_pid)
            .execute(&self.pool)
            .await
            .context("release_queue_lock failed")?;
        Ok(result.rows_affected() == 1)
    }

    async fn force_release_queue_lock(&self, lock_name: &str) -> Result<()> {
        sqlx::query("delete from queue_locks where lock_name = $1")
            .bind(lock_name)
            .execute(&self.pool)
            .await
            .context("force_release_queue_lock failed")?;
        Ok(())
    }

    async fn lock_holder(&self, lock_name: &str) -> Result<Option<i64>> {
        let row = sqlx::query("select holder_pid from queue_locks where lock_name = $1 and expires_at >= now()")
            .bind(lock_name)
            .fetch_optional(&self.pool)
            .await
            .context("lock_holder failed")?;
        row.map(|r| r.try_get::<i64, _>("holder_pid")).transpose().map_err(Into::into)
    }
}

#[async_trait]
impl DeliveryStore for PgStore {
    async fn is_duplicate_delivery(&self, delivery_id: &str) -> Result<bool> {
        let row = sqlx::query("select 1 as present from webhook_deliveries where delivery_id = $1")
            .bind(delivery_id)
            .fetch_optional(&self.pool)
            .await
            .context("is_duplicate_delivery failed")?;
        Ok(row.is_some())
    }

    async fn record_delivery(&self, delivery_id: &str) -> Result<()> {
        sqlx::query("insert into webhook_deliveries (delivery_id) values ($1) on conflict (delivery_id) do nothing")
            .bind(delivery_id)
            .execute(&self.pool)
            .await
            .context("record_delivery failed")?;
        Ok(())
    }
}

fn row_to_review_task(row: &sqlx::postgres::PgRow) -> Result<ReviewTask, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let risk_level: String = row.try_get("risk_level")?;
    let trigger: String = row.try_get("trigger")?;
    let resolution: Option<String> = row.try_get("resolution")?;
    Ok(ReviewTask {
        id: row.try_get("id")?,
        intent_id: row.try_get("intent_id")?,
        status: parse_review_status(&status),
        reviewer: row.try_get("reviewer")?,
        priority: row.try_get("priority")?,
        risk_level: parse_risk_level(&risk_level),
        trigger: parse_review_trigger(&trigger),
        sla_deadline: row.try_get("sla_deadline")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        resolution: resolution.map(|r| parse_review_resolution(&r)),
    })
}

fn parse_review_status(s: &str) -> ReviewStatus {
    match s {
        "pending" => ReviewStatus::Pending,
        "assigned" => ReviewStatus::Assigned,
        "in_review" => ReviewStatus::InReview,
        "escalated" => ReviewStatus::Escalated,
        "completed" => ReviewStatus::Completed,
        _ => ReviewStatus::Cancelled,
    }
}

fn review_status_str(s: ReviewStatus) -> &'static str {
    match s {
        ReviewStatus::Pending => "pending",
        ReviewStatus::Assigned => "assigned",
        ReviewStatus::InReview => "in_review",
        ReviewStatus::Escalated => "escalated",
        ReviewStatus::Completed => "completed",
        ReviewStatus::Cancelled => "cancelled",
    }
}

fn parse_review_trigger(s: &str) -> ReviewTrigger {
    match s {
        "policy" => ReviewTrigger::Policy,
        "conflict" => ReviewTrigger::Conflict,
        "coherence" => ReviewTrigger::Coherence,
        _ => ReviewTrigger::Manual,
    }
}

fn review_trigger_str(t: ReviewTrigger) -> &'static str {
    match t {
        ReviewTrigger::Policy => "policy",
        ReviewTrigger::Conflict => "conflict",
        ReviewTrigger::Coherence => "coherence",
        ReviewTrigger::Manual => "manual",
    }
}

fn parse_review_resolution(s: &str) -> ReviewResolution {
    match s {
        "approved" => ReviewResolution::Approved,
        "rejected" => ReviewResolution::Rejected,
        _ => ReviewResolution::Deferred,
    }
}

fn review_resolution_str(r: ReviewResolution) -> &'static str {
    match r {
        ReviewResolution::Approved => "approved",
        ReviewResolution::Rejected => "rejected",
        ReviewResolution::Deferred => "deferred",
    }
}

#[async_trait]
impl ReviewStore for PgStore {
    async fn upsert_review_task(&self, task: &ReviewTask) -> Result<()> {
        sqlx::query(
            r#"
            insert into review_tasks (
              id, intent_id, status, reviewer, priority, risk_level, trigger,
              sla_deadline, created_at, updated_at, resolution
            ) values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)
            on conflict (id) do update set
              status = excluded.status,
              reviewer = excluded.reviewer,
              priority = excluded.priority,
              updated_at = excluded.updated_at,
              resolution = excluded.resolution
            "#,
        )
        .bind(&task.id)
        .bind(&task.intent_id)
        .bind(review_status_str(task.status))
        .bind(&task.reviewer)
        .bind(task.priority)
        .bind(task.risk_level.as_str())
        .bind(review_trigger_str(task.trigger))
        .bind(task.sla_deadline)
        .bind(task.created_at)
        .bind(task.updated_at)
        .bind(task.resolution.map(review_resolution_str))
        .execute(&self.pool)
        .await
        .context("upsert_review_task failed")?;
        Ok(())
    }

    async fn get_open_review_for_intent(&self, intent_id: &str) -> Result<Option<ReviewTask>> {
        let row = sqlx::query(
            r#"
            select * from review_tasks
            where intent_id = $1 and status not in ('completed', 'cancelled')
            order by created_at desc
            limit 1
            "#,
        )
        .bind(intent_id)
        .fetch_optional(&self.pool)
        .await
        .context("get_open_review_for_intent failed")?;
        row.as_ref().map(row_to_review_task).transpose().map_err(Into::into)
    }

    async fn get_latest_review_for_intent(&self, intent_id: &str) -> Result<Option<ReviewTask>> {
        let row = sqlx::query(
            r#"
            select * from review_tasks
            where intent_id = $1
            order by created_at desc
            limit 1
            "#,
        )
        .bind(intent_id)
        .fetch_optional(&self.pool)
        .await
        .context("get_latest_review_for_intent failed")?;
        row.as_ref().map(row_to_review_task).transpose().map_err(Into::into)
    }

    async fn list_open_review_tasks(&self) -> Result<Vec<ReviewTask>> {
        let rows = sqlx::query("select * from review_tasks where status not in ('completed', 'cancelled') order by sla_deadline asc")
            .fetch_all(&self.pool)
            .await
            .context("list_open_review_tasks failed")?;
        rows.iter().map(|r| row_to_review_task(r).map_err(Into::into)).collect()
    }
}

#[async_trait]
impl SecurityFindingStore for PgStore {
    async fn insert_finding(&self, finding: &SecurityFinding) -> Result<()> {
        sqlx::query(
            r#"
            insert into security_findings (
              id, scanner, category, severity, file, line, rule, evidence,
              confidence, intent_id, tenant_id, scan_id, ts_utc
            ) values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)
            on conflict (id) do nothing
            "#,
        )
        .bind(&finding.id)
        .bind(&finding.scanner)
        .bind(security_category_str(finding.category))
        .bind(security_severity_str(finding.severity))
        .bind(&finding.file)
        .bind(finding.line.map(|l| l as i32))
        .bind(&finding.rule)
        .bind(&finding.evidence)
        .bind(finding.confidence)
        .bind(&finding.intent_id)
        .bind(&finding.tenant_id)
        .bind(&finding.scan_id)
        .bind(finding.timestamp)
        .execute(&self.pool)
        .await
        .context("insert_finding failed")?;
        Ok(())
    }

    async fn list_findings_for_intent(&self, intent_id: &str) -> Result<Vec<SecurityFinding>> {
        let rows = sqlx::query("select * from security_findings where intent_id = $1 order by ts_utc asc")
            .bind(intent_id)
            .fetch_all(&self.pool)
            .await
            .context("list_findings_for_intent failed")?;
        rows.iter().map(|r| row_to_finding(r).map_err(Into::into)).collect()
    }
}

fn security_category_str(c: SecurityCategory) -> &'static str {
    match c {
        SecurityCategory::Sast => "sast",
        SecurityCategory::Sca => "sca",
        SecurityCategory::Secrets => "secrets",
        SecurityCategory::Iac => "iac",
        SecurityCategory::Other => "other",
    }
}

fn parse_security_category(s: &str) -> SecurityCategory {
    match s {
        "sast" => SecurityCategory::Sast,
        "sca" => SecurityCategory::Sca,
        "secrets" => SecurityCategory::Secrets,
        "iac" => SecurityCategory::Iac,
        _ => SecurityCategory::Other,
    }
}

fn security_severity_str(s: SecuritySeverity) -> &'static str {
    match s {
        SecuritySeverity::Info => "info",
        SecuritySeverity::Low => "low",
        SecuritySeverity::Medium => "medium",
        SecuritySeverity::High => "high",
        SecuritySeverity::Critical => "critical",
    }
}

fn parse_security_severity(s: &str) -> SecuritySeverity {
    match s {
        "info" => SecuritySeverity::Info,
        "low" => SecuritySeverity::Low,
        "medium" => SecuritySeverity::Medium,
        "high" => SecuritySeverity::High,
        _ => SecuritySeverity::Critical,
    }
}

fn row_to_finding(row: &sqlx::postgres::PgRow) -> Result<SecurityFinding, sqlx::Error> {
    let category: String = row.try_get("category")?;
    let severity: String = row.try_get("severity")?;
    Ok(SecurityFinding {
        id: row.try_get("id")?,
        scanner: row.try_get("scanner")?,
        category: parse_security_category(&category),
        severity: parse_security_severity(&severity),
        file: row.try_get("file")?,
        line: row.try_get::<Option<i32>, _>("line")?.map(|l| l as u32),
        rule: row.try_get("rule")?,
        evidence: row.try_get("evidence")?,
        confidence: row.try_get("confidence")?,
        intent_id: row.try_get("intent_id")?,
        tenant_id: row.try_get("tenant_id")?,
        scan_id: row.try_get("scan_id")?,
        timestamp: row.try_get("ts_utc")?,
    })
}

#[async_trait]
impl CommitLinkStore for PgStore {
    async fn insert_commit_link(&self, link: &CommitLink) -> Result<()> {
        sqlx::query(
            r#"
            insert into intent_commit_links (intent_id, repo, sha, role, observed_at)
            values ($1,$2,$3,$4,$5)
            on conflict (intent_id, repo, sha, role) do nothing
            "#,
        )
        .bind(&link.intent_id)
        .bind(&link.repo)
        .bind(&link.sha)
        .bind(commit_role_str(link.role))
        .bind(link.observed_at)
        .execute(&self.pool)
        .await
        .context("insert_commit_link failed")?;
        Ok(())
    }

    async fn list_commit_links(&self, intent_id: &str) -> Result<Vec<CommitLink>> {
        let rows = sqlx::query("select * from intent_commit_links where intent_id = $1 order by observed_at asc")
            .bind(intent_id)
            .fetch_all(&self.pool)
            .await
            .context("list_commit_links failed")?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let role: String = row.try_get("role")?;
            out.push(CommitLink {
                intent_id: row.try_get("intent_id")?,
                repo: row.try_get("repo")?,
                sha: row.try_get("sha")?,
                role: parse_commit_role(&role),
                observed_at: row.try_get("observed_at")?,
            });
        }
        Ok(out)
    }
}

fn commit_role_str(r: CommitRole) -> &'static str {
    match r {
        CommitRole::Head => "head",
        CommitRole::Base => "base",
        CommitRole::Merge => "merge",
    }
}

fn parse_commit_role(s: &str) -> CommitRole {
    match s {
        "head" => CommitRole::Head,
        "merge" => CommitRole::Merge,
        _ => CommitRole::Base,
    }
}

#[async_trait]
impl EmbeddingStore for PgStore {
    async fn upsert_embedding(&self, record: &EmbeddingRecord) -> Result<()> {
        sqlx::query(
            r#"
            insert into intent_embeddings (intent_id, model, dimension, checksum, vector, generated_at)
            values ($1,$2,$3,$4,$5,$6)
            on conflict (intent_id, model) do update set
              dimension = excluded.dimension,
              checksum = excluded.checksum,
              vector = excluded.vector,
              generated_at = excluded.generated_at
            "#,
        )
        .bind(&record.intent_id)
        .bind(&record.model)
        .bind(record.dimension as i32)
        .bind(&record.checksum)
        .bind(serde_json::to_value(&record.vector)?)
        .bind(record.generated_at)
        .execute(&self.pool)
        .await
        .context("upsert_embedding failed")?;
        Ok(())
    }

    async fn get_embedding(&self, intent_id: &str, model: &str) -> Result<Option<EmbeddingRecord>> {
        let row = sqlx::query("select * from intent_embeddings where intent_id = $1 and model = $2")
            .bind(intent_id)
            .bind(model)
            .fetch_optional(&self.pool)
            .await
            .context("get_embedding failed")?;
        let Some(row) = row else { return Ok(None) };
        Ok(Some(EmbeddingRecord {
            intent_id: row.try_get("intent_id")?,
            model: row.try_get("model")?,
            dimension: row.try_get::<i32, _>("dimension")? as u32,
            checksum: row.try_get("checksum")?,
            vector: serde_json::from_value(row.try_get("vector")?)?,
            generated_at: row.try_get("generated_at")?,
        }))
    }
}

#[async_trait]
impl PolicyDocStore for PgStore {
    async fn get_risk_policy(&self, tenant_id: &str) -> Result<Option<RiskPolicy>> {
        let row = sqlx::query("select * from risk_policies where tenant_id = $1")
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await
            .context("get_risk_policy failed")?;
        let Some(row) = row else { return Ok(None) };
        Ok(Some(RiskPolicy {
            tenant_id: row.try_get("tenant_id")?,
            version: row.try_get::<i32, _>("version")? as u32,
            thresholds: row.try_get("thresholds")?,
            mode: row.try_get("mode")?,
            enforce_ratio: row.try_get("enforce_ratio")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }

    async fn upsert_risk_policy(&self, policy: &RiskPolicy) -> Result<()> {
        sqlx::query(
            r#"
            insert into risk_policies (tenant_id, version, thresholds, mode, enforce_ratio, updated_at)
            values ($1,$2,$3,$4,$5,$6)
            on conflict (tenant_id) do update set
              version = excluded.version,
              thresholds = excluded.thresholds,
              mode = excluded.mode,
              enforce_ratio = excluded.enforce_ratio,
              updated_at = excluded.updated_at
            "#,
        )
        .bind(&policy.tenant_id)
        .bind(policy.version as i32)
        .bind(&policy.thresholds)
        .bind(&policy.mode)
        .bind(policy.enforce_ratio)
        .bind(policy.updated_at)
        .execute(&self.pool)
        .await
        .context("upsert_risk_policy failed")?;
        Ok(())
    }

    async fn get_agent_policy(&self, agent_id: &str, tenant_id: &str) -> Result<Option<AgentPolicy>> {
        let row = sqlx::query("select * from agent_policies where agent_id = $1 and tenant_id = $2")
            .bind(agent_id)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await
            .context("get_agent_policy failed")?;
        let Some(row) = row else { return Ok(None) };
        Ok(Some(AgentPolicy {
            agent_id: row.try_get("agent_id")?,
            tenant_id: row.try_get("tenant_id")?,
            rules: row.try_get("rules")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }

    async fn upsert_agent_policy(&self, policy: &AgentPolicy) -> Result<()> {
        sqlx::query(
            r#"
            insert into agent_policies (agent_id, tenant_id, rules, updated_at)
            values ($1,$2,$3,$4)
            on conflict (agent_id, tenant_id) do update set
              rules = excluded.rules,
              updated_at = excluded.updated_at
            "#,
        )
        .bind(&policy.agent_id)
        .bind(&policy.tenant_id)
        .bind(&policy.rules)
        .bind(policy.updated_at)
        .execute(&self.pool)
        .await
        .context("upsert_agent_policy failed")?;
        Ok(())
    }

    async fn get_compliance_thresholds(&self, tenant_id: &str) -> Result<Option<ComplianceThresholds>> {
        let row = sqlx::query("select * from compliance_thresholds where tenant_id = $1")
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await
            .context("get_compliance_thresholds failed")?;
        let Some(row) = row else { return Ok(None) };
        Ok(Some(ComplianceThresholds {
            tenant_id: row.try_get("tenant_id")?,
            thresholds: row.try_get("thresholds")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }

    async fn upsert_compliance_thresholds(&self, thresholds: &ComplianceThresholds) -> Result<()> {
        sqlx::query(
            r#"
            insert into compliance_thresholds (tenant_id, thresholds, updated_at)
            values ($1,$2,$3)
            on conflict (tenant_id) do update set
              thresholds = excluded.thresholds,
              updated_at = excluded.updated_at
            "#,
        )
        .bind(&thresholds.tenant_id)
        .bind(&thresholds.thresholds)
        .bind(thresholds.updated_at)
        .execute(&self.pool)
        .await
        .context("upsert_compliance_thresholds failed")?;
        Ok(())
    }

    async fn get_intake_override(&self, tenant_id: &str) -> Result<Option<IntakeOverride>> {
        let row = sqlx::query("select * from intake_overrides where tenant_id = $1")
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await
            .context("get_intake_override failed")?;
        let Some(row) = row else { return Ok(None) };
        Ok(Some(IntakeOverride {
            tenant_id: row.try_get("tenant_id")?,
            mode: row.try_get("mode")?,
            set_by: row.try_get("set_by")?,
            set_at: row.try_get("set_at")?,
            reason: row.try_get("reason")?,
        }))
    }

    async fn set_intake_override(&self, override_: &IntakeOverride) -> Result<()> {
        sqlx::query(
            r#"
            insert into intake_overrides (tenant_id, mode, set_by, set_at, reason)
            values ($1,$2,$3,$4,$5)
            on conflict (tenant_id) do update set
              mode = excluded.mode,
              set_by = excluded.set_by,
              set_at = excluded.set_at,
              reason = excluded.reason
            "#,
        )
        .bind(&override_.tenant_id)
        .bind(&override_.mode)
        .bind(&override_.set_by)
        .bind(override_.set_at)
        .bind(&override_.reason)
        .execute(&self.pool)
        .await
        .context("set_intake_override failed")?;
        Ok(())
    }
}
