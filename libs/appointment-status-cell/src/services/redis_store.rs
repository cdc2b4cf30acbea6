// libs/appointment-status-cell/src/services/redis_store.rs
use std::collections::HashMap;

use async_trait::async_trait;
use deadpool_redis::Connection;
use redis::AsyncCommands;
use tracing::{debug, info};

use shared_database::{connect, RedisPool};
use shared_models::AppointmentId;

use crate::error::StatusError;
use crate::models::{AppointmentSnapshot, AppointmentStatus, StatusRecord, StatusRecordDraft};
use crate::services::store::StatusStore;

/// Redis layout:
/// - `{prefix}status_history:{id}` list of JSON records, oldest first
/// - `{prefix}status_current` hash id -> status (a rebuildable cache)
/// - `{prefix}status_recent` sorted set of JSON records scored by sequence
/// - `{prefix}status_known` set of every registered id
/// - `{prefix}status_sequence` write counter
pub struct RedisStatusStore {
    pool: RedisPool,
    prefix: String,
}

impl RedisStatusStore {
    pub fn new(pool: RedisPool) -> Self {
        Self::with_prefix(pool, "")
    }

    /// Namespaced store, used to isolate test runs sharing one Redis.
    pub fn with_prefix(pool: RedisPool, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
        }
    }

    fn history_key(&self, appointment_id: &AppointmentId) -> String {
        format!("{}status_history:{}", self.prefix, appointment_id)
    }

    fn current_key(&self) -> String {
        format!("{}status_current", self.prefix)
    }

    fn recent_key(&self) -> String {
        format!("{}status_recent", self.prefix)
    }

    fn known_key(&self) -> String {
        format!("{}status_known", self.prefix)
    }

    fn sequence_key(&self) -> String {
        format!("{}status_sequence", self.prefix)
    }

    async fn get_connection(&self) -> Result<Connection, StatusError> {
        Ok(connect(&self.pool).await?)
    }

    fn parse_status(raw: &str) -> Result<AppointmentStatus, StatusError> {
        raw.parse()
            .map_err(|e: String| StatusError::StoreUnavailable(format!("corrupt projection: {}", e)))
    }

    fn parse_records(raw: Vec<String>) -> Result<Vec<StatusRecord>, StatusError> {
        raw.iter()
            .map(|data| serde_json::from_str(data).map_err(StatusError::from))
            .collect()
    }
}

#[async_trait]
impl StatusStore for RedisStatusStore {
    async fn register(&self, appointment_id: &AppointmentId) -> Result<bool, StatusError> {
        let mut conn = self.get_connection().await?;
        let (created,): (bool,) = redis::pipe()
            .atomic()
            .sadd(self.known_key(), appointment_id.as_str())
            .ignore()
            .hset_nx(
                self.current_key(),
                appointment_id.as_str(),
                AppointmentStatus::Pending.as_str(),
            )
            .query_async(&mut conn)
            .await?;
        Ok(created)
    }

    async fn append(&self, draft: StatusRecordDraft) -> Result<StatusRecord, StatusError> {
        let mut conn = self.get_connection().await?;

        // A failed transaction below leaves a gap in the counter, never a duplicate.
        let sequence: u64 = conn.incr(self.sequence_key(), 1u64).await?;
        let record = draft.into_record(sequence);
        let data = serde_json::to_string(&record)?;

        let _: () = redis::pipe()
            .atomic()
            .rpush(self.history_key(&record.appointment_id), &data)
            .ignore()
            .hset(
                self.current_key(),
                record.appointment_id.as_str(),
                record.new_status.as_str(),
            )
            .ignore()
            .zadd(self.recent_key(), &data, sequence)
            .ignore()
            .sadd(self.known_key(), record.appointment_id.as_str())
            .ignore()
            .query_async(&mut conn)
            .await?;

        debug!(
            appointment_id = %record.appointment_id,
            sequence = record.sequence,
            "Status record appended to Redis"
        );
        Ok(record)
    }

    async fn current_status(
        &self,
        appointment_id: &AppointmentId,
    ) -> Result<Option<AppointmentStatus>, StatusError> {
        let mut conn = self.get_connection().await?;
        let raw: Option<String> = conn.hget(self.current_key(), appointment_id.as_str()).await?;
        raw.as_deref().map(Self::parse_status).transpose()
    }

    async fn history(&self, appointment_id: &AppointmentId) -> Result<Vec<StatusRecord>, StatusError> {
        let mut conn = self.get_connection().await?;
        let raw: Vec<String> = conn.lrange(self.history_key(appointment_id), 0, -1).await?;
        Self::parse_records(raw)
    }

    async fn last_record(
        &self,
        appointment_id: &AppointmentId,
    ) -> Result<Option<StatusRecord>, StatusError> {
        let mut conn = self.get_connection().await?;
        let raw: Option<String> = conn.lindex(self.history_key(appointment_id), -1).await?;
        raw.map(|data| serde_json::from_str(&data).map_err(StatusError::from))
            .transpose()
    }

    async fn recent(&self, limit: usize) -> Result<Vec<StatusRecord>, StatusError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.get_connection().await?;
        let raw: Vec<String> = conn
            .zrevrange(self.recent_key(), 0, recent_range_end(limit))
            .await?;

        let mut records = Self::parse_records(raw)?;
        records.sort_by(|a, b| b.ordering_key().cmp(&a.ordering_key()));
        Ok(records)
    }

    async fn snapshot(&self) -> Result<Vec<AppointmentSnapshot>, StatusError> {
        let mut conn = self.get_connection().await?;
        let current: HashMap<String, String> = conn.hgetall(self.current_key()).await?;

        let mut snapshots = Vec::with_capacity(current.len());
        for (id, raw_status) in current {
            let appointment_id = AppointmentId::from(id);
            let last: Option<String> = conn.lindex(self.history_key(&appointment_id), -1).await?;
            let last_record = last
                .map(|data| serde_json::from_str::<StatusRecord>(&data))
                .transpose()?;

            snapshots.push(AppointmentSnapshot {
                appointment_id,
                status: Self::parse_status(&raw_status)?,
                last_record,
            });
        }

        snapshots.sort_by(|a, b| a.appointment_id.cmp(&b.appointment_id));
        Ok(snapshots)
    }

    async fn purge(&self, appointment_id: &AppointmentId) -> Result<bool, StatusError> {
        let mut conn = self.get_connection().await?;
        let history_key = self.history_key(appointment_id);
        let records: Vec<String> = conn.lrange(&history_key, 0, -1).await?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .del(&history_key)
            .hdel(self.current_key(), appointment_id.as_str())
            .srem(self.known_key(), appointment_id.as_str())
            .ignore();
        if !records.is_empty() {
            pipe.zrem(self.recent_key(), records).ignore();
        }

        let (deleted, removed): (u32, u32) = pipe.query_async(&mut conn).await?;

        info!(appointment_id = %appointment_id, "Purged appointment status data");
        Ok(deleted > 0 || removed > 0)
    }

    async fn rebuild_projection(&self) -> Result<usize, StatusError> {
        let mut conn = self.get_connection().await?;
        let known: Vec<String> = conn.smembers(self.known_key()).await?;

        let mut pipe = redis::pipe();
        pipe.atomic().del(self.current_key()).ignore();

        let mut rebuilt = 0;
        for id in known {
            let appointment_id = AppointmentId::from(id);
            let last: Option<String> = conn.lindex(self.history_key(&appointment_id), -1).await?;
            let status = match last {
                Some(data) => serde_json::from_str::<StatusRecord>(&data)?.new_status,
                None => AppointmentStatus::Pending,
            };

            pipe.hset(self.current_key(), appointment_id.as_str(), status.as_str())
                .ignore();
            rebuilt += 1;
        }

        let _: () = pipe.query_async(&mut conn).await?;
        info!("Rebuilt status projection for {} appointments", rebuilt);
        Ok(rebuilt)
    }
}

/// Inclusive stop index for the first `limit` members; `-1` means "to the end".
fn recent_range_end(limit: usize) -> isize {
    isize::try_from(limit - 1).unwrap_or(-1)
}
