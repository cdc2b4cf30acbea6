use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use shared_models::AppointmentId;

use crate::error::StatusError;
use crate::models::{AppointmentSnapshot, AppointmentStatus, StatusRecord, StatusRecordDraft};

/// Durable keyed storage of the status history and its current-status projection.
///
/// `append` must write the history entry and the projection together or not at all.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Register an id with an implicit `pending` status. Returns false if it was already known.
    async fn register(&self, appointment_id: &AppointmentId) -> Result<bool, StatusError>;

    /// Assign the next sequence number, append the record and update the projection.
    async fn append(&self, draft: StatusRecordDraft) -> Result<StatusRecord, StatusError>;

    async fn current_status(
        &self,
        appointment_id: &AppointmentId,
    ) -> Result<Option<AppointmentStatus>, StatusError>;

    async fn history(&self, appointment_id: &AppointmentId) -> Result<Vec<StatusRecord>, StatusError>;

    async fn last_record(
        &self,
        appointment_id: &AppointmentId,
    ) -> Result<Option<StatusRecord>, StatusError>;

    /// Most recent records across all appointments, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<StatusRecord>, StatusError>;

    async fn snapshot(&self) -> Result<Vec<AppointmentSnapshot>, StatusError>;

    /// Remove an appointment and its history. Only called on explicit external purge.
    async fn purge(&self, appointment_id: &AppointmentId) -> Result<bool, StatusError>;

    /// Recompute the current-status projection from history alone. Returns the number of ids.
    async fn rebuild_projection(&self) -> Result<usize, StatusError>;
}

#[derive(Debug, Default)]
struct StatusTables {
    history: HashMap<AppointmentId, Vec<StatusRecord>>,
    current: HashMap<AppointmentId, AppointmentStatus>,
    next_sequence: u64,
}

/// Single-process store. Each write is one critical section under the table lock.
#[derive(Debug, Default)]
pub struct InMemoryStatusStore {
    tables: RwLock<StatusTables>,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a projection entry without touching history. Used to exercise rebuilds.
    pub async fn corrupt_projection(&self, appointment_id: &AppointmentId, status: AppointmentStatus) {
        let mut tables = self.tables.write().await;
        tables.current.insert(appointment_id.clone(), status);
    }
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
    async fn register(&self, appointment_id: &AppointmentId) -> Result<bool, StatusError> {
        let mut tables = self.tables.write().await;
        if tables.current.contains_key(appointment_id) {
            return Ok(false);
        }

        tables.current.insert(appointment_id.clone(), AppointmentStatus::Pending);
        tables.history.entry(appointment_id.clone()).or_default();
        Ok(true)
    }

    async fn append(&self, draft: StatusRecordDraft) -> Result<StatusRecord, StatusError> {
        let mut tables = self.tables.write().await;

        tables.next_sequence += 1;
        let record = draft.into_record(tables.next_sequence);

        tables
            .current
            .insert(record.appointment_id.clone(), record.new_status);
        tables
            .history
            .entry(record.appointment_id.clone())
            .or_default()
            .push(record.clone());

        debug!(
            appointment_id = %record.appointment_id,
            sequence = record.sequence,
            "Status record appended"
        );
        Ok(record)
    }

    async fn current_status(
        &self,
        appointment_id: &AppointmentId,
    ) -> Result<Option<AppointmentStatus>, StatusError> {
        let tables = self.tables.read().await;
        Ok(tables.current.get(appointment_id).copied())
    }

    async fn history(&self, appointment_id: &AppointmentId) -> Result<Vec<StatusRecord>, StatusError> {
        let tables = self.tables.read().await;
        Ok(tables.history.get(appointment_id).cloned().unwrap_or_default())
    }

    async fn last_record(
        &self,
        appointment_id: &AppointmentId,
    ) -> Result<Option<StatusRecord>, StatusError> {
        let tables = self.tables.read().await;
        Ok(tables
            .history
            .get(appointment_id)
            .and_then(|records| records.last().cloned()))
    }

    async fn recent(&self, limit: usize) -> Result<Vec<StatusRecord>, StatusError> {
        let tables = self.tables.read().await;
        let mut records: Vec<StatusRecord> = tables.history.values().flatten().cloned().collect();
        records.sort_by(|a, b| b.ordering_key().cmp(&a.ordering_key()));
        records.truncate(limit);
        Ok(records)
    }

    async fn snapshot(&self) -> Result<Vec<AppointmentSnapshot>, StatusError> {
        let tables = self.tables.read().await;
        let mut snapshots: Vec<AppointmentSnapshot> = tables
            .current
            .iter()
            .map(|(appointment_id, status)| AppointmentSnapshot {
                appointment_id: appointment_id.clone(),
                status: *status,
                last_record: tables
                    .history
                    .get(appointment_id)
                    .and_then(|records| records.last().cloned()),
            })
            .collect();
        snapshots.sort_by(|a, b| a.appointment_id.cmp(&b.appointment_id));
        Ok(snapshots)
    }

    async fn purge(&self, appointment_id: &AppointmentId) -> Result<bool, StatusError> {
        let mut tables = self.tables.write().await;
        let known = tables.current.remove(appointment_id).is_some();
        let had_history = tables.history.remove(appointment_id).is_some();
        Ok(known || had_history)
    }

    async fn rebuild_projection(&self) -> Result<usize, StatusError> {
        let mut tables = self.tables.write().await;
        let rebuilt: HashMap<AppointmentId, AppointmentStatus> = tables
            .history
            .iter()
            .map(|(appointment_id, records)| {
                let status = records
                    .last()
                    .map(|record| record.new_status)
                    .unwrap_or_default();
                (appointment_id.clone(), status)
            })
            .collect();

        let count = rebuilt.len();
        tables.current = rebuilt;
        Ok(count)
    }
}
