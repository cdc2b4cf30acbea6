use std::collections::HashSet;
use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{NaiveDate, NaiveTime};
use uuid::Uuid;

use appointment_status_cell::*;
use shared_models::AppointmentId;

fn engine() -> (StatusEngine, Arc<InMemoryStatusStore>) {
    let store = Arc::new(InMemoryStatusStore::new());
    (StatusEngine::new(store.clone()), store)
}

fn fresh_id() -> AppointmentId {
    AppointmentId::new(format!("appt-{}", Uuid::new_v4()))
}

fn details() -> RescheduleDetails {
    RescheduleDetails::new(
        NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
        NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
    )
}

/// Independent copy of the workflow table.
fn table_allows(from: AppointmentStatus, to: AppointmentStatus) -> bool {
    use AppointmentStatus::*;
    matches!(
        (from, to),
        (Pending, Scheduled)
            | (Pending, Cancelled)
            | (Scheduled, Confirmed)
            | (Scheduled, Declined)
            | (Scheduled, RescheduleRequested)
            | (Scheduled, Cancelled)
            | (Confirmed, InProgress)
            | (Confirmed, RescheduleRequested)
            | (Confirmed, Cancelled)
            | (Declined, Rescheduled)
            | (Declined, Cancelled)
            | (RescheduleRequested, Rescheduled)
            | (RescheduleRequested, Declined)
            | (RescheduleRequested, Cancelled)
            | (Rescheduled, Confirmed)
            | (Rescheduled, InProgress)
            | (Rescheduled, RescheduleRequested)
            | (Rescheduled, Cancelled)
            | (InProgress, Completed)
            | (InProgress, Cancelled)
    )
}

fn path_to(status: AppointmentStatus) -> Vec<AppointmentStatus> {
    use AppointmentStatus::*;
    match status {
        Pending => vec![],
        Scheduled => vec![Scheduled],
        Confirmed => vec![Scheduled, Confirmed],
        Declined => vec![Scheduled, Declined],
        RescheduleRequested => vec![Scheduled, RescheduleRequested],
        Rescheduled => vec![Scheduled, Declined, Rescheduled],
        InProgress => vec![Scheduled, Confirmed, InProgress],
        Completed => vec![Scheduled, Confirmed, InProgress, Completed],
        Cancelled => vec![Cancelled],
    }
}

async fn drive(engine: &StatusEngine, id: &AppointmentId, path: &[AppointmentStatus]) {
    for status in path {
        engine
            .apply_transition(id, *status, Actor::Provider, Some("setup".to_string()), Some(details()))
            .await
            .expect("setup transition should succeed");
    }
}

#[tokio::test]
async fn test_transition_acceptance_matches_table() {
    let (engine, _) = engine();

    for from in AppointmentStatus::ALL {
        for to in AppointmentStatus::ALL {
            for actor in [Actor::Provider, Actor::Patient, Actor::System] {
                let id = fresh_id();
                engine.initialize(&id).await.unwrap();
                drive(&engine, &id, &path_to(from)).await;
                assert_eq!(engine.get_current_status(&id).await.unwrap(), from);

                let expected = table_allows(from, to)
                    || (actor == Actor::System && to == AppointmentStatus::Cancelled && !from.is_terminal());
                let result = engine
                    .apply_transition(&id, to, actor, Some("check".to_string()), Some(details()))
                    .await;

                assert_eq!(
                    result.is_ok(),
                    expected,
                    "{} -> {} by {} should be {}",
                    from,
                    to,
                    actor,
                    if expected { "accepted" } else { "rejected" }
                );
                if !expected {
                    assert_matches!(result, Err(StatusError::InvalidTransition { .. }));
                    assert_eq!(engine.get_current_status(&id).await.unwrap(), from);
                }
            }
        }
    }
}

#[tokio::test]
async fn test_scheduled_cannot_jump_to_completed() {
    let (engine, _) = engine();
    let id = AppointmentId::from("A1");

    assert_eq!(engine.initialize(&id).await.unwrap(), AppointmentStatus::Pending);
    engine
        .apply_transition(&id, AppointmentStatus::Scheduled, Actor::Provider, None, None)
        .await
        .expect("pending -> scheduled should succeed");

    let result = engine
        .apply_transition(&id, AppointmentStatus::Completed, Actor::Provider, None, None)
        .await;

    assert_matches!(
        result,
        Err(StatusError::InvalidTransition {
            from: AppointmentStatus::Scheduled,
            to: AppointmentStatus::Completed,
            actor: Actor::Provider,
        })
    );
    assert_eq!(engine.get_current_status(&id).await.unwrap(), AppointmentStatus::Scheduled);
    assert_eq!(engine.get_history(&id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_rescheduled_without_details_is_missing_data() {
    let (engine, _) = engine();
    let id = fresh_id();
    drive(&engine, &id, &path_to(AppointmentStatus::RescheduleRequested)).await;

    let result = engine
        .apply_transition(&id, AppointmentStatus::Rescheduled, Actor::Provider, None, None)
        .await;

    assert_matches!(result, Err(StatusError::MissingData(_)));
    assert!(result.unwrap_err().is_validation());
    assert_eq!(
        engine.get_current_status(&id).await.unwrap(),
        AppointmentStatus::RescheduleRequested
    );
}

#[tokio::test]
async fn test_history_is_ordered_and_matches_current_status() {
    let (engine, _) = engine();
    let id = fresh_id();
    let path = path_to(AppointmentStatus::Completed);
    drive(&engine, &id, &path).await;

    let history = engine.get_history(&id).await.unwrap();
    assert_eq!(history.len(), path.len());

    let applied: Vec<AppointmentStatus> = history.iter().map(|record| record.new_status).collect();
    assert_eq!(applied, path);
    assert_eq!(history[0].previous_status, AppointmentStatus::Pending);

    for pair in history.windows(2) {
        assert!(pair[0].sequence < pair[1].sequence);
        assert!(pair[0].timestamp <= pair[1].timestamp);
        assert_eq!(pair[0].new_status, pair[1].previous_status);
    }

    let last = history.last().unwrap();
    assert_eq!(engine.get_current_status(&id).await.unwrap(), last.new_status);
}

#[tokio::test]
async fn test_unknown_appointment_reads_as_pending() {
    let (engine, _) = engine();
    let id = AppointmentId::from("never-seen");

    assert_eq!(engine.get_current_status(&id).await.unwrap(), AppointmentStatus::Pending);
    assert!(engine.get_history(&id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reason_is_trimmed_and_empty_reason_dropped() {
    let (engine, _) = engine();
    let id = fresh_id();
    drive(&engine, &id, &[AppointmentStatus::Scheduled]).await;

    let record = engine
        .apply_transition(
            &id,
            AppointmentStatus::RescheduleRequested,
            Actor::Patient,
            Some("  conflict ".to_string()),
            None,
        )
        .await
        .unwrap();
    assert_eq!(record.reason.as_deref(), Some("conflict"));

    let record = engine
        .apply_transition(&id, AppointmentStatus::Declined, Actor::Provider, Some("   ".to_string()), None)
        .await
        .unwrap();
    assert_eq!(record.reason, None);
}

#[tokio::test]
async fn test_attention_flag_follows_current_status() {
    let (engine, _) = engine();
    let a2 = AppointmentId::from("A2");
    let calm = fresh_id();

    drive(&engine, &a2, &[AppointmentStatus::Scheduled]).await;
    drive(&engine, &calm, &[AppointmentStatus::Scheduled, AppointmentStatus::Confirmed]).await;

    engine
        .apply_transition(
            &a2,
            AppointmentStatus::RescheduleRequested,
            Actor::Patient,
            Some("conflict".to_string()),
            None,
        )
        .await
        .unwrap();

    let flagged = engine.get_needing_attention().await.unwrap();
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0].appointment_id, a2);
    assert_eq!(flagged[0].new_status, AppointmentStatus::RescheduleRequested);
    assert_eq!(flagged[0].reason.as_deref(), Some("conflict"));

    // A provider decline keeps the flag but the flagging record changes.
    engine
        .apply_transition(&a2, AppointmentStatus::Declined, Actor::Provider, Some("no slots".to_string()), None)
        .await
        .unwrap();
    let flagged = engine.get_needing_attention().await.unwrap();
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0].new_status, AppointmentStatus::Declined);

    engine
        .apply_transition(&a2, AppointmentStatus::Rescheduled, Actor::Provider, None, Some(details()))
        .await
        .unwrap();
    assert!(engine.get_needing_attention().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_status_summary_covers_every_status_and_sums_to_total() {
    let (engine, _) = engine();

    let summary = engine.get_status_summary().await.unwrap();
    assert_eq!(summary.len(), AppointmentStatus::ALL.len());
    assert_eq!(summary.values().sum::<usize>(), 0);

    let mut total = 0;
    for status in AppointmentStatus::ALL {
        for _ in 0..2 {
            let id = fresh_id();
            engine.initialize(&id).await.unwrap();
            drive(&engine, &id, &path_to(status)).await;
            total += 1;
        }
    }

    let summary = engine.get_status_summary().await.unwrap();
    assert_eq!(summary.len(), AppointmentStatus::ALL.len());
    assert_eq!(summary.values().sum::<usize>(), total);
    for status in AppointmentStatus::ALL {
        assert_eq!(summary[&status], 2, "count for {}", status);
    }
}

#[tokio::test]
async fn test_recent_updates_newest_first_and_capped() {
    let (engine, _) = engine();
    let first = fresh_id();
    let second = fresh_id();

    drive(&engine, &first, &[AppointmentStatus::Scheduled]).await;
    drive(&engine, &second, &[AppointmentStatus::Scheduled, AppointmentStatus::Confirmed]).await;
    drive(&engine, &first, &[AppointmentStatus::Cancelled]).await;

    let recent = engine.get_recent_updates(2).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].appointment_id, first);
    assert_eq!(recent[0].new_status, AppointmentStatus::Cancelled);
    assert_eq!(recent[1].appointment_id, second);
    assert!(recent[0].ordering_key() > recent[1].ordering_key());

    assert_eq!(engine.get_recent_updates(50).await.unwrap().len(), 4);
    assert!(engine.get_recent_updates(0).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_transitions_are_serialized_per_appointment() {
    let store = Arc::new(InMemoryStatusStore::new());
    let engine = Arc::new(StatusEngine::new(store));
    let id = fresh_id();
    drive(&engine, &id, &[AppointmentStatus::Scheduled]).await;

    // Both confirmed and declined are legal from scheduled, but only one may win.
    let attempts = [AppointmentStatus::Confirmed, AppointmentStatus::Declined]
        .into_iter()
        .cycle()
        .take(20)
        .map(|target| {
            let engine = engine.clone();
            let id = id.clone();
            tokio::spawn(async move {
                engine
                    .apply_transition(&id, target, Actor::Provider, None, None)
                    .await
            })
        });

    let results = futures::future::join_all(attempts).await;
    let successes = results
        .into_iter()
        .map(|joined| joined.expect("task panicked"))
        .filter(|result| result.is_ok())
        .count();

    // Neither winner can move to the other target afterwards.
    assert_eq!(successes, 1);

    let history = engine.get_history(&id).await.unwrap();
    assert_eq!(history.len(), 2);
    let sequences: HashSet<u64> = history.iter().map(|record| record.sequence).collect();
    assert_eq!(sequences.len(), history.len());
}

#[tokio::test]
async fn test_rebuild_projection_restores_current_from_history() {
    let (engine, store) = engine();
    let id = fresh_id();
    let idle = fresh_id();
    drive(&engine, &id, &path_to(AppointmentStatus::Confirmed)).await;
    engine.initialize(&idle).await.unwrap();

    store.corrupt_projection(&id, AppointmentStatus::Completed).await;
    assert_eq!(engine.get_current_status(&id).await.unwrap(), AppointmentStatus::Completed);

    let rebuilt = engine.rebuild_projection().await.unwrap();
    assert_eq!(rebuilt, 2);
    assert_eq!(engine.get_current_status(&id).await.unwrap(), AppointmentStatus::Confirmed);
    assert_eq!(engine.get_current_status(&idle).await.unwrap(), AppointmentStatus::Pending);
}

#[tokio::test]
async fn test_purge_removes_appointment_from_views() {
    let (engine, _) = engine();
    let id = fresh_id();
    drive(&engine, &id, &[AppointmentStatus::Scheduled, AppointmentStatus::Declined]).await;
    assert_eq!(engine.get_needing_attention().await.unwrap().len(), 1);

    assert!(engine.purge(&id).await.unwrap());
    assert!(engine.get_history(&id).await.unwrap().is_empty());
    assert!(engine.get_needing_attention().await.unwrap().is_empty());
    assert_eq!(engine.get_status_summary().await.unwrap().values().sum::<usize>(), 0);
    assert!(!engine.purge(&id).await.unwrap());
}

#[tokio::test]
async fn test_purge_keeps_lock_exclusive_for_queued_and_new_callers() {
    let (engine, _) = engine();
    let engine = Arc::new(engine);
    let id = fresh_id();
    drive(&engine, &id, &[AppointmentStatus::Scheduled]).await;

    let guard = engine.lock(&id).await;
    let (acquired_tx, acquired_rx) = tokio::sync::oneshot::channel();
    let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
    let queued = {
        let engine = engine.clone();
        let id = id.clone();
        tokio::spawn(async move {
            let _guard = engine.lock(&id).await;
            let _ = acquired_tx.send(());
            let _ = done_rx.await;
        })
    };
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    assert!(engine.purge_locked(&guard).await.unwrap());
    engine.release(guard).await;
    acquired_rx.await.unwrap();

    let newcomer = {
        let engine = engine.clone();
        let id = id.clone();
        tokio::spawn(async move {
            let _guard = engine.lock(&id).await;
        })
    };
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(!newcomer.is_finished(), "two callers held the lock for one appointment");

    done_tx.send(()).unwrap();
    queued.await.unwrap();
    newcomer.await.unwrap();
}
