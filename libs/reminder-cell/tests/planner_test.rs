use std::collections::HashSet;
use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};

use reminder_cell::*;
use shared_models::AppointmentId;

fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, day, hour, minute, 0).unwrap()
}

fn jan(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, day).unwrap()
}

fn ten_am() -> NaiveTime {
    NaiveTime::from_hms_opt(10, 0, 0).unwrap()
}

fn planner_at(now: DateTime<Utc>) -> (ReminderPlanner, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(now));
    let planner = ReminderPlanner::new(
        Arc::new(InMemoryReminderPlanStore::new()),
        clock.clone(),
        ReminderPolicy::default(),
    );
    (planner, clock)
}

#[tokio::test]
async fn test_plan_day_before_has_both_offsets() {
    let (planner, _clock) = planner_at(at(9, 9, 0));
    let id = AppointmentId::from("A3");

    let plan = planner.replace_plan(&id, jan(10), ten_am(), &[]).await.unwrap();

    let fire_times: Vec<_> = plan.entries.iter().map(|entry| entry.fire_at).collect();
    assert_eq!(fire_times, vec![at(9, 10, 0), at(10, 9, 0)]);
    assert!(plan.entries.iter().all(|entry| entry.channel == ReminderChannel::Push));
    assert!(plan.entries.iter().all(ReminderEntry::is_pending));
    assert_eq!(plan.appointment_at, at(10, 10, 0));
    assert_eq!(plan.generation, 1);
}

#[tokio::test]
async fn test_plan_drops_offsets_already_in_the_past() {
    let id = AppointmentId::from("A3");

    let (planner, _clock) = planner_at(at(10, 8, 30));
    let plan = planner.replace_plan(&id, jan(10), ten_am(), &[]).await.unwrap();
    assert_eq!(plan.entries.len(), 1);
    assert_eq!(plan.entries[0].offset_minutes, 60);
    assert_eq!(plan.entries[0].fire_at, at(10, 9, 0));

    // Past the 1h mark nothing is left to send, and nothing is backdated.
    let (planner, _clock) = planner_at(at(10, 9, 30));
    let plan = planner.replace_plan(&id, jan(10), ten_am(), &[]).await.unwrap();
    assert!(plan.entries.is_empty());
}

#[tokio::test]
async fn test_plan_for_extreme_dates_skips_unrepresentable_offsets() {
    let id = AppointmentId::from("far-past");
    let (planner, clock) = planner_at(at(9, 9, 0));

    let plan = planner.plan_for(&id, NaiveDate::MIN, NaiveTime::MIN, &[], clock.now());
    assert!(plan.entries.is_empty());

    let plan = planner.plan_for(&id, NaiveDate::MAX, NaiveTime::MIN, &[], clock.now());
    assert_eq!(plan.entries.len(), 2);
}

#[tokio::test]
async fn test_plan_for_fans_out_over_channels_without_duplicates() {
    let (planner, _clock) = planner_at(at(1, 0, 0));
    let id = AppointmentId::from("multi");

    let plan = planner.plan_for(
        &id,
        jan(10),
        ten_am(),
        &[ReminderChannel::Sms, ReminderChannel::Email, ReminderChannel::Sms],
        at(1, 0, 0),
    );

    assert_eq!(plan.entries.len(), 4);
    let keys: HashSet<_> = plan.entries.iter().map(|e| (e.fire_at, e.channel)).collect();
    assert_eq!(keys.len(), 4);
    assert!(plan.entries.windows(2).all(|w| w[0].fire_at <= w[1].fire_at));
}

#[tokio::test]
async fn test_replace_plan_cancels_previous_pending_entries() {
    let (planner, _clock) = planner_at(at(1, 0, 0));
    let id = AppointmentId::from("moved");

    let first = planner.replace_plan(&id, jan(10), ten_am(), &[]).await.unwrap();
    let second = planner.replace_plan(&id, jan(12), ten_am(), &[]).await.unwrap();

    assert_eq!(second.generation, 2);
    assert_eq!(second.appointment_at, at(12, 10, 0));
    assert_eq!(second.pending_entries().count(), 2);

    let schedule = planner.schedule(&id).await.unwrap().unwrap();
    assert_eq!(schedule.retired.len(), 2);
    for old in &first.entries {
        let retired = schedule.retired.iter().find(|entry| entry.id == old.id).unwrap();
        assert_eq!(retired.state, ReminderState::Cancelled);
    }
}

#[tokio::test]
async fn test_replace_plan_with_same_slot_keeps_single_pending_set() {
    let (planner, _clock) = planner_at(at(1, 0, 0));
    let id = AppointmentId::from("same-slot");

    for _ in 0..3 {
        planner.replace_plan(&id, jan(10), ten_am(), &[]).await.unwrap();
    }

    let schedule = planner.schedule(&id).await.unwrap().unwrap();
    let pending: Vec<_> = schedule.all_entries().filter(|entry| entry.is_pending()).collect();
    assert_eq!(pending.len(), 2);
    let keys: HashSet<_> = pending.iter().map(|e| (e.fire_at, e.channel)).collect();
    assert_eq!(keys.len(), pending.len());
}

#[tokio::test]
async fn test_cancel_pending_is_noop_for_unknown_appointment() {
    let (planner, _clock) = planner_at(at(1, 0, 0));
    let cancelled = planner.cancel_pending(&AppointmentId::from("ghost")).await.unwrap();
    assert!(cancelled.is_empty());
}

#[tokio::test]
async fn test_final_entries_are_not_overwritten() {
    let (planner, _clock) = planner_at(at(1, 0, 0));
    let id = AppointmentId::from("final");
    let plan = planner.replace_plan(&id, jan(10), ten_am(), &[]).await.unwrap();
    let entry_id = plan.entries[0].id;

    let sent = planner
        .mark_entry(&id, entry_id, ReminderState::Sent, None)
        .await
        .unwrap();
    assert_matches!(sent, Some(ReminderEntry { state: ReminderState::Sent, .. }));

    let again = planner
        .mark_entry(&id, entry_id, ReminderState::Cancelled, None)
        .await
        .unwrap();
    assert!(again.is_none());

    let cancelled = planner.cancel_pending(&id).await.unwrap();
    assert_eq!(cancelled.len(), 1);
    assert_ne!(cancelled[0].id, entry_id);
}

#[tokio::test]
async fn test_delivery_claim_blocks_cancellation() {
    let (planner, _clock) = planner_at(at(1, 0, 0));
    let id = AppointmentId::from("claimed");
    let plan = planner.replace_plan(&id, jan(10), ten_am(), &[]).await.unwrap();
    let entry_id = plan.entries[0].id;

    let claimed = planner.begin_delivery(&id, entry_id).await.unwrap();
    assert!(claimed.is_some());
    assert!(planner.begin_delivery(&id, entry_id).await.unwrap().is_none());

    let cancelled = planner.cancel_pending(&id).await.unwrap();
    assert_eq!(cancelled.len(), 1);

    let finished = planner
        .finish_delivery(&id, entry_id, ReminderState::Sent, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(finished.state, ReminderState::Sent);
}

#[tokio::test]
async fn test_restore_puts_back_snapshot() {
    let (planner, clock) = planner_at(at(1, 0, 0));
    let id = AppointmentId::from("restore");

    planner.replace_plan(&id, jan(10), ten_am(), &[]).await.unwrap();
    let snapshot = planner.schedule(&id).await.unwrap();

    clock.set(at(1, 0, 0) + Duration::minutes(5));
    planner.replace_plan(&id, jan(11), ten_am(), &[]).await.unwrap();
    planner.restore(&id, snapshot.clone()).await.unwrap();
    assert_eq!(planner.schedule(&id).await.unwrap(), snapshot);

    let fresh = AppointmentId::from("restore-none");
    planner.replace_plan(&fresh, jan(10), ten_am(), &[]).await.unwrap();
    planner.restore(&fresh, None).await.unwrap();
    assert!(planner.current_plan(&fresh).await.unwrap().is_none());
}
