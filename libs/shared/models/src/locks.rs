use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::appointment::AppointmentId;

/// One async mutex per appointment id. Different ids never contend.
#[derive(Debug, Default, Clone)]
pub struct AppointmentLocks {
    locks: Arc<Mutex<HashMap<AppointmentId, Arc<Mutex<()>>>>>,
}

/// Proof that the caller holds the serialization lock for one appointment.
#[derive(Debug)]
pub struct AppointmentGuard {
    appointment_id: AppointmentId,
    _guard: OwnedMutexGuard<()>,
}

impl AppointmentGuard {
    pub fn appointment_id(&self) -> &AppointmentId {
        &self.appointment_id
    }
}

impl AppointmentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, appointment_id: &AppointmentId) -> AppointmentGuard {
        let slot = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(appointment_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        let guard = slot.lock_owned().await;
        debug!(appointment_id = %appointment_id, "Appointment lock acquired");

        AppointmentGuard {
            appointment_id: appointment_id.clone(),
            _guard: guard,
        }
    }

    /// Release a guard and drop its slot when no other caller holds or awaits it.
    ///
    /// The registry lock is taken before the guard is dropped, so a newcomer either shares the
    /// old slot or finds it gone with nobody left on it.
    pub async fn release(&self, guard: AppointmentGuard) {
        let mut locks = self.locks.lock().await;
        let appointment_id = guard.appointment_id.clone();
        drop(guard);

        let idle = locks
            .get(&appointment_id)
            .is_some_and(|slot| Arc::strong_count(slot) == 1);
        if idle {
            locks.remove(&appointment_id);
            debug!(appointment_id = %appointment_id, "Appointment lock slot released");
        }
    }

    pub async fn tracked(&self) -> usize {
        self.locks.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_id_is_serialized() {
        let locks = AppointmentLocks::new();
        let id = AppointmentId::from("A1");

        let guard = locks.lock(&id).await;
        let contender = {
            let locks = locks.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(&id).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn different_ids_do_not_block() {
        let locks = AppointmentLocks::new();
        let _a = locks.lock(&AppointmentId::from("A1")).await;
        let _b = locks.lock(&AppointmentId::from("A2")).await;
        assert_eq!(locks.tracked().await, 2);
    }

    #[tokio::test]
    async fn release_drops_idle_slot() {
        let locks = AppointmentLocks::new();
        let id = AppointmentId::from("A1");

        let guard = locks.lock(&id).await;
        locks.release(guard).await;
        assert_eq!(locks.tracked().await, 0);
    }

    #[tokio::test]
    async fn release_keeps_slot_with_queued_waiter() {
        let locks = AppointmentLocks::new();
        let id = AppointmentId::from("P1");
        let guard = locks.lock(&id).await;

        let (acquired_tx, acquired_rx) = tokio::sync::oneshot::channel();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
        let waiter = {
            let locks = locks.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(&id).await;
                let _ = acquired_tx.send(());
                let _ = done_rx.await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        locks.release(guard).await;
        acquired_rx.await.unwrap();
        assert_eq!(locks.tracked().await, 1);

        let newcomer = {
            let locks = locks.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(&id).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!newcomer.is_finished(), "newcomer must wait for the queued waiter");

        done_tx.send(()).unwrap();
        waiter.await.unwrap();
        newcomer.await.unwrap();
    }
}
