use crate::domain::collections::TaskCollections;
use crate::infrastructure::error::InfraError;
use chrono::NaiveDate;
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// Mutable state behind a task store: the selected date's collections plus the
/// per-operation bookkeeping the UI reads.
#[derive(Debug, Clone, Default)]
pub struct StoreState {
    pub selected_date: Option<NaiveDate>,
    pub collections: TaskCollections,
    pub in_flight: HashSet<String>,
    pub last_error: Option<String>,
}

pub(crate) fn lock_state(
    state: &Mutex<StoreState>,
) -> Result<MutexGuard<'_, StoreState>, InfraError> {
    state
        .lock()
        .map_err(|error| InfraError::Persistence(format!("task store lock poisoned: {error}")))
}

/// Clears an in-flight key when the transaction finishes or its future is dropped.
struct InFlightGuard<'a> {
    state: &'a Mutex<StoreState>,
    key: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.in_flight.remove(&self.key);
        }
    }
}

struct Prepared<R> {
    snapshot: TaskCollections,
    date: Option<NaiveDate>,
    request: R,
}

fn prepare<R>(
    state: &Mutex<StoreState>,
    key: &str,
    mutate: impl FnOnce(&mut TaskCollections) -> Result<R, InfraError>,
) -> Result<Prepared<R>, InfraError> {
    let mut guard = lock_state(state)?;
    if guard.in_flight.contains(key) {
        return Err(InfraError::Busy(key.to_string()));
    }
    let snapshot = guard.collections.clone();
    let request = match mutate(&mut guard.collections) {
        Ok(request) => request,
        Err(error) => {
            guard.collections = snapshot;
            return Err(error);
        }
    };
    guard.in_flight.insert(key.to_string());
    Ok(Prepared {
        snapshot,
        date: guard.selected_date,
        request,
    })
}

fn settle<T>(
    state: &Mutex<StoreState>,
    operation: &str,
    key: &str,
    snapshot: TaskCollections,
    date: Option<NaiveDate>,
    outcome: Result<T, InfraError>,
    reconcile: impl FnOnce(&mut TaskCollections, &T),
) -> Result<T, InfraError> {
    let mut guard = lock_state(state)?;
    // A date switch while the call was pending replaced the collections wholesale;
    // neither merging nor restoring applies to the new date.
    let same_date = guard.selected_date == date;
    match outcome {
        Ok(value) => {
            if same_date {
                reconcile(&mut guard.collections, &value);
            }
            debug!(operation, key, "optimistic change confirmed");
            Ok(value)
        }
        Err(error) => {
            if same_date {
                guard.collections = snapshot;
            }
            guard.last_error = Some(format!("{operation} failed: {error}"));
            warn!(operation, key, %error, "persistence failed; optimistic change rolled back");
            Err(error)
        }
    }
}

/// Runs one optimistic mutation:
/// snapshot, mutate in memory, persist, then merge the response or restore the snapshot.
///
/// `mutate` must either succeed completely or return an error; on error the collections are
/// left as they were and nothing is persisted. Only one transaction per `key` may be pending.
pub async fn transact<R, T, Fut>(
    state: &Mutex<StoreState>,
    operation: &str,
    key: &str,
    mutate: impl FnOnce(&mut TaskCollections) -> Result<R, InfraError>,
    persist: impl FnOnce(R) -> Fut,
    reconcile: impl FnOnce(&mut TaskCollections, &T),
) -> Result<T, InfraError>
where
    Fut: Future<Output = Result<T, InfraError>>,
{
    let Prepared {
        snapshot,
        date,
        request,
    } = prepare(state, key, mutate)?;
    let _in_flight = InFlightGuard {
        state,
        key: key.to_string(),
    };
    let outcome = persist(request).await;
    settle(state, operation, key, snapshot, date, outcome, reconcile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{to_parking_lot, NewTask, TaskEntry};
    use proptest::prelude::*;

    fn parked(id: &str, order: u32) -> TaskEntry {
        let task = NewTask::titled(
            format!("Task {id}"),
            NaiveDate::from_ymd_opt(2026, 2, 16).expect("date"),
        )
        .into_task(id.to_string())
        .expect("valid task");
        TaskEntry::ParkingLot(to_parking_lot(task, order))
    }

    fn state_with(ids: &[&str]) -> Mutex<StoreState> {
        Mutex::new(StoreState {
            selected_date: NaiveDate::from_ymd_opt(2026, 2, 16),
            collections: TaskCollections::from_entries(
                ids.iter()
                    .enumerate()
                    .map(|(order, id)| parked(id, order as u32)),
            ),
            ..StoreState::default()
        })
    }

    #[tokio::test]
    async fn success_merges_response() {
        let state = state_with(&["a"]);
        let id = transact(
            &state,
            "create",
            "tmp-1",
            |collections| {
                collections.insert(parked("tmp-1", 1));
                Ok(())
            },
            |()| async { Ok::<_, InfraError>("tsk-1".to_string()) },
            |collections, id: &String| {
                collections.replace_id("tmp-1", id);
            },
        )
        .await
        .expect("transaction succeeds");
        assert_eq!(id, "tsk-1");
        let guard = state.lock().expect("lock");
        assert!(guard.collections.contains("tsk-1"));
        assert!(!guard.collections.contains("tmp-1"));
        assert!(guard.in_flight.is_empty());
        assert!(guard.last_error.is_none());
    }

    #[tokio::test]
    async fn failed_validation_leaves_state_untouched() {
        let state = state_with(&["a", "b"]);
        let before = state.lock().expect("lock").collections.clone();
        let result = transact(
            &state,
            "delete",
            "a",
            |collections| {
                collections.remove("a");
                Err::<(), _>(InfraError::Validation("nope".to_string()))
            },
            |()| async { Ok::<(), InfraError>(()) },
            |_, _| {},
        )
        .await;
        assert!(matches!(result, Err(InfraError::Validation(_))));
        let guard = state.lock().expect("lock");
        assert_eq!(guard.collections, before);
        assert!(guard.last_error.is_none(), "validation errors are not persistence errors");
    }

    #[tokio::test]
    async fn same_key_is_busy_while_pending() {
        let state = state_with(&["a"]);
        let (release, wait) = tokio::sync::oneshot::channel::<()>();
        let pending = transact(
            &state,
            "update",
            "a",
            |_| Ok(()),
            |()| async move {
                let _ = wait.await;
                Ok::<(), InfraError>(())
            },
            |_, _| {},
        );
        let second = async {
            tokio::task::yield_now().await;
            let busy = transact(
                &state,
                "update",
                "a",
                |_| Ok(()),
                |()| async { Ok::<(), InfraError>(()) },
                |_, _| {},
            )
            .await;
            let other = transact(
                &state,
                "update",
                "b",
                |_| Ok(()),
                |()| async { Ok::<(), InfraError>(()) },
                |_, _| {},
            )
            .await;
            let _ = release.send(());
            (busy, other)
        };
        let (first, (busy, other)) = tokio::join!(pending, second);
        assert!(first.is_ok());
        assert!(matches!(busy, Err(InfraError::Busy(key)) if key == "a"));
        assert!(other.is_ok(), "unrelated keys may overlap");
        assert!(state.lock().expect("lock").in_flight.is_empty());
    }

    proptest! {
        #[test]
        fn persistence_failure_restores_snapshot(
            removals in proptest::collection::vec(0usize..5usize, 0..5)
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .build()
                .expect("runtime");
            let state = state_with(&["a", "b", "c", "d", "e"]);
            let before = state.lock().expect("lock").collections.clone();
            let ids = ["a", "b", "c", "d", "e"];

            let result = runtime.block_on(transact(
                &state,
                "delete",
                "batch",
                |collections| {
                    for index in &removals {
                        collections.remove(ids[*index]);
                    }
                    Ok(())
                },
                |()| async { Err::<(), _>(InfraError::Persistence("offline".to_string())) },
                |_, _| {},
            ));

            prop_assert!(result.is_err());
            let guard = state.lock().expect("lock");
            prop_assert_eq!(&guard.collections, &before);
            let recorded = guard.last_error.as_deref();
            prop_assert!(recorded.is_some_and(|message| message.contains("offline")));
            prop_assert!(guard.in_flight.is_empty());
        }
    }
}
