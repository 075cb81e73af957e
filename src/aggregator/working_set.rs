// src/aggregator/working_set.rs — Concurrent per-session working set
//
// Locking discipline:
//   - The set points at one live generation. A fold clones that pointer
//     under a brief read lock and never holds it while folding.
//   - A generation's membership map sits behind its own Mutex, held only to
//     look up or insert a slot. Creating a session therefore never waits on
//     another session's fold.
//   - Each slot is a Mutex<Option<SessionAggregate>>: folds for the same
//     session serialize on it, folds for different sessions never share it.
//   - snapshot_and_clear installs a fresh generation, seals the old map, then
//     takes each slot's aggregate under its Mutex. A fold either finished
//     before the take (captured) or finds the slot empty and retries against
//     the fresh generation (deferred).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use super::aggregate::SessionAggregate;
use crate::infra::errors::PipelineError;
use crate::model::event::CodeEvent;

/// `None` once the slot's aggregate has been taken by a snapshot.
type Slot = Arc<Mutex<Option<SessionAggregate>>>;

/// Sessions folded since the last snapshot. `None` once sealed.
struct Generation {
    sessions: Mutex<Option<HashMap<String, Slot>>>,
}

impl Generation {
    fn new() -> Self {
        Self {
            sessions: Mutex::new(Some(HashMap::new())),
        }
    }

    /// The session's slot, created on first use. `None` if already sealed.
    fn slot(&self, session_id: &str) -> Option<Slot> {
        let mut sessions = lock(&self.sessions);
        let map = sessions.as_mut()?;
        let slot = map
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Some(SessionAggregate::new(session_id)))));
        Some(Arc::clone(slot))
    }

    fn slots(&self) -> Vec<Slot> {
        lock(&self.sessions)
            .as_ref()
            .map(|map| map.values().cloned().collect())
            .unwrap_or_default()
    }

    fn seal(&self) -> HashMap<String, Slot> {
        lock(&self.sessions).take().unwrap_or_default()
    }
}

/// Exactly one live aggregate per active session.
pub struct SessionWorkingSet {
    current: RwLock<Arc<Generation>>,
}

impl Default for SessionWorkingSet {
    fn default() -> Self {
        Self {
            current: RwLock::new(Arc::new(Generation::new())),
        }
    }
}

impl SessionWorkingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold an event into its session's aggregate, creating it if needed.
    ///
    /// Events with a blank session id are rejected before any lock is taken.
    pub fn fold(&self, event: &CodeEvent) -> Result<(), PipelineError> {
        event.validate_session()?;

        // A retry only happens after a snapshot has already installed a newer
        // generation, so this settles on the next pass.
        loop {
            let generation = self.generation();
            let Some(slot) = generation.slot(&event.session_id) else {
                continue;
            };
            if let Some(aggregate) = lock(&slot).as_mut() {
                aggregate.fold(event);
                return Ok(());
            };
        }
    }

    /// Atomically take every aggregate and leave the set empty.
    pub fn snapshot_and_clear(&self) -> Vec<SessionAggregate> {
        let retired = {
            let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *current, Arc::new(Generation::new()))
        };

        let mut captured: Vec<SessionAggregate> = retired
            .seal()
            .into_values()
            .filter_map(|slot| lock(&slot).take())
            .collect();
        captured.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        captured
    }

    /// Copy of the current state, sorted by session id. Not synchronized with
    /// concurrent folds beyond per-session consistency.
    pub fn peek(&self) -> Vec<SessionAggregate> {
        let mut view: Vec<SessionAggregate> = self
            .generation()
            .slots()
            .iter()
            .filter_map(|slot| lock(slot).clone())
            .collect();
        view.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        view
    }

    pub fn get(&self, session_id: &str) -> Option<SessionAggregate> {
        let generation = self.generation();
        let slot = lock(&generation.sessions).as_ref()?.get(session_id).cloned()?;
        let aggregate = lock(&slot).clone();
        aggregate
    }

    pub fn len(&self) -> usize {
        let generation = self.generation();
        let len = lock(&generation.sessions).as_ref().map_or(0, HashMap::len);
        len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn generation(&self) -> Arc<Generation> {
        Arc::clone(&self.current.read().unwrap_or_else(|e| e.into_inner()))
    }
}

// A fold that panicked mid-way poisons only its own session; keep using it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    fn event(session: &str, ts: i64) -> CodeEvent {
        CodeEvent {
            session_id: session.into(),
            client_timestamp_ms: ts,
            file_uri: "file:///a.rs".into(),
            file_name: Some("a.rs".into()),
            line_number: 1,
            text_normalized: "x".into(),
            source: None,
            server_timestamp_ms: None,
        }
    }

    fn slot(ws: &SessionWorkingSet, session_id: &str) -> Slot {
        ws.generation().slot(session_id).unwrap()
    }

    #[test]
    fn test_fold_creates_one_aggregate_per_session() {
        let ws = SessionWorkingSet::new();
        ws.fold(&event("a", 1)).unwrap();
        ws.fold(&event("a", 2)).unwrap();
        ws.fold(&event("b", 3)).unwrap();
        assert_eq!(ws.len(), 2);
        assert_eq!(ws.get("a").unwrap().total_events, 2);
        assert_eq!(ws.get("b").unwrap().total_events, 1);
    }

    #[test]
    fn test_blank_session_rejected_without_side_effects() {
        let ws = SessionWorkingSet::new();
        ws.fold(&event("a", 1)).unwrap();
        let before = ws.get("a").unwrap();
        assert!(ws.fold(&event("", 2)).is_err());
        assert!(ws.fold(&event("   ", 3)).is_err());
        assert_eq!(ws.len(), 1);
        assert_eq!(ws.get("a").unwrap(), before);
    }

    #[test]
    fn test_snapshot_then_peek_is_empty() {
        let ws = SessionWorkingSet::new();
        ws.fold(&event("a", 1)).unwrap();
        ws.fold(&event("b", 1)).unwrap();
        let snap = ws.snapshot_and_clear();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].session_id, "a");
        assert!(ws.peek().is_empty());
        assert!(ws.is_empty());
    }

    #[test]
    fn test_fold_after_snapshot_starts_fresh() {
        let ws = SessionWorkingSet::new();
        for ts in 0..5 {
            ws.fold(&event("a", ts)).unwrap();
        }
        let first = ws.snapshot_and_clear();
        ws.fold(&event("a", 100)).unwrap();
        assert_eq!(first[0].total_events, 5);
        let fresh = ws.get("a").unwrap();
        assert_eq!(fresh.total_events, 1);
        assert_eq!(fresh.first_event_time, Some(100));
    }

    #[test]
    fn test_peek_is_non_destructive() {
        let ws = SessionWorkingSet::new();
        ws.fold(&event("a", 1)).unwrap();
        assert_eq!(ws.peek().len(), 1);
        assert_eq!(ws.peek().len(), 1);
        assert_eq!(ws.snapshot_and_clear().len(), 1);
    }

    #[test]
    fn test_distinct_sessions_do_not_block() {
        let ws = Arc::new(SessionWorkingSet::new());
        ws.fold(&event("a", 1)).unwrap();
        ws.fold(&event("b", 1)).unwrap();

        // Hold session a's aggregate lock as a long-running fold would.
        let slot_a = slot(&ws, "a");
        let _held = lock(&slot_a);

        let (tx, rx) = mpsc::channel();
        let other = Arc::clone(&ws);
        let handle = std::thread::spawn(move || {
            other.fold(&event("b", 2)).unwrap();
            tx.send(()).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
        handle.join().unwrap();
    }

    #[test]
    fn test_new_session_created_while_another_fold_is_in_flight() {
        let ws = Arc::new(SessionWorkingSet::new());
        ws.fold(&event("a", 1)).unwrap();

        let slot_a = slot(&ws, "a");
        let _held = lock(&slot_a);

        let (tx, rx) = mpsc::channel();
        let other = Arc::clone(&ws);
        let handle = std::thread::spawn(move || {
            other.fold(&event("c", 1)).unwrap();
            other.fold(&event("d", 1)).unwrap();
            tx.send(()).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
        handle.join().unwrap();
        assert_eq!(ws.len(), 3);
    }

    #[test]
    fn test_snapshot_while_fold_waits_keeps_the_event() {
        let ws = Arc::new(SessionWorkingSet::new());
        ws.fold(&event("a", 1)).unwrap();

        let slot_a = slot(&ws, "a");
        let held = lock(&slot_a);

        let folder = {
            let ws = Arc::clone(&ws);
            std::thread::spawn(move || ws.fold(&event("a", 2)).unwrap())
        };
        let snapshotter = {
            let ws = Arc::clone(&ws);
            std::thread::spawn(move || ws.snapshot_and_clear())
        };
        std::thread::sleep(Duration::from_millis(50));
        drop(held);

        folder.join().unwrap();
        let captured: u64 = snapshotter
            .join()
            .unwrap()
            .iter()
            .map(|a| a.total_events)
            .sum();
        let remaining: u64 = ws.peek().iter().map(|a| a.total_events).sum();
        assert_eq!(captured + remaining, 2);
        assert!(captured >= 1);
    }

    #[test]
    fn test_same_session_folds_serialize() {
        let ws = Arc::new(SessionWorkingSet::new());
        ws.fold(&event("a", 1)).unwrap();

        let (tx, rx) = mpsc::channel();
        let slot_a = slot(&ws, "a");
        let handle = {
            let held = lock(&slot_a);

            let other = Arc::clone(&ws);
            let handle = std::thread::spawn(move || {
                other.fold(&event("a", 2)).unwrap();
                tx.send(()).unwrap();
            });

            assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
            drop(held);
            handle
        };

        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
        handle.join().unwrap();
        assert_eq!(ws.get("a").unwrap().total_events, 2);
    }

    #[test]
    fn test_concurrent_folds_and_snapshots_lose_nothing() {
        const THREADS: usize = 8;
        const PER_THREAD: i64 = 2_000;

        let ws = Arc::new(SessionWorkingSet::new());
        let mut workers = Vec::new();
        for t in 0..THREADS {
            let ws = Arc::clone(&ws);
            workers.push(std::thread::spawn(move || {
                // Two threads share each session to exercise same-key contention.
                let session = format!("s{}", t % (THREADS / 2));
                for i in 0..PER_THREAD {
                    ws.fold(&event(&session, i)).unwrap();
                }
            }));
        }

        let mut total = 0u64;
        while workers.iter().any(|w| !w.is_finished()) {
            total += ws
                .snapshot_and_clear()
                .iter()
                .map(|a| a.total_events)
                .sum::<u64>();
            std::thread::yield_now();
        }
        for w in workers {
            w.join().unwrap();
        }
        total += ws
            .snapshot_and_clear()
            .iter()
            .map(|a| a.total_events)
            .sum::<u64>();

        assert_eq!(total, THREADS as u64 * PER_THREAD as u64);
    }
}
