//! Ce que l'interface voit de la session

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::{sleep, Instant};

use crate::{SessionError, SessionSnapshot, SessionState};

/// Reçoit les changements de la session
///
/// Appelé depuis la boucle du runner : les implémentations ne doivent pas
/// bloquer.
pub trait SessionObserver: Send + Sync {
    fn on_state(&self, snapshot: &SessionSnapshot);

    fn on_status(&self, _status: &str) {}

    /// Chaque erreur arrive ici exactement une fois
    fn on_error(&self, error: &SessionError);

    /// Le tour est terminé, l'historique des messages est à recharger
    fn on_history_refresh(&self, _session_id: &str) {}
}

/// Tout ce qu'un `RecordingObserver` a vu
#[derive(Clone, Debug, Default)]
pub struct Recorded {
    pub snapshots: Vec<SessionSnapshot>,
    pub statuses: Vec<String>,
    pub errors: Vec<String>,
    pub history_refreshes: Vec<String>,
}

impl Recorded {
    /// États successifs, sans répétition consécutive
    pub fn states(&self) -> Vec<SessionState> {
        let mut states: Vec<SessionState> = Vec::new();
        for snapshot in &self.snapshots {
            if states.last() != Some(&snapshot.state) {
                states.push(snapshot.state);
            }
        }
        states
    }

    pub fn last(&self) -> Option<&SessionSnapshot> {
        self.snapshots.last()
    }

    pub fn has_reached(&self, state: SessionState) -> bool {
        self.snapshots.iter().any(|s| s.state == state)
    }
}

/// Observateur qui garde tout en mémoire
#[derive(Debug, Default)]
pub struct RecordingObserver {
    recorded: Mutex<Recorded>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn recorded(&self) -> Recorded {
        self.lock().clone()
    }

    pub fn states(&self) -> Vec<SessionState> {
        self.lock().states()
    }

    pub fn errors(&self) -> Vec<String> {
        self.lock().errors.clone()
    }

    /// Attend que `predicate` soit vrai, ou retourne `false` après `timeout`
    pub async fn wait_until(&self, timeout: Duration, predicate: impl Fn(&Recorded) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if predicate(&*self.lock()) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(Duration::from_millis(2)).await;
        }
    }
}

impl SessionObserver for RecordingObserver {
    fn on_state(&self, snapshot: &SessionSnapshot) {
        self.lock().snapshots.push(snapshot.clone());
    }

    fn on_status(&self, status: &str) {
        self.lock().statuses.push(status.to_string());
    }

    fn on_error(&self, error: &SessionError) {
        self.lock().errors.push(error.to_string());
    }

    fn on_history_refresh(&self, session_id: &str) {
        self.lock().history_refreshes.push(session_id.to_string());
    }
}
