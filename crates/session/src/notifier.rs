//! Notifications vers le graphe d'exécution du flow
//!
//! Le graphe affiche l'état de construction du flow pendant que l'assistant
//! répond. Il est indépendant du cœur vocal : une notification perdue
//! n'affecte pas la session.

use serde_json::Value;
use tracing::{debug, info};

#[derive(Clone, Debug, PartialEq)]
pub enum FlowSignal {
    /// Le flow commence à s'exécuter
    Running,

    /// Le flow a terminé sa réponse
    Built,

    /// Progression brute transmise par le backend
    Progress(Value),
}

pub trait FlowNotifier: Send + Sync {
    fn notify(&self, flow_id: &str, signal: FlowSignal);
}

/// Ignore toutes les notifications
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopNotifier;

impl FlowNotifier for NoopNotifier {
    fn notify(&self, _flow_id: &str, _signal: FlowSignal) {}
}

/// Écrit les notifications dans les logs
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingNotifier;

impl FlowNotifier for LoggingNotifier {
    fn notify(&self, flow_id: &str, signal: FlowSignal) {
        match signal {
            FlowSignal::Running => info!(flow_id, "Flow en cours d'exécution"),
            FlowSignal::Built => info!(flow_id, "Flow terminé"),
            FlowSignal::Progress(data) => debug!(flow_id, %data, "Progression du flow"),
        }
    }
}
