use kube::Client;
use std::sync::Arc;
use tokio::time::Duration;

use duck_operator_common::config::ControllerConfig;
use duck_operator_common::state::State;

use crate::controller::submanager::SubManagerSet;

// Context struct to hold the kube client, shared state, and the registry of
// per-DuckType sub-managers
#[derive(Clone)]
pub struct Context {
    pub client: Client,
    pub state: Option<Arc<State>>,
    pub submanagers: Arc<SubManagerSet>,
}

impl Context {
    pub fn new(client: Client) -> Self {
        let sync_period = Duration::from_secs(ControllerConfig::default().sync_period_secs);
        Self {
            submanagers: Arc::new(SubManagerSet::new(client.clone(), sync_period)),
            client,
            state: None,
        }
    }

    pub fn with_state(mut self, state: Arc<State>) -> Self {
        let sync_period = Duration::from_secs(state.config.controller.sync_period_secs);
        self.submanagers = Arc::new(SubManagerSet::new(self.client.clone(), sync_period));
        self.state = Some(state);
        self
    }

    pub fn requeue_after(&self) -> Duration {
        let secs = self
            .state
            .as_ref()
            .map(|state| state.config.controller.requeue_secs)
            .unwrap_or_else(|| ControllerConfig::default().requeue_secs);
        Duration::from_secs(secs)
    }
}
