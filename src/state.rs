use std::sync::Arc;

use crate::config::ServerConfig;
use crate::core::admission::AdmissionController;
use crate::core::relay::{ControlHandler, ForwardControl, UpstreamConnector};

/// Shared application state handed to every route.
pub struct AppState {
    pub config: ServerConfig,
    pub admission: Arc<AdmissionController>,
}

impl AppState {
    /// State wired to the configured upstream with the default control
    /// handler.
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let connector = Arc::new(config.upstream_connector());
        Self::with_parts(config, connector, Arc::new(ForwardControl))
    }

    pub fn with_parts(
        config: ServerConfig,
        connector: Arc<dyn UpstreamConnector>,
        control: Arc<dyn ControlHandler>,
    ) -> Arc<Self> {
        let admission = Arc::new(AdmissionController::new(
            config.admission_limits(),
            config.session_settings(),
            connector,
            control,
        ));
        Arc::new(Self { config, admission })
    }
}
