pub mod admission;
pub mod relay;

pub use admission::{
    AdmissionController, AdmissionError, AdmissionLimits, AdmissionSnapshot, AdmittedSession,
    SessionGuard, SessionSnapshot,
};
pub use relay::{
    ConnectionManager, ConnectionState, ControlHandler, ForwardControl, ManagerEvent,
    ManagerHandle, ReconnectConfig, SessionSettings, TungsteniteConnector, UpstreamConnector,
};
