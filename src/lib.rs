pub mod bridge;
pub mod config;
pub mod error;
pub mod transport;

pub use bridge::{
    BackendSink, CancelReason, ConnectionState, CorrelationToken, DiagnosticsSnapshot,
    InferenceBridge, InferenceClient, LatentInfo, LatentState, OutputSlot, OwnerId, Resumption,
    Scheduler, TickReport,
};
pub use config::BridgeSettings;
pub use error::{BridgeError, BridgeResult, CorrelationError, TransportError};
pub use transport::{LocalTransport, Model, Transport};
