//! Callbridge Core Library
//!
//! A bidirectional function-exposure bridge between two processes: each side
//! registers named functions and invokes the other side's functions as if
//! they were local. Calls are correlated by id, may nest, and fail loudly
//! when the channel goes away.

pub mod bridge;
pub mod config;
pub mod contract;
pub mod envelope;
pub mod error;
pub mod presentation;
pub mod registry;
pub mod transport;

// Re-export commonly used types
pub use bridge::{Bridge, PendingCall};
pub use config::{BridgeConfig, Config, EndpointConfig, LoggingConfig};
pub use contract::{Contract, Signature, ValueKind};
pub use envelope::{CorrelationId, Direction, Envelope, to_result};
pub use error::{BridgeError, BridgeResult, ErrorInfo};
pub use presentation::{NO_ARGS, PresentationClient, Presenter, expose_presenter};
pub use registry::{Affinity, CallContext, ExposedFunction, async_fn, sync_fn};
pub use transport::{Channel, StreamTransport};
