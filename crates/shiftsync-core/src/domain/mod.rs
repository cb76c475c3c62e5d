//! Domain model (IDs, operations, states, events, routes, projections).

pub mod errors;
pub mod events;
pub mod ids;
pub mod operation;
pub mod outcome;
pub mod request;
pub mod routes;
pub mod snapshot;
pub mod state;

pub use errors::ErrorKind;
pub use events::StatusEvent;
pub use ids::{InstallationId, OperationId};
pub use operation::{NewOperation, OperationKind, QueuedOperation, UnknownKind};
pub use outcome::ReplayOutcome;
pub use request::{ApiRequest, ApiResponse, HttpMethod, RequestSignature, UnknownMethod};
pub use routes::{RequestClass, RouteError, RoutePattern, RouteTable, WriteRouteSpec};
pub use snapshot::{OperationSummary, QueueCounts, QueueSnapshot, UnreadableOperation};
pub use state::{OperationStatus, UnknownStatus};
