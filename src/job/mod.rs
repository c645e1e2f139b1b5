//! Jobs: the message shapes, the persisted status record and its state machine, and the router
//! that turns broker deliveries into stage runs.

pub mod lifecycle;
pub mod message;
pub mod model;
pub mod router;

pub use lifecycle::{JobLifecycle, LifecycleError, LifecycleResult, Transition};
pub use message::{
    CleanMessage, Envelope, IngestMessage, IngestionRequest, JobMessage, JoinMessage, LoadMessage,
    MessageError,
};
pub use model::{BlobRef, InvalidBlobRef, InvalidTransition, JobRecord, JobStatus, Stage};
pub use router::{Outcome, RouteError, Router};
