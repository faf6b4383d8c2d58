//! Event relay pipeline: publisher, subscriber и sink router.

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod publisher;
pub mod router;
pub mod source;
pub mod subscriber;

pub use config::{
    PublishErrorPolicy, PublisherConfig, SchemaConfig, SinkConfig, SubscriberConfig,
    UnknownDestinationPolicy, DEFAULT_COLUMNS,
};
pub use diagnostics::Diagnostics;
pub use error::PipelineError;
pub use publisher::{PublishSummary, Publisher};
pub use router::SinkRouter;
pub use source::{read_lines, LineSchema};
pub use subscriber::{StopReason, Subscriber, SubscriberSummary};
