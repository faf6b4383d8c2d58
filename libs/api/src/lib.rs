//! Общие типы и контракты event relay.
//!
//! Record и его provenance, destination-теги, бинарный codec записи,
//! таксономия ошибок и трейты внешних коллабораторов (Queue Client,
//! RPC `PostData`, Backend Writer). Без зависимости от tokio: рантайм
//! приносят реализации.

pub mod codec;
pub mod destination;
pub mod error;
pub mod queue;
pub mod service;
pub mod types;
pub mod util;

pub use destination::Destination;
pub use error::{ErrorKind, RelayError};
pub use queue::{
    DeliveryEvent, DeliveryOutcome, DeliveryStream, ProducerEvent, QueueConsumer, QueueEvent,
    QueueMessage, QueueProducer,
};
pub use service::{BackendWriter, NativeWrite, RecordService, SqlDialect, WriteShape};
pub use types::{stage, Acknowledgement, Field, Hop, Provenance, Record, ACK_NOTE};
pub use util::{date_from_ms, host_identity, hop_timestamp, now_ms};
