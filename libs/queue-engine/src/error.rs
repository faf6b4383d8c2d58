use relay_api::RelayError;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("topic '{0}' not found")]
    UnknownTopic(String),

    #[error("topic '{0}' already exists")]
    TopicExists(String),

    #[error("invalid topic spec for '{topic}': {detail}")]
    InvalidSpec { topic: String, detail: String },

    #[error("message of {size} bytes exceeds max_message_bytes {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("producer closed")]
    Closed,

    #[error("broker fault: {0}")]
    Fault(RelayError),

    #[cfg(feature = "kafka")]
    #[error("kafka: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
}

impl QueueError {
    /// Convert to RelayError, choosing ErrorKind.
    ///
    /// Topic provisioning problems → Config, oversized payload → Format,
    /// everything transport-related → Io.
    pub fn into_relay_error(self) -> RelayError {
        let msg = self.to_string();
        match self {
            QueueError::UnknownTopic(_)
            | QueueError::TopicExists(_)
            | QueueError::InvalidSpec { .. } => RelayError::config(msg),
            QueueError::MessageTooLarge { .. } => RelayError::format_err(msg),
            QueueError::Closed => RelayError::closed(msg),
            QueueError::Fault(e) => e,
            #[cfg(feature = "kafka")]
            QueueError::Kafka(
                rdkafka::error::KafkaError::ClientCreation(_)
                | rdkafka::error::KafkaError::ClientConfig(..),
            ) => RelayError::config(msg),
            #[cfg(feature = "kafka")]
            QueueError::Kafka(_) => RelayError::io(msg),
        }
    }
}

impl From<QueueError> for RelayError {
    fn from(e: QueueError) -> Self {
        e.into_relay_error()
    }
}
