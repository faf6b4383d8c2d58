use relay_api::RelayError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Ошибка чтения исходного файла — фатальна для publisher'а.
    #[error("source read ({path}): {source}")]
    Source { path: String, source: std::io::Error },

    /// Строка не соответствует схеме колонок. Запись пропускается.
    #[error("malformed record at line {line}: expected {expected} fields, found {found}")]
    Malformed { line: usize, expected: usize, found: usize },

    #[error("codec: {0}")]
    Codec(RelayError),

    #[error("queue client ({context}): {source}")]
    Queue { context: &'static str, source: RelayError },

    #[error("publish: {0}")]
    Publish(RelayError),

    #[error("unrecognized destination '{0}'")]
    UnknownDestination(String),

    #[error("invalid column identifier '{0}'")]
    InvalidColumn(String),

    #[error("config: {0}")]
    Config(String),
}

impl PipelineError {
    /// Привести к RelayError для RPC-границы, сохранив категорию:
    /// данные → Format, конфигурация → Config, транспорт → Io.
    pub fn into_relay_error(self) -> RelayError {
        let msg = self.to_string();
        match self {
            PipelineError::Codec(e)
            | PipelineError::Queue { source: e, .. }
            | PipelineError::Publish(e) => e,
            PipelineError::Source { .. } => RelayError::io(msg),
            PipelineError::Malformed { .. }
            | PipelineError::UnknownDestination(_)
            | PipelineError::InvalidColumn(_) => RelayError::format_err(msg),
            PipelineError::Config(_) => RelayError::config(msg),
        }
    }

    /// Ошибка конфигурации (а не данных или транспорта).
    pub fn is_config(&self) -> bool {
        match self {
            PipelineError::Config(_) => true,
            PipelineError::Queue { source, .. } => source.is_config(),
            _ => false,
        }
    }
}

impl From<PipelineError> for RelayError {
    fn from(e: PipelineError) -> Self {
        e.into_relay_error()
    }
}
