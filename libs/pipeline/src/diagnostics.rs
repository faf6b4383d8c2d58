use tracing::Span;

/// Диагностический контекст компонента, передаётся при создании.
///
/// `verbosity` (0..=4) выбирает, какие диагностические сообщения
/// выводятся; на поведение пайплайна он не влияет. Все сообщения
/// пишутся внутри `span` компонента.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    verbosity: u8,
    span: Span,
}

impl Diagnostics {
    pub fn new(component: &'static str, verbosity: u8) -> Self {
        Self { verbosity, span: tracing::info_span!("relay", component) }
    }

    /// Без span'а и с нулевым verbosity (тесты, встраивание).
    pub fn silent() -> Self {
        Self { verbosity: 0, span: Span::none() }
    }

    pub fn verbosity(&self) -> u8 {
        self.verbosity
    }

    pub fn at_least(&self, level: u8) -> bool {
        self.verbosity >= level
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}
