use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::error::RelayError;

// ════════════════════════════════════════════════════════════════
//  Producer side
// ════════════════════════════════════════════════════════════════

/// Исход одной попытки публикации.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { partition: u32, offset: u64 },
    Failed(RelayError),
}

/// Асинхронное уведомление о доставке одного сообщения.
/// Несёт ссылку на исходный payload, чтобы подтверждение можно было
/// сопоставить с записью.
#[derive(Debug, Clone)]
pub struct DeliveryEvent {
    pub topic: String,
    pub key: Vec<u8>,
    pub payload: Vec<u8>,
    pub outcome: DeliveryOutcome,
}

/// Событие producer'а: доставка конкретного сообщения или ошибка
/// клиента, не привязанная к сообщению (потеря соединения с брокером).
#[derive(Debug, Clone)]
pub enum ProducerEvent {
    Delivery(DeliveryEvent),
    Error(RelayError),
}

/// Поток событий доставки. Реализуется на стороне queue-engine,
/// API crate определяет только трейт, без зависимости от tokio.
pub trait DeliveryStream: Send {
    /// Следующее событие. None = producer закрыт и все события отданы.
    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Option<ProducerEvent>> + Send + '_>>;

    /// Событие, которое уже готово, без ожидания.
    fn try_recv(&mut self) -> Option<ProducerEvent>;
}

/// Producer-половина Queue Client.
///
/// Безопасен для конкурентного использования: publish-цикл и
/// confirmation-задача держат один и тот же handle.
pub trait QueueProducer: Send + Sync {
    /// Поставить сообщение в очередь отправки и сразу вернуть управление.
    /// Ошибка только если сообщение не удалось поставить в очередь.
    fn publish(&self, topic: &str, key: &[u8], payload: Vec<u8>) -> Result<(), RelayError>;

    /// Забрать поток событий доставки. Отдаётся один раз.
    fn deliveries(&self) -> Result<Box<dyn DeliveryStream>, RelayError>;

    /// Дождаться отправки in-flight сообщений. Возвращает число
    /// сообщений, оставшихся недоставленными к истечению `timeout`.
    fn flush(&self, timeout: Duration) -> Pin<Box<dyn Future<Output = usize> + Send + '_>>;

    /// Остановить producer. После close publish возвращает ошибку.
    fn close(&self);
}

// ════════════════════════════════════════════════════════════════
//  Consumer side
// ════════════════════════════════════════════════════════════════

/// Сообщение, полученное consumer'ом.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: Vec<u8>,
    pub payload: Vec<u8>,
}

/// Результат poll'а.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    Message(QueueMessage),
    /// Consumer дочитал partition до конца. Информационное событие.
    PartitionEnd { topic: String, partition: u32, offset: u64 },
    /// Ошибка транспорта. Терминальное событие для subscriber'а.
    Error(RelayError),
}

/// Consumer-половина Queue Client (group-based).
pub trait QueueConsumer: Send {
    fn subscribe(&mut self, topic: &str) -> Result<(), RelayError>;

    /// Следующее событие или None, если за `timeout` ничего не пришло.
    fn poll(&mut self, timeout: Duration) -> Pin<Box<dyn Future<Output = Option<QueueEvent>> + Send + '_>>;

    fn close(&mut self);
}
