use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::{BackendError, OutboxMessage};

// ════════════════════════════════════════════════════════════════
//  Broker & Schema Registry Traits
// ════════════════════════════════════════════════════════════════

/// Подключённый producer broker'а.
///
/// `send` отправляет весь batch в один topic одним вызовом, сохраняя
/// порядок сообщений. Успех означает подтверждение всех реплик (acks=all).
pub trait Producer: Send + Sync {
    fn send<'a>(&'a self, topic: &'a str, messages: &'a [OutboxMessage])
        -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + 'a>>;

    /// Flush in-flight sends and close the connection.
    fn disconnect(&self) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>>;
}

/// Creates connected producers on demand (one per logical producer name).
pub trait ProducerFactory: Send + Sync {
    fn connect<'a>(&'a self, name: &'a str)
        -> Pin<Box<dyn Future<Output = Result<Arc<dyn Producer>, BackendError>> + Send + 'a>>;
}

/// External schema registry. Registering an identical schema twice under
/// the same subject is idempotent and yields the same id.
pub trait SchemaRegistry: Send + Sync {
    fn register<'a>(&'a self, subject: &'a str, schema: &'a str)
        -> Pin<Box<dyn Future<Output = Result<i32, BackendError>> + Send + 'a>>;
}
