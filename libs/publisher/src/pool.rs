use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::RwLock;

use reelz_api::{Producer, ProducerFactory};

use crate::PublishError;

// ═══════════════════════════════════════════════════════════════
//  ProducerPool
// ═══════════════════════════════════════════════════════════════

/// Реестр именованных producer'ов с явным жизненным циклом
/// (`open` → `get`* → `shutdown_all`).
///
/// Producer создаётся при первом `get` по имени. Если два запроса
/// одновременно промахнулись, в реестр попадает первый вставленный,
/// второй producer сразу отключается.
pub struct ProducerPool {
    factory: Arc<dyn ProducerFactory>,
    producers: RwLock<HashMap<String, Arc<dyn Producer>>>,
    closed: AtomicBool,
}

impl ProducerPool {
    pub fn open(factory: Arc<dyn ProducerFactory>) -> Arc<Self> {
        Arc::new(Self {
            factory,
            producers: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub async fn get(&self, name: &str) -> Result<Arc<dyn Producer>, PublishError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PublishError::PoolClosed);
        }
        if let Some(producer) = self.producers.read().await.get(name) {
            return Ok(producer.clone());
        }

        let created = self
            .factory
            .connect(name)
            .await
            .map_err(|source| PublishError::Connect { name: name.to_string(), source })?;

        let mut producers = self.producers.write().await;
        if self.closed.load(Ordering::Acquire) {
            drop(producers);
            disconnect_quietly(name, created).await;
            return Err(PublishError::PoolClosed);
        }
        if let Some(existing) = producers.get(name) {
            let existing = existing.clone();
            drop(producers);
            disconnect_quietly(name, created).await;
            return Ok(existing);
        }
        producers.insert(name.to_string(), created.clone());
        tracing::info!(producer = %name, "producer connected");
        Ok(created)
    }

    /// Закрыть пул и отключить все producer'ы параллельно.
    ///
    /// После вызова `get` возвращает `PoolClosed`. Повторный вызов ничего не делает.
    pub async fn shutdown_all(&self) -> Result<(), PublishError> {
        self.closed.store(true, Ordering::Release);
        let drained: Vec<(String, Arc<dyn Producer>)> =
            self.producers.write().await.drain().collect();
        if drained.is_empty() {
            return Ok(());
        }

        let results = futures::future::join_all(drained.iter().map(|(name, producer)| async move {
            let result = producer.disconnect().await;
            match &result {
                Ok(()) => tracing::info!(producer = %name, "producer disconnected"),
                Err(e) => tracing::error!(producer = %name, error = %e, "producer disconnect failed"),
            }
            result
        }))
        .await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            return Err(PublishError::Shutdown { failed });
        }
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.producers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

async fn disconnect_quietly(name: &str, producer: Arc<dyn Producer>) {
    if let Err(e) = producer.disconnect().await {
        tracing::warn!(producer = %name, error = %e, "disconnect of surplus producer failed");
    }
}
