use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use reelz_api::SchemaRegistry;
use reelz_api::topic::schema_subject;

use crate::PublishError;
use crate::codec::TopicSchema;

// ═══════════════════════════════════════════════════════════════
//  SchemaRegistryCache
// ═══════════════════════════════════════════════════════════════

/// Кэш идентификаторов схем по subject `{topic}-value`.
///
/// Заполняется лениво. Конкурентные промахи по одному subject могут оба
/// сходить в registry: регистрация идентичной схемы идемпотентна, в кэше
/// остаётся значение последнего писателя.
pub struct SchemaRegistryCache {
    registry: Arc<dyn SchemaRegistry>,
    ids: RwLock<HashMap<String, i32>>,
}

impl SchemaRegistryCache {
    pub fn new(registry: Arc<dyn SchemaRegistry>) -> Self {
        Self { registry, ids: RwLock::new(HashMap::new()) }
    }

    /// Schema id for `topic`; registers the schema on a miss.
    pub async fn resolve(&self, topic: &str, schema: &TopicSchema) -> Result<i32, PublishError> {
        let subject = schema_subject(topic);
        if let Some(id) = self.ids.read().await.get(&subject) {
            return Ok(*id);
        }

        let id = self
            .registry
            .register(&subject, schema.definition())
            .await
            .map_err(|source| PublishError::Registry { subject: subject.clone(), source })?;

        tracing::info!(subject = %subject, schema_id = id, "registered schema");
        self.ids.write().await.insert(subject, id);
        Ok(id)
    }

    /// Drop the cached id so the next `resolve` registers again.
    pub async fn invalidate(&self, topic: &str) -> bool {
        let subject = schema_subject(topic);
        let removed = self.ids.write().await.remove(&subject).is_some();
        if removed {
            tracing::info!(subject = %subject, "schema cache entry invalidated");
        }
        removed
    }

    pub async fn cached(&self, topic: &str) -> Option<i32> {
        self.ids.read().await.get(&schema_subject(topic)).copied()
    }
}
