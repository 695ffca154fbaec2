use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::Mutex;

use reelz_api::{BackendError, SchemaRegistry};

#[derive(Default)]
struct Subjects {
    /// subject → (schema text, id) in registration order
    versions: HashMap<String, Vec<(String, i32)>>,
    next_id: i32,
}

/// In-memory schema registry. Re-registering an identical schema under the
/// same subject returns the existing id.
#[derive(Default)]
pub struct MemorySchemaRegistry {
    subjects: Mutex<Subjects>,
    calls: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemorySchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `register` calls received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Acquire)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Release);
    }
}

impl SchemaRegistry for MemorySchemaRegistry {
    fn register<'a>(&'a self, subject: &'a str, schema: &'a str)
        -> Pin<Box<dyn Future<Output = Result<i32, BackendError>> + Send + 'a>>
    {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::AcqRel);
            if self.unavailable.load(Ordering::Acquire) {
                return Err(BackendError::io("schema registry unavailable"));
            }
            let mut subjects = self.subjects.lock().await;
            if let Some((_, id)) = subjects
                .versions
                .get(subject)
                .and_then(|v| v.iter().find(|(s, _)| s == schema))
            {
                return Ok(*id);
            }
            subjects.next_id += 1;
            let id = subjects.next_id;
            subjects.versions.entry(subject.to_string()).or_default().push((schema.to_string(), id));
            Ok(id)
        })
    }
}
