use reelz_api::{ChangeEvent, EventType, OutboxTx};

use crate::OutboxError;

/// Appends change events to the outbox inside the caller's transaction.
///
/// Never commits or rolls back: the transaction boundary belongs to the
/// caller, so the event exists iff the caller's transaction commits.
#[derive(Debug, Default, Clone, Copy)]
pub struct OutboxRecorder;

impl OutboxRecorder {
    pub async fn record<T: OutboxTx + ?Sized>(
        &self,
        tx: &mut T,
        event_type: EventType,
        payload: serde_json::Value,
    ) -> Result<ChangeEvent, OutboxError> {
        let event = ChangeEvent::new(event_type, payload);
        tx.insert_outbox(&event)
            .await
            .map_err(|source| OutboxError::Record { event_type, source })?;
        tracing::debug!(event_type = %event_type, "outbox event recorded");
        Ok(event)
    }
}
