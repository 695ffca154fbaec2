use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use event_publisher::EventPublisher;
use reelz_api::topic::{HEADER_EVENT_ID, HEADER_EVENT_TYPE, dead_letter_topic, domain_topic};
use reelz_api::{DeliveryOutcome, EventType, OutboxMessage, OutboxRow, OutboxSource};

use crate::OutboxError;

/// Counters of one drain pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayReport {
    pub fetched: usize,
    pub delivered: usize,
    pub dead_lettered: usize,
    /// Rows left unpublished for the next pass.
    pub failed: usize,
}

// ═══════════════════════════════════════════════════════════════
//  OutboxRelay
// ═══════════════════════════════════════════════════════════════

/// Переносит неопубликованные строки outbox в broker.
///
/// Строки группируются по topic'у `app_events_{EventType}` с сохранением
/// порядка id; каждая группа уходит одним batch'ем. Строка помечается
/// опубликованной только после `Delivered` или `DeadLettered`, поэтому
/// доставка at-least-once.
///
/// Один проход читает outbox страницами по `batch_size` после курсора,
/// пока страница не окажется неполной. Topic, не принявший batch, до конца
/// прохода пропускается: его более поздние строки не отправляются раньше
/// застрявших, а остальные типы событий не ждут за ним.
pub struct OutboxRelay {
    source: Arc<dyn OutboxSource>,
    publisher: Arc<EventPublisher>,
    producer: String,
    batch_size: usize,
}

impl OutboxRelay {
    pub fn new(
        source: Arc<dyn OutboxSource>,
        publisher: Arc<EventPublisher>,
        producer: impl Into<String>,
        batch_size: usize,
    ) -> Self {
        Self { source, publisher, producer: producer.into(), batch_size: batch_size.max(1) }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub async fn drain_once(&self) -> Result<RelayReport, OutboxError> {
        let mut report = RelayReport::default();
        let mut blocked: HashSet<EventType> = HashSet::new();
        let mut cursor = 0_i64;

        loop {
            let rows = self.source.fetch_unpublished(cursor, self.batch_size).await?;
            let Some(last) = rows.last() else { break };
            cursor = last.id;
            report.fetched += rows.len();

            let published = self.publish_page(&rows, &mut blocked, &mut report).await;
            if !published.is_empty() {
                self.source.mark_published(&published).await?;
            }
            if rows.len() < self.batch_size {
                break;
            }
        }

        tracing::debug!(
            fetched = report.fetched,
            delivered = report.delivered,
            dead_lettered = report.dead_lettered,
            failed = report.failed,
            blocked_topics = blocked.len(),
            "outbox drained"
        );
        Ok(report)
    }

    /// Publishes one page and returns the ids to mark. Event types already in
    /// `blocked` are skipped; a failing type is added to it.
    async fn publish_page(
        &self,
        rows: &[OutboxRow],
        blocked: &mut HashSet<EventType>,
        report: &mut RelayReport,
    ) -> Vec<i64> {
        let mut published: Vec<i64> = Vec::with_capacity(rows.len());
        for (event_type, group) in group_by_event_type(rows) {
            if blocked.contains(&event_type) {
                report.failed += group.len();
                continue;
            }
            let topic = domain_topic(event_type);
            let messages = match group.iter().map(|row| envelope(row)).collect::<Result<Vec<_>, _>>() {
                Ok(messages) => messages,
                Err(e) => {
                    tracing::error!(topic = %topic, error = %e, "outbox row cannot be encoded");
                    blocked.insert(event_type);
                    report.failed += group.len();
                    continue;
                }
            };

            let dlq = dead_letter_topic(&topic);
            match self.publisher.publish_batch(&self.producer, &topic, &messages, None, Some(&dlq)).await {
                Ok(outcome) => {
                    match outcome {
                        DeliveryOutcome::Delivered => report.delivered += group.len(),
                        DeliveryOutcome::DeadLettered => report.dead_lettered += group.len(),
                    }
                    published.extend(group.iter().map(|row| row.id));
                }
                Err(e) => {
                    tracing::warn!(topic = %topic, rows = group.len(), error = %e, "outbox batch not published, will retry");
                    blocked.insert(event_type);
                    report.failed += group.len();
                }
            }
        }
        published
    }
}

/// Groups in first-appearance order; rows keep their id order inside a group.
fn group_by_event_type(rows: &[OutboxRow]) -> Vec<(EventType, Vec<&OutboxRow>)> {
    let mut groups: Vec<(EventType, Vec<&OutboxRow>)> = Vec::new();
    for row in rows {
        match groups.iter_mut().find(|(t, _)| *t == row.event.event_type) {
            Some((_, group)) => group.push(row),
            None => groups.push((row.event.event_type, vec![row])),
        }
    }
    groups
}

/// JSON envelope `{id, event_type, payload, created_at}` keyed by row id.
fn envelope(row: &OutboxRow) -> Result<OutboxMessage, OutboxError> {
    let value = serde_json::to_value(row).map_err(|e| OutboxError::Backend(e.into()))?;
    Ok(OutboxMessage::json(&value)?
        .with_key(row.id.to_string())
        .with_header(HEADER_EVENT_ID, row.id.to_string())
        .with_header(HEADER_EVENT_TYPE, row.event.event_type.as_str()))
}

// ═══════════════════════════════════════════════════════════════
//  Relay task: interval → drain
// ═══════════════════════════════════════════════════════════════

/// Запустить relay task: каждые `interval` один проход `drain_once`.
/// Останавливается по `token`.
pub fn spawn_relay_task(
    relay: Arc<OutboxRelay>,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_ms = interval.as_millis() as u64, batch = relay.batch_size(), "outbox relay started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = token.cancelled() => break,
            }
            let report = tokio::select! {
                r = relay.drain_once() => r,
                _ = token.cancelled() => break,
            };
            if let Err(e) = report {
                tracing::error!(error = %e, "outbox relay pass failed");
            }
        }
        tracing::info!("outbox relay stopped");
    })
}
