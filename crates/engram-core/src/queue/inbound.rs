//! Durable, at-least-once inbound queue of interaction events.
//! Idempotency on (session_id, turn_number) within a retention window;
//! exponential backoff with progressive context reduction; dead-letter
//! after the attempt budget. Tables live in the graph's redb file.

use chrono::{DateTime, Duration, Utc};
use log::warn;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::InboundConfig;
use crate::error::{EngramError, Result};

const INBOX: TableDefinition<u64, &[u8]> = TableDefinition::new("inbox");
const INBOX_KEYS: TableDefinition<&str, i64> = TableDefinition::new("inbox_keys");
const DEAD_LETTER: TableDefinition<u64, &[u8]> = TableDefinition::new("inbox_dead");

/// One interaction event pushed by an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InteractionEvent {
    pub session_id: String,
    pub turn: u32,
    pub channel: String,
    pub text: String,
    /// Entities the agent already believes are in scope.
    #[serde(default)]
    pub entities_hint: Vec<String>,
    #[serde(default)]
    pub client_timestamp: Option<DateTime<Utc>>,
    /// Speech-to-text confidence when the channel is voice.
    #[serde(default)]
    pub stt_confidence: Option<f32>,
    /// Session timezone as minutes east of UTC, for relative dates.
    #[serde(default)]
    pub tz_offset_minutes: i32,
}

impl InteractionEvent {
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.session_id, self.turn)
    }
}

/// How much prior context the extraction gets. Degrades per retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextLevel {
    Full,
    Half,
    Minimal,
}

impl ContextLevel {
    pub fn for_attempt(attempts: u32) -> Self {
        match attempts {
            0 => ContextLevel::Full,
            1 => ContextLevel::Half,
            _ => ContextLevel::Minimal,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedInteraction {
    pub seq: u64,
    pub event: InteractionEvent,
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    pub not_before: DateTime<Utc>,
    pub in_flight: bool,
}

impl QueuedInteraction {
    pub fn context_level(&self) -> ContextLevel {
        ContextLevel::for_attempt(self.attempts)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted,
    /// Same idempotency key seen within the retention window.
    Duplicate,
}

pub struct InboundQueue {
    db: Arc<Database>,
    config: InboundConfig,
    next_seq: AtomicU64,
}

impl InboundQueue {
    pub fn open(db: Arc<Database>, config: InboundConfig) -> Result<Self> {
        let write_txn = db.begin_write()?;
        let max_seq = {
            let inbox = write_txn.open_table(INBOX)?;
            let _ = write_txn.open_table(INBOX_KEYS)?;
            let _ = write_txn.open_table(DEAD_LETTER)?;
            let max_seq = inbox.last()?.map(|(k, _)| k.value()).unwrap_or(0);
            max_seq
        };
        write_txn.commit()?;

        let queue = Self {
            db,
            config,
            next_seq: AtomicU64::new(max_seq + 1),
        };
        queue.recover_in_flight()?;
        Ok(queue)
    }

    /// Items left in flight by a crash are made dispatchable again.
    fn recover_in_flight(&self) -> Result<()> {
        let stuck: Vec<QueuedInteraction> = self
            .scan()?
            .into_iter()
            .filter(|item| item.in_flight)
            .collect();
        for mut item in stuck {
            item.in_flight = false;
            self.put_item(&item)?;
        }
        Ok(())
    }

    /// Non-blocking enqueue. Duplicate keys within the retention window
    /// are dropped.
    pub fn enqueue(&self, event: InteractionEvent) -> Result<EnqueueOutcome> {
        let key = event.idempotency_key();
        let now = Utc::now();

        let write_txn = self.db.begin_write()?;
        {
            let mut keys = write_txn.open_table(INBOX_KEYS)?;
            let seen = keys.get(key.as_str())?.map(|v| v.value());
            if let Some(seen_secs) = seen {
                let age = now.timestamp() - seen_secs;
                if age < self.config.retention_hours * 3600 {
                    return Ok(EnqueueOutcome::Duplicate);
                }
            }
            keys.insert(key.as_str(), now.timestamp())?;

            let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
            let item = QueuedInteraction {
                seq,
                event,
                attempts: 0,
                enqueued_at: now,
                not_before: now,
                in_flight: false,
            };
            let bytes = serde_json::to_vec(&item)?;
            let mut inbox = write_txn.open_table(INBOX)?;
            inbox.insert(seq, bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(EnqueueOutcome::Accepted)
    }

    /// Pop the next dispatchable item, preserving per-session FIFO: an
    /// item whose session has an earlier pending item waits for it.
    pub fn dequeue(&self, now: DateTime<Utc>) -> Result<Option<QueuedInteraction>> {
        let items = self.scan()?;
        let mut blocked_sessions = Vec::new();

        for item in items {
            if blocked_sessions.contains(&item.event.session_id) {
                continue;
            }
            if item.in_flight || item.not_before > now {
                blocked_sessions.push(item.event.session_id.clone());
                continue;
            }

            let mut claimed = item;
            claimed.in_flight = true;
            self.put_item(&claimed)?;
            return Ok(Some(claimed));
        }
        Ok(None)
    }

    /// Processing succeeded; drop the item.
    pub fn ack(&self, seq: u64) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut inbox = write_txn.open_table(INBOX)?;
            inbox.remove(seq)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Processing failed; back off and retry with reduced context, or
    /// dead-letter after the attempt budget.
    pub fn fail(&self, seq: u64, now: DateTime<Utc>) -> Result<FailOutcome> {
        let mut item = self
            .get_item(seq)?
            .ok_or_else(|| EngramError::Validation(format!("no queued item {}", seq)))?;

        item.attempts += 1;
        item.in_flight = false;

        if item.attempts >= self.config.max_attempts {
            warn!(
                "inbound: dead-lettering {} after {} attempts",
                item.event.idempotency_key(),
                item.attempts
            );
            let write_txn = self.db.begin_write()?;
            {
                let mut inbox = write_txn.open_table(INBOX)?;
                inbox.remove(seq)?;
                let mut dead = write_txn.open_table(DEAD_LETTER)?;
                let bytes = serde_json::to_vec(&item)?;
                dead.insert(seq, bytes.as_slice())?;
            }
            write_txn.commit()?;
            return Ok(FailOutcome::DeadLettered);
        }

        let backoff_index = (item.attempts as usize - 1).min(self.config.backoff_secs.len() - 1);
        let backoff = self.config.backoff_secs[backoff_index];
        item.not_before = now + Duration::seconds(backoff as i64);
        self.put_item(&item)?;
        Ok(FailOutcome::Requeued {
            attempt: item.attempts,
            next_context: ContextLevel::for_attempt(item.attempts),
        })
    }

    /// Drop idempotency keys older than the retention window.
    pub fn purge_expired_keys(&self, now: DateTime<Utc>) -> Result<u64> {
        let cutoff = now.timestamp() - self.config.retention_hours * 3600;
        let expired: Vec<String> = {
            let read_txn = self.db.begin_read()?;
            let keys = read_txn.open_table(INBOX_KEYS)?;
            let mut expired = Vec::new();
            for entry in keys.iter()? {
                let (key, seen) = entry?;
                if seen.value() < cutoff {
                    expired.push(key.value().to_string());
                }
            }
            expired
        };

        let count = expired.len() as u64;
        if !expired.is_empty() {
            let write_txn = self.db.begin_write()?;
            {
                let mut keys = write_txn.open_table(INBOX_KEYS)?;
                for key in &expired {
                    keys.remove(key.as_str())?;
                }
            }
            write_txn.commit()?;
        }
        Ok(count)
    }

    pub fn pending_count(&self) -> Result<u64> {
        let read_txn = self.db.begin_read()?;
        let inbox = read_txn.open_table(INBOX)?;
        Ok(inbox.iter()?.count() as u64)
    }

    pub fn dead_letters(&self) -> Result<Vec<QueuedInteraction>> {
        let read_txn = self.db.begin_read()?;
        let dead = read_txn.open_table(DEAD_LETTER)?;
        let mut items = Vec::new();
        for entry in dead.iter()? {
            let (_, value) = entry?;
            items.push(serde_json::from_slice(value.value())?);
        }
        Ok(items)
    }

    fn scan(&self) -> Result<Vec<QueuedInteraction>> {
        let read_txn = self.db.begin_read()?;
        let inbox = read_txn.open_table(INBOX)?;
        let mut items = Vec::new();
        for entry in inbox.iter()? {
            let (_, value) = entry?;
            items.push(serde_json::from_slice(value.value())?);
        }
        Ok(items)
    }

    fn get_item(&self, seq: u64) -> Result<Option<QueuedInteraction>> {
        let read_txn = self.db.begin_read()?;
        let inbox = read_txn.open_table(INBOX)?;
        match inbox.get(seq)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    fn put_item(&self, item: &QueuedInteraction) -> Result<()> {
        let bytes = serde_json::to_vec(item)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut inbox = write_txn.open_table(INBOX)?;
            inbox.insert(item.seq, bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum FailOutcome {
    Requeued {
        attempt: u32,
        next_context: ContextLevel,
    },
    DeadLettered,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_queue() -> (InboundQueue, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(Database::create(dir.path().join("queue.redb")).unwrap());
        let queue = InboundQueue::open(db, InboundConfig::default()).unwrap();
        (queue, dir)
    }

    fn event(session: &str, turn: u32) -> InteractionEvent {
        InteractionEvent {
            session_id: session.to_string(),
            turn,
            channel: "chat".to_string(),
            text: "My wife Lena loves Malbec".to_string(),
            entities_hint: vec![],
            client_timestamp: None,
            stt_confidence: None,
            tz_offset_minutes: 0,
        }
    }

    #[test]
    fn duplicate_key_is_dropped() {
        let (queue, _dir) = open_queue();
        assert_eq!(queue.enqueue(event("s1", 1)).unwrap(), EnqueueOutcome::Accepted);
        assert_eq!(queue.enqueue(event("s1", 1)).unwrap(), EnqueueOutcome::Duplicate);
        assert_eq!(queue.enqueue(event("s1", 2)).unwrap(), EnqueueOutcome::Accepted);
        assert_eq!(queue.pending_count().unwrap(), 2);
    }

    #[test]
    fn dequeue_is_fifo_and_claims() {
        let (queue, _dir) = open_queue();
        queue.enqueue(event("s1", 1)).unwrap();
        queue.enqueue(event("s1", 2)).unwrap();

        let now = Utc::now();
        let first = queue.dequeue(now).unwrap().unwrap();
        assert_eq!(first.event.turn, 1);

        // Turn 2 waits for turn 1 to be acked: same session.
        assert!(queue.dequeue(now).unwrap().is_none());

        queue.ack(first.seq).unwrap();
        let second = queue.dequeue(now).unwrap().unwrap();
        assert_eq!(second.event.turn, 2);
    }

    #[test]
    fn sessions_are_independent() {
        let (queue, _dir) = open_queue();
        queue.enqueue(event("s1", 1)).unwrap();
        queue.enqueue(event("s2", 1)).unwrap();

        let now = Utc::now();
        let first = queue.dequeue(now).unwrap().unwrap();
        let second = queue.dequeue(now).unwrap().unwrap();
        assert_ne!(first.event.session_id, second.event.session_id);
    }

    #[test]
    fn failure_backs_off_and_reduces_context() {
        let (queue, _dir) = open_queue();
        queue.enqueue(event("s1", 1)).unwrap();

        let now = Utc::now();
        let item = queue.dequeue(now).unwrap().unwrap();
        assert_eq!(item.context_level(), ContextLevel::Full);

        let outcome = queue.fail(item.seq, now).unwrap();
        assert_eq!(
            outcome,
            FailOutcome::Requeued {
                attempt: 1,
                next_context: ContextLevel::Half
            }
        );

        // Not dispatchable until the backoff elapses.
        assert!(queue.dequeue(now).unwrap().is_none());
        let later = now + Duration::seconds(2);
        let retried = queue.dequeue(later).unwrap().unwrap();
        assert_eq!(retried.context_level(), ContextLevel::Half);
    }

    #[test]
    fn third_failure_dead_letters() {
        let (queue, _dir) = open_queue();
        queue.enqueue(event("s1", 1)).unwrap();

        let mut now = Utc::now();
        for expected_attempt in 1..=2u32 {
            let item = queue.dequeue(now).unwrap().unwrap();
            let outcome = queue.fail(item.seq, now).unwrap();
            assert_eq!(
                outcome,
                FailOutcome::Requeued {
                    attempt: expected_attempt,
                    next_context: ContextLevel::for_attempt(expected_attempt)
                }
            );
            now = now + Duration::seconds(60);
        }

        let item = queue.dequeue(now).unwrap().unwrap();
        assert_eq!(queue.fail(item.seq, now).unwrap(), FailOutcome::DeadLettered);
        assert_eq!(queue.pending_count().unwrap(), 0);
        assert_eq!(queue.dead_letters().unwrap().len(), 1);
    }

    #[test]
    fn purge_clears_old_keys() {
        let (queue, _dir) = open_queue();
        queue.enqueue(event("s1", 1)).unwrap();
        let far_future = Utc::now() + Duration::hours(100);
        assert_eq!(queue.purge_expired_keys(far_future).unwrap(), 1);
        // Same key accepted again once purged.
        assert_eq!(queue.enqueue(event("s1", 1)).unwrap(), EnqueueOutcome::Accepted);
    }
}
