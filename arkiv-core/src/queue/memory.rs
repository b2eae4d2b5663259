//! In-memory [`StreamBackend`] with consumer-group semantics, used by
//! worker and history tests. Single-process only.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::backend::{PendingEntry, StreamBackend, StreamEntry};
use crate::error::Result;

#[derive(Debug, Clone)]
struct Pending {
    consumer: String,
    delivered_at: Instant,
}

#[derive(Debug, Default)]
struct Stream {
    entries: Vec<StreamEntry>,
    /// group -> entry id -> delivery state
    pending: HashMap<String, HashMap<String, Pending>>,
    /// group -> index of the next never-delivered entry
    cursor: HashMap<String, usize>,
}

#[derive(Debug, Default)]
pub struct InMemoryStreams {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    streams: HashMap<String, Stream>,
    next_id: u64,
}

impl InMemoryStreams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: make a pending entry look stale.
    pub fn age_pending(&self, stream: &str, group: &str, id: &str, idle: std::time::Duration) {
        let mut state = self.state.lock();
        if let Some(pending) = state
            .streams
            .get_mut(stream)
            .and_then(|s| s.pending.get_mut(group))
            .and_then(|g| g.get_mut(id))
        {
            pending.delivered_at = Instant::now() - idle;
        }
    }

    /// Test hook: reassign a pending entry to another consumer.
    pub fn assign_pending(&self, stream: &str, group: &str, id: &str, consumer: &str) {
        let mut state = self.state.lock();
        if let Some(pending) = state
            .streams
            .get_mut(stream)
            .and_then(|s| s.pending.get_mut(group))
            .and_then(|g| g.get_mut(id))
        {
            pending.consumer = consumer.to_string();
        }
    }
}

fn fields_map(fields: &[(String, String)]) -> HashMap<String, String> {
    fields.iter().cloned().collect()
}

#[async_trait]
impl StreamBackend for InMemoryStreams {
    async fn xadd(&self, stream: &str, fields: &[(String, String)]) -> Result<String> {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = format!("{}-0", state.next_id);
        state
            .streams
            .entry(stream.to_string())
            .or_default()
            .entries
            .push(StreamEntry {
                id: id.clone(),
                fields: fields_map(fields),
            });
        Ok(id)
    }

    async fn xadd_maxlen(
        &self,
        stream: &str,
        maxlen: u64,
        fields: &[(String, String)],
    ) -> Result<String> {
        let id = self.xadd(stream, fields).await?;
        let mut state = self.state.lock();
        if let Some(stream) = state.streams.get_mut(stream) {
            let excess = stream.entries.len().saturating_sub(maxlen as usize);
            if excess > 0 {
                stream.entries.drain(..excess);
                for cursor in stream.cursor.values_mut() {
                    *cursor = cursor.saturating_sub(excess);
                }
            }
        }
        Ok(id)
    }

    async fn ack_and_delete(&self, stream: &str, group: &str, id: &str) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(stream) = state.streams.get_mut(stream) {
            if let Some(pending) = stream.pending.get_mut(group) {
                pending.remove(id);
            }
            if let Some(index) = stream.entries.iter().position(|e| e.id == id) {
                stream.entries.remove(index);
                for cursor in stream.cursor.values_mut() {
                    if *cursor > index {
                        *cursor -= 1;
                    }
                }
            }
        }
        Ok(())
    }

    async fn xlen(&self, stream: &str) -> Result<u64> {
        let state = self.state.lock();
        Ok(state
            .streams
            .get(stream)
            .map(|s| s.entries.len() as u64)
            .unwrap_or(0))
    }

    async fn group_create(&self, stream: &str, group: &str) -> Result<()> {
        let mut state = self.state.lock();
        let stream = state.streams.entry(stream.to_string()).or_default();
        stream.pending.entry(group.to_string()).or_default();
        stream.cursor.entry(group.to_string()).or_insert(0);
        Ok(())
    }

    async fn read_new(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        _block_ms: u64,
    ) -> Result<Vec<StreamEntry>> {
        let mut state = self.state.lock();
        let Some(stream) = state.streams.get_mut(stream) else {
            return Ok(Vec::new());
        };
        let cursor = stream.cursor.entry(group.to_string()).or_insert(0);
        let start = *cursor;
        let picked: Vec<StreamEntry> = stream
            .entries
            .iter()
            .skip(start)
            .take(count)
            .cloned()
            .collect();
        *cursor = start + picked.len();

        let pending = stream.pending.entry(group.to_string()).or_default();
        for entry in &picked {
            pending.insert(
                entry.id.clone(),
                Pending {
                    consumer: consumer.to_string(),
                    delivered_at: Instant::now(),
                },
            );
        }
        Ok(picked)
    }

    async fn read_own_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let state = self.state.lock();
        let Some(stream) = state.streams.get(stream) else {
            return Ok(Vec::new());
        };
        let Some(pending) = stream.pending.get(group) else {
            return Ok(Vec::new());
        };
        Ok(stream
            .entries
            .iter()
            .filter(|entry| {
                pending
                    .get(&entry.id)
                    .is_some_and(|p| p.consumer == consumer)
            })
            .take(count)
            .cloned()
            .collect())
    }

    async fn pending_count(&self, stream: &str, group: &str) -> Result<u64> {
        let state = self.state.lock();
        Ok(state
            .streams
            .get(stream)
            .and_then(|s| s.pending.get(group))
            .map(|p| p.len() as u64)
            .unwrap_or(0))
    }

    async fn pending_range(
        &self,
        stream: &str,
        group: &str,
        count: usize,
    ) -> Result<Vec<PendingEntry>> {
        let state = self.state.lock();
        let Some(stream) = state.streams.get(stream) else {
            return Ok(Vec::new());
        };
        let Some(pending) = stream.pending.get(group) else {
            return Ok(Vec::new());
        };
        let now = Instant::now();
        Ok(stream
            .entries
            .iter()
            .filter_map(|entry| {
                pending.get(&entry.id).map(|p| PendingEntry {
                    id: entry.id.clone(),
                    consumer: p.consumer.clone(),
                    idle_ms: now.duration_since(p.delivered_at).as_millis() as u64,
                })
            })
            .take(count)
            .collect())
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        ids: &[String],
    ) -> Result<Vec<StreamEntry>> {
        let mut state = self.state.lock();
        let Some(stream) = state.streams.get_mut(stream) else {
            return Ok(Vec::new());
        };
        let Some(pending) = stream.pending.get_mut(group) else {
            return Ok(Vec::new());
        };
        let now = Instant::now();
        let mut claimed = Vec::new();
        for id in ids {
            let Some(entry_pending) = pending.get_mut(id) else {
                continue;
            };
            let idle = now.duration_since(entry_pending.delivered_at).as_millis() as u64;
            if idle < min_idle_ms {
                continue;
            }
            entry_pending.consumer = consumer.to_string();
            entry_pending.delivered_at = now;
            if let Some(entry) = stream.entries.iter().find(|e| &e.id == id) {
                claimed.push(entry.clone());
            }
        }
        Ok(claimed)
    }

    async fn range_head(&self, stream: &str, count: usize) -> Result<Vec<StreamEntry>> {
        let state = self.state.lock();
        Ok(state
            .streams
            .get(stream)
            .map(|s| s.entries.iter().take(count).cloned().collect())
            .unwrap_or_default())
    }

    async fn revrange_head(&self, stream: &str, count: usize) -> Result<Vec<StreamEntry>> {
        let state = self.state.lock();
        Ok(state
            .streams
            .get(stream)
            .map(|s| s.entries.iter().rev().take(count).cloned().collect())
            .unwrap_or_default())
    }

    async fn delete(&self, stream: &str, ids: &[String]) -> Result<u64> {
        let mut state = self.state.lock();
        let Some(stream) = state.streams.get_mut(stream) else {
            return Ok(0);
        };
        let before = stream.entries.len();
        stream.entries.retain(|entry| !ids.contains(&entry.id));
        let removed = before - stream.entries.len();
        for pending in stream.pending.values_mut() {
            pending.retain(|id, _| !ids.contains(id));
        }
        let len = stream.entries.len();
        for cursor in stream.cursor.values_mut() {
            *cursor = (*cursor).min(len);
        }
        Ok(removed as u64)
    }
}
