//! Decoding of the hosted database's `text/event-stream` subscriptions.
//!
//! The database first sends a `put` for the subscribed location with the whole collection,
//! then `put`/`patch` events relative to it. [`CollectionTree`] replays them onto a JSON
//! tree from which a [`Snapshot`] is produced.

use core::mem;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::model::{Application, RecordId, Snapshot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSentEvent {
    pub event: String,
    pub data: String,
}

/// Incremental `text/event-stream` parser. Lines end in `\n` or `\r\n`.
#[derive(Default)]
pub struct EventStreamDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl EventStreamDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<ServerSentEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(position) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=position).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if line.is_empty() {
                events.extend(self.dispatch());
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = line.split_once(':').map_or((line.as_ref(), ""), |(field, value)| {
                (field, value.strip_prefix(' ').unwrap_or(value))
            });
            match field {
                "event" => self.event = Some(value.to_owned()),
                "data" => self.data.push(value.to_owned()),
                _ => {}
            }
        }
        events
    }

    fn dispatch(&mut self) -> Option<ServerSentEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        Some(ServerSentEvent {
            event: event.unwrap_or_else(|| "message".to_owned()),
            data: mem::take(&mut self.data).join("\n"),
        })
    }
}

#[derive(Deserialize)]
struct PathData {
    path: String,
    data: Value,
}

#[derive(Debug, PartialEq, Eq)]
pub enum TreeUpdate {
    Changed,
    Unchanged,
}

/// Local replica of one subscribed collection.
#[derive(Default)]
pub struct CollectionTree {
    root: Value,
}

impl CollectionTree {
    pub fn apply(&mut self, event: &ServerSentEvent) -> Result<TreeUpdate, TransportError> {
        match event.event.as_str() {
            "put" => {
                let PathData { path, data } = serde_json::from_str(&event.data)?;
                put(&mut self.root, &segments(&path), data);
                Ok(TreeUpdate::Changed)
            }
            "patch" => {
                let PathData { path, data } = serde_json::from_str(&event.data)?;
                let base = segments(&path);
                if let Value::Object(children) = data {
                    for (key, value) in children {
                        let mut full = base.clone();
                        full.extend(segments(&key));
                        put(&mut self.root, &full, value);
                    }
                }
                Ok(TreeUpdate::Changed)
            }
            "keep-alive" => Ok(TreeUpdate::Unchanged),
            "cancel" => Err(TransportError::PermissionDenied),
            "auth_revoked" => Err(TransportError::StreamClosed(
                "auth token expired or was revoked".to_owned(),
            )),
            other => {
                debug!("ignoring event {other:?}");
                Ok(TreeUpdate::Unchanged)
            }
        }
    }

    /// Decodes every child of the collection. Children that are not applications are skipped.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let Value::Object(children) = &self.root else {
            return Snapshot::new();
        };
        children
            .iter()
            .filter_map(|(key, value)| {
                let id = match RecordId::new(key.as_str()) {
                    Ok(id) => id,
                    Err(error) => {
                        warn!("skipping record: {error}");
                        return None;
                    }
                };
                let mut value = value.clone();
                if let Value::Object(fields) = &mut value {
                    fields
                        .entry("id")
                        .or_insert_with(|| Value::String(key.clone()));
                }
                match serde_json::from_value::<Application>(value) {
                    Ok(application) => Some((id, application)),
                    Err(error) => {
                        warn!("skipping malformed record {key}: {error}");
                        None
                    }
                }
            })
            .collect()
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|segment| !segment.is_empty()).collect()
}

fn is_empty(value: &Value) -> bool {
    value.is_null() || value.as_object().is_some_and(Map::is_empty)
}

fn put(node: &mut Value, segments: &[&str], data: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *node = data;
        return;
    };
    if !node.is_object() {
        if data.is_null() {
            return;
        }
        *node = Value::Object(Map::new());
    }
    let Value::Object(children) = node else {
        return;
    };
    let child = children.entry(*first).or_insert(Value::Null);
    put(child, rest, data);
    if is_empty(child) {
        children.remove(*first);
    }
}
