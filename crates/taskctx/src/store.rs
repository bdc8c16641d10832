//! Persistence port for the edit log.
//!
//! One record per task, keyed by task id. [`FsEditLogStore`] keeps each
//! record as a JSON file in a per-task directory; embedders with their own
//! storage implement [`EditLogStore`] instead.
//!
//! Loading is lenient by design: a task whose record is missing, unreadable,
//! or partially malformed still gets a usable log. Individual entries that
//! fail to decode are dropped with a warning rather than poisoning the rest.
//!
//! The on-disk shape is a structural dump of the log with message and block
//! indices rendered as base-10 strings and each edit as a 3- or 4-element
//! array:
//!
//! ```json
//! {
//!   "0": {
//!     "editType": "user",
//!     "blocks": {
//!       "1": [[1712000000000, "replace_content", "new text", {"originalPath": "a.ts"}]]
//!     }
//!   }
//! }
//! ```

use crate::edits::{Edit, EditKind, EditLog, EditMetadata, MessageEdits};
use crate::Role;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::warn;

/// File name of the persisted edit log inside a task's directory.
pub const EDIT_LOG_FILE: &str = "context_edits.json";

/// Load/store boundary for the edit log.
///
/// Implementations may block on I/O; these are the only blocking points in
/// the crate. Failures are reported as strings and treated as non-fatal by
/// the manager.
pub trait EditLogStore {
    /// Load the edit log for `task_id`. A missing or undecodable record
    /// yields an empty log, not an error; errors are reserved for transport
    /// failures (unreadable directory, permission problems).
    fn load(&self, task_id: &str) -> Result<EditLog, String>;

    /// Durably write the edit log for `task_id`. Best effort: the caller
    /// logs failures and continues with its in-memory state.
    fn store(&self, task_id: &str, log: &EditLog) -> Result<(), String>;
}

/// Filesystem-backed store: `<root>/<task_id>/context_edits.json`.
pub struct FsEditLogStore {
    root: PathBuf,
}

impl FsEditLogStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn record_path(&self, task_id: &str) -> PathBuf {
        self.root.join(task_id).join(EDIT_LOG_FILE)
    }

    /// Root directory under which task directories live.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl EditLogStore for FsEditLogStore {
    fn load(&self, task_id: &str) -> Result<EditLog, String> {
        let path = self.record_path(task_id);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(EditLog::new());
            }
            Err(e) => return Err(format!("failed to read {}: {e}", path.display())),
        };

        match serde_json::from_str::<Value>(&text) {
            Ok(value) => Ok(decode_edit_log(&value)),
            Err(e) => {
                warn!(
                    "edit log at {} is not valid JSON ({e}); starting with an empty log",
                    path.display()
                );
                Ok(EditLog::new())
            }
        }
    }

    fn store(&self, task_id: &str, log: &EditLog) -> Result<(), String> {
        let path = self.record_path(task_id);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| format!("failed to create {}: {e}", dir.display()))?;
        }
        let json = serde_json::to_string_pretty(&encode_edit_log(log))
            .map_err(|e| format!("failed to serialize edit log: {e}"))?;
        std::fs::write(&path, json).map_err(|e| format!("failed to write {}: {e}", path.display()))
    }
}

// ── Wire codec ─────────────────────────────────────────────────────

/// Encode a log into its persisted JSON shape.
pub fn encode_edit_log(log: &EditLog) -> Value {
    let mut out = Map::new();
    for (index, entry) in log.iter() {
        let mut blocks = Map::new();
        for (block, edits) in &entry.blocks {
            let list: Vec<Value> = edits.iter().map(encode_edit).collect();
            blocks.insert(block.to_string(), Value::Array(list));
        }
        let mut message = Map::new();
        message.insert(
            "editType".to_string(),
            Value::String(entry.edit_type.to_string()),
        );
        message.insert("blocks".to_string(), Value::Object(blocks));
        out.insert(index.to_string(), Value::Object(message));
    }
    Value::Object(out)
}

fn encode_edit(edit: &Edit) -> Value {
    let mut tuple = vec![
        Value::from(edit.timestamp),
        Value::String(edit.kind.as_str().to_string()),
        edit.payload.clone().unwrap_or(Value::Null),
    ];
    if let Some(metadata) = &edit.metadata {
        // Metadata is plain data; serialization cannot fail for it.
        tuple.push(serde_json::to_value(metadata).unwrap_or(Value::Null));
    }
    Value::Array(tuple)
}

/// Decode a persisted log, dropping whatever does not parse.
pub fn decode_edit_log(value: &Value) -> EditLog {
    let mut log = EditLog::new();
    let Some(object) = value.as_object() else {
        warn!("persisted edit log is not an object; starting with an empty log");
        return log;
    };

    for (key, entry) in object {
        let Ok(index) = key.parse::<usize>() else {
            warn!("dropping edit log entry with non-numeric message key {key:?}");
            continue;
        };
        let Some(message) = decode_message_edits(entry) else {
            warn!("dropping malformed edit log entry at message {index}");
            continue;
        };
        if !message.blocks.is_empty() {
            log.set(index, message);
        }
    }
    log
}

fn decode_message_edits(value: &Value) -> Option<MessageEdits> {
    let object = value.as_object()?;
    let edit_type = match object.get("editType")?.as_str()? {
        "user" => Role::User,
        "assistant" => Role::Assistant,
        _ => return None,
    };

    let mut message = MessageEdits::new(edit_type);
    let blocks = object.get("blocks")?.as_object()?;
    for (key, list) in blocks {
        let Ok(block) = key.parse::<usize>() else {
            warn!("dropping edits with non-numeric block key {key:?}");
            continue;
        };
        let Some(list) = list.as_array() else {
            warn!("dropping edits at block {block}: expected an array");
            continue;
        };
        let edits: Vec<Edit> = list.iter().filter_map(|raw| {
            let edit = decode_edit(raw);
            if edit.is_none() {
                warn!("dropping malformed edit at block {block}");
            }
            edit
        })
        .collect();
        if !edits.is_empty() {
            message.blocks.insert(block, edits);
        }
    }
    Some(message)
}

fn decode_edit(value: &Value) -> Option<Edit> {
    let tuple = value.as_array()?;
    if !(3..=4).contains(&tuple.len()) {
        return None;
    }
    let timestamp = tuple[0].as_i64()?;
    let kind = EditKind::parse(tuple[1].as_str()?)?;
    let payload = match &tuple[2] {
        Value::Null => None,
        other => Some(other.clone()),
    };
    let metadata = match tuple.get(3) {
        None | Some(Value::Null) => None,
        Some(raw) => Some(serde_json::from_value::<EditMetadata>(raw.clone()).ok()?),
    };
    Some(Edit {
        timestamp,
        kind,
        payload,
        metadata,
    })
}
