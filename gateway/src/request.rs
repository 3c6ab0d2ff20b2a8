//! Storage requests as they arrive on the wire.
//!
//! Every endpoint accepts the same JSON shape:
//!
//! ```json
//! {
//!   "collection": "users",
//!   "select": {"name": "a"},
//!   "options": {"limit": 10, "skip": 0, "sort": {"cr_time": -1}},
//!   "data": {"name": "a", "age": 3},
//!   "include_fields": ["name"]
//! }
//! ```
//!
//! `select` and `data` are schema-less documents. `method` and `result` are
//! filled in by the gateway after the store answers and are only meaningful in
//! the duplicated copy of a request.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::errors::DecodeError;

/// A schema-less document or filter: string keys mapped to arbitrary JSON values.
pub type Document = serde_json::Map<String, Value>;

pub const INTERNAL_ID: &str = "internal_id";
pub const CREATED_AT: &str = "cr_time";
pub const CHANGED_AT: &str = "ch_time";

/// The five operations the gateway maps requests onto.
///
/// The serialized names are the ones used by request paths and by the
/// `method` field of duplicated requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    #[serde(rename = "get")]
    Read,
    #[serde(rename = "save")]
    Create,
    Update,
    Upsert,
    Remove,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::Read,
        Operation::Create,
        Operation::Update,
        Operation::Upsert,
        Operation::Remove,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Operation::Read => "get",
            Operation::Create => "save",
            Operation::Update => "update",
            Operation::Upsert => "upsert",
            Operation::Remove => "remove",
        }
    }

    /// Maps a request path onto an operation. The canonical names `read`,
    /// `create` and `delete` are accepted as aliases.
    pub fn from_path(path: &str) -> Option<Self> {
        match path.trim_end_matches('/') {
            "/get" | "/read" => Some(Operation::Read),
            "/save" | "/create" => Some(Operation::Create),
            "/update" => Some(Operation::Update),
            "/upsert" => Some(Operation::Upsert),
            "/remove" | "/delete" => Some(Operation::Remove),
            _ => None,
        }
    }

    fn requires_data(&self) -> bool {
        matches!(
            self,
            Operation::Create | Operation::Update | Operation::Upsert
        )
    }

    fn requires_select(&self) -> bool {
        matches!(
            self,
            Operation::Update | Operation::Upsert | Operation::Remove
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Query modifiers handed to the store untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FindOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,
    /// Field name to direction (`1` ascending, `-1` descending).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<Document>,
}

/// Body accepted from callers. Anything the gateway computes itself is absent.
#[derive(Deserialize)]
struct RequestBody {
    collection: String,
    #[serde(default)]
    select: Option<Document>,
    #[serde(default)]
    options: Option<FindOptions>,
    #[serde(default)]
    data: Option<Document>,
    #[serde(default)]
    include_fields: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageRequest {
    pub collection: String,
    #[serde(default, skip_serializing_if = "Document::is_empty")]
    pub select: Document,
    #[serde(default)]
    pub options: FindOptions,
    #[serde(default)]
    pub data: Document,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<Operation>,
    #[serde(default)]
    pub result: Vec<Document>,
}

impl StorageRequest {
    /// Parses and validates a request body for the given operation.
    pub fn decode(operation: Operation, bytes: &[u8]) -> Result<Self, DecodeError> {
        let body: RequestBody = serde_json::from_slice(bytes)?;

        if body.collection.trim().is_empty() {
            return Err(DecodeError::EmptyCollection);
        }

        let select = body.select.unwrap_or_default();
        if operation.requires_select() && select.is_empty() {
            return Err(DecodeError::MissingSelect(operation));
        }

        let data = match body.data {
            Some(data) => data,
            None if operation.requires_data() => return Err(DecodeError::MissingData(operation)),
            None => Document::new(),
        };

        Ok(StorageRequest {
            collection: body.collection,
            select,
            options: body.options.unwrap_or_default(),
            data,
            include_fields: body.include_fields.unwrap_or_default(),
            method: None,
            result: Vec::new(),
        })
    }

    /// Marks `data` as a freshly created document.
    pub fn stamp_created(&mut self, internal_id: &str, now: i64) {
        self.data
            .insert(INTERNAL_ID.to_string(), Value::from(internal_id));
        self.data.insert(CREATED_AT.to_string(), Value::from(now));
        self.data.insert(CHANGED_AT.to_string(), Value::from(now));
    }

    /// Prepares `data` for a set-merge onto existing documents. The identity
    /// and creation time of a document are never rewritten.
    pub fn stamp_changed(&mut self, now: i64) {
        self.data.shift_remove(INTERNAL_ID);
        self.data.shift_remove(CREATED_AT);
        self.data.insert(CHANGED_AT.to_string(), Value::from(now));
    }
}

pub fn new_internal_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
