use crate::{ParseError, ParseResult};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One canonical catalog entry
///
/// Everything the origin reports about the entry lives in `attributes`, in
/// source order. The crawler's own bookkeeping is kept in dedicated fields and
/// serialized under reserved keys (`__READER__`, `__PARENT__`, `__MERGED__`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRecord {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_resources: Vec<SubResource>,

    #[serde(rename = "__READER__", default, skip_serializing_if = "Vec::is_empty")]
    pub reader_entries: Vec<ReaderEntry>,

    #[serde(rename = "__PARENT__", default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    #[serde(rename = "__MERGED__", default, skip_serializing_if = "is_false")]
    pub merged: bool,

    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

/// A reference to another record embedded in its parent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubResource {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,

    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

/// One resolved reader volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReaderEntry {
    /// Direct blob URL (legacy viewer)
    Blob(String),

    /// Page-image reader metadata
    Structured {
        #[serde(rename = "readerObj")]
        chapter_tree: Value,

        #[serde(rename = "pageNum")]
        page_count: u64,

        #[serde(rename = "imgUrl")]
        image_directory: String,
    },
}

impl ReaderEntry {
    /// Identifier of the underlying file: the blob URL or the image directory
    pub fn directory_key(&self) -> &str {
        match self {
            Self::Blob(url) => url,
            Self::Structured {
                image_directory, ..
            } => image_directory,
        }
    }
}

impl CatalogRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sub_resources: Vec::new(),
            reader_entries: Vec::new(),
            parent_id: None,
            merged: false,
            attributes: Map::new(),
        }
    }

    /// Builds a record from a JSON object reported by the origin
    pub fn from_value(value: Value) -> ParseResult<Self> {
        match &value {
            Value::Object(map) if map.contains_key("id") => {}
            Value::Object(_) => return Err(ParseError::MissingField("id".to_string())),
            other => {
                return Err(ParseError::ContractViolation(format!(
                    "expected a record object, got {}",
                    kind_name(other)
                )))
            }
        }
        Ok(serde_json::from_value(value)?)
    }

    /// The origin's `fields` list: `{key, value, ...}` objects in source order
    pub fn fields(&self) -> impl Iterator<Item = &Map<String, Value>> {
        fields_of(&self.attributes)
    }

    /// Value of the first field entry with the given key
    pub fn field_value(&self, key: &str) -> Option<&Value> {
        self.fields()
            .find(|field| field.get("key").and_then(Value::as_str) == Some(key))
            .and_then(|field| field.get("value"))
    }

    /// File references behind the record's reader field, in volume order
    ///
    /// A reader field carries either its own `orsUrl` or a `subs` list whose
    /// entries carry one each.
    pub fn reader_references(&self, reader_keys: &[String]) -> Vec<String> {
        let mut refs: Vec<String> = Vec::new();

        let reader_fields = self.fields().filter(|field| {
            field
                .get("key")
                .and_then(Value::as_str)
                .is_some_and(|key| reader_keys.iter().any(|k| k == key))
        });

        for field in reader_fields {
            if let Some(url) = non_empty_str(field.get("orsUrl")) {
                refs.push(url.to_string());
                continue;
            }
            let subs = field.get("subs").and_then(Value::as_array);
            for sub in subs.into_iter().flatten() {
                if let Some(url) = non_empty_str(sub.get("orsUrl")) {
                    refs.push(url.to_string());
                }
            }
        }

        let mut seen = std::collections::HashSet::new();
        refs.retain(|url| seen.insert(url.clone()));
        refs
    }

    /// Appends a reader entry unless an equal one is already present
    ///
    /// Returns whether the entry was added.
    pub fn push_reader_entry(&mut self, entry: ReaderEntry) -> bool {
        if self.reader_entries.contains(&entry) {
            return false;
        }
        self.reader_entries.push(entry);
        true
    }
}

impl SubResource {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: Map::new(),
        }
    }

    /// Type tag under `key`: a top-level attribute, else a `fields` entry
    pub fn tag(&self, key: &str) -> Option<&str> {
        if let Some(tag) = self.attributes.get(key).and_then(Value::as_str) {
            return Some(tag);
        }
        fields_of(&self.attributes)
            .find(|field| field.get("key").and_then(Value::as_str) == Some(key))
            .and_then(|field| field.get("value"))
            .and_then(Value::as_str)
    }
}

fn fields_of(attributes: &Map<String, Value>) -> impl Iterator<Item = &Map<String, Value>> {
    attributes
        .get("fields")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Human-readable JSON kind, used in diagnostics
pub(crate) fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Record ids arrive as strings from some endpoints and as numbers from others
fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) if !s.is_empty() => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(de::Error::custom(format!(
            "invalid record id: {}",
            kind_name(&other)
        ))),
    }
}
