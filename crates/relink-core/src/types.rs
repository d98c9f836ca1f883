use serde::{Deserialize, Serialize};
use std::borrow::{Borrow, Cow};
use std::collections::BTreeMap;
use std::fmt;

/// Reserved field holding a row's own (new) identifier.
pub const UID_FIELD: &str = "uid";

/// Integer key of a record, unique within its entity type.
pub type Identifier = u64;

/// Name of a record collection, e.g. "pages", "tt_content" or "sys_file".
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityType(String);

impl EntityType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityType {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for EntityType {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl Borrow<str> for EntityType {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A single column value.
///
/// Equality is type-sensitive: `Int(9)` and `Text("9")` are different values.
/// Columns the rewriter never touches (flags, floats, JSON blobs) still have
/// to survive a load and save unchanged.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    /// Floats and integers beyond `i64`.
    Number(serde_json::Number),
    Text(String),
    /// Arrays and objects.
    Json(serde_json::Value),
}

impl FieldValue {
    /// Textual form used by the rewriters. `Null` and `false` read as the
    /// empty string, `true` as "1".
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            FieldValue::Null | FieldValue::Bool(false) => Cow::Borrowed(""),
            FieldValue::Bool(true) => Cow::Borrowed("1"),
            FieldValue::Int(n) => Cow::Owned(n.to_string()),
            FieldValue::Number(n) => Cow::Owned(n.to_string()),
            FieldValue::Text(s) => Cow::Borrowed(s.as_str()),
            FieldValue::Json(v) => Cow::Owned(v.to_string()),
        }
    }

    /// Blank values carry no reference: empty text, `Null`, `false`, or zero.
    pub fn is_blank(&self) -> bool {
        is_blank(&self.as_text())
    }

    /// Wrap rewritten text in the same shape as `self`: numeric columns stay
    /// numeric as long as the new text is a single integer.
    pub fn retyped(&self, text: String) -> FieldValue {
        match self {
            FieldValue::Int(_) | FieldValue::Number(_) => {
                if let Ok(n) = text.parse::<i64>() {
                    FieldValue::Int(n)
                } else if let Ok(n) = text.parse::<u64>() {
                    FieldValue::Number(n.into())
                } else {
                    FieldValue::Text(text)
                }
            }
            _ => FieldValue::Text(text),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Int(i64::from(value))
    }
}

/// Empty text and a lone "0" both mean "no value" for a reference column.
pub fn is_blank(text: &str) -> bool {
    text.is_empty() || text == "0"
}

/// One record: field name -> value. Always fetched and replaced wholesale.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row {
    fields: BTreeMap<String, FieldValue>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter, mostly for fixtures.
    pub fn with(mut self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.set(field, value);
        self
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn set(&mut self, field: &str, value: impl Into<FieldValue>) {
        self.fields.insert(field.to_string(), value.into());
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The row's own identifier, read from the `uid` field.
    pub fn uid(&self) -> Option<Identifier> {
        match self.fields.get(UID_FIELD)? {
            FieldValue::Int(n) => Identifier::try_from(*n).ok(),
            FieldValue::Number(n) => n.as_u64(),
            FieldValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}
