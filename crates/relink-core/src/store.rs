use crate::error::{RelinkError, Result};
use crate::types::{EntityType, FieldValue, Identifier, Row};
use crate::xml_path::{self, Selection};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::path::Path;

/// Whole-row access per entity type.
pub trait RowStore {
    /// `Ok(None)` when no row has this identifier.
    fn fetch(&self, entity_type: &EntityType, id: Identifier) -> Result<Option<Row>>;

    /// Replace the row identified by its `uid` field.
    fn update(&self, entity_type: &EntityType, row: &Row) -> Result<()>;
}

/// Targeted access to a value inside a structured (XML) field.
pub trait DocumentStore {
    /// Text at `selection` inside `field` of the given row.
    fn extract(
        &self,
        entity_type: &EntityType,
        id: Identifier,
        field: &str,
        selection: &Selection,
    ) -> Result<String>;

    /// Replace the element at `selection` with the `fragment` and persist the
    /// field. Nothing else in the row is touched.
    ///
    /// Returns `false` when the document was left as it was, e.g. because the
    /// selection does not match exactly one element.
    fn replace_and_persist(
        &self,
        entity_type: &EntityType,
        id: Identifier,
        field: &str,
        selection: &Selection,
        fragment: &str,
    ) -> Result<bool>;
}

/// Dataset held in memory, loadable from and savable to JSON:
/// `{"tt_content": [{"uid": 1, "bodytext": "..."}], "pages": [...]}`.
///
/// Implements both store traits with `&self` receivers so one instance can
/// serve as row store and document store for the same pass.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: DashMap<EntityType, BTreeMap<Identifier, Row>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let dataset: BTreeMap<EntityType, Vec<Row>> = serde_json::from_str(json)?;
        let store = Self::new();
        for (entity_type, rows) in dataset {
            for row in rows {
                store.insert(&entity_type, row)?;
            }
        }
        Ok(store)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Serialize the dataset, entity types and rows in ascending order.
    pub fn to_json_pretty(&self) -> Result<String> {
        let dataset: BTreeMap<EntityType, Vec<Row>> = self
            .rows
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().values().cloned().collect()))
            .collect();
        Ok(serde_json::to_string_pretty(&dataset)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json_pretty()?)?;
        Ok(())
    }

    pub fn insert(&self, entity_type: &EntityType, row: Row) -> Result<()> {
        let uid = row.uid().ok_or_else(|| RelinkError::RowWithoutIdentifier {
            entity_type: entity_type.clone(),
        })?;
        self.rows.entry(entity_type.clone()).or_default().insert(uid, row);
        Ok(())
    }

    pub fn row(&self, entity_type: &str, id: Identifier) -> Option<Row> {
        self.rows.get(entity_type)?.get(&id).cloned()
    }

    /// Total number of rows across all entity types.
    pub fn len(&self) -> usize {
        self.rows.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn field_text(&self, entity_type: &EntityType, id: Identifier, field: &str) -> Result<String> {
        let row = self.row(entity_type.as_str(), id).ok_or_else(|| {
            RelinkError::storage(format!("record {}:{} does not exist", entity_type, id))
        })?;
        Ok(row
            .get(field)
            .map(|value| value.as_text().into_owned())
            .unwrap_or_default())
    }
}

fn document_error(
    entity_type: &EntityType,
    id: Identifier,
    field: &str,
    err: xml_path::DocumentError,
) -> RelinkError {
    RelinkError::Document {
        entity_type: entity_type.clone(),
        uid: id,
        field: field.to_string(),
        reason: err.to_string(),
    }
}

impl RowStore for MemoryStore {
    fn fetch(&self, entity_type: &EntityType, id: Identifier) -> Result<Option<Row>> {
        Ok(self.row(entity_type.as_str(), id))
    }

    fn update(&self, entity_type: &EntityType, row: &Row) -> Result<()> {
        self.insert(entity_type, row.clone())
    }
}

impl DocumentStore for MemoryStore {
    fn extract(
        &self,
        entity_type: &EntityType,
        id: Identifier,
        field: &str,
        selection: &Selection,
    ) -> Result<String> {
        let xml = self.field_text(entity_type, id, field)?;
        xml_path::extract_value(&xml, selection).map_err(|e| document_error(entity_type, id, field, e))
    }

    fn replace_and_persist(
        &self,
        entity_type: &EntityType,
        id: Identifier,
        field: &str,
        selection: &Selection,
        fragment: &str,
    ) -> Result<bool> {
        let xml = self.field_text(entity_type, id, field)?;
        let updated = xml_path::update_xml(&xml, selection, fragment)
            .map_err(|e| document_error(entity_type, id, field, e))?;

        let Some(updated) = updated else {
            tracing::debug!(
                "Selection {} does not match exactly one element in {}:{}.{}, document left as is",
                selection,
                entity_type,
                id,
                field
            );
            return Ok(false);
        };
        if updated == xml {
            return Ok(false);
        }

        let Some(mut rows) = self.rows.get_mut(entity_type) else {
            return Ok(false);
        };
        let Some(row) = rows.get_mut(&id) else {
            return Ok(false);
        };
        row.set(field, FieldValue::Text(updated));
        Ok(true)
    }
}
