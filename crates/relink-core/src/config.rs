//! Which entity types and fields carry references.
//!
//! The TOML file is read into loosely-shaped `Raw*` structs and validated
//! once into [`LinkConfig`]. A pass never sees an invalid configuration:
//! missing relation targets, bad selection expressions and empty names are
//! rejected at load time.

use crate::error::{RelinkError, Result};
use crate::mapping::FILE_ENTITY;
use crate::types::{EntityType, FieldValue, Row};
use crate::xml_path::Selection;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Built-in relation: a file metadata record points at its file.
const FILE_METADATA_ENTITY: &str = "sys_file_metadata";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default, alias = "linkMapping")]
    link_mapping: RawLinkMapping,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLinkMapping {
    #[serde(default, alias = "propertiesWithLinks")]
    properties_with_links: BTreeMap<String, Vec<String>>,
    #[serde(default, alias = "propertiesWithRelations")]
    properties_with_relations: BTreeMap<String, Vec<RawRelation>>,
    #[serde(default, alias = "propertiesWithRelationsInFlexForms")]
    properties_with_relations_in_flex_forms: BTreeMap<String, BTreeMap<String, Vec<RawDocumentRule>>>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRelation {
    #[serde(default)]
    field: Option<String>,
    #[serde(default)]
    table: Option<String>,
    #[serde(default, alias = "tableNameField")]
    table_field: Option<String>,
}

impl RawRelation {
    /// Keys set in `other` replace the ones here; unset keys are kept.
    fn overrule(&mut self, other: RawRelation) {
        if other.field.is_some() {
            self.field = other.field;
        }
        if other.table.is_some() {
            self.table = other.table;
        }
        if other.table_field.is_some() {
            self.table_field = other.table_field;
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDocumentRule {
    #[serde(default)]
    condition: BTreeMap<String, FieldValue>,
    selection: String,
    table: String,
}

fn default_relations() -> BTreeMap<String, Vec<RawRelation>> {
    BTreeMap::from([(
        FILE_METADATA_ENTITY.to_string(),
        vec![RawRelation {
            field: Some("file".to_string()),
            table: Some(FILE_ENTITY.to_string()),
            table_field: None,
        }],
    )])
}

/// Merge configured relations over the built-in ones. For an entity type
/// present in both, entry `i` of the configuration is merged key by key over
/// built-in entry `i` and further entries are appended.
fn merge_relations(
    mut base: BTreeMap<String, Vec<RawRelation>>,
    overrule: BTreeMap<String, Vec<RawRelation>>,
) -> BTreeMap<String, Vec<RawRelation>> {
    for (entity_type, entries) in overrule {
        let merged = base.entry(entity_type).or_default();
        for (i, entry) in entries.into_iter().enumerate() {
            if let Some(existing) = merged.get_mut(i) {
                existing.overrule(entry);
            } else {
                merged.push(entry);
            }
        }
    }
    base
}

/// Where a relation column points.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelationTarget {
    /// Always the same entity type.
    Entity(EntityType),
    /// The entity type is named by another field of the same row
    /// (e.g. `tablenames` on a category MM record).
    FromField(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelationField {
    pub field: String,
    pub target: RelationTarget,
}

/// One way of locating a reference inside a structured field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentRule {
    /// Field/value pairs the row must match (all of them).
    pub condition: Vec<(String, FieldValue)>,
    pub selection: Selection,
    pub target: EntityType,
}

impl DocumentRule {
    /// Every listed pair must equal the row's value exactly (type-sensitive).
    /// Fields the row does not have do not block the rule.
    pub fn applies_to(&self, row: &Row) -> bool {
        self.condition.iter().all(|(field, expected)| match row.get(field) {
            Some(actual) => actual == expected,
            None => true,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentField {
    pub field: String,
    pub rules: Vec<DocumentRule>,
}

/// Validated, read-only link mapping configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkConfig {
    links: BTreeMap<EntityType, Vec<String>>,
    relations: BTreeMap<EntityType, Vec<RelationField>>,
    documents: BTreeMap<EntityType, Vec<DocumentField>>,
}

impl Default for LinkConfig {
    /// Only the built-in file metadata relation.
    fn default() -> Self {
        let relations = BTreeMap::from([(
            EntityType::from(FILE_METADATA_ENTITY),
            vec![RelationField {
                field: "file".to_string(),
                target: RelationTarget::Entity(EntityType::from(FILE_ENTITY)),
            }],
        )]);
        Self {
            links: BTreeMap::new(),
            relations,
            documents: BTreeMap::new(),
        }
    }
}

impl LinkConfig {
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(toml)?;
        Self::from_raw(raw.link_mapping)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let toml = std::fs::read_to_string(path)?;
        Self::from_toml_str(&toml)
    }

    fn from_raw(raw: RawLinkMapping) -> Result<Self> {
        let mut links = BTreeMap::new();
        for (entity_type, fields) in raw.properties_with_links {
            let entity_type = entity_name(&entity_type)?;
            let mut unique: Vec<String> = Vec::new();
            for field in fields {
                let field = field_name(&entity_type, &field)?;
                if !unique.contains(&field) {
                    unique.push(field);
                }
            }
            links.insert(entity_type, unique);
        }

        let mut relations = BTreeMap::new();
        for (entity_type, entries) in merge_relations(default_relations(), raw.properties_with_relations) {
            let entity_type = entity_name(&entity_type)?;
            let mut fields = Vec::with_capacity(entries.len());
            for entry in entries {
                fields.push(relation_field(&entity_type, entry)?);
            }
            relations.insert(entity_type, fields);
        }

        let mut documents = BTreeMap::new();
        for (entity_type, by_field) in raw.properties_with_relations_in_flex_forms {
            let entity_type = entity_name(&entity_type)?;
            let mut fields = Vec::with_capacity(by_field.len());
            for (field, rules) in by_field {
                let field = field_name(&entity_type, &field)?;
                let mut parsed = Vec::with_capacity(rules.len());
                for rule in rules {
                    parsed.push(document_rule(&entity_type, &field, rule)?);
                }
                fields.push(DocumentField { field, rules: parsed });
            }
            documents.insert(entity_type, fields);
        }

        Ok(Self {
            links,
            relations,
            documents,
        })
    }

    /// Fields whose text may contain inline links.
    pub fn link_fields(&self, entity_type: &str) -> &[String] {
        self.links.get(entity_type).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn relation_fields(&self, entity_type: &str) -> &[RelationField] {
        self.relations.get(entity_type).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn document_fields(&self, entity_type: &str) -> &[DocumentField] {
        self.documents.get(entity_type).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether any of the three tables mentions this entity type.
    pub fn is_configured(&self, entity_type: &str) -> bool {
        self.links.contains_key(entity_type)
            || self.relations.contains_key(entity_type)
            || self.documents.contains_key(entity_type)
    }

    /// All entity types the configuration mentions, sorted and deduplicated.
    pub fn entity_types(&self) -> Vec<&EntityType> {
        let mut all: Vec<&EntityType> = self
            .links
            .keys()
            .chain(self.relations.keys())
            .chain(self.documents.keys())
            .collect();
        all.sort();
        all.dedup();
        all
    }
}

fn entity_name(name: &str) -> Result<EntityType> {
    let name = name.trim();
    if name.is_empty() {
        return Err(RelinkError::invalid_config("empty entity type name"));
    }
    Ok(EntityType::from(name))
}

fn field_name(entity_type: &EntityType, name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(RelinkError::invalid_config(format!(
            "empty field name configured for {}",
            entity_type
        )));
    }
    Ok(name.to_string())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn relation_field(entity_type: &EntityType, raw: RawRelation) -> Result<RelationField> {
    let field = field_name(entity_type, raw.field.as_deref().unwrap_or_default())?;
    // a static table wins over table_field
    let target = match (non_empty(raw.table), non_empty(raw.table_field)) {
        (Some(table), _) => RelationTarget::Entity(EntityType::from(table)),
        (None, Some(table_field)) => RelationTarget::FromField(table_field),
        (None, None) => {
            return Err(RelinkError::invalid_config(format!(
                "neither table nor table_field is configured for {}:{}",
                entity_type, field
            )))
        }
    };
    Ok(RelationField { field, target })
}

fn document_rule(entity_type: &EntityType, field: &str, raw: RawDocumentRule) -> Result<DocumentRule> {
    let selection = Selection::parse(raw.selection.trim()).map_err(|e| {
        RelinkError::invalid_config(format!("{}:{}: {}", entity_type, field, e))
    })?;
    let target = non_empty(Some(raw.table)).ok_or_else(|| {
        RelinkError::invalid_config(format!(
            "no target table configured for {}:{} selection {}",
            entity_type, field, selection
        ))
    })?;
    Ok(DocumentRule {
        condition: raw.condition.into_iter().collect(),
        selection,
        target: EntityType::from(target),
    })
}
