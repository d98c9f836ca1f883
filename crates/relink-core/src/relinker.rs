use crate::config::{LinkConfig, RelationField, RelationTarget};
use crate::document::DocumentRewriter;
use crate::error::{RelinkError, Result};
use crate::link_parser::{rewrite_links, rewrite_simple_relation};
use crate::mapping::MappingResolver;
use crate::store::{DocumentStore, RowStore};
use crate::types::{is_blank, EntityType, Identifier, Row};
use serde::Serialize;

#[derive(Clone, Copy, Debug, Default)]
pub struct RelinkOptions {
    /// Compute and report everything, persist nothing.
    pub dry_run: bool,
}

/// Counters for one pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RelinkReport {
    pub entity_types_visited: usize,
    /// Mapped entity types no configuration table mentions.
    pub entity_types_skipped: usize,
    pub rows_visited: usize,
    /// Mapped identifiers with no row behind them.
    pub rows_missing: usize,
    pub rows_updated: usize,
    pub document_values_rewritten: usize,
}

/// What happened to a single record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordOutcome {
    Missing,
    Visited {
        row_updated: bool,
        documents_updated: usize,
    },
}

/// Rewrites references in every imported record after an import pass.
///
/// For each entity type in the mapping table and each imported record
/// (fetched by its new identifier):
/// 1. rewrite inline links in link-bearing fields
/// 2. rewrite relation fields (plain identifier lists, or links)
/// 3. persist the row if any value changed
/// 4. rewrite references inside structured fields, each as its own
///    targeted update
///
/// The pass is sequential and stops at the first error. Rows already
/// persisted by then stay rewritten.
pub struct Relinker<'a> {
    config: &'a LinkConfig,
    resolver: &'a dyn MappingResolver,
    rows: &'a dyn RowStore,
    documents: &'a dyn DocumentStore,
    options: RelinkOptions,
}

impl<'a> Relinker<'a> {
    pub fn new(
        config: &'a LinkConfig,
        resolver: &'a dyn MappingResolver,
        rows: &'a dyn RowStore,
        documents: &'a dyn DocumentStore,
    ) -> Self {
        Self {
            config,
            resolver,
            rows,
            documents,
            options: RelinkOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RelinkOptions) -> Self {
        self.options = options;
        self
    }

    pub fn run(&self) -> Result<RelinkReport> {
        let mut report = RelinkReport::default();

        for (entity_type, identifiers) in self.resolver.mapping() {
            if !self.config.is_configured(entity_type.as_str()) {
                tracing::debug!("{}: no link configuration, skipping", entity_type);
                report.entity_types_skipped += 1;
                continue;
            }
            report.entity_types_visited += 1;

            let mut visited = 0usize;
            let mut missing = 0usize;
            let mut updated = 0usize;
            let mut documents = 0usize;
            for new_id in identifiers.values() {
                match self.relink_record(entity_type, *new_id)? {
                    RecordOutcome::Missing => missing += 1,
                    RecordOutcome::Visited {
                        row_updated,
                        documents_updated,
                    } => {
                        visited += 1;
                        if row_updated {
                            updated += 1;
                        }
                        documents += documents_updated;
                    }
                }
            }

            tracing::info!(
                "{}: visited={}, updated={}, structured values rewritten={}, missing={}",
                entity_type,
                visited,
                updated,
                documents,
                missing
            );
            report.rows_visited += visited;
            report.rows_missing += missing;
            report.rows_updated += updated;
            report.document_values_rewritten += documents;
        }

        Ok(report)
    }

    /// Rewrite one record identified by its new identifier.
    pub fn relink_record(&self, entity_type: &EntityType, id: Identifier) -> Result<RecordOutcome> {
        let Some(original) = self.rows.fetch(entity_type, id)? else {
            tracing::debug!("{}:{} not found, skipping", entity_type, id);
            return Ok(RecordOutcome::Missing);
        };

        let rewritten = self.rewrite_row(entity_type, &original)?;
        let row_updated = rewritten != original;
        if row_updated {
            if rewritten.uid().is_none() {
                return Err(RelinkError::RowWithoutIdentifier {
                    entity_type: entity_type.clone(),
                });
            }
            tracing::debug!("{}:{} changed, updating", entity_type, id);
            if !self.options.dry_run {
                self.rows.update(entity_type, &rewritten)?;
            }
        }

        let uid = rewritten.uid().unwrap_or(id);
        let documents_updated = self.rewrite_document_fields(entity_type, uid, &rewritten)?;

        Ok(RecordOutcome::Visited {
            row_updated,
            documents_updated,
        })
    }

    /// Link-bearing and relation fields of a row, rewritten. Pure apart
    /// from resolver lookups.
    pub fn rewrite_row(&self, entity_type: &EntityType, row: &Row) -> Result<Row> {
        let mut row = row.clone();

        for field in self.config.link_fields(entity_type.as_str()) {
            rewrite_field(&mut row, field, |text| {
                if is_blank(text) {
                    Ok(text.to_string())
                } else {
                    rewrite_links(text, self.resolver)
                }
            })?;
        }

        for relation in self.config.relation_fields(entity_type.as_str()) {
            let target = relation_target(entity_type, relation, &row)?;
            rewrite_field(&mut row, &relation.field, |text| {
                rewrite_simple_relation(text, target.as_str(), self.resolver)
            })?;
        }

        Ok(row)
    }

    fn rewrite_document_fields(&self, entity_type: &EntityType, uid: Identifier, row: &Row) -> Result<usize> {
        let rewriter = DocumentRewriter::new(self.resolver, self.documents).dry_run(self.options.dry_run);
        let mut updated = 0;

        for document in self.config.document_fields(entity_type.as_str()) {
            match row.get(&document.field) {
                Some(value) if !value.is_blank() => {}
                _ => continue,
            }
            for rule in &document.rules {
                if !rule.applies_to(row) {
                    continue;
                }
                if rewriter.update_embedded_value(uid, entity_type, &document.field, rule)? {
                    updated += 1;
                }
            }
        }

        Ok(updated)
    }
}

/// Replace `field` with `rewrite(text)` when the field exists and the text
/// changes. Integer columns stay integers where possible.
fn rewrite_field<F>(row: &mut Row, field: &str, rewrite: F) -> Result<()>
where
    F: FnOnce(&str) -> Result<String>,
{
    let Some(value) = row.get(field) else {
        return Ok(());
    };
    let text = value.as_text().into_owned();
    let rewritten = rewrite(&text)?;
    if rewritten != text {
        let value = value.retyped(rewritten);
        row.set(field, value);
    }
    Ok(())
}

fn relation_target(entity_type: &EntityType, relation: &RelationField, row: &Row) -> Result<EntityType> {
    match &relation.target {
        RelationTarget::Entity(target) => Ok(target.clone()),
        RelationTarget::FromField(field) => {
            let name = row
                .get(field)
                .map(|value| value.as_text().trim().to_string())
                .unwrap_or_default();
            if is_blank(&name) {
                return Err(RelinkError::MissingTargetEntityType {
                    entity_type: entity_type.clone(),
                    field: field.clone(),
                    uid: row.uid().unwrap_or_default(),
                });
            }
            Ok(EntityType::from(name))
        }
    }
}
