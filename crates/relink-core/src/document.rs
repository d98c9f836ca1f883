use crate::config::DocumentRule;
use crate::error::Result;
use crate::link_parser::rewrite_simple_relation;
use crate::mapping::MappingResolver;
use crate::store::DocumentStore;
use crate::types::{is_blank, EntityType, Identifier};
use crate::xml_path::value_leaf;

/// Rewrites one reference embedded in a structured field (a flexform) in
/// place, without going through a whole-row update.
pub struct DocumentRewriter<'a> {
    resolver: &'a dyn MappingResolver,
    documents: &'a dyn DocumentStore,
    dry_run: bool,
}

impl<'a> DocumentRewriter<'a> {
    pub fn new(resolver: &'a dyn MappingResolver, documents: &'a dyn DocumentStore) -> Self {
        Self {
            resolver,
            documents,
            dry_run: false,
        }
    }

    /// Resolve without persisting anything.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Extract the value at `rule.selection`, resolve it against
    /// `rule.target` and write it back as a `<value index="vDEF">` leaf.
    ///
    /// A blank (empty or zero) value is never written, nor is a value that
    /// resolves to itself. Returns whether the document changed (in a dry run,
    /// whether a write would have been issued).
    pub fn update_embedded_value(
        &self,
        id: Identifier,
        entity_type: &EntityType,
        field: &str,
        rule: &DocumentRule,
    ) -> Result<bool> {
        let current = self.documents.extract(entity_type, id, field, &rule.selection)?;
        let resolved = rewrite_simple_relation(&current, rule.target.as_str(), self.resolver)?;
        if is_blank(&resolved) {
            tracing::debug!(
                "{}:{}.{}: nothing at {}, skipping write-back",
                entity_type,
                id,
                field,
                rule.selection
            );
            return Ok(false);
        }
        if resolved == current {
            return Ok(false);
        }

        tracing::debug!(
            "{}:{}.{}: {} '{}' -> '{}'",
            entity_type,
            id,
            field,
            rule.selection,
            current,
            resolved
        );
        if self.dry_run {
            return Ok(true);
        }
        self.documents.replace_and_persist(
            entity_type,
            id,
            field,
            &rule.selection,
            &value_leaf(&resolved),
        )
    }
}
