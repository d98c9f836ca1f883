#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{MappingTable, MissPolicy};

    fn resolver() -> MappingTable {
        let mut t = MappingTable::new(MissPolicy::KeepOld);
        t.insert("pages", 1, 11);
        t.insert("pages", 5, 50);
        t.insert("pages", 6, 60);
        t.insert("pages", 7, 42);
        t.insert("tt_content", 2, 22);
        t.insert("sys_file", 3, 33);
        t.insert("sys_file", 4, 44);
        t
    }

    // === extract_reference_occurrences tests ===

    #[test]
    fn finds_page_link_digits() {
        // "See t3://page?uid=7 now" -> id_start=18, id_len=1
        let result = extract_reference_occurrences("See t3://page?uid=7 now", ReferenceKind::PageLink);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].old_id, 7);
        assert_eq!(result[0].id_start, 18);
        assert_eq!(result[0].id_len, 1);
    }

    #[test]
    fn finds_every_embedded_file_marker() {
        let html = r#"<img data-htmlarea-file-uid="3" /><img data-htmlarea-file-uid="12" />"#;
        let result = extract_reference_occurrences(html, ReferenceKind::EmbeddedFile);
        let ids: Vec<Identifier> = result.iter().map(|o| o.old_id).collect();
        assert_eq!(ids, vec![3, 12]);
    }

    #[test]
    fn kinds_do_not_cross_match() {
        let result = extract_reference_occurrences("t3://file?uid=3", ReferenceKind::PageLink);
        assert!(result.is_empty());
    }

    #[test]
    fn only_ascii_digits_form_an_identifier() {
        // "t3://page?uid=" + "7" + ARABIC-INDIC DIGIT THREE
        let result = extract_reference_occurrences("t3://page?uid=7\u{0663}", ReferenceKind::PageLink);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].old_id, 7);
        assert_eq!(result[0].id_len, 1);
        assert_eq!(
            rewrite_links("t3://page?uid=7\u{0663}", &resolver()).unwrap(),
            "t3://page?uid=42\u{0663}"
        );
        assert_eq!(parse_specified_identifier("pages_1\u{0663}"), None);
        assert_eq!(
            classify_relation_value("5\u{0663}"),
            RelationValue::FreeText("5\u{0663}")
        );
    }

    #[test]
    fn skips_identifiers_that_overflow() {
        let result = extract_reference_occurrences(
            "t3://page?uid=99999999999999999999999",
            ReferenceKind::PageLink,
        );
        assert!(result.is_empty());
    }

    // === compute_reference_edits tests ===

    #[test]
    fn edits_in_reverse_offset_order() {
        let edits =
            compute_reference_edits("t3://page?uid=1 t3://page?uid=5", ReferenceKind::PageLink, &resolver())
                .unwrap();
        assert_eq!(edits.len(), 2);
        assert!(edits[0].offset > edits[1].offset, "edits should be in reverse offset order");
        assert_eq!(edits[0].insert_text, "50");
        assert_eq!(edits[1].insert_text, "11");
    }

    #[test]
    fn unchanged_identifiers_produce_no_edit() {
        // 99 is unmapped and kept as-is
        let edits =
            compute_reference_edits("t3://page?uid=99", ReferenceKind::PageLink, &resolver()).unwrap();
        assert!(edits.is_empty());
    }

    // === rewrite_links tests ===

    #[test]
    fn plain_text_is_untouched() {
        let text = "Nothing to see here, just <b>markup</b> and uid=7.";
        assert_eq!(rewrite_links(text, &resolver()).unwrap(), text);
    }

    #[test]
    fn rewrites_page_link() {
        assert_eq!(rewrite_links("t3://page?uid=7", &resolver()).unwrap(), "t3://page?uid=42");
    }

    #[test]
    fn rewrites_all_link_kinds_in_rich_text() {
        let html = concat!(
            r#"<a href="t3://page?uid=1">Home</a> "#,
            r#"<a href="t3://file?uid=3">PDF</a> "#,
            r#"<img data-htmlarea-file-uid="4" src="x.png" />"#
        );
        let expected = concat!(
            r#"<a href="t3://page?uid=11">Home</a> "#,
            r#"<a href="t3://file?uid=33">PDF</a> "#,
            r#"<img data-htmlarea-file-uid="44" src="x.png" />"#
        );
        assert_eq!(rewrite_links(html, &resolver()).unwrap(), expected);
    }

    #[test]
    fn rewrites_repeated_links_with_different_widths() {
        let text = "t3://page?uid=7 and t3://page?uid=1 and t3://page?uid=7";
        assert_eq!(
            rewrite_links(text, &resolver()).unwrap(),
            "t3://page?uid=42 and t3://page?uid=11 and t3://page?uid=42"
        );
    }

    #[test]
    fn empty_text_stays_empty() {
        assert_eq!(rewrite_links("", &resolver()).unwrap(), "");
    }

    #[test]
    fn resolution_errors_propagate() {
        let strict = MappingTable::new(MissPolicy::Fail);
        assert!(rewrite_links("t3://file?uid=3", &strict).is_err());
    }

    // === compound token tests ===

    #[test]
    fn compound_tokens_drop_non_matching() {
        assert_eq!(
            rewrite_links("pages_1,tt_content_2,bogus", &resolver()).unwrap(),
            "pages_11,tt_content_22"
        );
    }

    #[test]
    fn compound_tokens_are_trimmed() {
        assert_eq!(
            rewrite_specified_identifiers(" pages_1 , ,tt_content_2 ", &resolver()).unwrap(),
            "pages_11,tt_content_22"
        );
    }

    #[test]
    fn compound_without_matches_returns_original() {
        assert_eq!(
            rewrite_links("bogus,alsobogus", &resolver()).unwrap(),
            "bogus,alsobogus"
        );
    }

    #[test]
    fn parses_entity_type_with_underscores() {
        assert_eq!(
            parse_specified_identifier("tx_news_domain_model_news_123"),
            Some(("tx_news_domain_model_news", 123))
        );
        assert_eq!(parse_specified_identifier("pages_"), None);
        assert_eq!(parse_specified_identifier("_12"), None);
        assert_eq!(parse_specified_identifier("12"), None);
    }

    // === classify_relation_value tests ===

    #[test]
    fn classifies_integer_lists() {
        assert_eq!(classify_relation_value("5"), RelationValue::Integers(vec![5]));
        assert_eq!(
            classify_relation_value("5,6,5"),
            RelationValue::Integers(vec![5, 6, 5])
        );
    }

    #[test]
    fn classifies_everything_else_as_text() {
        assert_eq!(classify_relation_value("5, 6"), RelationValue::FreeText("5, 6"));
        assert_eq!(classify_relation_value("5,"), RelationValue::FreeText("5,"));
        assert_eq!(classify_relation_value("-5"), RelationValue::FreeText("-5"));
        assert_eq!(
            classify_relation_value("t3://page?uid=5"),
            RelationValue::FreeText("t3://page?uid=5")
        );
    }

    // === rewrite_simple_relation tests ===

    #[test]
    fn simple_relation_preserves_order_and_duplicates() {
        assert_eq!(
            rewrite_simple_relation("5,6,5", "pages", &resolver()).unwrap(),
            "50,60,50"
        );
    }

    #[test]
    fn simple_relation_routes_text_through_link_rewrite() {
        assert_eq!(
            rewrite_simple_relation("hello <a>t3://file?uid=3</a>", "pages", &resolver()).unwrap(),
            "hello <a>t3://file?uid=33</a>"
        );
    }

    #[test]
    fn simple_relation_leaves_blank_values_alone() {
        assert_eq!(rewrite_simple_relation("", "pages", &resolver()).unwrap(), "");
        assert_eq!(rewrite_simple_relation("0", "pages", &resolver()).unwrap(), "0");
    }

    #[test]
    fn simple_relation_resolves_against_given_target() {
        assert_eq!(
            rewrite_simple_relation("2", "tt_content", &resolver()).unwrap(),
            "22"
        );
    }
}

use crate::error::Result;
use crate::mapping::{MappingResolver, FILE_ENTITY};
use crate::types::{is_blank, Identifier};
use regex::Regex;
use std::sync::LazyLock;

// Compile regex once, reuse across calls
static PAGE_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(t3://page\?uid=)([0-9]+)").unwrap()
});

static FILE_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(t3://file\?uid=)([0-9]+)").unwrap()
});

static EMBEDDED_FILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(data-htmlarea-file-uid=")([0-9]+)"#).unwrap()
});

static SPECIFIED_IDENTIFIER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z][A-Za-z0-9_]*)_([0-9]+)$").unwrap()
});

static INTEGER_LIST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9]+(?:,[0-9]+)*$").unwrap()
});

/// The inline link encodings found in rich text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReferenceKind {
    /// `t3://page?uid=123`
    PageLink,
    /// `t3://file?uid=123`
    FileLink,
    /// `data-htmlarea-file-uid="123"` on an embedded image
    EmbeddedFile,
}

impl ReferenceKind {
    /// Application order used by `rewrite_links`.
    pub const ALL: [ReferenceKind; 3] = [
        ReferenceKind::PageLink,
        ReferenceKind::FileLink,
        ReferenceKind::EmbeddedFile,
    ];

    fn pattern(self) -> &'static Regex {
        match self {
            ReferenceKind::PageLink => &*PAGE_LINK_RE,
            ReferenceKind::FileLink => &*FILE_LINK_RE,
            ReferenceKind::EmbeddedFile => &*EMBEDDED_FILE_RE,
        }
    }

    fn resolve(self, old_id: Identifier, resolver: &dyn MappingResolver) -> Result<Identifier> {
        match self {
            ReferenceKind::PageLink => resolver.new_pid_from_old_pid(old_id),
            ReferenceKind::FileLink | ReferenceKind::EmbeddedFile => {
                resolver.new_from_old(old_id, FILE_ENTITY)
            }
        }
    }
}

/// A reference occurrence with the byte span of its identifier digits.
///
/// Only the digits are replaced during a rewrite; the surrounding markup
/// (`t3://page?uid=`, the attribute name and quote) stays as it is.
#[derive(Debug, PartialEq, Eq)]
pub struct ReferenceOccurrence {
    pub kind: ReferenceKind,
    /// Identifier in the old space, e.g. 123 from `t3://page?uid=123`
    pub old_id: Identifier,
    /// Byte offset of the identifier digits
    pub id_start: usize,
    /// Byte length of the identifier digits
    pub id_len: usize,
}

/// Locate every occurrence of one reference kind, left to right.
pub fn extract_reference_occurrences(text: &str, kind: ReferenceKind) -> Vec<ReferenceOccurrence> {
    let mut occurrences = Vec::new();

    for cap in kind.pattern().captures_iter(text) {
        let Some(digits) = cap.get(2) else {
            continue;
        };
        let old_id = match digits.as_str().parse::<Identifier>() {
            Ok(id) => id,
            Err(_) => {
                tracing::warn!(
                    "Identifier {} in {:?} does not fit in 64 bits, leaving it untouched",
                    digits.as_str(),
                    kind
                );
                continue;
            }
        };

        occurrences.push(ReferenceOccurrence {
            kind,
            old_id,
            id_start: digits.start(),
            id_len: digits.len(),
        });
    }

    occurrences
}

/// A text edit: replace `remove_len` bytes at `offset` with `insert_text`.
#[derive(Debug, PartialEq, Eq)]
pub struct TextEdit {
    /// Byte offset in source
    pub offset: usize,
    /// Number of bytes to remove
    pub remove_len: usize,
    /// Replacement text
    pub insert_text: String,
}

/// Resolve every occurrence of `kind` and return edits for those whose
/// identifier changes. Edits come back in reverse offset order for safe
/// sequential application.
pub fn compute_reference_edits(
    text: &str,
    kind: ReferenceKind,
    resolver: &dyn MappingResolver,
) -> Result<Vec<TextEdit>> {
    let mut edits = Vec::new();
    for occ in extract_reference_occurrences(text, kind) {
        let new_id = kind.resolve(occ.old_id, resolver)?;
        if new_id == occ.old_id {
            continue;
        }
        edits.push(TextEdit {
            offset: occ.id_start,
            remove_len: occ.id_len,
            insert_text: new_id.to_string(),
        });
    }

    edits.sort_by(|a, b| b.offset.cmp(&a.offset));
    Ok(edits)
}

fn apply_edits(text: &mut String, edits: &[TextEdit]) {
    for edit in edits {
        text.replace_range(edit.offset..edit.offset + edit.remove_len, &edit.insert_text);
    }
}

/// Rewrite all occurrences of a single reference kind.
pub fn rewrite_references(
    text: &str,
    kind: ReferenceKind,
    resolver: &dyn MappingResolver,
) -> Result<String> {
    let edits = compute_reference_edits(text, kind, resolver)?;
    let mut rewritten = text.to_string();
    apply_edits(&mut rewritten, &edits);
    Ok(rewritten)
}

/// Rewrite every reference in a free-text value: page links, file links,
/// embedded-file markers, then compound `entity_uid` token lists.
///
/// Text that matches none of the encodings comes back unchanged.
pub fn rewrite_links(text: &str, resolver: &dyn MappingResolver) -> Result<String> {
    if text.is_empty() {
        return Ok(String::new());
    }
    let mut value = text.to_string();
    for kind in ReferenceKind::ALL {
        value = rewrite_references(&value, kind, resolver)?;
    }
    rewrite_specified_identifiers(&value, resolver)
}

/// Split a compound token such as `tt_content_12` into `("tt_content", 12)`.
pub fn parse_specified_identifier(token: &str) -> Option<(&str, Identifier)> {
    let cap = SPECIFIED_IDENTIFIER_RE.captures(token)?;
    let entity_type = cap.get(1)?.as_str();
    let id = cap.get(2)?.as_str().parse().ok()?;
    Some((entity_type, id))
}

/// Rewrite a comma-separated list like `pages_1,tt_content_2`.
///
/// Tokens that are not `<entity>_<id>` are dropped. When no token matches at
/// all, the value is not a compound list and is returned as it was.
pub fn rewrite_specified_identifiers(value: &str, resolver: &dyn MappingResolver) -> Result<String> {
    let mut tokens: Vec<String> = Vec::new();
    for token in value.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let Some((entity_type, old_id)) = parse_specified_identifier(token) else {
            continue;
        };
        let new_id = resolver.new_from_old(old_id, entity_type)?;
        tokens.push(format!("{}_{}", entity_type, new_id));
    }

    if tokens.is_empty() {
        Ok(value.to_string())
    } else {
        Ok(tokens.join(","))
    }
}

/// Shape of a relation column's value.
#[derive(Debug, PartialEq, Eq)]
pub enum RelationValue<'a> {
    /// `"5"` or `"5,6,5"`
    Integers(Vec<Identifier>),
    /// Anything else; rewritten as rich text.
    FreeText(&'a str),
}

/// Decide whether a relation value is a plain identifier list.
pub fn classify_relation_value(value: &str) -> RelationValue<'_> {
    if INTEGER_LIST_RE.is_match(value) {
        let parsed: std::result::Result<Vec<Identifier>, _> =
            value.split(',').map(str::parse::<Identifier>).collect();
        if let Ok(ids) = parsed {
            return RelationValue::Integers(ids);
        }
    }
    RelationValue::FreeText(value)
}

/// Rewrite a relation column (`header_link`, `file`, `uid_foreign`, ...).
///
/// Identifier lists are resolved against `target` one by one, keeping order
/// and duplicates. Any other value is treated as rich text so a relation
/// column that holds a typolink still gets its links rewritten.
pub fn rewrite_simple_relation(
    value: &str,
    target: &str,
    resolver: &dyn MappingResolver,
) -> Result<String> {
    if is_blank(value) {
        return Ok(value.to_string());
    }
    match classify_relation_value(value) {
        RelationValue::Integers(ids) => {
            let mut resolved = Vec::with_capacity(ids.len());
            for id in ids {
                resolved.push(resolver.new_from_old(id, target)?.to_string());
            }
            Ok(resolved.join(","))
        }
        RelationValue::FreeText(text) => rewrite_links(text, resolver),
    }
}
