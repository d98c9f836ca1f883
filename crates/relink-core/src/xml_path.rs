use crate::error::{RelinkError, Result};
use quick_xml::events::attributes::AttrError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static STEP_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\*|[A-Za-z_][A-Za-z0-9_.:-]*)").unwrap()
});

static PREDICATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\[\s*@([A-Za-z_][A-Za-z0-9_.:-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')\s*\]"#).unwrap()
});

/// Failure while reading a stored document.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error(transparent)]
    Xml(#[from] quick_xml::Error),

    #[error(transparent)]
    Attribute(#[from] AttrError),

    #[error("element <{0}> is never closed")]
    Unclosed(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Step {
    /// `None` for `*`
    name: Option<String>,
    /// `[@attr="value"]` pairs, all of which must hold
    predicates: Vec<(String, String)>,
}

impl Step {
    fn parse(expression: &str, raw: &str) -> Result<Self> {
        let name_match = STEP_NAME_RE
            .find(raw)
            .ok_or_else(|| RelinkError::invalid_selection(expression, format!("bad step '{}'", raw)))?;
        let name = match name_match.as_str() {
            "*" => None,
            n => Some(n.to_string()),
        };

        let mut predicates = Vec::new();
        let mut rest = &raw[name_match.end()..];
        while !rest.is_empty() {
            let cap = PREDICATE_RE.captures(rest).ok_or_else(|| {
                RelinkError::invalid_selection(
                    expression,
                    format!("unsupported predicate '{}' (only [@attr=\"value\"] is allowed)", rest),
                )
            })?;
            let value = cap.get(2).or_else(|| cap.get(3)).map_or("", |m| m.as_str());
            predicates.push((cap[1].to_string(), value.to_string()));
            rest = &rest[cap[0].len()..];
        }

        Ok(Self { name, predicates })
    }

    fn matches(&self, element: &OpenElement) -> bool {
        if let Some(ref name) = self.name {
            if *name != element.name {
                return false;
            }
        }
        self.predicates
            .iter()
            .all(|(k, v)| element.attributes.iter().any(|(ak, av)| ak == k && av == v))
    }
}

/// A parsed XPath-like selection such as
/// `//T3FlexForms/data/sheet[@index="sDEF"]/language/field[@index="settings.page"]/value`.
///
/// Supported: element names or `*`, attribute-equality predicates, a leading
/// `//` (first step at any depth) or `/` (first step is the root element).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selection {
    expression: String,
    descendant: bool,
    steps: Vec<Step>,
}

impl Selection {
    pub fn parse(expression: &str) -> Result<Self> {
        let (descendant, rest) = if let Some(rest) = expression.strip_prefix("//") {
            (true, rest)
        } else if let Some(rest) = expression.strip_prefix('/') {
            (false, rest)
        } else {
            return Err(RelinkError::invalid_selection(expression, "must start with '/' or '//'"));
        };

        let mut steps = Vec::new();
        for raw in split_steps(rest) {
            if raw.is_empty() {
                return Err(RelinkError::invalid_selection(expression, "empty step"));
            }
            steps.push(Step::parse(expression, raw)?);
        }

        Ok(Self {
            expression: expression.to_string(),
            descendant,
            steps,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.expression
    }

    /// `stack` is the chain of open elements from the root to the current one.
    fn matches(&self, stack: &[OpenElement]) -> bool {
        let n = self.steps.len();
        if stack.len() < n || (!self.descendant && stack.len() != n) {
            return false;
        }
        let tail = &stack[stack.len() - n..];
        self.steps.iter().zip(tail).all(|(step, el)| step.matches(el))
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

/// Split on '/' outside of predicates and quoted attribute values.
fn split_steps(path: &str) -> Vec<&str> {
    let mut steps = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, c) in path.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"') | (None, '\'') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.saturating_sub(1),
            (None, '/') if depth == 0 => {
                steps.push(&path[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    steps.push(&path[start..]);
    steps
}

struct OpenElement {
    name: String,
    attributes: Vec<(String, String)>,
    /// Index into the match list when this element is selected
    span: Option<usize>,
}

impl OpenElement {
    fn from_tag(tag: &BytesStart<'_>) -> std::result::Result<Self, DocumentError> {
        let name = String::from_utf8_lossy(tag.name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attr in tag.attributes() {
            let attr = attr?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            attributes.push((key, value));
        }
        Ok(Self {
            name,
            attributes,
            span: None,
        })
    }
}

/// Byte span of a selected element plus the text directly inside it.
#[derive(Debug)]
struct MatchSpan {
    start: usize,
    end: usize,
    text: String,
}

fn position(reader: &Reader<&[u8]>) -> usize {
    reader.buffer_position() as usize
}

fn scan(xml: &str, selection: &Selection) -> std::result::Result<Vec<MatchSpan>, DocumentError> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<OpenElement> = Vec::new();
    let mut spans: Vec<MatchSpan> = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(tag) => {
                let tag_end = position(&reader);
                stack.push(OpenElement::from_tag(&tag)?);
                if selection.matches(&stack) {
                    // "<" + content + ">"
                    spans.push(MatchSpan {
                        start: tag_end - tag.len() - 2,
                        end: tag_end,
                        text: String::new(),
                    });
                    if let Some(el) = stack.last_mut() {
                        el.span = Some(spans.len() - 1);
                    }
                }
            }
            Event::Empty(tag) => {
                let tag_end = position(&reader);
                stack.push(OpenElement::from_tag(&tag)?);
                if selection.matches(&stack) {
                    // "<" + content + "/>"
                    spans.push(MatchSpan {
                        start: tag_end - tag.len() - 3,
                        end: tag_end,
                        text: String::new(),
                    });
                }
                stack.pop();
            }
            Event::Text(text) => {
                if let Some(idx) = stack.last().and_then(|el| el.span) {
                    spans[idx].text.push_str(&text.unescape()?);
                }
            }
            Event::CData(data) => {
                if let Some(idx) = stack.last().and_then(|el| el.span) {
                    spans[idx].text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::End(_) => {
                if let Some(idx) = stack.pop().and_then(|el| el.span) {
                    spans[idx].end = position(&reader);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(el) = stack.pop() {
        return Err(DocumentError::Unclosed(el.name));
    }
    Ok(spans)
}

/// Text directly contained by every selected element, joined with a single
/// space. Returns an empty string when nothing matches.
pub fn extract_value(xml: &str, selection: &Selection) -> std::result::Result<String, DocumentError> {
    if xml.trim().is_empty() {
        return Ok(String::new());
    }
    let spans = scan(xml, selection)?;
    let texts: Vec<&str> = spans.iter().map(|s| s.text.as_str()).collect();
    Ok(texts.join(" "))
}

/// Replace the selected element with `replacement` (an XML fragment).
///
/// Returns `None` unless the selection matches exactly one element; the rest
/// of the document is kept byte for byte.
pub fn update_xml(
    xml: &str,
    selection: &Selection,
    replacement: &str,
) -> std::result::Result<Option<String>, DocumentError> {
    let spans = scan(xml, selection)?;
    let [span] = spans.as_slice() else {
        return Ok(None);
    };
    let mut updated = String::with_capacity(xml.len() + replacement.len());
    updated.push_str(&xml[..span.start]);
    updated.push_str(replacement);
    updated.push_str(&xml[span.end..]);
    Ok(Some(updated))
}

/// The single-value leaf a flexform field stores its value in.
pub fn value_leaf(value: &str) -> String {
    format!(r#"<value index="vDEF">{}</value>"#, quick_xml::escape::escape(value))
}
