//! Conversion between stored card text and the editor's document model.
//!
//! Stored text is the interchange form: plain paragraphs separated by `\n`
//! with canonical tokens inline. The presentation form is a [`Document`] of
//! paragraphs whose children are text leaves or reference leaves. Output form
//! is the interchange form with every resolvable token substituted.

use crate::grammar::{self, TokenRef};
use crate::resolver::{Resolution, Resolver};
use crate::snapshot::{VariableLookup, VariableSnapshot};
use crate::variable::{SourceType, Variable, VariableKey};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static MARKUP_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^<>]*>").expect("markup pattern is valid"));

static LINE_BREAK_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<br\s*/?>|</p\s*>").expect("line break pattern is valid")
});

/// Editor document: an ordered list of paragraphs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub paragraphs: Vec<Paragraph>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paragraph {
    pub children: Vec<Inline>,
}

/// A leaf inside a paragraph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inline {
    Text { text: String },
    Reference(ReferenceLeaf),
}

/// An inline reference to a variable.
///
/// Attributes are optional on the wire because editors can drop them; a leaf
/// without a full identity triple is incomplete and triggers repair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceLeaf {
    #[serde(default)]
    pub source_type: Option<SourceType>,
    #[serde(default)]
    pub entity_id: String,
    #[serde(default)]
    pub field: String,
    /// Human label shown in the editor.
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub value: Option<String>,
}

impl ReferenceLeaf {
    /// Builds a leaf describing `variable`.
    #[must_use]
    pub fn from_variable(variable: &Variable) -> Self {
        Self {
            source_type: Some(variable.source_type),
            entity_id: variable.id.clone(),
            field: variable.field.clone(),
            label: variable.display_identifier(),
            value: variable.value.clone(),
        }
    }

    /// Returns the identity triple, or `None` when an attribute is missing or
    /// cannot be encoded as a token.
    #[must_use]
    pub fn key(&self) -> Option<VariableKey> {
        let key = VariableKey::new(self.source_type?, &self.entity_id, &self.field);
        key.validate().ok()?;
        Some(key)
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.key().is_some()
    }
}

impl Paragraph {
    fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(Inline::Text { text: last }) = self.children.last_mut() {
            last.push_str(text);
        } else {
            self.children.push(Inline::Text { text: text.to_string() });
        }
    }

    fn visible_text(&self) -> String {
        self.children
            .iter()
            .map(|child| match child {
                Inline::Text { text } => text.as_str(),
                Inline::Reference(leaf) => leaf.label.as_str(),
            })
            .collect()
    }
}

impl Document {
    /// A document holding `text` as plain paragraphs, no references.
    #[must_use]
    pub fn plain(text: &str) -> Self {
        let paragraphs = split_lines(text)
            .map(|line| {
                let mut paragraph = Paragraph::default();
                paragraph.push_text(line);
                paragraph
            })
            .collect();
        Self { paragraphs }
    }

    /// Iterates reference leaves in document order.
    pub fn references(&self) -> impl Iterator<Item = &ReferenceLeaf> {
        self.paragraphs
            .iter()
            .flat_map(|p| p.children.iter())
            .filter_map(|child| match child {
                Inline::Reference(leaf) => Some(leaf),
                Inline::Text { .. } => None,
            })
    }

    pub(crate) fn references_mut(&mut self) -> impl Iterator<Item = &mut ReferenceLeaf> {
        self.paragraphs
            .iter_mut()
            .flat_map(|p| p.children.iter_mut())
            .filter_map(|child| match child {
                Inline::Reference(leaf) => Some(leaf),
                Inline::Text { .. } => None,
            })
    }

    /// Identity triples of the complete reference leaves, in order.
    #[must_use]
    pub fn reference_keys(&self) -> Vec<VariableKey> {
        self.references().filter_map(ReferenceLeaf::key).collect()
    }

    /// Text as the user sees it, references shown by label.
    #[must_use]
    pub fn visible_text(&self) -> String {
        self.paragraphs
            .iter()
            .map(Paragraph::visible_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// How resolved output is rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Markup and entities are removed.
    #[default]
    Text,
    /// Markup is kept and substituted values are HTML-escaped.
    Rich,
}

/// Converts card content between interchange, presentation and output forms.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentConverter {
    resolver: Resolver,
}

impl ContentConverter {
    #[must_use]
    pub const fn new(resolver: Resolver) -> Self {
        Self { resolver }
    }

    /// Serializes a document to the interchange form.
    ///
    /// Incomplete reference leaves cannot be written as tokens and fall back
    /// to their label.
    #[must_use]
    pub fn to_interchange(&self, document: &Document) -> String {
        let mut lines = Vec::with_capacity(document.paragraphs.len());
        for paragraph in &document.paragraphs {
            let mut line = String::new();
            for child in &paragraph.children {
                match child {
                    Inline::Text { text } => line.push_str(text),
                    Inline::Reference(leaf) => match leaf.key() {
                        Some(key) => line.push_str(&key.token()),
                        None => {
                            tracing::warn!(label = %leaf.label, "incomplete reference leaf written as text");
                            line.push_str(&leaf.label);
                        }
                    },
                }
            }
            lines.push(line);
        }
        lines.join("\n")
    }

    /// Parses interchange text into a document, refreshing labels from the
    /// snapshot.
    ///
    /// Canonical tokens always become reference leaves, labelled with the raw
    /// token when the variable is unknown. Display and legacy tokens become
    /// references only when the snapshot knows them.
    #[must_use]
    pub fn to_presentation(&self, text: &str, snapshot: &VariableSnapshot) -> Document {
        let paragraphs = split_lines(text)
            .map(|line| {
                let mut paragraph = Paragraph::default();
                let mut cursor = 0;
                for token in grammar::scan(line) {
                    let Some(leaf) = reference_leaf(&token.reference, token.as_str(line), snapshot) else {
                        continue;
                    };
                    paragraph.push_text(&line[cursor..token.start]);
                    paragraph.children.push(Inline::Reference(leaf));
                    cursor = token.end;
                }
                paragraph.push_text(&line[cursor..]);
                paragraph
            })
            .collect();
        Document { paragraphs }
    }

    /// Resolves interchange text to output form.
    pub fn to_output<L: VariableLookup + ?Sized>(&self, text: &str, lookup: &L, mode: OutputMode) -> Resolution {
        match mode {
            OutputMode::Text => self.resolver.resolve(&strip_markup(text), lookup),
            OutputMode::Rich => self.resolver.resolve(text, &EscapingLookup(lookup)),
        }
    }

    /// Serializes a document and resolves it to output form.
    pub fn document_to_output<L: VariableLookup + ?Sized>(
        &self,
        document: &Document,
        lookup: &L,
        mode: OutputMode,
    ) -> Resolution {
        self.to_output(&self.to_interchange(document), lookup, mode)
    }
}

fn reference_leaf(reference: &TokenRef, raw: &str, snapshot: &VariableSnapshot) -> Option<ReferenceLeaf> {
    match reference {
        TokenRef::Canonical { key, .. } => Some(match snapshot.get(key) {
            Some(variable) => ReferenceLeaf::from_variable(variable),
            None => {
                tracing::debug!(token = raw, "reference to unknown variable kept");
                ReferenceLeaf {
                    source_type: Some(key.source_type),
                    entity_id: key.entity_id.clone(),
                    field: key.field.clone(),
                    label: raw.to_string(),
                    value: None,
                }
            }
        }),
        TokenRef::Named {
            source_name,
            field,
            short_id,
        } => snapshot
            .find_named(source_name, field, short_id.as_deref())
            .map(ReferenceLeaf::from_variable),
    }
}

fn split_lines(text: &str) -> impl Iterator<Item = &str> {
    text.split('\n').map(|line| line.strip_suffix('\r').unwrap_or(line))
}

/// Removes markup tags and decodes the common entities.
#[must_use]
pub fn strip_markup(text: &str) -> String {
    let with_breaks = LINE_BREAK_TAG.replace_all(text, "\n");
    let stripped = MARKUP_TAG.replace_all(&with_breaks, "");
    stripped
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Escapes text for inclusion in markup.
#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

struct EscapingLookup<'a, L: ?Sized>(&'a L);

impl<L: VariableLookup + ?Sized> VariableLookup for EscapingLookup<'_, L> {
    fn lookup_key(&self, key: &VariableKey) -> Option<String> {
        self.0.lookup_key(key).map(|v| escape_html(&v))
    }

    fn lookup_named(&self, source_name: &str, field: &str, short_id: Option<&str>) -> Option<String> {
        self.0
            .lookup_named(source_name, field, short_id)
            .map(|v| escape_html(&v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> VariableSnapshot {
        VariableSnapshot::new([
            Variable::new(SourceType::Custom, "abcd", "name", "Hero").with_value("World"),
            Variable::new(SourceType::Npc, "n1xx", "mood", "Alice").with_value("<calm>"),
        ])
    }

    #[test]
    fn interchange_round_trip_preserves_references_and_text() {
        let converter = ContentConverter::default();
        let snap = snapshot();
        let text = "Hello @gv_custom_abcd_name-=!\n\nMood: @gv_npc_n1xx_mood-= and @gv_task_gone_output-=";

        let doc = converter.to_presentation(text, &snap);
        assert_eq!(doc.paragraphs.len(), 3);
        assert_eq!(doc.references().count(), 3);
        assert_eq!(
            doc.visible_text(),
            "Hello @Hero.name#abcd!\n\nMood: @Alice.mood#n1xx and @gv_task_gone_output-="
        );

        let back = converter.to_interchange(&doc);
        assert_eq!(back, text);

        let again = converter.to_presentation(&back, &snap);
        assert_eq!(again.reference_keys(), doc.reference_keys());
        assert_eq!(again.visible_text(), doc.visible_text());
    }

    #[test]
    fn display_form_becomes_canonical_on_save() {
        let converter = ContentConverter::default();
        let doc = converter.to_presentation("Hi @Hero.name#abcd and @Nobody.x", &snapshot());
        assert_eq!(
            converter.to_interchange(&doc),
            "Hi @gv_custom_abcd_name-= and @Nobody.x"
        );
    }

    #[test]
    fn text_output_strips_markup() {
        let converter = ContentConverter::default();
        let out = converter.to_output("<p>Hello <b>@gv_custom_abcd_name-=</b> &amp; @gv_npc_n1xx_mood-=</p>", &snapshot(), OutputMode::Text);
        assert_eq!(out.text, "Hello World & <calm>\n");
    }

    #[test]
    fn rich_output_escapes_values() {
        let converter = ContentConverter::default();
        let out = converter.to_output("<i>@gv_npc_n1xx_mood-=</i>", &snapshot(), OutputMode::Rich);
        assert_eq!(out.text, "<i>&lt;calm&gt;</i>");
    }

    #[test]
    fn incomplete_leaf_serializes_as_label() {
        let converter = ContentConverter::default();
        let doc = Document {
            paragraphs: vec![Paragraph {
                children: vec![Inline::Reference(ReferenceLeaf {
                    label: "@Lost.field".into(),
                    ..ReferenceLeaf::default()
                })],
            }],
        };
        assert_eq!(converter.to_interchange(&doc), "@Lost.field");
    }

    #[test]
    fn unencodable_identity_is_not_rebound_on_round_trip() {
        let converter = ContentConverter::default();
        let odd = Variable::new(SourceType::Custom, "my_id", "name", "Odd").with_value("v");
        let leaf = ReferenceLeaf::from_variable(&odd);
        assert!(!leaf.is_complete());

        let doc = Document {
            paragraphs: vec![Paragraph {
                children: vec![Inline::Text { text: "see ".into() }, Inline::Reference(leaf)],
            }],
        };
        let text = converter.to_interchange(&doc);
        assert_eq!(text, "see @Odd.name#my_i");
        assert!(!text.contains("@gv_custom_my_id_name"));

        let snap = VariableSnapshot::new([odd, Variable::new(SourceType::Custom, "my", "id_name", "Other")]);
        let again = converter.to_presentation(&text, &snap);
        assert!(again.reference_keys().is_empty());
        assert!(again.references().all(|leaf| leaf.entity_id != "my"));
    }

    #[test]
    fn document_json_shape() {
        let doc = ContentConverter::default().to_presentation("a @gv_custom_abcd_name-=", &snapshot());
        let json = serde_json::to_value(&doc).expect("serialize");
        assert_eq!(json["paragraphs"][0]["children"][0]["type"], "text");
        assert_eq!(json["paragraphs"][0]["children"][1]["type"], "reference");
        assert_eq!(json["paragraphs"][0]["children"][1]["entityId"], "abcd");
    }
}
