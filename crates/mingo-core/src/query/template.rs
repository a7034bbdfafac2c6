//! Query body templates.
//!
//! A body is JSON text in which `${expression}` placeholders may appear inside string
//! literals (`"name": "${name}"`, `"^${prefix}"`) or bare in value position
//! (`"age": ${minAge}`). Parsing turns the text into a tree of [`Node`]s once; rendering
//! walks the tree against a parameter map and produces BSON.
//!
//! Subtrees without placeholders are converted to BSON up front through the extended-JSON
//! reader, so `{"$oid": "..."}` or `{"$date": ...}` literals keep their BSON types.

use crate::el::{value_to_text, ElEngine};
use crate::query::QueryParameters;
use bson::{Bson, Document as BsonDocument};
use mingo_common::{MingoError, Result};
use serde_json::Value;
use tracing::trace;

const OPEN: &str = "${";

/// Piece of a string containing placeholders
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    Expr(String),
}

/// Object key, either fixed or built from placeholders
#[derive(Debug, Clone, PartialEq)]
pub enum Key {
    Literal(String),
    Template(Vec<Segment>),
}

/// Parsed template tree
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Placeholder-free value
    Literal(Bson),
    /// A string that is exactly one placeholder; keeps the evaluated value's type
    Placeholder(String),
    /// A string with embedded placeholders; always renders as a string
    Interpolated(Vec<Segment>),
    Document(Vec<(Key, Node)>),
    Array(Vec<Node>),
}

impl Node {
    /// Number of elements when this node is an array
    pub fn array_len(&self) -> Option<usize> {
        match self {
            Node::Array(items) => Some(items.len()),
            Node::Literal(Bson::Array(items)) => Some(items.len()),
            _ => None,
        }
    }

    /// Whether this node always renders as a document
    pub fn is_document(&self) -> bool {
        matches!(self, Node::Document(_) | Node::Literal(Bson::Document(_)))
    }

    /// Whether this node may render as a document (placeholders are not known yet)
    pub fn may_be_document(&self) -> bool {
        self.is_document() || matches!(self, Node::Placeholder(_))
    }

    /// Array elements, for literal and templated arrays alike
    pub fn elements(&self) -> Vec<Node> {
        match self {
            Node::Array(items) => items.clone(),
            Node::Literal(Bson::Array(items)) => items.iter().cloned().map(Node::Literal).collect(),
            _ => Vec::new(),
        }
    }
}

/// A parsed query body
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    root: Node,
}

/// Outcome of rendering one node
enum Rendered {
    Value(Bson),
    /// Removed by the null-escaping policy
    Dropped,
}

/// Evaluation inputs for one render
struct RenderContext<'a> {
    engine: &'a dyn ElEngine,
    parameters: &'a QueryParameters,
    escape_nulls: bool,
}

impl Template {
    /// Parse template text.
    ///
    /// # Errors
    /// `Parse` when the text is not JSON (after bare placeholders are quoted) or a
    /// placeholder is unterminated or empty.
    pub fn parse(text: &str) -> Result<Self> {
        let quoted = quote_bare_placeholders(text)?;
        let value: Value = serde_json::from_str(&quoted)
            .map_err(|e| MingoError::Parse(format!("query body is not valid JSON: {}", e)))?;
        let root = to_node(value)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    /// True when the template contains no placeholders at all
    pub fn is_static(&self) -> bool {
        matches!(self.root, Node::Literal(_))
    }

    /// Render against `parameters`.
    ///
    /// With `escape_nulls`, a placeholder that evaluates to null or reads an absent
    /// parameter removes its enclosing entry; containers emptied that way are removed
    /// from their parent as well. The root itself is never removed: an emptied root
    /// renders as `{}` or `[]`.
    pub fn render(
        &self,
        engine: &dyn ElEngine,
        parameters: &QueryParameters,
        escape_nulls: bool,
    ) -> Result<Bson> {
        let ctx = RenderContext {
            engine,
            parameters,
            escape_nulls,
        };
        match ctx.render(&self.root)? {
            Rendered::Value(value) => Ok(value),
            Rendered::Dropped => Ok(match self.root {
                Node::Array(_) => Bson::Array(Vec::new()),
                _ => Bson::Document(BsonDocument::new()),
            }),
        }
    }
}

impl RenderContext<'_> {
    /// Evaluate one placeholder; `None` means the enclosing clause is dropped
    fn resolve(&self, expression: &str) -> Result<Option<Bson>> {
        match self.engine.evaluate(expression, self.parameters) {
            Ok(Bson::Null) if self.escape_nulls => {
                trace!(expression, "placeholder is null, dropping clause");
                Ok(None)
            }
            Err(MingoError::UnresolvedVariable(name)) if self.escape_nulls => {
                trace!(expression, variable = %name, "parameter absent, dropping clause");
                Ok(None)
            }
            Ok(value) => Ok(Some(value)),
            Err(e) => Err(e),
        }
    }

    fn interpolate(&self, segments: &[Segment]) -> Result<Option<String>> {
        let mut out = String::new();
        for segment in segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Expr(expression) => match self.resolve(expression)? {
                    Some(value) => out.push_str(&value_to_text(&value)),
                    None => return Ok(None),
                },
            }
        }
        Ok(Some(out))
    }

    fn render_key(&self, key: &Key) -> Result<Option<String>> {
        match key {
            Key::Literal(name) => Ok(Some(name.clone())),
            Key::Template(segments) => match segments.as_slice() {
                [Segment::Expr(expression)] => match self.resolve(expression)? {
                    None => Ok(None),
                    Some(Bson::String(name)) => Ok(Some(name)),
                    Some(Bson::Null) => Err(MingoError::ExpressionEvaluation(format!(
                        "key placeholder '{}' evaluated to null",
                        expression
                    ))),
                    Some(other) => Err(MingoError::ExpressionEvaluation(format!(
                        "key placeholder '{}' must evaluate to a string, got {:?}",
                        expression,
                        other.element_type()
                    ))),
                },
                _ => self.interpolate(segments),
            },
        }
    }

    fn render(&self, node: &Node) -> Result<Rendered> {
        match node {
            Node::Literal(value) => Ok(Rendered::Value(value.clone())),
            Node::Placeholder(expression) => Ok(match self.resolve(expression)? {
                Some(value) => Rendered::Value(value),
                None => Rendered::Dropped,
            }),
            Node::Interpolated(segments) => Ok(match self.interpolate(segments)? {
                Some(text) => Rendered::Value(Bson::String(text)),
                None => Rendered::Dropped,
            }),
            Node::Document(entries) => {
                let mut doc = BsonDocument::new();
                let mut dropped = false;
                for (key, value) in entries {
                    let Some(key) = self.render_key(key)? else {
                        dropped = true;
                        continue;
                    };
                    match self.render(value)? {
                        Rendered::Value(value) => {
                            doc.insert(key, value);
                        }
                        Rendered::Dropped => dropped = true,
                    }
                }
                if dropped && doc.is_empty() {
                    return Ok(Rendered::Dropped);
                }
                Ok(Rendered::Value(Bson::Document(doc)))
            }
            Node::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                let mut dropped = false;
                for item in items {
                    match self.render(item)? {
                        Rendered::Value(value) => out.push(value),
                        Rendered::Dropped => dropped = true,
                    }
                }
                if dropped && out.is_empty() {
                    return Ok(Rendered::Dropped);
                }
                Ok(Rendered::Value(Bson::Array(out)))
            }
        }
    }
}

/// Length in bytes of the expression that starts right after `${`, up to the matching `}`
fn expression_len(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '{' => depth += 1,
            '}' if depth == 0 => return Some(i),
            '}' => depth -= 1,
            _ => {}
        }
    }
    None
}

fn unterminated(text: &str) -> MingoError {
    MingoError::Parse(format!("unterminated placeholder in '{}'", text.trim()))
}

/// Wrap placeholders that appear outside JSON strings in quotes so the body parses as JSON
fn quote_bare_placeholders(text: &str) -> Result<String> {
    let mut out = String::with_capacity(text.len() + 8);
    let mut in_string = false;
    let mut escaped = false;
    let mut rest = text;

    while let Some(c) = rest.chars().next() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            out.push(c);
            rest = &rest[c.len_utf8()..];
            continue;
        }

        if rest.starts_with(OPEN) {
            let after = &rest[OPEN.len()..];
            let len = expression_len(after).ok_or_else(|| unterminated(text))?;
            out.push('"');
            out.push_str(OPEN);
            for ch in after[..len].chars() {
                if ch == '"' || ch == '\\' {
                    out.push('\\');
                }
                out.push(ch);
            }
            out.push_str("}\"");
            rest = &after[len + 1..];
            continue;
        }

        if c == '"' {
            in_string = true;
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }

    Ok(out)
}

/// Split a decoded string into text and placeholder segments
fn parse_segments(text: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find(OPEN) {
        if start > 0 {
            segments.push(Segment::Text(rest[..start].to_string()));
        }
        let after = &rest[start + OPEN.len()..];
        let len = expression_len(after).ok_or_else(|| unterminated(text))?;
        let expression = after[..len].trim();
        if expression.is_empty() {
            return Err(MingoError::Parse(format!("empty placeholder in '{}'", text)));
        }
        segments.push(Segment::Expr(expression.to_string()));
        rest = &after[len + 1..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Text(rest.to_string()));
    }

    Ok(segments)
}

fn has_placeholder(value: &Value) -> bool {
    match value {
        Value::String(s) => s.contains(OPEN),
        Value::Array(items) => items.iter().any(has_placeholder),
        Value::Object(map) => map.iter().any(|(k, v)| k.contains(OPEN) || has_placeholder(v)),
        _ => false,
    }
}

fn to_node(value: Value) -> Result<Node> {
    if !has_placeholder(&value) {
        let bson = Bson::try_from(value)
            .map_err(|e| MingoError::Parse(format!("invalid extended JSON: {}", e)))?;
        return Ok(Node::Literal(bson));
    }

    match value {
        Value::String(s) => {
            let mut segments = parse_segments(&s)?;
            if let [Segment::Expr(_)] = segments.as_slice() {
                if let Some(Segment::Expr(expression)) = segments.pop() {
                    return Ok(Node::Placeholder(expression));
                }
            }
            Ok(Node::Interpolated(segments))
        }
        Value::Array(items) => Ok(Node::Array(
            items.into_iter().map(to_node).collect::<Result<_>>()?,
        )),
        Value::Object(map) => {
            let mut entries = Vec::with_capacity(map.len());
            for (key, value) in map {
                let key = if key.contains(OPEN) {
                    Key::Template(parse_segments(&key)?)
                } else {
                    Key::Literal(key)
                };
                entries.push((key, to_node(value)?));
            }
            Ok(Node::Document(entries))
        }
        other => Err(MingoError::Internal(format!(
            "unexpected placeholder in scalar {}",
            other
        ))),
    }
}
