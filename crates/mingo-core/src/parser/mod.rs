//! XML loaders for query sets and context documents

mod context;
mod query_set;

pub use context::{load_context, parse_context};
pub use query_set::{load_query_set, parse_query_set};

use mingo_common::{MingoError, Result};
use roxmltree::Node;
use std::path::Path;
use std::str::FromStr;

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| MingoError::Parse(format!("cannot read {}: {}", path.display(), e)))
}

fn parse_xml<'input>(text: &'input str, path: &Path) -> Result<roxmltree::Document<'input>> {
    roxmltree::Document::parse(text)
        .map_err(|e| MingoError::Parse(format!("{}: malformed XML: {}", path.display(), e)))
}

/// Prefix parse errors with the file they come from
fn in_file(path: &Path, err: MingoError) -> MingoError {
    match err {
        MingoError::Parse(msg) => MingoError::Parse(format!("{}: {}", path.display(), msg)),
        other => other,
    }
}

/// `<tag>` at line N, for error messages
fn describe(node: Node<'_, '_>) -> String {
    let pos = node.document().text_pos_at(node.range().start);
    format!("<{}> at line {}", node.tag_name().name(), pos.row)
}

fn child_elements<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|child| child.is_element())
}

fn required_attr<'a>(node: Node<'a, '_>, name: &str) -> Result<&'a str> {
    match node.attribute(name) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(MingoError::Parse(format!(
            "{} is missing required attribute '{}'",
            describe(node),
            name
        ))),
    }
}

fn bool_attr(node: Node<'_, '_>, name: &str, default: bool) -> Result<bool> {
    match node.attribute(name).map(str::trim) {
        None => Ok(default),
        Some(value) if value.eq_ignore_ascii_case("true") => Ok(true),
        Some(value) if value.eq_ignore_ascii_case("false") => Ok(false),
        Some(value) => Err(MingoError::Parse(format!(
            "{}: attribute '{}' must be true or false, got '{}'",
            describe(node),
            name,
            value
        ))),
    }
}

fn number_attr<T: FromStr>(node: Node<'_, '_>, name: &str, default: T) -> Result<T> {
    match node.attribute(name) {
        None => Ok(default),
        Some(value) => value.trim().parse::<T>().map_err(|_| {
            MingoError::Parse(format!(
                "{}: attribute '{}' must be a number, got '{}'",
                describe(node),
                name,
                value
            ))
        }),
    }
}
