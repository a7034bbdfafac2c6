//! Query-set documents

use super::{bool_attr, child_elements, describe, in_file, parse_xml, read_file, required_attr};
use crate::driver::validate_collection_name;
use crate::query::{
    collection_from_name, BodyPart, Branch, ConverterRef, QueryBody, QueryDefinition, QueryKind,
    QuerySet,
};
use mingo_common::{MingoError, Result};
use roxmltree::Node;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Load and validate a query-set file. Reads the file and nothing else.
pub fn load_query_set(path: impl AsRef<Path>) -> Result<QuerySet> {
    let path = path.as_ref();
    let text = read_file(path)?;
    parse_query_set(&text, path)
}

/// Parse query-set XML; `path` is recorded as the set's source
pub fn parse_query_set(text: &str, path: &Path) -> Result<QuerySet> {
    let doc = parse_xml(text, path)?;
    QuerySetReader::new(path)
        .read(doc.root_element())
        .map_err(|e| in_file(path, e))
}

struct QuerySetReader<'p> {
    path: &'p Path,
    fragments: HashMap<String, Vec<BodyPart>>,
}

impl<'p> QuerySetReader<'p> {
    fn new(path: &'p Path) -> Self {
        Self {
            path,
            fragments: HashMap::new(),
        }
    }

    fn read(mut self, root: Node<'_, '_>) -> Result<QuerySet> {
        if root.tag_name().name() != "querySet" {
            return Err(MingoError::Parse(format!(
                "root element must be <querySet>, found {}",
                describe(root)
            )));
        }
        let db_name = root.attribute("dbName").map(str::to_string);
        let default_collection = root.attribute("collection").filter(|c| !c.trim().is_empty());

        let mut queries = Vec::new();
        let mut seen = HashSet::new();
        for child in child_elements(root) {
            match child.tag_name().name() {
                "fragment" => self.read_fragment(child)?,
                "query" => {
                    let query = self.read_query(child, default_collection)?;
                    if !seen.insert(query.name.clone()) {
                        return Err(MingoError::Parse(format!(
                            "duplicate query name '{}' ({})",
                            query.name,
                            describe(child)
                        )));
                    }
                    debug!(
                        query = %query.name,
                        collection = %query.collection,
                        kind = %query.kind,
                        dynamic = query.body.is_dynamic(),
                        "loaded query"
                    );
                    queries.push(Arc::new(query));
                }
                _ => {
                    return Err(MingoError::Parse(format!(
                        "unexpected element {}",
                        describe(child)
                    )))
                }
            }
        }

        Ok(QuerySet {
            path: self.path.to_path_buf(),
            db_name,
            queries,
        })
    }

    fn read_fragment(&mut self, node: Node<'_, '_>) -> Result<()> {
        let name = required_attr(node, "name")?.to_string();
        if self.fragments.contains_key(&name) {
            return Err(MingoError::Parse(format!(
                "duplicate fragment '{}' ({})",
                name,
                describe(node)
            )));
        }
        let parts = self.read_parts(node)?;
        self.fragments.insert(name, parts);
        Ok(())
    }

    fn read_query(&self, node: Node<'_, '_>, default_collection: Option<&str>) -> Result<QueryDefinition> {
        let name = required_attr(node, "name")?.trim().to_string();
        let kind = match node.attribute("type") {
            Some(ty) => ty.trim().parse::<QueryKind>()?,
            None => QueryKind::Plain,
        };

        let collection = node
            .attribute("collection")
            .filter(|c| !c.trim().is_empty())
            .or(default_collection)
            .or_else(|| collection_from_name(&name))
            .map(str::to_string)
            .ok_or_else(|| {
                MingoError::Parse(format!(
                    "query '{}' has no collection and its name has no collection prefix",
                    name
                ))
            })?;
        validate_collection_name(&collection)
            .map_err(|e| MingoError::Parse(format!("query '{}': {}", name, e)))?;

        let converter = match (node.attribute("converter"), node.attribute("method")) {
            (Some(converter), method) => {
                let mut reference = ConverterRef::new(converter.trim());
                if let Some(method) = method.filter(|m| !m.trim().is_empty()) {
                    reference = reference.with_method(method.trim());
                }
                Some(reference)
            }
            (None, Some(_)) => {
                return Err(MingoError::Parse(format!(
                    "query '{}' names a converter method without a converter",
                    name
                )))
            }
            (None, None) => None,
        };

        let escape_null_parameters = bool_attr(node, "escapeNullParameters", false)?;

        let with_query = |e: MingoError| match e {
            MingoError::Parse(msg) => MingoError::Parse(format!("query '{}': {}", name, msg)),
            other => other,
        };
        let body = QueryBody::from_parts(self.read_parts(node)?).map_err(with_query)?;
        for variant in body.variants().map_err(with_query)? {
            kind.check_shape(&variant, body.is_dynamic())
                .map_err(with_query)?;
        }

        Ok(QueryDefinition {
            name,
            collection,
            kind,
            body,
            converter,
            escape_null_parameters,
            source: self.path.to_path_buf(),
        })
    }

    /// Mixed content of a query, fragment or conditional arm
    fn read_parts(&self, node: Node<'_, '_>) -> Result<Vec<BodyPart>> {
        let mut parts = Vec::new();
        for child in node.children() {
            if child.is_text() {
                if let Some(text) = child.text() {
                    parts.push(BodyPart::Text(text.to_string()));
                }
                continue;
            }
            if !child.is_element() {
                continue;
            }

            match child.tag_name().name() {
                "include" => {
                    let reference = required_attr(child, "ref")?;
                    let fragment = self.fragments.get(reference).ok_or_else(|| {
                        MingoError::Parse(format!(
                            "{} references unknown fragment '{}' (fragments must be defined before use)",
                            describe(child),
                            reference
                        ))
                    })?;
                    parts.extend(fragment.iter().cloned());
                }
                "if" => {
                    let branch = Branch {
                        test: Some(required_attr(child, "test")?.to_string()),
                        parts: self.read_parts(child)?,
                    };
                    parts.push(BodyPart::Choice(vec![branch]));
                }
                tag @ ("elseIf" | "else") => {
                    let test = match tag {
                        "elseIf" => Some(required_attr(child, "test")?.to_string()),
                        _ => None,
                    };
                    let branch = Branch {
                        test,
                        parts: self.read_parts(child)?,
                    };
                    attach_branch(&mut parts, branch)
                        .map_err(|msg| MingoError::Parse(format!("{} {}", describe(child), msg)))?;
                }
                _ => {
                    return Err(MingoError::Parse(format!(
                        "unexpected element {}",
                        describe(child)
                    )))
                }
            }
        }
        Ok(parts)
    }
}

/// Add an `elseIf` / `else` arm to the choice it follows
fn attach_branch(parts: &mut Vec<BodyPart>, branch: Branch) -> std::result::Result<(), &'static str> {
    while matches!(parts.last(), Some(BodyPart::Text(text)) if text.trim().is_empty()) {
        parts.pop();
    }
    match parts.last_mut() {
        Some(BodyPart::Choice(branches)) => {
            if branches.last().is_some_and(|b| b.test.is_none()) {
                return Err("follows an <else>");
            }
            branches.push(branch);
            Ok(())
        }
        _ => Err("must directly follow an <if> or <elseIf>"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(xml: &str) -> Result<QuerySet> {
        parse_query_set(xml, Path::new("queries.xml"))
    }

    #[test]
    fn test_parse_query_attributes() {
        let set = parse(
            r#"<querySet dbName="app" collection="people">
                <query name="findUser" converter="userConverter" method="summary" escapeNullParameters="true">
                    { "email": "${email}" }
                </query>
                <query name="users.byAge" type="aggregation">
                    [ { "$match": { "age": { "$gte": ${minAge} } } } ]
                </query>
                <query name="countAll" collection="audit">{}</query>
            </querySet>"#,
        )
        .unwrap();

        assert_eq!(set.db_name.as_deref(), Some("app"));
        assert_eq!(set.len(), 3);

        let find_user = set.get("findUser").unwrap();
        assert_eq!(find_user.collection, "people");
        assert_eq!(find_user.kind, QueryKind::Plain);
        assert!(find_user.escape_null_parameters);
        assert_eq!(
            find_user.converter,
            Some(ConverterRef::new("userConverter").with_method("summary"))
        );

        let by_age = set.get("users.byAge").unwrap();
        assert_eq!(by_age.kind, QueryKind::Aggregation);
        assert_eq!(by_age.collection, "people");
        assert_eq!(set.get("countAll").unwrap().collection, "audit");
    }

    #[test]
    fn test_collection_derived_from_name() {
        let set = parse(r#"<querySet><query name="orders.open">{}</query></querySet>"#).unwrap();
        assert_eq!(set.get("orders.open").unwrap().collection, "orders");

        let err = parse(r#"<querySet><query name="open">{}</query></querySet>"#).unwrap_err();
        assert!(matches!(err, MingoError::Parse(_)));
    }

    #[test]
    fn test_fragments_and_includes() {
        let set = parse(
            r#"<querySet collection="users">
                <fragment name="active">"status": "active"</fragment>
                <fragment name="activeAdult"><include ref="active"/>, "age": { "$gte": 18 }</fragment>
                <query name="q">{ <include ref="activeAdult"/> }</query>
            </querySet>"#,
        )
        .unwrap();
        assert!(!set.get("q").unwrap().body.is_dynamic());

        let err = parse(
            r#"<querySet collection="users">
                <query name="q">{ <include ref="later"/> }</query>
                <fragment name="later">"a": 1</fragment>
            </querySet>"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown fragment"));
    }

    #[test]
    fn test_conditional_blocks() {
        let set = parse(
            r#"<querySet collection="users">
                <query name="q" type="aggregation">
                    [ { "$match": {} }
                    <if test="byName">, { "$sort": { "name": 1 } }</if>
                    <elseIf test="byAge">, { "$sort": { "age": 1 } }</elseIf>
                    <else>, { "$sort": { "_id": 1 } }</else> ]
                </query>
            </querySet>"#,
        )
        .unwrap();
        assert!(set.get("q").unwrap().body.is_dynamic());
    }

    #[test]
    fn test_misplaced_else() {
        let err = parse(
            r#"<querySet collection="users">
                <query name="q">{ "a": 1 <else>, "b": 2</else> }</query>
            </querySet>"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("must directly follow"));
    }

    #[test]
    fn test_validation_errors() {
        let cases = [
            r#"<querySet><query name="u.q" type="mapReduce">{}</query></querySet>"#,
            r#"<querySet><query collection="u">{}</query></querySet>"#,
            r#"<querySet><query name="u.q">{ "a": </query></querySet>"#,
            r#"<querySet><query name="u.q" type="aggregation">[]</query></querySet>"#,
            r#"<querySet><query name="u.q">{ "a": "${a" }</query></querySet>"#,
            r#"<querySet><query name="u.q" method="m">{}</query></querySet>"#,
            r#"<querySet><query name="u.q" escapeNullParameters="yes">{}</query></querySet>"#,
            r#"<querySet><query name="u.q">{}</query><query name="u.q">{}</query></querySet>"#,
            r#"<queries><query name="u.q">{}</query></queries>"#,
            r#"<querySet><query name="u.q">{}</query>"#,
            r#"<querySet><query name="u.q">{ <if test="x">"a": 1, </if> }</query></querySet>"#,
            r#"<querySet><query name="q" collection="system.users">{}</query></querySet>"#,
        ];
        for xml in cases {
            let err = parse(xml).unwrap_err();
            assert!(matches!(err, MingoError::Parse(_)), "expected parse error for {}", xml);
        }
    }

    #[test]
    fn test_errors_name_the_file() {
        let err = parse(r#"<querySet><query name="u.q">[</query></querySet>"#).unwrap_err();
        assert!(err.to_string().contains("queries.xml"));
    }
}
