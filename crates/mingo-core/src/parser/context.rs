//! Context documents

use super::{
    bool_attr, child_elements, describe, in_file, number_attr, parse_xml, read_file, required_attr,
};
use crate::config::{parse_write_concern, BenchmarkConfig, ContextConfig, MongoConfig, PoolConfig};
use crate::convert::DefaultConverter;
use crate::el::ElEngineType;
use mingo_common::{MingoError, Result};
use roxmltree::Node;
use std::path::{Path, PathBuf};
use tracing::warn;

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 27017;

/// Load a context file
pub fn load_context(path: impl AsRef<Path>) -> Result<ContextConfig> {
    let path = path.as_ref();
    let text = read_file(path)?;
    parse_context(&text, path)
}

/// Parse context XML. Query-set paths are resolved against the directory of `path`.
pub fn parse_context(text: &str, path: &Path) -> Result<ContextConfig> {
    let doc = parse_xml(text, path)?;
    read_context(doc.root_element(), path).map_err(|e| in_file(path, e))
}

fn read_context(root: Node<'_, '_>, path: &Path) -> Result<ContextConfig> {
    if root.tag_name().name() != "context" {
        return Err(MingoError::Parse(format!(
            "root element must be <context>, found {}",
            describe(root)
        )));
    }

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let mut benchmark = BenchmarkConfig::default();
    let mut watch = false;
    let mut query_set_db_name = None;
    let mut query_sets = Vec::new();
    let mut engine = ElEngineType::default();
    let mut mongo = None;
    let mut default_converter = Some(DefaultConverter::Serde);

    for child in child_elements(root) {
        match child.tag_name().name() {
            "config" => {
                for setting in child_elements(child) {
                    match setting.tag_name().name() {
                        "benchmark" => benchmark = read_benchmark(setting)?,
                        "watch" => watch = bool_attr(setting, "enabled", false)?,
                        _ => return Err(unexpected(setting)),
                    }
                }
            }
            "querySetConfig" => {
                query_set_db_name = child.attribute("dbName").map(str::to_string);
                for set in child_elements(child) {
                    if set.tag_name().name() != "querySet" {
                        return Err(unexpected(set));
                    }
                    query_sets.push(resolve(base, required_attr(set, "path")?));
                }
            }
            "queryAnalyzer" => engine = required_attr(child, "type")?.trim().parse()?,
            "mongo" => mongo = Some(read_mongo(child)?),
            "converters" => {
                warn!(
                    package = child.attribute("package").unwrap_or_default(),
                    "converter packages are not scanned; register converters on ContextOptions"
                );
            }
            "defaultConverter" => {
                default_converter = DefaultConverter::from_config(required_attr(child, "class")?)?;
            }
            _ => return Err(unexpected(child)),
        }
    }

    let mongo = mongo.ok_or_else(|| MingoError::Parse("missing required <mongo> element".to_string()))?;

    Ok(ContextConfig {
        source: path.to_path_buf(),
        benchmark,
        watch,
        query_set_db_name,
        query_sets,
        engine,
        mongo,
        default_converter,
    })
}

fn unexpected(node: Node<'_, '_>) -> MingoError {
    MingoError::Parse(format!("unexpected element {}", describe(node)))
}

fn resolve(base: &Path, relative: &str) -> PathBuf {
    base.join(relative.trim())
}

fn read_benchmark(node: Node<'_, '_>) -> Result<BenchmarkConfig> {
    BenchmarkConfig::new(
        bool_attr(node, "enabled", false)?,
        number_attr(node, "threads", BenchmarkConfig::DEFAULT_THREADS)?,
        number_attr(node, "queueSize", BenchmarkConfig::DEFAULT_QUEUE_SIZE)?,
    )
    .map_err(|e| MingoError::Parse(format!("{}: {}", describe(node), e)))
}

fn read_mongo(node: Node<'_, '_>) -> Result<MongoConfig> {
    let host = node.attribute("host").unwrap_or(DEFAULT_HOST);
    let port = number_attr(node, "port", DEFAULT_PORT)?;
    let db_name = required_attr(node, "dbName")?;
    let write_concern = node
        .attribute("writeConcern")
        .map(parse_write_concern)
        .transpose()?;

    let mut pool = PoolConfig::default();
    for option in child_elements(node) {
        if option.tag_name().name() != "option" {
            return Err(unexpected(option));
        }
        let name = required_attr(option, "name")?;
        let value = option.attribute("value").unwrap_or_default();
        pool.set_option(name, value)?;
    }

    MongoConfig::new(host, port, db_name, write_concern, pool)
        .map_err(|e| MingoError::Parse(format!("{}: {}", describe(node), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const FULL: &str = r#"<context>
        <config>
            <benchmark enabled="true" threads="4" queueSize="64"/>
            <watch enabled="true"/>
        </config>
        <querySetConfig dbName="app">
            <querySet path="queries/users.xml"/>
            <querySet path="/abs/orders.xml"/>
        </querySetConfig>
        <queryAnalyzer type="springEL"/>
        <mongo host="db.local" port="27018" dbName="app" writeConcern="majority">
            <option name="connectTimeout" value="100"/>
            <option name="maxPoolSize" value="8"/>
        </mongo>
        <defaultConverter class="none"/>
    </context>"#;

    #[test]
    fn test_parse_full_context() {
        let config = parse_context(FULL, Path::new("/etc/mingo/context.xml")).unwrap();

        assert!(config.benchmark.enabled);
        assert_eq!(config.benchmark.threads, 4);
        assert_eq!(config.benchmark.queue_size, 64);
        assert!(config.watch);
        assert_eq!(config.query_set_db_name.as_deref(), Some("app"));
        assert_eq!(
            config.query_sets,
            vec![
                PathBuf::from("/etc/mingo/queries/users.xml"),
                PathBuf::from("/abs/orders.xml")
            ]
        );
        assert_eq!(config.engine, ElEngineType::SpringEl);
        assert_eq!(config.mongo.connection_string(), "mongodb://db.local:27018/app");
        assert_eq!(config.mongo.pool().connect_timeout, Some(Duration::from_millis(100)));
        assert_eq!(config.mongo.pool().max_pool_size, Some(8));
        assert!(config.mongo.write_concern().is_some());
        assert_eq!(config.default_converter, None);
    }

    #[test]
    fn test_minimal_context_defaults() {
        let config = parse_context(
            r#"<context><mongo dbName="app"/></context>"#,
            Path::new("context.xml"),
        )
        .unwrap();
        assert!(!config.benchmark.enabled);
        assert!(!config.watch);
        assert!(config.query_sets.is_empty());
        assert_eq!(config.engine, ElEngineType::Jexl);
        assert_eq!(config.mongo.host(), "localhost");
        assert_eq!(config.mongo.port(), 27017);
        assert_eq!(config.default_converter, Some(DefaultConverter::Serde));
    }

    #[test]
    fn test_context_errors() {
        let cases = [
            r#"<context/>"#,
            r#"<context><mongo/></context>"#,
            r#"<context><mongo dbName="app" port="0"/></context>"#,
            r#"<context><mongo dbName="app" port="http"/></context>"#,
            r#"<context><mongo dbName="app"><option name="bogus" value="1"/></mongo></context>"#,
            r#"<context><queryAnalyzer type="ognl"/><mongo dbName="app"/></context>"#,
            r#"<context><defaultConverter class="reflective"/><mongo dbName="app"/></context>"#,
            r#"<context><config><benchmark threads="0"/></config><mongo dbName="app"/></context>"#,
            r#"<context><mongo dbName="app"/><extra/></context>"#,
            r#"<config><mongo dbName="app"/></config>"#,
        ];
        for xml in cases {
            let err = parse_context(xml, Path::new("context.xml")).unwrap_err();
            assert!(matches!(err, MingoError::Parse(_)), "expected parse error for {}", xml);
        }
    }
}
