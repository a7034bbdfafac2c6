//! mingo: XML-defined MongoDB query sets with expression-language templating.
//!
//! Query sets declare named queries whose bodies are JSON with `${...}` placeholders.
//! A [`Context`] loads them from a context file, and its [`MingoTemplate`] resolves a
//! query against runtime [`QueryParameters`], executes it and converts the records.
//!
//! ```ignore
//! use mingo_core::{Context, ContextOptions, QueryParameters};
//!
//! let context = Context::create("context.xml", ContextOptions::new()).await?;
//! let params = QueryParameters::new().with("status", "active");
//! let users: Vec<User> = context.template().query_for_list("users.byStatus", &params).await?;
//! context.shutdown().await?;
//! ```

pub mod benchmark;
pub mod config;
pub mod connection;
pub mod context;
pub mod convert;
pub mod crud;
pub mod document;
pub mod driver;
pub mod el;
pub mod executor;
pub mod manager;
pub mod parser;
pub mod query;
pub mod statement;

pub use benchmark::{BenchmarkService, Metrics, MetricsTransfer, QueryProfiler, TimeUnit};
pub use config::{BenchmarkConfig, ContextConfig, MongoConfig, PoolConfig};
pub use connection::Connection;
pub use context::{Context, ContextOptions};
pub use convert::{Converter, ConverterService, DefaultConverter};
pub use crud::{Criteria, MingoTemplate};
pub use document::{Document, IdStrategy};
pub use driver::{DataStore, IndexSpec, MongoDataStore, UpdateOutcome};
pub use el::{create_engine, ElEngine, ElEngineType};
pub use executor::{BenchmarkQueryExecutor, QueryExecutor, ResultSet, StoreQueryExecutor};
pub use manager::QueryManager;
pub use query::{ConverterRef, QueryDefinition, QueryKind, QueryParameters, QuerySet};
pub use statement::{QueryStatement, ResolvedQuery, StatementBuilder};

pub use mingo_common::{MingoError, Result};
