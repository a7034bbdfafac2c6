//! Assembly of a running mingo instance from a context file

use crate::benchmark::{BenchmarkService, MetricsTransfer};
use crate::config::ContextConfig;
use crate::connection::Connection;
use crate::convert::ConverterService;
use crate::crud::MingoTemplate;
use crate::driver::{DataStore, MongoDataStore};
use crate::el::{create_engine, ElEngine};
use crate::executor::{BenchmarkQueryExecutor, QueryExecutor, StoreQueryExecutor};
use crate::manager::QueryManager;
use crate::parser::load_context;
use crate::statement::StatementBuilder;
use mingo_common::{MingoError, Result};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What the application supplies besides the context file
#[derive(Default)]
pub struct ContextOptions {
    /// Typed and named converters; the context file only decides the default
    pub converters: ConverterService,
    pub benchmark_services: Vec<Arc<dyn BenchmarkService>>,
    /// Use this store instead of connecting to the configured MongoDB
    pub data_store: Option<Arc<dyn DataStore>>,
}

impl ContextOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_converters(mut self, converters: ConverterService) -> Self {
        self.converters = converters;
        self
    }

    pub fn with_benchmark_service(mut self, service: Arc<dyn BenchmarkService>) -> Self {
        self.benchmark_services.push(service);
        self
    }

    pub fn with_data_store(mut self, store: Arc<dyn DataStore>) -> Self {
        self.data_store = Some(store);
        self
    }
}

/// Every component of a running instance.
///
/// Components hold explicit references to each other; there is no global context.
pub struct Context {
    config: ContextConfig,
    manager: Arc<QueryManager>,
    engine: Arc<dyn ElEngine>,
    converters: Arc<ConverterService>,
    store: Arc<dyn DataStore>,
    transfer: Arc<MetricsTransfer>,
    template: MingoTemplate,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("source", &self.config.source)
            .field("manager", &self.manager)
            .field("engine", &self.engine.engine_type())
            .field("benchmark", &self.config.benchmark.enabled)
            .finish()
    }
}

impl Context {
    /// Load `path` and build every component.
    ///
    /// # Errors
    /// `ContextInitialization` wrapping the first failure.
    pub async fn create(path: impl AsRef<Path>, options: ContextOptions) -> Result<Self> {
        let path = path.as_ref();
        Self::build(path, options)
            .await
            .map_err(|cause| {
                error!(path = %path.display(), error = %cause, "context initialization failed");
                MingoError::context_initialization(cause)
            })
    }

    async fn build(path: &Path, options: ContextOptions) -> Result<Self> {
        let config = load_context(path)?;

        let manager = Arc::new(QueryManager::new());
        for set_path in &config.query_sets {
            manager.register_file(set_path)?;
        }
        if let Some(db_name) = &config.query_set_db_name {
            if db_name != config.mongo.db_name() {
                warn!(
                    query_sets = %db_name,
                    mongo = %config.mongo.db_name(),
                    "query sets name a different database than the connection; using the connection's"
                );
            }
        }

        let mut converters = options.converters;
        converters.set_default(config.default_converter);
        let converters = Arc::new(converters);

        let store = match options.data_store {
            Some(store) => store,
            None => {
                let connection = Connection::connect(&config.mongo).await?;
                Arc::new(MongoDataStore::new(connection)) as Arc<dyn DataStore>
            }
        };

        let engine = create_engine(config.engine);
        let transfer = Arc::new(MetricsTransfer::new(&config.benchmark));
        let mut executor: Arc<dyn QueryExecutor> = Arc::new(StoreQueryExecutor::new(Arc::clone(&store)));
        if config.benchmark.enabled {
            executor = Arc::new(BenchmarkQueryExecutor::new(executor, Arc::clone(&transfer)));
        }

        let template = MingoTemplate::new(
            Arc::clone(&manager),
            StatementBuilder::new(Arc::clone(&engine)),
            executor,
            Arc::clone(&store),
            Arc::clone(&converters),
        );

        let context = Self {
            config,
            manager,
            engine,
            converters,
            store,
            transfer,
            template,
            shut_down: AtomicBool::new(false),
        };

        if let Err(e) = context.start(options.benchmark_services) {
            context.shut_down.store(true, Ordering::SeqCst);
            if let Err(cleanup) = context.release().await {
                warn!(error = %cleanup, "cleanup after failed initialization was incomplete");
            }
            return Err(e);
        }

        info!(
            path = %path.display(),
            queries = context.manager.len(),
            engine = %context.engine.engine_type(),
            benchmark = context.config.benchmark.enabled,
            "context created"
        );
        Ok(context)
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<QueryManager> {
        &self.manager
    }

    pub fn engine(&self) -> &Arc<dyn ElEngine> {
        &self.engine
    }

    pub fn converters(&self) -> &ConverterService {
        &self.converters
    }

    pub fn store(&self) -> &Arc<dyn DataStore> {
        &self.store
    }

    pub fn template(&self) -> &MingoTemplate {
        &self.template
    }

    pub fn transfer(&self) -> &Arc<MetricsTransfer> {
        &self.transfer
    }

    /// Initialize and register each sink, then start watching query sets
    fn start(&self, services: Vec<Arc<dyn BenchmarkService>>) -> Result<()> {
        for service in services {
            service.init(self)?;
            self.transfer.register(service);
        }
        if self.config.watch {
            self.manager.watch()?;
        }
        Ok(())
    }

    /// Stop watching, deliver pending metrics, destroy sinks and close the store.
    ///
    /// Every step runs even if an earlier one fails. Calls after the first return `Ok`
    /// without doing anything.
    ///
    /// # Errors
    /// `Shutdown` listing every failure.
    pub async fn shutdown(&self) -> Result<()> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            debug!(path = %self.config.source.display(), "context already shut down");
            return Ok(());
        }
        self.release().await?;
        info!(path = %self.config.source.display(), "context shut down");
        Ok(())
    }

    /// Release everything started so far; only registered sinks were initialized
    async fn release(&self) -> Result<()> {
        let mut failures = Vec::new();

        self.manager.shutdown();
        self.transfer.shutdown().await;

        for service in self.transfer.services() {
            if let Err(e) = service.destroy() {
                warn!(service = service.name(), error = %e, "benchmark service destroy failed");
                failures.push(e);
            }
        }

        if let Err(e) = self.store.close().await {
            warn!(error = %e, "data store close failed");
            failures.push(e);
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(MingoError::Shutdown(failures))
        }
    }
}
