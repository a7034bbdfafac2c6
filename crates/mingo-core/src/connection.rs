//! MongoDB connection management

use crate::config::MongoConfig;
use bson::{doc, Document as BsonDocument};
use mingo_common::{MingoError, Result};
use mongodb::{
    options::{ClientOptions, ServerApi, ServerApiVersion},
    Client, Collection, Database,
};
use tracing::info;

/// MongoDB client bound to the configured database
#[derive(Debug, Clone)]
pub struct Connection {
    client: Client,
    database: Database,
    database_name: String,
}

impl Connection {
    /// Connect with the pool, timeout and write-concern settings of `config`.
    ///
    /// The driver connects lazily; this only validates and applies options.
    pub async fn connect(config: &MongoConfig) -> Result<Self> {
        let connection_string = config.connection_string();
        let mut client_options = ClientOptions::parse(&connection_string)
            .await
            .map_err(|e| MingoError::Connection(format!("invalid connection settings: {}", e)))?;

        config.pool().apply(&mut client_options);
        if let Some(write_concern) = config.write_concern() {
            client_options.write_concern = Some(write_concern.clone());
        }

        // Set stable API version for compatibility
        let server_api = ServerApi::builder().version(ServerApiVersion::V1).build();
        client_options.server_api = Some(server_api);

        let client = Client::with_options(client_options)
            .map_err(|e| MingoError::Connection(e.to_string()))?;
        let database = client.database(config.db_name());
        let database_name = database.name().to_string();

        info!(host = config.host(), port = config.port(), database = %database_name, "mongo client created");

        Ok(Self {
            client,
            database,
            database_name,
        })
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Untyped collection handle
    pub fn collection(&self, name: &str) -> Collection<BsonDocument> {
        self.database.collection(name)
    }

    /// Check that the server answers
    pub async fn ping(&self) -> Result<()> {
        self.database
            .run_command(doc! { "ping": 1 })
            .await
            .map(|_| ())
            .map_err(|e| MingoError::Connection(format!("Ping failed: {}", e)))
    }

    pub async fn list_collection_names(&self) -> Result<Vec<String>> {
        let names = self.database.list_collection_names().await?;
        Ok(names)
    }

    /// Close the client, waiting for in-flight operations
    pub async fn shutdown(&self) {
        self.client.clone().shutdown().await;
    }
}
