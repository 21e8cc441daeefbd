//! MongoDB backend for the flag store.
//!
//! The SSH forward itself is kept up outside the process; `tunnel_local_addr`
//! is its local end and is probed with a TCP connect before every use.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mongodb::bson::{doc, Bson, Document};
use mongodb::error::ErrorKind;
use mongodb::options::ClientOptions;
use mongodb::Client;
use serde_json::Value;
use tokio::net::TcpStream;

use crate::flag_store::{FlagStoreBackend, FlagStoreConnector};
use crate::SourceError;

fn map_mongo_err(e: mongodb::error::Error) -> SourceError {
    match e.kind.as_ref() {
        ErrorKind::Authentication { .. } => SourceError::Unauthorized(e.to_string()),
        ErrorKind::ServerSelection { .. } => SourceError::Timeout(e.to_string()),
        _ => SourceError::Unavailable(e.to_string()),
    }
}

async fn probe_forward(addr: &str, bound: Duration) -> Result<(), SourceError> {
    match tokio::time::timeout(bound, TcpStream::connect(addr)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(SourceError::Unavailable(format!(
            "tunnel endpoint {addr} unreachable: {e}"
        ))),
        Err(_) => Err(SourceError::Timeout(format!(
            "tunnel endpoint {addr} did not accept within {bound:?}"
        ))),
    }
}

#[derive(Clone)]
pub struct MongoConnector {
    uri: String,
    database: String,
    collection: String,
    tunnel_local_addr: String,
    query_timeout: Duration,
}

impl MongoConnector {
    pub fn new(
        uri: String,
        database: String,
        collection: String,
        tunnel_local_addr: String,
        query_timeout: Duration,
    ) -> Self {
        Self {
            uri,
            database,
            collection,
            tunnel_local_addr,
            query_timeout,
        }
    }
}

#[async_trait]
impl FlagStoreConnector for MongoConnector {
    async fn connect(&self) -> Result<Arc<dyn FlagStoreBackend>, SourceError> {
        probe_forward(&self.tunnel_local_addr, self.query_timeout).await?;

        let mut opts = ClientOptions::parse(self.uri.as_str()).await.map_err(map_mongo_err)?;
        opts.server_selection_timeout = Some(self.query_timeout);
        opts.connect_timeout = Some(self.query_timeout);
        opts.app_name = Some("dvt-monitor".to_string());
        let client = Client::with_options(opts).map_err(map_mongo_err)?;

        let backend = MongoBackend {
            client,
            database: self.database.clone(),
            collection: self.collection.clone(),
            tunnel_local_addr: self.tunnel_local_addr.clone(),
            query_timeout: self.query_timeout,
        };
        backend.health_check().await?;
        let backend: Arc<dyn FlagStoreBackend> = Arc::new(backend);
        Ok(backend)
    }
}

pub struct MongoBackend {
    client: Client,
    database: String,
    collection: String,
    tunnel_local_addr: String,
    query_timeout: Duration,
}

impl MongoBackend {
    fn collection(&self) -> mongodb::Collection<Document> {
        self.client
            .database(&self.database)
            .collection::<Document>(&self.collection)
    }

    async fn newest(&self, filter: Document) -> Result<Option<Value>, SourceError> {
        let found = self
            .collection()
            .find_one(filter)
            .sort(doc! { "receivedOn": -1 })
            .max_time(self.query_timeout)
            .await
            .map_err(map_mongo_err)?;
        Ok(found.map(|d| Bson::Document(d).into_relaxed_extjson()))
    }
}

#[async_trait]
impl FlagStoreBackend for MongoBackend {
    async fn health_check(&self) -> Result<(), SourceError> {
        probe_forward(&self.tunnel_local_addr, self.query_timeout).await?;
        self.client
            .database(&self.database)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(map_mongo_err)?;
        Ok(())
    }

    async fn latest_flag_document(
        &self,
        device_id: &str,
        flag: &str,
    ) -> Result<Option<Value>, SourceError> {
        let mut filter = Document::new();
        filter.insert("clientId", device_id);
        filter.insert(format!("payload.metrics.{flag}_calc.value"), true);
        self.newest(filter).await
    }

    async fn latest_twin_document(&self, device_id: &str) -> Result<Option<Value>, SourceError> {
        self.newest(doc! { "clientId": device_id }).await
    }
}
