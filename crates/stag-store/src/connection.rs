//! HTTP connection to ArangoDB.
//!
//! The driver speaks the plain REST API with basic auth: `_api/cursor` for
//! AQL (with batch continuation), `_api/document` for key-addressed reads
//! and inserts, and the `_api/collection` / `_api/index` / `_api/gharial`
//! management endpoints used by the migrations.

use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{ArangoErrorBody, StoreError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CURSOR_BATCH_SIZE: usize = 1000;

/// Connection parameters for the store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Base endpoint, e.g. `http://localhost:8529`.
    pub url: String,
    /// Database name.
    pub database: String,
    pub username: String,
    pub password: String,
}

/// Collection type understood by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    Document,
    Edge,
}

impl CollectionKind {
    fn type_code(self) -> u8 {
        match self {
            CollectionKind::Document => 2,
            CollectionKind::Edge => 3,
        }
    }
}

/// Edge definition for graph creation.
#[derive(Debug, Clone, Serialize)]
pub struct EdgeDefinition {
    pub collection: String,
    pub from: Vec<String>,
    pub to: Vec<String>,
}

/// A connection bound to one database.
pub struct Connection {
    http: reqwest::Client,
    base: String,
    database: String,
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct CursorPage {
    #[serde(default)]
    result: Vec<Value>,
    #[serde(default, rename = "hasMore")]
    has_more: bool,
    #[serde(default)]
    id: Option<String>,
}

impl Connection {
    /// Establish a connection, creating the database when it does not exist.
    pub async fn connect(cfg: &StoreConfig) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        let conn = Self {
            http,
            base: cfg.url.trim_end_matches('/').to_string(),
            database: cfg.database.clone(),
            username: cfg.username.clone(),
            password: cfg.password.clone(),
        };

        match conn
            .send_expect::<Value>(
                conn.req(
                    Method::POST,
                    format!("{}/_db/_system/_api/database", conn.base),
                )
                .json(&json!({ "name": conn.database })),
            )
            .await
        {
            Ok(_) => tracing::info!(database = %conn.database, "created database"),
            Err(e) if e.is_conflict() => {}
            Err(e) => return Err(e),
        }

        Ok(conn)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/_db/{}/{}", self.base, self.database, path)
    }

    fn req(&self, method: Method, url: String) -> RequestBuilder {
        self.http
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password))
    }

    async fn send_expect<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, StoreError> {
        let response = request.send().await?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }
        let code = status.as_u16();
        let text = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ArangoErrorBody>(&text) {
            Ok(body) if body.error => Err(StoreError::Arango {
                num: body.error_num,
                message: body.error_message,
                status: code,
            }),
            _ => Err(StoreError::Arango {
                num: 0,
                message: format!("unexpected status {code}"),
                status: code,
            }),
        }
    }

    /// Execute an AQL query, following cursor batches until exhaustion, and
    /// decode every row as `T`.
    pub async fn query<T: DeserializeOwned>(
        &self,
        aql: &str,
        bind_vars: Value,
    ) -> Result<Vec<T>, StoreError> {
        let mut page: CursorPage = self
            .send_expect(self.req(Method::POST, self.endpoint("_api/cursor")).json(&json!({
                "query": aql,
                "bindVars": bind_vars,
                "batchSize": CURSOR_BATCH_SIZE,
            })))
            .await?;

        let mut rows = Vec::with_capacity(page.result.len());
        loop {
            for item in page.result.drain(..) {
                rows.push(serde_json::from_value(item)?);
            }
            if !page.has_more {
                break;
            }
            // The server only sets an id when more batches exist.
            let Some(id) = page.id.clone() else { break };
            page = self
                .send_expect(self.req(Method::PUT, self.endpoint(&format!("_api/cursor/{id}"))))
                .await?;
        }
        Ok(rows)
    }

    /// Read a document by primary key. Returns `None` when absent.
    pub async fn read_document<T: DeserializeOwned>(
        &self,
        collection: &str,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        let url = self.endpoint(&format!("_api/document/{collection}/{key}"));
        match self.send_expect::<T>(self.req(Method::GET, url)).await {
            Ok(doc) => Ok(Some(doc)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Insert a document under an explicit primary key.
    pub async fn insert_document<T: Serialize>(
        &self,
        collection: &str,
        key: &str,
        document: &T,
    ) -> Result<(), StoreError> {
        let mut body = serde_json::to_value(document)?;
        match body.as_object_mut() {
            Some(map) => {
                map.insert("_key".to_string(), Value::String(key.to_string()));
            }
            None => {
                return Err(StoreError::Decode(serde::ser::Error::custom(
                    "document must serialize to a JSON object",
                )))
            }
        }
        let url = self.endpoint(&format!("_api/document/{collection}"));
        self.send_expect::<Value>(self.req(Method::POST, url).json(&body))
            .await?;
        Ok(())
    }

    /// Create a collection of the given kind. Conflicts bubble up to the
    /// caller, which treats them as already-exists.
    pub async fn create_collection(
        &self,
        name: &str,
        kind: CollectionKind,
    ) -> Result<(), StoreError> {
        self.send_expect::<Value>(
            self.req(Method::POST, self.endpoint("_api/collection"))
                .json(&json!({ "name": name, "type": kind.type_code() })),
        )
        .await?;
        Ok(())
    }

    /// Ensure a persistent secondary index over `fields`.
    pub async fn ensure_persistent_index(
        &self,
        collection: &str,
        name: &str,
        fields: &[&str],
        sparse: bool,
    ) -> Result<(), StoreError> {
        let url = self.endpoint(&format!("_api/index?collection={collection}"));
        self.send_expect::<Value>(self.req(Method::POST, url).json(&json!({
            "type": "persistent",
            "name": name,
            "fields": fields,
            "unique": false,
            "sparse": sparse,
        })))
        .await?;
        Ok(())
    }

    /// Ensure a geo index over two scalar fields.
    pub async fn ensure_geo_index(
        &self,
        collection: &str,
        name: &str,
        fields: &[&str],
    ) -> Result<(), StoreError> {
        let url = self.endpoint(&format!("_api/index?collection={collection}"));
        self.send_expect::<Value>(self.req(Method::POST, url).json(&json!({
            "type": "geo",
            "name": name,
            "fields": fields,
            "geoJson": false,
        })))
        .await?;
        Ok(())
    }

    /// Create a named graph from edge definitions.
    pub async fn create_graph(
        &self,
        name: &str,
        edge_definitions: &[EdgeDefinition],
    ) -> Result<(), StoreError> {
        self.send_expect::<Value>(
            self.req(Method::POST, self.endpoint("_api/gharial"))
                .json(&json!({ "name": name, "edgeDefinitions": edge_definitions })),
        )
        .await?;
        Ok(())
    }
}
