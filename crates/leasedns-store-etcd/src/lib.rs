// # etcd Record Store
//
// This crate provides a `KvStore` implementation backed by an etcd v3
// cluster, talking to its JSON gateway over HTTP.
//
// ## Implementation Status
//
// - ✅ One HTTP request per store operation (plus authentication when needed)
// - ✅ Full error propagation to the caller (the cleaner decides when to retry)
// - ✅ HTTP timeout configured (30 seconds)
// - ✅ Specific error handling for HTTP status codes (401, 403, 5xx)
// - ✅ Endpoint failover: endpoints are tried in order until one answers
// - ✅ Optional username/password authentication
// - ❌ NO retry loops (owned by the cleaner and the next change event)
// - ❌ NO background tasks (violates shutdown determinism)
// - ❌ NO leases or watches (heartbeats carry their own timestamps)
//
// ### Trust Level: Untrusted (Remote Store)
//
// **Allowed Capabilities**:
// - ✅ Perform HTTP/HTTPS calls to the configured endpoints only
// - ✅ Cache the authentication token between calls
//
// **Forbidden Capabilities**:
// - ❌ Spawn tasks or threads
// - ❌ Interpret keys or values (owned by `LeaseBackend`)
//
// ## Security Requirements
//
// - The password NEVER appears in logs or `Debug` output
// - The authentication token NEVER appears in logs or `Debug` output
//
// ## API Reference
//
// - etcd v3 gateway: https://etcd.io/docs/v3.5/dev-guide/api_grpc_gateway/
// - Put: POST `/v3/kv/put`
// - Range: POST `/v3/kv/range`
// - Delete: POST `/v3/kv/deleterange`
// - Authenticate: POST `/v3/auth/authenticate`

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use leasedns_core::config::StoreConfig;
use leasedns_core::traits::{KeyValue, KvStore, KvStoreFactory};
use leasedns_core::{Error, Result};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// Default HTTP timeout for gateway requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// User name and password for etcd authentication
#[derive(Clone)]
struct Credentials {
    username: String,
    /// ⚠️ NEVER log this value
    password: String,
}

/// etcd v3 store over the JSON gateway
///
/// # Endpoint Selection
///
/// Requests go to the endpoint that answered last. If it cannot be reached,
/// the remaining endpoints are tried in configuration order. An HTTP error
/// status is an answer and does not trigger failover.
///
/// # Security
///
/// The Debug implementation intentionally does NOT expose the password or
/// the authentication token.
pub struct EtcdKvStore {
    /// Gateway base URLs, without trailing slash
    endpoints: Vec<String>,

    /// Optional credentials
    credentials: Option<Credentials>,

    /// Cached authentication token
    /// ⚠️ NEVER log this value
    token: RwLock<Option<String>>,

    /// Index of the endpoint that answered last
    active: AtomicUsize,

    /// HTTP client for gateway requests
    client: reqwest::Client,
}

// Custom Debug implementation that hides the credentials
impl std::fmt::Debug for EtcdKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtcdKvStore")
            .field("endpoints", &self.endpoints)
            .field(
                "username",
                &self.credentials.as_ref().map(|c| c.username.as_str()),
            )
            .field(
                "password",
                &self.credentials.as_ref().map(|_| "<REDACTED>"),
            )
            .finish()
    }
}

impl EtcdKvStore {
    /// Create a new etcd store
    ///
    /// # Parameters
    ///
    /// - `endpoints`: Gateway URLs (e.g. `http://etcd:2379`), tried in order
    /// - `username`: Optional user name
    /// - `password`: Password for `username`
    ///
    /// # Returns
    ///
    /// - `Ok(EtcdKvStore)`: the store; no connection is made yet
    /// - `Err(Error::Config)`: no endpoints, or a user without password
    pub fn new(
        endpoints: Vec<String>,
        username: Option<String>,
        password: Option<String>,
    ) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(Error::config("etcd store needs at least one endpoint"));
        }

        let credentials = match (username, password) {
            (Some(username), Some(password)) => Some(Credentials { username, password }),
            (None, None) => None,
            _ => {
                return Err(Error::config(
                    "etcd username and password must be set together",
                ));
            }
        };

        // Build HTTP client with timeout
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            endpoints: endpoints
                .into_iter()
                .map(|e| e.trim_end_matches('/').to_string())
                .collect(),
            credentials,
            token: RwLock::new(None),
            active: AtomicUsize::new(0),
            client,
        })
    }

    /// Configured endpoints
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// POST `body` to `path`, authenticating first if credentials are set
    ///
    /// A rejected token is dropped and the request is repeated once with a
    /// fresh one.
    async fn call(&self, path: &str, body: &Value) -> Result<Value> {
        if self.credentials.is_none() {
            return self.post(path, body, None).await;
        }

        let token = self.token().await?;
        match self.post(path, body, Some(&token)).await {
            Err(Error::Authentication(reason)) => {
                tracing::debug!("etcd rejected token ({}), re-authenticating", reason);
                *self.token.write().await = None;
                let token = self.token().await?;
                self.post(path, body, Some(&token)).await
            }
            other => other,
        }
    }

    /// Cached token, authenticating if there is none
    async fn token(&self) -> Result<String> {
        if let Some(token) = self.token.read().await.as_ref() {
            return Ok(token.clone());
        }

        let Some(credentials) = &self.credentials else {
            return Err(Error::auth("no etcd credentials configured"));
        };

        let body = json!({
            "name": credentials.username,
            "password": credentials.password,
        });
        let response = self.post("/v3/auth/authenticate", &body, None).await?;
        let token = parse_token(&response)?;

        tracing::debug!(user = %credentials.username, "authenticated with etcd");
        *self.token.write().await = Some(token.clone());
        Ok(token)
    }

    /// Send one request, failing over between endpoints on transport errors
    async fn post(&self, path: &str, body: &Value, token: Option<&str>) -> Result<Value> {
        let start = self.active.load(Ordering::Relaxed) % self.endpoints.len();
        let mut last_error = None;

        for offset in 0..self.endpoints.len() {
            let index = (start + offset) % self.endpoints.len();
            let url = format!("{}{}", self.endpoints[index], path);

            let mut request = self.client.post(&url).json(body);
            if let Some(token) = token {
                request = request.header("Authorization", token);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(endpoint = %self.endpoints[index], error = %e, "etcd endpoint unreachable");
                    last_error = Some(e);
                    continue;
                }
            };

            self.active.store(index, Ordering::Relaxed);

            // Handle specific HTTP status codes
            if !response.status().is_success() {
                let status = response.status();
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unable to read error response".to_string());

                return match status.as_u16() {
                    401 | 403 => Err(Error::auth(format!(
                        "etcd rejected the request. Status: {}",
                        status
                    ))),
                    500..=599 => Err(Error::http(format!(
                        "etcd server error (transient): {} - {}",
                        status, error_text
                    ))),
                    _ => Err(Error::http(format!(
                        "etcd request {} failed: {} - {}",
                        path, status, error_text
                    ))),
                };
            }

            return response
                .json()
                .await
                .map_err(|e| Error::store(format!("Failed to parse etcd response: {}", e)));
        }

        Err(Error::http(match last_error {
            Some(e) => format!("No etcd endpoint reachable: {}", e),
            None => "No etcd endpoint reachable".to_string(),
        }))
    }
}

#[async_trait]
impl KvStore for EtcdKvStore {
    /// Write `key`
    ///
    /// # API Call
    ///
    /// ```http
    /// POST /v3/kv/put
    /// {"key": "<base64>", "value": "<base64>"}
    /// ```
    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let body = json!({
            "key": STANDARD.encode(key),
            "value": STANDARD.encode(value),
        });
        self.call("/v3/kv/put", &body).await?;
        Ok(())
    }

    /// List `prefix`, ascending by value
    ///
    /// # API Call
    ///
    /// ```http
    /// POST /v3/kv/range
    /// {"key": "<base64 prefix>", "range_end": "<base64 prefix end>",
    ///  "sort_order": "ASCEND", "sort_target": "VALUE"}
    /// ```
    async fn get_sorted_by_value(&self, prefix: &str) -> Result<Vec<KeyValue>> {
        let body = json!({
            "key": STANDARD.encode(prefix),
            "range_end": STANDARD.encode(prefix_end(prefix.as_bytes())),
            "sort_order": "ASCEND",
            "sort_target": "VALUE",
        });
        let response = self.call("/v3/kv/range", &body).await?;
        parse_range(&response)
    }

    /// Delete `key`
    ///
    /// # API Call
    ///
    /// ```http
    /// POST /v3/kv/deleterange
    /// {"key": "<base64>"}
    /// ```
    async fn delete(&self, key: &str) -> Result<u64> {
        let body = json!({ "key": STANDARD.encode(key) });
        let response = self.call("/v3/kv/deleterange", &body).await?;
        parse_count(&response["deleted"])
    }

    async fn close(&self) -> Result<()> {
        *self.token.write().await = None;
        tracing::debug!("etcd store closed");
        Ok(())
    }

    fn store_name(&self) -> &'static str {
        "etcd"
    }
}

/// Smallest key greater than every key starting with `prefix`
///
/// Trailing `0xff` bytes are dropped and the last remaining byte is
/// incremented. A prefix of only `0xff` bytes (or an empty prefix) has no
/// upper bound, which etcd spells `"\0"`.
pub fn prefix_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xff {
            end.push(last + 1);
            return end;
        }
    }
    vec![0]
}

fn decode(field: &Value, what: &str) -> Result<String> {
    let encoded = field.as_str().unwrap_or_default();
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| Error::store(format!("Invalid base64 in etcd {}: {}", what, e)))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// The gateway renders int64 fields as strings and omits zero values
fn parse_count(field: &Value) -> Result<u64> {
    match field {
        Value::Null => Ok(0),
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| Error::store(format!("Invalid count in etcd response: {}", n))),
        Value::String(s) => s
            .parse()
            .map_err(|_| Error::store(format!("Invalid count in etcd response: {}", s))),
        other => Err(Error::store(format!(
            "Invalid count in etcd response: {}",
            other
        ))),
    }
}

fn parse_range(response: &Value) -> Result<Vec<KeyValue>> {
    let Some(kvs) = response.get("kvs") else {
        return Ok(Vec::new());
    };

    let kvs = kvs
        .as_array()
        .ok_or_else(|| Error::store("Invalid response format: kvs is not an array"))?;

    kvs.iter()
        .map(|kv| Ok(KeyValue::new(decode(&kv["key"], "key")?, decode(&kv["value"], "value")?)))
        .collect()
}

fn parse_token(response: &Value) -> Result<String> {
    response["token"]
        .as_str()
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::auth("etcd authentication response carries no token"))
}

/// Factory for creating etcd stores
pub struct EtcdKvStoreFactory;

impl KvStoreFactory for EtcdKvStoreFactory {
    fn create(&self, config: &StoreConfig) -> Result<Box<dyn KvStore>> {
        match config {
            StoreConfig::Etcd {
                endpoints,
                username,
                password,
            } => Ok(Box::new(EtcdKvStore::new(
                endpoints.clone(),
                username.clone(),
                password.clone(),
            )?)),
            _ => Err(Error::config("Invalid config for etcd store")),
        }
    }
}

/// Register the etcd store with a registry
///
/// # Example
///
/// ```rust
/// use leasedns_core::Registry;
///
/// let registry = Registry::new();
/// leasedns_store_etcd::register(&registry);
/// assert!(registry.has_store("etcd"));
/// ```
pub fn register(registry: &leasedns_core::Registry) {
    registry.register_store("etcd", Box::new(EtcdKvStoreFactory));
}
