//! # Beverage Preference Service
//!
//! A small RPC service that answers `GetBeverage` calls with a beverage name
//! picked at random from the requested category's menu.
//!
//! The crate has two layers:
//!
//! - **RPC plumbing** (this file): a method registry keyed by
//!   `"Service.method"` names, bincode-encoded [`RpcRequest`]/[`RpcResponse`]
//!   envelopes, and QUIC transport through `s2n-quic`. One request travels on
//!   one bidirectional stream.
//! - **The beverage service** ([`beverage`]): the typed handler trait,
//!   server and client stubs, and the [`beverage::BeverageSelector`] that holds
//!   the actual selection logic.
//!
//! ## Serving
//!
//! ```rust,no_run
//! use beverage_preference::beverage::{BeveragePreferenceServer, BeverageSelector};
//! use beverage_preference::RpcConfig;
//!
//! # async fn run() -> Result<(), beverage_preference::RpcError> {
//! let config = RpcConfig::new("certs/cert.pem", "127.0.0.1:9090")
//!     .with_key_path("certs/key.pem")
//!     .with_server_name("localhost");
//!
//! BeveragePreferenceServer::new(BeverageSelector::new(), config)
//!     .serve()
//!     .await
//! # }
//! ```
//!
//! ## Calling
//!
//! ```rust,no_run
//! use beverage_preference::beverage::{BeveragePreferenceClient, BeverageType};
//! use beverage_preference::RpcConfig;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RpcConfig::new("certs/cert.pem", "0.0.0.0:0").with_server_name("localhost");
//! let client = BeveragePreferenceClient::connect("127.0.0.1:9090".parse()?, config).await?;
//! let beverage = client.get_beverage(BeverageType::Hot).await?;
//! println!("{beverage}");
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::FutureExt;
use s2n_quic::{client::Connect, provider::limits::Limits, Client};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    future::Future,
    net::SocketAddr,
    panic::AssertUnwindSafe,
    path::{Path, PathBuf},
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub mod beverage;
pub mod config;
pub mod random;

#[cfg(test)]
pub(crate) mod testing;

pub mod prelude {
    //! Common imports for serving and calling the beverage service.
    pub use crate::beverage::{
        BeverageClientError, BeverageMenu, BeveragePreferenceClient, BeveragePreferenceHandler,
        BeveragePreferenceServer, BeverageSelector, BeverageType, GetBeverageRequest,
        SelectionError, ServiceException,
    };
    pub use crate::random::{RandomSource, SeededRandom, ThreadRandom};
    pub use crate::{RpcClient, RpcConfig, RpcError, RpcServer};
}

#[cfg(not(test))]
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[cfg(test)]
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound on a buffered request before the server gives up on a stream.
pub const MAX_REQUEST_BYTES: usize = 64 * 1024;

/// True when decoding failed only because more bytes are still to come.
fn is_truncated(error: &bincode::Error) -> bool {
    matches!(
        &**error,
        bincode::ErrorKind::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof
    )
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] bincode::Error),

    #[error("Request timeout")]
    Timeout,

    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    InternalError(String),

    /// The server answered with an error envelope.
    #[error("Remote error: {0}")]
    RemoteError(String),

    /// The server answered with neither a result nor an error.
    #[error("{0} failed: unknown result")]
    MissingResult(String),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcRequest {
    id: u64,
    method: String,
    params: Vec<u8>,
}

impl RpcRequest {
    pub fn new(id: u64, method: String, params: Vec<u8>) -> Self {
        Self { id, method, params }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn params(&self) -> &[u8] {
        &self.params
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcResponse {
    id: u64,
    result: Option<Vec<u8>>,
    error: Option<String>,
}

impl RpcResponse {
    pub fn new(id: u64, result: Option<Vec<u8>>, error: Option<String>) -> Self {
        Self { id, result, error }
    }

    pub fn from_result(id: u64, result: Result<Vec<u8>, RpcError>) -> Self {
        match result {
            Ok(data) => Self::new(id, Some(data), None),
            Err(e) => Self::new(id, None, Some(e.to_string())),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn result(&self) -> Option<&Vec<u8>> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&String> {
        self.error.as_ref()
    }

    /// Converts the envelope into the payload the caller of `method` sees.
    pub fn into_result(self, method: &str) -> Result<Vec<u8>, RpcError> {
        match (self.result, self.error) {
            (Some(data), None) => Ok(data),
            (None, Some(message)) => Err(RpcError::RemoteError(message)),
            _ => Err(RpcError::MissingResult(method.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub cert_path: PathBuf,

    pub key_path: Option<PathBuf>,

    pub server_name: String,

    pub bind_address: String,

    pub keep_alive_interval: Option<Duration>,

    pub request_timeout: Duration,
}

impl RpcConfig {
    pub fn new<P: Into<PathBuf>>(cert_path: P, bind_address: impl Into<String>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: None,
            server_name: "localhost".to_string(),
            bind_address: bind_address.into(),
            keep_alive_interval: Some(Duration::from_secs(30)),
            request_timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_key_path<P: Into<PathBuf>>(mut self, key_path: P) -> Self {
        self.key_path = Some(key_path.into());
        self
    }

    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = server_name.into();
        self
    }

    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = Some(interval);
        self
    }

    pub fn without_keep_alive(mut self) -> Self {
        self.keep_alive_interval = None;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

type AsyncHandlerFn = Box<
    dyn Fn(Vec<u8>) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, RpcError>> + Send>>
        + Send
        + Sync,
>;

type HandlerMap = Arc<RwLock<HashMap<String, AsyncHandlerFn>>>;

#[async_trait]
pub(crate) trait QuicStreamAdapter: Send {
    async fn send_bytes(&mut self, data: Bytes) -> Result<(), RpcError>;
    async fn receive_bytes(&mut self) -> Result<Option<Bytes>, RpcError>;
}

#[async_trait]
impl QuicStreamAdapter for s2n_quic::stream::BidirectionalStream {
    async fn send_bytes(&mut self, data: Bytes) -> Result<(), RpcError> {
        self.send(data)
            .await
            .map_err(|err| RpcError::StreamError(err.to_string()))
    }

    async fn receive_bytes(&mut self) -> Result<Option<Bytes>, RpcError> {
        self.receive()
            .await
            .map_err(|err| RpcError::StreamError(err.to_string()))
    }
}

#[async_trait]
pub(crate) trait QuicConnectionAdapter: Send + Sync {
    async fn open_bidirectional_stream(
        &mut self,
    ) -> Result<Box<dyn QuicStreamAdapter + Send>, RpcError>;
}

pub(crate) struct RealConnectionAdapter {
    inner: s2n_quic::Connection,
}

impl RealConnectionAdapter {
    fn new(inner: s2n_quic::Connection) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl QuicConnectionAdapter for RealConnectionAdapter {
    async fn open_bidirectional_stream(
        &mut self,
    ) -> Result<Box<dyn QuicStreamAdapter + Send>, RpcError> {
        let stream = self
            .inner
            .open_bidirectional_stream()
            .await
            .map_err(|e| RpcError::StreamError(e.to_string()))?;
        Ok(Box::new(stream))
    }
}

#[async_trait]
pub(crate) trait QuicServerConnectionAdapter: Send {
    async fn accept_bidirectional_stream(
        &mut self,
    ) -> Result<Option<Box<dyn QuicStreamAdapter + Send>>, RpcError>;
}

pub(crate) struct RealServerConnectionAdapter {
    inner: s2n_quic::connection::Connection,
}

impl RealServerConnectionAdapter {
    fn new(inner: s2n_quic::connection::Connection) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl QuicServerConnectionAdapter for RealServerConnectionAdapter {
    async fn accept_bidirectional_stream(
        &mut self,
    ) -> Result<Option<Box<dyn QuicStreamAdapter + Send>>, RpcError> {
        match self.inner.accept_bidirectional_stream().await {
            Ok(Some(stream)) => Ok(Some(Box::new(stream))),
            Ok(None) => Ok(None),
            Err(e) => Err(RpcError::StreamError(e.to_string())),
        }
    }
}

#[async_trait]
pub(crate) trait QuicServerAdapter: Send {
    async fn accept(&mut self) -> Option<Box<dyn QuicServerConnectionAdapter>>;
}

pub(crate) struct RealServerAdapter {
    inner: s2n_quic::Server,
}

impl RealServerAdapter {
    fn new(inner: s2n_quic::Server) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl QuicServerAdapter for RealServerAdapter {
    async fn accept(&mut self) -> Option<Box<dyn QuicServerConnectionAdapter>> {
        self.inner
            .accept()
            .await
            .map(|connection| Box::new(RealServerConnectionAdapter::new(connection)) as _)
    }
}

/// Limits shared by both ends. Calls are small and unary, so the windows stay
/// modest while the stream count allows many concurrent callers.
fn transport_limits() -> Result<Limits, RpcError> {
    let limit_error = |what: &str, e: &dyn std::fmt::Debug| {
        RpcError::ConfigError(format!("Failed to set {what}: {e:?}"))
    };

    Limits::new()
        .with_max_open_local_bidirectional_streams(1_000)
        .map_err(|e| limit_error("local stream limit", &e))?
        .with_max_open_remote_bidirectional_streams(1_000)
        .map_err(|e| limit_error("remote stream limit", &e))?
        .with_data_window(1024 * 1024)
        .map_err(|e| limit_error("data window", &e))?
        .with_bidirectional_local_data_window(256 * 1024)
        .map_err(|e| limit_error("bidirectional window", &e))?
        .with_initial_round_trip_time(Duration::from_millis(1))
        .map_err(|e| limit_error("initial RTT", &e))?
        .with_max_ack_delay(Duration::from_millis(5))
        .map_err(|e| limit_error("ACK delay", &e))
}

#[derive(Clone)]
pub struct RpcServer {
    pub handlers: HandlerMap,

    pub socket_addr: Option<SocketAddr>,

    pub config: RpcConfig,
}

impl RpcServer {
    pub fn new(config: RpcConfig) -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
            socket_addr: None,
            config,
        }
    }

    pub async fn register<F, Fut>(&self, method: &str, handler: F)
    where
        F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<u8>, RpcError>> + Send + 'static,
    {
        let mut handlers = self.handlers.write().await;
        if handlers.contains_key(method) {
            debug!(method, "replacing registered handler");
        }
        handlers.insert(
            method.to_string(),
            Box::new(move |params: Vec<u8>| {
                Box::pin(handler(params)) as Pin<Box<dyn Future<Output = _> + Send>>
            }),
        );
    }

    pub async fn register_typed<Req, Resp, F, Fut>(&self, method: &str, handler: F)
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, RpcError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.register(method, move |params: Vec<u8>| {
            let handler = handler.clone();
            async move {
                let request: Req = bincode::deserialize(&params)?;
                let response = handler(request).await?;
                Ok(bincode::serialize(&response)?)
            }
        })
        .await;
    }

    /// Names of every registered method, sorted.
    pub async fn methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.handlers.read().await.keys().cloned().collect();
        methods.sort();
        methods
    }

    pub async fn start(&mut self, server: s2n_quic::Server) -> Result<(), RpcError> {
        let mut adapter = RealServerAdapter::new(server);
        self.start_with_adapter(&mut adapter).await
    }

    pub(crate) async fn start_with_adapter<A>(&mut self, server: &mut A) -> Result<(), RpcError>
    where
        A: QuicServerAdapter,
    {
        while let Some(mut connection) = server.accept().await {
            let handlers = self.handlers.clone();
            debug!("accepted connection");

            tokio::spawn(async move {
                while let Ok(Some(stream)) = connection.accept_bidirectional_stream().await {
                    tokio::spawn(Self::handle_stream(handlers.clone(), stream));
                }
                debug!("connection closed");
            });
        }

        Ok(())
    }

    async fn handle_stream(handlers: HandlerMap, mut stream: Box<dyn QuicStreamAdapter + Send>) {
        let mut request_data = BytesMut::with_capacity(1024);

        let request = loop {
            let chunk = match stream.receive_bytes().await {
                Ok(Some(bytes)) => bytes,
                Ok(None) => {
                    debug!(
                        buffered = request_data.len(),
                        "stream closed before a complete request arrived"
                    );
                    return;
                }
                Err(e) => {
                    debug!(error = %e, "stream receive failed");
                    return;
                }
            };

            request_data.extend_from_slice(&chunk);
            let error = match bincode::deserialize::<RpcRequest>(&request_data) {
                Ok(request) => break request,
                Err(e) if !is_truncated(&e) => {
                    warn!(error = %e, "rejecting malformed request");
                    RpcError::SerializationError(e)
                }
                Err(_) if request_data.len() > MAX_REQUEST_BYTES => {
                    warn!(
                        buffered = request_data.len(),
                        "rejecting request larger than the buffer limit"
                    );
                    RpcError::StreamError(format!(
                        "request exceeds {} bytes",
                        MAX_REQUEST_BYTES
                    ))
                }
                Err(_) => continue,
            };

            // The id leads the encoding, so a request whose tail is bad can
            // still be answered on the caller's id.
            let id = bincode::deserialize::<u64>(&request_data).unwrap_or(0);
            Self::send_response(&mut stream, RpcResponse::from_result(id, Err(error))).await;
            return;
        };

        let response = Self::dispatch(&handlers, request).await;
        Self::send_response(&mut stream, response).await;
    }

    async fn send_response(stream: &mut Box<dyn QuicStreamAdapter + Send>, response: RpcResponse) {
        match bincode::serialize(&response) {
            Ok(response_data) => {
                if let Err(e) = stream.send_bytes(Bytes::from(response_data)).await {
                    debug!(error = %e, "failed to send response");
                }
            }
            Err(e) => warn!(error = %e, "failed to encode response"),
        }
    }

    async fn dispatch(handlers: &RwLock<HashMap<String, AsyncHandlerFn>>, request: RpcRequest) -> RpcResponse {
        debug!(id = request.id(), method = request.method(), "dispatching request");
        let handlers = handlers.read().await;
        let result = match handlers.get(request.method()) {
            Some(handler) => {
                let call = handler(request.params().to_vec());
                match AssertUnwindSafe(call).catch_unwind().await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(method = request.method(), "handler panicked");
                        Err(RpcError::InternalError(format!(
                            "{} raised an unexpected fault",
                            request.method()
                        )))
                    }
                }
            }
            None => {
                debug!(method = request.method(), "no handler registered");
                Err(RpcError::UnknownMethod(request.method().to_string()))
            }
        };
        RpcResponse::from_result(request.id(), result)
    }

    pub fn bind(&mut self) -> Result<s2n_quic::Server, RpcError> {
        let cert_path = canonicalize_path(&self.config.cert_path)?;
        let key_path =
            self.config.key_path.as_ref().ok_or_else(|| {
                RpcError::ConfigError("Server key path not configured".to_string())
            })?;
        let key_path = canonicalize_path(key_path)?;

        let server = s2n_quic::Server::builder()
            .with_tls((cert_path.as_path(), key_path.as_path()))
            .map_err(|e| RpcError::TlsError(format!("{:?}", e)))?
            .with_limits(transport_limits()?)
            .map_err(|e| RpcError::ConfigError(format!("Failed to apply limits: {:?}", e)))?
            .with_io(self.config.bind_address.as_str())
            .map_err(|e| RpcError::ConfigError(format!("{:?}", e)))?
            .start()
            .map_err(|e| RpcError::ConfigError(format!("{:?}", e)))?;

        let local_addr = server.local_addr().map_err(|_err| {
            RpcError::ConfigError("Could not retrieve local_addr() from server".to_string())
        })?;

        self.socket_addr = Some(local_addr);
        info!(%local_addr, "RPC server listening");
        Ok(server)
    }
}

fn canonicalize_path(path: &Path) -> Result<PathBuf, RpcError> {
    fs::canonicalize(path).map_err(|e| {
        RpcError::ConfigError(format!("Failed to canonicalize {}: {e}", path.display()))
    })
}

pub struct RpcClient {
    connection: Arc<RwLock<Box<dyn QuicConnectionAdapter + Send + Sync>>>,
    request_timeout: Duration,
    pub next_id: Arc<AtomicU64>,
}

impl RpcClient {
    pub async fn connect(connect_addr: SocketAddr, config: RpcConfig) -> Result<Self, RpcError> {
        let client = Client::builder()
            .with_tls(config.cert_path.as_path())
            .map_err(|e| RpcError::TlsError(format!("{:?}", e)))?
            .with_limits(transport_limits()?)
            .map_err(|e| RpcError::ConfigError(format!("Failed to apply client limits: {:?}", e)))?
            .with_io(config.bind_address.as_str())
            .map_err(|e| RpcError::ConfigError(format!("{:?}", e)))?
            .start()
            .map_err(|e| RpcError::ConfigError(format!("{:?}", e)))?;

        let connect = Connect::new(connect_addr).with_server_name(config.server_name.as_str());
        let mut connection = client
            .connect(connect)
            .await
            .map_err(|e| RpcError::ConnectionError(e.to_string()))?;

        if config.keep_alive_interval.is_some() {
            connection
                .keep_alive(true)
                .map_err(|e| RpcError::ConfigError(e.to_string()))?;
        }
        debug!(%connect_addr, "connected");

        Ok(Self {
            connection: Arc::new(RwLock::new(Box::new(RealConnectionAdapter::new(
                connection,
            )))),
            request_timeout: config.request_timeout,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_connection(
        connection: Box<dyn QuicConnectionAdapter + Send + Sync>,
        config: &RpcConfig,
    ) -> Self {
        Self {
            connection: Arc::new(RwLock::new(connection)),
            request_timeout: config.request_timeout,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub async fn call(&self, method: &str, params: Vec<u8>) -> Result<Vec<u8>, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req_data = bincode::serialize(&RpcRequest::new(id, method.to_string(), params))?;

        // Hold the connection lock only while the stream is opened.
        let mut stream = {
            let mut conn = self.connection.write().await;
            conn.open_bidirectional_stream().await?
        };

        stream.send_bytes(Bytes::from(req_data)).await?;

        let read_future = async {
            let mut response_data = BytesMut::with_capacity(1024);
            loop {
                let chunk = match stream.receive_bytes().await {
                    Ok(Some(chunk)) => chunk,
                    Ok(None) => break,
                    Err(e) => return Err(e),
                };
                response_data.extend_from_slice(&chunk);

                if let Ok(response) = bincode::deserialize::<RpcResponse>(&response_data[..]) {
                    if response.id() == id {
                        return response.into_result(method);
                    }
                    debug!(expected = id, received = response.id(), "discarding stray response");
                    response_data.clear();
                }
            }
            Err(RpcError::ConnectionError(
                "Stream closed unexpectedly".into(),
            ))
        };

        match tokio::time::timeout(self.request_timeout, read_future).await {
            Ok(res) => res,
            Err(_) => Err(RpcError::Timeout),
        }
    }

    pub async fn call_typed<Req, Resp>(&self, method: &str, request: &Req) -> Result<Resp, RpcError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let params = bincode::serialize(request)?;
        let response_data = self.call(method, params).await?;
        Ok(bincode::deserialize(&response_data)?)
    }
}



#[cfg(test)]
mod server_dispatch_tests {
    use super::*;

    fn test_config() -> RpcConfig {
        RpcConfig::new("certs/cert.pem", "127.0.0.1:0").with_key_path("certs/key.pem")
    }

    #[test]
    fn config_builder_sets_every_field() {
        let config = RpcConfig::new("certs/cert.pem", "127.0.0.1:8080")
            .with_key_path("certs/key.pem")
            .with_server_name("bar.local")
            .with_keep_alive_interval(Duration::from_secs(60))
            .with_request_timeout(Duration::from_secs(5));

        assert_eq!(config.cert_path, PathBuf::from("certs/cert.pem"));
        assert_eq!(config.key_path, Some(PathBuf::from("certs/key.pem")));
        assert_eq!(config.server_name, "bar.local");
        assert_eq!(config.bind_address, "127.0.0.1:8080");
        assert_eq!(config.keep_alive_interval, Some(Duration::from_secs(60)));
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.without_keep_alive().keep_alive_interval, None);
    }

    #[tokio::test]
    async fn dispatch_invokes_registered_handler() {
        let server = RpcServer::new(test_config());
        server.register("echo", |params| async move { Ok(params) }).await;

        let request = RpcRequest::new(42, "echo".into(), b"hello".to_vec());
        let response = RpcServer::dispatch(&server.handlers, request).await;

        assert_eq!(response.id(), 42);
        assert_eq!(response.result().unwrap(), b"hello");
    }

    #[tokio::test]
    async fn dispatch_reports_unknown_method() {
        let server = RpcServer::new(test_config());
        let request = RpcRequest::new(1, "Missing.method".into(), Vec::new());
        let response = RpcServer::dispatch(&server.handlers, request).await;

        assert!(response.result().is_none());
        assert_eq!(response.error().unwrap(), "Unknown method: Missing.method");
    }

    #[tokio::test]
    async fn dispatch_turns_handler_panic_into_internal_error() {
        let server = RpcServer::new(test_config());
        server
            .register("explode", |_params| async move {
                if true {
                    panic!("handler bug");
                }
                Ok(Vec::new())
            })
            .await;

        let request = RpcRequest::new(3, "explode".into(), Vec::new());
        let response = RpcServer::dispatch(&server.handlers, request).await;
        let error = response.error().unwrap();
        assert!(error.starts_with("Internal error:"), "got {error}");
    }

    #[tokio::test]
    async fn typed_registration_decodes_and_encodes() {
        let server = RpcServer::new(test_config());
        server
            .register_typed("double", |value: i32| async move { Ok(value * 2) })
            .await;

        let params = bincode::serialize(&21i32).unwrap();
        let request = RpcRequest::new(5, "double".into(), params);
        let response = RpcServer::dispatch(&server.handlers, request).await;
        let value: i32 = bincode::deserialize(response.result().unwrap()).unwrap();
        assert_eq!(value, 42);

        let request = RpcRequest::new(6, "double".into(), vec![1]);
        let response = RpcServer::dispatch(&server.handlers, request).await;
        assert!(response.error().unwrap().starts_with("Serialization error"));
    }

    #[tokio::test]
    async fn registering_twice_replaces_the_handler() {
        let server = RpcServer::new(test_config());
        server.register("m", |_| async move { Ok(b"first".to_vec()) }).await;
        server.register("m", |_| async move { Ok(b"second".to_vec()) }).await;
        server.register("a", |_| async move { Ok(Vec::new()) }).await;

        assert_eq!(server.methods().await, vec!["a".to_string(), "m".to_string()]);
        let response =
            RpcServer::dispatch(&server.handlers, RpcRequest::new(1, "m".into(), Vec::new())).await;
        assert_eq!(response.result().unwrap(), b"second");
    }

    async fn exchange_raw(server: &RpcServer, chunks: Vec<Vec<u8>>) -> (RpcResponse, bool) {
        let (mut client_end, server_end) = crate::testing::stream_pair();
        let task = tokio::spawn(RpcServer::handle_stream(server.handlers.clone(), server_end));
        for chunk in chunks {
            client_end.send_bytes(Bytes::from(chunk)).await.unwrap();
        }

        let reply = tokio::time::timeout(Duration::from_millis(500), client_end.receive_bytes())
            .await
            .expect("server should answer promptly")
            .unwrap()
            .expect("server should send a response");
        let finished = tokio::time::timeout(Duration::from_millis(500), task).await.is_ok();
        (bincode::deserialize(&reply).unwrap(), finished)
    }

    #[tokio::test]
    async fn malformed_request_is_answered_with_serialization_error() {
        let server = RpcServer::new(test_config());
        server.register("echo", |params| async move { Ok(params) }).await;

        // id = 1, method = three bytes of invalid UTF-8, params = empty.
        let mut bytes = bincode::serialize(&1u64).unwrap();
        bytes.extend_from_slice(&bincode::serialize(&3u64).unwrap());
        bytes.extend_from_slice(&[0xff, 0xfe, 0xfd]);
        bytes.extend_from_slice(&bincode::serialize(&0u64).unwrap());

        let (response, finished) = exchange_raw(&server, vec![bytes]).await;
        assert_eq!(response.id(), 1);
        assert!(response.result().is_none());
        assert!(response.error().unwrap().starts_with("Serialization error"));
        assert!(finished);
    }

    #[tokio::test]
    async fn request_split_across_chunks_is_reassembled() {
        let server = RpcServer::new(test_config());
        server.register("echo", |params| async move { Ok(params) }).await;

        let bytes = bincode::serialize(&RpcRequest::new(4, "echo".into(), b"abc".to_vec())).unwrap();
        let (head, tail) = bytes.split_at(10);
        let (response, finished) =
            exchange_raw(&server, vec![head.to_vec(), tail.to_vec()]).await;
        assert_eq!(response.id(), 4);
        assert_eq!(response.result().unwrap(), b"abc");
        assert!(finished);
    }

    #[tokio::test]
    async fn oversized_request_is_rejected_at_the_limit() {
        let server = RpcServer::new(test_config());
        server.register("echo", |params| async move { Ok(params) }).await;

        let request = RpcRequest::new(9, "echo".into(), vec![0; MAX_REQUEST_BYTES * 2]);
        let bytes = bincode::serialize(&request).unwrap();
        let chunks = bytes[..MAX_REQUEST_BYTES + 4096]
            .chunks(16 * 1024)
            .map(<[u8]>::to_vec)
            .collect();

        let (response, finished) = exchange_raw(&server, chunks).await;
        assert_eq!(response.id(), 9);
        let error = response.error().unwrap();
        assert!(error.contains(&MAX_REQUEST_BYTES.to_string()), "got {error}");
        assert!(finished);
    }

    #[test]
    fn bind_requires_a_key_path() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("cert.pem");
        fs::write(&cert, "not a real cert").unwrap();

        let mut server = RpcServer::new(RpcConfig::new(cert.clone(), "127.0.0.1:0"));
        match server.bind() {
            Err(RpcError::ConfigError(msg)) => assert!(msg.contains("key path")),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn bind_reports_missing_certificate() {
        let mut server = RpcServer::new(test_config());
        let err = server.bind().map(|_| ()).unwrap_err();
        assert!(matches!(err, RpcError::ConfigError(msg) if msg.contains("canonicalize")));
    }
}
