use super::types::{GetBeverageRequest, ServiceException, GET_BEVERAGE};
use crate::{RpcConfig, RpcError, RpcServer};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Handler trait that implementations of the service provide.
#[async_trait]
pub trait BeveragePreferenceHandler: Send + Sync + 'static {
    async fn get_beverage(&self, request: GetBeverageRequest) -> Result<String, ServiceException>;
}

#[async_trait]
impl<H: BeveragePreferenceHandler + ?Sized> BeveragePreferenceHandler for Arc<H> {
    async fn get_beverage(&self, request: GetBeverageRequest) -> Result<String, ServiceException> {
        (**self).get_beverage(request).await
    }
}

/// Server that registers the handler's operations and routes calls to them.
pub struct BeveragePreferenceServer<H: BeveragePreferenceHandler> {
    handler: Arc<H>,
    rpc_server: RpcServer,
}

impl<H: BeveragePreferenceHandler> BeveragePreferenceServer<H> {
    pub fn new(handler: H, config: RpcConfig) -> Self {
        Self {
            handler: Arc::new(handler),
            rpc_server: RpcServer::new(config),
        }
    }

    /// Registers every operation with the RPC server.
    ///
    /// A `ServiceException` is encoded inside a successful envelope so that
    /// clients receive it typed rather than as a transport error string.
    pub async fn register_all(&self) {
        let handler = self.handler.clone();
        self.rpc_server
            .register_typed(GET_BEVERAGE, move |request: GetBeverageRequest| {
                let handler = handler.clone();
                async move { Ok::<_, RpcError>(handler.get_beverage(request).await) }
            })
            .await;
    }

    /// Registers the operations and hands back the underlying RPC server.
    pub async fn into_rpc_server(self) -> RpcServer {
        self.register_all().await;
        self.rpc_server
    }

    /// Binds the configured address and serves until the endpoint closes.
    pub async fn serve(self) -> Result<(), RpcError> {
        let mut rpc_server = self.into_rpc_server().await;
        let quic_server = rpc_server.bind()?;
        info!(addr = ?rpc_server.socket_addr, "beverage preference service ready");
        rpc_server.start(quic_server).await
    }
}
