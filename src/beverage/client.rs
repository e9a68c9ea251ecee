use super::types::{BeverageType, GetBeverageRequest, ServiceException, GET_BEVERAGE};
use crate::{RpcClient, RpcConfig, RpcError};
use std::net::SocketAddr;
use thiserror::Error;

/// What a `GetBeverage` call can fail with, as seen by the caller.
#[derive(Debug, Error)]
pub enum BeverageClientError {
    /// The service ran and declined the request.
    #[error("service exception: {0}")]
    Service(#[from] ServiceException),

    /// The call never produced a service answer.
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

/// Typed client for the beverage preference service.
pub struct BeveragePreferenceClient {
    inner: RpcClient,
}

impl BeveragePreferenceClient {
    /// Connects to the service at the given address.
    pub async fn connect(addr: SocketAddr, config: RpcConfig) -> Result<Self, RpcError> {
        let inner = RpcClient::connect(addr, config).await?;
        Ok(Self { inner })
    }

    pub fn from_rpc_client(inner: RpcClient) -> Self {
        Self { inner }
    }

    pub async fn get_beverage(&self, btype: BeverageType) -> Result<String, BeverageClientError> {
        self.get_beverage_code(btype.code()).await
    }

    /// Sends a raw wire code, including ones the server will reject.
    pub async fn get_beverage_code(&self, btype: i32) -> Result<String, BeverageClientError> {
        let outcome: Result<String, ServiceException> = self
            .inner
            .call_typed(GET_BEVERAGE, &GetBeverageRequest::from_code(btype))
            .await?;
        Ok(outcome?)
    }
}
