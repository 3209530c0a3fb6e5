mod client;
mod envelope;
pub mod requests;

pub use client::{RpcClient, RpcClientConfig};
pub use envelope::{
    is_retriable_code, match_batch, JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcCallResult,
    RpcError, RpcId,
};
