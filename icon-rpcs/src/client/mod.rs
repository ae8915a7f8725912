mod http_client;
pub mod mock;
mod rpc_client_t;

pub use http_client::JsonRpcHttpClient;
pub use rpc_client_t::{RawRpcFuture, RpcClientT, RpcOutcome};
