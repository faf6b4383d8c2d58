//! RPC-граница между subscriber'ом и sink'ом: `PostData` поверх HTTP.
//!
//! Тело запроса — запись в бинарном codec'е (`application/octet-stream`),
//! ответ — JSON `Acknowledgement`.

mod client;
mod error;
mod server;

pub use client::{RpcClient, RpcClientConfig};
pub use error::RpcError;
pub use server::{bind, router, serve, POST_DATA_PATH};
