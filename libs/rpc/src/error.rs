use relay_api::RelayError;

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("rpc server: {0}")]
    Serve(#[source] std::io::Error),

    #[error("rpc client: {0}")]
    Client(String),
}

impl RpcError {
    pub fn into_relay_error(self) -> RelayError {
        match self {
            RpcError::Client(msg) => RelayError::config(msg),
            other => RelayError::io(other.to_string()),
        }
    }
}

impl From<RpcError> for RelayError {
    fn from(e: RpcError) -> Self {
        e.into_relay_error()
    }
}
