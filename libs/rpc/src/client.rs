use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use relay_api::{codec, Acknowledgement, Record, RecordService, RelayError};

use crate::server::POST_DATA_PATH;
use crate::RpcError;

fn default_address() -> String {
    "127.0.0.1:50051".into()
}

fn default_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct RpcClientConfig {
    /// `host:port` или полный URL `http://host:port`.
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self { address: default_address(), timeout_ms: default_timeout_ms() }
    }
}

/// HTTP-клиент `PostData`. Одна запись на запрос, без повторов.
pub struct RpcClient {
    http: reqwest::Client,
    url: String,
}

impl RpcClient {
    pub fn new(config: &RpcClientConfig) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| RpcError::Client(format!("HTTP client: {e}")))?;
        let base = if config.address.contains("://") {
            config.address.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", config.address)
        };
        Ok(Self { http, url: format!("{base}{POST_DATA_PATH}") })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call(&self, record: Record) -> Result<Acknowledgement, RelayError> {
        let body = codec::encode(&record)?;
        let resp = self
            .http
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await
            .map_err(|e| RelayError::io(format!("PostData request: {e}")))?;

        let status = resp.status();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| RelayError::io(format!("PostData read: {e}")))?;

        if status.is_success() {
            return serde_json::from_slice(&bytes)
                .map_err(|e| RelayError::format_err(format!("PostData response: {e}")));
        }

        let message = error_message(&bytes).unwrap_or_else(|| String::from_utf8_lossy(&bytes).into_owned());
        let message = format!("PostData {status}: {message}");
        if status.is_client_error() {
            Err(RelayError::format_err(message))
        } else {
            Err(RelayError::io(message))
        }
    }
}

fn error_message(body: &[u8]) -> Option<String> {
    #[derive(serde::Deserialize)]
    struct ErrorBody {
        error: String,
    }
    serde_json::from_slice::<ErrorBody>(body).ok().map(|b| b.error)
}

impl RecordService for RpcClient {
    fn post_data(&self, record: Record) -> Pin<Box<dyn Future<Output = Result<Acknowledgement, RelayError>> + Send + '_>> {
        Box::pin(self.call(record))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use relay_api::{ErrorKind, Field};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{bind, serve};

    /// Сервис, подтверждающий запись или отвечающий заданной ошибкой.
    #[derive(Default)]
    struct ScriptedService {
        received: Mutex<Vec<Record>>,
        fail_with: Option<RelayError>,
    }

    impl RecordService for ScriptedService {
        fn post_data(
            &self,
            record: Record,
        ) -> Pin<Box<dyn Future<Output = Result<Acknowledgement, RelayError>> + Send + '_>> {
            Box::pin(async move {
                if let Some(e) = &self.fail_with {
                    return Err(e.clone());
                }
                let ack = Acknowledgement::processed(&record);
                self.received.lock().unwrap().push(record);
                Ok(ack)
            })
        }
    }

    async fn start(service: Arc<ScriptedService>) -> (String, CancellationToken, tokio::task::JoinHandle<Result<(), RpcError>>) {
        let listener = bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let token = CancellationToken::new();
        let handle = tokio::spawn(serve(listener, service, token.clone()));
        (addr, token, handle)
    }

    fn client(addr: &str) -> RpcClient {
        RpcClient::new(&RpcClientConfig { address: addr.into(), timeout_ms: 2_000 }).unwrap()
    }

    fn record() -> Record {
        let mut r = Record::new("postgres", vec![Field::new("seq", "1"), Field::new("first", "Ada")]);
        r.stamp("publish", "pub-host");
        r
    }

    #[tokio::test]
    async fn post_data_round_trips_record_and_ack() {
        let service = Arc::new(ScriptedService::default());
        let (addr, token, handle) = start(service.clone()).await;

        let sent = record();
        let ack = client(&addr).post_data(sent.clone()).await.unwrap();

        assert_eq!(ack.id, sent.id);
        assert_eq!(ack.note, "Processed");
        assert_eq!(service.received.lock().unwrap().as_slice(), &[sent]);

        token.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn data_error_maps_to_422_and_format() {
        let service = Arc::new(ScriptedService {
            fail_with: Some(RelayError::format_err("unknown destination 'x'")),
            ..Default::default()
        });
        let (addr, token, _handle) = start(service).await;

        let err = client(&addr).post_data(record()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(err.message().contains("422"));
        assert!(err.message().contains("unknown destination 'x'"));
        token.cancel();
    }

    #[tokio::test]
    async fn backend_error_maps_to_500_and_io() {
        let service = Arc::new(ScriptedService {
            fail_with: Some(RelayError::io("pool exhausted")),
            ..Default::default()
        });
        let (addr, token, _handle) = start(service).await;

        let err = client(&addr).post_data(record()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.message().contains("500"));
        token.cancel();
    }

    #[tokio::test]
    async fn undecodable_body_is_400_and_health_is_ok() {
        let service = Arc::new(ScriptedService::default());
        let (addr, token, _handle) = start(service.clone()).await;
        let http = reqwest::Client::new();

        let resp = http
            .post(format!("http://{addr}{POST_DATA_PATH}"))
            .body(b"garbage".to_vec())
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
        assert!(error_message(&resp.bytes().await.unwrap()).is_some());
        assert!(service.received.lock().unwrap().is_empty());

        let health = http.get(format!("http://{addr}/health")).send().await.unwrap();
        assert_eq!(health.text().await.unwrap(), "ok");
        token.cancel();
    }

    #[tokio::test]
    async fn connection_refused_is_io() {
        let listener = bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = client(&addr).post_data(record()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn address_is_normalized_to_url() {
        assert_eq!(client("10.0.0.1:50051").url(), "http://10.0.0.1:50051/rpc/PostData");
        assert_eq!(client("https://sink.local/").url(), "https://sink.local/rpc/PostData");
    }

    #[test]
    fn config_defaults_from_toml() {
        let cfg: RpcClientConfig = toml::from_str(r#"address = "sink:9000""#).unwrap();
        assert_eq!(cfg.timeout_ms, 5_000);
    }
}
