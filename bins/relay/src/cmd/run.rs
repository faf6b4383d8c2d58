use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use queue_engine::MemoryBroker;
use relay_rpc::{RpcClient, RpcClientConfig};

use crate::config::RelayConfig;
use crate::error::AppError;

const LAG_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// publish → MemoryBroker → subscribe → RPC → sink в одном процессе.
///
/// Порядок остановки: subscriber дочитывает topic, затем
/// останавливается RPC-сервер.
pub async fn run(cfg: &RelayConfig) -> Result<(), AppError> {
    let broker = MemoryBroker::new(cfg.broker_config());
    broker.ensure_topic(&cfg.queue.topic, cfg.topic_spec())?;

    let shutdown = CancellationToken::new();
    super::cancel_on_ctrl_c(shutdown.clone());
    let stop_subscriber = shutdown.child_token();
    let stop_server = shutdown.child_token();

    // ── sink ──
    let router = super::build_router(cfg)?;
    let listener = relay_rpc::bind(&cfg.rpc.listen).await?;
    let local = listener.local_addr()?;
    let server = tokio::spawn(relay_rpc::serve(listener, Arc::new(router), stop_server.clone()));

    // ── relay ──
    let client = RpcClient::new(&RpcClientConfig {
        address: reachable(local).to_string(),
        timeout_ms: cfg.rpc.timeout_ms,
    })?;
    let consumer = broker.consumer(cfg.consumer_config());
    let mut subscriber = super::subscribe::subscriber(cfg, Box::new(consumer), Arc::new(client));
    let relay = tokio::spawn({
        let token = stop_subscriber.clone();
        async move { subscriber.run(token).await }
    });

    // ── publish ──
    let producer = Arc::new(broker.producer(cfg.producer_config()));
    let published = super::publish::execute(cfg, producer).await;

    if published.is_ok() {
        while !shutdown.is_cancelled() && !relay.is_finished() {
            if broker.lag(&cfg.queue.group, &cfg.queue.topic) == Some(0) {
                break;
            }
            tokio::time::sleep(LAG_CHECK_INTERVAL).await;
        }
    }

    stop_subscriber.cancel();
    let relayed = relay.await?;
    stop_server.cancel();
    server.await??;

    published?;
    let summary = relayed?;
    tracing::info!(relayed = summary.relayed, rpc_failed = summary.rpc_failed, "run finished");
    super::subscribe::exit_status(summary)
}

/// Адрес для клиента: `0.0.0.0` слушает все интерфейсы, но
/// подключаться к нему нужно через loopback.
fn reachable(addr: SocketAddr) -> SocketAddr {
    if addr.ip().is_unspecified() {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
    } else {
        addr
    }
}

#[cfg(test)]
mod tests {
    use storage_file::{DiskBody, FileWriter, FileWriterConfig};

    use super::*;

    const INPUT: &str = "\
seq,alpha,first,last,birthday,gender,email,street,state,city,zip,ccnumber,date,latitude,longitude,dollar
1,qwe,Ada,Lovelace,10/12/1815,F,ada@example.com,1 Main St,CA,Fresno,93650,4111111111111111,01/01/2020,36.7378,-119.7871,$12.50
2,rty,Alan,Turing,06/23/1912,M,alan@example.com,2 Bletchley Rd,NY,Albany,12207,5500000000000004,02/02/2020,42.6526,-73.7562,$7.25
";

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn run_stores_every_row_through_rpc() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("persons.csv");
        std::fs::write(&input, INPUT).unwrap();
        let data_dir = dir.path().join("sink");

        let cfg = RelayConfig::parse(&format!(
            r#"
            [general]
            hostname = "box"
            verbosity = 0

            [source]
            file = "{}"
            destination = "1"

            [queue]
            partitions = 2

            [rpc]
            listen = "127.0.0.1:0"

            [backends.postgres]
            kind = "file"
            data_dir = "{}"
            partition_by = "single"
            "#,
            input.display(),
            data_dir.display()
        ))
        .unwrap();

        run(&cfg).await.unwrap();

        let reader = FileWriter::new("check", &FileWriterConfig {
            data_dir: data_dir.to_string_lossy().into_owned(),
            partition_by: storage_file::PartitionBy::Single,
            file_name: "records".into(),
        });
        let lines = reader.read_all().await.unwrap();
        assert_eq!(lines.len(), 2);
        for line in &lines {
            let DiskBody::Row { statement, params } = &line.body else {
                panic!("expected relational row");
            };
            assert!(statement.starts_with("INSERT INTO person"));
            let path = params.last().unwrap();
            assert!(path.starts_with("publish:[box,"), "{path}");
            assert!(path.contains("relay:[box,"), "{path}");
            assert!(path.contains("sink:[box,"), "{path}");
        }
    }

    #[tokio::test]
    async fn missing_source_file_is_reported_after_clean_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = RelayConfig::parse(&format!(
            r#"
            [source]
            file = "{}"
            destination = "postgres"

            [rpc]
            listen = "127.0.0.1:0"
            "#,
            dir.path().join("absent.csv").display()
        ))
        .unwrap();

        let err = run(&cfg).await.unwrap_err();
        assert!(matches!(err, AppError::Pipeline(_)), "{err}");
    }

    #[test]
    fn unspecified_listen_address_maps_to_loopback() {
        let addr: SocketAddr = "0.0.0.0:50051".parse().unwrap();
        assert_eq!(reachable(addr).to_string(), "127.0.0.1:50051");
        let addr: SocketAddr = "10.1.2.3:9000".parse().unwrap();
        assert_eq!(reachable(addr), addr);
    }
}
