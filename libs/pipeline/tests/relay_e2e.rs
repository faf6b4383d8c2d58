use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use pipeline::{
    read_lines, Diagnostics, LineSchema, PublisherConfig, Publisher, SchemaConfig, SinkConfig,
    SinkRouter, StopReason, Subscriber, SubscriberConfig,
};
use queue_engine::{ConsumerConfig, MemoryBroker, ProducerConfig, TopicSpec};
use relay_api::{Destination, NativeWrite, QueueProducer, RecordService};
use storage_memory::{MemoryWriter, MemoryWriterConfig};

const HEADER: &str = "seq,alpha,first,last,birthday,gender,email,street,state,city,zip,ccnumber,date,latitude,longitude,dollar";
const ROW_1: &str = "1,qwe,Ada,Lovelace,10/12/1815,F,ada@example.com,1 Main St,CA,Fresno,93650,4111111111111111,01/01/2020,36.7378,-119.7871,$12.50";
const ROW_2: &str = "2,rty,Alan,Turing,06/23/1912,M,alan@example.com,2 Bletchley Rd,NY,Albany,12207,5500000000000004,02/02/2020,42.6526,-73.7562,$7.25";

async fn wait_for_writes(writer: &MemoryWriter, expected: usize) {
    for _ in 0..200 {
        if writer.len().await >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {expected} writes, got {}", writer.len().await);
}

#[tokio::test]
async fn file_to_relational_writer_through_queue_and_sink() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "{HEADER}\n{ROW_1}\n{ROW_2}").unwrap();

    let broker = MemoryBroker::default();
    broker.create_topic("persons", TopicSpec { partitions: 3, retention: None }).unwrap();

    // ── publish ──
    let producer: Arc<dyn QueueProducer> = Arc::new(broker.producer(ProducerConfig::default()));
    let schema = LineSchema::new(&SchemaConfig::default()).unwrap();
    let publisher = Publisher::new(
        producer,
        schema,
        PublisherConfig::new("persons", "postgres"),
        "publish-host".into(),
        Diagnostics::silent(),
    );
    let summary = publisher.run(read_lines(file.path()).unwrap()).await.unwrap();
    assert_eq!(summary.published, 2);
    assert_eq!(summary.delivered, 2);
    assert_eq!(summary.undelivered, 0);

    // ── sink ──
    let postgres = Arc::new(MemoryWriter::new("postgres", &MemoryWriterConfig::default()));
    let redis = Arc::new(MemoryWriter::new("redis", &MemoryWriterConfig::default()));
    let router = SinkRouter::new(SinkConfig::default(), "sink-host".into(), Diagnostics::silent())
        .unwrap()
        .with_writer(Destination::Postgres, postgres.clone())
        .unwrap()
        .with_writer(Destination::Redis, redis.clone())
        .unwrap();
    let service: Arc<dyn RecordService> = Arc::new(router);

    // ── subscribe ──
    let consumer = broker.consumer(ConsumerConfig::new("poster"));
    let mut subscriber = Subscriber::new(
        Box::new(consumer),
        service,
        SubscriberConfig::new("persons"),
        "relay-host".into(),
        Diagnostics::silent(),
    );
    let token = CancellationToken::new();
    let run = tokio::spawn({
        let token = token.clone();
        async move { subscriber.run(token).await }
    });

    wait_for_writes(&postgres, 2).await;
    token.cancel();
    let sub_summary = run.await.unwrap().unwrap();
    assert_eq!(sub_summary.stop, StopReason::Cancelled);
    assert_eq!(sub_summary.relayed, 2);

    let writes = postgres.snapshot().await;
    assert_eq!(writes.len(), 2);
    assert_eq!(redis.len().await, 0);

    let mut ids = Vec::new();
    for write in &writes {
        let NativeWrite::Relational { params, .. } = write else {
            panic!("expected relational write, got {write:?}");
        };
        ids.push(params[0].clone());

        let path = params.last().unwrap();
        let stages: Vec<&str> = path.split("],").map(|hop| hop.split(":[").next().unwrap()).collect();
        assert_eq!(stages, vec!["publish", "relay", "sink"], "provenance: {path}");
        assert!(path.contains("publish:[publish-host,"));
        assert!(path.contains("relay:[relay-host,"));
        assert!(path.contains("sink:[sink-host,"));
    }
    assert_ne!(ids[0], ids[1]);

    let mut firsts: Vec<&str> = writes
        .iter()
        .filter_map(|w| match w {
            NativeWrite::Relational { params, .. } => Some(params[3].as_str()),
            _ => None,
        })
        .collect();
    firsts.sort();
    assert_eq!(firsts, vec!["Ada", "Alan"]);
}

#[tokio::test]
async fn subscriber_stops_on_broker_fault() {
    let broker = MemoryBroker::default();
    broker.create_topic("persons", TopicSpec::default()).unwrap();

    let router = SinkRouter::new(SinkConfig::default(), "sink-host".into(), Diagnostics::silent()).unwrap();
    let mut subscriber = Subscriber::new(
        Box::new(broker.consumer(ConsumerConfig::new("poster"))),
        Arc::new(router),
        SubscriberConfig::new("persons"),
        "relay-host".into(),
        Diagnostics::silent(),
    );

    let faulty = broker.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        faulty.fail(relay_api::RelayError::io("all brokers down"));
    });

    let summary = subscriber.run(CancellationToken::new()).await.unwrap();
    assert!(matches!(summary.stop, StopReason::TransportError(ref e) if e.message() == "all brokers down"));
}
