//! Full provider/consumer sessions over loopback TCP

use std::time::Duration;

use emberplus_consumer::{ConsumerConfig, ConsumerError, ConsumerEvent, EmberConsumer};
use emberplus_e2e::spawn_provider;
use emberplus_types::{Disposition, Element, EmberError, EmberPath, Value};
use tokio::net::TcpListener;
use tokio::time::timeout;

async fn connected_consumer() -> (EmberConsumer, tokio::sync::mpsc::Receiver<ConsumerEvent>) {
    let address = spawn_provider().await;
    let config = ConsumerConfig::for_endpoint(address.ip().to_string(), address.port());
    EmberConsumer::connect(config).await.unwrap()
}

fn path(s: &str) -> EmberPath {
    s.parse().unwrap()
}

#[tokio::test]
async fn test_top_level_directory() {
    let (consumer, _events) = connected_consumer().await;
    let children = consumer.get_directory(&EmberPath::root()).await.unwrap();
    let identifiers: Vec<_> = children.iter().filter_map(Element::identifier).collect();
    assert_eq!(identifiers, vec!["identity", "router", "add"]);
}

#[tokio::test]
async fn test_path_resolution_both_grammars() {
    let (consumer, _events) = connected_consumer().await;

    // Numeric grammar walks down with directory fetches as needed
    let by_numbers = consumer.get_element_by_path("0.0").await.unwrap();
    assert_eq!(by_numbers.identifier(), Some("product"));

    // Identifier grammar resolves against fetched directories
    let by_identifiers = consumer.get_element_by_path("identity/product").await.unwrap();
    assert_eq!(by_identifiers.identifier(), Some("product"));

    // A path the provider does not serve fails discovery
    let err = consumer.get_element_by_path("9.9").await.unwrap_err();
    assert!(matches!(
        err,
        ConsumerError::Protocol(EmberError::PathDiscoveryFailure { .. })
    ));
}

#[tokio::test]
async fn test_value_write_round_trip() {
    let (consumer, _events) = connected_consumer().await;
    let updated = consumer
        .set_value(&path("0.0"), Value::String("core".into()))
        .await
        .unwrap();
    match updated {
        Element::Parameter(p) => {
            assert_eq!(
                p.contents.as_ref().unwrap().value,
                Some(Value::String("core".into()))
            );
        }
        other => panic!("expected parameter, got {}", other.kind()),
    }

    // Identifier-grammar write resolves first, then round-trips the same way
    let updated = consumer
        .set_value_by_path("identity/product", Value::String("edge".into()))
        .await
        .unwrap();
    match updated {
        Element::Parameter(p) => {
            assert_eq!(
                p.contents.as_ref().unwrap().value,
                Some(Value::String("edge".into()))
            );
        }
        other => panic!("expected parameter, got {}", other.kind()),
    }
}

#[tokio::test]
async fn test_matrix_connect_with_tally_fan_out() {
    let address = spawn_provider().await;
    let config = ConsumerConfig::for_endpoint(address.ip().to_string(), address.port());
    let (operator, _operator_events) = EmberConsumer::connect(config.clone()).await.unwrap();
    let (observer, mut observer_events) = EmberConsumer::connect(config).await.unwrap();

    // The observer's directory fetch subscribes it to the matrix
    observer.get_directory(&path("1")).await.unwrap();

    let connection = operator
        .matrix_connect(&path("1"), 0, &[1])
        .await
        .unwrap();
    assert_eq!(connection.sources(), &[1]);
    assert_eq!(connection.disposition, Some(Disposition::Modified));

    // The observer hears about it without having asked
    let event = timeout(Duration::from_secs(2), observer_events.recv())
        .await
        .expect("no tally within deadline")
        .expect("event channel closed");
    match event {
        ConsumerEvent::Update { paths } => assert!(paths.contains(&path("1"))),
        other => panic!("expected update, got {other:?}"),
    }

    // And its cache now carries the routing state
    let snapshot = observer.snapshot().await.unwrap();
    let matrix = snapshot.lookup(&path("1")).unwrap();
    match snapshot.element(matrix).unwrap() {
        Element::Matrix(m) => assert_eq!(m.sources_of(0), &[1]),
        other => panic!("expected matrix, got {}", other.kind()),
    }
}

#[tokio::test]
async fn test_matrix_one_to_n_replaces_source() {
    let (consumer, _events) = connected_consumer().await;
    consumer.matrix_connect(&path("1"), 0, &[1]).await.unwrap();
    let connection = consumer.matrix_connect(&path("1"), 0, &[2]).await.unwrap();
    // oneToN keeps a single source per target
    assert_eq!(connection.sources(), &[2]);

    let cleared = consumer
        .matrix_disconnect(&path("1"), 0, &[2])
        .await
        .unwrap();
    assert!(cleared.sources().is_empty());
}

#[tokio::test]
async fn test_matrix_out_of_range_fails_locally() {
    let (consumer, _events) = connected_consumer().await;
    // Prime the cache so validation happens before any round trip
    consumer.get_directory(&path("1")).await.unwrap();
    let err = consumer
        .matrix_connect(&path("1"), 7, &[0])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ConsumerError::Protocol(EmberError::InvalidMatrixSignal { signal: 7, .. })
    ));
}

#[tokio::test]
async fn test_function_invocation() {
    let (consumer, _events) = connected_consumer().await;
    let result = consumer
        .invoke_function(&path("2"), vec![Value::Integer(1), Value::Integer(7)])
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.result, vec![Value::Integer(8)]);

    // A provider-side handler error comes back as success:false
    let failed = consumer
        .invoke_function(&path("2"), vec![Value::String("x".into())])
        .await
        .unwrap();
    assert!(!failed.success);
}

#[tokio::test]
async fn test_back_to_back_requests_resolve_in_order() {
    let (consumer, _events) = connected_consumer().await;
    let identity_path = path("0");
    let router_path = path("1");
    let (identity, router) = tokio::join!(
        consumer.get_directory(&identity_path),
        consumer.get_directory(&router_path),
    );
    let identity = identity.unwrap();
    assert_eq!(identity.len(), 1);
    assert_eq!(identity[0].identifier(), Some("product"));
    // The matrix has no child elements, convergence came from the matrix
    // itself
    assert!(router.unwrap().is_empty());
}

#[tokio::test]
async fn test_expand_walks_the_whole_tree() {
    let (consumer, _events) = connected_consumer().await;
    let fetched = consumer.expand(&EmberPath::root()).await.unwrap();
    // Root plus the three top-level elements
    assert_eq!(fetched, 4);
    let snapshot = consumer.snapshot().await.unwrap();
    assert!(snapshot.lookup(&path("0.0")).is_some());
}

#[tokio::test]
async fn test_silent_provider_times_out() {
    // A listener that accepts and then says nothing
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _socket = listener.accept().await;
        tokio::time::sleep(Duration::from_secs(60)).await;
    });

    let mut config = ConsumerConfig::for_endpoint(address.ip().to_string(), address.port());
    config.request_timeout = Duration::from_millis(200);
    let (consumer, _events) = EmberConsumer::connect(config).await.unwrap();

    let err = consumer.get_directory(&EmberPath::root()).await.unwrap_err();
    assert!(matches!(
        err,
        ConsumerError::Protocol(EmberError::Timeout { timeout_ms: 200 })
    ));
}
