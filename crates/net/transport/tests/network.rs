//! Loopback tests for the TCP network.

use std::net::SocketAddr;
use std::time::Duration;

use assert_matches::assert_matches;
use bytes::Bytes;
use strand_net_transport::{
    Connection, Direction, Network, NetworkEvents, TransportConfig, TransportError,
};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

fn loopback() -> TransportConfig {
    TransportConfig::default().with_listen_addr(SocketAddr::from(([127, 0, 0, 1], 0)))
}

async fn bind(config: TransportConfig) -> (Network, NetworkEvents) {
    Network::bind(config).await.unwrap()
}

async fn next_connection(events: &mut NetworkEvents) -> Connection {
    timeout(WAIT, events.new_connections.recv())
        .await
        .unwrap()
        .unwrap()
}

/// Dials `b` from `a` and returns (a's handle, b's handle).
async fn connect_pair(
    a: &Network,
    a_events: &mut NetworkEvents,
    b: &Network,
    b_events: &mut NetworkEvents,
) -> (Connection, Connection) {
    let id = a.dial(b.local_addr());
    let outbound = next_connection(a_events).await;
    assert_eq!(outbound.id(), id);
    let inbound = next_connection(b_events).await;
    (outbound, inbound)
}

#[tokio::test]
async fn test_dial_reports_both_directions() {
    init_tracing();
    let (a, mut a_events) = bind(loopback()).await;
    let (b, mut b_events) = bind(loopback()).await;

    let (outbound, inbound) = connect_pair(&a, &mut a_events, &b, &mut b_events).await;

    assert_eq!(outbound.direction(), Direction::Outbound);
    assert_eq!(outbound.remote_addr(), b.local_addr());
    assert_eq!(inbound.direction(), Direction::Inbound);
}

#[tokio::test]
async fn test_frames_arrive_whole_and_in_order() {
    init_tracing();
    let (a, mut a_events) = bind(loopback()).await;
    let (b, mut b_events) = bind(loopback()).await;
    let (outbound, inbound) = connect_pair(&a, &mut a_events, &b, &mut b_events).await;

    let big = Bytes::from(vec![0x5a; 200_000]);
    outbound.send(Bytes::from_static(b"first")).unwrap();
    outbound.send(big.clone()).unwrap();
    outbound.send(Bytes::from_static(b"third")).unwrap();

    for expected in [Bytes::from_static(b"first"), big, Bytes::from_static(b"third")] {
        let message = timeout(WAIT, b_events.incoming_messages.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.connection_id, inbound.id());
        assert_eq!(message.bytes, expected);
    }
}

#[tokio::test]
async fn test_close_is_reported_on_both_ends() {
    init_tracing();
    let (a, mut a_events) = bind(loopback()).await;
    let (b, mut b_events) = bind(loopback()).await;
    let (outbound, inbound) = connect_pair(&a, &mut a_events, &b, &mut b_events).await;

    outbound.send(Bytes::from_static(b"bye")).unwrap();
    outbound.close();
    outbound.close();

    let closed = timeout(WAIT, a_events.closed_connections.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(closed, outbound.id());
    assert!(outbound.is_closed());
    assert_matches!(
        outbound.send(Bytes::from_static(b"late")),
        Err(TransportError::ConnectionClosed(_))
    );

    // The queued frame is flushed before the socket goes away.
    let message = timeout(WAIT, b_events.incoming_messages.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&message.bytes[..], b"bye");

    let closed = timeout(WAIT, b_events.closed_connections.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(closed, inbound.id());
}

#[tokio::test]
async fn test_failed_dial_reports_connection_error() {
    init_tracing();
    let (a, mut a_events) = bind(loopback()).await;

    // Grab a free port and release it so nothing is listening there.
    let unused = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let id = a.dial(unused);
    let error = timeout(WAIT, a_events.connection_errors.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(error.connection_id, id);
    assert_eq!(error.remote_addr, unused);
    assert!(a_events.new_connections.try_recv().is_err());
}

#[tokio::test]
async fn test_oversized_frame_is_a_send_error() {
    init_tracing();
    let (a, mut a_events) = bind(loopback().with_max_frame_size(1024)).await;
    let (b, mut b_events) = bind(loopback()).await;
    let (outbound, _inbound) = connect_pair(&a, &mut a_events, &b, &mut b_events).await;

    outbound.send(Bytes::from(vec![0u8; 4096])).unwrap();

    let error = timeout(WAIT, a_events.send_errors.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(error.connection_id, outbound.id());
    assert_matches!(error.error, TransportError::Codec(_));

    let closed = timeout(WAIT, a_events.closed_connections.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(closed, outbound.id());
}

#[tokio::test]
async fn test_oversized_inbound_frame_is_a_codec_error() {
    init_tracing();
    let (a, mut a_events) = bind(loopback()).await;
    let (b, mut b_events) = bind(loopback().with_max_frame_size(1024)).await;
    let (outbound, inbound) = connect_pair(&a, &mut a_events, &b, &mut b_events).await;

    outbound.send(Bytes::from(vec![0u8; 4096])).unwrap();

    // The reader refuses the frame; a bare socket failure would be `Io`.
    let error = timeout(WAIT, b_events.connection_errors.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(error.connection_id, inbound.id());
    assert_matches!(error.error, TransportError::Codec(_));

    let closed = timeout(WAIT, b_events.closed_connections.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(closed, inbound.id());
}

#[tokio::test]
async fn test_shutdown_closes_connections() {
    init_tracing();
    let (a, mut a_events) = bind(loopback()).await;
    let (b, mut b_events) = bind(loopback()).await;
    let (outbound, inbound) = connect_pair(&a, &mut a_events, &b, &mut b_events).await;

    a.shutdown();
    assert!(a.is_shutdown());

    let closed = timeout(WAIT, a_events.closed_connections.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(closed, outbound.id());
    let closed = timeout(WAIT, b_events.closed_connections.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(closed, inbound.id());
}
