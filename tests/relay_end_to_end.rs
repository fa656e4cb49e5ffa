//! End-to-end relay tests over real sockets
//!
//! Each test starts a relay on ephemeral loopback ports, sends datagrams from a plain UDP socket
//! and reads what WebSocket clients receive.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use futures::StreamExt;
use pointrelay::{
    RelayConfig, RelayController, RelayEndpoints, RelayError, RelayState, WireFormat,
};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(3);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("pointrelay=debug")
        .try_init();
}

fn config(format: WireFormat) -> RelayConfig {
    let mut config = RelayConfig::default();
    config.udp.bind = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
    config.websocket.bind = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
    config.wire_format = format;
    config
}

/// Datagram with zero header floats, points (1,2,3) and (4,5,6), frontier "ab"
fn two_point_datagram() -> Vec<u8> {
    let mut datagram = vec![0u8; 40];
    datagram.extend_from_slice(&24u32.to_be_bytes());
    datagram.extend_from_slice(&2u32.to_be_bytes());
    for value in [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0] {
        datagram.extend_from_slice(&value.to_le_bytes());
    }
    datagram.extend_from_slice(b"ab");
    datagram
}

/// Header-only datagram whose frontier is `tag`
fn tagged_datagram(tag: &str) -> Vec<u8> {
    let mut datagram = vec![0u8; 40];
    datagram.extend_from_slice(&0u32.to_be_bytes());
    datagram.extend_from_slice(&(tag.len() as u32).to_be_bytes());
    datagram.extend_from_slice(tag.as_bytes());
    datagram
}

async fn start(format: WireFormat) -> (RelayController, RelayEndpoints, UdpSocket) {
    init_tracing();
    let controller = RelayController::new(config(format));
    let endpoints = controller.start().await.unwrap();
    let sender = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    (controller, endpoints, sender)
}

/// Connect a client and wait until the relay has registered it
async fn connect(endpoints: &RelayEndpoints, sender: &UdpSocket) -> Client {
    let (mut client, _) = connect_async(format!("ws://{}", endpoints.websocket)).await.unwrap();

    // Registration happens after the handshake on the server task; send until a frame arrives
    timeout(WAIT, async {
        loop {
            sender.send_to(&tagged_datagram("warmup"), endpoints.udp).await.unwrap();
            if let Ok(Some(Ok(_))) = timeout(Duration::from_millis(50), client.next()).await {
                return;
            }
        }
    })
    .await
    .expect("client never registered");

    // Let stray warmup frames land, then discard them
    tokio::time::sleep(Duration::from_millis(50)).await;
    while let Ok(Some(Ok(_))) = timeout(Duration::from_millis(20), client.next()).await {}
    client
}

fn is_warmup(msg: &Message) -> bool {
    msg.clone().into_data().windows(6).any(|w| w == b"warmup")
}

/// Next data frame, skipping control frames and warmup frames
async fn next_data(client: &mut Client) -> Message {
    timeout(WAIT, async {
        loop {
            match client.next().await {
                Some(Ok(msg)) if (msg.is_binary() || msg.is_text()) && !is_warmup(&msg) => {
                    return msg;
                }
                Some(Ok(_)) => continue,
                other => panic!("connection ended: {:?}", other),
            }
        }
    })
    .await
    .expect("no frame received")
}

#[tokio::test]
async fn binary_frame_reaches_client() {
    let (controller, endpoints, sender) = start(WireFormat::Binary).await;
    let mut client = connect(&endpoints, &sender).await;

    sender.send_to(&two_point_datagram(), endpoints.udp).await.unwrap();
    let data = next_data(&mut client).await.into_data();

    assert_eq!(data.len(), 74);
    assert_eq!(&data[0..4], &[2, 0, 0, 0]);
    assert_eq!(&data[4..8], &[2, 0, 0, 0]);
    assert!(data[8..48].iter().all(|b| *b == 0));
    assert_eq!(&data[48..52], &1.0f32.to_le_bytes());
    assert_eq!(&data[68..72], &6.0f32.to_le_bytes());
    assert_eq!(&data[72..74], b"ab");

    controller.stop().await.unwrap();
}

#[tokio::test]
async fn text_frame_reaches_client() {
    let (controller, endpoints, sender) = start(WireFormat::Text).await;
    let mut client = connect(&endpoints, &sender).await;

    sender.send_to(&two_point_datagram(), endpoints.udp).await.unwrap();
    let text = next_data(&mut client).await.into_text().unwrap();

    let expected = format!(
        "1.0000 2.0000 3.0000 4.0000 5.0000 6.0000 / ab / {}",
        ["0.0000"; 10].join(" ")
    );
    assert_eq!(text.as_str(), expected);

    controller.stop().await.unwrap();
}

#[tokio::test]
async fn malformed_datagrams_are_dropped_and_order_kept() {
    let (controller, endpoints, sender) = start(WireFormat::Binary).await;
    let mut client = connect(&endpoints, &sender).await;

    let mut truncated = tagged_datagram("cut");
    truncated.truncate(49);
    let mut ragged = vec![0u8; 40];
    ragged.extend_from_slice(&16u32.to_be_bytes());
    ragged.extend_from_slice(&0u32.to_be_bytes());
    ragged.extend_from_slice(&[0u8; 16]);

    sender.send_to(&tagged_datagram("first"), endpoints.udp).await.unwrap();
    sender.send_to(&[0u8; 47], endpoints.udp).await.unwrap();
    sender.send_to(&truncated, endpoints.udp).await.unwrap();
    sender.send_to(&ragged, endpoints.udp).await.unwrap();
    sender.send_to(&tagged_datagram("second"), endpoints.udp).await.unwrap();

    let first = next_data(&mut client).await.into_data();
    assert_eq!(&first[48..], b"first");
    let second = next_data(&mut client).await.into_data();
    assert_eq!(&second[48..], b"second");

    let stats = controller.stats();
    assert!(stats.short >= 1);
    assert!(stats.truncated >= 1);
    assert!(stats.invalid_point_cloud >= 1);
    assert_eq!(controller.state(), RelayState::Running);

    controller.stop().await.unwrap();
}

#[tokio::test]
async fn closing_client_does_not_disturb_others() {
    let (controller, endpoints, sender) = start(WireFormat::Binary).await;
    let mut a = connect(&endpoints, &sender).await;
    let mut b = connect(&endpoints, &sender).await;
    let mut c = connect(&endpoints, &sender).await;

    b.close(None).await.unwrap();
    drop(b);

    for i in 0..5 {
        sender.send_to(&tagged_datagram(&format!("frame-{}", i)), endpoints.udp).await.unwrap();
    }

    for client in [&mut a, &mut c] {
        for i in 0..5 {
            let data = next_data(client).await.into_data();
            assert_eq!(&data[48..], format!("frame-{}", i).as_bytes());
        }
    }

    controller.stop().await.unwrap();
}

#[tokio::test]
async fn stop_closes_clients_and_frees_ports() {
    let (controller, endpoints, sender) = start(WireFormat::Binary).await;
    let mut client = connect(&endpoints, &sender).await;

    controller.stop().await.unwrap();
    assert_eq!(controller.state(), RelayState::Stopped);

    let ended = timeout(WAIT, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "client was not closed");

    assert!(matches!(controller.stop().await, Err(RelayError::NotRunning)));

    let mut again = config(WireFormat::Binary);
    again.udp.bind = endpoints.udp;
    again.websocket.bind = endpoints.websocket;
    let restarted = RelayController::new(again);
    assert_eq!(restarted.start().await.unwrap(), endpoints);
    restarted.stop().await.unwrap();
}
