//! FINS over a real loopback UDP socket.
//!
//! A small responder task stands in for the controller: it decodes memory
//! area read/write commands against a word map and answers with the
//! standard reply layout.

use fins_daq::hardware::PlcConnector;
use fins_daq::messages::{DaqEvent, EventBus};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;

type Memory = Arc<Mutex<HashMap<(u8, u16), u16>>>;

/// Area code the responder rejects with an error end code and no data.
const UNKNOWN_AREA: u8 = 0xEE;

fn reply(request: &[u8], end_code: [u8; 2], data: &[u8]) -> Vec<u8> {
    let mut out = vec![
        0xC0, 0x00, 0x02, 0x00, request[7], 0x00, 0x00, request[4], 0x00, request[9],
    ];
    out.extend_from_slice(&request[10..12]);
    out.extend_from_slice(&end_code);
    out.extend_from_slice(data);
    out
}

fn handle(request: &[u8], memory: &Memory) -> Vec<u8> {
    if request.len() < 18 {
        return reply(request, [0x10, 0x01], &[]);
    }
    let area = request[12];
    let addr = u16::from_be_bytes([request[13], request[14]]);
    if area == UNKNOWN_AREA {
        return reply(request, [0x11, 0x01], &[]);
    }
    let mut memory = memory.lock().unwrap();

    match [request[10], request[11]] {
        [0x01, 0x01] => {
            let count = u16::from_be_bytes([request[16], request[17]]);
            let mut data = Vec::new();
            for i in 0..count {
                let word = memory.get(&(area, addr + i)).copied().unwrap_or(0);
                data.extend_from_slice(&word.to_be_bytes());
            }
            reply(request, [0x00, 0x00], &data)
        }
        [0x01, 0x02] if request.len() >= 20 => {
            let value = u16::from_be_bytes([request[18], request[19]]);
            memory.insert((area, addr), value);
            reply(request, [0x00, 0x00], &[])
        }
        _ => reply(request, [0x04, 0x01], &[]),
    }
}

async fn responder(memory: Memory) -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        while let Ok((n, peer)) = socket.recv_from(&mut buf).await {
            let out = handle(&buf[..n], &memory);
            if socket.send_to(&out, peer).await.is_err() {
                break;
            }
        }
    });
    addr
}

fn seeded() -> Memory {
    let mut map = HashMap::new();
    map.insert((0xAF, 0), 0x0001); // heartbeat
    map.insert((0xAF, 1), 0b0000_0110); // param + temperature triggers
    map.insert((0xA0, 100), 7);
    map.insert((0xA0, 101), 8);
    map.insert((0xA0, 102), 0xFFFF);
    Arc::new(Mutex::new(map))
}

#[tokio::test]
async fn connect_and_exchange_over_loopback() {
    let memory = seeded();
    let endpoint = responder(memory.clone()).await;
    let bus = EventBus::default();
    let mut events = bus.subscribe();
    let connector = PlcConnector::new(bus).with_timeout(Duration::from_millis(500));

    assert!(connector.connect(endpoint, 1, 3).await);
    assert!(connector.is_connected());
    assert_eq!(
        events.try_recv().unwrap(),
        DaqEvent::ConnectionStatusChanged(true)
    );

    assert_eq!(connector.read_heartbeat_bit().await, Some(true));
    assert_eq!(connector.read_trigger_bit(0xAF, 1, 1).await, Some(true));
    assert_eq!(connector.read_trigger_bit(0xAF, 1, 3).await, Some(false));
    assert_eq!(connector.read_word(0xA0, 100, 3).await, Some(vec![7, 8, 0xFFFF]));
    assert_eq!(connector.read_signed_word(0xA0, 102).await, Some(-1));

    assert!(connector.write_word(0xA0, 200, 55).await);
    assert_eq!(connector.read_word(0xA0, 200, 1).await, Some(vec![55]));
    assert_eq!(memory.lock().unwrap().get(&(0xA0, 200)), Some(&55));

    // Read-modify-write keeps the other bits of the word.
    assert!(connector.write_response_bit(0xAF, 1, 0, true).await);
    assert_eq!(memory.lock().unwrap().get(&(0xAF, 1)), Some(&0b0000_0111));
    assert!(connector.write_response_bit(0xAF, 1, 2, false).await);
    assert_eq!(memory.lock().unwrap().get(&(0xAF, 1)), Some(&0b0000_0011));

    connector.disconnect().await;
    assert!(!connector.is_connected());
    assert_eq!(connector.read_word(0xA0, 100, 1).await, None);
}

#[tokio::test]
async fn silent_endpoint_fails_connect() {
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let endpoint = silent.local_addr().unwrap();
    let bus = EventBus::default();
    let mut events = bus.subscribe();
    let connector = PlcConnector::new(bus).with_timeout(Duration::from_millis(100));

    assert!(!connector.connect(endpoint, 1, 3).await);
    assert!(!connector.is_connected());
    assert_eq!(
        events.try_recv().unwrap(),
        DaqEvent::ConnectionStatusChanged(false)
    );
    assert_eq!(connector.read_heartbeat_bit().await, None);
    assert!(connector.read_block(0xA0, 0, 4).await.iter().all(|w| *w == 0));
    drop(silent);
}

#[tokio::test]
async fn error_end_code_is_a_failed_read() {
    let memory = seeded();
    let endpoint = responder(memory).await;
    let connector = PlcConnector::new(EventBus::default()).with_timeout(Duration::from_millis(500));
    assert!(connector.connect(endpoint, 1, 3).await);

    assert_eq!(connector.read_word(UNKNOWN_AREA, 0, 1).await, None);
    assert_eq!(connector.read_word(UNKNOWN_AREA, 0, 4).await, None);
    assert_eq!(connector.read_trigger_bit(UNKNOWN_AREA, 0, 0).await, None);
    assert_eq!(connector.read_block(UNKNOWN_AREA, 0, 3).await, vec![0, 0, 0]);

    // The connection survives the rejected requests.
    assert!(connector.is_connected());
    assert_eq!(connector.read_word(0xA0, 100, 2).await, Some(vec![7, 8]));
}
