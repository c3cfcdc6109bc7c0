//! Full-stack test over a real TCP connection: a scripted peripheral behind
//! a `TcpListener` serves the readiness handshake, bonjour discovery, and a
//! servo angle request.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use cmdlink::config::InitConfig;
use cmdlink::devices::Servo;
use cmdlink::transport::{SocketLinkConfig, SocketProtocol};
use cmdlink::{CommandManager, DeviceEntry, FramingConfig, LinkEntry, LinkKind, ManagerConfig};

/// Spawn a scripted peripheral hosting a servo at address `S1`.
async fn spawn_peripheral() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (mut rd, mut wr) = stream.into_split();
        let mut buf = [0u8; 256];
        let mut pending: Vec<u8> = Vec::new();

        loop {
            let n = match rd.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            pending.extend_from_slice(&buf[..n]);

            while let Some(pos) = pending.iter().position(|b| *b == b';') {
                let frame: Vec<u8> = pending.drain(..=pos).collect();
                let text = String::from_utf8_lossy(&frame[..frame.len() - 1]).into_owned();
                let reply = match text.as_str() {
                    "ISINIT" => Some("INIT,1;"),
                    "S1,BONJOUR" => Some("S1,BONJOUR,SERVO;"),
                    "S1,R" => Some("S1,A,42;"),
                    // set-angle and anything else: accepted silently
                    _ => None,
                };
                if let Some(reply) = reply {
                    if wr.write_all(reply.as_bytes()).await.is_err() {
                        return;
                    }
                }
            }
        }
    });

    addr
}

#[tokio::test]
async fn test_tcp_end_to_end() {
    let addr = spawn_peripheral().await;

    let config = ManagerConfig {
        links: vec![LinkEntry {
            required: true,
            link: LinkKind::Socket(SocketLinkConfig {
                address: addr.ip().to_string(),
                port: addr.port(),
                protocol: SocketProtocol::Tcp,
                timeout: 0.01,
                framing: FramingConfig::default(),
            }),
        }],
        devices: BTreeMap::from([(
            "servo_head".to_string(),
            DeviceEntry {
                command_id: "S1".to_string(),
                config: serde_json::json!({ "initial_angle": 30 }),
            },
        )]),
        init: InitConfig::default(),
    };

    let manager = CommandManager::from_config(&config).await.expect("startup");

    let servo = manager
        .typed_device::<Servo>("servo_head")
        .expect("servo discovered over TCP");
    assert_eq!(servo.get_angle().await.unwrap(), 42);

    manager.stop().await;
}

#[tokio::test]
async fn test_required_link_failure_is_fatal() {
    let config = ManagerConfig {
        links: vec![LinkEntry {
            required: true,
            link: LinkKind::Socket(SocketLinkConfig {
                address: "127.0.0.1".to_string(),
                // nothing listens here
                port: 1,
                protocol: SocketProtocol::Tcp,
                timeout: 0.01,
                framing: FramingConfig::default(),
            }),
        }],
        devices: BTreeMap::new(),
        init: InitConfig::default(),
    };

    assert!(CommandManager::from_config(&config).await.is_err());
}

#[tokio::test]
async fn test_optional_link_failure_is_skipped() {
    let config = ManagerConfig {
        links: vec![LinkEntry {
            required: false,
            link: LinkKind::Socket(SocketLinkConfig {
                address: "127.0.0.1".to_string(),
                port: 1,
                protocol: SocketProtocol::Tcp,
                timeout: 0.01,
                framing: FramingConfig::default(),
            }),
        }],
        devices: BTreeMap::new(),
        init: InitConfig::default(),
    };

    let manager = CommandManager::from_config(&config).await.expect("startup");
    assert!(manager.sessions().is_empty());
    manager.stop().await;
}
