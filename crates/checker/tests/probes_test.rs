//! Integration tests running each probe against an in-process fake backend

use bytes::{BufMut, BytesMut};
use checker::codec::fast::{FastCodec, FastMessage, FastStatus};
use checker::codec::jute::{self, ConnectResponse, ReplyHeader};
use checker::codec::resp::{RespCodec, RespValue};
use checker::{
    BackendKind, CheckResult, ConnectionTracker, Connector, Credentials, EndpointConfig,
    ErrorKind, Harness, ProbeContext, registry,
};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, Framed, LengthDelimitedCodec};

const DEADLINE: Duration = Duration::from_secs(2);

/// Bind a fake backend that hands every accepted socket to `serve`
async fn fake_backend<F, Fut>(serve: F) -> (u16, JoinHandle<()>)
where
    F: Fn(TcpStream) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(serve(socket));
        }
    });
    (port, handle)
}

/// A port nothing listens on
async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Build through the registry and run under the harness, checking that the
/// attempt left no connection behind
async fn check(config: EndpointConfig) -> CheckResult {
    let tracker = ConnectionTracker::new();
    let ctx = ProbeContext::default().with_connector(Connector::with_tracker(tracker.clone()));
    let probe = registry::build_probe(config, ctx).unwrap();

    let result = Harness::new(DEADLINE).run(probe).await;
    assert_eq!(tracker.open(), 0, "connection leaked: {:?}", result);
    result
}

// ZooKeeper

async fn serve_ruok(mut socket: TcpStream, reply: &'static [u8]) {
    let mut cmd = [0u8; 4];
    if socket.read_exact(&mut cmd).await.is_ok() && &cmd == b"ruok" {
        let _ = socket.write_all(reply).await;
    }
}

/// Minimal session-oriented server holding a single znode
async fn serve_znode(socket: TcpStream, path: &'static str, data: &'static [u8]) {
    let mut framed = Framed::new(socket, LengthDelimitedCodec::new());

    if framed.next().await.is_none() {
        return;
    }
    let session = ConnectResponse {
        protocol_version: 0,
        timeout_ms: 30_000,
        session_id: 0x5eed,
    };
    if framed.send(session.encode()).await.is_err() {
        return;
    }

    while let Some(Ok(frame)) = framed.next().await {
        let xid = i32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]);
        let op = i32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]]);

        let mut reply = BytesMut::new();
        if op == jute::OP_GET_DATA {
            let len = i32::from_be_bytes([frame[8], frame[9], frame[10], frame[11]]) as usize;
            let requested = std::str::from_utf8(&frame[12..12 + len]).unwrap();
            if requested == path {
                ReplyHeader { xid, zxid: 42, err: 0 }.encode(&mut reply);
                reply.put_i32(data.len() as i32);
                reply.put_slice(data);
                reply.put_bytes(0, 68);
            } else {
                ReplyHeader { xid, zxid: 42, err: -101 }.encode(&mut reply);
            }
        } else {
            ReplyHeader { xid, zxid: 43, err: 0 }.encode(&mut reply);
        }
        if framed.send(reply.freeze()).await.is_err() || op == jute::OP_CLOSE_SESSION {
            return;
        }
    }
}

#[tokio::test]
async fn test_zookeeper_imok() {
    let (port, server) = fake_backend(|s| serve_ruok(s, b"imok")).await;

    let result = check(EndpointConfig::new(BackendKind::Zookeeper, "127.0.0.1").with_port(port)).await;

    assert!(result.ok, "{:?}", result);
    assert_eq!(result.detail.unwrap()["data"], "imok");
    server.abort();
}

#[tokio::test]
async fn test_zookeeper_imok_without_hangup() {
    // Answers, then keeps the socket open well past the connect timeout.
    let (port, server) = fake_backend(|mut socket: TcpStream| async move {
        let mut cmd = [0u8; 4];
        if socket.read_exact(&mut cmd).await.is_ok() && &cmd == b"ruok" {
            let _ = socket.write_all(b"imok").await;
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
    })
    .await;

    let started = Instant::now();
    let result = check(
        EndpointConfig::new(BackendKind::Zookeeper, "127.0.0.1")
            .with_port(port)
            .with_connect_timeout(Duration::from_millis(300)),
    )
    .await;

    assert!(result.ok, "{:?}", result);
    assert_eq!(result.detail.unwrap()["data"], "imok");
    assert!(started.elapsed() < Duration::from_millis(300));
    server.abort();
}

#[tokio::test]
async fn test_zookeeper_not_imok_is_protocol_error() {
    let (port, server) = fake_backend(|s| {
        serve_ruok(s, b"This ZooKeeper instance is not currently serving requests")
    })
    .await;

    let result = check(EndpointConfig::new(BackendKind::Zookeeper, "127.0.0.1").with_port(port)).await;

    assert!(!result.ok);
    assert_eq!(result.error_kind, Some(ErrorKind::Protocol));
    server.abort();
}

#[tokio::test]
async fn test_zookeeper_reads_znode() {
    let (port, server) =
        fake_backend(|s| serve_znode(s, "/manta/registrar", b"{\"type\":\"host\"}")).await;

    let result = check(
        EndpointConfig::new(BackendKind::Zookeeper, "127.0.0.1")
            .with_port(port)
            .with_probe_target("/manta/registrar"),
    )
    .await;

    assert!(result.ok, "{:?}", result);
    let detail = result.detail.unwrap();
    assert_eq!(detail["path"], "/manta/registrar");
    assert_eq!(detail["data"], "{\"type\":\"host\"}");
    assert_eq!(detail["data_length"], 15);
    server.abort();
}

#[tokio::test]
async fn test_zookeeper_missing_znode_is_protocol_error() {
    let (port, server) = fake_backend(|s| serve_znode(s, "/manta/registrar", b"")).await;

    let result = check(
        EndpointConfig::new(BackendKind::Zookeeper, "127.0.0.1")
            .with_port(port)
            .with_probe_target("/nope"),
    )
    .await;

    assert_eq!(result.error_kind, Some(ErrorKind::Protocol));
    assert!(result.message.unwrap().contains("NoNode"));
    server.abort();
}

// Redis

const INFO: &str = "# Server\r\nredis_version:7.2.4\r\nprocess_id:4242\r\n\r\n# Clients\r\nconnected_clients:3\r\n\r\n# Memory\r\nused_memory_human:1.05M\r\nused_memory_peak_human:2.10M\r\n\r\n# Persistence\r\nloading:0\r\n";

/// Next command sent by the client, as its words
async fn read_command(socket: &mut TcpStream, buf: &mut BytesMut) -> Option<Vec<String>> {
    loop {
        match RespCodec.decode(buf).ok()? {
            Some(RespValue::Array(Some(items))) => {
                return Some(items.iter().filter_map(RespValue::as_text).collect());
            }
            Some(_) => return None,
            None => {}
        }
        if socket.read_buf(buf).await.ok()? == 0 {
            return None;
        }
    }
}

/// `user` is the (username, password) pair the server accepts; a bare
/// `AUTH password` authenticates as `default`
async fn serve_redis(
    mut socket: TcpStream,
    user: Option<(&'static str, &'static str)>,
    info: &'static str,
) {
    let mut buf = BytesMut::new();
    let mut authed = user.is_none();

    while let Some(cmd) = read_command(&mut socket, &mut buf).await {
        let reply = match cmd[0].to_ascii_uppercase().as_str() {
            "AUTH" => {
                let given = match cmd.len() {
                    2 => Some(("default", cmd[1].as_str())),
                    3 => Some((cmd[1].as_str(), cmd[2].as_str())),
                    _ => None,
                };
                if given.is_some() && given == user {
                    authed = true;
                    "+OK\r\n".to_string()
                } else {
                    "-WRONGPASS invalid username-password pair or user is disabled.\r\n"
                        .to_string()
                }
            }
            _ if !authed => "-NOAUTH Authentication required.\r\n".to_string(),
            "PING" => "+PONG\r\n".to_string(),
            "INFO" => format!("${}\r\n{}\r\n", info.len(), info),
            "QUIT" => {
                let _ = socket.write_all(b"+OK\r\n").await;
                return;
            }
            other => format!("-ERR unknown command '{}'\r\n", other),
        };
        if socket.write_all(reply.as_bytes()).await.is_err() {
            return;
        }
    }
}

#[tokio::test]
async fn test_redis_info_subset() {
    let (port, server) = fake_backend(|s| serve_redis(s, None, INFO)).await;

    let result = check(EndpointConfig::new(BackendKind::Redis, "127.0.0.1").with_port(port)).await;

    assert!(result.ok, "{:?}", result);
    let detail = result.detail.unwrap();
    assert_eq!(detail["process_id"], "4242");
    assert_eq!(detail["connected_clients"], "3");
    assert_eq!(detail["used_memory_human"], "1.05M");
    assert_eq!(detail["redis_version"], "7.2.4");
    assert!(detail.get("loading").is_none());
    server.abort();
}

#[tokio::test]
async fn test_redis_password_only_auth() {
    let (port, server) = fake_backend(|s| serve_redis(s, Some(("default", "hunter2")), INFO)).await;
    let endpoint = |password: &str| {
        EndpointConfig::new(BackendKind::Redis, "127.0.0.1")
            .with_port(port)
            .with_credentials(Credentials::password_only(password))
    };

    assert!(check(endpoint("hunter2")).await.ok);

    let denied = check(endpoint("wrong")).await;
    assert_eq!(denied.error_kind, Some(ErrorKind::Protocol));
    assert!(denied.message.unwrap().contains("WRONGPASS"));
    server.abort();
}

#[tokio::test]
async fn test_redis_acl_user_auth() {
    let (port, server) = fake_backend(|s| serve_redis(s, Some(("checker", "s3cret")), INFO)).await;
    let endpoint = |credentials: Credentials| {
        EndpointConfig::new(BackendKind::Redis, "127.0.0.1")
            .with_port(port)
            .with_credentials(credentials)
    };

    let result = check(endpoint(Credentials::new("checker", Some("s3cret".to_string())))).await;
    assert!(result.ok, "{:?}", result);

    // Without the username the server treats it as the default user.
    let denied = check(endpoint(Credentials::password_only("s3cret"))).await;
    assert_eq!(denied.error_kind, Some(ErrorKind::Protocol));
    server.abort();
}

#[tokio::test]
async fn test_redis_loading_is_protocol_error() {
    let (port, server) = fake_backend(|s| serve_redis(s, None, "# Persistence\r\nloading:1\r\n")).await;

    let result = check(EndpointConfig::new(BackendKind::Redis, "127.0.0.1").with_port(port)).await;

    assert_eq!(result.error_kind, Some(ErrorKind::Protocol));
    server.abort();
}

#[tokio::test]
async fn test_redis_silent_server_times_out_on_connect_timeout() {
    // Accepts, never answers PING.
    let (port, server) = fake_backend(|socket| async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        drop(socket);
    })
    .await;

    let started = Instant::now();
    let result = check(
        EndpointConfig::new(BackendKind::Redis, "127.0.0.1")
            .with_port(port)
            .with_connect_timeout(Duration::from_millis(50)),
    )
    .await;
    let elapsed = started.elapsed();

    assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
    assert!(elapsed >= Duration::from_millis(50), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(150), "{:?}", elapsed);
    server.abort();
}

// Moray

async fn serve_moray(socket: TcpStream, buckets: &'static [&'static str]) {
    let mut framed = Framed::new(socket, FastCodec);

    while let Some(Ok(request)) = framed.next().await {
        let method = request.method().unwrap_or_default().to_string();
        let msgid = request.msgid;

        let replies = match method.as_str() {
            "ping" => vec![FastMessage::response(msgid, FastStatus::End, "ping", json!(null))],
            "getBucket" => {
                let name = request.payload()[1].as_str().unwrap_or_default().to_string();
                if buckets.contains(&name.as_str()) {
                    vec![
                        FastMessage::response(
                            msgid,
                            FastStatus::Data,
                            "getBucket",
                            json!([{"name": name, "index": {}, "mtime": "2026-10-16T00:00:00Z"}]),
                        ),
                        FastMessage::response(msgid, FastStatus::End, "getBucket", json!(null)),
                    ]
                } else {
                    vec![FastMessage::response(
                        msgid,
                        FastStatus::Error,
                        "getBucket",
                        json!({"name": "BucketNotFoundError", "message": format!("{} does not exist", name)}),
                    )]
                }
            }
            _ => vec![FastMessage::response(
                msgid,
                FastStatus::Error,
                &method,
                json!({"name": "FastError", "message": "unsupported RPC"}),
            )],
        };

        for reply in replies {
            if framed.send(reply).await.is_err() {
                return;
            }
        }
    }
}

#[tokio::test]
async fn test_moray_bucket_found() {
    let (port, server) = fake_backend(|s| serve_moray(s, &["manta"])).await;

    let result = check(
        EndpointConfig::new(BackendKind::Moray, "127.0.0.1")
            .with_port(port)
            .with_probe_target("manta"),
    )
    .await;

    assert!(result.ok, "{:?}", result);
    let detail = result.detail.unwrap();
    assert_eq!(detail["bucket"], "manta");
    assert!(detail["latency_ms"].is_u64());
    server.abort();
}

#[tokio::test]
async fn test_moray_missing_bucket_is_protocol_error() {
    let (port, server) = fake_backend(|s| serve_moray(s, &["manta"])).await;

    let result = check(
        EndpointConfig::new(BackendKind::Moray, "127.0.0.1")
            .with_port(port)
            .with_probe_target("marlin"),
    )
    .await;

    assert_eq!(result.error_kind, Some(ErrorKind::Protocol));
    assert!(result.message.unwrap().contains("BucketNotFoundError"));
    server.abort();
}

#[tokio::test]
async fn test_moray_deep_ping() {
    let (port, server) = fake_backend(|s| serve_moray(s, &[])).await;

    let result = check(EndpointConfig::new(BackendKind::Moray, "127.0.0.1").with_port(port)).await;

    assert!(result.ok, "{:?}", result);
    assert!(result.detail.unwrap().contains_key("latency_ms"));
    server.abort();
}

// Postgres

fn pg_message(tag: u8, body: &[u8]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(body.len() + 5);
    msg.push(tag);
    msg.extend_from_slice(&(body.len() as i32 + 4).to_be_bytes());
    msg.extend_from_slice(body);
    msg
}

fn pg_ready() -> Vec<u8> {
    pg_message(b'Z', b"I")
}

async fn read_startup(socket: &mut TcpStream) -> Option<Vec<u8>> {
    let len = socket.read_i32().await.ok()? as usize;
    let mut body = vec![0u8; len.checked_sub(4)?];
    socket.read_exact(&mut body).await.ok()?;
    Some(body)
}

async fn read_message(socket: &mut TcpStream) -> Option<(u8, Vec<u8>)> {
    let tag = socket.read_u8().await.ok()?;
    let len = socket.read_i32().await.ok()? as usize;
    let mut body = vec![0u8; len.checked_sub(4)?];
    socket.read_exact(&mut body).await.ok()?;
    Some((tag, body))
}

/// Trust-auth server that answers every simple query with one timestamp
async fn serve_postgres(mut socket: TcpStream, accept: bool) {
    if read_startup(&mut socket).await.is_none() {
        return;
    }

    if !accept {
        let mut body = Vec::new();
        for (field, value) in [
            (b'S', "FATAL"),
            (b'V', "FATAL"),
            (b'C', "28P01"),
            (b'M', "password authentication failed for user \"postgres\""),
        ] {
            body.push(field);
            body.extend_from_slice(value.as_bytes());
            body.push(0);
        }
        body.push(0);
        let _ = socket.write_all(&pg_message(b'E', &body)).await;
        return;
    }

    let mut hello = pg_message(b'R', &0i32.to_be_bytes());
    let mut key = Vec::new();
    key.extend_from_slice(&4242i32.to_be_bytes());
    key.extend_from_slice(&7i32.to_be_bytes());
    hello.extend(pg_message(b'K', &key));
    hello.extend(pg_ready());
    if socket.write_all(&hello).await.is_err() {
        return;
    }

    while let Some((tag, _)) = read_message(&mut socket).await {
        if tag != b'Q' {
            return;
        }

        let mut desc = BytesMut::new();
        desc.put_i16(1);
        desc.put_slice(b"date\0");
        desc.put_i32(0);
        desc.put_i16(0);
        desc.put_i32(1184);
        desc.put_i16(8);
        desc.put_i32(-1);
        desc.put_i16(0);

        let value = b"2026-10-16 09:30:00.123+00";
        let mut row = BytesMut::new();
        row.put_i16(1);
        row.put_i32(value.len() as i32);
        row.put_slice(value);

        let mut reply = pg_message(b'T', &desc);
        reply.extend(pg_message(b'D', &row));
        reply.extend(pg_message(b'C', b"SELECT 1\0"));
        reply.extend(pg_ready());
        if socket.write_all(&reply).await.is_err() {
            return;
        }
    }
}

fn postgres_endpoint(port: u16) -> EndpointConfig {
    EndpointConfig::new(BackendKind::Postgres, "127.0.0.1")
        .with_port(port)
        .with_credentials(Credentials::new("postgres", None))
}

#[tokio::test]
async fn test_postgres_reports_server_time() {
    let (port, server) = fake_backend(|s| serve_postgres(s, true)).await;

    let result = check(postgres_endpoint(port)).await;

    assert!(result.ok, "{:?}", result);
    assert_eq!(result.detail.unwrap()["date"], "2026-10-16 09:30:00.123+00");
    server.abort();
}

#[tokio::test]
async fn test_postgres_auth_failure_is_protocol_error() {
    let (port, server) = fake_backend(|s| serve_postgres(s, false)).await;

    let result = check(postgres_endpoint(port)).await;

    assert_eq!(result.error_kind, Some(ErrorKind::Protocol));
    assert!(result.message.unwrap().contains("28P01"));
    server.abort();
}

// Every kind

#[tokio::test]
async fn test_unreachable_backends_are_connection_errors() {
    let port = closed_port().await;

    for kind in BackendKind::ALL {
        let mut config = EndpointConfig::new(kind, "127.0.0.1").with_port(port);
        if kind == BackendKind::Postgres {
            config = config.with_credentials(Credentials::new("postgres", None));
        }

        // Two probes from the same config classify the same way.
        let first = check(config.clone()).await;
        let second = check(config).await;

        assert_eq!(first.error_kind, Some(ErrorKind::Connection), "{}: {:?}", kind, first);
        assert_eq!(first.error_kind, second.error_kind);
    }
}

#[tokio::test]
async fn test_peer_hanging_up_is_connection_error() {
    let (port, server) = fake_backend(|socket| async move { drop(socket) }).await;

    let result = check(EndpointConfig::new(BackendKind::Redis, "127.0.0.1").with_port(port)).await;

    assert_eq!(result.error_kind, Some(ErrorKind::Connection));
    server.abort();
}
