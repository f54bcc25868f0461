//! End-to-end tests over real TCP sockets.

use std::io::{Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http::Response;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use http_connector::config::ConnectorConfig;
use http_connector::http::{HttpServer, InboundRequest, ServerError};
use http_connector::lifecycle::Shutdown;
use http_connector::net::tls::build_server_config;
use http_connector::net::{ConnectionRegistry, Listener};

mod common;

struct Running {
    addr: SocketAddr,
    shutdown: Shutdown,
    registry: Arc<ConnectionRegistry>,
    server: JoinHandle<Result<(), ServerError>>,
}

/// Start a server whose application echoes request bodies.
async fn start(config: ConnectorConfig, tls: Option<Arc<rustls::ServerConfig>>) -> Running {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let listener = Listener::from_tcp(listener, 16);

    let mut server = HttpServer::new(config).unwrap();
    if let Some(tls) = tls {
        server = server.with_tls_config(tls);
    }
    let registry = server.registry();

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(echo(rx));

    let shutdown = Shutdown::new();
    let signal = shutdown.subscribe();
    let server = tokio::spawn(async move { server.run(listener, tx, signal).await });
    Running {
        addr,
        shutdown,
        registry,
        server,
    }
}

async fn echo(mut requests: mpsc::UnboundedReceiver<InboundRequest>) {
    while let Some(request) = requests.recv().await {
        let body = request.request().body().clone();
        let response = Response::builder()
            .header("x-path", request.request().uri().path())
            .body(body)
            .unwrap();
        let _ = request.respond(response);
    }
}

/// Read from `stream` until `count` responses with bodies of `body_len`
/// bytes each have arrived.
async fn read_responses(stream: &mut TcpStream, count: usize, body_len: usize) -> String {
    let mut received = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let text = String::from_utf8_lossy(&received).to_string();
        let complete = text.matches("HTTP/1.1 200 OK").count() == count
            && text.rsplit("\r\n\r\n").next().map_or(0, str::len) >= body_len;
        if complete {
            return text;
        }
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut chunk))
            .await
            .unwrap()
            .unwrap();
        assert!(n > 0, "server closed early: {text}");
        received.extend_from_slice(&chunk[..n]);
    }
}

#[tokio::test]
async fn pipelined_requests_answered_in_order() {
    let running = start(ConnectorConfig::default(), None).await;
    let mut stream = TcpStream::connect(running.addr).await.unwrap();

    stream
        .write_all(b"POST /one HTTP/1.1\r\nContent-Length: 3\r\n\r\nabcPOST /two HTTP/1.1\r\nContent-Length: 3\r\n\r\nxyz")
        .await
        .unwrap();
    let text = read_responses(&mut stream, 2, 3).await;

    let one = text.find("x-path: /one").unwrap();
    let two = text.find("x-path: /two").unwrap();
    assert!(one < two);
    assert!(text.ends_with("xyz"));
    assert_eq!(running.registry.active_count(), 1);

    running.shutdown.trigger();
    running.server.await.unwrap().unwrap();
    assert_eq!(running.registry.active_count(), 0);
}

#[tokio::test]
async fn connection_close_request_ends_connection() {
    let running = start(ConnectorConfig::default(), None).await;
    let mut stream = TcpStream::connect(running.addr).await.unwrap();

    stream
        .write_all(b"GET /bye HTTP/1.1\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut received = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut received))
        .await
        .unwrap()
        .unwrap();
    let text = String::from_utf8(received).unwrap();
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.contains("connection: close"));

    running.shutdown.trigger();
    running.server.await.unwrap().unwrap();
}

#[tokio::test]
async fn idle_connection_times_out() {
    let mut config = ConnectorConfig::default();
    config.timeouts.idle_secs = 1;
    let running = start(config, None).await;
    let mut stream = TcpStream::connect(running.addr).await.unwrap();

    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);

    running.shutdown.trigger();
    running.server.await.unwrap().unwrap();
}

#[tokio::test]
async fn malformed_request_gets_bad_request() {
    let running = start(ConnectorConfig::default(), None).await;
    let mut stream = TcpStream::connect(running.addr).await.unwrap();

    stream.write_all(b"NOT HTTP AT ALL\r\n\r\n").await.unwrap();
    let mut received = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut received))
        .await
        .unwrap()
        .unwrap();
    assert!(received.starts_with(b"HTTP/1.1 400 Bad Request\r\n"));

    running.shutdown.trigger();
    running.server.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tls_round_trip() {
    let (cert, key) = common::self_signed();
    let server_config = build_server_config(
        vec![CertificateDer::from(cert.clone())],
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key)),
    )
    .unwrap();
    let running = start(ConnectorConfig::default(), Some(server_config)).await;
    let addr = running.addr;

    let body = tokio::task::spawn_blocking(move || {
        let mut roots = RootCertStore::empty();
        roots.add(CertificateDer::from(cert)).unwrap();
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let client = ClientConnection::new(Arc::new(config), ServerName::try_from("localhost").unwrap()).unwrap();

        let socket = std::net::TcpStream::connect(addr).unwrap();
        socket.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut tls = StreamOwned::new(client, socket);
        tls.write_all(b"POST /tls HTTP/1.1\r\nContent-Length: 6\r\nConnection: close\r\n\r\nsecret")
            .unwrap();

        let mut response = Vec::new();
        tls.read_to_end(&mut response).unwrap();
        String::from_utf8(response).unwrap()
    })
    .await
    .unwrap();

    assert!(body.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(body.ends_with("secret"));

    running.shutdown.trigger();
    running.server.await.unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_closes_open_connections() {
    let running = start(ConnectorConfig::default(), None).await;
    let mut stream = TcpStream::connect(running.addr).await.unwrap();
    stream.write_all(b"GET /keep HTTP/1.1\r\n\r\n").await.unwrap();
    read_responses(&mut stream, 1, 0).await;

    running.shutdown.trigger();
    running.server.await.unwrap().unwrap();

    // The server side is gone, so the stream reaches end of file.
    let mut rest = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(running.registry.active_count(), 0);
}
