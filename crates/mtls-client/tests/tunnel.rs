//! End-to-end tests: application -> client forwarder -> TLS -> server forwarder -> backend

use mtls_client::{ClientForwarder, ClientForwarderConfig};
use mtls_config::{ClientConfigFile, ServerConfigFile};
use mtls_relay::SessionReport;
use mtls_server::{ServerForwarder, ServerForwarderConfig};
use mtls_tls::{server_name, DevPki, DevPkiPaths, TlsIdentity};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(10);

struct Pki {
    _dir: TempDir,
    trusted: DevPkiPaths,
    rogue: DevPkiPaths,
}

fn pki() -> Pki {
    let dir = tempfile::tempdir().unwrap();
    let trusted = DevPki::generate(&["localhost", "127.0.0.1"], "edge-01")
        .unwrap()
        .write_to_dir(&dir.path().join("trusted"))
        .unwrap();
    let rogue = DevPki::generate(&["localhost", "127.0.0.1"], "rogue")
        .unwrap()
        .write_to_dir(&dir.path().join("rogue"))
        .unwrap();
    Pki {
        _dir: dir,
        trusted,
        rogue,
    }
}

/// Backend that echoes everything until the peer half-closes
async fn spawn_echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

async fn spawn_server(
    identity: TlsIdentity,
    backend_addr: SocketAddr,
) -> (SocketAddr, mpsc::UnboundedReceiver<SessionReport>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let config = ServerForwarderConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        backend_addr: backend_addr.to_string(),
        handshake_timeout: Some(Duration::from_secs(5)),
        connect_timeout: None,
        max_connections: None,
    };
    let forwarder =
        ServerForwarder::new(config, identity.server_config().unwrap()).with_session_reports(tx);
    let listener = forwarder.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(forwarder.serve(listener));
    (addr, rx)
}

async fn spawn_client(
    identity: TlsIdentity,
    server_addr: SocketAddr,
    name: &str,
    max_connections: Option<usize>,
) -> (SocketAddr, mpsc::UnboundedReceiver<SessionReport>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let config = ClientForwarderConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        server_addr: server_addr.to_string(),
        server_name: server_name(name).unwrap(),
        connect_timeout: Some(Duration::from_secs(5)),
        max_connections,
    };
    let forwarder =
        ClientForwarder::new(config, identity.client_config().unwrap()).with_session_reports(tx);
    let listener = forwarder.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(forwarder.serve(listener));
    (addr, rx)
}

fn server_identity(paths: &DevPkiPaths) -> TlsIdentity {
    TlsIdentity::load(&paths.server_cert, &paths.server_key, &paths.ca_cert).unwrap()
}

fn client_identity(paths: &DevPkiPaths) -> TlsIdentity {
    TlsIdentity::load(&paths.client_cert, &paths.client_key, &paths.ca_cert).unwrap()
}

/// Read until EOF; a reset counts as EOF
async fn drain(stream: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let _ = tokio::time::timeout(WAIT, stream.read_to_end(&mut buf))
        .await
        .expect("connection was not closed");
    buf
}

async fn assert_never_dialed(backend: &TcpListener) {
    let dialed = tokio::time::timeout(Duration::from_millis(500), backend.accept()).await;
    assert!(dialed.is_err(), "backend was dialed");
}

#[tokio::test]
async fn test_ping_pong_through_tunnel() {
    let pki = pki();

    let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend.local_addr().unwrap();
    let backend_task = tokio::spawn(async move {
        let (mut stream, _) = backend.accept().await.unwrap();
        let mut request = [0u8; 4];
        stream.read_exact(&mut request).await.unwrap();
        stream.write_all(b"PONG").await.unwrap();
        request
    });

    let (server_addr, mut server_reports) =
        spawn_server(server_identity(&pki.trusted), backend_addr).await;
    let (client_addr, mut client_reports) =
        spawn_client(client_identity(&pki.trusted), server_addr, "localhost", None).await;

    let mut app = TcpStream::connect(client_addr).await.unwrap();
    app.write_all(b"PING").await.unwrap();
    let reply = drain(&mut app).await;
    assert_eq!(reply, b"PONG");
    drop(app);

    assert_eq!(&backend_task.await.unwrap(), b"PING");

    let client = tokio::time::timeout(WAIT, client_reports.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(client.front_to_back.bytes, 4);
    assert_eq!(client.back_to_front.bytes, 4);

    let server = tokio::time::timeout(WAIT, server_reports.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(server.front_to_back.bytes, 4);
    assert_eq!(server.back_to_front.bytes, 4);
}

#[tokio::test]
async fn test_concurrent_sessions_do_not_cross() {
    let pki = pki();
    let backend_addr = spawn_echo_backend().await;
    let (server_addr, _server_reports) =
        spawn_server(server_identity(&pki.trusted), backend_addr).await;
    let (client_addr, mut client_reports) =
        spawn_client(client_identity(&pki.trusted), server_addr, "127.0.0.1", None).await;

    let mut apps = Vec::new();
    for i in 0..100u32 {
        apps.push(tokio::spawn(async move {
            let payload: Vec<u8> = (0..1024u32).map(|j| ((i * 7 + j) % 251) as u8).collect();
            let mut app = TcpStream::connect(client_addr).await.unwrap();
            app.write_all(&payload).await.unwrap();
            app.shutdown().await.unwrap();
            let echoed = drain(&mut app).await;
            assert_eq!(echoed, payload, "session {} got foreign bytes", i);
        }));
    }
    for app in apps {
        app.await.unwrap();
    }

    let mut ids = Vec::new();
    for _ in 0..100 {
        let report = tokio::time::timeout(WAIT, client_reports.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.front_to_back.bytes, 1024);
        assert_eq!(report.back_to_front.bytes, 1024);
        ids.push(report.session_id);
    }
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 100);
}

#[tokio::test]
async fn test_server_rejects_client_from_other_ca() {
    let pki = pki();
    let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend.local_addr().unwrap();

    let (server_addr, _server_reports) =
        spawn_server(server_identity(&pki.trusted), backend_addr).await;

    // Trusts the real server but presents a certificate from another CA
    let rogue_client =
        TlsIdentity::load(&pki.rogue.client_cert, &pki.rogue.client_key, &pki.trusted.ca_cert)
            .unwrap();
    let (client_addr, _client_reports) =
        spawn_client(rogue_client, server_addr, "localhost", None).await;

    let mut app = TcpStream::connect(client_addr).await.unwrap();
    let _ = app.write_all(b"PING").await;
    let reply = drain(&mut app).await;
    assert!(reply.is_empty());

    assert_never_dialed(&backend).await;
}

#[tokio::test]
async fn test_server_rejects_client_without_certificate() {
    let pki = pki();
    let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend.local_addr().unwrap();

    let (server_addr, _server_reports) =
        spawn_server(server_identity(&pki.trusted), backend_addr).await;

    let roots = mtls_tls::load_ca_roots(&pki.trusted.ca_cert).unwrap();
    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_root_certificates(roots)
    .with_no_client_auth();
    let connector = tokio_rustls::TlsConnector::from(Arc::new(config));

    let tcp = TcpStream::connect(server_addr).await.unwrap();
    // TLS 1.3 lets the client finish before the server has refused it
    if let Ok(mut tls) = connector
        .connect(server_name("localhost").unwrap(), tcp)
        .await
    {
        let _ = tls.write_all(b"PING").await;
        let mut buf = Vec::new();
        let _ = tokio::time::timeout(WAIT, tls.read_to_end(&mut buf)).await;
        assert!(buf.is_empty());
    }

    assert_never_dialed(&backend).await;
}

#[tokio::test]
async fn test_client_rejects_server_from_other_ca() {
    let pki = pki();
    let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend.local_addr().unwrap();

    let (server_addr, _server_reports) =
        spawn_server(server_identity(&pki.rogue), backend_addr).await;
    let (client_addr, _client_reports) =
        spawn_client(client_identity(&pki.trusted), server_addr, "localhost", None).await;

    let mut app = TcpStream::connect(client_addr).await.unwrap();
    let _ = app.write_all(b"PING").await;
    assert!(drain(&mut app).await.is_empty());

    assert_never_dialed(&backend).await;
}

#[tokio::test]
async fn test_client_rejects_server_name_mismatch() {
    let pki = pki();
    let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend.local_addr().unwrap();

    let (server_addr, _server_reports) =
        spawn_server(server_identity(&pki.trusted), backend_addr).await;
    let (client_addr, _client_reports) = spawn_client(
        client_identity(&pki.trusted),
        server_addr,
        "tunnel.example.com",
        None,
    )
    .await;

    let mut app = TcpStream::connect(client_addr).await.unwrap();
    let _ = app.write_all(b"PING").await;
    assert!(drain(&mut app).await.is_empty());

    assert_never_dialed(&backend).await;
}

#[tokio::test]
async fn test_max_connections_defers_extra_sessions() {
    let pki = pki();
    let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend.local_addr().unwrap();

    let (server_addr, _server_reports) =
        spawn_server(server_identity(&pki.trusted), backend_addr).await;
    let (client_addr, _client_reports) =
        spawn_client(client_identity(&pki.trusted), server_addr, "localhost", Some(1)).await;

    let mut first = TcpStream::connect(client_addr).await.unwrap();
    first.write_all(b"one").await.unwrap();
    let (mut first_backend, _) = tokio::time::timeout(WAIT, backend.accept())
        .await
        .unwrap()
        .unwrap();

    // Sits in the listen backlog until the first session ends
    let mut second = TcpStream::connect(client_addr).await.unwrap();
    second.write_all(b"two").await.unwrap();
    assert_never_dialed(&backend).await;

    drop(first);
    let mut buf = Vec::new();
    first_backend.read_to_end(&mut buf).await.unwrap();
    assert_eq!(buf, b"one");
    drop(first_backend);

    let (mut second_backend, _) = tokio::time::timeout(WAIT, backend.accept())
        .await
        .unwrap()
        .unwrap();
    let mut buf = [0u8; 3];
    second_backend.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"two");
    drop(second);
}

#[tokio::test]
async fn test_forwarders_from_config_files() {
    let pki = pki();
    let dir = tempfile::tempdir().unwrap();
    let backend_addr = spawn_echo_backend().await;

    let server_path = dir.path().join("server_config.yaml");
    std::fs::write(
        &server_path,
        format!(
            "server:\n  listen_address: 127.0.0.1\n  listen_port: 0\n\
             backend:\n  laddress: 127.0.0.1\n  port: {}\n\
             tls:\n  ca_cert: {}\n  server_cert: {}\n  server_key: {}\n",
            backend_addr.port(),
            pki.trusted.ca_cert.display(),
            pki.trusted.server_cert.display(),
            pki.trusted.server_key.display(),
        ),
    )
    .unwrap();
    let server_file = ServerConfigFile::load(&server_path).unwrap();
    let server = ServerForwarder::from_config_file(&server_file).unwrap();
    let server_listener = server.bind().await.unwrap();
    let server_addr = server_listener.local_addr().unwrap();
    tokio::spawn(server.serve(server_listener));

    let client_path = dir.path().join("client_config.yaml");
    std::fs::write(
        &client_path,
        format!(
            "server:\n  address: 127.0.0.1\n  port: {}\n\
             client:\n  listen_address: 127.0.0.1\n  listen_port: 0\n\
             tls:\n  ca_cert: {}\n  client_cert: {}\n  client_key: {}\n  server_name: localhost\n",
            server_addr.port(),
            pki.trusted.ca_cert.display(),
            pki.trusted.client_cert.display(),
            pki.trusted.client_key.display(),
        ),
    )
    .unwrap();
    let client_file = ClientConfigFile::load(&client_path).unwrap();
    let client = ClientForwarder::from_config_file(&client_file).unwrap();
    let client_listener = client.bind().await.unwrap();
    let client_addr = client_listener.local_addr().unwrap();
    tokio::spawn(client.serve(client_listener));

    let mut app = TcpStream::connect(client_addr).await.unwrap();
    app.write_all(b"hello over mtls").await.unwrap();
    app.shutdown().await.unwrap();
    assert_eq!(drain(&mut app).await, b"hello over mtls");
}
