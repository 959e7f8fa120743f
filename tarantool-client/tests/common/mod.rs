//! In-process mock Tarantool server for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use futures::{SinkExt, StreamExt};
use tarantool_client::{ClientConfig, ClientConfigBuilder};
use tarantool_core::protocol::{
    scramble, Packet, PacketCodec, RequestType, GREETING_LINE_SIZE, GREETING_SIZE,
};
use tarantool_core::Value;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

pub const DEFAULT_BANNER: &str = "Tarantool 2.11.1 (Binary) 8c4a6f5e-0000-4000-8000-000000000001";
pub const SALT: [u8; 32] = [7u8; 32];
pub const SCHEMA_ID: u64 = 81;

/// Server error codes used by the mock.
pub const ER_NO_SUCH_USER: u32 = 45;
pub const ER_CREDS_MISMATCH: u32 = 47;

/// What the mock does with one request.
#[derive(Debug, Clone)]
pub enum Action {
    /// Reply with `DATA`.
    Ok(Value),
    /// Reply with a server error.
    Error(u32, String),
    /// Run the inner action after a delay, without blocking later requests.
    Delayed(Duration, Box<Action>),
    /// Never reply.
    Ignore,
    /// Drop the connection.
    Close,
}

pub type Handler = Arc<dyn Fn(&Packet) -> Action + Send + Sync>;

/// Echoes the request arguments back: the tuple for insert, replace, call
/// and eval, the key for select and delete, nothing for ping.
pub fn echo(request: &Packet) -> Action {
    let body = &request.body;
    let data = body
        .tuple
        .clone()
        .or_else(|| body.key.clone())
        .unwrap_or_default();
    Action::Ok(Value::Array(data))
}

pub fn greeting(banner: &str) -> Vec<u8> {
    let salt = base64::engine::general_purpose::STANDARD.encode(SALT);
    let mut raw = vec![b' '; GREETING_SIZE];
    raw[..banner.len()].copy_from_slice(banner.as_bytes());
    raw[GREETING_LINE_SIZE - 1] = b'\n';
    raw[GREETING_LINE_SIZE..GREETING_LINE_SIZE + salt.len()].copy_from_slice(salt.as_bytes());
    raw[GREETING_SIZE - 1] = b'\n';
    raw
}

struct ServerState {
    banner: String,
    credentials: Option<(String, String)>,
    handler: Handler,
    connections: AtomicUsize,
    requests: AtomicUsize,
    kill: watch::Sender<u64>,
}

impl ServerState {
    fn authenticate(&self, request: &Packet) -> Action {
        let Some((user, password)) = &self.credentials else {
            return Action::Ok(Value::Nil);
        };
        if request.body.username.as_deref() != Some(user.as_str()) {
            return Action::Error(
                ER_NO_SUCH_USER,
                format!("User '{:?}' is not found", request.body.username),
            );
        }
        let expected = scramble(&SALT, password).unwrap();
        let sent = request
            .body
            .tuple
            .as_ref()
            .and_then(|t| t.get(1))
            .and_then(|v| v.as_bytes());
        if sent != Some(&expected[..]) {
            return Action::Error(
                ER_CREDS_MISMATCH,
                format!("Incorrect password supplied for user '{}'", user),
            );
        }
        Action::Ok(Value::Nil)
    }
}

pub struct MockServerBuilder {
    banner: String,
    credentials: Option<(String, String)>,
    handler: Handler,
}

impl Default for MockServerBuilder {
    fn default() -> Self {
        Self {
            banner: DEFAULT_BANNER.to_string(),
            credentials: None,
            handler: Arc::new(echo),
        }
    }
}

impl MockServerBuilder {
    pub fn banner(mut self, banner: &str) -> Self {
        self.banner = banner.to_string();
        self
    }

    pub fn credentials(mut self, user: &str, password: &str) -> Self {
        self.credentials = Some((user.to_string(), password.to_string()));
        self
    }

    pub fn handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Packet) -> Action + Send + Sync + 'static,
    {
        self.handler = Arc::new(handler);
        self
    }

    pub async fn start(self) -> MockServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (kill, _) = watch::channel(0);
        let state = Arc::new(ServerState {
            banner: self.banner,
            credentials: self.credentials,
            handler: self.handler,
            connections: AtomicUsize::new(0),
            requests: AtomicUsize::new(0),
            kill,
        });

        let accept = {
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    state.connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(Arc::clone(&state), stream));
                }
            })
        };

        MockServer {
            addr,
            state,
            accept,
        }
    }
}

/// A scriptable server speaking the greeting, auth and framed request
/// protocol on a loopback port.
pub struct MockServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    accept: JoinHandle<()>,
}

impl MockServer {
    pub fn builder() -> MockServerBuilder {
        MockServerBuilder::default()
    }

    /// Starts an echoing server without authentication.
    pub async fn start() -> MockServer {
        Self::builder().start().await
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Number of accepted connections so far.
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Number of requests received so far, including auth.
    pub fn requests(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }

    /// Drops every open connection. The listener keeps accepting.
    pub fn kill_connections(&self) {
        self.state.kill.send_modify(|generation| *generation += 1);
    }

    /// Stops accepting and drops every open connection.
    pub fn stop(&self) {
        self.accept.abort();
        self.kill_connections();
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn serve(state: Arc<ServerState>, mut stream: TcpStream) {
    let mut kill = state.kill.subscribe();
    kill.borrow_and_update();

    if stream.write_all(&greeting(&state.banner)).await.is_err() {
        return;
    }
    let (read, write) = stream.into_split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Packet>();
    let writer = tokio::spawn(async move {
        let mut frames = FramedWrite::new(write, PacketCodec::new());
        while let Some(packet) = rx.recv().await {
            if frames.send(packet).await.is_err() {
                break;
            }
        }
    });

    let mut frames = FramedRead::new(read, PacketCodec::new());
    loop {
        let request = tokio::select! {
            _ = kill.changed() => break,
            next = frames.next() => match next {
                Some(Ok(packet)) => packet,
                _ => break,
            },
        };
        state.requests.fetch_add(1, Ordering::SeqCst);

        let action = if request.header.code == RequestType::Auth.code() {
            state.authenticate(&request)
        } else {
            (state.handler)(&request)
        };
        if !respond(&tx, request.header.sync, action) {
            break;
        }
    }
    writer.abort();
}

fn respond(tx: &mpsc::UnboundedSender<Packet>, sync: u64, action: Action) -> bool {
    match action {
        Action::Ok(data) => {
            let _ = tx.send(Packet::ok_response(sync, Some(SCHEMA_ID), data));
        }
        Action::Error(code, message) => {
            let _ = tx.send(Packet::error_response(sync, code, message));
        }
        Action::Delayed(delay, inner) => {
            let tx = tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                respond(&tx, sync, *inner);
            });
        }
        Action::Ignore => {}
        Action::Close => return false,
    }
    true
}

/// Returns the name of the called function or the eval expression.
pub fn target(request: &Packet) -> &str {
    request
        .body
        .function
        .as_deref()
        .or(request.body.expression.as_deref())
        .unwrap_or_default()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Builder preset with short timeouts and fast reconnects.
pub fn config_builder(addrs: &[SocketAddr]) -> ClientConfigBuilder {
    ClientConfig::builder()
        .addresses(addrs.iter().copied())
        .init_timeout(Duration::from_secs(2))
        .connect_timeout(Duration::from_millis(500))
        .write_timeout(Duration::from_secs(2))
        .retry(|r| {
            r.initial_backoff(Duration::from_millis(10))
                .max_backoff(Duration::from_millis(100))
        })
}

pub fn config(addr: SocketAddr) -> ClientConfig {
    config_builder(&[addr]).build().expect("failed to build config")
}
