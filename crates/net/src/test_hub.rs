//! In-process websocket hub for client tests

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use taibai_core::{decode, encode, ClientConfig, Envelope};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

pub const TEST_TOKEN: &str = "test-token";

enum Command {
    Push(Message),
    Sever,
    Close(u16),
}

#[derive(Default)]
struct HubState {
    dials: AtomicUsize,
    connections: AtomicUsize,
    refuse: AtomicBool,
    auth: Mutex<Vec<Option<String>>>,
    current: Mutex<Option<mpsc::UnboundedSender<Command>>>,
}

pub struct TestHub {
    addr: SocketAddr,
    state: Arc<HubState>,
    frames: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    accept_task: JoinHandle<()>,
}

impl TestHub {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(HubState::default());
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();

        let accept_state = state.clone();
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_state.dials.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream, accept_state.clone(), frames_tx.clone()));
            }
        });

        Self {
            addr,
            state,
            frames: tokio::sync::Mutex::new(frames_rx),
            accept_task,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Fast timings, no application heartbeat within a test's lifetime
    pub fn config(&self) -> ClientConfig {
        ClientConfig::new(self.url(), TEST_TOKEN)
            .with_reconnect_delay(Duration::from_millis(50))
            .with_dial_timeout(Duration::from_secs(2))
            .with_read_deadline(Duration::from_secs(5))
            .with_keepalive_interval(Duration::from_secs(5))
            .with_heartbeat_interval(Duration::from_secs(60))
    }

    /// TCP connections accepted, including refused handshakes
    pub fn dials(&self) -> usize {
        self.state.dials.load(Ordering::SeqCst)
    }

    /// Completed websocket upgrades
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Answer further upgrades with HTTP 401
    pub fn refuse_handshakes(&self, refuse: bool) {
        self.state.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn auth_headers(&self) -> Vec<Option<String>> {
        self.state.auth.lock().clone()
    }

    pub fn send(&self, envelope: &Envelope) {
        self.send_raw(&encode(envelope).unwrap());
    }

    pub fn send_raw(&self, text: &str) {
        self.command(Command::Push(Message::text(text.to_string())));
    }

    /// Drop the latest connection without a close frame
    pub fn drop_connection(&self) {
        self.command(Command::Sever);
    }

    pub fn close_with(&self, code: u16) {
        self.command(Command::Close(code));
    }

    fn command(&self, cmd: Command) {
        let current = self.state.current.lock();
        let tx = current.as_ref().expect("no client connected");
        let _ = tx.send(cmd);
    }

    /// Next text frame from any client connection
    pub async fn next_frame(&self) -> Envelope {
        let mut frames = self.frames.lock().await;
        let text = tokio::time::timeout(Duration::from_secs(3), frames.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("hub stopped");
        decode(text.as_bytes()).unwrap()
    }

    pub async fn expect_no_frame(&self, wait: Duration) {
        let mut frames = self.frames.lock().await;
        if let Ok(Some(text)) = tokio::time::timeout(wait, frames.recv()).await {
            panic!("unexpected frame: {}", text);
        }
    }

    pub async fn wait_for_connections(&self, count: usize) {
        eventually(|| self.connections() >= count).await;
    }
}

impl Drop for TestHub {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve(
    stream: tokio::net::TcpStream,
    state: Arc<HubState>,
    frames: mpsc::UnboundedSender<String>,
) {
    let refuse = state.refuse.load(Ordering::SeqCst);
    let auth_state = state.clone();
    let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        let header = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        auth_state.auth.lock().push(header);
        if refuse {
            let mut rejection = ErrorResponse::new(Some("unauthorized".to_string()));
            *rejection.status_mut() = StatusCode::UNAUTHORIZED;
            return Err(rejection);
        }
        Ok(resp)
    };

    let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
        return;
    };
    state.connections.fetch_add(1, Ordering::SeqCst);

    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
    *state.current.lock() = Some(cmd_tx);

    let (mut sink, mut source) = ws.split();
    loop {
        tokio::select! {
            msg = source.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let _ = frames.send(text.as_str().to_string());
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Push(msg)) => {
                    let _ = sink.send(msg).await;
                }
                Some(Command::Close(code)) => {
                    let frame = CloseFrame {
                        code: code.into(),
                        reason: "hub closing".into(),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    break;
                }
                Some(Command::Sever) | None => break,
            },
        }
    }
}

/// Poll `check` until it holds, failing the test after three seconds
async fn eventually(check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
