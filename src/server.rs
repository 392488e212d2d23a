//! TCP server: the `STOPPED → LISTENING → CONNECTED ↔ CONNECTED →
//! DISCONNECTED → LISTENING` session state machine, eviction of a second
//! connection, Nagle-disable, keyframe-never-dropped send policy, and the
//! input/ping receive loop (spec §4.4).
//!
//! Grounded on the thread+`Drop`-join worker shape in
//! `pipeline_scheduler.rs`; network I/O itself has no teacher precedent
//! (the teacher never opened a socket) so the `std::net::TcpListener`
//! accept-loop/per-connection-thread shape is drawn from
//! `examples/glamberson-IronRDP`'s connection-acceptor pattern.

use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tracing::{info, warn};

use crate::contract::{DisplayConfig, InputSample, PingSample};
use crate::wire::{self, ClientMessage, WireError};

/// Default listening port (spec §6.2).
pub const DEFAULT_PORT: u16 = 8888;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("transient network error: {0}")]
    Transient(String),
    #[error(transparent)]
    Framing(#[from] WireError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Connection-state signal (spec §7): `{Ready, Connecting, Connected,
/// Disconnected, Failed(reason)}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Ready,
    Connecting,
    Connected,
    Disconnected,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerState {
    Stopped,
    Listening,
    Connected,
    Disconnected,
}

/// Receives `InputSample`s forwarded off the receive context (spec §4.4:
/// "forwards... to a registered sink on a main-context handler"). The
/// out-of-scope collaborator that actually injects pointer events into the
/// host OS implements this (spec §1 Non-goals).
pub trait InputSink: Send {
    fn on_input(&mut self, sample: InputSample);
}

pub trait ConnectionObserver: Send {
    fn on_state_changed(&mut self, state: ConnectionState);
}

struct NoopInputSink;
impl InputSink for NoopInputSink {
    fn on_input(&mut self, _sample: InputSample) {}
}

struct NoopConnectionObserver;
impl ConnectionObserver for NoopConnectionObserver {
    fn on_state_changed(&mut self, _state: ConnectionState) {}
}

struct Session {
    stream: TcpStream,
    stop: Arc<std::sync::atomic::AtomicBool>,
    receiver: Option<JoinHandle<()>>,
}

impl Session {
    fn evict(mut self) {
        self.stop.store(true, std::sync::atomic::Ordering::SeqCst);
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
        if let Some(receiver) = self.receiver.take() {
            let _ = receiver.join();
        }
    }
}

/// Owns the listening socket, the at-most-one active connection, and the
/// authoritative `DisplayConfig` the host re-sends whenever rotation
/// changes (spec §4.4 "Rotation live-update").
pub struct Server {
    listener: Mutex<Option<TcpListener>>,
    session: Mutex<Option<Session>>,
    state: Mutex<ServerState>,
    display_config: Mutex<DisplayConfig>,
    input_sink: Mutex<Box<dyn InputSink>>,
    observer: Mutex<Box<dyn ConnectionObserver>>,
}

impl Server {
    pub fn new(initial_config: DisplayConfig) -> Self {
        Self {
            listener: Mutex::new(None),
            session: Mutex::new(None),
            state: Mutex::new(ServerState::Stopped),
            display_config: Mutex::new(initial_config),
            input_sink: Mutex::new(Box::new(NoopInputSink)),
            observer: Mutex::new(Box::new(NoopConnectionObserver)),
        }
    }

    pub fn set_input_sink(&self, sink: Box<dyn InputSink>) {
        *self.input_sink.lock().unwrap() = sink;
    }

    pub fn set_connection_observer(&self, observer: Box<dyn ConnectionObserver>) {
        *self.observer.lock().unwrap() = observer;
    }

    fn set_state(&self, state: ConnectionState) {
        self.observer.lock().unwrap().on_state_changed(state);
    }

    /// `STOPPED → LISTENING` (spec §4.4). Binds the listener but does not
    /// block; callers drive the accept loop via `accept_loop` on a
    /// dedicated network-dispatch context (spec §5).
    pub fn listen(self: &Arc<Self>, port: u16) -> Result<(), ServerError> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        *self.listener.lock().unwrap() = Some(listener);
        *self.state.lock().unwrap() = ServerState::Listening;
        self.set_state(ConnectionState::Ready);
        Ok(())
    }

    /// Runs forever on the calling thread, accepting connections and
    /// evicting any prior one (spec §4.4: "a second incoming connection
    /// evicts the first by cancelling it"). Intended to be the body of the
    /// network-dispatch context thread.
    pub fn accept_loop(self: &Arc<Self>) {
        loop {
            let accepted = {
                let guard = self.listener.lock().unwrap();
                match guard.as_ref() {
                    Some(listener) => listener.accept(),
                    None => return,
                }
            };
            match accepted {
                Ok((stream, addr)) => {
                    info!(%addr, "accepted connection");
                    self.install_session(stream);
                }
                Err(err) => {
                    warn!(error = %err, "accept failed");
                }
            }
        }
    }

    fn install_session(self: &Arc<Self>, stream: TcpStream) {
        if let Err(err) = stream.set_nodelay(true) {
            warn!(error = %err, "failed to disable Nagle coalescing");
        }

        let previous = self.session.lock().unwrap().take();
        if let Some(previous) = previous {
            info!("evicting prior connection for the new one");
            previous.evict();
        }

        let write_stream = match stream.try_clone() {
            Ok(s) => s,
            Err(err) => {
                warn!(error = %err, "failed to clone stream for receive loop");
                return;
            }
        };

        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let owner = Arc::clone(self);
        let receiver_stop = Arc::clone(&stop);
        let receiver = thread::Builder::new()
            .name("server-receive".to_string())
            .spawn(move || owner.run_receive_loop(write_stream, receiver_stop))
            .ok();

        *self.session.lock().unwrap() = Some(Session {
            stream,
            stop,
            receiver,
        });
        *self.state.lock().unwrap() = ServerState::Connected;
        self.set_state(ConnectionState::Connected);

        let config = *self.display_config.lock().unwrap();
        if let Err(err) = self.send_display_config(config) {
            warn!(error = %err, "failed to send initial DisplayConfig");
        }
    }

    /// Single-reader receive loop for input + ping (spec §4.4 Receive
    /// path). Runs until the stream is closed or evicted.
    fn run_receive_loop(
        self: Arc<Self>,
        mut write_half: TcpStream,
        stop: Arc<std::sync::atomic::AtomicBool>,
    ) {
        let mut read_half = match write_half.try_clone() {
            Ok(s) => s,
            Err(_) => return,
        };
        while !stop.load(std::sync::atomic::Ordering::SeqCst) {
            let msg_type = match wire::read_u8(&mut read_half) {
                Ok(b) => b,
                Err(_) => break,
            };
            let message = match wire::read_client_message_body(&mut read_half, msg_type) {
                Ok(m) => m,
                Err(err) => {
                    warn!(error = %err, "framing error on receive path; closing connection");
                    break;
                }
            };
            match message {
                ClientMessage::Input(sample) => {
                    self.input_sink.lock().unwrap().on_input(sample);
                }
                ClientMessage::Ping { client_timestamp } => {
                    if let Err(err) = wire::write_pong(&mut write_half, client_timestamp) {
                        warn!(error = %err, "failed to echo Pong");
                        break;
                    }
                }
            }
        }
        self.on_disconnected();
    }

    fn on_disconnected(&self) {
        *self.state.lock().unwrap() = ServerState::Disconnected;
        *self.session.lock().unwrap() = None;
        self.set_state(ConnectionState::Disconnected);
        *self.state.lock().unwrap() = ServerState::Listening;
    }

    /// Send path (video): one encoded frame per call (spec §4.4). With
    /// all-intra encoding every frame is a keyframe, so the
    /// keyframe-never-dropped clause always applies — this never silently
    /// discards a frame under backpressure, it simply lets the write block
    /// or fail.
    pub fn send_frame(&self, bytes: &[u8]) -> Result<(), ServerError> {
        let mut guard = self.session.lock().unwrap();
        let Some(session) = guard.as_mut() else {
            return Ok(());
        };
        wire::write_video_frame(&mut session.stream, bytes)?;
        Ok(())
    }

    fn send_display_config(&self, config: DisplayConfig) -> Result<(), ServerError> {
        let mut guard = self.session.lock().unwrap();
        let Some(session) = guard.as_mut() else {
            return Ok(());
        };
        wire::write_display_config(
            &mut session.stream,
            config.width,
            config.height,
            config.rotation.degrees(),
        )?;
        Ok(())
    }

    /// `update_rotation(r)` (spec §4.4): rewrites the internal state and
    /// re-sends `DisplayConfig` so the client rotates without reconnecting.
    pub fn update_rotation(&self, config: DisplayConfig) -> Result<(), ServerError> {
        *self.display_config.lock().unwrap() = config;
        self.send_display_config(config)
    }

    pub fn is_connected(&self) -> bool {
        *self.state.lock().unwrap() == ServerState::Connected
    }

    /// The bound listener's local port, useful for tests that bind to port
    /// 0 and need the OS-assigned ephemeral port back.
    pub fn local_port(&self) -> Option<u16> {
        self.listener
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
            .map(|addr| addr.port())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::Rotation;
    use std::io::Read;
    use std::net::TcpStream as ClientStream;
    use std::time::Duration;

    fn test_config() -> DisplayConfig {
        DisplayConfig::new(1920, 1080, Rotation::Deg0)
    }

    #[test]
    fn accept_sends_display_config_immediately() {
        let server = Arc::new(Server::new(test_config()));
        server.listen(0).unwrap();
        let port = server
            .listener
            .lock()
            .unwrap()
            .as_ref()
            .unwrap()
            .local_addr()
            .unwrap()
            .port();

        let server_clone = Arc::clone(&server);
        thread::spawn(move || server_clone.accept_loop());

        let mut client = ClientStream::connect(("127.0.0.1", port)).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        let mut msg_type = [0u8; 1];
        client.read_exact(&mut msg_type).unwrap();
        assert_eq!(msg_type[0], 1); // DisplayConfig
    }

    #[test]
    fn send_frame_without_connection_is_a_noop() {
        let server = Server::new(test_config());
        assert!(server.send_frame(&[0, 0, 0, 1, 0x26]).is_ok());
    }
}
