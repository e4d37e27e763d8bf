//! Pool session: connection lifecycle, login and submission
//!
//! [`PoolSession::run`] owns the socket. It connects, logs in, turns inbound
//! frames into [`SessionEvent`]s and writes submissions that arrive through a
//! [`SessionHandle`]. Losing the connection clears the session id, emits
//! [`SessionEvent::Disconnected`] and retries after the reconnect delay until
//! shutdown.
//!
//! A submission that arrives while no session id is assigned is held and
//! written right after the next login acknowledgment, before any job carried
//! by that acknowledgment is announced.

use crate::dispatcher::SolutionSink;
use crate::protocol::{ClientRequest, Frame, JobParams, LoginParams, PoolCodec, PoolMessage, SubmitParams};
use crate::types::{Credentials, Solution};
use crate::{Error, Result};
use futures::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default delay between reconnect attempts
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Default timeout for opening the TCP connection
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of solutions held while logged out
pub const DEFAULT_MAX_PENDING: usize = 16;

/// Events published by the session
#[derive(Debug)]
pub enum SessionEvent {
    /// TCP connection established
    Connected { host: String, ip: IpAddr },
    /// Login acknowledged; submissions are now possible
    LoggedIn { session_id: String },
    /// A job was pushed or delivered with the login acknowledgment
    Job(JobParams),
    /// The pool accepted a share
    ShareAccepted,
    /// The pool answered with an error, carried as [`Error::PoolRejection`]
    Rejected(Error),
    /// An inbound line could not be used; the session continues
    Error(Error),
    /// The connection ended; a reconnect follows unless shutting down
    Disconnected { reason: String },
}

/// Session settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub credentials: Credentials,
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
    pub max_pending: usize,
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, port: u16, credentials: Credentials) -> Self {
        Self {
            host: host.into(),
            port,
            credentials,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_pending: DEFAULT_MAX_PENDING,
        }
    }
}

/// Open connection with the login request already written
#[derive(Debug)]
pub struct Connection {
    framed: Framed<TcpStream, PoolCodec>,
    peer: SocketAddr,
}

impl Connection {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

/// Resolve `host`, connect and send the login request
#[instrument(skip(credentials), fields(wallet = %credentials.wallet))]
pub async fn connect(host: &str, port: u16, credentials: &Credentials) -> Result<Connection> {
    let addrs: Vec<SocketAddr> = lookup_host((host, port))
        .await
        .map_err(|e| Error::resolution(host, e.to_string()))?
        .collect();
    if addrs.is_empty() {
        return Err(Error::resolution(host, "no addresses returned"));
    }

    let mut last_error = None;
    for addr in addrs {
        debug!("Connecting to {}", addr);
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Failed to set TCP_NODELAY on {}: {}", addr, e);
                }
                let mut framed = Framed::new(stream, PoolCodec::new());
                framed
                    .send(ClientRequest::Login(LoginParams::from(credentials)))
                    .await
                    .map_err(|e| Error::connection(format!("Failed to send login to {}: {}", addr, e)))?;
                info!("Connected to {} ({}), login sent", host, addr);
                return Ok(Connection { framed, peer: addr });
            }
            Err(e) => {
                warn!("Connection to {} failed: {}", addr, e);
                last_error = Some(e);
            }
        }
    }

    Err(Error::connection(format!(
        "Unable to connect to {}:{}: {}",
        host,
        port,
        last_error.map(|e| e.to_string()).unwrap_or_default()
    )))
}

/// Cloneable submission handle for a running session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    submissions: mpsc::UnboundedSender<Solution>,
}

impl SessionHandle {
    /// Queue a solution for submission
    pub fn submit(&self, solution: Solution) -> Result<()> {
        self.submissions
            .send(solution)
            .map_err(|_| Error::invalid_state("pool session has stopped"))
    }
}

impl SolutionSink for SessionHandle {
    fn submit(&self, solution: Solution) {
        if let Err(e) = SessionHandle::submit(self, solution) {
            warn!("Dropping solution: {}", e);
        }
    }
}

/// Long-lived pool session
pub struct PoolSession {
    config: SessionConfig,
    events: mpsc::UnboundedSender<SessionEvent>,
    submissions: mpsc::UnboundedReceiver<Solution>,
    session_id: Option<String>,
    pending: VecDeque<Solution>,
    shutdown: CancellationToken,
}

impl PoolSession {
    /// Create a session, its submission handle and its event stream
    pub fn new(
        config: SessionConfig,
        shutdown: CancellationToken,
    ) -> (Self, SessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (submissions_tx, submissions) = mpsc::unbounded_channel();
        let session = Self {
            config,
            events,
            submissions,
            session_id: None,
            pending: VecDeque::new(),
            shutdown,
        };
        (session, SessionHandle { submissions: submissions_tx }, events_rx)
    }

    /// Connect, serve and reconnect until shutdown
    pub async fn run(mut self) {
        info!(
            "Starting pool session for {}:{}",
            self.config.host, self.config.port
        );

        while !self.shutdown.is_cancelled() {
            let reason = match self.serve().await {
                Ok(()) => break,
                Err(e) => {
                    if e.is_retryable() {
                        error!("Pool connection lost: {}", e);
                    } else {
                        error!("Pool session failed ({}): {}", e.category(), e);
                    }
                    e.to_string()
                }
            };

            self.session_id = None;
            self.emit(SessionEvent::Disconnected { reason });

            if !self.wait_reconnect().await {
                break;
            }
        }

        info!("Pool session stopped");
    }

    /// One connection's lifetime; `Ok` only on shutdown
    async fn serve(&mut self) -> Result<()> {
        let connecting = connect(&self.config.host, self.config.port, &self.config.credentials);
        let mut connection = tokio::select! {
            result = tokio::time::timeout(self.config.connect_timeout, connecting) => match result {
                Ok(connection) => connection?,
                Err(_) => {
                    return Err(Error::timeout(format!(
                        "connect to {}:{}",
                        self.config.host, self.config.port
                    )))
                }
            },
            _ = self.shutdown.cancelled() => return Ok(()),
        };

        self.emit(SessionEvent::Connected {
            host: self.config.host.clone(),
            ip: connection.peer_addr().ip(),
        });

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                frame = connection.framed.next() => match frame {
                    Some(Ok(frame)) => self.handle_frame(frame, &mut connection).await?,
                    Some(Err(e)) => return Err(e),
                    None if self.session_id.is_some() => {
                        return Err(Error::connection("pool closed the connection"))
                    }
                    None => return Err(Error::connection("connection closed before login completed")),
                },
                Some(solution) = self.submissions.recv() => {
                    self.submit_or_hold(solution, &mut connection).await?;
                }
            }
        }
    }

    /// Sleep out the reconnect delay, holding any submissions that arrive
    ///
    /// Returns `false` on shutdown.
    async fn wait_reconnect(&mut self) -> bool {
        info!("Reconnecting in {}", humantime::format_duration(self.config.reconnect_delay));
        let delay = tokio::time::sleep(self.config.reconnect_delay);
        tokio::pin!(delay);

        loop {
            tokio::select! {
                _ = &mut delay => return true,
                _ = self.shutdown.cancelled() => return false,
                Some(solution) = self.submissions.recv() => self.hold(solution),
            }
        }
    }

    async fn handle_frame(&mut self, frame: Frame, connection: &mut Connection) -> Result<()> {
        match frame {
            Frame::Message(message) => self.handle_message(message, connection).await,
            Frame::Malformed { line, error } => {
                warn!("Discarding malformed line from pool: {}", error);
                debug!(line = %line, "Malformed line");
                self.emit(SessionEvent::Error(error));
                Ok(())
            }
        }
    }

    async fn handle_message(&mut self, message: PoolMessage, connection: &mut Connection) -> Result<()> {
        debug!(?message, "Received from pool");

        if let Some(session_id) = message.session_id() {
            info!("Logged in to pool, session id {}", session_id);
            self.session_id = Some(session_id.to_string());
            self.emit(SessionEvent::LoggedIn {
                session_id: session_id.to_string(),
            });
            self.flush_pending(connection).await?;
        }

        if message.is_share_accepted() {
            info!("Share accepted");
            self.emit(SessionEvent::ShareAccepted);
        }

        match message.job() {
            Some(Ok(job)) => self.emit(SessionEvent::Job(job)),
            Some(Err(e)) => {
                warn!("Ignoring job: {}", e);
                self.emit(SessionEvent::Error(e));
            }
            None => {}
        }

        if let Some(rejection) = message.rejection() {
            warn!("{}", rejection);
            self.emit(SessionEvent::Rejected(rejection));
        }

        Ok(())
    }

    async fn submit_or_hold(&mut self, solution: Solution, connection: &mut Connection) -> Result<()> {
        match self.session_id.clone() {
            Some(session_id) => self.write_submit(&session_id, solution, connection).await,
            None => {
                self.hold(solution);
                Ok(())
            }
        }
    }

    async fn flush_pending(&mut self, connection: &mut Connection) -> Result<()> {
        let Some(session_id) = self.session_id.clone() else {
            return Ok(());
        };
        if !self.pending.is_empty() {
            info!("Submitting {} held solutions", self.pending.len());
        }
        while let Some(solution) = self.pending.pop_front() {
            self.write_submit(&session_id, solution, connection).await?;
        }
        Ok(())
    }

    /// Write one submit request; a failed write puts the solution back on hold
    async fn write_submit(
        &mut self,
        session_id: &str,
        solution: Solution,
        connection: &mut Connection,
    ) -> Result<()> {
        let request = ClientRequest::Submit(SubmitParams::new(session_id, &solution));
        match connection.framed.send(request).await {
            Ok(()) => {
                info!(
                    job_id = %solution.job_id,
                    nonce = %solution.nonce,
                    "Submitted solution"
                );
                Ok(())
            }
            Err(e) => {
                self.pending.push_front(solution);
                Err(e)
            }
        }
    }

    fn hold(&mut self, solution: Solution) {
        info!(
            job_id = %solution.job_id,
            nonce = %solution.nonce,
            "Not logged in, holding solution until the next login"
        );
        self.pending.push_back(solution);
        while self.pending.len() > self.config.max_pending {
            if let Some(dropped) = self.pending.pop_front() {
                warn!(job_id = %dropped.job_id, "Held solution queue full, dropping oldest");
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!("Session event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Nonce;
    use assert_matches::assert_matches;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    fn credentials() -> Credentials {
        Credentials {
            wallet: "wallet".to_string(),
            password: "x".to_string(),
            worker_id: "001".to_string(),
            agent: "node-rx/0.1".to_string(),
        }
    }

    fn solution(job_id: &str, nonce: u32) -> Solution {
        Solution {
            job_id: job_id.to_string(),
            nonce: Nonce::new(nonce),
            digest: [0xab; 32],
        }
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
        timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for session event")
            .expect("session event channel closed")
    }

    async fn read_request(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>) -> ClientRequest {
        let mut line = String::new();
        timeout(Duration::from_secs(5), reader.read_line(&mut line))
            .await
            .expect("timed out waiting for request")
            .unwrap();
        ClientRequest::from_json(line.trim_end()).unwrap()
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = connect("127.0.0.1", port, &credentials()).await;
        assert_matches!(result, Err(Error::Connection { .. }));
    }

    #[tokio::test]
    async fn test_login_then_job_and_submit() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let shutdown = CancellationToken::new();
        let (session, handle, mut events) =
            PoolSession::new(SessionConfig::new("127.0.0.1", port, credentials()), shutdown.clone());
        let session_task = tokio::spawn(session.run());

        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut reader = BufReader::new(read);

        assert_matches!(
            read_request(&mut reader).await,
            ClientRequest::Login(LoginParams { login, rigid, .. }) if login == "wallet" && rigid == "001"
        );
        assert_matches!(next_event(&mut events).await, SessionEvent::Connected { .. });

        write
            .write_all(b"{\"id\":1,\"result\":{\"id\":\"sid-1\",\"job\":{\"job_id\":\"j1\",\"blob\":\"0000000000\",\"target\":\"ff\"}}}\n")
            .await
            .unwrap();
        assert_matches!(next_event(&mut events).await, SessionEvent::LoggedIn { session_id } if session_id == "sid-1");
        assert_matches!(next_event(&mut events).await, SessionEvent::Job(job) if job.job_id.as_deref() == Some("j1"));

        handle.submit(solution("j1", 0x2a)).unwrap();
        assert_matches!(
            read_request(&mut reader).await,
            ClientRequest::Submit(SubmitParams { id, job_id, nonce, .. })
                if id == "sid-1" && job_id == "j1" && nonce == "2a"
        );

        write.write_all(b"not json\n{\"id\":1,\"result\":{\"status\":\"OK\"}}\n").await.unwrap();
        assert_matches!(next_event(&mut events).await, SessionEvent::Error(Error::ProtocolDecode { .. }));
        assert_matches!(next_event(&mut events).await, SessionEvent::ShareAccepted);

        write
            .write_all(b"{\"id\":1,\"error\":{\"code\":-1,\"message\":\"Low difficulty share\"}}\n")
            .await
            .unwrap();
        assert_matches!(next_event(&mut events).await, SessionEvent::Rejected(Error::PoolRejection { message }) if message == "Low difficulty share");

        shutdown.cancel();
        timeout(Duration::from_secs(5), session_task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_solution_held_until_login() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let shutdown = CancellationToken::new();
        let (session, handle, mut events) =
            PoolSession::new(SessionConfig::new("127.0.0.1", port, credentials()), shutdown.clone());
        let session_task = tokio::spawn(session.run());

        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut reader = BufReader::new(read);
        assert_matches!(read_request(&mut reader).await, ClientRequest::Login(_));
        assert_matches!(next_event(&mut events).await, SessionEvent::Connected { .. });

        handle.submit(solution("j0", 7)).unwrap();
        // Give the session a chance to pick the solution up before login
        tokio::time::sleep(Duration::from_millis(50)).await;

        write
            .write_all(b"{\"id\":1,\"result\":{\"id\":\"sid-2\",\"status\":\"OK\"}}\n")
            .await
            .unwrap();
        assert_matches!(next_event(&mut events).await, SessionEvent::LoggedIn { .. });
        assert_matches!(
            read_request(&mut reader).await,
            ClientRequest::Submit(SubmitParams { id, job_id, nonce, .. })
                if id == "sid-2" && job_id == "j0" && nonce == "7"
        );

        shutdown.cancel();
        timeout(Duration::from_secs(5), session_task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_non_utf8_line_keeps_session_open() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let shutdown = CancellationToken::new();
        let (session, _handle, mut events) =
            PoolSession::new(SessionConfig::new("127.0.0.1", port, credentials()), shutdown.clone());
        let session_task = tokio::spawn(session.run());

        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut reader = BufReader::new(read);
        assert_matches!(read_request(&mut reader).await, ClientRequest::Login(_));
        assert_matches!(next_event(&mut events).await, SessionEvent::Connected { .. });

        write
            .write_all(b"{\"id\":1,\"result\":{\"id\":\"sid-1\",\"status\":\"OK\"}}\n")
            .await
            .unwrap();
        assert_matches!(next_event(&mut events).await, SessionEvent::LoggedIn { .. });

        write.write_all(b"\xff\xfe\n{\"id\":1,\"result\":{\"status\":\"OK\"}}\n").await.unwrap();
        assert_matches!(next_event(&mut events).await, SessionEvent::Error(Error::ProtocolDecode { .. }));
        assert_matches!(next_event(&mut events).await, SessionEvent::ShareAccepted);

        shutdown.cancel();
        timeout(Duration::from_secs(5), session_task).await.unwrap().unwrap();
        while let Ok(event) = events.try_recv() {
            assert!(!matches!(event, SessionEvent::Disconnected { .. }), "unexpected {:?}", event);
        }
    }

    #[tokio::test]
    async fn test_close_before_login_reports_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let shutdown = CancellationToken::new();
        let mut config = SessionConfig::new("127.0.0.1", port, credentials());
        config.reconnect_delay = Duration::from_millis(50);
        let (session, _handle, mut events) = PoolSession::new(config, shutdown.clone());
        let session_task = tokio::spawn(session.run());

        let (socket, _) = listener.accept().await.unwrap();
        let (read, write) = socket.into_split();
        let mut reader = BufReader::new(read);
        assert_matches!(read_request(&mut reader).await, ClientRequest::Login(_));
        drop(reader);
        drop(write);

        assert_matches!(next_event(&mut events).await, SessionEvent::Connected { .. });
        assert_matches!(
            next_event(&mut events).await,
            SessionEvent::Disconnected { reason } if reason.contains("before login")
        );

        // The session dials again after the delay
        let (_socket, _) = timeout(Duration::from_secs(5), listener.accept()).await.unwrap().unwrap();
        assert_matches!(next_event(&mut events).await, SessionEvent::Connected { .. });

        shutdown.cancel();
        timeout(Duration::from_secs(5), session_task).await.unwrap().unwrap();
    }

    #[test]
    fn test_hold_queue_is_bounded() {
        let mut config = SessionConfig::new("127.0.0.1", 1, credentials());
        config.max_pending = 2;
        let (mut session, _handle, _events) = PoolSession::new(config, CancellationToken::new());

        session.hold(solution("a", 1));
        session.hold(solution("b", 2));
        session.hold(solution("c", 3));

        let held: Vec<_> = session.pending.iter().map(|s| s.job_id.as_str()).collect();
        assert_eq!(held, vec!["b", "c"]);
    }
}
