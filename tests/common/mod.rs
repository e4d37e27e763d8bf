//! Shared fixtures: a deterministic hash engine and a scripted fake pool

#![allow(dead_code)]

use pool_mining_client::crypto::{HashEngine, PowHasher};
use pool_mining_client::protocol::ClientRequest;
use pool_mining_client::types::{Credentials, Digest, NONCE_SIZE};
use pool_mining_client::Result;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::time::timeout;

pub const IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Zero digest for `winner`, all ones for every other nonce
///
/// With a gate, every hash waits until the gate opens.
#[derive(Clone)]
pub struct StubEngine {
    pub winner: u32,
    pub calls: Arc<AtomicU64>,
    pub highest_nonce: Arc<AtomicU64>,
    pub gate: Option<Arc<AtomicBool>>,
}

impl StubEngine {
    pub fn new(winner: u32) -> Self {
        Self {
            winner,
            calls: Arc::new(AtomicU64::new(0)),
            highest_nonce: Arc::new(AtomicU64::new(0)),
            gate: None,
        }
    }

    pub fn gated(winner: u32) -> (Self, Arc<AtomicBool>) {
        let gate = Arc::new(AtomicBool::new(false));
        let mut engine = Self::new(winner);
        engine.gate = Some(Arc::clone(&gate));
        (engine, gate)
    }
}

struct StubHasher {
    engine: StubEngine,
}

impl HashEngine for StubEngine {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn create_hasher(&self) -> Result<Box<dyn PowHasher>> {
        Ok(Box::new(StubHasher {
            engine: self.clone(),
        }))
    }
}

impl PowHasher for StubHasher {
    fn hash(&mut self, input: &[u8]) -> Result<Digest> {
        if let Some(gate) = &self.engine.gate {
            while !gate.load(Ordering::Acquire) {
                std::thread::sleep(Duration::from_millis(1));
            }
        }

        let tail: [u8; NONCE_SIZE] = input[input.len() - NONCE_SIZE..].try_into().unwrap();
        let nonce = u32::from_le_bytes(tail);
        self.engine.calls.fetch_add(1, Ordering::Relaxed);
        self.engine
            .highest_nonce
            .fetch_max(nonce as u64, Ordering::Relaxed);

        if nonce == self.engine.winner {
            Ok([0u8; 32])
        } else {
            Ok([0xffu8; 32])
        }
    }
}

pub fn credentials() -> Credentials {
    Credentials {
        wallet: "test-wallet".to_string(),
        password: "x".to_string(),
        worker_id: "001".to_string(),
        agent: "node-rx/0.1".to_string(),
    }
}

/// One accepted client connection on the fake pool
pub struct PoolConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl PoolConnection {
    pub async fn accept(listener: &TcpListener) -> Self {
        let (socket, _) = timeout(IO_TIMEOUT, listener.accept())
            .await
            .expect("client did not connect")
            .unwrap();
        let (read, writer) = socket.into_split();
        Self {
            reader: BufReader::new(read),
            writer,
        }
    }

    /// Read the next request line
    pub async fn read_request(&mut self) -> ClientRequest {
        self.try_read_request(IO_TIMEOUT)
            .await
            .expect("no request from client")
    }

    /// Read the next request line, or `None` if nothing arrives in time
    pub async fn try_read_request(&mut self, wait: Duration) -> Option<ClientRequest> {
        let mut line = String::new();
        match timeout(wait, self.reader.read_line(&mut line)).await {
            Ok(Ok(0)) | Err(_) => None,
            Ok(Ok(_)) => Some(ClientRequest::from_json(line.trim_end()).unwrap()),
            Ok(Err(e)) => panic!("read failed: {}", e),
        }
    }

    pub async fn send(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }
}
