//! Core types for pool mining
//!
//! Jobs, targets, nonces and the search results that flow between the
//! session, the dispatcher and the search tasks.

use crate::protocol::JobParams;
use crate::{Error, Result};
use byteorder::{BigEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

/// Size of a proof-of-work digest in bytes
pub const DIGEST_SIZE: usize = 32;

/// Number of nonce bytes written at the end of the job blob
pub const NONCE_SIZE: usize = 4;

/// Exclusive upper bound of the 32-bit nonce space
pub const NONCE_SPACE: u64 = 1 << 32;

/// Proof-of-work digest produced by the hash primitive
pub type Digest = [u8; DIGEST_SIZE];

/// Mining target: a 256-bit unsigned threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Target {
    /// 256-bit value stored as 4 64-bit words, least significant first
    words: [u64; 4],
}

impl Target {
    /// Create a new target from words, least significant first
    pub fn new(words: [u64; 4]) -> Self {
        Self { words }
    }

    /// Parse a big-endian hex string of up to 64 digits
    ///
    /// Shorter strings are treated as numbers, so `"ff"` is 255.
    pub fn from_hex(s: &str) -> Result<Self> {
        if s.is_empty() || s.len() > DIGEST_SIZE * 2 {
            return Err(Error::job_validation(format!(
                "Invalid target hex length: expected 1-64 chars, got {}",
                s.len()
            )));
        }
        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::job_validation(format!(
                "Target contains non-hex characters: {}",
                s
            )));
        }

        let padded = format!("{:0>64}", s);
        let mut bytes = [0u8; DIGEST_SIZE];
        hex::decode_to_slice(&padded, &mut bytes)
            .map_err(|e| Error::job_validation(format!("Invalid hex in target: {}", e)))?;
        Ok(Self::from_be_bytes(&bytes))
    }

    /// Build a target from 32 big-endian bytes
    pub fn from_be_bytes(bytes: &[u8; DIGEST_SIZE]) -> Self {
        let mut cursor = Cursor::new(&bytes[..]);
        let mut words = [0u64; 4];
        for word in words.iter_mut().rev() {
            // Reading from a fixed 32-byte buffer cannot run short
            *word = cursor.read_u64::<BigEndian>().unwrap_or(0);
        }
        Self::new(words)
    }

    /// Check whether a digest, read as a big-endian integer, is strictly below this target
    pub fn is_met_by(&self, digest: &Digest) -> bool {
        Target::from_be_bytes(digest) < *self
    }

    /// Convert to a 64-digit big-endian hex string
    pub fn to_hex(&self) -> String {
        format!(
            "{:016x}{:016x}{:016x}{:016x}",
            self.words[3], self.words[2], self.words[1], self.words[0]
        )
    }

    /// Zero target (nothing qualifies)
    pub fn zero() -> Self {
        Self::new([0; 4])
    }
}

impl Ord for Target {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.words.iter().rev().cmp(other.words.iter().rev())
    }
}

impl PartialOrd for Target {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for Target {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// 32-bit proof-of-work nonce
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Nonce(pub u32);

impl Nonce {
    /// Create a new nonce
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    /// Get the nonce value
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Convert to bytes (little-endian), the layout written into the blob
    pub fn to_le_bytes(&self) -> [u8; NONCE_SIZE] {
        self.0.to_le_bytes()
    }

    /// Lowercase hex without prefix or padding, as the pool expects it
    pub fn to_hex(&self) -> String {
        format!("{:x}", self.0)
    }

    /// Parse the submit representation back into a nonce
    pub fn from_hex(s: &str) -> Result<Self> {
        u32::from_str_radix(s, 16)
            .map(Self)
            .map_err(|e| Error::protocol_decode(format!("Invalid nonce hex {:?}: {}", s, e)))
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Contiguous slice of the nonce space assigned to one search task
///
/// `end` is exclusive and may equal 2^32, which is why it is wider than a nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceRange {
    pub start: u32,
    pub end: u64,
}

impl NonceRange {
    /// Create a range, rejecting empty or out-of-space bounds
    pub fn new(start: u32, end: u64) -> Result<Self> {
        if end <= start as u64 || end > NONCE_SPACE {
            return Err(Error::invalid_state(format!(
                "Invalid nonce range [{}, {})",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Number of nonces in the range
    pub fn len(&self) -> u64 {
        self.end - self.start as u64
    }

    /// Ranges are never empty once constructed
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate the nonces in increasing order
    pub fn iter(&self) -> impl Iterator<Item = Nonce> {
        (self.start as u64..self.end).map(|n| Nonce::new(n as u32))
    }

    /// Split the full nonce space into `count` contiguous ranges
    ///
    /// Uses integer division; the final range absorbs the remainder so the
    /// union is exactly `[0, 0xFFFFFFFF]`.
    pub fn partition(count: usize) -> Result<Vec<Self>> {
        if count == 0 || count as u64 > NONCE_SPACE {
            return Err(Error::config(format!(
                "Worker count must be between 1 and 2^32, got {}",
                count
            )));
        }

        let count = count as u64;
        let chunk = NONCE_SPACE / count;
        (0..count)
            .map(|i| {
                let start = i * chunk;
                let end = if i == count - 1 { NONCE_SPACE } else { start + chunk };
                Self::new(start as u32, end)
            })
            .collect()
    }
}

impl fmt::Display for NonceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:08x}, {:09x})", self.start, self.end)
    }
}

/// Validated mining job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub job_id: String,
    pub blob: Vec<u8>,
    pub target: Target,
}

impl Job {
    /// Build a job from the pool's wire representation
    ///
    /// Any missing field, bad hex, or a blob too short to hold the nonce is
    /// a validation error.
    pub fn from_params(params: &JobParams) -> Result<Self> {
        let job_id = params
            .job_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::job_validation("missing job_id"))?;
        let blob_hex = params
            .blob
            .as_deref()
            .filter(|b| !b.is_empty())
            .ok_or_else(|| Error::job_validation(format!("job {} missing blob", job_id)))?;
        let target_hex = params
            .target
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::job_validation(format!("job {} missing target", job_id)))?;

        let blob = hex::decode(blob_hex)
            .map_err(|e| Error::job_validation(format!("job {} has invalid blob hex: {}", job_id, e)))?;
        if blob.len() < NONCE_SIZE {
            return Err(Error::job_validation(format!(
                "job {} blob is {} bytes, need at least {}",
                job_id,
                blob.len(),
                NONCE_SIZE
            )));
        }
        let target = Target::from_hex(target_hex)?;

        Ok(Self {
            job_id: job_id.to_string(),
            blob,
            target,
        })
    }

    /// Write `nonce` into the last four bytes of `candidate`
    ///
    /// `candidate` must be a copy of this job's blob.
    pub fn inject_nonce(candidate: &mut [u8], nonce: Nonce) {
        let offset = candidate.len() - NONCE_SIZE;
        candidate[offset..].copy_from_slice(&nonce.to_le_bytes());
    }
}

/// Winning nonce for a job, ready to submit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Solution {
    pub job_id: String,
    pub nonce: Nonce,
    pub digest: Digest,
}

impl Solution {
    /// Digest as lowercase hex
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest)
    }
}

/// Result of one search task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    /// A qualifying nonce was found
    Found(Solution),
    /// The range was scanned without success, or the hasher faulted
    Exhausted,
}

/// Pool login credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub wallet: String,
    pub password: String,
    pub worker_id: String,
    pub agent: String,
}
