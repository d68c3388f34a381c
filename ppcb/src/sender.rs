//! Client transfer state.
//!
//! [`Transfer`] owns the payload, the session id and the position of the
//! chunk currently in flight.  It does **not** touch the socket;
//! [`crate::client::Client`] calls these methods and owns the actual
//! send/receive loop.
//!
//! # Chunking contract
//! - The payload is split into chunks of at most [`MAX_CHUNK`] bytes; only
//!   the last chunk may be shorter.
//! - Chunk `k` travels as DATA with `pack_id = k`, starting from 0.
//! - `total_length` in CONN is the sum of all chunk lengths.

use rand::Rng;

use crate::error::PpcbError;
use crate::packet::{Package, MAX_CHUNK};
use crate::state::Mode;
use crate::timer::{RetransmitConfig, Retransmitter};

/// Send-side state for one transfer.
#[derive(Debug)]
pub struct Transfer {
    session_id: u64,
    mode: Mode,
    payload: Vec<u8>,
    /// Pack id of the chunk being sent; equals the chunk count once all
    /// chunks are out.
    current_pack_id: u64,
    /// Consecutive-timeout budget for the current wait.
    pub retries: Retransmitter,
}

impl Transfer {
    /// Prepare a transfer with a uniformly random session id.
    ///
    /// An empty payload is refused: there is nothing to transfer.
    pub fn new(payload: Vec<u8>, mode: Mode, config: &RetransmitConfig) -> Result<Self, PpcbError> {
        let session_id: u64 = rand::rng().random();
        Self::with_session_id(payload, mode, config, session_id)
    }

    /// Prepare a transfer with a caller-chosen session id.  Zero is valid.
    pub fn with_session_id(
        payload: Vec<u8>,
        mode: Mode,
        config: &RetransmitConfig,
        session_id: u64,
    ) -> Result<Self, PpcbError> {
        if payload.is_empty() {
            return Err(PpcbError::InvalidArgument(
                "won't send an empty message".into(),
            ));
        }
        Ok(Self {
            session_id,
            mode,
            payload,
            current_pack_id: 0,
            retries: Retransmitter::new(config, mode.retransmits()),
        })
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Sum of all chunk lengths.
    pub fn total_length(&self) -> u64 {
        self.payload.len() as u64
    }

    /// Number of DATA packages the payload splits into.
    pub fn chunk_count(&self) -> u64 {
        self.payload.len().div_ceil(MAX_CHUNK) as u64
    }

    /// The chunks in order.
    pub fn chunks(&self) -> std::slice::Chunks<'_, u8> {
        self.payload.chunks(MAX_CHUNK)
    }

    /// Pack id of the chunk in flight.
    pub fn current_pack_id(&self) -> u64 {
        self.current_pack_id
    }

    /// `true` while the chunk in flight is the final one.
    pub fn is_last(&self) -> bool {
        self.current_pack_id + 1 == self.chunk_count()
    }

    /// `true` once every chunk has been handed out.
    pub fn is_finished(&self) -> bool {
        self.current_pack_id >= self.chunk_count()
    }

    /// CONN announcing this transfer.
    pub fn conn_package(&self) -> Package {
        Package::Conn {
            session_id: self.session_id,
            protocol: self.mode.protocol(),
            length: self.total_length(),
        }
    }

    /// DATA carrying chunk `pack_id`, or `None` past the end.
    pub fn data_package(&self, pack_id: u64) -> Option<Package> {
        let chunk = self.chunks().nth(usize::try_from(pack_id).ok()?)?;
        Some(Package::Data {
            session_id: self.session_id,
            pack_id,
            payload: chunk.to_vec(),
        })
    }

    /// DATA for the chunk in flight.
    pub fn current_package(&self) -> Option<Package> {
        self.data_package(self.current_pack_id)
    }

    /// The chunk in flight was delivered (or fired, for plain UDP and TCP);
    /// move on to the next one.
    pub fn advance(&mut self) {
        if !self.is_finished() {
            self.current_pack_id += 1;
        }
    }
}
