//! Wire-format definitions for PPCB packages.
//!
//! Every message exchanged between client and server is a [`Package`].  This
//! module is responsible for:
//! - Defining the on-wire binary layout of each package variant.
//! - Serialising a [`Package`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Package`], returning errors
//!   for malformed, truncated, or unknown input.
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.  There is no padding; the
//! discriminant byte always comes first and every variant except DATA has a
//! fixed size.
//!
//! ```text
//!  id │ variant  │ layout after the id byte                     │ total
//! ────┼──────────┼──────────────────────────────────────────────┼──────
//!   1 │ CONN     │ session_id(8) protocol(1) total_length(8)    │ 18
//!   2 │ CONNACC  │ session_id(8)                                │ 9
//!   3 │ CONNRJT  │ session_id(8)                                │ 9
//!   4 │ DATA     │ session_id(8) pack_id(8) byte_len(4) payload │ 21 + byte_len
//!   5 │ ACC      │ session_id(8) pack_id(8)                     │ 17
//!   6 │ RJT      │ session_id(8) pack_id(8)                     │ 17
//!   7 │ RCVD     │ session_id(8)                                │ 9
//! ```

/// Discriminant byte of each package variant.
pub mod ids {
    /// Connection request (client → server).
    pub const CONN: u8 = 1;
    /// Connection accepted (server → client).
    pub const CONNACC: u8 = 2;
    /// Connection rejected (server → client).
    pub const CONNRJT: u8 = 3;
    /// One chunk of the payload (client → server).
    pub const DATA: u8 = 4;
    /// Chunk acknowledged, UDPR only (server → client).
    pub const ACC: u8 = 5;
    /// Chunk rejected; the session is over (server → client).
    pub const RJT: u8 = 6;
    /// Whole payload received (server → client).
    pub const RCVD: u8 = 7;
}

/// Values of the CONN `protocol` byte.
pub mod protocol {
    /// Plain UDP, fire-and-forget chunks.
    pub const UDP: u8 = 2;
    /// UDP with per-chunk acknowledgement and retransmission.
    pub const UDPR: u8 = 3;
    /// TCP shares the UDPR designator.
    pub const TCP: u8 = 3;
}

/// Largest payload carried by a single DATA package.
pub const MAX_CHUNK: usize = 64_000;

/// Size of CONN on the wire.
pub const CONN_LEN: usize = 18;
/// Size of CONNACC, CONNRJT and RCVD on the wire.
pub const SESSION_LEN: usize = 9;
/// Size of ACC and RJT on the wire.
pub const PACK_LEN: usize = 17;
/// Size of the DATA header preceding the payload.
pub const DATA_HEADER_LEN: usize = 21;
/// Largest datagram a peer can legitimately send.
pub const MAX_PACKAGE_LEN: usize = DATA_HEADER_LEN + MAX_CHUNK;

const OFF_ID: usize = 0;
const OFF_SESSION: usize = 1;
const OFF_PROTOCOL: usize = 9;
const OFF_LENGTH: usize = 10;
const OFF_PACK_ID: usize = 9;
const OFF_BYTE_LEN: usize = 17;

/// A single protocol message.
///
/// Fields are in host byte order; [`Package::encode`] converts to big-endian
/// on the wire and [`Package::decode`] converts back.  DATA carries no
/// explicit `byte_len` field: it is always the length of `payload`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Package {
    Conn {
        session_id: u64,
        protocol: u8,
        length: u64,
    },
    ConnAcc {
        session_id: u64,
    },
    ConnRjt {
        session_id: u64,
    },
    Data {
        session_id: u64,
        pack_id: u64,
        payload: Vec<u8>,
    },
    Acc {
        session_id: u64,
        pack_id: u64,
    },
    Rjt {
        session_id: u64,
        pack_id: u64,
    },
    Rcvd {
        session_id: u64,
    },
}

impl Package {
    /// Discriminant byte written first on the wire.
    pub fn id(&self) -> u8 {
        match self {
            Package::Conn { .. } => ids::CONN,
            Package::ConnAcc { .. } => ids::CONNACC,
            Package::ConnRjt { .. } => ids::CONNRJT,
            Package::Data { .. } => ids::DATA,
            Package::Acc { .. } => ids::ACC,
            Package::Rjt { .. } => ids::RJT,
            Package::Rcvd { .. } => ids::RCVD,
        }
    }

    /// Session the package belongs to.  Every variant carries one.
    pub fn session_id(&self) -> u64 {
        match *self {
            Package::Conn { session_id, .. }
            | Package::ConnAcc { session_id }
            | Package::ConnRjt { session_id }
            | Package::Data { session_id, .. }
            | Package::Acc { session_id, .. }
            | Package::Rjt { session_id, .. }
            | Package::Rcvd { session_id } => session_id,
        }
    }

    /// Short upper-case name used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Package::Conn { .. } => "CONN",
            Package::ConnAcc { .. } => "CONNACC",
            Package::ConnRjt { .. } => "CONNRJT",
            Package::Data { .. } => "DATA",
            Package::Acc { .. } => "ACC",
            Package::Rjt { .. } => "RJT",
            Package::Rcvd { .. } => "RCVD",
        }
    }

    /// Serialise this package into a newly allocated byte vector.
    ///
    /// Fails only for a DATA payload larger than [`MAX_CHUNK`].
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.push(self.id());
        buf.extend_from_slice(&self.session_id().to_be_bytes());

        match self {
            Package::Conn {
                protocol, length, ..
            } => {
                buf.push(*protocol);
                buf.extend_from_slice(&length.to_be_bytes());
            }
            Package::Data {
                pack_id, payload, ..
            } => {
                if payload.len() > MAX_CHUNK {
                    return Err(PacketError::PayloadTooLarge(payload.len()));
                }
                buf.extend_from_slice(&pack_id.to_be_bytes());
                buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
                buf.extend_from_slice(payload);
            }
            Package::Acc { pack_id, .. } | Package::Rjt { pack_id, .. } => {
                buf.extend_from_slice(&pack_id.to_be_bytes());
            }
            Package::ConnAcc { .. } | Package::ConnRjt { .. } | Package::Rcvd { .. } => {}
        }

        Ok(buf)
    }

    /// Number of bytes [`Package::encode`] produces.
    pub fn encoded_len(&self) -> usize {
        match self {
            Package::Data { payload, .. } => DATA_HEADER_LEN + payload.len(),
            other => fixed_len(other.id()).unwrap_or(0),
        }
    }

    /// Parse a [`Package`] from a raw byte slice holding exactly one package.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is empty or its id byte is unknown,
    /// - `buf` is shorter than the fixed size for that id,
    /// - a fixed-size package carries trailing bytes, or
    /// - the DATA `byte_len` field disagrees with the payload actually present.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        let id = *buf.get(OFF_ID).ok_or(PacketError::Truncated)?;
        let need = fixed_len(id).ok_or(PacketError::UnknownVariant(id))?;
        if buf.len() < need {
            return Err(PacketError::Truncated);
        }
        if id != ids::DATA && buf.len() != need {
            return Err(PacketError::LengthMismatch);
        }

        let session_id = be_u64(buf, OFF_SESSION);
        let package = match id {
            ids::CONN => Package::Conn {
                session_id,
                protocol: buf[OFF_PROTOCOL],
                length: be_u64(buf, OFF_LENGTH),
            },
            ids::CONNACC => Package::ConnAcc { session_id },
            ids::CONNRJT => Package::ConnRjt { session_id },
            ids::DATA => {
                let byte_len = data_byte_len(buf)?;
                if buf.len() != DATA_HEADER_LEN + byte_len {
                    return Err(PacketError::LengthMismatch);
                }
                Package::Data {
                    session_id,
                    pack_id: be_u64(buf, OFF_PACK_ID),
                    payload: buf[DATA_HEADER_LEN..].to_vec(),
                }
            }
            ids::ACC => Package::Acc {
                session_id,
                pack_id: be_u64(buf, OFF_PACK_ID),
            },
            ids::RJT => Package::Rjt {
                session_id,
                pack_id: be_u64(buf, OFF_PACK_ID),
            },
            ids::RCVD => Package::Rcvd { session_id },
            other => return Err(PacketError::UnknownVariant(other)),
        };
        Ok(package)
    }
}

/// Fixed on-wire size for the package with discriminant `id`.
///
/// For DATA this is the header size only.  Stream transports use it to know
/// how many bytes to read before the variant can be decoded.
pub fn fixed_len(id: u8) -> Option<usize> {
    match id {
        ids::CONN => Some(CONN_LEN),
        ids::CONNACC | ids::CONNRJT | ids::RCVD => Some(SESSION_LEN),
        ids::DATA => Some(DATA_HEADER_LEN),
        ids::ACC | ids::RJT => Some(PACK_LEN),
        _ => None,
    }
}

/// Read and bound-check the `byte_len` field of a DATA header.
pub fn data_byte_len(header: &[u8]) -> Result<usize, PacketError> {
    if header.len() < DATA_HEADER_LEN {
        return Err(PacketError::Truncated);
    }
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&header[OFF_BYTE_LEN..OFF_BYTE_LEN + 4]);
    let byte_len = u32::from_be_bytes(raw) as usize;
    if byte_len > MAX_CHUNK {
        return Err(PacketError::PayloadTooLarge(byte_len));
    }
    Ok(byte_len)
}

fn be_u64(buf: &[u8], off: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[off..off + 8]);
    u64::from_be_bytes(raw)
}

/// Errors that can arise when parsing a raw package.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    /// Buffer shorter than the fixed size of the claimed variant.
    #[error("buffer too short for the claimed package type")]
    Truncated,
    /// Trailing bytes, or a DATA `byte_len` that disagrees with the payload.
    #[error("package length does not match its declared layout")]
    LengthMismatch,
    /// The id byte names no known variant.
    #[error("unknown package id {0}")]
    UnknownVariant(u8),
    /// A DATA payload above [`MAX_CHUNK`].
    #[error("payload of {0} bytes exceeds the chunk limit")]
    PayloadTooLarge(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(pack_id: u64, payload: &[u8]) -> Package {
        Package::Data {
            session_id: 0xdead_beef,
            pack_id,
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn every_variant_roundtrips() {
        let all = [
            Package::Conn {
                session_id: u64::MAX,
                protocol: protocol::UDPR,
                length: 150_000,
            },
            Package::ConnAcc { session_id: 0 },
            Package::ConnRjt { session_id: 7 },
            data(3, b"hello"),
            Package::Acc {
                session_id: 1,
                pack_id: u64::MAX,
            },
            Package::Rjt {
                session_id: 2,
                pack_id: 0,
            },
            Package::Rcvd { session_id: 42 },
        ];
        for pkg in all {
            let bytes = pkg.encode().unwrap();
            assert_eq!(bytes.len(), pkg.encoded_len());
            assert_eq!(Package::decode(&bytes).unwrap(), pkg);
        }
    }

    #[test]
    fn id_byte_comes_first() {
        let bytes = Package::Rcvd { session_id: 1 }.encode().unwrap();
        assert_eq!(bytes[0], ids::RCVD);
        assert_eq!(bytes.len(), SESSION_LEN);
    }

    #[test]
    fn conn_fields_big_endian_on_wire() {
        let bytes = Package::Conn {
            session_id: 0x0102_0304_0506_0708,
            protocol: protocol::UDP,
            length: 0x1112_1314_1516_1718,
        }
        .encode()
        .unwrap();
        assert_eq!(bytes.len(), CONN_LEN);
        assert_eq!(&bytes[1..9], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(bytes[9], 2);
        assert_eq!(&bytes[10..18], &[0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18]);
    }

    #[test]
    fn data_header_layout() {
        let bytes = data(0x0a0b, b"xyz").encode().unwrap();
        assert_eq!(bytes.len(), DATA_HEADER_LEN + 3);
        assert_eq!(&bytes[9..17], &[0, 0, 0, 0, 0, 0, 0x0a, 0x0b]);
        assert_eq!(&bytes[17..21], &[0, 0, 0, 3]);
        assert_eq!(&bytes[21..], b"xyz");
    }

    #[test]
    fn decode_empty_buffer_returns_error() {
        assert_eq!(Package::decode(&[]), Err(PacketError::Truncated));
    }

    #[test]
    fn decode_unknown_id() {
        assert_eq!(
            Package::decode(&[9, 0, 0]),
            Err(PacketError::UnknownVariant(9))
        );
        assert_eq!(Package::decode(&[0]), Err(PacketError::UnknownVariant(0)));
    }

    #[test]
    fn decode_short_fixed_package() {
        let bytes = Package::Acc {
            session_id: 5,
            pack_id: 6,
        }
        .encode()
        .unwrap();
        assert_eq!(
            Package::decode(&bytes[..PACK_LEN - 1]),
            Err(PacketError::Truncated)
        );
    }

    #[test]
    fn decode_fixed_package_with_trailing_bytes() {
        let mut bytes = Package::ConnAcc { session_id: 5 }.encode().unwrap();
        bytes.push(0);
        assert_eq!(Package::decode(&bytes), Err(PacketError::LengthMismatch));
    }

    #[test]
    fn decode_truncated_payload_returns_error() {
        let mut bytes = data(0, b"data").encode().unwrap();
        bytes.pop(); // byte_len still claims 4 bytes, but buf is one short
        assert_eq!(Package::decode(&bytes), Err(PacketError::LengthMismatch));
    }

    #[test]
    fn decode_payload_longer_than_declared() {
        let mut bytes = data(0, b"data").encode().unwrap();
        bytes.push(b'!');
        assert_eq!(Package::decode(&bytes), Err(PacketError::LengthMismatch));
    }

    #[test]
    fn decode_rejects_oversized_byte_len() {
        let mut bytes = data(0, b"").encode().unwrap();
        bytes[17..21].copy_from_slice(&(MAX_CHUNK as u32 + 1).to_be_bytes());
        assert_eq!(
            Package::decode(&bytes),
            Err(PacketError::PayloadTooLarge(MAX_CHUNK + 1))
        );
    }

    #[test]
    fn encode_rejects_oversized_payload() {
        let pkg = data(0, &vec![0u8; MAX_CHUNK + 1]);
        assert_eq!(pkg.encode(), Err(PacketError::PayloadTooLarge(MAX_CHUNK + 1)));
    }

    #[test]
    fn full_chunk_fits_max_package() {
        let bytes = data(1, &vec![7u8; MAX_CHUNK]).encode().unwrap();
        assert_eq!(bytes.len(), MAX_PACKAGE_LEN);
    }

    #[test]
    fn fixed_len_table() {
        assert_eq!(fixed_len(ids::CONN), Some(18));
        assert_eq!(fixed_len(ids::RCVD), Some(9));
        assert_eq!(fixed_len(ids::RJT), Some(17));
        assert_eq!(fixed_len(ids::DATA), Some(21));
        assert_eq!(fixed_len(8), None);
    }
}
