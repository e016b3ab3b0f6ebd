//! Fixed-layout wire packet.
//!
//! Every datagram is exactly [`WIRE_SIZE`] bytes, big-endian:
//!
//! ```text
//! [operation u32] [target_name 256] [payload 528] [integrity u32]
//! [payload_length u32] [transfer_id u32] [sequence u32] [flags u32]
//! ```
//!
//! The payload region is padded; only `payload_length` bytes are meaningful,
//! and a stated length beyond the region is clamped on decode.

use crate::error::{constants, ProtocolError, Result};
use crate::utils::checksum;
use bytes::{Buf, BufMut, BytesMut};

/// Largest plaintext chunk carried by one packet.
pub const TRANSFER_UNIT: usize = 512;

/// Authentication tag appended by the AEAD suite.
pub const SEAL_OVERHEAD: usize = 16;

/// Physical size of the payload region.
pub const PAYLOAD_CAPACITY: usize = TRANSFER_UNIT + SEAL_OVERHEAD;

/// Physical size of the null-padded name field.
pub const NAME_CAPACITY: usize = 256;

/// Longest usable target name, in bytes.
pub const MAX_NAME_LEN: usize = NAME_CAPACITY - 1;

/// Total encoded size of every packet.
pub const WIRE_SIZE: usize = 4 + NAME_CAPACITY + PAYLOAD_CAPACITY + 4 * 5;

/// Packet flag bits.
pub mod flags {
    /// Last chunk of a transfer.
    pub const FINAL: u32 = 0x1;
    /// Payload is a sealed file chunk rather than request/reply metadata.
    pub const DATA: u32 = 0x2;
}

/// Operation codes, as carried on the wire.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Read = 1,
    Write = 2,
    Delete = 3,
    Ack = 4,
    Error = 5,
}

impl OpCode {
    /// Operations that may open a new server session.
    pub fn is_request(self) -> bool {
        matches!(self, OpCode::Read | OpCode::Write | OpCode::Delete)
    }

    pub fn name(self) -> &'static str {
        match self {
            OpCode::Read => "RRQ",
            OpCode::Write => "WRQ",
            OpCode::Delete => "DEL",
            OpCode::Ack => "ACK",
            OpCode::Error => "ERROR",
        }
    }
}

impl TryFrom<u32> for OpCode {
    type Error = ProtocolError;

    fn try_from(code: u32) -> Result<Self> {
        match code {
            1 => Ok(OpCode::Read),
            2 => Ok(OpCode::Write),
            3 => Ok(OpCode::Delete),
            4 => Ok(OpCode::Ack),
            5 => Ok(OpCode::Error),
            other => Err(ProtocolError::UnknownOperation(other)),
        }
    }
}

/// One datagram's worth of protocol data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub operation: OpCode,
    pub target_name: String,
    pub payload: Vec<u8>,
    pub integrity_code: u32,
    pub transfer_id: u32,
    pub sequence: u32,
    pub flags: u32,
}

impl Packet {
    /// Empty packet for `operation` within transfer `transfer_id`.
    pub fn new(operation: OpCode, transfer_id: u32, sequence: u32) -> Self {
        Self {
            operation,
            target_name: String::new(),
            payload: Vec::new(),
            integrity_code: checksum::checksum(&[]),
            transfer_id,
            sequence,
            flags: 0,
        }
    }

    /// Set the target name, rejecting names that do not fit the field.
    pub fn with_name(mut self, name: &str) -> Result<Self> {
        if name.len() > MAX_NAME_LEN {
            return Err(ProtocolError::MalformedPacket(constants::ERR_NAME_TOO_LONG));
        }
        if name.contains('\0') {
            return Err(ProtocolError::MalformedPacket(constants::ERR_NAME_HAS_NUL));
        }
        self.target_name = name.to_owned();
        Ok(self)
    }

    /// Set the payload and stamp its integrity code.
    pub fn with_payload(mut self, payload: Vec<u8>) -> Result<Self> {
        if payload.len() > PAYLOAD_CAPACITY {
            return Err(ProtocolError::MalformedPacket(
                constants::ERR_PAYLOAD_TOO_LARGE,
            ));
        }
        self.integrity_code = checksum::checksum(&payload);
        self.payload = payload;
        Ok(self)
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags |= flags;
        self
    }

    pub fn is_final(&self) -> bool {
        self.flags & flags::FINAL != 0
    }

    pub fn is_data(&self) -> bool {
        self.flags & flags::DATA != 0
    }

    /// Check the payload against the carried integrity code.
    pub fn verify_integrity(&self) -> Result<()> {
        checksum::ensure(&self.payload, self.integrity_code)
    }

    /// Encode into the fixed wire layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(WIRE_SIZE);
        buf.put_u32(self.operation as u32);

        let name = self.target_name.as_bytes();
        let name_len = name.len().min(MAX_NAME_LEN);
        buf.put_slice(&name[..name_len]);
        buf.put_bytes(0, NAME_CAPACITY - name_len);

        let payload_len = self.payload.len().min(PAYLOAD_CAPACITY);
        buf.put_slice(&self.payload[..payload_len]);
        buf.put_bytes(0, PAYLOAD_CAPACITY - payload_len);

        buf.put_u32(self.integrity_code);
        buf.put_u32(payload_len as u32);
        buf.put_u32(self.transfer_id);
        buf.put_u32(self.sequence);
        buf.put_u32(self.flags);

        debug_assert_eq!(buf.len(), WIRE_SIZE);
        buf.to_vec()
    }

    /// Transfer id of a full-size datagram, readable even when the rest of the
    /// packet fails to decode.
    pub fn peek_transfer_id(bytes: &[u8]) -> Option<u32> {
        const OFFSET: usize = 4 + NAME_CAPACITY + PAYLOAD_CAPACITY + 8;
        let field = bytes.get(OFFSET..OFFSET + 4)?;
        Some(u32::from_be_bytes(field.try_into().ok()?))
    }

    /// Decode a datagram. Bytes past [`WIRE_SIZE`] are ignored.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < WIRE_SIZE {
            return Err(ProtocolError::MalformedPacket(constants::ERR_SHORT_PACKET));
        }

        let mut cursor = &bytes[..WIRE_SIZE];
        let operation = OpCode::try_from(cursor.get_u32())?;

        let (name_field, rest) = cursor.split_at(NAME_CAPACITY);
        let name_field = &name_field[..MAX_NAME_LEN];
        let name_end = name_field
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(name_field.len());
        let target_name = std::str::from_utf8(&name_field[..name_end])
            .map_err(|_| ProtocolError::MalformedPacket(constants::ERR_NAME_NOT_UTF8))?
            .to_owned();

        let (payload_field, mut rest) = rest.split_at(PAYLOAD_CAPACITY);
        let integrity_code = rest.get_u32();
        let stated_len = rest.get_u32() as usize;
        let transfer_id = rest.get_u32();
        let sequence = rest.get_u32();
        let flags = rest.get_u32();

        let payload = payload_field[..stated_len.min(PAYLOAD_CAPACITY)].to_vec();

        Ok(Self {
            operation,
            target_name,
            payload,
            integrity_code,
            transfer_id,
            sequence,
            flags,
        })
    }
}
