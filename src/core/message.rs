//! Typed view over a verified [`Packet`].
//!
//! The wire carries a bare operation code plus a grab-bag of fields. Handlers
//! work on [`Message`] instead, where each variant holds only what that
//! operation means:
//!
//! | wire | flags | variant |
//! |---|---|---|
//! | Read, seq 0 | – | `Read { name, keys }` |
//! | Write, seq 0 | – | `Write { name, keys }` |
//! | Write, seq ≥ 1 | DATA | `WriteData { name, chunk }` |
//! | Delete | – | `Delete { name }` |
//! | Ack, seq ≥ 1 | DATA | `ReadData(chunk)` |
//! | Ack | – | `Ack { sequence, note }` |
//! | Error | – | `Error { reason }` |

use crate::core::packet::{flags, OpCode, Packet};
use crate::error::{constants, ProtocolError, Result};
use crate::utils::crypto::KeyMaterial;

/// A sealed slice of file content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub sequence: u32,
    pub last: bool,
    pub sealed: Vec<u8>,
}

impl Chunk {
    fn flags(&self) -> u32 {
        if self.last {
            flags::DATA | flags::FINAL
        } else {
            flags::DATA
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Read { name: String, keys: KeyMaterial },
    Write { name: String, keys: KeyMaterial },
    Delete { name: String },
    WriteData { name: String, chunk: Chunk },
    ReadData(Chunk),
    Ack { sequence: u32, note: String },
    Error { reason: String },
}

impl Message {
    pub fn operation(&self) -> OpCode {
        match self {
            Message::Read { .. } => OpCode::Read,
            Message::Write { .. } | Message::WriteData { .. } => OpCode::Write,
            Message::Delete { .. } => OpCode::Delete,
            Message::Ack { .. } | Message::ReadData(_) => OpCode::Ack,
            Message::Error { .. } => OpCode::Error,
        }
    }

    /// Verify integrity, then interpret the packet.
    pub fn from_packet(packet: &Packet) -> Result<Self> {
        packet.verify_integrity()?;

        let chunk = || -> Result<Chunk> {
            if packet.sequence == 0 {
                return Err(ProtocolError::MalformedPacket(
                    constants::ERR_DATA_SEQUENCE,
                ));
            }
            Ok(Chunk {
                sequence: packet.sequence,
                last: packet.is_final(),
                sealed: packet.payload.clone(),
            })
        };

        match packet.operation {
            OpCode::Read | OpCode::Write | OpCode::Delete if packet.target_name.is_empty() => {
                Err(ProtocolError::MalformedPacket(constants::ERR_MISSING_NAME))
            }
            OpCode::Read if packet.is_data() => Err(ProtocolError::UnexpectedMessage),
            OpCode::Read => Ok(Message::Read {
                name: packet.target_name.clone(),
                keys: KeyMaterial::from_bytes(&packet.payload)?,
            }),
            OpCode::Write if packet.is_data() => Ok(Message::WriteData {
                name: packet.target_name.clone(),
                chunk: chunk()?,
            }),
            OpCode::Write => Ok(Message::Write {
                name: packet.target_name.clone(),
                keys: KeyMaterial::from_bytes(&packet.payload)?,
            }),
            OpCode::Delete => Ok(Message::Delete {
                name: packet.target_name.clone(),
            }),
            OpCode::Ack if packet.is_data() => Ok(Message::ReadData(chunk()?)),
            OpCode::Ack => Ok(Message::Ack {
                sequence: packet.sequence,
                note: String::from_utf8_lossy(&packet.payload).into_owned(),
            }),
            OpCode::Error => Ok(Message::Error {
                reason: String::from_utf8_lossy(&packet.payload).into_owned(),
            }),
        }
    }

    /// Frame the message for transfer `transfer_id`.
    pub fn into_packet(self, transfer_id: u32) -> Result<Packet> {
        let operation = self.operation();
        match self {
            Message::Read { name, keys }
            | Message::Write { name, keys } => Packet::new(operation, transfer_id, 0)
                .with_name(&name)?
                .with_payload(keys.to_bytes()),
            Message::Delete { name } => Packet::new(operation, transfer_id, 0).with_name(&name),
            Message::WriteData { name, chunk } => {
                let flags = chunk.flags();
                Ok(Packet::new(operation, transfer_id, chunk.sequence)
                    .with_name(&name)?
                    .with_payload(chunk.sealed)?
                    .with_flags(flags))
            }
            Message::ReadData(chunk) => {
                let flags = chunk.flags();
                Ok(Packet::new(operation, transfer_id, chunk.sequence)
                    .with_payload(chunk.sealed)?
                    .with_flags(flags))
            }
            Message::Ack { sequence, note } => {
                Packet::new(operation, transfer_id, sequence).with_payload(note.into_bytes())
            }
            Message::Error { reason } => {
                Packet::new(operation, transfer_id, 0).with_payload(reason.into_bytes())
            }
        }
    }
}
