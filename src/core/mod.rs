//! # Core Protocol Components
//!
//! Wire packet, datagram codec and the typed message view.
//!
//! ## Components
//! - **Packet**: fixed-layout datagram with operation code, name, payload and integrity code
//! - **Codec**: Tokio codec so a UDP socket can be driven through `UdpFramed`
//! - **Message**: closed sum type over the five operations
//!
//! ## Wire Format
//! ```text
//! [Op(4)] [Name(256)] [Payload(528)] [Integrity(4)] [Len(4)] [Transfer(4)] [Seq(4)] [Flags(4)]
//! ```
//!
//! ## Safety
//! - Every datagram has the same size; short buffers are rejected
//! - Stated payload lengths are clamped to the payload region
//! - Integrity is checked before payload bytes are interpreted

pub mod codec;
pub mod message;
pub mod packet;
