//! # Confidentiality Layer
//!
//! Per-transfer symmetric encryption of file chunks.
//!
//! ## Suites
//! - **XChaCha20-Poly1305** (default): 256-bit key, 192-bit IV generated fresh
//!   for every transfer. Each chunk is sealed under a nonce derived from the
//!   transfer IV and the chunk sequence, so no nonce repeats under one key.
//! - **Xor**: the legacy fixed-byte (0xAA) self-inverse transform. No key, no
//!   confidentiality. Servers refuse it unless explicitly allowed.
//!
//! Key material lives in [`KeyMaterial`], is zeroized on drop, and is never
//! written to disk.

use crate::core::packet::SEAL_OVERHEAD;
use crate::error::{constants, ProtocolError, Result};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Symmetric key length in bytes.
pub const KEY_LEN: usize = 32;

/// Per-transfer IV length in bytes.
pub const IV_LEN: usize = 24;

/// Encoded size of [`KeyMaterial`]: suite id, key, IV.
pub const KEY_MATERIAL_LEN: usize = 1 + KEY_LEN + IV_LEN;

/// Byte used by the legacy XOR transform.
pub const LEGACY_XOR_BYTE: u8 = 0xAA;

/// Cipher suite negotiated by the requester for one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CipherSuite {
    #[default]
    #[serde(rename = "xchacha20poly1305")]
    XChaCha20Poly1305,
    #[serde(rename = "xor")]
    Xor,
}

impl CipherSuite {
    pub fn id(self) -> u8 {
        match self {
            CipherSuite::XChaCha20Poly1305 => 1,
            CipherSuite::Xor => 2,
        }
    }

    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            1 => Ok(CipherSuite::XChaCha20Poly1305),
            2 => Ok(CipherSuite::Xor),
            _ => Err(ProtocolError::MalformedPacket(constants::ERR_UNKNOWN_SUITE)),
        }
    }

    /// Bytes added to each chunk by sealing.
    pub fn overhead(self) -> usize {
        match self {
            CipherSuite::XChaCha20Poly1305 => SEAL_OVERHEAD,
            CipherSuite::Xor => 0,
        }
    }
}

impl fmt::Display for CipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CipherSuite::XChaCha20Poly1305 => f.write_str("xchacha20poly1305"),
            CipherSuite::Xor => f.write_str("xor"),
        }
    }
}

/// Key and IV for one transfer, owned by the side that generated them.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    #[zeroize(skip)]
    suite: CipherSuite,
    key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
}

impl KeyMaterial {
    /// Generate fresh material from the OS RNG.
    pub fn generate(suite: CipherSuite) -> Result<Self> {
        let mut material = Self {
            suite,
            key: [0u8; KEY_LEN],
            iv: [0u8; IV_LEN],
        };
        if suite == CipherSuite::XChaCha20Poly1305 {
            getrandom::fill(&mut material.key)
                .map_err(|e| ProtocolError::Custom(format!("OS RNG unavailable: {e}")))?;
            getrandom::fill(&mut material.iv)
                .map_err(|e| ProtocolError::Custom(format!("OS RNG unavailable: {e}")))?;
        }
        Ok(material)
    }

    pub fn suite(&self) -> CipherSuite {
        self.suite
    }

    /// Encode as `[suite][key][iv]` for the request payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(KEY_MATERIAL_LEN);
        out.push(self.suite.id());
        out.extend_from_slice(&self.key);
        out.extend_from_slice(&self.iv);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_MATERIAL_LEN {
            return Err(ProtocolError::MalformedPacket(
                constants::ERR_BAD_KEY_MATERIAL,
            ));
        }
        let suite = CipherSuite::from_id(bytes[0])?;
        let mut material = Self {
            suite,
            key: [0u8; KEY_LEN],
            iv: [0u8; IV_LEN],
        };
        material.key.copy_from_slice(&bytes[1..1 + KEY_LEN]);
        material.iv.copy_from_slice(&bytes[1 + KEY_LEN..]);
        Ok(material)
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("suite", &self.suite)
            .field("key", &"<redacted>")
            .field("iv", &"<redacted>")
            .finish()
    }
}

impl PartialEq for KeyMaterial {
    fn eq(&self, other: &Self) -> bool {
        self.suite == other.suite && self.key == other.key && self.iv == other.iv
    }
}

impl Eq for KeyMaterial {}

enum CipherImpl {
    XChaCha {
        aead: XChaCha20Poly1305,
        iv: [u8; IV_LEN],
    },
    Xor,
}

/// Seals and opens the chunks of one transfer.
pub struct SessionCipher {
    inner: CipherImpl,
}

impl SessionCipher {
    pub fn new(keys: &KeyMaterial) -> Self {
        let inner = match keys.suite {
            CipherSuite::XChaCha20Poly1305 => CipherImpl::XChaCha {
                aead: XChaCha20Poly1305::new(Key::from_slice(&keys.key)),
                iv: keys.iv,
            },
            CipherSuite::Xor => CipherImpl::Xor,
        };
        Self { inner }
    }

    pub fn suite(&self) -> CipherSuite {
        match self.inner {
            CipherImpl::XChaCha { .. } => CipherSuite::XChaCha20Poly1305,
            CipherImpl::Xor => CipherSuite::Xor,
        }
    }

    /// Encrypt the chunk with the given sequence number.
    pub fn seal(&self, sequence: u32, plaintext: &[u8]) -> Result<Vec<u8>> {
        match &self.inner {
            CipherImpl::XChaCha { aead, iv } => aead
                .encrypt(&chunk_nonce(iv, sequence), plaintext)
                .map_err(|_| ProtocolError::EncryptionFailed),
            CipherImpl::Xor => Ok(xor_transform(plaintext)),
        }
    }

    /// Decrypt the chunk with the given sequence number.
    pub fn open(&self, sequence: u32, ciphertext: &[u8]) -> Result<Vec<u8>> {
        match &self.inner {
            CipherImpl::XChaCha { aead, iv } => {
                if ciphertext.len() < SEAL_OVERHEAD {
                    return Err(ProtocolError::DecryptionFailed);
                }
                aead.decrypt(&chunk_nonce(iv, sequence), ciphertext)
                    .map_err(|_| ProtocolError::DecryptionFailed)
            }
            CipherImpl::Xor => Ok(xor_transform(ciphertext)),
        }
    }
}

impl Drop for SessionCipher {
    fn drop(&mut self) {
        if let CipherImpl::XChaCha { iv, .. } = &mut self.inner {
            iv.zeroize();
        }
    }
}

impl fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCipher")
            .field("suite", &self.suite())
            .finish()
    }
}

/// Transfer IV with the chunk sequence folded into its low 8 bytes.
fn chunk_nonce(iv: &[u8; IV_LEN], sequence: u32) -> XNonce {
    let mut nonce = *iv;
    let counter = u64::from(sequence).to_be_bytes();
    for (slot, byte) in nonce[IV_LEN - 8..].iter_mut().zip(counter) {
        *slot ^= byte;
    }
    XNonce::clone_from_slice(&nonce)
}

/// Legacy fixed-byte XOR; applying it twice is the identity.
pub fn xor_transform(data: &[u8]) -> Vec<u8> {
    data.iter().map(|b| b ^ LEGACY_XOR_BYTE).collect()
}
