//! Server greeting parsing and the CHAP-SHA1 scramble.

use base64::Engine;
use sha1::{Digest, Sha1};

use super::constants::*;
use crate::error::{Result, TarantoolError};

/// Parsed server greeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    version: String,
    salt: Vec<u8>,
}

impl Greeting {
    /// Parses the 128-byte greeting sent by the server on connect.
    ///
    /// The first line must start with the server banner. The second line
    /// holds the base64 encoded salt.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() < GREETING_SIZE {
            return Err(TarantoolError::Protocol(format!(
                "greeting is {} bytes, expected {}",
                raw.len(),
                GREETING_SIZE
            )));
        }

        let (first, second) = raw[..GREETING_SIZE].split_at(GREETING_LINE_SIZE);
        let first = String::from_utf8_lossy(first);
        if !first.starts_with(GREETING_BANNER) {
            return Err(TarantoolError::Protocol(format!(
                "unexpected greeting banner: {:?}",
                first.trim_end()
            )));
        }
        let version = first.trim_end_matches(['\0', ' ', '\n']).trim().to_string();

        let encoded_salt = std::str::from_utf8(second)
            .map_err(|_| TarantoolError::Protocol("greeting salt is not ASCII".to_string()))?
            .trim_end_matches(['\0', ' ', '\n'])
            .trim();
        let salt = base64::engine::general_purpose::STANDARD
            .decode(encoded_salt)
            .map_err(|e| TarantoolError::Protocol(format!("invalid greeting salt: {}", e)))?;
        if salt.len() < SCRAMBLE_SIZE {
            return Err(TarantoolError::Protocol(format!(
                "greeting salt is {} bytes, expected at least {}",
                salt.len(),
                SCRAMBLE_SIZE
            )));
        }

        Ok(Self { version, salt })
    }

    /// Returns the server identification line, e.g. `Tarantool 2.11.1 (Binary) <uuid>`.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns the decoded salt.
    pub fn salt(&self) -> &[u8] {
        &self.salt
    }
}

/// Computes the CHAP-SHA1 scramble sent in an auth request.
///
/// `p1 = sha1(password)`, `p2 = sha1(p1)`,
/// `scramble = p1 xor sha1(salt[0..20] ++ p2)`.
pub fn scramble(salt: &[u8], password: &str) -> Result<[u8; SCRAMBLE_SIZE]> {
    let salt = salt.get(..SCRAMBLE_SIZE).ok_or_else(|| {
        TarantoolError::Authentication(format!(
            "salt must have at least {} bytes",
            SCRAMBLE_SIZE
        ))
    })?;

    let p1 = Sha1::digest(password.as_bytes());
    let p2 = Sha1::digest(p1);

    let mut hasher = Sha1::new();
    hasher.update(salt);
    hasher.update(p2);
    let challenge = hasher.finalize();

    let mut out = [0u8; SCRAMBLE_SIZE];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = p1[i] ^ challenge[i];
    }
    Ok(out)
}
