//! Greeting and authentication exchange run on every fresh socket.

use bytes::BytesMut;
use tarantool_core::protocol::{
    encode_request, scramble, Greeting, Packet, Request, FRAME_MARKER, FRAME_PREFIX_SIZE,
    GREETING_SIZE,
};
use tarantool_core::{Result, TarantoolError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::SecurityConfig;

/// Sync id used for the authentication request.
const AUTH_SYNC: u64 = 0;

/// Outcome of a successful handshake.
#[derive(Debug, Clone)]
pub(crate) struct Handshake {
    pub(crate) greeting: Greeting,
    pub(crate) schema_id: Option<u64>,
}

/// Reads the server greeting and authenticates if credentials are configured.
///
/// A banner mismatch fails with a protocol error. A rejected AUTH request
/// fails with an authentication error carrying the server message.
pub(crate) async fn perform<S>(
    stream: &mut S,
    security: &SecurityConfig,
    max_frame_size: usize,
) -> Result<Handshake>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut raw = [0u8; GREETING_SIZE];
    stream
        .read_exact(&mut raw)
        .await
        .map_err(|e| TarantoolError::Communication(format!("failed to read greeting: {}", e)))?;
    let greeting = Greeting::parse(&raw)?;
    tracing::debug!(version = greeting.version(), "received greeting");

    let Some(username) = security.username() else {
        return Ok(Handshake {
            greeting,
            schema_id: None,
        });
    };

    let token = scramble(greeting.salt(), security.password().unwrap_or_default())?;
    let frame = encode_request(AUTH_SYNC, None, &Request::auth(username, &token), 128)?;
    stream.write_all(&frame).await?;

    let response = read_packet(stream, max_frame_size).await?;
    if response.header.sync != AUTH_SYNC {
        return Err(TarantoolError::Protocol(format!(
            "auth response carries sync {}, expected {}",
            response.header.sync, AUTH_SYNC
        )));
    }
    let schema_id = response.header.schema_id;
    response.into_result().map_err(|e| match e {
        TarantoolError::Server { code, message } => TarantoolError::Authentication(format!(
            "user {:?} rejected ({}): {}",
            username, code, message
        )),
        other => other,
    })?;

    tracing::debug!(username, "authenticated");
    Ok(Handshake {
        greeting,
        schema_id,
    })
}

async fn read_packet<S>(stream: &mut S, max_frame_size: usize) -> Result<Packet>
where
    S: AsyncRead + Unpin,
{
    let mut prefix = [0u8; FRAME_PREFIX_SIZE];
    stream.read_exact(&mut prefix).await?;
    if prefix[0] != FRAME_MARKER {
        return Err(TarantoolError::Protocol(format!(
            "invalid frame marker 0x{:02x}",
            prefix[0]
        )));
    }

    let len = u32::from_be_bytes([prefix[1], prefix[2], prefix[3], prefix[4]]) as usize;
    if len > max_frame_size {
        return Err(TarantoolError::Protocol(format!(
            "frame of {} bytes exceeds the limit of {} bytes",
            len, max_frame_size
        )));
    }

    let mut payload = BytesMut::zeroed(len);
    stream.read_exact(&mut payload).await?;
    Packet::decode_payload(&payload)
}
