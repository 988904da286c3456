//! Collective wire framing.
//!
//! Two frame shapes share the peer channel:
//! - **Control frames** (handshake, dispatch announcement): a 4-byte
//!   big-endian header whose high byte is the frame type and low 24
//!   bits the payload length, followed by the payload. Type 0 carries
//!   UTF-8 text, type 1 a self-describing MessagePack document.
//! - **Data frames** (streamed response items): an 8-byte big-endian
//!   length prefix followed by that many payload bytes. A zero length
//!   is the clean end-of-stream marker.
//!
//! Everything here is generic over `AsyncRead`/`AsyncWrite` so the
//! protocol can be exercised over in-memory pipes in tests.

use muster_plugin_sdk::ApiError;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const TLV_TEXT: u8 = 0;
const TLV_STRUCT: u8 = 1;

/// Payload size limit a 24-bit length can express.
const MAX_CONTROL_PAYLOAD: usize = 0xFF_FFFF;

/// Cap on a single data frame; response items are small, anything
/// beyond this indicates a corrupt or hostile peer.
const MAX_DATA_PAYLOAD: u64 = 64 << 20;

/// One control frame.
#[derive(Debug, Clone, PartialEq)]
pub enum TlvFrame {
    Text(String),
    Struct(Value),
}

fn wire_err(context: &str, err: impl std::fmt::Display) -> ApiError {
    ApiError::Wire(format!("{context}: {err}"))
}

/// Write one control frame.
pub async fn send_tlv<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &TlvFrame,
) -> Result<(), ApiError> {
    let (kind, payload) = match frame {
        TlvFrame::Text(text) => (TLV_TEXT, text.as_bytes().to_vec()),
        TlvFrame::Struct(value) => (
            TLV_STRUCT,
            rmp_serde::to_vec_named(value).map_err(|e| wire_err("encoding control frame", e))?,
        ),
    };
    if payload.len() > MAX_CONTROL_PAYLOAD {
        return Err(ApiError::Wire(format!(
            "control frame payload of {} bytes exceeds the 24-bit length field",
            payload.len()
        )));
    }
    let header = ((kind as u32) << 24) | payload.len() as u32;
    writer.write_all(&header.to_be_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one control frame.
pub async fn recv_tlv<R: AsyncRead + Unpin>(reader: &mut R) -> Result<TlvFrame, ApiError> {
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).await?;
    let header = u32::from_be_bytes(header);
    let kind = (header >> 24) as u8;
    let length = (header & 0x00FF_FFFF) as usize;
    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;
    match kind {
        TLV_TEXT => Ok(TlvFrame::Text(
            String::from_utf8(payload).map_err(|e| wire_err("decoding text frame", e))?,
        )),
        TLV_STRUCT => Ok(TlvFrame::Struct(
            rmp_serde::from_slice(&payload).map_err(|e| wire_err("decoding control frame", e))?,
        )),
        other => Err(ApiError::Wire(format!("unknown control frame type {other}"))),
    }
}

/// Write one length-prefixed data frame.
pub async fn send_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> Result<(), ApiError> {
    writer.write_all(&(payload.len() as u64).to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Write the end-of-stream marker.
pub async fn send_end_of_stream<W: AsyncWrite + Unpin>(writer: &mut W) -> Result<(), ApiError> {
    writer.write_all(&0u64.to_be_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one data frame; `None` is the clean end of the stream.
pub async fn recv_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Vec<u8>>, ApiError> {
    let mut prefix = [0u8; 8];
    reader.read_exact(&mut prefix).await?;
    let length = u64::from_be_bytes(prefix);
    if length == 0 {
        return Ok(None);
    }
    if length > MAX_DATA_PAYLOAD {
        return Err(ApiError::Wire(format!(
            "data frame of {length} bytes exceeds the sanity limit"
        )));
    }
    let mut payload = vec![0u8; length as usize];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_control_frame_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        send_tlv(&mut client, &TlvFrame::Text("muster collective".to_string()))
            .await
            .unwrap();
        send_tlv(
            &mut client,
            &TlvFrame::Struct(json!({"dispatch": {"name": "peer1", "length": 42}})),
        )
        .await
        .unwrap();

        assert_eq!(
            recv_tlv(&mut server).await.unwrap(),
            TlvFrame::Text("muster collective".to_string())
        );
        match recv_tlv(&mut server).await.unwrap() {
            TlvFrame::Struct(value) => {
                assert_eq!(value["dispatch"]["name"], "peer1");
                assert_eq!(value["dispatch"]["length"], 42);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_data_frames_end_with_zero_prefix() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        send_frame(&mut client, b"first").await.unwrap();
        send_frame(&mut client, b"second").await.unwrap();
        send_end_of_stream(&mut client).await.unwrap();

        assert_eq!(recv_frame(&mut server).await.unwrap().unwrap(), b"first");
        assert_eq!(recv_frame(&mut server).await.unwrap().unwrap(), b"second");
        assert!(recv_frame(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_truncated_stream_is_an_error() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        client.write_all(&100u64.to_be_bytes()).await.unwrap();
        client.write_all(b"short").await.unwrap();
        drop(client);
        assert!(recv_frame(&mut server).await.is_err());
    }

    #[tokio::test]
    async fn test_oversized_data_frame_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        client
            .write_all(&u64::MAX.to_be_bytes())
            .await
            .unwrap();
        assert!(recv_frame(&mut server).await.is_err());
    }
}
