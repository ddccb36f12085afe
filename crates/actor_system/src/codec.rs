//! Wire framing for [`Packet`]s over any async byte stream.
//!
//! Frame layout: `[magic:u32][id:u32][source:i32][target:i32][length:u64]`
//! followed by exactly `length` payload bytes, all integers big-endian.
//! A zero-length frame is legal (heartbeats). Violations are fatal: a
//! desynced stream cannot be resynchronized, so the connection must drop.
//!
//! The codec is deliberately transport-agnostic; the stream handed in may
//! be a raw TCP socket or any encrypting wrapper around one.

use crate::error::FramingError;
use crate::packet::{Packet, PacketHeader, MAX_PAYLOAD_SIZE, PACKET_HEADER_SIZE, PACKET_MAGIC};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Serialize one packet onto the stream.
///
/// Refuses to emit frames whose payload exceeds the protocol cap; the
/// caller constructed such a packet in error.
pub async fn encode<W>(stream: &mut W, pkg: &Packet) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
{
    let header = pkg.header();
    if header.length > MAX_PAYLOAD_SIZE {
        return Err(FramingError::OversizePayload {
            length: header.length,
        });
    }

    let mut buf = [0u8; PACKET_HEADER_SIZE];
    buf[0..4].copy_from_slice(&header.magic.to_be_bytes());
    buf[4..8].copy_from_slice(&header.id.to_be_bytes());
    buf[8..12].copy_from_slice(&header.source.to_be_bytes());
    buf[12..16].copy_from_slice(&header.target.to_be_bytes());
    buf[16..24].copy_from_slice(&header.length.to_be_bytes());

    stream.write_all(&buf).await?;
    if header.length > 0 {
        stream.write_all(pkg.payload()).await?;
    }
    stream.flush().await?;
    Ok(())
}

/// Read one packet from the stream into `pkg`.
///
/// The header is validated before any payload allocation happens, so an
/// adversarial length field never costs more than 24 bytes of reading.
pub async fn decode<R>(stream: &mut R, pkg: &mut Packet) -> Result<(), FramingError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; PACKET_HEADER_SIZE];
    stream.read_exact(&mut buf).await?;

    let header = PacketHeader {
        magic: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
        id: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        source: i32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        target: i32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]),
        length: u64::from_be_bytes([
            buf[16], buf[17], buf[18], buf[19], buf[20], buf[21], buf[22], buf[23],
        ]),
    };

    if header.magic != PACKET_MAGIC {
        return Err(FramingError::BadMagic {
            found: header.magic,
        });
    }
    if header.length > MAX_PAYLOAD_SIZE {
        return Err(FramingError::OversizePayload {
            length: header.length,
        });
    }

    *pkg.header_mut() = header;

    let payload = pkg.payload_mut();
    payload.clear();
    if header.length > 0 {
        payload.resize(header.length as usize, 0);
        stream.read_exact(payload).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{PacketPool, PACKET_MAGIC};
    use crate::recycler::PoolConfig;
    use std::io::Cursor;

    fn pool() -> PacketPool {
        let pool = PacketPool::new(PoolConfig::default());
        pool.initial(4).expect("initial");
        pool
    }

    async fn round_trip(payload: &[u8]) {
        let pool = pool();
        let mut out = pool.acquire().expect("acquire");
        {
            let p = out.get_mut().expect("unique");
            p.set_id(4200).set_source(-1).set_target(17);
            p.set_payload(payload);
        }

        let mut sink = Cursor::new(Vec::new());
        encode(&mut sink, &out).await.expect("encode");
        let wire = sink.into_inner();
        assert_eq!(wire.len(), PACKET_HEADER_SIZE + payload.len());

        let mut read = Cursor::new(wire);
        let mut back = pool.acquire().expect("acquire");
        decode(&mut read, back.get_mut().expect("unique"))
            .await
            .expect("decode");

        assert_eq!(back.id(), 4200);
        assert_eq!(back.source(), -1);
        assert_eq!(back.target(), 17);
        assert_eq!(back.payload(), payload);
    }

    #[tokio::test]
    async fn round_trip_empty_payload() {
        round_trip(b"").await;
    }

    #[tokio::test]
    async fn round_trip_small_payload() {
        round_trip(b"the quick brown fox").await;
    }

    #[tokio::test]
    async fn round_trip_large_payload() {
        let payload = vec![0xA5u8; 128 * 1024];
        round_trip(&payload).await;
    }

    #[tokio::test]
    async fn decode_rejects_bad_magic() {
        let mut wire = vec![0u8; PACKET_HEADER_SIZE];
        wire[0..4].copy_from_slice(&0xDEAD_BEEFu32.to_be_bytes());

        let pool = pool();
        let mut pkg = pool.acquire().expect("acquire");
        let err = decode(&mut Cursor::new(wire), pkg.get_mut().expect("unique"))
            .await
            .expect_err("bad magic must fail");
        assert!(matches!(err, FramingError::BadMagic { found } if found == 0xDEAD_BEEF));
    }

    #[tokio::test]
    async fn decode_rejects_oversize_without_reading_payload() {
        let mut wire = vec![0u8; PACKET_HEADER_SIZE];
        wire[0..4].copy_from_slice(&PACKET_MAGIC.to_be_bytes());
        wire[4..8].copy_from_slice(&2000u32.to_be_bytes());
        wire[16..24].copy_from_slice(&(MAX_PAYLOAD_SIZE + 1).to_be_bytes());
        // No payload bytes follow; decode must fail on the header alone.

        let pool = pool();
        let mut pkg = pool.acquire().expect("acquire");
        let err = decode(&mut Cursor::new(wire), pkg.get_mut().expect("unique"))
            .await
            .expect_err("oversize must fail");
        assert!(matches!(err, FramingError::OversizePayload { .. }));
        assert!(pkg.payload().is_empty());
    }

    #[tokio::test]
    async fn encode_rejects_oversize() {
        let pool = pool();
        let mut pkg = pool.acquire().expect("acquire");
        {
            let p = pkg.get_mut().expect("unique");
            p.set_id(2000);
            p.header_mut().length = MAX_PAYLOAD_SIZE + 1;
        }
        let mut sink = Cursor::new(Vec::new());
        let err = encode(&mut sink, &pkg).await.expect_err("oversize");
        assert!(matches!(err, FramingError::OversizePayload { .. }));
        assert!(sink.into_inner().is_empty());
    }

    #[tokio::test]
    async fn truncated_stream_is_io_error() {
        let pool = pool();
        let mut out = pool.acquire().expect("acquire");
        {
            let p = out.get_mut().expect("unique");
            p.set_id(2000).set_payload(b"full payload");
        }
        let mut sink = Cursor::new(Vec::new());
        encode(&mut sink, &out).await.expect("encode");
        let mut wire = sink.into_inner();
        wire.truncate(wire.len() - 4);

        let mut pkg = pool.acquire().expect("acquire");
        let err = decode(&mut Cursor::new(wire), pkg.get_mut().expect("unique"))
            .await
            .expect_err("truncated");
        assert!(matches!(err, FramingError::Io(_)));
    }
}
