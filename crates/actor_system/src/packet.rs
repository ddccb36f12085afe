//! The pooled message envelope used for all actor and wire traffic.
//!
//! A packet is a fixed 24-byte header plus a variable payload. Headers are
//! host-endian in process and big-endian on the wire (see [`crate::codec`]).
//! Packets are pooled: acquire one through a [`PacketPool`], fill it while
//! the handle is still unique, then clone the handle to fan it out.

use crate::recycler::{Recyclable, RecycleHandle, Recycler};
use crate::types;

/// Protocol magic carried by every frame.
pub const PACKET_MAGIC: u32 = 0x4D52_4944; // "MRID"

/// Serialized header size on the wire.
pub const PACKET_HEADER_SIZE: usize = 24;

/// Hard cap on payload length; larger frames are a fatal framing error.
pub const MAX_PAYLOAD_SIZE: u64 = 4096 * 1024;

/// Payload capacity above which `reset` releases the backing allocation
/// instead of keeping it warm for the next checkout.
const PAYLOAD_KEEP_CAPACITY: usize = 16 * 1024;

/// Fixed packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketHeader {
    pub magic: u32,
    pub id: u32,
    pub source: i32,
    pub target: i32,
    pub length: u64,
}

/// Header + payload message unit.
#[derive(Debug, Default)]
pub struct Packet {
    header: PacketHeader,
    payload: Vec<u8>,
}

impl Packet {
    pub fn magic(&self) -> u32 {
        self.header.magic
    }

    /// Package type identifier. Zero marks a freshly acquired, unassigned
    /// packet.
    pub fn id(&self) -> u32 {
        self.header.id
    }

    pub fn set_id(&mut self, id: u32) -> &mut Self {
        self.header.id = id;
        self
    }

    pub fn source(&self) -> i32 {
        self.header.source
    }

    pub fn set_source(&mut self, source: i32) -> &mut Self {
        self.header.source = source;
        self
    }

    pub fn target(&self) -> i32 {
        self.header.target
    }

    pub fn set_target(&mut self, target: i32) -> &mut Self {
        self.header.target = target;
        self
    }

    pub fn payload_len(&self) -> u64 {
        self.header.length
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Replace the payload, keeping the header length in sync.
    pub fn set_payload(&mut self, data: &[u8]) -> &mut Self {
        self.payload.clear();
        self.payload.extend_from_slice(data);
        self.header.length = data.len() as u64;
        self
    }

    /// Convenience for text payloads.
    pub fn set_text(&mut self, text: &str) -> &mut Self {
        self.set_payload(text.as_bytes())
    }

    pub(crate) fn header(&self) -> &PacketHeader {
        &self.header
    }

    pub(crate) fn header_mut(&mut self) -> &mut PacketHeader {
        &mut self.header
    }

    pub(crate) fn payload_mut(&mut self) -> &mut Vec<u8> {
        &mut self.payload
    }

    /// True for the built-in identifiers every client may send.
    pub fn is_builtin(&self) -> bool {
        matches!(
            self.header.id,
            types::HEARTBEAT_PACKAGE_ID
                | types::LOGIN_REQUEST_PACKAGE_ID
                | types::LOGIN_RESPONSE_PACKAGE_ID
                | types::LOGIN_REPEATED_PACKAGE_ID
                | types::PLATFORM_PACKAGE_ID
                | types::LOGOUT_REQUEST_PACKAGE_ID
                | types::LOGIN_FAILED_PACKAGE_ID
        )
    }
}

impl Recyclable for Packet {
    fn on_create(&mut self) {
        self.header.magic = PACKET_MAGIC;
    }

    fn initial(&mut self) {
        self.header = PacketHeader {
            magic: PACKET_MAGIC,
            ..PacketHeader::default()
        };
        self.payload.clear();
    }

    fn reset(&mut self) {
        self.header = PacketHeader::default();
        if self.payload.capacity() > PAYLOAD_KEEP_CAPACITY {
            self.payload = Vec::new();
        } else {
            self.payload.clear();
        }
    }

    fn is_unused(&self) -> bool {
        self.header.id == 0
    }

    fn is_available(&self) -> bool {
        self.header.magic == PACKET_MAGIC
    }
}

/// Pool of packets.
pub type PacketPool = Recycler<Packet>;

/// Shared handle to one pooled packet.
pub type PacketHandle = RecycleHandle<Packet>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recycler::PoolConfig;

    fn pool() -> PacketPool {
        let pool = PacketPool::new(PoolConfig::default());
        pool.initial(4).expect("initial");
        pool
    }

    #[test]
    fn fresh_packet_is_unused_but_available() {
        let pkg = pool().acquire().expect("acquire");
        assert!(pkg.is_unused());
        assert!(pkg.is_available());
        assert_eq!(pkg.magic(), PACKET_MAGIC);
        assert_eq!(pkg.payload_len(), 0);
    }

    #[test]
    fn set_payload_tracks_length() {
        let pool = pool();
        let mut pkg = pool.acquire().expect("acquire");
        {
            let p = pkg.get_mut().expect("unique");
            p.set_id(2000).set_source(-3).set_target(7);
            p.set_payload(b"hello");
        }
        assert_eq!(pkg.id(), 2000);
        assert_eq!(pkg.payload_len(), 5);
        assert_eq!(pkg.payload(), b"hello");
        assert!(!pkg.is_unused());
    }

    #[test]
    fn recycled_packet_comes_back_clean() {
        let pool = pool();
        {
            let mut pkg = pool.acquire().expect("acquire");
            let p = pkg.get_mut().expect("unique");
            p.set_id(2001).set_payload(b"residue");
        }
        // All handles dropped; the element was reset and requeued.
        let pkg = pool.acquire().expect("reacquire");
        assert!(pkg.is_unused());
        assert_eq!(pkg.payload_len(), 0);
        assert!(pkg.payload().is_empty());
    }

    #[test]
    fn builtin_ids_recognized() {
        let pool = pool();
        let mut pkg = pool.acquire().expect("acquire");
        pkg.get_mut()
            .expect("unique")
            .set_id(crate::types::HEARTBEAT_PACKAGE_ID);
        assert!(pkg.is_builtin());
        let mut other = pool.acquire().expect("acquire");
        other.get_mut().expect("unique").set_id(5000);
        assert!(!other.is_builtin());
    }
}
