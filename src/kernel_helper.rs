//! Kernel-helper proc-file protocol (§6), modeled only as a contract.
//!
//! The privileged kernel-timer helper is an external collaborator (§1): it
//! would run as a separate process, communicating over a proc-file using
//! fixed-size headers followed by a variable payload. No production
//! implementation ships in this binary; the trait and message types exist
//! so a future implementation has a documented wire contract, and the
//! header layout is covered by a round-trip test.

/// One message in the helper protocol, mirroring the §6 table's four
/// message kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HelperMessage {
    Init,
    CoreRange { first: u32, last: u32 },
    PmuRead { core: u32, register: u64 },
    MsrRead { core: u32, register: u64 },
}

impl HelperMessage {
    fn type_tag(&self) -> u32 {
        match self {
            HelperMessage::Init => 0,
            HelperMessage::CoreRange { .. } => 1,
            HelperMessage::PmuRead { .. } => 2,
            HelperMessage::MsrRead { .. } => 3,
        }
    }

    fn payload(&self) -> Vec<u8> {
        match self {
            HelperMessage::Init => Vec::new(),
            HelperMessage::CoreRange { first, last } => {
                let mut buf = Vec::with_capacity(8);
                buf.extend_from_slice(&first.to_le_bytes());
                buf.extend_from_slice(&last.to_le_bytes());
                buf
            }
            HelperMessage::PmuRead { core, register } | HelperMessage::MsrRead { core, register } => {
                let mut buf = Vec::with_capacity(12);
                buf.extend_from_slice(&core.to_le_bytes());
                buf.extend_from_slice(&register.to_le_bytes());
                buf
            }
        }
    }

    /// Encodes this message as a fixed `{type: u32, payload_size: u32}`
    /// header (little-endian) followed by its payload bytes.
    pub fn encode(&self) -> Vec<u8> {
        let payload = self.payload();
        let mut buf = Vec::with_capacity(8 + payload.len());
        buf.extend_from_slice(&self.type_tag().to_le_bytes());
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&payload);
        buf
    }

    /// Decodes a message previously produced by `encode`. Returns `None` on
    /// a truncated buffer or an unrecognized type tag.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < 8 {
            return None;
        }
        let type_tag = u32::from_le_bytes(buf[0..4].try_into().ok()?);
        let payload_size = u32::from_le_bytes(buf[4..8].try_into().ok()?) as usize;
        let payload = buf.get(8..8 + payload_size)?;

        match type_tag {
            0 => Some(HelperMessage::Init),
            1 => {
                let first = u32::from_le_bytes(payload.get(0..4)?.try_into().ok()?);
                let last = u32::from_le_bytes(payload.get(4..8)?.try_into().ok()?);
                Some(HelperMessage::CoreRange { first, last })
            }
            2 | 3 => {
                let core = u32::from_le_bytes(payload.get(0..4)?.try_into().ok()?);
                let register = u64::from_le_bytes(payload.get(4..12)?.try_into().ok()?);
                if type_tag == 2 {
                    Some(HelperMessage::PmuRead { core, register })
                } else {
                    Some(HelperMessage::MsrRead { core, register })
                }
            }
            _ => None,
        }
    }
}

/// A channel to the kernel helper process. No implementor ships in this
/// binary (§1); the trait documents the contract a future implementation
/// (e.g. a named-pipe or procfs-backed client) would satisfy.
pub trait KernelHelperChannel: Send {
    fn send(&mut self, message: &HelperMessage) -> std::io::Result<()>;
    fn recv(&mut self) -> std::io::Result<HelperMessage>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_round_trips() {
        let msg = HelperMessage::Init;
        let encoded = msg.encode();
        assert_eq!(encoded.len(), 8);
        assert_eq!(HelperMessage::decode(&encoded), Some(msg));
    }

    #[test]
    fn core_range_round_trips() {
        let msg = HelperMessage::CoreRange { first: 0, last: 15 };
        let encoded = msg.encode();
        assert_eq!(HelperMessage::decode(&encoded), Some(msg));
    }

    #[test]
    fn pmu_read_round_trips() {
        let msg = HelperMessage::PmuRead {
            core: 3,
            register: 0x186,
        };
        let encoded = msg.encode();
        assert_eq!(HelperMessage::decode(&encoded), Some(msg));
    }

    #[test]
    fn msr_read_round_trips() {
        let msg = HelperMessage::MsrRead {
            core: 7,
            register: 0x38F,
        };
        let encoded = msg.encode();
        assert_eq!(HelperMessage::decode(&encoded), Some(msg));
    }

    #[test]
    fn truncated_buffer_fails_to_decode() {
        assert_eq!(HelperMessage::decode(&[1, 2, 3]), None);
    }

    #[test]
    fn unknown_type_tag_fails_to_decode() {
        let mut buf = 99u32.to_le_bytes().to_vec();
        buf.extend_from_slice(&0u32.to_le_bytes());
        assert_eq!(HelperMessage::decode(&buf), None);
    }
}
