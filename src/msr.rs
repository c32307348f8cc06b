//! MSR/PMU access layer (§4.1).
//!
//! Exposes a uniform interface to per-core registers: `read`/`write` of raw
//! 64-bit MSR values, `enable_fixed` (enable the fixed-function counters),
//! and `configure_counters` (program the seven programmable event-select
//! registers). The real implementation opens `/dev/cpu/<core>/msr` once per
//! core and serializes access by construction — each file handle is owned
//! by exactly one sampler thread (§5).

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;

use crate::error::DeviceError;

/// Programmable event-select registers, IA32_PERFEVTSEL0..6 (§6).
pub const IA32_PERFEVTSEL0: u64 = 0x186;
pub const IA32_PERFEVTSEL_COUNT: u64 = 7;

/// General-purpose performance counters, IA32_PMC0..6, one per
/// IA32_PERFEVTSELn at the same index.
pub const IA32_PMC0: u64 = 0xC1;

/// Global performance-counter enable register (§6). Writing `0x7F` enables
/// PMC0..6.
pub const IA32_PERF_GLOBAL_CTRL: u64 = 0x38F;
pub const GLOBAL_CTRL_ENABLE_ALL: u64 = 0x7F;

/// Fixed-function counters: retired instructions and reference cycles.
pub const IA32_FIXED_CTR0: u64 = 0x309; // instructions retired
pub const IA32_FIXED_CTR1: u64 = 0x30A; // core (unhalted) cycles
pub const IA32_FIXED_CTR2: u64 = 0x30B; // reference cycles
pub const IA32_FIXED_CTR_CTRL: u64 = 0x38D;
/// Enable all three fixed counters in OS+user mode (bits 0-11, `0b1111_1111_1111`
/// would also enable PMI bits we don't use; we only set the per-counter
/// enable nibbles: EN0_OS|EN0_USR, EN1_OS|EN1_USR, EN2_OS|EN2_USR).
pub const FIXED_CTR_CTRL_ENABLE_ALL: u64 = 0x333;

/// Per-core prefetcher-control MSR (§6): bits 0-3 gate the L2 hardware
/// streamer, L2 adjacent-cache-line prefetcher, DCU streamer, and DCU IP
/// prefetcher respectively; a set bit disables that unit. This is the
/// register every arm/ladder value in `arms.rs`/`controller::heur` is
/// written to.
pub const IA32_MISC_FEATURE_CONTROL: u64 = 0x1A4;

/// The seven programmable PMU events used by the sampler (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmuEvent {
    AllLoadsRetired,
    L2HitLoads,
    LlcHitLoads,
    DramHitLoads,
    XqPromotion,
    UnhaltedCycles,
    InstructionsRetired,
}

pub const PMU_EVENT_COUNT: usize = 7;
pub const PMU_EVENTS: [PmuEvent; PMU_EVENT_COUNT] = [
    PmuEvent::AllLoadsRetired,
    PmuEvent::L2HitLoads,
    PmuEvent::LlcHitLoads,
    PmuEvent::DramHitLoads,
    PmuEvent::XqPromotion,
    PmuEvent::UnhaltedCycles,
    PmuEvent::InstructionsRetired,
];

impl PmuEvent {
    /// Encodes this event into an IA32_PERFEVTSELn value: event_select in
    /// bits 0-7, umask in bits 8-15, usr+os+enable set (bits 16, 17, 22).
    pub fn encode(self) -> u64 {
        let (event_select, umask): (u8, u8) = match self {
            PmuEvent::AllLoadsRetired => (0xD0, 0x81),
            PmuEvent::L2HitLoads => (0xD1, 0x02),
            PmuEvent::LlcHitLoads => (0xD1, 0x04),
            PmuEvent::DramHitLoads => (0xD1, 0x20),
            PmuEvent::XqPromotion => (0x59, 0x01),
            PmuEvent::UnhaltedCycles => (0x3C, 0x00),
            PmuEvent::InstructionsRetired => (0xC0, 0x00),
        };
        const USR: u64 = 1 << 16;
        const OS: u64 = 1 << 17;
        const ENABLE: u64 = 1 << 22;
        (event_select as u64) | ((umask as u64) << 8) | USR | OS | ENABLE
    }
}

/// A single raw-register read/write interface for one core's MSR space,
/// plus PMU setup operations. Implementors must serialize accesses to the
/// same core; by construction in this crate, one instance is owned by
/// exactly one sampler thread.
pub trait MsrPmuAccess: Send {
    fn read(&self, register: u64) -> Result<u64, DeviceError>;
    fn write(&self, register: u64, value: u64) -> Result<(), DeviceError>;

    /// Enables the three fixed-function counters (instructions retired,
    /// reference cycles) and the global enable for all programmable and
    /// fixed counters. Must be called before the first read.
    fn enable_fixed(&self) -> Result<(), DeviceError> {
        self.write(IA32_FIXED_CTR_CTRL, FIXED_CTR_CTRL_ENABLE_ALL)?;
        self.write(IA32_PERF_GLOBAL_CTRL, GLOBAL_CTRL_ENABLE_ALL)?;
        Ok(())
    }

    /// Programs the seven event-select registers from `events`.
    fn configure_counters(&self, events: &[PmuEvent; PMU_EVENT_COUNT]) -> Result<(), DeviceError> {
        for (i, event) in events.iter().enumerate() {
            self.write(IA32_PERFEVTSEL0 + i as u64, event.encode())?;
        }
        Ok(())
    }
}

/// Opens `/dev/cpu/<core_id>/msr` and performs positioned reads/writes
/// (offset = register address), the standard Linux userspace MSR access
/// path (the `msr` kernel module must be loaded).
pub struct LinuxMsrPmuAccess {
    core_id: u32,
    file: File,
}

impl LinuxMsrPmuAccess {
    pub fn open(core_id: u32) -> Result<Self, DeviceError> {
        let path = format!("/dev/cpu/{core_id}/msr");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| DeviceError::Open { core: core_id, source })?;
        Ok(Self { core_id, file })
    }
}

impl MsrPmuAccess for LinuxMsrPmuAccess {
    fn read(&self, register: u64) -> Result<u64, DeviceError> {
        let mut buf = [0u8; 8];
        self.file
            .read_exact_at(&mut buf, register)
            .map_err(|source| DeviceError::Read {
                core: self.core_id,
                register,
                source,
            })?;
        Ok(u64::from_ne_bytes(buf))
    }

    fn write(&self, register: u64, value: u64) -> Result<(), DeviceError> {
        let buf = value.to_ne_bytes();
        self.file
            .write_all_at(&buf, register)
            .map_err(|source| DeviceError::Write {
                core: self.core_id,
                register,
                source,
            })
    }
}


#[cfg(test)]
mod tests {
    use super::mock::MockMsrPmuAccess;
    use super::*;

    #[test]
    fn configure_counters_programs_all_seven_event_selects() {
        let access = MockMsrPmuAccess::new();
        access.configure_counters(&PMU_EVENTS).unwrap();
        for (i, event) in PMU_EVENTS.iter().enumerate() {
            assert_eq!(
                access.get(IA32_PERFEVTSEL0 + i as u64),
                Some(event.encode())
            );
        }
    }

    #[test]
    fn enable_fixed_sets_global_and_fixed_ctrl() {
        let access = MockMsrPmuAccess::new();
        access.enable_fixed().unwrap();
        assert_eq!(access.get(IA32_PERF_GLOBAL_CTRL), Some(GLOBAL_CTRL_ENABLE_ALL));
        assert_eq!(
            access.get(IA32_FIXED_CTR_CTRL),
            Some(FIXED_CTR_CTRL_ENABLE_ALL)
        );
    }

    #[test]
    fn event_encoding_sets_usr_os_enable_bits() {
        let encoded = PmuEvent::UnhaltedCycles.encode();
        assert_eq!(encoded & (1 << 16), 1 << 16);
        assert_eq!(encoded & (1 << 17), 1 << 17);
        assert_eq!(encoded & (1 << 22), 1 << 22);
    }
}
