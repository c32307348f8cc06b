//! Bandwidth probe (§4.2).
//!
//! Reports an estimate, in MB/s, of aggregate memory bandwidth consumed
//! over the last tick. Two implementations are selected once at startup:
//! a per-socket memory-controller counter reader, or an LLC-occupancy/BW
//! monitor reader keyed by per-core resource-monitoring IDs.

use crate::config::Config;

/// One operation: estimate bandwidth consumed since the previous call, in
/// MB/s. `0` means "unknown" (probe failure); callers must never treat `0`
/// as a real, low-bandwidth measurement (§4.2).
pub trait BandwidthProbe: Send {
    fn sample_mb_s(&mut self) -> u32;
}

/// Converts a per-channel cache-line delta count into MB/s for the elapsed
/// tick duration. A cache line is 64 bytes.
fn cache_lines_to_mb_s(cache_lines: u64, tick_interval_secs: f64) -> u32 {
    bytes_to_mb_s(cache_lines * 64, tick_interval_secs)
}

/// Converts a byte delta into MB/s for the elapsed tick duration. Used
/// directly by the RDT/MBM monitor, whose `mbm_total_bytes` counters are
/// already byte counts (unlike the memory-controller reader's cache-line
/// counts, which go through `cache_lines_to_mb_s` instead).
fn bytes_to_mb_s(bytes: u64, tick_interval_secs: f64) -> u32 {
    if tick_interval_secs <= 0.0 {
        return 0;
    }
    let mb_s = (bytes as f64 / (1024.0 * 1024.0)) / tick_interval_secs;
    if !mb_s.is_finite() || mb_s < 0.0 {
        0
    } else {
        mb_s as u32
    }
}

/// Reads per-channel memory-controller counters and differences them
/// against the previous sample. Requires privileged access to the mapped
/// MC registers; real register access is provided by `read_channel_counters`
/// (out of scope for this binary — see design note on external
/// collaborators), so this implementation is parameterized over a
/// pluggable reader function for testability.
pub struct MemoryControllerProbe {
    tick_interval_secs: f64,
    previous: Option<u64>,
    reader: Box<dyn FnMut() -> Option<u64> + Send>,
}

impl MemoryControllerProbe {
    pub fn new(config: &Config, reader: Box<dyn FnMut() -> Option<u64> + Send>) -> Self {
        Self {
            tick_interval_secs: config.tick_interval_secs,
            previous: None,
            reader,
        }
    }
}

impl BandwidthProbe for MemoryControllerProbe {
    fn sample_mb_s(&mut self) -> u32 {
        let Some(current) = (self.reader)() else {
            log::warn!("memory-controller bandwidth probe read failed");
            return 0;
        };
        let mb_s = match self.previous {
            Some(previous) => {
                let delta = current.wrapping_sub(previous);
                cache_lines_to_mb_s(delta, self.tick_interval_secs)
            }
            None => 0,
        };
        self.previous = Some(current);
        mb_s
    }
}

/// Assigns each monitored core a resource-monitoring ID at startup and sums
/// the per-ID bandwidth counters (an LLC-occupancy/MBM style monitor) each
/// tick. Real RDT/resctrl filesystem access is an external collaborator
/// (§1); this implementation is parameterized over a pluggable per-ID
/// reader function for testability.
pub struct RdtMonitorProbe {
    tick_interval_secs: f64,
    resource_ids: Vec<u32>,
    previous_total: Option<u64>,
    reader: Box<dyn FnMut(u32) -> Option<u64> + Send>,
}

impl RdtMonitorProbe {
    pub fn new(
        config: &Config,
        resource_ids: Vec<u32>,
        reader: Box<dyn FnMut(u32) -> Option<u64> + Send>,
    ) -> Self {
        Self {
            tick_interval_secs: config.tick_interval_secs,
            resource_ids,
            previous_total: None,
            reader,
        }
    }
}

impl BandwidthProbe for RdtMonitorProbe {
    fn sample_mb_s(&mut self) -> u32 {
        let mut total = 0u64;
        for &id in &self.resource_ids {
            match (self.reader)(id) {
                Some(value) => total += value,
                None => {
                    log::warn!("RDT bandwidth monitor read failed for resource id {id}");
                    return 0;
                }
            }
        }
        let mb_s = match self.previous_total {
            Some(previous) => bytes_to_mb_s(total.wrapping_sub(previous), self.tick_interval_secs),
            None => 0,
        };
        self.previous_total = Some(total);
        mb_s
    }
}

/// Selects the RDT/LLC-occupancy monitor when the host advertises support
/// (`config.has_mbm`); otherwise falls back to the memory-controller
/// reader. Real CPUID-based capability detection is an external
/// collaborator (§1); `has_mbm` stands in for it here.
pub fn select_probe(
    config: &Config,
    core_ids: &[u32],
    mc_reader: Box<dyn FnMut() -> Option<u64> + Send>,
    rdt_reader: Box<dyn FnMut(u32) -> Option<u64> + Send>,
) -> Box<dyn BandwidthProbe> {
    if config.has_mbm {
        log::info!("using RDT/LLC-occupancy bandwidth monitor");
        Box::new(RdtMonitorProbe::new(config, core_ids.to_vec(), rdt_reader))
    } else {
        log::info!("using memory-controller bandwidth probe");
        Box::new(MemoryControllerProbe::new(config, mc_reader))
    }
}
