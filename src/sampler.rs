//! Per-core sampler (§4.3) and the `CoreState` it owns (§3).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::barrier::TickBarrier;
use crate::error::DeviceError;
use crate::msr::{MsrPmuAccess, PMU_EVENTS, PMU_EVENT_COUNT};

/// Per-core state (§3). Owned exclusively by the sampler for `core_id`;
/// read by the controller only during the barrier-held phase between
/// phase A completion and phase B start (§4.4).
#[derive(Debug, Clone)]
pub struct CoreState {
    pub core_id: u32,
    pub module_id: u32,
    pub priority: u8,
    pub last_pmu: [u64; PMU_EVENT_COUNT],
    pub last_ipc: f64,
    pub last_retired_instructions: u64,
    pub last_cycles: u64,
    pub current_msr_value: u64,
    pub msr_dirty: bool,
    /// Set by the sampler when a counter read failed this tick; the
    /// controller treats this core's IPC as 0 without an `Err` crossing
    /// the barrier (§7 propagation rule).
    pub read_failed: bool,
}

impl CoreState {
    pub fn new(core_id: u32, module_id: u32, priority: u8, safe_msr_value: u64) -> Self {
        Self {
            core_id,
            module_id,
            priority,
            last_pmu: [0; PMU_EVENT_COUNT],
            last_ipc: 0.0,
            last_retired_instructions: 0,
            last_cycles: 0,
            current_msr_value: safe_msr_value,
            msr_dirty: false,
            read_failed: false,
        }
    }

    /// `ipc = retired_instructions / cycles`, guarding against division by
    /// zero (§4.6 step 1).
    pub fn compute_ipc(retired: u64, cycles: u64) -> f64 {
        if cycles == 0 {
            0.0
        } else {
            retired as f64 / cycles as f64
        }
    }
}

/// Raw per-tick counter deltas read from the PMU, before being folded into
/// `CoreState` (§3 `TickSample`).
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterDeltas {
    pub pmu: [u64; PMU_EVENT_COUNT],
    pub retired_instructions: u64,
    pub cycles: u64,
}

/// An upper bound on a single tick's plausible counter delta: comfortably
/// above what even a multi-GHz core retiring instructions every cycle could
/// produce within the documented tick-interval range (§4.7, up to 60s), yet
/// far below the ~1.8*10^19 a genuine modulo-2^64 wraparound would produce.
/// A delta past this bound means the read raced a real overflow rather than
/// reflecting a tick's work, so the sample is suspect (§7
/// `CounterOverflowSuspected`).
const MAX_PLAUSIBLE_COUNTER_DELTA: u64 = 1 << 48;

/// Reads the seven programmable counters plus the two fixed counters used
/// here (instructions retired, reference cycles), returning the wrapping
/// (modulo 2^64) delta against `previous`. A read failure on any register
/// is reported as `None`; the caller publishes zeros for this tick
/// (§4.3 "Counter overflow").
pub fn read_counter_deltas(
    access: &dyn MsrPmuAccess,
    previous: &CounterDeltas,
) -> Option<(CounterDeltas, CounterDeltas)> {
    use crate::msr::{IA32_FIXED_CTR0, IA32_FIXED_CTR2, IA32_PMC0};

    let mut raw = CounterDeltas::default();
    for i in 0..PMU_EVENT_COUNT {
        raw.pmu[i] = access.read(IA32_PMC0 + i as u64).ok()?;
    }
    raw.retired_instructions = access.read(IA32_FIXED_CTR0).ok()?;
    raw.cycles = access.read(IA32_FIXED_CTR2).ok()?;

    let mut delta = CounterDeltas::default();
    for i in 0..PMU_EVENT_COUNT {
        delta.pmu[i] = raw.pmu[i].wrapping_sub(previous.pmu[i]);
    }
    delta.retired_instructions = raw
        .retired_instructions
        .wrapping_sub(previous.retired_instructions);
    delta.cycles = raw.cycles.wrapping_sub(previous.cycles);

    Some((raw, delta))
}

/// Pins the calling thread to `core_id`. Fatal if pinning fails (§4.3).
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn pin_to_core(core_id: u32) -> Result<(), DeviceError> {
    use nix::sched::{sched_setaffinity, CpuSet};
    use nix::unistd::Pid;

    let mut cpu_set = CpuSet::new();
    cpu_set
        .set(core_id as usize)
        .map_err(|e| DeviceError::Pin {
            core: core_id,
            source: crate::error::PinError(e.to_string()),
        })?;
    sched_setaffinity(Pid::from_raw(0), &cpu_set).map_err(|e| DeviceError::Pin {
        core: core_id,
        source: crate::error::PinError(e.to_string()),
    })
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub fn pin_to_core(core_id: u32) -> Result<(), DeviceError> {
    Err(DeviceError::Pin {
        core: core_id,
        source: crate::error::PinError("CPU pinning is only supported on Linux".into()),
    })
}

/// Runs one sampler's loop body for a single tick: sleep, read, publish,
/// arrive at the barrier, and (if primary-in-module and dirty) apply the
/// pending MSR write. Extracted from the thread entry point so it can be
/// driven directly by tests without spawning real OS threads.
pub struct SamplerTickContext<'a> {
    pub access: &'a dyn MsrPmuAccess,
    pub state: &'a mut CoreState,
    pub previous_counters: &'a mut CounterDeltas,
    pub is_primary: bool,
}

impl SamplerTickContext<'_> {
    /// Reads counters, computes deltas, and publishes them into `state`.
    /// Returns the deltas for use by the controller's tick sample.
    pub fn sample(&mut self) -> CounterDeltas {
        match read_counter_deltas(self.access, self.previous_counters) {
            Some((raw, delta)) => {
                *self.previous_counters = raw;
                self.state.read_failed = false;

                if delta.retired_instructions > MAX_PLAUSIBLE_COUNTER_DELTA
                    || delta.cycles > MAX_PLAUSIBLE_COUNTER_DELTA
                {
                    log::warn!(
                        "counter overflow suspected on core {}; treating sample as 0",
                        self.state.core_id
                    );
                    self.state.last_pmu = [0; PMU_EVENT_COUNT];
                    self.state.last_retired_instructions = 0;
                    self.state.last_cycles = 0;
                    self.state.last_ipc = 0.0;
                    return CounterDeltas::default();
                }

                self.state.last_pmu = delta.pmu;
                self.state.last_retired_instructions = delta.retired_instructions;
                self.state.last_cycles = delta.cycles;
                self.state.last_ipc =
                    CoreState::compute_ipc(delta.retired_instructions, delta.cycles);
                delta
            }
            None => {
                log::warn!("counter read failed on core {}", self.state.core_id);
                self.state.last_pmu = [0; PMU_EVENT_COUNT];
                self.state.last_retired_instructions = 0;
                self.state.last_cycles = 0;
                self.state.last_ipc = 0.0;
                self.state.read_failed = true;
                CounterDeltas::default()
            }
        }
    }

    /// Writes `state.current_msr_value` to the prefetcher-control MSR if
    /// this core is primary-in-module and the value is marked dirty.
    pub fn apply_msr_if_dirty(&mut self, prefetcher_control_msr: u64) {
        if self.is_primary && self.state.msr_dirty {
            if let Err(err) = self.access.write(prefetcher_control_msr, self.state.current_msr_value)
            {
                log::warn!(
                    "MSR write failed on core {}: {err}; continuing with stale value",
                    self.state.core_id
                );
            } else {
                self.state.msr_dirty = false;
            }
        }
    }
}

/// Cooperative shutdown flag, checked on each sampler loop entry and
/// inside the master's barrier wait (§5).
pub fn should_continue(shutdown: &Arc<AtomicBool>) -> bool {
    !shutdown.load(Ordering::Relaxed)
}

/// Sleeps for the tick interval, unless shutdown has already been
/// requested, in which case it returns immediately.
pub fn sleep_until_next_tick(tick_interval: Duration, shutdown: &Arc<AtomicBool>) {
    if should_continue(shutdown) {
        std::thread::sleep(tick_interval);
    }
}

pub fn barrier_arrive(barrier: &Arc<TickBarrier>, is_master: bool) -> bool {
    barrier.arrive_and_wait_for_master(is_master)
}

/// The full list of programmable events this layer configures at sampler
/// start, re-exported here for the sampler's setup step.
pub const DEFAULT_EVENTS: [crate::msr::PmuEvent; PMU_EVENT_COUNT] = PMU_EVENTS;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msr::mock::MockMsrPmuAccess;
    use crate::msr::{IA32_FIXED_CTR0, IA32_FIXED_CTR2};

    #[test]
    fn first_tick_deltas_are_zero() {
        let access = MockMsrPmuAccess::new();
        let previous = CounterDeltas::default();
        let (_, delta) = read_counter_deltas(&access, &previous).unwrap();
        assert_eq!(delta.retired_instructions, 0);
        assert_eq!(delta.cycles, 0);
    }

    #[test]
    fn second_tick_reflects_delta() {
        let access = MockMsrPmuAccess::new();
        access.set(IA32_FIXED_CTR0, 1000);
        access.set(IA32_FIXED_CTR2, 2000);
        let (raw1, _) = read_counter_deltas(&access, &CounterDeltas::default()).unwrap();

        access.set(IA32_FIXED_CTR0, 1500);
        access.set(IA32_FIXED_CTR2, 2500);
        let (_, delta2) = read_counter_deltas(&access, &raw1).unwrap();
        assert_eq!(delta2.retired_instructions, 500);
        assert_eq!(delta2.cycles, 500);
    }

    #[test]
    fn wrapping_sub_handles_counter_overflow() {
        let access = MockMsrPmuAccess::new();
        access.set(IA32_FIXED_CTR0, 10);
        let previous = CounterDeltas {
            retired_instructions: u64::MAX - 5,
            ..Default::default()
        };
        let (_, delta) = read_counter_deltas(&access, &previous).unwrap();
        // (10 - (MAX - 5)) mod 2^64 == 16
        assert_eq!(delta.retired_instructions, 16);
    }

    #[test]
    fn compute_ipc_guards_against_zero_cycles() {
        assert_eq!(CoreState::compute_ipc(100, 0), 0.0);
        assert_eq!(CoreState::compute_ipc(100, 200), 0.5);
    }

    #[test]
    fn implausible_delta_is_suspected_overflow_and_reported_as_zero() {
        let access = MockMsrPmuAccess::new();
        access.set(IA32_FIXED_CTR0, 10);
        let mut previous = CounterDeltas {
            retired_instructions: MAX_PLAUSIBLE_COUNTER_DELTA, // delta would be absurdly large
            ..Default::default()
        };
        let mut state = CoreState::new(0, 0, 50, 0);
        let mut ctx = SamplerTickContext {
            access: &access,
            state: &mut state,
            previous_counters: &mut previous,
            is_primary: false,
        };
        let delta = ctx.sample();
        assert_eq!(delta.retired_instructions, 0);
        assert_eq!(state.last_ipc, 0.0);
        assert!(!state.read_failed);
    }
}
