//! Coordinator (§4.4, §5): owns every per-core sampler thread, the shared
//! tick barrier, the module table, and the control algorithm. One thread is
//! spawned per monitored core except the first, which runs on the calling
//! thread and doubles as the master — the thread the barrier hands control
//! to once every sampler has published its sample for the tick.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::arms::{self, ArmTable};
use crate::barrier::TickBarrier;
use crate::bandwidth::BandwidthProbe;
use crate::config::Config;
use crate::controller::Controller;
use crate::error::{DeviceError, PrefetchCtlError, TopologyError};
use crate::module_state::{discover_modules, module_id_of, primary_core_of, ModuleState};
use crate::msr::{LinuxMsrPmuAccess, MsrPmuAccess, IA32_MISC_FEATURE_CONTROL};
use crate::sampler::{
    barrier_arrive, pin_to_core, should_continue, sleep_until_next_tick, CounterDeltas, CoreState,
    SamplerTickContext, DEFAULT_EVENTS,
};

pub struct Coordinator {
    config: Config,
    shutdown: Arc<AtomicBool>,
    arm_table: ArmTable,
}

impl Coordinator {
    pub fn new(config: Config, shutdown: Arc<AtomicBool>) -> Result<Self, PrefetchCtlError> {
        let arm_table = arms::resolve_arm_table(config.arm_configuration)?;
        Ok(Self {
            config,
            shutdown,
            arm_table,
        })
    }

    /// Runs the sampling/control loop until the shutdown flag is set,
    /// joining every sampler thread before returning. `controller` and
    /// `bandwidth_probe` are run exclusively on the master (this calling
    /// thread, doubling as core `core_first`'s sampler).
    pub fn run(
        self,
        mut controller: Box<dyn Controller>,
        mut bandwidth_probe: Box<dyn BandwidthProbe>,
    ) -> Result<(), PrefetchCtlError> {
        let cores: Vec<u32> = (self.config.core_first..=self.config.core_last).collect();
        if cores.is_empty() {
            return Err(TopologyError::NoCoresDiscovered {
                first: self.config.core_first,
                last: self.config.core_last,
            }
            .into());
        }

        let mut modules = discover_modules(
            self.config.core_first,
            self.config.core_last,
            self.config.module_size,
        );
        let core_states: Arc<Vec<Mutex<CoreState>>> = Arc::new(
            cores
                .iter()
                .map(|&core_id| {
                    let module_id = module_id_of(core_id, self.config.module_size);
                    Mutex::new(CoreState::new(
                        core_id,
                        module_id,
                        self.config.priority_of(core_id),
                        self.arm_table.safe_value(),
                    ))
                })
                .collect(),
        );

        let barrier = TickBarrier::new(cores.len() as u32);
        let tick_interval = Duration::from_secs_f64(self.config.tick_interval_secs);
        let safe_value = self.arm_table.safe_value();

        let mut handles = Vec::new();
        for (i, &core_id) in cores.iter().enumerate().skip(1) {
            let is_primary = core_id
                == primary_core_of(
                    module_id_of(core_id, self.config.module_size),
                    self.config.module_size,
                    self.config.core_first,
                );
            let barrier = barrier.clone();
            let shutdown = self.shutdown.clone();
            let core_states = core_states.clone();

            let handle = thread::Builder::new()
                .name(format!("prefetchctl-core{core_id}"))
                .spawn(move || -> Result<(), DeviceError> {
                    run_sampler_loop(
                        core_id,
                        is_primary,
                        i,
                        &core_states,
                        &barrier,
                        &shutdown,
                        tick_interval,
                        safe_value,
                    )
                })
                .expect("failed to spawn sampler thread");
            handles.push(handle);
        }

        let master_core = cores[0];
        let master_is_primary = master_core
            == primary_core_of(
                module_id_of(master_core, self.config.module_size),
                self.config.module_size,
                self.config.core_first,
            );
        let master_result = run_master_loop(
            master_core,
            master_is_primary,
            &core_states,
            &barrier,
            &self.shutdown,
            tick_interval,
            safe_value,
            &mut *controller,
            &mut *bandwidth_probe,
            &mut modules,
        );

        let mut first_error = master_result.err();
        for handle in handles {
            if let Ok(Err(err)) = handle.join() {
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(PrefetchCtlError::Device(err)),
            None => Ok(()),
        }
    }
}

/// Non-master sampler: sleep, sample, arrive, and (if primary) apply the
/// controller's decision once released. Identical shape to the master's
/// loop minus the controller step.
#[allow(clippy::too_many_arguments)]
fn run_sampler_loop(
    core_id: u32,
    is_primary: bool,
    slot: usize,
    core_states: &Arc<Vec<Mutex<CoreState>>>,
    barrier: &Arc<TickBarrier>,
    shutdown: &Arc<AtomicBool>,
    tick_interval: Duration,
    safe_value: u64,
) -> Result<(), DeviceError> {
    pin_to_core(core_id)?;
    let access = LinuxMsrPmuAccess::open(core_id)?;
    access.configure_counters(&DEFAULT_EVENTS)?;
    access.enable_fixed()?;

    let mut previous = CounterDeltas::default();
    while should_continue(shutdown) {
        sleep_until_next_tick(tick_interval, shutdown);
        if !should_continue(shutdown) {
            break;
        }

        {
            let mut state = core_states[slot].lock();
            let mut ctx = SamplerTickContext {
                access: &access,
                state: &mut *state,
                previous_counters: &mut previous,
                is_primary,
            };
            ctx.sample();
        }

        barrier_arrive(barrier, false);

        {
            let mut state = core_states[slot].lock();
            let mut ctx = SamplerTickContext {
                access: &access,
                state: &mut *state,
                previous_counters: &mut previous,
                is_primary,
            };
            ctx.apply_msr_if_dirty(IA32_MISC_FEATURE_CONTROL);
        }
    }

    if is_primary {
        if let Err(err) = access.write(IA32_MISC_FEATURE_CONTROL, safe_value) {
            log::warn!("core {core_id}: failed to restore safe prefetcher value on shutdown: {err}");
        }
    }
    Ok(())
}

/// The master's loop: identical sampling steps plus the controller
/// invocation that happens once every sampler (including the master
/// itself) has arrived for the tick.
#[allow(clippy::too_many_arguments)]
fn run_master_loop(
    core_id: u32,
    is_primary: bool,
    core_states: &Arc<Vec<Mutex<CoreState>>>,
    barrier: &Arc<TickBarrier>,
    shutdown: &Arc<AtomicBool>,
    tick_interval: Duration,
    safe_value: u64,
    controller: &mut dyn Controller,
    bandwidth_probe: &mut dyn BandwidthProbe,
    modules: &mut [ModuleState],
) -> Result<(), DeviceError> {
    pin_to_core(core_id)?;
    let access = LinuxMsrPmuAccess::open(core_id)?;
    access.configure_counters(&DEFAULT_EVENTS)?;
    access.enable_fixed()?;

    let mut previous = CounterDeltas::default();
    let mut tick: u64 = 0;
    while should_continue(shutdown) {
        sleep_until_next_tick(tick_interval, shutdown);
        if !should_continue(shutdown) {
            break;
        }

        {
            let mut state = core_states[0].lock();
            let mut ctx = SamplerTickContext {
                access: &access,
                state: &mut *state,
                previous_counters: &mut previous,
                is_primary,
            };
            ctx.sample();
        }

        let is_master = barrier_arrive(barrier, true);
        debug_assert!(is_master);

        // Phase A is complete: every sampler has published. Snapshot every
        // core's state, run the bandwidth probe and controller, and write
        // each module's decision back into its primary core's slot before
        // releasing phase B.
        let bw_mb_s = bandwidth_probe.sample_mb_s();
        run_controller_and_apply(core_states, tick, bw_mb_s, controller, modules);

        tick += 1;
        barrier.release();

        {
            let mut state = core_states[0].lock();
            let mut ctx = SamplerTickContext {
                access: &access,
                state: &mut *state,
                previous_counters: &mut previous,
                is_primary,
            };
            ctx.apply_msr_if_dirty(IA32_MISC_FEATURE_CONTROL);
        }
    }

    if is_primary {
        if let Err(err) = access.write(IA32_MISC_FEATURE_CONTROL, safe_value) {
            log::warn!("core {core_id}: failed to restore safe prefetcher value on shutdown: {err}");
        }
    }
    Ok(())
}

/// Runs the controller against a snapshot of every core's published state
/// and writes each module's decision back into its primary core's slot.
/// Extracted from `run_master_loop` so the primary-core lookup can be
/// exercised directly in tests, without spawning threads or opening real
/// MSR devices.
fn run_controller_and_apply(
    core_states: &Arc<Vec<Mutex<CoreState>>>,
    tick: u64,
    bw_mb_s: u32,
    controller: &mut dyn Controller,
    modules: &mut [ModuleState],
) {
    let snapshot: Vec<CoreState> = core_states.iter().map(|s| s.lock().clone()).collect();
    let decisions = controller.decide(tick, bw_mb_s, &snapshot, modules);

    let index_of = |primary_core_id: u32| snapshot.iter().position(|s| s.core_id == primary_core_id);
    // §8 "exactly one MSR write... where the chosen value differs from the
    // current one; zero writes when unchanged": only mark dirty on an
    // actual change.
    for (primary_core_id, msr_value) in decisions {
        if let Some(idx) = index_of(primary_core_id) {
            let mut state = core_states[idx].lock();
            if state.current_msr_value != msr_value {
                state.current_msr_value = msr_value;
                state.msr_dirty = true;
            }
        }
    }
}
