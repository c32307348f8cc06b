//! Control algorithms (§4.5, §4.6): HEUR (threshold ladder) and MAB
//! (contextual bandit). Both implement the same `Controller` trait so the
//! coordinator can dispatch to either one selected independently at
//! startup (§9 "HEUR as special case of MAB").

pub mod heur;
pub mod mab;

use crate::module_state::ModuleState;
use crate::sampler::CoreState;

/// One MSR value to write, keyed by the module's primary core id.
pub type Decision = (u32, u64);

/// Runs the per-tick control algorithm. Called exactly once per tick, by
/// the master thread, in the gap between barrier phase A completion and
/// phase B start (§4.4). Reads every `CoreState` and the current bandwidth
/// estimate; returns the new MSR value for each module's primary core,
/// mutating `modules` in place to track its own ladder level / arm index.
pub trait Controller: Send {
    fn decide(
        &mut self,
        tick: u64,
        bw_mb_s: u32,
        core_states: &[CoreState],
        modules: &mut [ModuleState],
    ) -> Vec<Decision>;
}

/// Priority-weighted mean IPC across all cores (§4.6 step 1, §4.5 alg=1).
/// `ipc_mean = sum(priority_c * ipc_c) / sum(priority_c)`.
pub fn priority_weighted_ipc_mean(core_states: &[CoreState]) -> f64 {
    let weight_sum: f64 = core_states.iter().map(|c| c.priority as f64).sum();
    if weight_sum == 0.0 {
        return 0.0;
    }
    let weighted: f64 = core_states
        .iter()
        .map(|c| c.priority as f64 * c.last_ipc)
        .sum();
    weighted / weight_sum
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core(priority: u8, ipc: f64) -> CoreState {
        let mut c = CoreState::new(0, 0, priority, 0);
        c.last_ipc = ipc;
        c
    }

    #[test]
    fn priority_weighted_mean_matches_seeded_scenario() {
        // §8 scenario 4: priorities [99, 1], IPCs [0.5, 2.0] -> 0.515
        let cores = vec![core(99, 0.5), core(1, 2.0)];
        let mean = priority_weighted_ipc_mean(&cores);
        assert!((mean - 0.515).abs() < 1e-9);
    }
}
