//! MAB controller (§4.6): ε-greedy / UCB contextual bandit over the arm
//! table, with exponentially-weighted reward estimates and optional
//! sliding-window IPC standard-deviation context.

use std::collections::VecDeque;

use rand::Rng;

use super::{priority_weighted_ipc_mean, Controller, Decision};
use crate::arms::ArmTable;
use crate::config::{DynamicSd, RewardType};
use crate::module_state::ModuleState;
use crate::sampler::CoreState;

pub struct MabController {
    arms: ArmTable,
    epsilon: f64,
    gamma: f64,
    c: f64,
    reward_type: RewardType,
    dynamic_sd: DynamicSd,
    sd_step_threshold: f64,
    ddr_bw_target: u32,

    arm_index: Option<usize>,
    tick: u64,
    ipc_buffer: VecDeque<f64>,
    sd_buffer: VecDeque<f64>,
    window: usize,
    last_sd: Option<f64>,
    rng: Box<dyn RngSource>,
}

/// Narrow seam for deterministic testing of the ε-greedy branch (§8
/// seeded scenario 6, "reproducibility").
pub trait RngSource: Send {
    fn gen_f64(&mut self) -> f64;
    fn gen_index(&mut self, n: usize) -> usize;
}

struct ThreadRngSource;

impl RngSource for ThreadRngSource {
    fn gen_f64(&mut self) -> f64 {
        rand::rng().random::<f64>()
    }

    fn gen_index(&mut self, n: usize) -> usize {
        rand::rng().random_range(0..n)
    }
}

impl MabController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        arms: ArmTable,
        epsilon: f64,
        gamma: f64,
        c: f64,
        reward_type: RewardType,
        dynamic_sd: DynamicSd,
        sd_step_threshold: f64,
        window: usize,
        ddr_bw_target: u32,
    ) -> Self {
        Self {
            arms,
            epsilon,
            gamma,
            c,
            reward_type,
            dynamic_sd,
            sd_step_threshold,
            ddr_bw_target,
            arm_index: None,
            tick: 0,
            ipc_buffer: VecDeque::with_capacity(window),
            sd_buffer: VecDeque::with_capacity(window),
            window,
            last_sd: None,
            rng: Box::new(ThreadRngSource),
        }
    }

    #[cfg(test)]
    pub fn with_rng(mut self, rng: Box<dyn RngSource>) -> Self {
        self.rng = rng;
        self
    }

    /// Raw reward for this tick, before the bandwidth penalty (§4.6 step 3).
    fn raw_reward(&self, ipc_mean: f64) -> f64 {
        match self.reward_type {
            RewardType::Ipc => ipc_mean,
            RewardType::IpcOverBandwidth => ipc_mean, // bandwidth divisor applied by caller
            RewardType::SdPenalized => ipc_mean, // sigma term applied by caller once window fills
        }
    }

    /// Sample standard deviation of `self.ipc_buffer`, or `None` if the
    /// window isn't full yet (§4.6 step 2, "edge case: window underfull").
    fn sample_std_dev(&self) -> Option<f64> {
        if self.ipc_buffer.len() < self.window {
            return None;
        }
        let n = self.ipc_buffer.len() as f64;
        let mean = self.ipc_buffer.iter().sum::<f64>() / n;
        let variance = self
            .ipc_buffer
            .iter()
            .map(|v| (v - mean).powi(2))
            .sum::<f64>()
            / (n - 1.0).max(1.0);
        Some(variance.sqrt())
    }

    fn select_arm(&mut self) -> usize {
        let m = self.arms.len();
        if self.rng.gen_f64() < self.epsilon {
            return self.rng.gen_index(m);
        }

        let mut best_index = 0;
        let mut best_score = f64::NEG_INFINITY;
        for i in 0..m {
            let stats = self.arms.stats(i);
            let score = if self.tick == 0 || stats.selection_count == 0 {
                f64::INFINITY
            } else {
                let bonus = self.c * ((self.tick as f64).ln() / stats.selection_count as f64).sqrt();
                stats.reward_estimate + bonus
            };
            if score > best_score {
                best_score = score;
                best_index = i;
            }
        }
        best_index
    }
}

impl Controller for MabController {
    fn decide(
        &mut self,
        tick: u64,
        bw_mb_s: u32,
        core_states: &[CoreState],
        modules: &mut [ModuleState],
    ) -> Vec<Decision> {
        self.tick = tick;

        // Step 1: observe.
        let ipc_mean = priority_weighted_ipc_mean(core_states);

        // Step 2: context.
        if self.dynamic_sd != DynamicSd::Off {
            if self.ipc_buffer.len() == self.window {
                self.ipc_buffer.pop_front();
            }
            self.ipc_buffer.push_back(ipc_mean);
            if let Some(sd) = self.sample_std_dev() {
                if self.sd_buffer.len() == self.window {
                    self.sd_buffer.pop_front();
                }
                self.sd_buffer.push_back(sd);
            }
        }

        // Step 3: reward.
        let sigma = self.sample_std_dev();
        let mut reward = match self.reward_type {
            RewardType::Ipc => self.raw_reward(ipc_mean),
            RewardType::IpcOverBandwidth => ipc_mean / (bw_mb_s.max(1) as f64),
            RewardType::SdPenalized => match sigma {
                Some(sd) => ipc_mean - 0.1 * sd,
                None => ipc_mean,
            },
        };
        let target = self.ddr_bw_target as f64;
        if self.ddr_bw_target > 0 && bw_mb_s as f64 > target {
            reward = (reward * (target / bw_mb_s as f64)).max(0.0);
        }

        // Step 4: credit the previous arm.
        if let Some(prev) = self.arm_index {
            let stats = self.arms.stats_mut(prev);
            stats.reward_estimate = self.gamma * stats.reward_estimate + (1.0 - self.gamma) * reward;
            stats.selection_count += 1;
            stats.last_selected_tick = tick;
        }

        // Step 5/6: select the next arm. First tick: no prior arm, pick 0.
        let next = if self.arm_index.is_none() {
            0
        } else if self.dynamic_sd == DynamicSd::Step {
            let changed_enough = match (sigma, self.last_sd) {
                (Some(cur), Some(prev)) => (cur - prev).abs() > self.sd_step_threshold,
                _ => true,
            };
            if changed_enough {
                self.select_arm()
            } else {
                self.arm_index.unwrap()
            }
        } else {
            self.select_arm()
        };
        self.last_sd = sigma.or(self.last_sd);
        self.arm_index = Some(next);

        // Step 7: emit. Mark every module's primary core dirty with the
        // chosen arm's MSR value.
        modules
            .iter_mut()
            .map(|m| {
                m.current_arm_index = next;
                (m.primary_core_id, self.arms.msr_value(next))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arms::{Arm, ArmTable};
    use crate::module_state::discover_modules;

    struct ScriptedRng {
        explore: Vec<bool>,
        index: usize,
        uniform_pick: usize,
    }

    impl RngSource for ScriptedRng {
        fn gen_f64(&mut self) -> f64 {
            let explore = self.explore.get(self.index).copied().unwrap_or(false);
            self.index += 1;
            if explore {
                0.0
            } else {
                1.0
            }
        }

        fn gen_index(&mut self, _n: usize) -> usize {
            self.uniform_pick
        }
    }

    fn four_arm_table() -> ArmTable {
        ArmTable::new(vec![
            Arm { msr_value: 0 },
            Arm { msr_value: 1 },
            Arm { msr_value: 2 },
            Arm { msr_value: 3 },
        ])
    }

    fn cores_with_ipc(ipc: f64) -> Vec<CoreState> {
        let mut c = CoreState::new(0, 0, 50, 0);
        c.last_ipc = ipc;
        vec![c]
    }

    #[test]
    fn ucb_warm_up_selects_every_arm_before_exploiting() {
        let arms = four_arm_table();
        let mut controller = MabController::new(
            arms,
            0.0,
            1.0,
            1.0,
            RewardType::Ipc,
            DynamicSd::Off,
            0.0,
            4,
            1_000_000, // effectively no bandwidth penalty
        )
        .with_rng(Box::new(ScriptedRng {
            explore: vec![false; 10],
            index: 0,
            uniform_pick: 0,
        }));
        let mut modules = discover_modules(0, 3, 4);

        let ipcs = [0.8, 1.2, 1.0, 1.1];
        let mut selected = Vec::new();
        for (tick, &ipc) in ipcs.iter().enumerate() {
            let cores = cores_with_ipc(ipc);
            controller.decide(tick as u64, 500, &cores, &mut modules);
            selected.push(modules[0].current_arm_index);
        }
        // Arm 0 is forced at tick 0 (no prior arm). Ticks 1..3 have
        // infinite UCB bonus for the not-yet-selected arms 1, 2, 3.
        assert_eq!(selected, vec![0, 1, 2, 3]);

        // Tick 5 (index 4): every arm has been tried once; Q == the
        // observed IPC for each arm (gamma=1). Arm 1 (Q=1.2) should win.
        let cores = cores_with_ipc(1.1);
        controller.decide(4, 500, &cores, &mut modules);
        assert_eq!(modules[0].current_arm_index, 1);

        for (i, &expected) in ipcs.iter().enumerate() {
            assert!((controller.arms.stats(i).reward_estimate - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn bandwidth_penalty_scales_reward() {
        let arms = four_arm_table();
        let mut controller = MabController::new(
            arms,
            0.0,
            0.5,
            0.0,
            RewardType::Ipc,
            DynamicSd::Off,
            0.0,
            4,
            10_000,
        )
        .with_rng(Box::new(ScriptedRng {
            explore: vec![false; 10],
            index: 0,
            uniform_pick: 0,
        }));
        let mut modules = discover_modules(0, 3, 4);

        // First tick: no prior arm credited, arm 0 chosen.
        let cores = cores_with_ipc(1.2);
        controller.decide(0, 15_000, &cores, &mut modules);
        // Second tick credits arm 0 with the penalized reward from tick 0's
        // observation: 1.2 * (10000/15000) = 0.80.
        controller.decide(1, 15_000, &cores, &mut modules);
        assert!((controller.arms.stats(0).reward_estimate - 0.80).abs() < 1e-9);
    }

    #[test]
    fn first_tick_has_no_prior_arm_and_picks_zero() {
        let arms = four_arm_table();
        let mut controller = MabController::new(
            arms,
            0.0,
            0.9,
            0.0,
            RewardType::Ipc,
            DynamicSd::Off,
            0.0,
            4,
            1_000_000,
        )
        .with_rng(Box::new(ScriptedRng {
            explore: vec![false; 10],
            index: 0,
            uniform_pick: 2,
        }));
        let mut modules = discover_modules(0, 3, 4);
        let cores = cores_with_ipc(1.0);
        controller.decide(0, 500, &cores, &mut modules);
        assert_eq!(modules[0].current_arm_index, 0);
        for i in 0..4 {
            assert_eq!(controller.arms.stats(i).selection_count, 0);
        }
    }

    #[test]
    fn epsilon_one_is_uniform_random_every_tick() {
        let arms = four_arm_table();
        let mut controller = MabController::new(
            arms,
            1.0,
            0.9,
            0.0,
            RewardType::Ipc,
            DynamicSd::Off,
            0.0,
            4,
            1_000_000,
        )
        .with_rng(Box::new(ScriptedRng {
            explore: vec![true; 10],
            index: 0,
            uniform_pick: 2,
        }));
        let mut modules = discover_modules(0, 3, 4);
        let cores = cores_with_ipc(1.0);
        controller.decide(0, 500, &cores, &mut modules);
        controller.decide(1, 500, &cores, &mut modules);
        assert_eq!(modules[0].current_arm_index, 2);
    }

    #[test]
    fn gamma_zero_tracks_last_observed_reward() {
        let arms = four_arm_table();
        let mut controller = MabController::new(
            arms, 0.0, 0.0, 0.0, RewardType::Ipc, DynamicSd::Off, 0.0, 4, 1_000_000,
        )
        .with_rng(Box::new(ScriptedRng {
            explore: vec![false; 10],
            index: 0,
            uniform_pick: 0,
        }));
        let mut modules = discover_modules(0, 3, 4);

        controller.decide(0, 500, &cores_with_ipc(0.5), &mut modules); // picks arm 0
        controller.decide(1, 500, &cores_with_ipc(0.9), &mut modules); // credits arm 0 with 0.5
        assert!((controller.arms.stats(0).reward_estimate - 0.5).abs() < 1e-9);
    }
}
