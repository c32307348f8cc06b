//! HEUR controller (§4.5): a bandwidth-gated walk over a linearly-ordered
//! ladder of prefetcher-aggressiveness levels, level 0 most conservative.

use super::{Controller, Decision};
use crate::module_state::ModuleState;
use crate::sampler::CoreState;

/// The ladder table: MSR value at each level, ordered conservative (index
/// 0) to aggressive (last index).
#[derive(Debug, Clone)]
pub struct Ladder {
    levels: Vec<u64>,
}

impl Ladder {
    pub fn new(levels: Vec<u64>) -> Self {
        assert!(!levels.is_empty(), "ladder must have at least one level");
        Self { levels }
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn msr_value(&self, level: u32) -> u64 {
        self.levels[level as usize]
    }

    /// The documented default ladder: four levels, conservative to
    /// aggressive.
    pub fn default_ladder() -> Self {
        Self::new(vec![0x0F, 0x0B, 0x03, 0x00])
    }
}

/// HEUR's algorithm variant (§4.5): `Plain` moves every module by the same
/// step; `PriorityScaled` (alg=1) scales each module's step size by its
/// summed core priority relative to the fleet mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeurVariant {
    Plain,
    PriorityScaled,
}

pub struct HeurController {
    ladder: Ladder,
    variant: HeurVariant,
    aggressiveness: f64,
    ddr_bw_target: u32,
    margin_up_frac: f64,
    margin_dn_frac: f64,
}

impl HeurController {
    pub fn new(
        ladder: Ladder,
        variant: HeurVariant,
        aggressiveness: f64,
        ddr_bw_target: u32,
    ) -> Self {
        Self {
            ladder,
            variant,
            aggressiveness,
            ddr_bw_target,
            margin_up_frac: 0.10,
            margin_dn_frac: 0.05,
        }
    }

    fn base_step(&self) -> u32 {
        (self.aggressiveness.round() as i64).max(1) as u32
    }

    fn scaled_step(&self, module_priority_sum: f64, mean_priority_sum: f64) -> u32 {
        let base = self.base_step();
        match self.variant {
            HeurVariant::Plain => base,
            HeurVariant::PriorityScaled => {
                if mean_priority_sum <= 0.0 {
                    base
                } else {
                    let scale = module_priority_sum / mean_priority_sum;
                    ((base as f64) * scale).round().max(1.0) as u32
                }
            }
        }
    }
}

impl Controller for HeurController {
    fn decide(
        &mut self,
        _tick: u64,
        bw_mb_s: u32,
        core_states: &[CoreState],
        modules: &mut [ModuleState],
    ) -> Vec<Decision> {
        // §4.5: "If bw == 0 (probe unknown), hold." Never raise on an
        // unknown reading.
        if bw_mb_s == 0 {
            return modules
                .iter()
                .map(|m| (m.primary_core_id, self.ladder.msr_value(m.current_ladder_level)))
                .collect();
        }

        let module_priority_sums: Vec<f64> = modules
            .iter()
            .map(|m| {
                core_states
                    .iter()
                    .filter(|c| c.module_id == m.module_id)
                    .map(|c| c.priority as f64)
                    .sum()
            })
            .collect();
        let mean_priority_sum = if module_priority_sums.is_empty() {
            0.0
        } else {
            module_priority_sums.iter().sum::<f64>() / module_priority_sums.len() as f64
        };

        let target = self.ddr_bw_target as f64;
        let headroom = target - bw_mb_s as f64;
        let margin_up = target * self.margin_up_frac;
        let margin_dn = target * self.margin_dn_frac;

        let mut decisions = Vec::with_capacity(modules.len());
        for (module, &priority_sum) in modules.iter_mut().zip(module_priority_sums.iter()) {
            let step = self.scaled_step(priority_sum, mean_priority_sum);
            let last_level = self.ladder.len() as u32 - 1;

            if headroom > margin_up {
                module.current_ladder_level = (module.current_ladder_level + step).min(last_level);
            } else if headroom < -margin_dn {
                module.current_ladder_level = module.current_ladder_level.saturating_sub(step);
            }
            // else: unchanged. Ties at exactly +/-margin resolve toward
            // the lower (more conservative) level by falling through to
            // "unchanged" here, since neither strict inequality fires.

            decisions.push((
                module.primary_core_id,
                self.ladder.msr_value(module.current_ladder_level),
            ));
        }
        decisions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module_state::discover_modules;

    fn core(module_id: u32, priority: u8) -> CoreState {
        CoreState::new(module_id * 4, module_id, priority, 0x0F)
    }

    #[test]
    fn raises_when_well_under_target() {
        let ladder = Ladder::default_ladder();
        let mut controller = HeurController::new(ladder, HeurVariant::Plain, 1.0, 10_000);
        let mut modules = discover_modules(0, 3, 4);
        modules[0].current_ladder_level = 1;
        let cores = vec![core(0, 50)];

        // bw far below target (headroom 2000 > margin_up 1000): raise.
        let decisions = controller.decide(1, 8_000, &cores, &mut modules);
        assert_eq!(modules[0].current_ladder_level, 2);
        assert_eq!(decisions[0].1, ladder_value(2));
    }

    #[test]
    fn lowers_when_well_over_target() {
        let ladder = Ladder::default_ladder();
        let mut controller = HeurController::new(ladder, HeurVariant::Plain, 1.0, 10_000);
        let mut modules = discover_modules(0, 3, 4);
        modules[0].current_ladder_level = 2;
        let cores = vec![core(0, 50)];

        // bw far above target (headroom -1000 < -margin_dn -500): lower.
        let decisions = controller.decide(1, 11_000, &cores, &mut modules);
        assert_eq!(modules[0].current_ladder_level, 1);
        assert_eq!(decisions[0].1, ladder_value(1));
    }

    #[test]
    fn holds_within_band() {
        let ladder = Ladder::default_ladder();
        let mut controller = HeurController::new(ladder, HeurVariant::Plain, 1.0, 10_000);
        let mut modules = discover_modules(0, 3, 4);
        modules[0].current_ladder_level = 2;
        let cores = vec![core(0, 50)];

        // headroom = 10000 - 9800 = 200, within [-500, 1000]: hold.
        controller.decide(1, 9_800, &cores, &mut modules);
        assert_eq!(modules[0].current_ladder_level, 2);
    }

    #[test]
    fn holds_on_unknown_bandwidth() {
        let ladder = Ladder::default_ladder();
        let mut controller = HeurController::new(ladder, HeurVariant::Plain, 1.0, 10_000);
        let mut modules = discover_modules(0, 3, 4);
        modules[0].current_ladder_level = 2;
        let cores = vec![core(0, 50)];

        controller.decide(1, 0, &cores, &mut modules);
        assert_eq!(modules[0].current_ladder_level, 2);
    }

    #[test]
    fn never_exceeds_top_level() {
        let ladder = Ladder::default_ladder();
        let mut controller = HeurController::new(ladder, HeurVariant::Plain, 5.0, 10_000);
        let mut modules = discover_modules(0, 3, 4);
        modules[0].current_ladder_level = 2;
        let cores = vec![core(0, 50)];

        controller.decide(1, 0, &cores, &mut modules);
        controller.decide(2, 1, &cores, &mut modules);
        assert_eq!(modules[0].current_ladder_level, 3);
    }

    fn ladder_value(level: u32) -> u64 {
        Ladder::default_ladder().msr_value(level)
    }
}
