//! The bandit's arm table (§3, §4.6, §4.8).
//!
//! An ordered, immutable array of arms; arm `i` carries the MSR value to
//! program plus per-arm bookkeeping (reward estimate, selection count,
//! last-selected tick). Arm 0 is the architecturally "safe" value: it is
//! what shutdown restores (§5) and what HEUR ladder level 0 uses.

use crate::error::ConfigError;

/// One discrete MSR configuration choice in the bandit's (or HEUR ladder's)
/// action set.
#[derive(Debug, Clone, Copy)]
pub struct Arm {
    pub msr_value: u64,
}

/// Per-arm bookkeeping, mutated only by the master thread between barrier
/// phases (§3 invariants).
#[derive(Debug, Clone, Copy, Default)]
pub struct ArmStats {
    pub reward_estimate: f64,
    pub selection_count: u64,
    pub last_selected_tick: u64,
}

/// An immutable arm table plus mutable per-arm stats, indexed in lockstep.
pub struct ArmTable {
    arms: Vec<Arm>,
    stats: Vec<ArmStats>,
}

impl ArmTable {
    pub fn new(arms: Vec<Arm>) -> Self {
        let stats = vec![ArmStats::default(); arms.len()];
        Self { arms, stats }
    }

    pub fn len(&self) -> usize {
        self.arms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arms.is_empty()
    }

    pub fn msr_value(&self, index: usize) -> u64 {
        self.arms[index].msr_value
    }

    pub fn stats(&self, index: usize) -> &ArmStats {
        &self.stats[index]
    }

    pub fn stats_mut(&mut self, index: usize) -> &mut ArmStats {
        &mut self.stats[index]
    }

    pub fn all_stats(&self) -> &[ArmStats] {
        &self.stats
    }

    /// The restore-to-default "safe" value used on shutdown, always arm 0.
    pub fn safe_value(&self) -> u64 {
        self.arms[0].msr_value
    }
}

/// Resolves `arm_configuration` to a concrete table. Only configuration 0
/// (the default, documented table below) ships with this binary; an
/// unknown id is a `ConfigError`, not a panic (§4.7).
pub fn resolve_arm_table(arm_configuration: u32) -> Result<ArmTable, ConfigError> {
    match arm_configuration {
        0 => Ok(default_table()),
        other => Err(ConfigError::UnknownArmConfiguration(other)),
    }
}

/// The default 8-arm table, spanning conservative (arm 0) to aggressive
/// (arm 7) prefetcher-control MSR settings. The encoding here follows the
/// common convention of one bit per hardware prefetcher unit (L2 streamer,
/// L2 adjacent-line, DCU streamer, DCU IP) in the low nibble, with *set*
/// meaning "disabled" (architecture-specific; consistent with "0x0 = all
/// prefetchers on" being the most aggressive value and is why arm 0, the
/// all-bits-set value, is both the safest and the ladder's level 0).
pub fn default_table() -> ArmTable {
    ArmTable::new(vec![
        Arm { msr_value: 0x0F }, // all four prefetchers disabled: most conservative
        Arm { msr_value: 0x0E },
        Arm { msr_value: 0x0C },
        Arm { msr_value: 0x08 },
        Arm { msr_value: 0x0B },
        Arm { msr_value: 0x03 },
        Arm { msr_value: 0x01 },
        Arm { msr_value: 0x00 }, // all four prefetchers enabled: most aggressive
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_configuration_is_an_error() {
        assert!(matches!(
            resolve_arm_table(7),
            Err(ConfigError::UnknownArmConfiguration(7))
        ));
    }

    #[test]
    fn default_table_has_eight_arms_and_safe_arm_zero() {
        let table = default_table();
        assert_eq!(table.len(), 8);
        assert_eq!(table.safe_value(), table.msr_value(0));
    }
}
