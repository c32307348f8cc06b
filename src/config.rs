use std::collections::HashMap;

use crate::cli::{AlgorithmArg, BandwidthModeArg, CliArgs, DynamicSdArg, RewardArg};
use crate::error::ConfigError;

/// Control algorithm, independent of the CLI's string representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Heur0,
    HeurPrio,
    Mab,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewardType {
    Ipc,
    IpcOverBandwidth,
    SdPenalized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicSd {
    Off,
    On,
    Step,
}

/// Validated, immutable configuration for one run. Built once at startup
/// from `CliArgs`; never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    pub core_first: u32,
    pub core_last: u32,
    pub module_size: u32,
    pub tick_interval_secs: f64,
    pub algorithm: Algorithm,
    pub aggressiveness: f64,
    pub ddr_bw_target: u32,
    pub priorities: HashMap<u32, u8>,
    pub epsilon: f64,
    pub gamma: f64,
    pub c: f64,
    pub arm_configuration: u32,
    pub reward_type: RewardType,
    pub dynamic_sd: DynamicSd,
    pub sliding_window: usize,
    pub sd_step_threshold: f64,
    pub has_mbm: bool,
}

impl Config {
    /// Default per-core priority when not overridden on the command line.
    pub const DEFAULT_PRIORITY: u8 = 50;

    pub fn priority_of(&self, core: u32) -> u8 {
        self.priorities
            .get(&core)
            .copied()
            .unwrap_or(Self::DEFAULT_PRIORITY)
    }

    pub fn from_cli(args: CliArgs) -> Result<Self, ConfigError> {
        let core_first = args.core_first.unwrap_or(0);
        let core_last = args
            .core_last
            .unwrap_or_else(|| core_first + num_cpus::get() as u32 - 1);
        if core_last < core_first {
            return Err(ConfigError::EmptyCoreRange {
                first: core_first,
                last: core_last,
            });
        }

        let tick_interval_secs = args.tick_interval.clamp(0.0001, 60.0);
        if args.tick_interval <= 0.0 {
            return Err(ConfigError::NonPositiveTickInterval(args.tick_interval));
        }

        if !(0.1..=5.0).contains(&args.aggressiveness) {
            return Err(ConfigError::AggressivenessOutOfRange(args.aggressiveness));
        }

        if matches!(args.bandwidth_mode, BandwidthModeArg::SelfTest) {
            return Err(ConfigError::SelfTestNotSupported);
        }

        if !(0.0..=1.0).contains(&args.epsilon) {
            return Err(ConfigError::EpsilonOutOfRange(args.epsilon));
        }
        if !(0.0..1.0).contains(&args.gamma) {
            return Err(ConfigError::GammaOutOfRange(args.gamma));
        }

        let mut priorities = HashMap::new();
        for (core, value) in args.priorities {
            if value as u32 > 99 {
                return Err(ConfigError::PriorityOutOfRange {
                    core,
                    value: value as u32,
                });
            }
            priorities.insert(core, value);
        }

        let algorithm = match args.algorithm {
            AlgorithmArg::Heur0 => Algorithm::Heur0,
            AlgorithmArg::HeurPrio => Algorithm::HeurPrio,
            AlgorithmArg::Mab => Algorithm::Mab,
        };
        let reward_type = match args.reward {
            RewardArg::Ipc => RewardType::Ipc,
            RewardArg::IpcOverBandwidth => RewardType::IpcOverBandwidth,
            RewardArg::SdPenalized => RewardType::SdPenalized,
        };
        let dynamic_sd = match args.dynamic_sd {
            DynamicSdArg::Off => DynamicSd::Off,
            DynamicSdArg::On => DynamicSd::On,
            DynamicSdArg::Step => DynamicSd::Step,
        };

        Ok(Config {
            core_first,
            core_last,
            module_size: args.module_size.max(1),
            tick_interval_secs,
            algorithm,
            aggressiveness: args.aggressiveness,
            ddr_bw_target: args.bandwidth_target,
            priorities,
            epsilon: args.epsilon,
            gamma: args.gamma,
            c: args.c,
            arm_configuration: args.arm_configuration,
            reward_type,
            dynamic_sd,
            sliding_window: args.sliding_window.max(1),
            sd_step_threshold: args.sd_step_threshold,
            has_mbm: args.has_mbm,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::parse_from(std::iter::once("prefetchctl").chain(args.iter().copied()))
    }

    #[test]
    fn rejects_inverted_core_range() {
        let cli = parse(&["--core-first", "5", "--core-last", "2"]);
        assert!(matches!(
            Config::from_cli(cli),
            Err(ConfigError::EmptyCoreRange { .. })
        ));
    }

    #[test]
    fn rejects_out_of_range_priority() {
        // clap's value_parser rejects this before Config::from_cli sees it.
        assert!(CliArgs::try_parse_from(["prefetchctl", "--priority", "0=150"]).is_err());
    }

    #[test]
    fn rejects_bad_aggressiveness() {
        let cli = parse(&["--aggressiveness", "10.0"]);
        assert!(matches!(
            Config::from_cli(cli),
            Err(ConfigError::AggressivenessOutOfRange(_))
        ));
    }

    #[test]
    fn rejects_self_test_mode() {
        let cli = parse(&["--bandwidth-mode", "self-test"]);
        assert!(matches!(
            Config::from_cli(cli),
            Err(ConfigError::SelfTestNotSupported)
        ));
    }

    #[test]
    fn default_priority_is_fifty() {
        let cli = parse(&[]);
        let cfg = Config::from_cli(cli).unwrap();
        assert_eq!(cfg.priority_of(7), 50);
    }

    #[test]
    fn priority_override_applies() {
        let cli = parse(&["--priority", "3=99", "--priority", "4=1"]);
        let cfg = Config::from_cli(cli).unwrap();
        assert_eq!(cfg.priority_of(3), 99);
        assert_eq!(cfg.priority_of(4), 1);
        assert_eq!(cfg.priority_of(5), 50);
    }
}
