use clap::{Parser, ValueEnum};

/// A closed-loop controller for Intel hardware-prefetcher MSRs.
///
/// Samples per-core PMU counters and aggregate DRAM bandwidth at a fixed
/// cadence and reprograms prefetcher-control MSRs on a per-module basis to
/// keep IPC high while holding bandwidth below a configured target.
#[derive(Debug, Parser)]
#[command(name = "prefetchctl", version, about)]
pub struct CliArgs {
    /// First monitored core (inclusive). Defaults to 0 if --core-last is given
    /// but --core-first is not; otherwise auto-detected via the host's logical
    /// CPU count.
    #[arg(long)]
    pub core_first: Option<u32>,

    /// Last monitored core (inclusive).
    #[arg(long)]
    pub core_last: Option<u32>,

    /// Sampling cadence, in seconds. Clamped to [0.0001, 60].
    #[arg(long, default_value = "1.0")]
    pub tick_interval: f64,

    /// Control algorithm.
    #[arg(long, value_enum, default_value = "heur0")]
    pub algorithm: AlgorithmArg,

    /// HEUR step-size scaling factor, in [0.1, 5.0].
    #[arg(long, default_value = "1.0")]
    pub aggressiveness: f64,

    /// Upper bound on aggregate DRAM bandwidth, in MB/s.
    #[arg(long, default_value = "10000")]
    pub bandwidth_target: u32,

    /// How the bandwidth target is determined.
    #[arg(long, value_enum, default_value = "set")]
    pub bandwidth_mode: BandwidthModeArg,

    /// Per-core priority override, "core=value" (value in [0, 99]). May be
    /// repeated. Cores not listed default to priority 50.
    #[arg(long = "priority", value_parser = parse_priority)]
    pub priorities: Vec<(u32, u8)>,

    /// Bandit exploration probability.
    #[arg(long, default_value = "0.1")]
    pub epsilon: f64,

    /// Bandit reward decay factor.
    #[arg(long, default_value = "0.959")]
    pub gamma: f64,

    /// Bandit UCB exploration constant.
    #[arg(long, default_value = "0.0006")]
    pub c: f64,

    /// Selects which arm table the bandit controller loads.
    #[arg(long, default_value = "0")]
    pub arm_configuration: u32,

    /// Bandit reward shaping.
    #[arg(long, value_enum, default_value = "ipc")]
    pub reward: RewardArg,

    /// Enables sliding-window IPC standard-deviation context for the bandit.
    #[arg(long, value_enum, default_value = "off")]
    pub dynamic_sd: DynamicSdArg,

    /// Sliding window length (in ticks) used by --dynamic-sd.
    #[arg(long, default_value = "32")]
    pub sliding_window: usize,

    /// Rate-limit threshold for --dynamic-sd=step.
    #[arg(long, default_value = "0.01")]
    pub sd_step_threshold: f64,

    /// Module size, in cores, used to derive module_id = core_id / module_size.
    #[arg(long, default_value = "4")]
    pub module_size: u32,

    /// Assume the host supports an LLC-occupancy/MBM bandwidth monitor. When
    /// unset, falls back to the memory-controller reader. (Real CPUID-based
    /// detection is an external collaborator, see design note §1.)
    #[arg(long)]
    pub has_mbm: bool,
}

fn parse_priority(s: &str) -> Result<(u32, u8), String> {
    let (core, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected CORE=VALUE, got {s:?}"))?;
    let core: u32 = core
        .parse()
        .map_err(|_| format!("invalid core id {core:?}"))?;
    let value: u32 = value
        .parse()
        .map_err(|_| format!("invalid priority {value:?}"))?;
    if value > 99 {
        return Err(format!("priority {value} out of range [0, 99]"));
    }
    Ok((core, value as u8))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AlgorithmArg {
    /// Threshold-gated ladder walk.
    Heur0,
    /// Ladder walk with per-module priority-weighted step scaling.
    HeurPrio,
    /// ε-greedy / UCB contextual bandit.
    Mab,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BandwidthModeArg {
    /// Use --bandwidth-target verbatim.
    Set,
    /// Derive the target as a fraction of a DMI-reported maximum (external
    /// collaborator; not implemented by this binary).
    AutoFraction,
    /// Run a one-shot bandwidth self-test (external collaborator; rejected).
    SelfTest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RewardArg {
    Ipc,
    IpcOverBandwidth,
    SdPenalized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DynamicSdArg {
    Off,
    On,
    Step,
}
