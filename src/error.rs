use thiserror::Error;

/// Fatal errors raised while parsing and validating the configuration
/// surface (§4.7). All of these are detected before any device is opened.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("core range is empty or inverted: first={first}, last={last}")]
    EmptyCoreRange { first: u32, last: u32 },

    #[error("priority for core {core} is {value}, must be in [0, 99]")]
    PriorityOutOfRange { core: u32, value: u32 },

    #[error("aggressiveness {0} is out of range [0.1, 5.0]")]
    AggressivenessOutOfRange(f64),

    #[error("tick interval {0}s is not positive")]
    NonPositiveTickInterval(f64),

    #[error("unknown arm configuration id {0}")]
    UnknownArmConfiguration(u32),

    #[error("bandwidth-mode 'self-test' requires the external self-test collaborator, which this binary does not embed")]
    SelfTestNotSupported,

    #[error("epsilon {0} is out of range [0.0, 1.0]")]
    EpsilonOutOfRange(f64),

    #[error("gamma {0} is out of range (0.0, 1.0)")]
    GammaOutOfRange(f64),
}

/// Raised when no monitored cores could be discovered on this host.
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("no cores discovered in range [{first}, {last}]")]
    NoCoresDiscovered { first: u32, last: u32 },
}

/// MSR device, PMU, and bandwidth-probe access failures.
///
/// Fatal at startup; during the steady-state loop a `DeviceError` observed
/// by a sampler is logged and the tick continues with a stale value
/// (§5 "Fault containment") rather than propagated.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("could not open MSR device for core {core}: {source}")]
    Open { core: u32, source: std::io::Error },

    #[error("MSR read failed on core {core}, register {register:#x}: {source}")]
    Read {
        core: u32,
        register: u64,
        source: std::io::Error,
    },

    #[error("MSR write failed on core {core}, register {register:#x}: {source}")]
    Write {
        core: u32,
        register: u64,
        source: std::io::Error,
    },

    #[error("failed to pin core {core} to its CPU: {source}")]
    Pin {
        core: u32,
        #[source]
        source: PinError,
    },

    #[error("bandwidth probe initialization failed: {0}")]
    ProbeInit(String),
}

/// Wraps the platform-specific affinity error so `DeviceError` stays
/// portable across targets (the real source is `nix::Error` on Linux).
#[derive(Debug, Error)]
#[error("{0}")]
pub struct PinError(pub String);

/// Top-level error type returned from `main`. Only startup-fatal
/// conditions are represented here; steady-state recoverable conditions
/// (`ProbeUnknown`, `CounterOverflowSuspected`) never reach this type —
/// they are logged locally per §7's propagation rule.
#[derive(Debug, Error)]
pub enum PrefetchCtlError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    Device(#[from] DeviceError),
}

impl PrefetchCtlError {
    /// Maps this error onto the process exit code documented in §6.
    pub fn exit_code(&self) -> i32 {
        match self {
            PrefetchCtlError::Config(_) | PrefetchCtlError::Topology(_) => 1,
            PrefetchCtlError::Device(_) => 2,
        }
    }
}
