//! `prefetchctl`: a closed-loop controller for Intel hardware-prefetcher
//! MSRs. See `--help` for the configuration surface; module-level docs
//! throughout this crate follow the section numbering of the design
//! document this binary was built from.

use std::fs;
use std::process::ExitCode;

use clap::Parser;

mod arms;
mod bandwidth;
mod barrier;
mod cli;
mod config;
mod controller;
mod coordinator;
mod error;
mod kernel_helper;
mod module_state;
mod msr;
mod sampler;
mod shutdown;

use bandwidth::select_probe;
use cli::CliArgs;
use config::{Algorithm, Config};
use controller::heur::{HeurController, HeurVariant, Ladder};
use controller::mab::MabController;
use controller::Controller;
use coordinator::Coordinator;
use error::PrefetchCtlError;

fn main() -> ExitCode {
    env_logger::init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

fn run() -> Result<(), PrefetchCtlError> {
    let args = CliArgs::parse();
    let config = Config::from_cli(args)?;
    let shutdown = shutdown::install();

    let core_ids: Vec<u32> = (config.core_first..=config.core_last).collect();
    let bandwidth_probe = select_probe(
        &config,
        &core_ids,
        Box::new(memory_controller_reader()),
        Box::new(rdt_monitor_reader()),
    );
    let controller = build_controller(&config)?;

    let coordinator = Coordinator::new(config, shutdown)?;
    coordinator.run(controller, bandwidth_probe)
}

fn build_controller(config: &Config) -> Result<Box<dyn Controller>, PrefetchCtlError> {
    match config.algorithm {
        Algorithm::Heur0 => Ok(Box::new(HeurController::new(
            Ladder::default_ladder(),
            HeurVariant::Plain,
            config.aggressiveness,
            config.ddr_bw_target,
        ))),
        Algorithm::HeurPrio => Ok(Box::new(HeurController::new(
            Ladder::default_ladder(),
            HeurVariant::PriorityScaled,
            config.aggressiveness,
            config.ddr_bw_target,
        ))),
        Algorithm::Mab => {
            let arms = arms::resolve_arm_table(config.arm_configuration)?;
            Ok(Box::new(MabController::new(
                arms,
                config.epsilon,
                config.gamma,
                config.c,
                config.reward_type,
                config.dynamic_sd,
                config.sd_step_threshold,
                config.sliding_window,
                config.ddr_bw_target,
            )))
        }
    }
}

/// Real per-socket memory-controller counter access requires mapping
/// platform-specific PCI configuration space, an external collaborator
/// (§1); this reader always reports "unknown" until one is wired in, which
/// is safe because `BandwidthProbe::sample_mb_s`'s `0` return means exactly
/// that (§4.2).
fn memory_controller_reader() -> impl FnMut() -> Option<u64> + Send {
    let mut warned = false;
    move || {
        if !warned {
            log::warn!(
                "memory-controller bandwidth probe has no platform-specific register \
                 mapping in this binary; reporting bandwidth as unknown"
            );
            warned = true;
        }
        None
    }
}

/// Reads the resctrl `mbm_total_bytes` monitor file for resource-monitoring
/// id `id` — the standard Linux interface on hosts with CAT/MBM mounted at
/// `/sys/fs/resctrl` (selected via `--has-mbm`).
fn rdt_monitor_reader() -> impl FnMut(u32) -> Option<u64> + Send {
    move |id: u32| {
        let path = format!("/sys/fs/resctrl/mon_data/mon_L3_{id:02}/mbm_total_bytes");
        fs::read_to_string(&path).ok()?.trim().parse().ok()
    }
}
