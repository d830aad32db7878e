//! Bus assembly. Only the simulated supply is available from the CLI.

use psu_hardware::{SimFault, SimulatedSupply};

/// Test hook: `PSU_TEST_SIM_FAULT=<dac_write|voltage_read|scan_read>[:after]`
/// makes the simulator fail that transaction kind after `after` successes.
pub const SIM_FAULT_ENV: &str = "PSU_TEST_SIM_FAULT";

pub fn make_bus(cfg: &psu_config::Config) -> eyre::Result<SimulatedSupply> {
    let sim = SimulatedSupply::new()
        .with_load_ohms(cfg.sim.load_ohms)
        .with_shunt(cfg.monitor.shunt_ohms, cfg.monitor.amp_gain)
        .with_channels(cfg.adc.voltage_channel, cfg.adc.current_channel);

    if let Ok(spec) = std::env::var(SIM_FAULT_ENV) {
        let (kind, after) = parse_fault(&spec)?;
        tracing::warn!(?kind, after, "simulated fault injection enabled");
        sim.handle().inject(kind, after);
    }
    tracing::info!(
        load_ohms = cfg.sim.load_ohms,
        cs_pin = cfg.dac.cs_pin,
        "using simulated supply"
    );
    Ok(sim)
}

fn parse_fault(spec: &str) -> eyre::Result<(SimFault, usize)> {
    let (kind, after) = match spec.split_once(':') {
        Some((k, n)) => (
            k,
            n.trim()
                .parse::<usize>()
                .map_err(|e| eyre::eyre!("{SIM_FAULT_ENV}: bad count {n:?}: {e}"))?,
        ),
        None => (spec, 0),
    };
    let kind = match kind.trim() {
        "dac_write" => SimFault::DacWrite,
        "voltage_read" => SimFault::VoltageRead,
        "scan_read" => SimFault::ScanRead,
        other => eyre::bail!("{SIM_FAULT_ENV}: unknown fault kind {other:?}"),
    };
    Ok((kind, after))
}
