#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema and correction-pair parsing for the supply controller.
//!
//! - `Config` and its sections are deserialized from TOML; every section has
//!   defaults matching the bench board, so an empty file is a valid config.
//! - `validate()` rejects values the controller cannot run with.
//! - Current-correction pairs come from a strict CSV or from free text
//!   (`raw true` per line).
use serde::Deserialize;

/// Correction CSV schema.
///
/// Expected headers:
/// raw_ma,true_ma
///
/// Example:
/// raw_ma,true_ma
/// 6.0,10.4
/// 12.5,22.0
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct CorrectionRow {
    pub raw_ma: f64,
    pub true_ma: f64,
}

/// Paired samples ready for the least-squares fit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorrectionPairs {
    pub raw: Vec<f64>,
    pub truth: Vec<f64>,
}

impl CorrectionPairs {
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

impl From<Vec<CorrectionRow>> for CorrectionPairs {
    fn from(rows: Vec<CorrectionRow>) -> Self {
        let (raw, truth) = rows.into_iter().map(|r| (r.raw_ma, r.true_ma)).unzip();
        Self { raw, truth }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DacCfg {
    /// GPIO used as chip select for the MCP49xx.
    pub cs_pin: u8,
    pub spi_hz: u32,
}

impl Default for DacCfg {
    fn default() -> Self {
        Self {
            cs_pin: 22,
            spi_hz: 1_000_000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AdcCfg {
    /// Channel wired to the supply output (read during calibration).
    pub voltage_channel: u8,
    /// Channel wired to the shunt amplifier (continuous scan).
    pub current_channel: u8,
    pub scan_rate_hz: f64,
    /// Max wait for new scan samples per monitor iteration.
    pub read_timeout_ms: u64,
}

impl Default for AdcCfg {
    fn default() -> Self {
        Self {
            voltage_channel: 0,
            current_channel: 5,
            scan_rate_hz: 1000.0,
            read_timeout_ms: 500,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CalibrationCfg {
    /// DAC code increment of the sweep.
    pub step: u16,
    /// Settle wait after each DAC write (ms).
    pub settle_ms: u64,
}

impl Default for CalibrationCfg {
    fn default() -> Self {
        Self {
            step: 32,
            settle_ms: 50,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Most negative voltage an operator may request.
    pub min_voltage: f64,
    /// Overcurrent trip threshold on the corrected current (mA).
    pub max_current_ma: f64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            min_voltage: -10.0,
            max_current_ma: 500.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MonitorCfg {
    /// Sleep between monitor iterations (ms); also the stop-check boundary.
    pub poll_ms: u64,
    pub shunt_ohms: f64,
    pub amp_gain: f64,
}

impl Default for MonitorCfg {
    fn default() -> Self {
        Self {
            poll_ms: 100,
            shunt_ohms: 0.1,
            amp_gain: 69.0,
        }
    }
}

/// Initial current-correction model: `true = a + b * raw`.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct CorrectionCfg {
    pub a: f64,
    pub b: f64,
}

impl Default for CorrectionCfg {
    fn default() -> Self {
        Self {
            a: -0.279388,
            b: 1.782842,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

/// Simulator knobs (used when no hardware backend is compiled in).
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SimCfg {
    pub load_ohms: f64,
}

impl Default for SimCfg {
    fn default() -> Self {
        Self { load_ohms: 100.0 }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub dac: DacCfg,
    pub adc: AdcCfg,
    pub calibration: CalibrationCfg,
    pub limits: Limits,
    pub monitor: MonitorCfg,
    pub correction: CorrectionCfg,
    pub logging: Logging,
    pub sim: SimCfg,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

pub fn load_correction_csv(path: &std::path::Path) -> eyre::Result<CorrectionPairs> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open correction CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["raw_ma", "true_ma"];
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != expected {
        eyre::bail!(
            "correction CSV must have headers 'raw_ma,true_ma', got: {}",
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<CorrectionRow>().enumerate() {
        match rec {
            Ok(row) => rows.push(row),
            Err(e) => {
                eyre::bail!("invalid CSV row {}: {}", idx + 2, e);
            }
        }
    }
    if rows.len() < 2 {
        eyre::bail!("correction requires at least two rows, got {}", rows.len());
    }

    Ok(rows.into())
}

/// Parse free-text pairs, one `raw true` pair per line (whitespace or comma separated).
/// Blank lines and lines starting with `#` are skipped.
pub fn parse_correction_pairs(text: &str) -> eyre::Result<CorrectionPairs> {
    let mut rows = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parts: Vec<&str> = line
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|p| !p.is_empty())
            .collect();
        let [raw, truth] = parts.as_slice() else {
            eyre::bail!("line {}: expected two values, got {}", idx + 1, parts.len());
        };
        let raw_ma: f64 = raw
            .parse()
            .map_err(|e| eyre::eyre!("line {}: bad raw value {raw:?}: {e}", idx + 1))?;
        let true_ma: f64 = truth
            .parse()
            .map_err(|e| eyre::eyre!("line {}: bad true value {truth:?}: {e}", idx + 1))?;
        rows.push(CorrectionRow { raw_ma, true_ma });
    }
    Ok(rows.into())
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // DAC
        if self.dac.spi_hz == 0 {
            eyre::bail!("dac.spi_hz must be > 0");
        }

        // ADC
        if !(self.adc.scan_rate_hz.is_finite() && self.adc.scan_rate_hz > 0.0) {
            eyre::bail!("adc.scan_rate_hz must be > 0");
        }
        if self.adc.scan_rate_hz > 100_000.0 {
            eyre::bail!("adc.scan_rate_hz is unreasonably large (>100 kHz)");
        }
        if self.adc.read_timeout_ms == 0 {
            eyre::bail!("adc.read_timeout_ms must be >= 1");
        }
        if self.adc.voltage_channel == self.adc.current_channel {
            eyre::bail!("adc.voltage_channel and adc.current_channel must differ");
        }

        // Calibration
        if self.calibration.step == 0 || self.calibration.step > 4095 {
            eyre::bail!("calibration.step must be in [1, 4095]");
        }
        if self.calibration.settle_ms > 10_000 {
            eyre::bail!("calibration.settle_ms is unreasonably large (>10s)");
        }

        // Limits
        if !(self.limits.min_voltage.is_finite() && self.limits.min_voltage < 0.0) {
            eyre::bail!("limits.min_voltage must be < 0");
        }
        if !(self.limits.max_current_ma.is_finite() && self.limits.max_current_ma > 0.0) {
            eyre::bail!("limits.max_current_ma must be > 0");
        }

        // Monitor
        if self.monitor.poll_ms == 0 {
            eyre::bail!("monitor.poll_ms must be >= 1");
        }
        if self.monitor.poll_ms > 60_000 {
            eyre::bail!("monitor.poll_ms is unreasonably large (>1min)");
        }
        if !(self.monitor.shunt_ohms.is_finite() && self.monitor.shunt_ohms > 0.0) {
            eyre::bail!("monitor.shunt_ohms must be > 0");
        }
        if !(self.monitor.amp_gain.is_finite() && self.monitor.amp_gain > 0.0) {
            eyre::bail!("monitor.amp_gain must be > 0");
        }

        // Correction
        if !(self.correction.a.is_finite() && self.correction.b.is_finite()) {
            eyre::bail!("correction.a and correction.b must be finite");
        }

        // Logging
        if let Some(rot) = self.logging.rotation.as_deref()
            && !matches!(rot, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly");
        }

        // Sim
        if !(self.sim.load_ohms.is_finite() && self.sim.load_ohms > 0.0) {
            eyre::bail!("sim.load_ohms must be > 0");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_bench_defaults() {
        let cfg = load_toml("").unwrap();
        assert_eq!(cfg.adc.current_channel, 5);
        assert_eq!(cfg.calibration.step, 32);
        assert_eq!(cfg.limits.max_current_ma, 500.0);
        assert_eq!(cfg.limits.min_voltage, -10.0);
        cfg.validate().unwrap();
    }

    #[test]
    fn free_text_pairs_accept_commas_and_comments() {
        let pairs = parse_correction_pairs("# raw true\n6.0 0.328\n\n12.5,0.654\n").unwrap();
        assert_eq!(pairs.raw, vec![6.0, 12.5]);
        assert_eq!(pairs.truth, vec![0.328, 0.654]);
    }

    #[test]
    fn free_text_pairs_reject_three_columns() {
        let err = parse_correction_pairs("1 2 3").unwrap_err();
        assert!(err.to_string().contains("expected two values"));
    }
}
