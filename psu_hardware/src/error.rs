use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("gpio error: {0}")]
    Gpio(String),
    #[error("spi error: {0}")]
    Spi(String),
    #[error("dac code {0} out of range (0..=4095)")]
    CodeOutOfRange(u16),
    #[error("adc read timeout")]
    Timeout,
    #[error("adc scan not running")]
    ScanNotRunning,
    #[error("simulated fault: {0}")]
    Injected(&'static str),
}

pub type Result<T> = std::result::Result<T, HwError>;
