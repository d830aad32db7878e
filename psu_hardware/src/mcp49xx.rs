//! MCP49xx 12-bit DAC framing and (behind `hardware`) an SPI driver.
//!
//! A write is one 16-bit word, MSB first:
//! bit 15 channel select, 14 buffered Vref, 13 gain (1 = 1x), 12 active (not shutdown),
//! bits 11..0 the code. The supply board drives channel B, unbuffered, 1x, active.

use crate::error::{HwError, Result};
use psu_traits::DAC_MAX_CODE;

/// Channel B, unbuffered, 1x gain, output active.
pub const CONTROL_BITS: u16 = 0b1011_0000_0000_0000;

/// Encode a code into the two bytes clocked out on SPI.
pub fn encode_frame(code: u16) -> Result<[u8; 2]> {
    if code > DAC_MAX_CODE {
        return Err(HwError::CodeOutOfRange(code));
    }
    let word = CONTROL_BITS | (code & 0x0FFF);
    Ok(word.to_be_bytes())
}

#[cfg(all(feature = "hardware", target_os = "linux"))]
pub use driver::Mcp4921Dac;

#[cfg(all(feature = "hardware", target_os = "linux"))]
mod driver {
    use super::encode_frame;
    use crate::error::{HwError, Result};
    use rppal::gpio::{Gpio, OutputPin};
    use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
    use tracing::trace;

    /// MCP4921-compatible DAC on SPI0 with a GPIO-driven chip select.
    pub struct Mcp4921Dac {
        spi: Spi,
        cs: OutputPin,
    }

    impl Mcp4921Dac {
        pub fn new(cs_pin: u8, spi_hz: u32) -> Result<Self> {
            let spi = Spi::new(Bus::Spi0, SlaveSelect::Ss0, spi_hz, Mode::Mode0)
                .map_err(|e| HwError::Spi(e.to_string()))?;
            let gpio = Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))?;
            let mut cs = gpio
                .get(cs_pin)
                .map_err(|e| HwError::Gpio(e.to_string()))?
                .into_output();
            cs.set_high(); // CS idle high
            Ok(Self { spi, cs })
        }

        pub fn write(&mut self, code: u16) -> Result<()> {
            let frame = encode_frame(code)?;
            self.cs.set_low();
            let res = self.spi.write(&frame);
            self.cs.set_high();
            res.map_err(|e| HwError::Spi(e.to_string()))?;
            trace!(code, "mcp4921 write");
            Ok(())
        }
    }

    impl psu_traits::Dac for Mcp4921Dac {
        fn write_code(&mut self, code: u16) -> std::result::Result<(), psu_traits::BusError> {
            self.write(code).map_err(Into::into)
        }
    }
}
