//! Serial pin bundle.

use crate::clock::Device;
use crate::signal::Wire;

/// The four serial pins as seen from the bridge.
#[derive(Debug, Clone)]
pub struct SpiPort {
    /// Chip select, active low. Driven by the bridge.
    pub cs_n: Wire<bool>,
    /// Serial clock. Driven by the bridge.
    pub sclk: Wire<bool>,
    /// Bridge-to-device data.
    pub mosi: Wire<bool>,
    /// Device-to-bridge data.
    pub miso: Wire<bool>,
}

impl Default for SpiPort {
    fn default() -> Self {
        Self {
            cs_n: Wire::new("cs_n", true),
            sclk: Wire::low("sclk"),
            mosi: Wire::low("mosi"),
            miso: Wire::low("miso"),
        }
    }
}

impl SpiPort {
    /// Returns the bridge-driven pins to idle: deselected, clock and data low.
    pub fn release(&mut self) {
        self.cs_n.set(true);
        self.sclk.set(false);
        self.mosi.set(false);
    }

    /// True when every bridge-driven pin is at its idle level.
    #[must_use]
    pub const fn is_released(&self) -> bool {
        self.cs_n.is_high() && !self.sclk.is_high() && !self.mosi.is_high()
    }
}

/// Device exposing a serial slave port.
pub trait SpiDevice: Device {
    /// The serial pins of the device.
    fn spi_port(&mut self) -> &mut SpiPort;
}
