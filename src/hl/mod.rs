//! High-level interface to the ADRV904X DFE CPU
//!
//! The entry point to this API is the [Adrv904x] struct. Please refer to the
//! documentation there for more details.
//!
//! This module implements the mailbox protocol, the SDK service commands, the
//! boot sequencer, the image loader and the diagnostics readout on top of a
//! [`Transport`]. This is the recommended way to access the DFE CPU using this
//! crate, unless you need the greater flexibility provided by the
//! [register-level interface].
//!
//! [register-level interface]: ../ll/index.html

use core::fmt;

use embedded_hal::{delay::DelayNs, spi};

pub use boot::*;
pub use command::*;
pub use diagnostics::*;
pub use error::*;
pub use loader::*;
pub use service::*;

use crate::{
    configs::{Config, NUM_LINKS},
    ll::{self, Transport},
};

mod boot;
mod command;
mod diagnostics;
mod error;
mod loader;
mod service;

#[cfg(test)]
pub(crate) mod test_util;

/// Entry point to the ADRV904X DFE driver API
///
/// The handle owns the transport and the delay, and tracks what it knows
/// about the device in a [`DeviceState`]. Every operation blocks until it
/// completes or fails.
pub struct Adrv904x<T, D> {
    ll: T,
    delay: D,
    config: Config,
    state: DeviceState,
    transaction_ids: [u16; NUM_LINKS],
}

// Can't be derived without putting requirements on `T` and `D`.
impl<T, D> fmt::Debug for Adrv904x<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Adrv904x {{ state: ")?;
        self.state.fmt(f)?;
        write!(f, ", config: ")?;
        self.config.fmt(f)?;
        write!(f, ", .. }}")?;

        Ok(())
    }
}

impl<SPI, D> Adrv904x<ll::Adrv904x<SPI>, D>
where
    SPI: spi::SpiDevice<u8>,
    D: DelayNs,
{
    /// Create a new instance on an SPI device, with the default timing
    pub fn from_spi(spi: SPI, delay: D) -> Self {
        Adrv904x::new(ll::Adrv904x::new(spi), delay)
    }
}

impl<T, D> Adrv904x<T, D>
where
    T: Transport,
    D: DelayNs,
{
    /// Create a new instance with the default timing
    pub fn new(ll: T, delay: D) -> Self {
        Adrv904x::with_config(ll, delay, Config::default())
    }

    /// Create a new instance with the given timing
    ///
    /// Nothing is known about the device yet, so the DFE image is considered
    /// not loaded.
    pub fn with_config(ll: T, delay: D, config: Config) -> Self {
        Adrv904x {
            ll,
            delay,
            config,
            state: DeviceState::default(),
            transaction_ids: [0; NUM_LINKS],
        }
    }

    /// Provides direct access to the register-level API
    ///
    /// Be aware that by using the register-level API, you can invalidate
    /// various assumptions that the high-level API makes about the operation
    /// of the device. Don't use the high-level and register-level API in
    /// tandem, unless you know what you're doing.
    pub fn ll(&mut self) -> &mut T {
        &mut self.ll
    }

    /// Timing in use
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Replace the timing
    pub fn set_config(&mut self, config: Config) {
        self.config = config;
    }

    /// What is known about the device
    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Whether a DFE image was loaded and checked
    pub fn is_dfe_cpu_loaded(&self) -> bool {
        self.state.is_dfe_cpu_loaded()
    }

    /// Release the transport and the delay
    pub fn release(self) -> (T, D) {
        (self.ll, self.delay)
    }
}

/// Host-side view of the device
///
/// The loaded flag is set once an image was written and its checksum
/// matched, and cleared when a new load is prepared.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceState {
    dfe_cpu_loaded: bool,
}

impl DeviceState {
    /// Whether a DFE image was loaded and checked
    pub fn is_dfe_cpu_loaded(&self) -> bool {
        self.dfe_cpu_loaded
    }

    fn mark_dfe_cpu_loaded(&mut self) {
        self.dfe_cpu_loaded = true;
    }

    fn clear_dfe_cpu_loaded(&mut self) {
        self.dfe_cpu_loaded = false;
    }
}
