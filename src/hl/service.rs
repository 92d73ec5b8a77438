//! SDK service commands for load, status, logging, watchdog and ECC
//!
//! All of these go to the SDK over link 0 and are answered in the same
//! exchange.

use byte::{ctx::Endian, BytesExt as _, TryRead, LE};
use embedded_hal::delay::DelayNs;

#[cfg(feature = "defmt")]
use defmt::Format;

use crate::{configs::NUM_CORES, ll::Transport};

use super::{Adrv904x, Error, LinkId, SvcCmdId, NUM_TRACKING_CAL_CHANNELS};

/// Every log level enabled
pub const LOG_MASK_ALL: u32 = 0x1F;

/// Size of a CPU and memory load report
pub const CPU_LOAD_LEN: usize = NUM_CORES * 4 + 8;

/// CPU and memory load reported by the SDK
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct CpuAndMemLoad {
    /// Load of each core, in percent
    pub cpu_load: [u32; NUM_CORES],
    /// Free heap, in bytes
    pub mem_available: u32,
    /// Allocated heap, in bytes
    pub mem_allocated: u32,
}

impl<'a> TryRead<'a, Endian> for CpuAndMemLoad {
    fn try_read(bytes: &'a [u8], endian: Endian) -> byte::Result<(Self, usize)> {
        let offset = &mut 0;

        let mut load = CpuAndMemLoad::default();
        for core in load.cpu_load.iter_mut() {
            *core = bytes.read_with(offset, endian)?;
        }
        load.mem_available = bytes.read_with(offset, endian)?;
        load.mem_allocated = bytes.read_with(offset, endian)?;

        Ok((load, *offset))
    }
}

/// DFE watchdog instance
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[repr(u8)]
pub enum WatchdogInstance {
    /// First watchdog
    Wdt0 = 0,
    /// Second watchdog
    Wdt1 = 1,
}

impl<T, D> Adrv904x<T, D>
where
    T: Transport,
    D: DelayNs,
{
    /// Read the per-core CPU load and the heap usage
    pub fn cpu_load(&mut self) -> Result<CpuAndMemLoad, Error<T>> {
        let mut response = [0; CPU_LOAD_LEN];
        self.svc_command(LinkId::Link0, SvcCmdId::CPU_LOAD_GET, &[], &mut response)?;

        Ok(response.read_with(&mut 0, LE)?)
    }

    /// Read the system status of object `obj_id` on one channel into
    /// `status`
    ///
    /// `channel_mask` must have exactly one of its low 8 bits set.
    pub fn sys_status(
        &mut self,
        obj_id: u32,
        channel_mask: u32,
        status: &mut [u8],
    ) -> Result<(), Error<T>> {
        if channel_mask.count_ones() != 1
            || channel_mask >= 1 << NUM_TRACKING_CAL_CHANNELS
        {
            log::error!("Invalid channel {:#x} for a status read", channel_mask);
            return Err(Error::InvalidParameter);
        }

        let mut request = [0; 8];
        let offset = &mut 0;
        request.write_with(offset, obj_id, LE)?;
        request.write_with(offset, channel_mask, LE)?;

        self.svc_command(LinkId::Link0, SvcCmdId::GET_SYS_STATUS, &request, status)
    }

    /// Select which log levels the SDK records
    ///
    /// `log_mask` must be non-zero and within [`LOG_MASK_ALL`].
    pub fn log_mask_set(&mut self, log_mask: u32) -> Result<(), Error<T>> {
        if log_mask == 0 || log_mask > LOG_MASK_ALL {
            return Err(Error::InvalidParameter);
        }

        self.svc_command(
            LinkId::Link0,
            SvcCmdId::LOG_MASK_SET,
            &log_mask.to_le_bytes(),
            &mut [],
        )
    }

    /// Log levels the SDK records
    pub fn log_mask_get(&mut self) -> Result<u32, Error<T>> {
        let mut response = [0; 4];
        self.svc_command(LinkId::Link0, SvcCmdId::LOG_MASK_GET, &[], &mut response)?;

        Ok(u32::from_le_bytes(response))
    }

    /// Set the timeout of a DFE watchdog, in milliseconds
    pub fn watchdog_config_set(
        &mut self,
        wdt: WatchdogInstance,
        timeout_ms: u32,
    ) -> Result<(), Error<T>> {
        let mut request = [0; 5];
        let offset = &mut 0;
        request.write_with(offset, timeout_ms, LE)?;
        request[*offset] = wdt as u8;

        self.svc_command(LinkId::Link0, SvcCmdId::WATCHDOG_CONFIG, &request, &mut [])
    }

    /// Force an ECC scrub of DFE memory
    pub fn update_ecc(&mut self) -> Result<(), Error<T>> {
        self.svc_command(LinkId::Link0, SvcCmdId::UPDATE_ECC, &[], &mut [])
    }
}
