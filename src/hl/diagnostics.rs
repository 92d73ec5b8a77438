//! Exception flags, error log and status words read from the SDK data area

use byte::{ctx::Endian, BytesExt as _, TryRead, LE};
use embedded_hal::delay::DelayNs;

#[cfg(feature = "defmt")]
use defmt::Format;

use crate::{
    configs::NUM_CORES,
    ll::{self, Transport},
};

use super::{Adrv904x, Error, APP_ERROR_BASE};

/// Number of error log categories
pub const NUM_ERROR_LOG_CATEGORIES: usize = 6;

/// Size of one error log record
const ERROR_LOG_RECORD_LEN: usize = 16;

/// Exception flag value of a core that is running normally
pub const NO_EXCEPTION: u32 = 0;

/// Severity of an error log record
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[repr(u32)]
pub enum LogLevel {
    /// Debug
    Debug = 0x01,
    /// Informational
    Info = 0x02,
    /// Warning
    Warning = 0x04,
    /// Critical error
    Critical = 0x08,
    /// Fatal error
    Fatal = 0x10,
}

/// Firmware object an error log record belongs to, in log order
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum ErrorLogCategory {
    /// Common objects
    Common,
    /// Service layer
    ServiceLayer,
    /// Drivers
    Driver,
    /// Configuration
    Config,
    /// Calibrations
    Calibration,
    /// SDK application
    App,
}

/// Last error recorded for one category
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct ErrorLogRecord {
    /// Error code, 0 if nothing was logged
    pub code: u32,
    /// Raw severity, one of the [`LogLevel`] values
    pub level: u32,
    /// Firmware timestamp
    pub timestamp: u64,
}

impl ErrorLogRecord {
    /// Severity, if it is a known level
    pub fn level(&self) -> Option<LogLevel> {
        match self.level {
            0x01 => Some(LogLevel::Debug),
            0x02 => Some(LogLevel::Info),
            0x04 => Some(LogLevel::Warning),
            0x08 => Some(LogLevel::Critical),
            0x10 => Some(LogLevel::Fatal),
            _ => None,
        }
    }

    /// Which layer the error code comes from
    pub fn source(&self) -> ErrorSource {
        if self.code > APP_ERROR_BASE {
            ErrorSource::App
        } else {
            ErrorSource::Service
        }
    }
}

impl<'a> TryRead<'a, Endian> for ErrorLogRecord {
    fn try_read(bytes: &'a [u8], endian: Endian) -> byte::Result<(Self, usize)> {
        let offset = &mut 0;

        let code = bytes.read_with(offset, endian)?;
        let level = bytes.read_with(offset, endian)?;
        let timestamp_lo: u32 = bytes.read_with(offset, endian)?;
        let timestamp_hi: u32 = bytes.read_with(offset, endian)?;

        let record = ErrorLogRecord {
            code,
            level,
            timestamp: u64::from(timestamp_hi) << 32 | u64::from(timestamp_lo),
        };

        Ok((record, *offset))
    }
}

/// Layer an error code belongs to
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum ErrorSource {
    /// SDK services
    Service,
    /// Application
    App,
}

/// The last error of every category
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct ErrorLog(pub [ErrorLogRecord; NUM_ERROR_LOG_CATEGORIES]);

impl ErrorLog {
    /// Record of `category`
    pub fn record(&self, category: ErrorLogCategory) -> &ErrorLogRecord {
        &self.0[category as usize]
    }

    /// Most recent record logged at exactly `level`
    ///
    /// Only records newer than timestamp 0 count. Ties keep the earlier
    /// category.
    pub fn latest(&self, level: LogLevel) -> Option<&ErrorLogRecord> {
        self.0
            .iter()
            .filter(|record| record.level == level as u32)
            .fold(None, |latest: Option<&ErrorLogRecord>, record| {
                let newest = latest.map_or(0, |latest| latest.timestamp);
                if record.timestamp > newest {
                    Some(record)
                } else {
                    latest
                }
            })
    }

    /// Most severe record, for root cause reporting
    ///
    /// A record only replaces the current pick if it is both more severe and
    /// newer. Records without an error code are skipped.
    pub fn highest_severity(&self) -> Option<&ErrorLogRecord> {
        let mut best: Option<&ErrorLogRecord> = None;
        for record in self.0.iter().filter(|record| record.code != 0) {
            let (level, timestamp) = best.map_or((0, 0), |best| (best.level, best.timestamp));
            if record.level > level && record.timestamp > timestamp {
                best = Some(record);
            }
        }

        best
    }
}

/// Kind of software interrupt 0 raised by the DFE
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum PintSw0 {
    /// Fatal error
    FatalError,
    /// Critical error
    CriticalError,
    /// Anything else
    Other,
}

/// What could be read back after a failure
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct Diagnostics {
    /// Cores with a raised exception flag, one bit per core
    pub exceptions: u32,
    /// Most severe logged error
    pub root_cause: Option<ErrorLogRecord>,
}

impl<T, D> Adrv904x<T, D>
where
    T: Transport,
    D: DelayNs,
{
    /// Address of the SDK data structure, as published by the firmware
    pub fn sdk_data_address(&mut self) -> Result<u32, Error<T>> {
        let mut address = 0;
        for (shift, id) in (0..).step_by(8).zip(ll::SCRATCH_SDK_DATA_ADDR) {
            let byte = self.ll.scratch_read(id).map_err(Error::Transport)?;
            address |= u32::from(byte) << shift;
        }

        Ok(address)
    }

    /// Bitmask of the DFE cores that raised an exception
    pub fn check_exception(&mut self) -> Result<u32, Error<T>> {
        let sdk_data = self.sdk_data_address()?;
        self.check_exception_at(sdk_data)
    }

    pub(super) fn check_exception_at(&mut self, sdk_data: u32) -> Result<u32, Error<T>> {
        let mut flags = [0u8; NUM_CORES * 4];
        self.ll
            .bytes_read(sdk_data + ll::sdk_data::EXCEPTION_FLAGS, &mut flags)
            .map_err(Error::Transport)?;

        let offset = &mut 0;
        let mut cores = 0;
        for core in 0..NUM_CORES {
            let flag: u32 = flags.read_with(offset, LE)?;
            if flag != NO_EXCEPTION {
                cores |= 1 << core;
            }
        }

        Ok(cores)
    }

    /// Read the last error of every category in one transfer
    pub fn last_error_log(&mut self) -> Result<ErrorLog, Error<T>> {
        let sdk_data = self.sdk_data_address()?;

        let mut raw = [0u8; NUM_ERROR_LOG_CATEGORIES * ERROR_LOG_RECORD_LEN];
        self.ll
            .bytes_read(sdk_data + ll::sdk_data::ERROR_LOG, &mut raw)
            .map_err(Error::Transport)?;

        let mut log = ErrorLog::default();
        let offset = &mut 0;
        for record in log.0.iter_mut() {
            *record = raw.read_with(offset, LE)?;
        }

        Ok(log)
    }

    /// Error code behind a software interrupt 0
    ///
    /// Returns the most recent fatal or critical error code, or 0 if there is
    /// none or the interrupt is of another kind.
    pub fn pint_sw0_detailed_info(&mut self, kind: PintSw0) -> Result<u32, Error<T>> {
        let level = match kind {
            PintSw0::FatalError => LogLevel::Fatal,
            PintSw0::CriticalError => LogLevel::Critical,
            PintSw0::Other => return Ok(0),
        };

        let log = self.last_error_log()?;

        Ok(log.latest(level).map_or(0, |record| record.code))
    }

    /// Error the firmware reported while booting
    ///
    /// Fails with [`Error::NotLoaded`] without touching the device if no
    /// image is loaded.
    pub fn boot_error(&mut self) -> Result<u32, Error<T>> {
        self.sdk_data_word(ll::sdk_data::BOOT_ERROR)
    }

    /// Application init status
    ///
    /// Fails with [`Error::NotLoaded`] without touching the device if no
    /// image is loaded.
    pub fn app_init_status(&mut self) -> Result<u32, Error<T>> {
        self.sdk_data_word(ll::sdk_data::APP_INIT_STATUS)
    }

    fn sdk_data_word(&mut self, offset: u32) -> Result<u32, Error<T>> {
        if !self.state.is_dfe_cpu_loaded() {
            return Err(Error::NotLoaded);
        }

        let sdk_data = self.sdk_data_address()?;
        let mut word = [0; 4];
        self.ll
            .bytes_read(sdk_data + offset, &mut word)
            .map_err(Error::Transport)?;

        Ok(u32::from_le_bytes(word))
    }

    /// Read back what the firmware knows about a failure and log it
    ///
    /// This is best effort. Read failures are logged and leave the
    /// corresponding field empty.
    pub fn capture_diagnostics(&mut self) -> Diagnostics {
        let mut diagnostics = Diagnostics::default();

        if self.state.is_dfe_cpu_loaded() {
            match self.check_exception() {
                Ok(0) => {}
                Ok(cores) => {
                    log::error!("DFE exception raised on cores {:#06b}", cores);
                    diagnostics.exceptions = cores;
                }
                Err(_) => log::warn!("Couldn't read the DFE exception flags"),
            }
        }

        match self.last_error_log() {
            Ok(log) => {
                if let Some(record) = log.highest_severity() {
                    log::error!(
                        "DFE {:?} error {:#x}, level {:#x}, at {}",
                        record.source(),
                        record.code,
                        record.level,
                        record.timestamp
                    );
                    diagnostics.root_cause = Some(*record);
                }
            }
            Err(_) => log::warn!("Couldn't read the DFE error log"),
        }

        diagnostics
    }
}
