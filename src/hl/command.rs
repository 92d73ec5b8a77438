//! Mailbox command/response exchange with the DFE firmware
//!
//! A command is written into the link's mailbox buffer in device memory,
//! followed by a doorbell write of the link id. The firmware clears the
//! link's pending bit once the response sits in the same buffer:
//!
//! ```text
//! command:  [cmd_id: u16][tid: u16]([app_opcode: u16])[payload ...]
//! response: [cmd_id: u16][tid: u16][status: u16][error code: u32][payload ...]
//! ```
//!
//! Application commands travel as the service command
//! [`SvcCmdId::DFE_APPLICATION`] with the app opcode in front of the payload.
//!
//! Every call is one synchronous exchange. Nothing is retried.

use byte::{ctx::Endian, BytesExt as _, TryRead, TryWrite, LE};
use embedded_hal::delay::DelayNs;

#[cfg(feature = "defmt")]
use defmt::Format;

use crate::{
    configs::{poll_budget, MAILBOX_LINK_SIZE},
    ll::{self, Transport},
};

use super::{Adrv904x, Error};

/// Size of the command header
pub const CMD_HEADER_LEN: usize = 4;
/// Size of the application opcode that follows the command header
pub const APP_HEADER_LEN: usize = 2;
/// Size of the response header
pub const RESP_HEADER_LEN: usize = 6;
/// Size of the error code that starts every response payload
pub const RESP_STATUS_LEN: usize = 4;

/// Largest service command payload
pub const MAX_SVC_PAYLOAD: usize = MAILBOX_LINK_SIZE - CMD_HEADER_LEN;
/// Largest application command payload
pub const MAX_APP_PAYLOAD: usize = MAX_SVC_PAYLOAD - APP_HEADER_LEN;
/// Largest response payload, not counting the error code
pub const MAX_RESPONSE: usize = MAILBOX_LINK_SIZE - RESP_HEADER_LEN - RESP_STATUS_LEN;

/// Configuration header sent in front of configuration data
const CONFIG_HEADER_LEN: usize = 8;
/// Largest configuration block that fits in one service command
pub const MAX_CONFIG_DATA: usize = MAX_SVC_PAYLOAD - CONFIG_HEADER_LEN;

/// Error code for success, in both namespaces
pub const NO_ERROR: u32 = 0;

/// First error code owned by the application layer
pub const APP_ERROR_BASE: u32 = 0xE000;

/// Pending bit in a link's status nibble
const PENDING: u8 = 0x01;

/// Number of tracking calibration channels
pub const NUM_TRACKING_CAL_CHANNELS: usize = 8;

/// Mailbox link
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[repr(u8)]
pub enum LinkId {
    /// Link 0, used by the public commands
    Link0 = 0,
    /// Link 1
    Link1 = 1,
    /// Link 2
    Link2 = 2,
    /// Link 3
    Link3 = 3,
}

impl LinkId {
    /// Index of the link
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Service command id
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct SvcCmdId(pub u8);

impl SvcCmdId {
    /// Ping the SDK
    pub const PING: Self = SvcCmdId(0x00);
    /// Read the system status
    pub const GET_SYS_STATUS: Self = SvcCmdId(0x09);
    /// Get ready for an image reload
    pub const PREPARE_RELOAD: Self = SvcCmdId(0x10);
    /// Unlock configuration writes
    pub const UNLOCK_CONFIG: Self = SvcCmdId(0x20);
    /// Write a configuration block
    pub const SET_CONFIG: Self = SvcCmdId(0x21);
    /// Read a configuration block
    pub const GET_CONFIG: Self = SvcCmdId(0x22);
    /// Refresh ECC
    pub const UPDATE_ECC: Self = SvcCmdId(0x27);
    /// Watchdog configuration
    pub const WATCHDOG_CONFIG: Self = SvcCmdId(0x29);
    /// Set the log mask
    pub const LOG_MASK_SET: Self = SvcCmdId(0x43);
    /// Read the log mask
    pub const LOG_MASK_GET: Self = SvcCmdId(0x44);
    /// Read the CPU load
    pub const CPU_LOAD_GET: Self = SvcCmdId(0x45);
    /// Carrier for application commands. Not a valid service command.
    pub const DFE_APPLICATION: Self = SvcCmdId(0xFF);
}

/// Application command opcode
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct AppCmdId(pub u16);

impl AppCmdId {
    /// Ping the application
    pub const PING: Self = AppCmdId(0x0000);
    /// Enable or disable tracking calibrations
    pub const TRACKING_CAL_ENABLE_DISABLE: Self = AppCmdId(0x0001);
    /// Read the enabled tracking calibrations
    pub const TRACKING_CAL_GET_ENABLE_DISABLE: Self = AppCmdId(0x0002);
    /// Set a tracking calibration timer
    pub const TRACKING_CAL_SET_TIMER: Self = AppCmdId(0x0003);
    /// Read a tracking calibration timer
    pub const TRACKING_CAL_GET_TIMER: Self = AppCmdId(0x0004);
    /// Write an application configuration block
    pub const SET_CONFIG: Self = AppCmdId(0x0005);
    /// Read an application configuration block
    pub const GET_CONFIG: Self = AppCmdId(0x0006);
}

/// Status of a mailbox exchange
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[repr(u16)]
pub enum CmdStatus {
    /// Command completed
    NoError = 0,
    /// Unspecified failure
    Generic = 1,
    /// The link failed
    LinkError = 2,
    /// The response didn't match the command
    UnexpectedTransactionId = 3,
    /// The command ran and failed, see the error code
    CmdFailed = 4,
    /// The firmware doesn't know the command
    CmdIdInvalid = 5,
}

impl From<u16> for CmdStatus {
    fn from(value: u16) -> Self {
        match value {
            0 => CmdStatus::NoError,
            2 => CmdStatus::LinkError,
            3 => CmdStatus::UnexpectedTransactionId,
            4 => CmdStatus::CmdFailed,
            5 => CmdStatus::CmdIdInvalid,
            _ => CmdStatus::Generic,
        }
    }
}

/// Tracking calibration with its own timer
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[repr(u32)]
pub enum TrackingCalType {
    /// Digital predistortion
    Dpd = 0,
    /// Closed loop gain control
    Clgc = 1,
    /// VSWR monitoring
    Vswr = 2,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct CmdHeader {
    cmd_id: u16,
    tid: u16,
}

impl TryWrite<Endian> for CmdHeader {
    fn try_write(self, bytes: &mut [u8], endian: Endian) -> byte::Result<usize> {
        let offset = &mut 0;

        bytes.write_with(offset, self.cmd_id, endian)?;
        bytes.write_with(offset, self.tid, endian)?;

        Ok(*offset)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct RespHeader {
    cmd_id: u16,
    tid: u16,
    status: u16,
}

impl<'a> TryRead<'a, Endian> for RespHeader {
    fn try_read(bytes: &'a [u8], endian: Endian) -> byte::Result<(Self, usize)> {
        let offset = &mut 0;

        let header = RespHeader {
            cmd_id: bytes.read_with(offset, endian)?,
            tid: bytes.read_with(offset, endian)?,
            status: bytes.read_with(offset, endian)?,
        };

        Ok((header, *offset))
    }
}

/// Configuration block address
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct ConfigHeader {
    obj_id: u32,
    offset: u16,
    length: u16,
}

impl TryWrite<Endian> for ConfigHeader {
    fn try_write(self, bytes: &mut [u8], endian: Endian) -> byte::Result<usize> {
        let offset = &mut 0;

        bytes.write_with(offset, self.obj_id, endian)?;
        bytes.write_with(offset, self.offset, endian)?;
        bytes.write_with(offset, self.length, endian)?;

        Ok(*offset)
    }
}

impl<T, D> Adrv904x<T, D>
where
    T: Transport,
    D: DelayNs,
{
    /// Send a service command and wait for its response
    ///
    /// `response` receives the payload after the error code and must be
    /// exactly as long as the command's response.
    pub fn svc_command(
        &mut self,
        link: LinkId,
        cmd: SvcCmdId,
        request: &[u8],
        response: &mut [u8],
    ) -> Result<(), Error<T>> {
        if cmd == SvcCmdId::DFE_APPLICATION {
            log::error!("Service command {:#04x} is reserved for applications", cmd.0);
            return Err(Error::InvalidParameter);
        }
        if request.len() > MAX_SVC_PAYLOAD {
            return Err(Error::PayloadTooLarge {
                len: request.len(),
                max: MAX_SVC_PAYLOAD,
            });
        }

        self.exchange(link, cmd, None, request, response)
    }

    /// Send an application command and wait for its response
    ///
    /// `response` receives the payload after the error code.
    pub fn app_command(
        &mut self,
        link: LinkId,
        cmd: AppCmdId,
        request: &[u8],
        response: &mut [u8],
    ) -> Result<(), Error<T>> {
        if request.len() > MAX_APP_PAYLOAD {
            return Err(Error::PayloadTooLarge {
                len: request.len(),
                max: MAX_APP_PAYLOAD,
            });
        }

        self.exchange(link, SvcCmdId::DFE_APPLICATION, Some(cmd), request, response)
    }

    fn exchange(
        &mut self,
        link: LinkId,
        cmd: SvcCmdId,
        app_cmd: Option<AppCmdId>,
        request: &[u8],
        response: &mut [u8],
    ) -> Result<(), Error<T>> {
        if response.len() > MAX_RESPONSE {
            return Err(Error::ResponseTooLarge {
                len: response.len(),
                max: MAX_RESPONSE,
            });
        }

        let result = self.exchange_inner(link, cmd, app_cmd, request, response);

        if let Err(error) = &result {
            if matches!(
                error,
                Error::MailboxBusy
                    | Error::CommandTimeout
                    | Error::UnexpectedTransactionId { .. }
                    | Error::Link(_)
            ) {
                log::error!("Command {:#04x} on {:?} failed: {:?}", cmd.0, link, LinkFailure(error));
                self.capture_diagnostics();
            }
        }

        result
    }

    fn exchange_inner(
        &mut self,
        link: LinkId,
        cmd: SvcCmdId,
        app_cmd: Option<AppCmdId>,
        request: &[u8],
        response: &mut [u8],
    ) -> Result<(), Error<T>> {
        let sdk_data = self.sdk_data_address()?;
        let mailbox = sdk_data
            + ll::sdk_data::MAILBOX
            + (link.index() * MAILBOX_LINK_SIZE) as u32;

        self.wait_mailbox_free(sdk_data)?;

        let tid = &mut self.transaction_ids[link.index()];
        *tid = tid.wrapping_add(1);
        let tid = *tid;

        let mut buffer = [0u8; MAILBOX_LINK_SIZE];
        let mut len = 0;
        buffer.write_with(
            &mut len,
            CmdHeader {
                cmd_id: u16::from(cmd.0),
                tid,
            },
            LE,
        )?;
        if let Some(app_cmd) = app_cmd {
            buffer.write_with(&mut len, app_cmd.0, LE)?;
        }
        buffer[len..len + request.len()].copy_from_slice(request);
        len += request.len();

        log::trace!(
            "Sending command {:#04x} (app {:?}) on {:?}, tid {}, {} bytes",
            cmd.0,
            app_cmd.map(|cmd| cmd.0),
            link,
            tid,
            len
        );

        self.ll
            .bytes_write(mailbox, &buffer[..len])
            .map_err(Error::Transport)?;
        self.ll
            .register_write(ll::A55_SPI0_COMMAND, link as u32, 0xFF)
            .map_err(Error::Transport)?;

        self.wait_response(link)?;

        let len = RESP_HEADER_LEN + RESP_STATUS_LEN + response.len();
        self.ll
            .bytes_read(mailbox, &mut buffer[..len])
            .map_err(Error::Transport)?;

        let offset = &mut 0;
        let header: RespHeader = buffer.read_with(offset, LE)?;
        let code: u32 = buffer.read_with(offset, LE)?;

        if header.tid != tid {
            return Err(Error::UnexpectedTransactionId {
                expected: tid,
                received: header.tid,
            });
        }

        match CmdStatus::from(header.status) {
            CmdStatus::NoError if code == NO_ERROR => {
                response.copy_from_slice(&buffer[*offset..len]);
                Ok(())
            }
            status @ (CmdStatus::NoError | CmdStatus::CmdFailed) => {
                log::warn!(
                    "Command {:#04x} failed with status {:?}, error code {:#x}",
                    header.cmd_id,
                    status,
                    code
                );
                Err(Error::CommandFailed { status, code })
            }
            status => Err(Error::Link(status)),
        }
    }

    /// Wait for the firmware to take the previous command
    fn wait_mailbox_free(&mut self, sdk_data: u32) -> Result<(), Error<T>> {
        let (checks, interval_us) = poll_budget(
            self.config.mailbox_busy_timeout_us,
            self.config.mailbox_busy_interval_us,
        );

        for check in 0..=checks {
            let busy = self
                .ll
                .register_read(ll::A55_SPI0_COMMAND_BUSY, 0x1)
                .map_err(Error::Transport)?;
            if busy == 0 {
                return Ok(());
            }
            if check == checks {
                break;
            }

            self.delay.delay_us(interval_us);

            let cores = self.check_exception_at(sdk_data)?;
            if cores != 0 {
                return Err(Error::CpuException { cores });
            }
        }

        Err(Error::MailboxBusy)
    }

    /// Wait for the link's pending bit to clear
    fn wait_response(&mut self, link: LinkId) -> Result<(), Error<T>> {
        let (checks, interval_us) = poll_budget(
            self.config.response_timeout_us,
            self.config.response_interval_us,
        );

        for check in 0..=checks {
            if self.cmd_status_nibble(link)? & PENDING == 0 {
                return Ok(());
            }
            if check < checks {
                self.delay.delay_us(interval_us);
            }
        }

        Err(Error::CommandTimeout)
    }

    /// Read the status nibble of `link`
    ///
    /// The byte is read twice. Two different values mean the firmware was
    /// updating it, which counts as pending.
    fn cmd_status_nibble(&mut self, link: LinkId) -> Result<u8, Error<T>> {
        let addr = ll::A55_SPI0_COMMAND_STATUS + (link.index() >> 1) as u32;

        let mut first = [0];
        let mut second = [0];
        self.ll
            .bytes_read(addr, &mut first)
            .map_err(Error::Transport)?;
        self.ll
            .bytes_read(addr, &mut second)
            .map_err(Error::Transport)?;

        if first != second {
            return Ok(PENDING);
        }

        let nibble = if link.index() & 1 == 1 {
            first[0] >> 4
        } else {
            first[0] & 0x0F
        };

        Ok(nibble)
    }

    /// Ping the application and check the echo
    pub fn app_ping(&mut self, echo: u32) -> Result<(), Error<T>> {
        let mut response = [0; 4];
        self.app_command(
            LinkId::Link0,
            AppCmdId::PING,
            &echo.to_le_bytes(),
            &mut response,
        )?;

        let received = u32::from_le_bytes(response);
        if received != echo {
            log::error!("Ping echoed {:#x}, sent {:#x}", received, echo);
            return Err(Error::PingMismatch {
                sent: echo,
                received,
            });
        }

        Ok(())
    }

    /// Unlock configuration writes with `key`
    pub fn config_unlock(&mut self, key: u32) -> Result<(), Error<T>> {
        self.svc_command(
            LinkId::Link0,
            SvcCmdId::UNLOCK_CONFIG,
            &key.to_le_bytes(),
            &mut [],
        )
    }

    /// Write a block of an SDK object's configuration
    pub fn svc_config_set(&mut self, obj_id: u32, offset: u16, data: &[u8]) -> Result<(), Error<T>> {
        let mut request = [0; MAX_SVC_PAYLOAD];
        let len = config_request::<T>(&mut request, obj_id, offset, data)?;

        self.svc_command(LinkId::Link0, SvcCmdId::SET_CONFIG, &request[..len], &mut [])
    }

    /// Read `length` bytes of an SDK object's configuration into `data`
    pub fn svc_config_get(
        &mut self,
        obj_id: u32,
        offset: u16,
        length: u16,
        data: &mut [u8],
    ) -> Result<(), Error<T>> {
        let length_usize = usize::from(length);
        if length_usize > MAX_CONFIG_DATA.min(MAX_RESPONSE) {
            return Err(Error::ResponseTooLarge {
                len: length_usize,
                max: MAX_CONFIG_DATA.min(MAX_RESPONSE),
            });
        }
        if data.len() < length_usize {
            return Err(Error::BufferTooSmall {
                required_len: length_usize,
            });
        }

        let mut request = [0; CONFIG_HEADER_LEN];
        request.write_with(
            &mut 0,
            ConfigHeader {
                obj_id,
                offset,
                length,
            },
            LE,
        )?;

        self.svc_command(
            LinkId::Link0,
            SvcCmdId::GET_CONFIG,
            &request,
            &mut data[..length_usize],
        )
    }

    /// Write a block of an application object's configuration
    pub fn app_config_set(&mut self, obj_id: u32, offset: u16, data: &[u8]) -> Result<(), Error<T>> {
        let mut request = [0; MAX_SVC_PAYLOAD];
        let len = config_request::<T>(&mut request, obj_id, offset, data)?;
        if len > MAX_APP_PAYLOAD {
            return Err(Error::PayloadTooLarge {
                len: data.len(),
                max: MAX_APP_PAYLOAD - CONFIG_HEADER_LEN,
            });
        }

        self.app_command(LinkId::Link0, AppCmdId::SET_CONFIG, &request[..len], &mut [])
    }

    /// Read `length` bytes of an application object's configuration into
    /// `data`
    pub fn app_config_get(
        &mut self,
        obj_id: u32,
        offset: u16,
        length: u16,
        data: &mut [u8],
    ) -> Result<(), Error<T>> {
        let length_usize = usize::from(length);
        if length_usize > MAX_RESPONSE {
            return Err(Error::ResponseTooLarge {
                len: length_usize,
                max: MAX_RESPONSE,
            });
        }
        if data.len() < length_usize {
            return Err(Error::BufferTooSmall {
                required_len: length_usize,
            });
        }

        let mut request = [0; CONFIG_HEADER_LEN];
        request.write_with(
            &mut 0,
            ConfigHeader {
                obj_id,
                offset,
                length,
            },
            LE,
        )?;

        self.app_command(
            LinkId::Link0,
            AppCmdId::GET_CONFIG,
            &request,
            &mut data[..length_usize],
        )
    }

    /// Enable or disable the tracking calibrations in `cal_mask` on the
    /// channels in `channel_mask`
    ///
    /// A zero channel mask is valid and addresses system calibrations.
    pub fn tracking_cals_enable_set(
        &mut self,
        cal_mask: u32,
        channel_mask: u32,
        enable: bool,
    ) -> Result<(), Error<T>> {
        if cal_mask == 0 || channel_mask & !0xFF != 0 {
            return Err(Error::InvalidParameter);
        }

        let mut request = [0; 9];
        let offset = &mut 0;
        request.write_with(offset, cal_mask, LE)?;
        request.write_with(offset, channel_mask, LE)?;
        request[*offset] = u8::from(enable);

        self.app_command(
            LinkId::Link0,
            AppCmdId::TRACKING_CAL_ENABLE_DISABLE,
            &request,
            &mut [],
        )
    }

    /// Read the enabled tracking calibrations, one mask per channel
    pub fn tracking_cals_enable_get(
        &mut self,
    ) -> Result<[u32; NUM_TRACKING_CAL_CHANNELS], Error<T>> {
        let mut response = [0; NUM_TRACKING_CAL_CHANNELS * 4];
        self.app_command(
            LinkId::Link0,
            AppCmdId::TRACKING_CAL_GET_ENABLE_DISABLE,
            &[],
            &mut response,
        )?;

        let mut masks = [0; NUM_TRACKING_CAL_CHANNELS];
        let offset = &mut 0;
        for mask in masks.iter_mut() {
            *mask = response.read_with(offset, LE)?;
        }

        Ok(masks)
    }

    /// Set the period of a tracking calibration, in milliseconds
    ///
    /// The period must be between 200 and 5000 ms.
    pub fn tracking_cal_timer_set(
        &mut self,
        cal: TrackingCalType,
        period_ms: u32,
    ) -> Result<(), Error<T>> {
        if !(200..=5000).contains(&period_ms) {
            return Err(Error::InvalidParameter);
        }

        let mut request = [0; 8];
        let offset = &mut 0;
        request.write_with(offset, cal as u32, LE)?;
        request.write_with(offset, period_ms, LE)?;

        self.app_command(
            LinkId::Link0,
            AppCmdId::TRACKING_CAL_SET_TIMER,
            &request,
            &mut [],
        )
    }

    /// Read the period of a tracking calibration, in milliseconds
    pub fn tracking_cal_timer_get(&mut self, cal: TrackingCalType) -> Result<u32, Error<T>> {
        let mut response = [0; 4];
        self.app_command(
            LinkId::Link0,
            AppCmdId::TRACKING_CAL_GET_TIMER,
            &(cal as u32).to_le_bytes(),
            &mut response,
        )?;

        Ok(u32::from_le_bytes(response))
    }
}

/// Build a configuration request in `buffer`, returning its length
fn config_request<T>(
    buffer: &mut [u8; MAX_SVC_PAYLOAD],
    obj_id: u32,
    offset: u16,
    data: &[u8],
) -> Result<usize, Error<T>>
where
    T: Transport,
{
    if data.len() > MAX_CONFIG_DATA {
        return Err(Error::PayloadTooLarge {
            len: data.len(),
            max: MAX_CONFIG_DATA,
        });
    }

    let mut len = 0;
    buffer.write_with(
        &mut len,
        ConfigHeader {
            obj_id,
            offset,
            // Bounded by `MAX_CONFIG_DATA` above
            length: data.len() as u16,
        },
        LE,
    )?;
    buffer[len..len + data.len()].copy_from_slice(data);

    Ok(len + data.len())
}

/// Logs an error without requiring `Debug` on the transport error
struct LinkFailure<'a, T: Transport>(&'a Error<T>);

impl<T> core::fmt::Debug for LinkFailure<'_, T>
where
    T: Transport,
{
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self.0 {
            Error::MailboxBusy => write!(f, "MailboxBusy"),
            Error::CommandTimeout => write!(f, "CommandTimeout"),
            Error::UnexpectedTransactionId { expected, received } => write!(
                f,
                "UnexpectedTransactionId {{ expected: {}, received: {} }}",
                expected, received
            ),
            Error::Link(status) => write!(f, "Link({:?})", status),
            _ => write!(f, "Other"),
        }
    }
}
