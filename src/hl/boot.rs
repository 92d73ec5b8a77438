use embedded_hal::delay::DelayNs;

use crate::{
    boot_status::BootStatus,
    configs::poll_budget,
    image::ImageSource,
    ll::{self, Transport},
};

use super::{Adrv904x, Error, LinkId, SvcCmdId};

/// Boot flag for a first load after power up
pub const BOOT_FLAG_DEFAULT: u8 = 0;
/// Boot flag for a reload requested by the host
pub const BOOT_FLAG_BBIC_RELOAD: u8 = 1;

/// Boot status the radio CPU reports once it is up
pub const RADIO_CPU_READY: u8 = 1;

/// Time the L4 banks need after being cleared
const L4_CLEAR_SETTLE_US: u32 = 1_000;

impl<T, D> Adrv904x<T, D>
where
    T: Transport,
    D: DelayNs,
{
    /// Get the DFE cores ready for an image load
    ///
    /// Stops the cores, resets their clocks, clears the L4 memory banks and
    /// records whether this is a reload. For a reload, the running firmware is
    /// asked to get ready first.
    ///
    /// The image is considered not loaded afterwards.
    pub fn prepare_load(&mut self, reload: bool) -> Result<(), Error<T>> {
        if reload {
            self.svc_command(LinkId::Link0, SvcCmdId::PREPARE_RELOAD, &[], &mut [])?;
        }
        self.state.clear_dfe_cpu_loaded();

        let boot_flag = if reload {
            BOOT_FLAG_BBIC_RELOAD
        } else {
            BOOT_FLAG_DEFAULT
        };

        self.ll
            .field_write(ll::A55_SYSCLK_ENABLE, 1)
            .map_err(Error::Transport)?;
        self.ll
            .register_write(ll::CLK_RST_CTRL_CFG, ll::CLK_RST_HOLD, u32::MAX)
            .map_err(Error::Transport)?;
        self.ll
            .field_write(ll::A55_CCLK_DIVIDE_RATIO, 0)
            .map_err(Error::Transport)?;
        self.ll
            .field_write(ll::A55_DEVCLK_DIVIDE_RATIO, 0)
            .map_err(Error::Transport)?;
        self.ll
            .register_write(
                ll::CLK_RST_CTRL_CFG,
                ll::CLK_RST_WARM_RESET,
                ll::CLK_RST_WARM_RESET,
            )
            .map_err(Error::Transport)?;

        // Give the reset a few SPI cycles to propagate
        for id in ll::SCRATCH_DUMMY {
            self.ll.scratch_write(id, 0).map_err(Error::Transport)?;
        }

        self.ll
            .register_write(ll::CLK_RST_CTRL_CFG, ll::CLK_RST_ALL_RESET, u32::MAX)
            .map_err(Error::Transport)?;
        self.ll
            .register_write(ll::A55_MISC, ll::A55_MISC_PREPARE, u32::MAX)
            .map_err(Error::Transport)?;

        // The banks only come up clean if they see a clear and then a set
        for value in [0x00, 0xFF] {
            let mut addr = ll::L4_BANK_CTRL_FIRST;
            while addr <= ll::L4_BANK_CTRL_LAST {
                self.ll
                    .register_write(addr, value, u32::MAX)
                    .map_err(Error::Transport)?;
                addr += ll::L4_BANK_STRIDE;
            }
        }

        self.delay.delay_us(L4_CLEAR_SETTLE_US);

        self.ll
            .bytes_write(ll::DFE_INIT_BOOT_FLAG, &[boot_flag])
            .map_err(Error::Transport)?;

        log::debug!("DFE prepared for {}", if reload { "reload" } else { "load" });

        Ok(())
    }

    /// Release the DFE cores
    ///
    /// The radio CPU has to be up already. The cores start in AArch64 at the
    /// beginning of code memory.
    pub fn start_cpu(&mut self) -> Result<(), Error<T>> {
        self.wait_for_companion()?;

        self.ll
            .register_write(ll::A55_CONFIG_SIGNAL, ll::A55_CONFIG_SIGNAL_AARCH64, u32::MAX)
            .map_err(Error::Transport)?;
        for addr in ll::A55_RVBAR_ADDR {
            self.ll
                .register_write(addr, ll::DFE_CODE_START, u32::MAX)
                .map_err(Error::Transport)?;
        }
        self.ll
            .register_write(ll::CLK_RST_CTRL_CFG, ll::CLK_RST_RELEASE, u32::MAX)
            .map_err(Error::Transport)?;

        log::debug!("DFE cores released");

        Ok(())
    }

    fn wait_for_companion(&mut self) -> Result<(), Error<T>> {
        let (polls, interval_us) = poll_budget(
            self.config.companion_timeout_us,
            self.config.companion_interval_us,
        );

        for _ in 0..polls {
            let status = self
                .ll
                .scratch_read(ll::SCRATCH_CPU0_BOOT_STATUS)
                .map_err(Error::Transport)?;
            if status == RADIO_CPU_READY {
                return Ok(());
            }
            self.delay.delay_us(interval_us);
        }

        log::error!("Radio CPU not up, can't start the DFE");
        Err(Error::CompanionNotReady)
    }

    /// Raw value of the DFE boot status register
    pub fn boot_status_raw(&mut self) -> Result<u8, Error<T>> {
        self.ll
            .scratch_read(ll::SCRATCH_DFE_BOOT_STATUS)
            .map_err(Error::Transport)
    }

    /// Check the DFE boot status once
    ///
    /// This method returns an `nb::Result` to indicate whether the boot has
    /// finished, or whether it is still ongoing. You can use this to busily
    /// wait for the boot to finish, for example using `nb`'s `block!` macro.
    /// Unlike [`Adrv904x::wait_for_boot`], this never times out and doesn't
    /// capture diagnostics.
    pub fn poll_boot_status(&mut self) -> nb::Result<(), Error<T>> {
        let raw = self.boot_status_raw().map_err(nb::Error::Other)?;

        match BootStatus::try_from(raw) {
            Ok(BootStatus::Ready) => Ok(()),
            Ok(status) if status.is_terminal_failure() => {
                Err(nb::Error::Other(Error::BootFailed(status)))
            }
            Ok(BootStatus::ReadyForReload) => Err(nb::Error::Other(Error::BootTimeout {
                last_status: raw,
                ready_for_reload: true,
            })),
            _ => Err(nb::Error::WouldBlock),
        }
    }

    /// Wait for the DFE firmware to report `READY`
    ///
    /// The status is checked `timeout_us / interval` times, with the
    /// configured boot interval clamped to the timeout, or once if the
    /// interval is zero. A terminal failure ends the wait at once. Stopping
    /// in `READY_FOR_RELOAD` ends it too and is reported as a timeout.
    /// Diagnostics are captured on every failure.
    pub fn wait_for_boot(&mut self, timeout_us: u32) -> Result<(), Error<T>> {
        let (polls, interval_us) = poll_budget(timeout_us, self.config.boot_interval_us);

        let mut last_status = BootStatus::PowerUp as u8;
        let mut ready_for_reload = false;

        for poll in 0..polls {
            last_status = self.boot_status_raw()?;

            match BootStatus::try_from(last_status) {
                Ok(BootStatus::Ready) => {
                    log::debug!("DFE ready after {} polls", poll + 1);
                    return Ok(());
                }
                Ok(status) if status.is_terminal_failure() => {
                    log::error!("DFE boot failed: {}", status.description());
                    self.capture_diagnostics();
                    return Err(Error::BootFailed(status));
                }
                Ok(BootStatus::ReadyForReload) => {
                    ready_for_reload = true;
                    break;
                }
                Ok(status) => log::trace!("DFE boot status: {}", status.description()),
                Err(raw) => log::trace!("DFE boot status: unknown ({})", raw),
            }

            self.delay.delay_us(interval_us);
        }

        log::error!(
            "DFE boot timed out, last status {}{}",
            last_status,
            if ready_for_reload {
                " (waiting for reload)"
            } else {
                ""
            }
        );
        self.capture_diagnostics();

        Err(Error::BootTimeout {
            last_status,
            ready_for_reload,
        })
    }

    /// Load `image` into a fresh DFE and boot it
    pub fn boot<I: ImageSource>(&mut self, image: I) -> Result<(), Error<T>> {
        self.load_and_start(false, image)
    }

    /// Replace the running DFE firmware with `image` and boot it
    pub fn reload<I: ImageSource>(&mut self, image: I) -> Result<(), Error<T>> {
        self.load_and_start(true, image)
    }

    fn load_and_start<I: ImageSource>(&mut self, reload: bool, image: I) -> Result<(), Error<T>> {
        self.prepare_load(reload)?;
        self.load_image(image)?;

        self.ll
            .scratch_write(ll::SCRATCH_DFE_BOOT_STATUS, BootStatus::PowerUp as u8)
            .map_err(Error::Transport)?;

        self.start_cpu()?;
        self.wait_for_boot(self.config.boot_timeout_us)
    }
}
