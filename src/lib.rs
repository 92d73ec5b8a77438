//! Driver crate for the DFE CPU of the ADRV904X RF transceiver
//!
//! The recommended way to use this driver is the [high-level interface]. It
//! loads and boots the DFE firmware, exchanges mailbox commands with it and
//! reads back its diagnostics. If you require a higher degree of flexibility,
//! you can use the [register-level interface] instead.
//!
//! This driver is built on top of [`embedded-hal`], which means it is portable
//! and can be used on any platform that implements the `embedded-hal` API.
//! Other links can be plugged in by implementing [`ll::Transport`].
//!
//! [high-level interface]: hl/index.html
//! [register-level interface]: ll/index.html
//! [`embedded-hal`]: https://crates.io/crates/embedded-hal
#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod boot_status;
pub mod configs;
pub mod crc;
pub mod hl;
pub mod image;
pub mod ll;

/// Redirection of nb::block
pub mod block {
    pub use nb::block;
}

#[cfg(feature = "std")]
pub use crate::image::FileImage;
pub use crate::{
    block::block,
    boot_status::BootStatus,
    configs::Config,
    hl::{Adrv904x, AppCmdId, CmdStatus, DeviceState, Error, LinkId, SvcCmdId},
    image::{ImageError, ImageSource, SliceImage},
    ll::Transport,
};
