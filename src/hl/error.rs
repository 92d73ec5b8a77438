use core::fmt;
use core::fmt::{Display, Formatter};

#[cfg(feature = "defmt")]
use defmt::Format;

use crate::{boot_status::BootStatus, image::ImageError, ll::Transport};

use super::CmdStatus;

/// An error that can occur while talking to or booting the DFE CPU
pub enum Error<T>
where
    T: Transport,
{
    /// Error occured while accessing the device
    Transport(T::Error),

    /// The request doesn't fit in the mailbox
    PayloadTooLarge {
        /// Length of the request
        len: usize,
        /// Largest request the link takes
        max: usize,
    },

    /// Buffer too small
    BufferTooSmall {
        /// Indicates how large a buffer would have been required
        required_len: usize,
    },

    /// The requested response doesn't fit in the mailbox
    ResponseTooLarge {
        /// Requested response length
        len: usize,
        /// Largest response the link returns
        max: usize,
    },

    /// A parameter was out of range
    InvalidParameter,

    /// The mailbox stayed busy for the whole timeout
    MailboxBusy,

    /// No response arrived within the timeout
    CommandTimeout,

    /// The response belongs to another command
    UnexpectedTransactionId {
        /// Transaction id that was sent
        expected: u16,
        /// Transaction id in the response
        received: u16,
    },

    /// The firmware ran the command and reported a failure
    ///
    /// Response payload past the status is not valid.
    CommandFailed {
        /// Status of the exchange
        status: CmdStatus,
        /// Error code reported by the firmware
        code: u32,
    },

    /// The exchange itself failed
    Link(CmdStatus),

    /// At least one DFE core raised an exception
    CpuException {
        /// One bit per core
        cores: u32,
    },

    /// The radio CPU didn't come up before the DFE start
    CompanionNotReady,

    /// The firmware reported a terminal boot failure
    BootFailed(BootStatus),

    /// The firmware didn't reach `READY` in time
    BootTimeout {
        /// Last raw value read from the boot status register
        last_status: u8,
        /// The firmware stopped in `READY_FOR_RELOAD`
        ready_for_reload: bool,
    },

    /// The image source failed
    Image(ImageError),

    /// The image is empty
    ImageEmpty,

    /// The image size is not a multiple of 4
    ImageMisaligned {
        /// Size of the image
        size: u32,
    },

    /// The image is shorter than its headers
    ImageTruncated,

    /// The image body doesn't fit in DFE code memory
    ImageTooLarge {
        /// Size of the image
        size: u32,
    },

    /// The archive header has the wrong magic number
    InvalidArchive,

    /// The archive format revision is not supported
    UnsupportedArchiveRevision {
        /// Revision found in the header
        rev: u32,
    },

    /// The image checksum didn't match its contents
    CrcMismatch {
        /// Checksum stored in the image
        expected: u32,
        /// Checksum computed over the image
        computed: u32,
    },

    /// Streaming mode couldn't be switched off after a load
    StreamingExit(T::Error),

    /// The operation needs a loaded DFE image
    NotLoaded,

    /// The ping response didn't echo the request
    PingMismatch {
        /// Value sent
        sent: u32,
        /// Value echoed
        received: u32,
    },

    /// Wire data could not be decoded
    Frame(byte::Error),
}

impl<T> From<ImageError> for Error<T>
where
    T: Transport,
{
    fn from(error: ImageError) -> Self {
        Error::Image(error)
    }
}

impl<T> From<byte::Error> for Error<T>
where
    T: Transport,
{
    fn from(error: byte::Error) -> Self {
        Error::Frame(error)
    }
}

impl<T> Error<T>
where
    T: Transport,
{
    /// Whether this is a boot or image failure
    ///
    /// These leave the DFE without a usable image.
    pub fn is_boot_failure(&self) -> bool {
        matches!(
            self,
            Error::BootFailed(_)
                | Error::BootTimeout { .. }
                | Error::CrcMismatch { .. }
                | Error::InvalidArchive
                | Error::UnsupportedArchiveRevision { .. }
                | Error::ImageTruncated
                | Error::CpuException { .. }
                | Error::CompanionNotReady
        )
    }
}

impl<T> Display for Error<T>
where
    T: Transport,
    T::Error: fmt::Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(feature = "std")]
impl<T> std::error::Error for Error<T>
where
    T: Transport,
    T::Error: fmt::Debug,
{
}

// We can't derive this implementation, as `Debug` is only implemented
// conditionally for the transport error.
impl<T> fmt::Debug for Error<T>
where
    T: Transport,
    T::Error: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Transport(error) => write!(f, "Transport({:?})", error),
            Error::PayloadTooLarge { len, max } => {
                write!(f, "PayloadTooLarge {{ len: {:?}, max: {:?} }}", len, max)
            }
            Error::BufferTooSmall { required_len } => {
                write!(f, "BufferTooSmall {{ required_len: {:?} }}", required_len,)
            }
            Error::ResponseTooLarge { len, max } => {
                write!(f, "ResponseTooLarge {{ len: {:?}, max: {:?} }}", len, max)
            }
            Error::InvalidParameter => write!(f, "InvalidParameter"),
            Error::MailboxBusy => write!(f, "MailboxBusy"),
            Error::CommandTimeout => write!(f, "CommandTimeout"),
            Error::UnexpectedTransactionId { expected, received } => write!(
                f,
                "UnexpectedTransactionId {{ expected: {:?}, received: {:?} }}",
                expected, received
            ),
            Error::CommandFailed { status, code } => write!(
                f,
                "CommandFailed {{ status: {:?}, code: {:#x} }}",
                status, code
            ),
            Error::Link(status) => write!(f, "Link({:?})", status),
            Error::CpuException { cores } => {
                write!(f, "CpuException {{ cores: {:#06b} }}", cores)
            }
            Error::CompanionNotReady => write!(f, "CompanionNotReady"),
            Error::BootFailed(status) => {
                write!(f, "BootFailed({:?}: {})", status, status.description())
            }
            Error::BootTimeout {
                last_status,
                ready_for_reload,
            } => write!(
                f,
                "BootTimeout {{ last_status: {:?}, ready_for_reload: {:?} }}",
                last_status, ready_for_reload
            ),
            Error::Image(error) => write!(f, "Image({:?})", error),
            Error::ImageEmpty => write!(f, "ImageEmpty"),
            Error::ImageMisaligned { size } => {
                write!(f, "ImageMisaligned {{ size: {:?} }}", size)
            }
            Error::ImageTruncated => write!(f, "ImageTruncated"),
            Error::ImageTooLarge { size } => write!(f, "ImageTooLarge {{ size: {:?} }}", size),
            Error::InvalidArchive => write!(f, "InvalidArchive"),
            Error::UnsupportedArchiveRevision { rev } => {
                write!(f, "UnsupportedArchiveRevision {{ rev: {:?} }}", rev)
            }
            Error::CrcMismatch { expected, computed } => write!(
                f,
                "CrcMismatch {{ expected: {:#010x}, computed: {:#010x} }}",
                expected, computed
            ),
            Error::StreamingExit(error) => write!(f, "StreamingExit({:?})", error),
            Error::NotLoaded => write!(f, "NotLoaded"),
            Error::PingMismatch { sent, received } => write!(
                f,
                "PingMismatch {{ sent: {:#x}, received: {:#x} }}",
                sent, received
            ),
            Error::Frame(error) => write!(f, "Frame({:?})", error),
        }
    }
}

// We can't derive this implementation, as `Format` is only implemented
// conditionally for the transport error.
#[cfg(feature = "defmt")]
impl<T> Format for Error<T>
where
    T: Transport,
{
    fn format(&self, f: defmt::Formatter) {
        match self {
            Error::Transport(_) => defmt::write!(f, "Transport()"),
            Error::PayloadTooLarge { len, max } => {
                defmt::write!(f, "PayloadTooLarge {{ len: {}, max: {} }}", len, max)
            }
            Error::BufferTooSmall { required_len } => {
                defmt::write!(f, "BufferTooSmall {{ required_len: {:?} }}", required_len,)
            }
            Error::ResponseTooLarge { len, max } => {
                defmt::write!(f, "ResponseTooLarge {{ len: {}, max: {} }}", len, max)
            }
            Error::InvalidParameter => defmt::write!(f, "InvalidParameter"),
            Error::MailboxBusy => defmt::write!(f, "MailboxBusy"),
            Error::CommandTimeout => defmt::write!(f, "CommandTimeout"),
            Error::UnexpectedTransactionId { expected, received } => defmt::write!(
                f,
                "UnexpectedTransactionId {{ expected: {}, received: {} }}",
                expected,
                received
            ),
            Error::CommandFailed { status, code } => defmt::write!(
                f,
                "CommandFailed {{ status: {}, code: {=u32:#x} }}",
                status,
                code
            ),
            Error::Link(status) => defmt::write!(f, "Link({})", status),
            Error::CpuException { cores } => {
                defmt::write!(f, "CpuException {{ cores: {=u32:#b} }}", cores)
            }
            Error::CompanionNotReady => defmt::write!(f, "CompanionNotReady"),
            Error::BootFailed(status) => defmt::write!(f, "BootFailed({})", status),
            Error::BootTimeout {
                last_status,
                ready_for_reload,
            } => defmt::write!(
                f,
                "BootTimeout {{ last_status: {}, ready_for_reload: {} }}",
                last_status,
                ready_for_reload
            ),
            Error::Image(error) => defmt::write!(f, "Image({})", error),
            Error::ImageEmpty => defmt::write!(f, "ImageEmpty"),
            Error::ImageMisaligned { size } => {
                defmt::write!(f, "ImageMisaligned {{ size: {} }}", size)
            }
            Error::ImageTruncated => defmt::write!(f, "ImageTruncated"),
            Error::ImageTooLarge { size } => {
                defmt::write!(f, "ImageTooLarge {{ size: {} }}", size)
            }
            Error::InvalidArchive => defmt::write!(f, "InvalidArchive"),
            Error::UnsupportedArchiveRevision { rev } => {
                defmt::write!(f, "UnsupportedArchiveRevision {{ rev: {} }}", rev)
            }
            Error::CrcMismatch { expected, computed } => defmt::write!(
                f,
                "CrcMismatch {{ expected: {=u32:#x}, computed: {=u32:#x} }}",
                expected,
                computed
            ),
            Error::StreamingExit(_) => defmt::write!(f, "StreamingExit()"),
            Error::NotLoaded => defmt::write!(f, "NotLoaded"),
            Error::PingMismatch { sent, received } => defmt::write!(
                f,
                "PingMismatch {{ sent: {=u32:#x}, received: {=u32:#x} }}",
                sent,
                received
            ),
            Error::Frame(error) => defmt::write!(f, "Frame({:?})", defmt::Debug2Format(error)),
        }
    }
}
