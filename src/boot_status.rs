//! Enumeration of the DFE boot status
//!
//! The DFE firmware reports its progress through a byte-wide scratch
//! register. The host only ever reads it, except for resetting it to
//! [`BootStatus::PowerUp`] before a start.

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
/// Boot status reported by the DFE firmware
pub enum BootStatus {
    /// Cores powered up, nothing run yet
    PowerUp = 0,
    /// Boot completed
    Ready = 1,
    /// Waiting for the secondary cores
    WaitForCpus = 2,
    /// Pre-initialization
    BootPreinit = 4,
    /// Profile initialization
    ProfileInit = 5,
    /// OS abstraction layer initialization
    OsalInit = 6,
    /// Memory service pre-initialization
    MemSvcPreinit = 7,
    /// Threads starting
    ThreadStart = 8,
    /// Application configuration
    AppConfig = 9,
    /// Application initialization
    AppInit = 10,
    /// Error service initialization
    ErrorInit = 11,
    /// Buffer management initialization
    BufferMgmtInit = 12,
    /// Memory service initialization
    MemSvcInit = 14,
    /// Log and trace initialization
    LogTraceInit = 15,
    /// Event service initialization
    EventSvcInit = 16,
    /// Radio control initialization
    RadioCtrlInit = 17,
    /// Bridge initialization
    BridgeInit = 18,
    /// Command service initialization
    CmdSvcInit = 19,
    /// Capture service initialization
    CaptureInit = 20,
    /// Adaptation initialization
    AdaptationInit = 21,
    /// Exception handler initialization
    ExceptionInit = 22,
    /// Firmware image checksum check failed
    FwCrcErr = 23,
    /// Unexpected error during boot
    UnexpectedErr = 24,
    /// Init thread running
    InitThread = 26,
    /// System clock initialization
    SysclkInit = 27,
    /// Interrupt initialization
    InterruptInit = 28,
    /// Halt service initialization
    HaltInit = 29,
    /// OS tick initialization
    OsTickInit = 30,
    /// OS launched
    OsLaunch = 31,
    /// OS stack check initialization
    OsStackChkInit = 32,
    /// Exception handler pre-initialization
    ExceptionPreinit = 33,
    /// Firmware is waiting for the host to reload an image
    ReadyForReload = 34,
    /// ECC initialization
    EccInit = 35,
    /// Exception handling completed
    ExceptionDone = 36,
    /// Watchdog initialization
    WatchdogInit = 37,
    /// Radio command service initialization
    RadioCmdSvcInit = 38,
}

impl BootStatus {
    /// Whether the firmware gave up booting
    ///
    /// Polling must stop as soon as one of these is seen.
    pub fn is_terminal_failure(self) -> bool {
        matches!(self, BootStatus::FwCrcErr | BootStatus::UnexpectedErr)
    }

    /// Short human-readable description
    pub fn description(self) -> &'static str {
        match self {
            BootStatus::PowerUp => "powered up",
            BootStatus::Ready => "boot complete",
            BootStatus::WaitForCpus => "waiting for secondary cores",
            BootStatus::BootPreinit => "boot pre-initialization",
            BootStatus::ProfileInit => "profile initialization",
            BootStatus::OsalInit => "OS abstraction layer initialization",
            BootStatus::MemSvcPreinit => "memory service pre-initialization",
            BootStatus::ThreadStart => "starting threads",
            BootStatus::AppConfig => "application configuration",
            BootStatus::AppInit => "application initialization",
            BootStatus::ErrorInit => "error service initialization",
            BootStatus::BufferMgmtInit => "buffer management initialization",
            BootStatus::MemSvcInit => "memory service initialization",
            BootStatus::LogTraceInit => "log/trace initialization",
            BootStatus::EventSvcInit => "event service initialization",
            BootStatus::RadioCtrlInit => "radio control initialization",
            BootStatus::BridgeInit => "bridge initialization",
            BootStatus::CmdSvcInit => "command service initialization",
            BootStatus::CaptureInit => "capture initialization",
            BootStatus::AdaptationInit => "adaptation initialization",
            BootStatus::ExceptionInit => "exception handler initialization",
            BootStatus::FwCrcErr => "firmware checksum error",
            BootStatus::UnexpectedErr => "unexpected boot error",
            BootStatus::InitThread => "init thread running",
            BootStatus::SysclkInit => "system clock initialization",
            BootStatus::InterruptInit => "interrupt initialization",
            BootStatus::HaltInit => "halt service initialization",
            BootStatus::OsTickInit => "OS tick initialization",
            BootStatus::OsLaunch => "OS launched",
            BootStatus::OsStackChkInit => "OS stack check initialization",
            BootStatus::ExceptionPreinit => "exception handler pre-initialization",
            BootStatus::ReadyForReload => "waiting for image reload",
            BootStatus::EccInit => "ECC initialization",
            BootStatus::ExceptionDone => "exception handling done",
            BootStatus::WatchdogInit => "watchdog initialization",
            BootStatus::RadioCmdSvcInit => "radio command service initialization",
        }
    }
}

impl TryFrom<u8> for BootStatus {
    /// The raw value, if it isn't a known status
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let status = match value {
            0 => BootStatus::PowerUp,
            1 => BootStatus::Ready,
            2 => BootStatus::WaitForCpus,
            4 => BootStatus::BootPreinit,
            5 => BootStatus::ProfileInit,
            6 => BootStatus::OsalInit,
            7 => BootStatus::MemSvcPreinit,
            8 => BootStatus::ThreadStart,
            9 => BootStatus::AppConfig,
            10 => BootStatus::AppInit,
            11 => BootStatus::ErrorInit,
            12 => BootStatus::BufferMgmtInit,
            14 => BootStatus::MemSvcInit,
            15 => BootStatus::LogTraceInit,
            16 => BootStatus::EventSvcInit,
            17 => BootStatus::RadioCtrlInit,
            18 => BootStatus::BridgeInit,
            19 => BootStatus::CmdSvcInit,
            20 => BootStatus::CaptureInit,
            21 => BootStatus::AdaptationInit,
            22 => BootStatus::ExceptionInit,
            23 => BootStatus::FwCrcErr,
            24 => BootStatus::UnexpectedErr,
            26 => BootStatus::InitThread,
            27 => BootStatus::SysclkInit,
            28 => BootStatus::InterruptInit,
            29 => BootStatus::HaltInit,
            30 => BootStatus::OsTickInit,
            31 => BootStatus::OsLaunch,
            32 => BootStatus::OsStackChkInit,
            33 => BootStatus::ExceptionPreinit,
            34 => BootStatus::ReadyForReload,
            35 => BootStatus::EccInit,
            36 => BootStatus::ExceptionDone,
            37 => BootStatus::WatchdogInit,
            38 => BootStatus::RadioCmdSvcInit,
            _ => return Err(value),
        };

        Ok(status)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn raw_values_round_trip() {
        for raw in 0..=u8::MAX {
            if let Ok(status) = BootStatus::try_from(raw) {
                assert_eq!(status as u8, raw);
            }
        }
    }

    #[test]
    fn gaps_are_rejected() {
        assert_eq!(BootStatus::try_from(3), Err(3));
        assert_eq!(BootStatus::try_from(13), Err(13));
        assert_eq!(BootStatus::try_from(25), Err(25));
        assert_eq!(BootStatus::try_from(39), Err(39));
    }

    #[test]
    fn only_crc_and_unexpected_errors_are_terminal() {
        assert!(BootStatus::FwCrcErr.is_terminal_failure());
        assert!(BootStatus::UnexpectedErr.is_terminal_failure());
        assert!(!BootStatus::ReadyForReload.is_terminal_failure());
        assert!(!BootStatus::Ready.is_terminal_failure());
    }
}
