//! Low-level interface to the ADRV904X
//!
//! This module implements the register-level transport to the ADRV904X. Users
//! of this library should typically not need to use this. Please consider
//! using the [high-level interface] instead.
//!
//! Everything above this module talks to the device through the [`Transport`]
//! trait, so the high-level code can be driven by any register access
//! primitive. [`Adrv904x`] implements it on top of an `embedded-hal` SPI
//! device.
//!
//! **NOTE**: The addresses in this module are a hardware contract. Writing
//! the wrong value to the clock and reset registers can leave the DFE cores in
//! a state that only a device reset recovers from.
//!
//! [high-level interface]: ../hl/index.html

use core::fmt;

use embedded_hal::spi::{self, Operation};

/// Direct SPI configuration register B
pub const CONFIG_B: u32 = 0x0001;
/// `CONFIG_B` bit that selects one instruction per byte (streaming off)
pub const SINGLE_INSTRUCTION: u8 = 0x80;

/// Read flag in the SPI instruction byte
const READ_FLAG: u8 = 0x80;
/// Instruction byte followed by the 32-bit address
const HEADER_LEN: usize = 5;

/// First byte of the DFE code memory region
pub const DFE_CODE_START: u32 = 0xC000_0000;
/// One past the last byte of the DFE code memory region
pub const DFE_CODE_END: u32 = 0xC080_0000;

/// A55 64-bit mode configuration signal
pub const A55_CONFIG_SIGNAL: u32 = 0xB222_0000;
/// Value that puts all four A55 cores in AArch64
pub const A55_CONFIG_SIGNAL_AARCH64: u32 = 0x0000_0F0F;
/// Reset vector base address, one register per core
pub const A55_RVBAR_ADDR: [u32; 4] = [0xB222_0020, 0xB222_0040, 0xB222_0060, 0xB222_0080];
/// A55 miscellaneous control
pub const A55_MISC: u32 = 0xB222_00A0;
/// A55 clock and reset control
pub const CLK_RST_CTRL_CFG: u32 = 0xB221_0000;
/// `CLK_RST_CTRL_CFG` value that releases the cores
pub const CLK_RST_RELEASE: u32 = 0x0028_0001;
/// `CLK_RST_CTRL_CFG` base value while the cores are held
pub const CLK_RST_HOLD: u32 = 0x0028_0000;
/// `CLK_RST_CTRL_CFG` warm reset bit
pub const CLK_RST_WARM_RESET: u32 = 1 << 3;
/// `CLK_RST_CTRL_CFG` value with every domain held in reset
pub const CLK_RST_ALL_RESET: u32 = 0x0028_FFB8;
/// `A55_MISC` bit set during load preparation
pub const A55_MISC_PREPARE: u32 = 1 << 16;

/// Bank control word of the first L4 memory bank
pub const L4_BANK_CTRL_FIRST: u32 = 0xB080_0024;
/// Bank control word of the last L4 memory bank
pub const L4_BANK_CTRL_LAST: u32 = 0xB0B0_0024;
/// Distance between two L4 bank control words
pub const L4_BANK_STRIDE: u32 = 0x0010_0000;

/// Byte-wide firmware scratch registers, indexed by scratch id
pub const SCRATCH_PAD_BASE: u32 = 0x4700_0000;
/// Scratch id holding the radio (companion) CPU boot status
pub const SCRATCH_CPU0_BOOT_STATUS: u16 = 0;
/// Scratch id holding the DFE boot status
pub const SCRATCH_DFE_BOOT_STATUS: u16 = 256;
/// Scratch ids holding the SDK data address, least significant byte first
pub const SCRATCH_SDK_DATA_ADDR: [u16; 4] = [257, 258, 259, 260];
/// Scratch ids used for the dummy writes during load preparation
pub const SCRATCH_DUMMY: [u16; 3] = [261, 262, 263];

/// Mailbox doorbell, written with the link id
pub const A55_SPI0_COMMAND: u32 = 0x4700_0200;
/// Mailbox status, bit 0 set while the previous command is being taken
pub const A55_SPI0_COMMAND_BUSY: u32 = 0x4700_0204;
/// Command status nibbles, two links per byte
pub const A55_SPI0_COMMAND_STATUS: u32 = 0x4700_0208;

/// AHB SPI bridge control
pub const AHB_SPI_BRIDGE: u32 = 0x4700_0300;
/// `AHB_SPI_BRIDGE` enable bit
pub const AHB_SPI_BRIDGE_ENABLE: u32 = 1 << 0;

/// Size of the DFE init structure at the end of code memory
pub const DFE_INIT_STRUCT_SIZE: u32 = 0x40;
/// Address of the DFE init structure
pub const DFE_INIT_STRUCT: u32 = DFE_CODE_END - DFE_INIT_STRUCT_SIZE;
/// Boot flag byte in the DFE init structure
pub const DFE_INIT_BOOT_FLAG: u32 = DFE_INIT_STRUCT;
/// Image checksum word in the DFE init structure
pub const DFE_INIT_IMAGE_CRC: u32 = DFE_INIT_STRUCT + 4;

/// Offsets into the SDK data structure, relative to the SDK data address
pub mod sdk_data {
    /// Per-core exception flags, one `u32` per core
    pub const EXCEPTION_FLAGS: u32 = 0x0000;
    /// Last error log, six records of four `u32`
    pub const ERROR_LOG: u32 = 0x0040;
    /// Application init status word
    pub const APP_INIT_STATUS: u32 = 0x00A0;
    /// Boot error word
    pub const BOOT_ERROR: u32 = 0x00A4;
    /// Start of the mailbox buffers, one per link
    pub const MAILBOX: u32 = 0x0100;
}

/// A bit field within a 32-bit register
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Field {
    /// Register address
    pub addr: u32,
    /// First bit of the field
    pub first_bit: u8,
    /// Last bit of the field (inclusive)
    pub last_bit: u8,
}

impl Field {
    /// Create a field descriptor
    pub const fn new(addr: u32, first_bit: u8, last_bit: u8) -> Self {
        Field {
            addr,
            first_bit,
            last_bit,
        }
    }

    /// Mask of the field, in register position
    pub const fn mask(&self) -> u32 {
        let width = (self.last_bit - self.first_bit + 1) as u32;
        let bits = if width >= 32 {
            u32::MAX
        } else {
            (1 << width) - 1
        };
        bits << self.first_bit
    }
}

/// A55 system clock enable
pub const A55_SYSCLK_ENABLE: Field = Field::new(0xB221_0004, 0, 0);
/// A55 core clock divide ratio
pub const A55_CCLK_DIVIDE_RATIO: Field = Field::new(0xB221_0008, 0, 2);
/// A55 device clock divide ratio
pub const A55_DEVCLK_DIVIDE_RATIO: Field = Field::new(0xB221_0008, 4, 6);

/// Register access primitive used by the high-level interface
///
/// Multi-byte values are little-endian on the device side. Implementations
/// must not retry on their own.
pub trait Transport {
    /// Error reported by the underlying bus
    type Error;

    /// Write `value` to the 32-bit register at `addr`, touching only `mask`
    fn register_write(&mut self, addr: u32, value: u32, mask: u32) -> Result<(), Self::Error>;

    /// Read the 32-bit register at `addr`, returning only the bits in `mask`
    fn register_read(&mut self, addr: u32, mask: u32) -> Result<u32, Self::Error>;

    /// Write a block of bytes starting at `addr`
    fn bytes_write(&mut self, addr: u32, data: &[u8]) -> Result<(), Self::Error>;

    /// Read a block of bytes starting at `addr`
    fn bytes_read(&mut self, addr: u32, data: &mut [u8]) -> Result<(), Self::Error>;

    /// Switch the link to streaming mode. A no-op if it is already on.
    fn streaming_enter(&mut self) -> Result<(), Self::Error>;

    /// Switch the link back to one instruction per byte. A no-op if
    /// streaming is off.
    fn streaming_exit(&mut self) -> Result<(), Self::Error>;

    /// Whether the link is in streaming mode
    fn is_streaming(&self) -> bool;

    /// Read a byte-wide firmware scratch register
    fn scratch_read(&mut self, id: u16) -> Result<u8, Self::Error> {
        let mut value = [0];
        self.bytes_read(SCRATCH_PAD_BASE + u32::from(id), &mut value)?;
        Ok(value[0])
    }

    /// Write a byte-wide firmware scratch register
    fn scratch_write(&mut self, id: u16, value: u8) -> Result<(), Self::Error> {
        self.bytes_write(SCRATCH_PAD_BASE + u32::from(id), &[value])
    }

    /// Read a bit field, shifted down to bit 0
    fn field_read(&mut self, field: Field) -> Result<u32, Self::Error> {
        Ok(self.register_read(field.addr, field.mask())? >> field.first_bit)
    }

    /// Write a bit field. Bits of `value` that don't fit are dropped.
    fn field_write(&mut self, field: Field, value: u32) -> Result<(), Self::Error> {
        self.register_write(field.addr, value << field.first_bit, field.mask())
    }
}

/// Entry point to the ADRV904X driver's low-level API
///
/// Please consider using [hl::Adrv904x] instead.
///
/// [hl::Adrv904x]: ../hl/struct.Adrv904x.html
pub struct Adrv904x<SPI> {
    spi: SPI,
    streaming: bool,
}

impl<SPI> Adrv904x<SPI>
where
    SPI: spi::SpiDevice<u8>,
{
    /// Create a new instance of `Adrv904x`
    ///
    /// The device is assumed to be in single instruction mode, which is its
    /// reset state.
    pub fn new(spi: SPI) -> Self {
        Adrv904x {
            spi,
            streaming: false,
        }
    }

    /// Allow access to the SPI bus
    pub fn bus(&mut self) -> &mut SPI {
        &mut self.spi
    }

    /// Release the SPI bus
    pub fn release(self) -> SPI {
        self.spi
    }

    fn write_raw(&mut self, addr: u32, data: &[u8]) -> Result<(), Error<SPI>> {
        let header = header(false, addr);
        self.spi
            .transaction(&mut [Operation::Write(&header), Operation::Write(data)])
            .map_err(Error::Transaction)
    }

    fn read_raw(&mut self, addr: u32, data: &mut [u8]) -> Result<(), Error<SPI>> {
        let header = header(true, addr);
        self.spi
            .transaction(&mut [Operation::Write(&header), Operation::Read(data)])
            .map_err(Error::Transaction)
    }
}

impl<SPI> Transport for Adrv904x<SPI>
where
    SPI: spi::SpiDevice<u8>,
{
    type Error = Error<SPI>;

    fn register_write(&mut self, addr: u32, value: u32, mask: u32) -> Result<(), Self::Error> {
        let value = if mask == u32::MAX {
            value
        } else {
            let current = self.register_read(addr, u32::MAX)?;
            (current & !mask) | (value & mask)
        };

        self.bytes_write(addr, &value.to_le_bytes())
    }

    fn register_read(&mut self, addr: u32, mask: u32) -> Result<u32, Self::Error> {
        let mut buffer = [0; 4];
        self.bytes_read(addr, &mut buffer)?;

        Ok(u32::from_le_bytes(buffer) & mask)
    }

    fn bytes_write(&mut self, addr: u32, data: &[u8]) -> Result<(), Self::Error> {
        if self.streaming {
            return self.write_raw(addr, data);
        }

        for (offset, byte) in (0..).zip(data.iter()) {
            self.write_raw(addr.wrapping_add(offset), core::slice::from_ref(byte))?;
        }

        Ok(())
    }

    fn bytes_read(&mut self, addr: u32, data: &mut [u8]) -> Result<(), Self::Error> {
        if self.streaming {
            return self.read_raw(addr, data);
        }

        for (offset, byte) in (0..).zip(data.iter_mut()) {
            self.read_raw(addr.wrapping_add(offset), core::slice::from_mut(byte))?;
        }

        Ok(())
    }

    fn streaming_enter(&mut self) -> Result<(), Self::Error> {
        if self.streaming {
            return Ok(());
        }

        self.write_raw(CONFIG_B, &[0])?;
        self.streaming = true;

        Ok(())
    }

    fn streaming_exit(&mut self) -> Result<(), Self::Error> {
        if !self.streaming {
            return Ok(());
        }

        self.write_raw(CONFIG_B, &[SINGLE_INSTRUCTION])?;
        self.streaming = false;

        Ok(())
    }

    fn is_streaming(&self) -> bool {
        self.streaming
    }
}

/// Build the instruction header for an access to `addr`
#[inline(always)]
fn header(read: bool, addr: u32) -> [u8; HEADER_LEN] {
    let addr = addr.to_be_bytes();
    let instruction = if read { READ_FLAG } else { 0 };

    [instruction, addr[0], addr[1], addr[2], addr[3]]
}

/// An SPI error that can occur when communicating with the ADRV904X
pub enum Error<SPI>
where
    SPI: spi::ErrorType,
{
    /// SPI error occured during a transaction
    Transaction(SPI::Error),
}

// We can't derive this implementation, as the compiler will complain that the
// associated error type doesn't implement `Debug`.
impl<SPI> fmt::Debug for Error<SPI>
where
    SPI: spi::ErrorType,
    SPI::Error: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Transaction(error) => write!(f, "Transaction({:?})", error),
        }
    }
}

#[cfg(feature = "defmt")]
impl<SPI> defmt::Format for Error<SPI>
where
    SPI: spi::ErrorType,
{
    fn format(&self, f: defmt::Formatter) {
        match self {
            Error::Transaction(_) => defmt::write!(f, "Transaction()"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use embedded_hal_mock::eh1::spi::{Mock as SpiMock, Transaction as SpiTransaction};

    #[test]
    fn field_masks() {
        assert_eq!(A55_SYSCLK_ENABLE.mask(), 0x1);
        assert_eq!(A55_DEVCLK_DIVIDE_RATIO.mask(), 0x70);
        assert_eq!(Field::new(0, 0, 31).mask(), u32::MAX);
    }

    #[test]
    fn single_instruction_reads_byte_by_byte() {
        let spi = SpiMock::new(&[
            SpiTransaction::transaction_start(),
            SpiTransaction::write_vec(vec![0x80, 0x47, 0x00, 0x01, 0x01]),
            SpiTransaction::read_vec(vec![0x34]),
            SpiTransaction::transaction_end(),
            SpiTransaction::transaction_start(),
            SpiTransaction::write_vec(vec![0x80, 0x47, 0x00, 0x01, 0x02]),
            SpiTransaction::read_vec(vec![0x12]),
            SpiTransaction::transaction_end(),
        ]);

        let mut adrv = Adrv904x::new(spi);
        let mut buffer = [0; 2];
        adrv.bytes_read(SCRATCH_PAD_BASE + 257, &mut buffer).unwrap();

        assert_eq!(buffer, [0x34, 0x12]);

        adrv.release().done();
    }

    #[test]
    fn streaming_write_is_one_transaction() {
        let spi = SpiMock::new(&[
            SpiTransaction::transaction_start(),
            SpiTransaction::write_vec(vec![0x00, 0x00, 0x00, 0x00, 0x01]),
            SpiTransaction::write_vec(vec![0x00]),
            SpiTransaction::transaction_end(),
            SpiTransaction::transaction_start(),
            SpiTransaction::write_vec(vec![0x00, 0xC0, 0x00, 0x00, 0x00]),
            SpiTransaction::write_vec(vec![0xDE, 0xAD, 0xBE, 0xEF]),
            SpiTransaction::transaction_end(),
            SpiTransaction::transaction_start(),
            SpiTransaction::write_vec(vec![0x00, 0x00, 0x00, 0x00, 0x01]),
            SpiTransaction::write_vec(vec![SINGLE_INSTRUCTION]),
            SpiTransaction::transaction_end(),
        ]);

        let mut adrv = Adrv904x::new(spi);

        adrv.streaming_enter().unwrap();
        // Entering twice doesn't touch the bus
        adrv.streaming_enter().unwrap();
        assert!(adrv.is_streaming());

        adrv.bytes_write(DFE_CODE_START, &[0xDE, 0xAD, 0xBE, 0xEF])
            .unwrap();

        adrv.streaming_exit().unwrap();
        adrv.streaming_exit().unwrap();
        assert!(!adrv.is_streaming());

        adrv.release().done();
    }

    #[test]
    fn masked_write_preserves_other_bits() {
        let spi = SpiMock::new(&[
            // CONFIG_B, switch to streaming
            SpiTransaction::transaction_start(),
            SpiTransaction::write_vec(vec![0x00, 0x00, 0x00, 0x00, 0x01]),
            SpiTransaction::write_vec(vec![0x00]),
            SpiTransaction::transaction_end(),
            // read back the current value
            SpiTransaction::transaction_start(),
            SpiTransaction::write_vec(vec![0x80, 0xB2, 0x21, 0x00, 0x08]),
            SpiTransaction::read_vec(vec![0x77, 0x00, 0x00, 0x80]),
            SpiTransaction::transaction_end(),
            // only bits 4..=6 change
            SpiTransaction::transaction_start(),
            SpiTransaction::write_vec(vec![0x00, 0xB2, 0x21, 0x00, 0x08]),
            SpiTransaction::write_vec(vec![0x07, 0x00, 0x00, 0x80]),
            SpiTransaction::transaction_end(),
        ]);

        let mut adrv = Adrv904x::new(spi);
        adrv.streaming_enter().unwrap();
        adrv.field_write(A55_DEVCLK_DIVIDE_RATIO, 0).unwrap();

        adrv.release().done();
    }
}
