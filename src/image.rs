//! Firmware image sources and the archive header
//!
//! An image is laid out as
//!
//! ```text
//! [file CRC32: u32][archive header: 12 bytes][body ...]
//! ```
//!
//! All words are little-endian. The CRC covers everything after itself, and
//! the whole file must be a multiple of 4 bytes long.
//!
//! The loader reads an image through [`ImageSource`], so the image can live in
//! flash ([`SliceImage`]) or, with the `std` feature, in a file.

use byte::{ctx::Endian, BytesExt as _, TryRead, TryWrite};

#[cfg(feature = "defmt")]
use defmt::Format;

/// Size of the stored file CRC
pub const FILE_CRC_LEN: usize = 4;

/// Size of the archive header
pub const ARCHIVE_HEADER_LEN: usize = 12;

/// Bytes in front of the body
pub const IMAGE_HEADER_LEN: usize = FILE_CRC_LEN + ARCHIVE_HEADER_LEN;

/// Magic number identifying a DFE archive
pub const ARCHIVE_MAGIC: u32 = 0x4446_4541;

/// Only archive format revision understood
pub const ARCHIVE_FORMAT_REV: u32 = 1;

/// An error reported by an image source
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum ImageError {
    /// The path doesn't fit, terminator included
    PathTooLong,
    /// The path contains a NUL byte
    InvalidPath,
    /// The image couldn't be opened
    Open,
    /// The image size couldn't be determined
    Size,
    /// Seeking failed
    Seek,
    /// Reading failed
    Read,
    /// The image ended before the requested data
    UnexpectedEof,
    /// Closing failed
    Close,
}

/// Something a firmware image can be read from
pub trait ImageSource {
    /// Total size in bytes
    fn size(&mut self) -> Result<u32, ImageError>;

    /// Move the read position to `pos`
    fn seek(&mut self, pos: u32) -> Result<(), ImageError>;

    /// Read up to `buf.len()` bytes, returning how many were read
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ImageError>;

    /// Release the image
    ///
    /// Dropping a source releases it too, but only this reports failures.
    fn close(self) -> Result<(), ImageError>;

    /// Fill `buf` completely
    fn read_exact(&mut self, mut buf: &mut [u8]) -> Result<(), ImageError> {
        while !buf.is_empty() {
            match self.read(buf)? {
                0 => return Err(ImageError::UnexpectedEof),
                n => buf = &mut buf[n..],
            }
        }

        Ok(())
    }
}

/// An image held in memory
#[derive(Clone, Debug)]
pub struct SliceImage<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceImage<'a> {
    /// Wrap `data`
    pub fn new(data: &'a [u8]) -> Self {
        SliceImage { data, pos: 0 }
    }
}

impl ImageSource for SliceImage<'_> {
    fn size(&mut self) -> Result<u32, ImageError> {
        u32::try_from(self.data.len()).map_err(|_| ImageError::Size)
    }

    fn seek(&mut self, pos: u32) -> Result<(), ImageError> {
        let pos = pos as usize;
        if pos > self.data.len() {
            return Err(ImageError::Seek);
        }
        self.pos = pos;

        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ImageError> {
        let remaining = &self.data[self.pos..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;

        Ok(n)
    }

    fn close(self) -> Result<(), ImageError> {
        Ok(())
    }
}

#[cfg(feature = "std")]
pub use self::file::FileImage;

#[cfg(feature = "std")]
mod file {
    use std::{
        fs::File,
        io::{Read, Seek, SeekFrom},
        path::Path,
    };

    use super::{ImageError, ImageSource};
    use crate::configs::MAX_PATH_LEN;

    /// An image read from the file system
    #[derive(Debug)]
    pub struct FileImage {
        file: File,
    }

    impl FileImage {
        /// Open the image at `path`
        ///
        /// The path must fit in [`MAX_PATH_LEN`] bytes with a terminator and
        /// must not contain NUL.
        pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ImageError> {
            let path = path.as_ref();
            let raw = path.to_str().ok_or(ImageError::InvalidPath)?;
            if raw.len() >= MAX_PATH_LEN {
                return Err(ImageError::PathTooLong);
            }
            if raw.as_bytes().contains(&0) {
                return Err(ImageError::InvalidPath);
            }

            let file = File::open(path).map_err(|error| {
                log::error!("Failed to open image {}: {}", raw, error);
                ImageError::Open
            })?;

            Ok(FileImage { file })
        }
    }

    impl ImageSource for FileImage {
        fn size(&mut self) -> Result<u32, ImageError> {
            let len = self
                .file
                .metadata()
                .map_err(|_| ImageError::Size)?
                .len();
            u32::try_from(len).map_err(|_| ImageError::Size)
        }

        fn seek(&mut self, pos: u32) -> Result<(), ImageError> {
            self.file
                .seek(SeekFrom::Start(u64::from(pos)))
                .map(|_| ())
                .map_err(|_| ImageError::Seek)
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize, ImageError> {
            self.file.read(buf).map_err(|_| ImageError::Read)
        }

        fn close(self) -> Result<(), ImageError> {
            drop(self.file);
            Ok(())
        }
    }
}

/// Header that follows the file CRC
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct ArchiveHeader {
    /// Must be [`ARCHIVE_MAGIC`]
    pub magic: u32,
    /// Must be [`ARCHIVE_FORMAT_REV`]
    pub format_rev: u32,
    /// Image checksum handed to the firmware
    pub xsum: u32,
}

impl<'a> TryRead<'a, Endian> for ArchiveHeader {
    fn try_read(bytes: &'a [u8], endian: Endian) -> byte::Result<(Self, usize)> {
        let offset = &mut 0;

        let header = ArchiveHeader {
            magic: bytes.read_with(offset, endian)?,
            format_rev: bytes.read_with(offset, endian)?,
            xsum: bytes.read_with(offset, endian)?,
        };

        Ok((header, *offset))
    }
}

impl TryWrite<Endian> for ArchiveHeader {
    fn try_write(self, bytes: &mut [u8], endian: Endian) -> byte::Result<usize> {
        let offset = &mut 0;

        bytes.write_with(offset, self.magic, endian)?;
        bytes.write_with(offset, self.format_rev, endian)?;
        bytes.write_with(offset, self.xsum, endian)?;

        Ok(*offset)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn slice_image_reads_and_seeks() {
        let data = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let mut image = SliceImage::new(&data);

        assert_eq!(image.size().unwrap(), 8);

        let mut buf = [0; 3];
        image.seek(4).unwrap();
        image.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [5, 6, 7]);

        let mut rest = [0; 4];
        assert_eq!(image.read(&mut rest).unwrap(), 1);
        assert_eq!(image.read_exact(&mut rest), Err(ImageError::UnexpectedEof));

        assert_eq!(image.seek(9), Err(ImageError::Seek));
        image.close().unwrap();
    }

    #[test]
    fn archive_header_layout() {
        let bytes = [
            0x41, 0x45, 0x46, 0x44, // magic
            0x01, 0x00, 0x00, 0x00, // revision
            0x78, 0x56, 0x34, 0x12, // xsum
        ];

        let header: ArchiveHeader = bytes.read_with(&mut 0, byte::LE).unwrap();
        assert_eq!(
            header,
            ArchiveHeader {
                magic: ARCHIVE_MAGIC,
                format_rev: ARCHIVE_FORMAT_REV,
                xsum: 0x1234_5678,
            }
        );

        let short: byte::Result<ArchiveHeader> = bytes[..8].read_with(&mut 0, byte::LE);
        assert!(short.is_err());
    }

    #[cfg(feature = "std")]
    #[test]
    fn file_image_rejects_bad_paths() {
        use crate::configs::MAX_PATH_LEN;

        let long = "a".repeat(MAX_PATH_LEN);
        assert_eq!(
            FileImage::open(long).unwrap_err(),
            ImageError::PathTooLong
        );
        assert_eq!(
            FileImage::open("image\0.bin").unwrap_err(),
            ImageError::InvalidPath
        );
        assert_eq!(
            FileImage::open("/nonexistent/dfe.bin").unwrap_err(),
            ImageError::Open
        );
    }
}
