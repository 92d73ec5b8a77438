use core::ops::{Deref, DerefMut};

use byte::{BytesExt as _, LE};
use embedded_hal::delay::DelayNs;

use crate::{
    configs::CHUNK_SIZE,
    crc::{crc32_chunk, CRC_SEED},
    image::{
        ArchiveHeader, ImageError, ImageSource, ARCHIVE_FORMAT_REV, ARCHIVE_HEADER_LEN,
        ARCHIVE_MAGIC, FILE_CRC_LEN, IMAGE_HEADER_LEN,
    },
    ll::{self, Transport},
};

use super::{Adrv904x, Error};

/// Largest image body that fits below the DFE init structure
pub const MAX_IMAGE_BODY: u32 = ll::DFE_INIT_STRUCT - ll::DFE_CODE_START;

impl<T, D> Adrv904x<T, D>
where
    T: Transport,
    D: DelayNs,
{
    /// Write a DFE image into code memory and check it
    ///
    /// The image size is checked before anything is written. The body is
    /// written in [`CHUNK_SIZE`] pieces with the link in streaming mode,
    /// which is switched off again before returning, whatever the outcome.
    ///
    /// Code memory is not restored on failure. The image is only considered
    /// loaded if its checksum matched and it was closed without error.
    /// On failure the image is dropped without being closed, so an error
    /// from closing it is never reported.
    pub fn load_image<I: ImageSource>(&mut self, mut image: I) -> Result<(), Error<T>> {
        let size = image.size()?;
        if size == 0 {
            return Err(Error::ImageEmpty);
        }
        if size % 4 != 0 {
            return Err(Error::ImageMisaligned { size });
        }
        if (size as usize) < IMAGE_HEADER_LEN {
            return Err(Error::ImageTruncated);
        }
        let body_len = size - IMAGE_HEADER_LEN as u32;
        if body_len > MAX_IMAGE_BODY {
            return Err(Error::ImageTooLarge { size });
        }

        let mut raw_crc = [0u8; FILE_CRC_LEN];
        let mut raw_header = [0u8; ARCHIVE_HEADER_LEN];
        image.seek(0)?;
        read_exact::<T, _>(&mut image, &mut raw_crc)?;
        read_exact::<T, _>(&mut image, &mut raw_header)?;

        let expected = u32::from_le_bytes(raw_crc);
        let header: ArchiveHeader = raw_header.read_with(&mut 0, LE)?;
        if header.magic != ARCHIVE_MAGIC {
            log::error!("Not a DFE archive, magic {:#010x}", header.magic);
            return Err(Error::InvalidArchive);
        }
        if header.format_rev != ARCHIVE_FORMAT_REV {
            log::error!("Unsupported DFE archive revision {}", header.format_rev);
            return Err(Error::UnsupportedArchiveRevision {
                rev: header.format_rev,
            });
        }

        self.ll
            .register_write(ll::DFE_INIT_IMAGE_CRC, header.xsum, u32::MAX)
            .map_err(Error::Transport)?;

        let crc = crc32_chunk(&raw_header, CRC_SEED, body_len == 0);

        let mut streaming = Streaming::enter(&mut self.ll).map_err(Error::Transport)?;
        let body = write_body(&mut *streaming, &mut image, body_len, crc);
        let exit = streaming.exit();

        let computed = match (body, exit) {
            (Ok(crc), Ok(())) => crc,
            (Ok(_), Err(error)) => {
                log::error!("Couldn't leave streaming mode after the image load");
                return Err(Error::StreamingExit(error));
            }
            (Err(error), exit) => {
                if exit.is_err() {
                    log::error!("Couldn't leave streaming mode after a failed image load");
                }
                return Err(error);
            }
        };

        if computed != expected {
            log::error!(
                "DFE image checksum mismatch, stored {:#010x}, computed {:#010x}",
                expected,
                computed
            );
            self.capture_diagnostics();
            return Err(Error::CrcMismatch { expected, computed });
        }

        image.close()?;
        self.state.mark_dfe_cpu_loaded();

        log::debug!("DFE image loaded, {} bytes", body_len);

        Ok(())
    }
}

/// Read into `buf`, treating a short image as truncated
fn read_exact<T, I>(image: &mut I, buf: &mut [u8]) -> Result<(), Error<T>>
where
    T: Transport,
    I: ImageSource,
{
    image.read_exact(buf).map_err(|error| match error {
        ImageError::UnexpectedEof => Error::ImageTruncated,
        error => Error::Image(error),
    })
}

/// Stream the image body to code memory, returning the final checksum
fn write_body<T, I>(
    ll: &mut T,
    image: &mut I,
    mut remaining: u32,
    mut crc: u32,
) -> Result<u32, Error<T>>
where
    T: Transport,
    I: ImageSource,
{
    ll.register_write(
        ll::AHB_SPI_BRIDGE,
        ll::AHB_SPI_BRIDGE_ENABLE,
        ll::AHB_SPI_BRIDGE_ENABLE,
    )
    .map_err(Error::Transport)?;

    let mut addr = ll::DFE_CODE_START;
    let mut chunk = [0u8; CHUNK_SIZE];

    while remaining > 0 {
        let len = remaining.min(CHUNK_SIZE as u32) as usize;
        read_exact::<T, _>(image, &mut chunk[..len])?;
        remaining -= len as u32;

        crc = crc32_chunk(&chunk[..len], crc, remaining == 0);

        ll.bytes_write(addr, &chunk[..len])
            .map_err(Error::Transport)?;
        log::trace!("Wrote {} image bytes at {:#010x}", len, addr);

        addr += len as u32;
    }

    Ok(crc)
}

/// Streaming mode, held for as long as this lives
///
/// Leaves streaming mode when exited or dropped, unless the link was already
/// streaming when it was created.
struct Streaming<'a, T>
where
    T: Transport,
{
    ll: &'a mut T,
    owned: bool,
}

impl<'a, T> Streaming<'a, T>
where
    T: Transport,
{
    fn enter(ll: &'a mut T) -> Result<Self, T::Error> {
        let owned = !ll.is_streaming();
        if owned {
            ll.streaming_enter()?;
        }

        Ok(Streaming { ll, owned })
    }

    fn exit(mut self) -> Result<(), T::Error> {
        if !self.owned {
            return Ok(());
        }
        self.owned = false;

        self.ll.streaming_exit()
    }
}

impl<T> Deref for Streaming<'_, T>
where
    T: Transport,
{
    type Target = T;

    fn deref(&self) -> &T {
        self.ll
    }
}

impl<T> DerefMut for Streaming<'_, T>
where
    T: Transport,
{
    fn deref_mut(&mut self) -> &mut T {
        self.ll
    }
}

impl<T> Drop for Streaming<'_, T>
where
    T: Transport,
{
    fn drop(&mut self) {
        if self.owned && self.ll.streaming_exit().is_err() {
            log::error!("Couldn't leave streaming mode");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::{
        hl::test_util::{build_image, build_image_with, device, Event, FakeTransport, SDK_DATA},
        image::SliceImage,
    };

    #[test]
    fn bad_sizes_are_rejected_before_any_access() {
        let image = build_image(1024);

        for (data, check) in [
            (&image[..0], "empty"),
            (&image[..1022], "misaligned"),
            (&image[..8], "truncated"),
        ] {
            let mut adrv = device(FakeTransport::new());
            let result = adrv.load_image(SliceImage::new(data));

            match check {
                "empty" => assert!(matches!(result, Err(Error::ImageEmpty))),
                "misaligned" => {
                    assert!(matches!(result, Err(Error::ImageMisaligned { size: 1022 })))
                }
                _ => assert!(matches!(result, Err(Error::ImageTruncated))),
            }
            assert_eq!(adrv.ll().calls(), 0);
            assert!(!adrv.is_dfe_cpu_loaded());
        }
    }

    #[test]
    fn image_is_written_to_code_memory() {
        let image = build_image(1024);
        let mut adrv = device(FakeTransport::new());

        adrv.load_image(SliceImage::new(&image)).unwrap();

        assert!(adrv.is_dfe_cpu_loaded());
        assert_eq!(
            adrv.ll().bytes(ll::DFE_CODE_START, image.len() - IMAGE_HEADER_LEN),
            &image[IMAGE_HEADER_LEN..]
        );
        assert_eq!(adrv.ll().word(ll::DFE_INIT_IMAGE_CRC), 0x0000_5A5A);
        assert_eq!(adrv.ll().enters(), 1);
        assert_eq!(adrv.ll().exits(), 1);
        assert!(!adrv.ll().is_streaming());

        // 1008 bytes of body in 256 byte chunks
        let chunks: Vec<_> = adrv
            .ll()
            .streaming_writes()
            .iter()
            .map(|(_, len)| *len)
            .collect();
        assert_eq!(chunks, [256, 256, 256, 240]);
    }

    #[test]
    fn header_only_image_loads() {
        let image = build_image(IMAGE_HEADER_LEN);
        let mut adrv = device(FakeTransport::new());

        adrv.load_image(SliceImage::new(&image)).unwrap();

        assert!(adrv.is_dfe_cpu_loaded());
        assert!(adrv.ll().streaming_writes().is_empty());
    }

    #[test]
    fn flipped_byte_fails_the_checksum() {
        let mut image = build_image(1024);
        image[IMAGE_HEADER_LEN + 100] ^= 0x80;
        let mut adrv = device(FakeTransport::new());

        let result = adrv.load_image(SliceImage::new(&image));

        let expected = u32::from_le_bytes([image[0], image[1], image[2], image[3]]);
        assert!(matches!(
            result,
            Err(Error::CrcMismatch { expected: e, computed: c }) if e == expected && c != expected
        ));
        assert!(!adrv.is_dfe_cpu_loaded());
        assert_eq!(adrv.ll().exits(), 1);
        assert_eq!(adrv.ll().reads_of(SDK_DATA + ll::sdk_data::ERROR_LOG), 1);
    }

    #[test]
    fn wrong_magic_or_revision_is_rejected() {
        let image = build_image_with(64, 0x1234_5678, 1);
        let mut adrv = device(FakeTransport::new());
        assert!(matches!(
            adrv.load_image(SliceImage::new(&image)),
            Err(Error::InvalidArchive)
        ));
        assert_eq!(adrv.ll().enters(), 0);

        let image = build_image_with(64, crate::image::ARCHIVE_MAGIC, 2);
        let mut adrv = device(FakeTransport::new());
        assert!(matches!(
            adrv.load_image(SliceImage::new(&image)),
            Err(Error::UnsupportedArchiveRevision { rev: 2 })
        ));
        assert_eq!(adrv.ll().calls(), 0);
    }

    #[test]
    fn failed_chunk_write_still_leaves_streaming_mode() {
        let image = build_image(1024);
        let mut fake = FakeTransport::new();
        fake.fail_streaming_write = Some(2);
        let mut adrv = device(fake);

        let result = adrv.load_image(SliceImage::new(&image));

        assert!(matches!(result, Err(Error::Transport(_))));
        assert!(!adrv.is_dfe_cpu_loaded());
        assert_eq!(adrv.ll().enters(), 1);
        assert_eq!(adrv.ll().exits(), 1);
        assert_eq!(adrv.ll().events().last(), Some(&Event::StreamingExit));
        assert_eq!(adrv.ll().streaming_writes().len(), 2);
    }

    #[test]
    fn exit_failure_does_not_hide_the_primary_error() {
        let image = build_image(1024);
        let mut fake = FakeTransport::new();
        fake.fail_streaming_write = Some(0);
        fake.fail_streaming_exit = true;
        let mut adrv = device(fake);

        let result = adrv.load_image(SliceImage::new(&image));

        assert!(matches!(result, Err(Error::Transport(_))));
    }

    #[test]
    fn exit_failure_after_good_load_is_reported() {
        let image = build_image(1024);
        let mut fake = FakeTransport::new();
        fake.fail_streaming_exit = true;
        let mut adrv = device(fake);

        let result = adrv.load_image(SliceImage::new(&image));

        assert!(matches!(result, Err(Error::StreamingExit(_))));
        assert!(!adrv.is_dfe_cpu_loaded());
    }

    #[test]
    fn link_already_streaming_is_left_alone() {
        let image = build_image(256);
        let mut adrv = device(FakeTransport::new());
        adrv.ll().streaming_enter().unwrap();

        adrv.load_image(SliceImage::new(&image)).unwrap();

        assert_eq!(adrv.ll().enters(), 1);
        assert_eq!(adrv.ll().exits(), 0);
        assert!(adrv.ll().is_streaming());
    }

    #[test]
    fn streaming_guard_exits_on_drop() {
        let mut fake = FakeTransport::new();
        {
            let _streaming = Streaming::enter(&mut fake).unwrap();
        }

        assert_eq!(fake.enters(), 1);
        assert_eq!(fake.exits(), 1);
    }

    /// Image whose close always fails
    struct UnclosableImage<'a>(SliceImage<'a>);

    impl ImageSource for UnclosableImage<'_> {
        fn size(&mut self) -> Result<u32, ImageError> {
            self.0.size()
        }

        fn seek(&mut self, pos: u32) -> Result<(), ImageError> {
            self.0.seek(pos)
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize, ImageError> {
            self.0.read(buf)
        }

        fn close(self) -> Result<(), ImageError> {
            Err(ImageError::Close)
        }
    }

    #[test]
    fn close_failure_is_only_reported_after_a_good_load() {
        let image = build_image(1024);
        let mut adrv = device(FakeTransport::new());

        let result = adrv.load_image(UnclosableImage(SliceImage::new(&image)));

        assert!(matches!(result, Err(Error::Image(ImageError::Close))));
        assert!(!adrv.is_dfe_cpu_loaded());

        let mut image = build_image(1024);
        image[IMAGE_HEADER_LEN] ^= 0x01;
        let mut adrv = device(FakeTransport::new());

        let result = adrv.load_image(UnclosableImage(SliceImage::new(&image)));

        assert!(matches!(result, Err(Error::CrcMismatch { .. })));
    }
}
