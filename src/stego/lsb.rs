// LSB steganography over color samples: frame = magic + 4-byte length (big-endian) + payload

use super::{Carrier, SaltCodec};
use crate::error::StegoError;

const MAGIC: &[u8; MAGIC_LEN] = b"SSLT";
const MAGIC_LEN: usize = 4;
const LENGTH_BYTES: usize = 4;
const FRAME_HEADER_LEN: usize = MAGIC_LEN + LENGTH_BYTES;

/// One payload bit per color sample, most significant bit first, in the
/// carrier's row-major sample order.
#[derive(Debug, Clone, Copy, Default)]
pub struct LsbCodec;

impl LsbCodec {
    /// Reads the `index`-th hidden byte.
    fn read_byte(carrier: &Carrier, index: usize) -> u8 {
        (0..8).fold(0u8, |byte, bit| {
            (byte << 1) | (carrier.sample(index * 8 + bit) & 1)
        })
    }

    fn read_bytes(carrier: &Carrier, start: usize, len: usize) -> Vec<u8> {
        (start..start + len)
            .map(|i| Self::read_byte(carrier, i))
            .collect()
    }
}

impl SaltCodec for LsbCodec {
    fn capacity(&self, carrier: &Carrier) -> usize {
        (carrier.sample_count() / 8).saturating_sub(FRAME_HEADER_LEN)
    }

    fn embed(&self, carrier: &mut Carrier, payload: &[u8]) -> Result<(), StegoError> {
        let len = u32::try_from(payload.len())
            .map_err(|_| StegoError::Input("payload length does not fit in 32 bits".into()))?;

        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
        frame.extend_from_slice(MAGIC);
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(payload);

        let needed = frame.len() * 8;
        let available = carrier.sample_count();
        if needed > available {
            return Err(StegoError::CapacityExceeded { needed, available });
        }

        for bit_idx in 0..needed {
            let bit = (frame[bit_idx / 8] >> (7 - bit_idx % 8)) & 1;
            carrier.set_lsb(bit_idx, bit);
        }
        Ok(())
    }

    fn extract(&self, carrier: &Carrier) -> Result<Vec<u8>, StegoError> {
        let available = carrier.sample_count() / 8;
        if available < FRAME_HEADER_LEN {
            return Err(StegoError::NotFound);
        }

        if Self::read_bytes(carrier, 0, MAGIC_LEN) != MAGIC {
            return Err(StegoError::NotFound);
        }

        let len_bytes = Self::read_bytes(carrier, MAGIC_LEN, LENGTH_BYTES);
        let len =
            u32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
        if len > available - FRAME_HEADER_LEN {
            return Err(StegoError::NotFound);
        }

        Ok(Self::read_bytes(carrier, FRAME_HEADER_LEN, len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use proptest::prelude::*;

    fn carrier(width: u32, height: u32) -> Carrier {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 7 + y) as u8, (x * 3 + y * 5) as u8, (x ^ y) as u8])
        });
        Carrier::from_image(DynamicImage::ImageRgb8(img), ImageFormat::Png).unwrap()
    }

    #[test]
    fn embed_then_extract() {
        let mut c = carrier(16, 16);
        LsbCodec.embed(&mut c, b"hello salt").unwrap();
        assert_eq!(LsbCodec.extract(&c).unwrap(), b"hello salt");
    }

    #[test]
    fn exact_capacity_fits_and_one_more_byte_fails() {
        // 32 x 1 RGB = 96 samples = 12 bytes = 8 header + 4 payload
        let mut c = carrier(32, 1);
        assert_eq!(LsbCodec.capacity(&c), 4);

        LsbCodec.embed(&mut c, b"abcd").unwrap();
        assert_eq!(LsbCodec.extract(&c).unwrap(), b"abcd");

        let err = LsbCodec.embed(&mut c, b"abcde").unwrap_err();
        assert!(matches!(
            err,
            StegoError::CapacityExceeded {
                needed: 104,
                available: 96
            }
        ));
    }

    #[test]
    fn failed_embed_does_not_touch_pixels() {
        let mut c = carrier(4, 1);
        let before = c.pixels().to_vec();

        assert!(LsbCodec.embed(&mut c, b"too long for this").is_err());
        assert_eq!(c.pixels(), &before[..]);
    }

    #[test]
    fn clean_image_has_no_payload() {
        let img = RgbImage::from_pixel(16, 16, Rgb([0, 0, 0]));
        let c = Carrier::from_image(DynamicImage::ImageRgb8(img), ImageFormat::Png).unwrap();
        assert!(matches!(LsbCodec.extract(&c), Err(StegoError::NotFound)));
    }

    #[test]
    fn tiny_image_has_no_payload() {
        assert!(matches!(LsbCodec.extract(&carrier(2, 2)), Err(StegoError::NotFound)));
    }

    #[test]
    fn corrupt_length_is_not_found() {
        let mut c = carrier(32, 1);
        LsbCodec.embed(&mut c, b"x").unwrap();
        // set the top bit of the length field
        c.set_lsb(MAGIC_LEN * 8, 1);
        assert!(matches!(LsbCodec.extract(&c), Err(StegoError::NotFound)));
    }

    #[test]
    fn new_embed_overwrites_previous_payload() {
        let mut c = carrier(32, 32);
        LsbCodec.embed(&mut c, b"a much longer first payload").unwrap();
        LsbCodec.embed(&mut c, b"second").unwrap();
        assert_eq!(LsbCodec.extract(&c).unwrap(), b"second");
    }

    proptest! {
        #[test]
        fn roundtrip_changes_samples_by_at_most_one(
            payload in proptest::collection::vec(any::<u8>(), 0..64)
        ) {
            let original = carrier(24, 24);
            let mut c = original.clone();

            LsbCodec.embed(&mut c, &payload).unwrap();

            prop_assert_eq!(LsbCodec.extract(&c).unwrap(), payload);
            prop_assert_eq!(
                (c.width(), c.height(), c.color()),
                (original.width(), original.height(), original.color())
            );
            for (a, b) in original.pixels().iter().zip(c.pixels()) {
                prop_assert!(a.abs_diff(*b) <= 1);
            }
        }
    }
}
