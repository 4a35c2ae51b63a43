//! Image checksum as stored in the windows header.

/// Function computing the checksum of an image whose checksum field is zero.
pub type ChecksumFn = fn(&[u8]) -> u32;

/// Returns the checksum facility, or `None` if the crate was built without one.
pub fn checksum_facility() -> Option<ChecksumFn> {
    #[cfg(feature = "checksum")]
    {
        Some(image_checksum)
    }
    #[cfg(not(feature = "checksum"))]
    {
        None
    }
}

/// Compute the checksum of an image the way `CheckSumMappedFile` does.
///
/// The image is summed as little-endian 16-bit words with end-around carry, and the length of
/// the image is added to the folded sum. The checksum field of the image has to be zero.
#[cfg(feature = "checksum")]
pub fn image_checksum(data: &[u8]) -> u32 {
    let mut sum = 0u32;
    for chunk in data.chunks(2) {
        let word = match *chunk {
            [low, high] => u16::from_le_bytes([low, high]),
            [low] => low as u16,
            _ => 0,
        };
        sum += word as u32;
        sum = (sum & 0xffff) + (sum >> 16);
    }
    sum = (sum & 0xffff) + (sum >> 16);
    sum.wrapping_add(data.len() as u32)
}
