//! Fixed-width little-endian encoding for keys and values.
//!
//! Node pages store keys and values as packed parallel arrays, so every
//! key and value type must encode to a fixed number of bytes. This trait
//! replaces an unchecked cast of page bytes with explicit serialisation.

use std::fmt::Debug;
use std::hash::Hash;

/// A value with a fixed-width little-endian byte encoding
pub trait Codec: Copy {
    /// Encoded width in bytes
    const ENCODED_LEN: usize;

    /// Write the encoding into `buf` (must be exactly `ENCODED_LEN` bytes)
    fn write_to(&self, buf: &mut [u8]);

    /// Decode from `buf` (must be exactly `ENCODED_LEN` bytes)
    fn read_from(buf: &[u8]) -> Self;
}

macro_rules! impl_codec_for_int {
    ($($ty:ty),*) => {
        $(
            impl Codec for $ty {
                const ENCODED_LEN: usize = std::mem::size_of::<$ty>();

                fn write_to(&self, buf: &mut [u8]) {
                    buf.copy_from_slice(&self.to_le_bytes());
                }

                fn read_from(buf: &[u8]) -> Self {
                    let mut bytes = [0u8; std::mem::size_of::<$ty>()];
                    bytes.copy_from_slice(buf);
                    <$ty>::from_le_bytes(bytes)
                }
            }
        )*
    };
}

impl_codec_for_int!(u16, u32, u64, i16, i32, i64);

/// Marker trait for types usable as tree keys
pub trait IndexKey: Codec + Ord + Eq + Hash + Debug {}

impl<T: Codec + Ord + Eq + Hash + Debug> IndexKey for T {}
