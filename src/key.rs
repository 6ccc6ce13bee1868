//! Sort keys
//!
//! The storage layer orders index entries by an externally supplied key. It
//! only compares keys and stores them in a fixed number of bytes; it never
//! interprets their bits.

use std::fmt::Debug;

/// A fixed-width, totally ordered key
///
/// Implementations must keep `encode`/`decode` lossless. Byte order of the
/// encoding does not need to match `Ord`; sorting always uses `Ord`.
pub trait SortKey: Ord + Clone + Debug + Send + Sync + 'static {
    /// Encoded width in bytes
    const WIDTH: usize;

    /// Write the key into `buf` (exactly `WIDTH` bytes)
    fn encode(&self, buf: &mut [u8]);

    /// Read a key from `buf` (exactly `WIDTH` bytes)
    fn decode(buf: &[u8]) -> Self;
}

macro_rules! impl_int_key {
    ($($ty:ty),*) => {
        $(
            impl SortKey for $ty {
                const WIDTH: usize = std::mem::size_of::<$ty>();

                fn encode(&self, buf: &mut [u8]) {
                    buf.copy_from_slice(&self.to_be_bytes());
                }

                fn decode(buf: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(buf);
                    <$ty>::from_be_bytes(raw)
                }
            }
        )*
    };
}

impl_int_key!(u32, u64, u128);

impl<const N: usize> SortKey for [u8; N] {
    const WIDTH: usize = N;

    fn encode(&self, buf: &mut [u8]) {
        buf.copy_from_slice(self);
    }

    fn decode(buf: &[u8]) -> Self {
        let mut key = [0u8; N];
        key.copy_from_slice(buf);
        key
    }
}
