//! Raw type-length-value fields as they travel through the codec.

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// One decrypted field: a type byte and its payload.
///
/// Payloads routinely contain secrets (passwords, notes), so the buffer
/// zeroizes on drop and `Debug` masks the data.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct RawField {
    /// Field type byte; meaning depends on whether this is a header or
    /// record field.
    #[zeroize(skip)]
    pub ftype: u8,
    /// Field payload, exactly as long as the stored length.
    pub data: Vec<u8>,
}

impl RawField {
    /// Build a field from a type byte and payload.
    #[must_use]
    pub fn new(ftype: u8, data: Vec<u8>) -> Self {
        Self { ftype, data }
    }
}

impl fmt::Debug for RawField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawField(0x{:02x}, {} bytes)", self.ftype, self.data.len())
    }
}
