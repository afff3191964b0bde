//! Wire codec for the SCDT overlay protocol.
//!
//! Every frame is a single UDP payload. The first bytes are an ASCII tag,
//! matched by exact-length prefix compare against the literals below; any
//! payload that matches none of them is a `DATA` frame. All multi-byte
//! integers are little-endian.

pub mod address;
pub mod message;

pub use address::Addr;
pub use message::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Fewer bytes than the shortest valid frame (4).
    Truncated,
    /// A `TRY` body claimed more addresses than the buffer can hold.
    InvalidAddressList,
    /// An address entry's length-prefix doesn't describe a known address type.
    InvalidAddress,
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
