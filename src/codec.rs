//! XDR encoding and decoding of DAP2 data responses.
//!
//! A `.dods` response is the DDS text, the [DATA_MARKER] and the XDR payload of every
//! projected variable in DDS order.

pub mod decode;
pub mod encode;
pub mod stream;

pub use decode::{decode, decode_dods, RecordStream};
pub use encode::{dods_response, encode};
pub use stream::{ChunkIter, StreamReader};

/// Marker preceding each record of a sequence.
pub const START_OF_SEQUENCE: [u8; 4] = [0x5a, 0x00, 0x00, 0x00];

/// Marker following the last record of a sequence.
pub const END_OF_SEQUENCE: [u8; 4] = [0xa5, 0x00, 0x00, 0x00];

/// Separator between the DDS text and the XDR payload.
///
/// The DDS ends with a newline, so the separator written after it is `Data:\n`.
pub const DATA_MARKER: &[u8] = b"\nData:\n";

/// Number of zero bytes padding `len` bytes to a multiple of four.
pub(crate) fn padding(len: usize) -> usize {
    (4 - len % 4) % 4
}
