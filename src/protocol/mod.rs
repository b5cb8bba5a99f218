//! Newline-Delimited Record Protocol
//!
//! The wire format has no framing beyond a single delimiter byte (`\n`)
//! marking the end of each record. Record content is opaque bytes.
//!
//! ## Modules
//!
//! - `assembler`: Reassembles records from arbitrary read boundaries
//!
//! ## Example
//!
//! ```
//! use linelogd::protocol::{Frame, PacketAssembler};
//!
//! let mut assembler = PacketAssembler::new();
//! assembler.extend(b"hello\nwor");
//!
//! assert_eq!(
//!     assembler.next_frame(),
//!     Some(Frame::Record(bytes::Bytes::from_static(b"hello\n")))
//! );
//! assert_eq!(assembler.next_frame(), None);
//! assert_eq!(assembler.pending(), 3);
//! ```

pub mod assembler;

// Re-export commonly used types for convenience
pub use assembler::{Frame, PacketAssembler, DELIMITER};
