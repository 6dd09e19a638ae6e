//! Decode Python pickles (protocols 0 through 2) and unpack them into
//! ordinary Rust types.
//!
//! Decoding runs the pickle virtual machine over a byte stream and gives
//! you a [`Pickle`]: the top level [`Value`] plus every list, tuple and
//! dict it refers to. Values that went through the memo share their
//! containers, so cyclic pickles decode fine.
//!
//! Opcodes that reconstruct arbitrary Python objects (`GLOBAL`, `REDUCE`,
//! `BUILD` and friends) are rejected rather than guessed at.
//!
//! ```rust
//! use sour_pickle::{from_slice, unpack_struct};
//!
//! #[derive(Debug, Default, PartialEq)]
//! struct Abc {
//!     a: i64,
//!     b: i64,
//!     c: i64,
//! }
//!
//! unpack_struct!(Abc { a, b, c });
//!
//! // pickle.dumps({"a": 1, "c": 3, "b": 2}, protocol=2)
//! let bytes = b"\x80\x02}q\x00(X\x01\x00\x00\x00aq\x01K\x01X\x01\x00\x00\x00cq\x02K\x03X\x01\x00\x00\x00bq\x03K\x02u.";
//! let abc: Abc = from_slice(bytes)?;
//! assert_eq!(abc, Abc { a: 1, b: 2, c: 3 });
//! # Ok::<(), sour_pickle::Error>(())
//! ```
//!
//! When you don't know the shape ahead of time, unpack into an
//! [`Object`], or walk the [`Value`]s yourself with [`Pickle::items`] and
//! [`Pickle::entries`].

/// Destination descriptors.
pub mod descriptor;

/// Error types for decoding and unpacking.
pub mod error;

/// Decoding of protocol 0 text operands.
pub mod escape;

/// The pickle stack machine.
pub mod eval;

/// A catch-all destination type.
pub mod object;

/// Pickle operations.
pub mod ops;

/// Streaming parsers for converting bytes into Pickle operations.
pub mod parsers;

/// Reading operations from a byte stream.
pub mod reader;

/// Unpacking decoded values into Rust types.
pub mod unpack;

/// The Value type you get from decoding a pickle.
pub mod value;

use std::io::Read;

pub use crate::descriptor::{Descriptor, Scalar};
pub use crate::error::{Error, ParseError, PathSegment, UnpackError};
pub use crate::eval::{decode, decode_with, DecodeOptions};
pub use crate::object::Object;
pub use crate::reader::OpReader;
pub use crate::unpack::{
    unpack_into, unpack_struct, Unpack, UnpackOptions, UnpackStruct, Unpacker,
};
pub use crate::value::{Dict, DictId, Key, Pickle, SeqId, Value, ValueKind};

/// Decode one pickle from `reader` and unpack it into a fresh `T`.
pub fn from_reader<T: Unpack + Default, R: Read>(reader: R) -> Result<T, Error> {
    let mut dest = T::default();
    from_reader_into(&mut dest, reader)?;
    Ok(dest)
}

/// Decode one pickle from `reader` and unpack it into `dest`.
pub fn from_reader_into<T: Unpack, R: Read>(dest: &mut T, reader: R) -> Result<(), Error> {
    let pickle = decode(reader)?;
    pickle.unpack_into(dest)?;
    Ok(())
}

/// Decode a pickle held in memory and unpack it into a fresh `T`.
pub fn from_slice<T: Unpack + Default>(bytes: &[u8]) -> Result<T, Error> {
    from_reader(bytes)
}
