use std::io::Read;

use nom::Needed;

use crate::{error::ParseError, ops::*, parsers::parse_op};

/// Default cap on a single operand (length prefixed data or a protocol 0
/// line).
pub const DEFAULT_MAX_OPERAND_LEN: u64 = 256 * 1024 * 1024;

/// Pulls one op at a time out of a byte stream.
///
/// Bytes are read only as the streaming parser asks for them, so the
/// reader never consumes anything past the op it returns. The stream is
/// never rewound or retried.
pub struct OpReader<R> {
    inner: R,
    buf: Vec<u8>,
    offset: u64,
    max_operand_len: u64,
}

impl<R: Read> OpReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(64),
            offset: 0,
            max_operand_len: DEFAULT_MAX_OPERAND_LEN,
        }
    }

    pub fn with_max_operand_len(mut self, max_operand_len: u64) -> Self {
        self.max_operand_len = max_operand_len;
        self
    }

    /// Bytes consumed from the stream so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read the next op. You get the byte offset it started at along with
    /// it, or `None` if the stream ended cleanly between ops.
    pub fn next_op(&mut self) -> Result<Option<(u64, PickleOp<'_>)>, ParseError> {
        let start = self.offset;
        self.buf.clear();
        self.fill(1, start)?;
        let Some(&opcode) = self.buf.first() else {
            return Ok(None);
        };
        if takes_line(opcode) {
            self.read_line(opcode, start)?;
        }

        loop {
            let needed = match parse_op(&self.buf) {
                Ok(_) => break,
                Err(nom::Err::Incomplete(Needed::Size(n))) => n.get(),
                Err(nom::Err::Incomplete(Needed::Unknown)) => 1,
                Err(nom::Err::Error(e) | nom::Err::Failure(e)) => {
                    return Err(ParseError::malformed(
                        start,
                        format!("{}: {e}", describe_opcode(opcode)),
                    ))
                }
            };
            let have = self.buf.len() as u64 - 1;
            if have.saturating_add(needed as u64) > self.max_operand_len {
                return Err(self.too_long(opcode, start));
            }
            if self.fill(needed, start)? < needed {
                return Err(ParseError::TruncatedOperand {
                    offset: start,
                    opcode,
                });
            }
        }

        match parse_op(&self.buf) {
            Ok((_, op)) => Ok(Some((start, op))),
            Err(_) => Err(ParseError::malformed(
                start,
                "operand failed to parse after it was complete",
            )),
        }
    }

    /// Read a protocol 0 line through its newline. Only the newest byte
    /// is looked at each step, so the parser sees the line once, complete.
    fn read_line(&mut self, opcode: u8, start: u64) -> Result<(), ParseError> {
        loop {
            if self.buf.len() as u64 - 1 >= self.max_operand_len {
                return Err(self.too_long(opcode, start));
            }
            if self.fill(1, start)? == 0 {
                return Err(ParseError::TruncatedOperand {
                    offset: start,
                    opcode,
                });
            }
            if self.buf.last() == Some(&b'\n') {
                return Ok(());
            }
        }
    }

    fn too_long(&self, opcode: u8, start: u64) -> ParseError {
        ParseError::malformed(
            start,
            format!(
                "{} operand exceeds the {} byte limit",
                describe_opcode(opcode),
                self.max_operand_len
            ),
        )
    }

    /// Append up to `n` bytes to the buffer, returning how many arrived.
    fn fill(&mut self, n: usize, start: u64) -> Result<usize, ParseError> {
        let got = (&mut self.inner)
            .take(n as u64)
            .read_to_end(&mut self.buf)
            .map_err(|source| ParseError::Io {
                offset: start,
                source,
            })?;
        self.offset += got as u64;
        Ok(got)
    }
}
