use std::{borrow::Cow, fmt};

use nom::{
    bytes::streaming::{tag, take_till},
    combinator::{map, map_res, verify},
    error::{context, ContextError, ErrorKind, FromExternalError, ParseError},
    multi::length_data,
    number::streaming::{be_f64, le_i32, le_u16, le_u32, u8},
    sequence::terminated,
    IResult,
};

use crate::ops::*;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Why an operand couldn't be parsed. Running out of input is not an
/// error here: the streaming parsers report `nom::Err::Incomplete`
/// with the number of bytes still needed instead.
pub struct OperandError {
    pub reason: Cow<'static, str>,
}

impl fmt::Display for OperandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

impl<I> ParseError<I> for OperandError {
    fn from_error_kind(_input: I, kind: ErrorKind) -> Self {
        OperandError {
            reason: Cow::Owned(format!("bad operand ({})", kind.description())),
        }
    }

    fn append(_input: I, _kind: ErrorKind, other: Self) -> Self {
        other
    }
}

impl<I> ContextError<I> for OperandError {
    fn add_context(_input: I, ctx: &'static str, _other: Self) -> Self {
        OperandError {
            reason: Cow::Borrowed(ctx),
        }
    }
}

impl<I, E: fmt::Display> FromExternalError<I, E> for OperandError {
    fn from_external_error(_input: I, _kind: ErrorKind, e: E) -> Self {
        OperandError {
            reason: Cow::Owned(e.to_string()),
        }
    }
}

type OpResult<'a, O> = IResult<&'a [u8], O, OperandError>;

/// A newline terminated protocol 0 argument, newline stripped.
fn parse_line(i: &[u8]) -> OpResult<'_, &[u8]> {
    terminated(take_till(|c| c == b'\n'), tag(&b"\n"[..]))(i)
}

/// Length prefixes that Python writes as a signed 32 bit value.
fn signed_len(i: &[u8]) -> OpResult<'_, u32> {
    context(
        "negative length prefix",
        map(verify(le_i32, |n: &i32| *n >= 0), |n| n as u32),
    )(i)
}

/// Parse a single op. It's a nom streaming parser: when `i` ends before
/// the op does you get `nom::Err::Incomplete` back and can retry once
/// more bytes are available.
///
/// Opcodes we don't evaluate come back as `PickleOp::Unsupported`
/// without their operand being looked at.
pub fn parse_op(i: &[u8]) -> OpResult<'_, PickleOp<'_>> {
    let (i, opcode) = u8(i)?;
    IResult::Ok((
        i,
        match opcode {
            p_op::MARK => PickleOp::MARK,
            p_op::STOP => PickleOp::STOP,
            p_op::POP => PickleOp::POP,
            p_op::POP_MARK => PickleOp::POP_MARK,
            p_op::DUP => PickleOp::DUP,
            p_op::FLOAT => return map(parse_line, PickleOp::FLOAT)(i),
            p_op::INT => return map(parse_line, PickleOp::INT)(i),
            p_op::BININT => return map(le_i32, PickleOp::BININT)(i),
            p_op::BININT1 => return map(u8, PickleOp::BININT1)(i),
            p_op::LONG => return map(parse_line, PickleOp::LONG)(i),
            p_op::BININT2 => return map(le_u16, PickleOp::BININT2)(i),
            p_op::NONE => PickleOp::NONE,
            p_op::STRING => return map(parse_line, PickleOp::STRING)(i),
            p_op::BINSTRING => return map(length_data(signed_len), PickleOp::BINSTRING)(i),
            p_op::SHORT_BINSTRING => return map(length_data(u8), PickleOp::SHORT_BINSTRING)(i),
            p_op::UNICODE => return map(parse_line, PickleOp::UNICODE)(i),
            p_op::BINUNICODE => {
                return map(
                    context(
                        "BINUNICODE is not valid UTF-8",
                        map_res(length_data(le_u32), std::str::from_utf8),
                    ),
                    PickleOp::BINUNICODE,
                )(i)
            }
            p_op::APPEND => PickleOp::APPEND,
            p_op::DICT => PickleOp::DICT,
            p_op::EMPTY_DICT => PickleOp::EMPTY_DICT,
            p_op::APPENDS => PickleOp::APPENDS,
            p_op::GET => return map(parse_line, PickleOp::GET)(i),
            p_op::BINGET => return map(u8, PickleOp::BINGET)(i),
            p_op::LONG_BINGET => return map(le_u32, PickleOp::LONG_BINGET)(i),
            p_op::LIST => PickleOp::LIST,
            p_op::EMPTY_LIST => PickleOp::EMPTY_LIST,
            p_op::PUT => return map(parse_line, PickleOp::PUT)(i),
            p_op::BINPUT => return map(u8, PickleOp::BINPUT)(i),
            p_op::LONG_BINPUT => return map(le_u32, PickleOp::LONG_BINPUT)(i),
            p_op::SETITEM => PickleOp::SETITEM,
            p_op::TUPLE => PickleOp::TUPLE,
            p_op::EMPTY_TUPLE => PickleOp::EMPTY_TUPLE,
            p_op::SETITEMS => PickleOp::SETITEMS,
            p_op::BINFLOAT => return map(be_f64, PickleOp::BINFLOAT)(i),
            p_op::PROTO => return map(u8, PickleOp::PROTO)(i),
            p_op::TUPLE1 => PickleOp::TUPLE1,
            p_op::TUPLE2 => PickleOp::TUPLE2,
            p_op::TUPLE3 => PickleOp::TUPLE3,
            p_op::NEWTRUE => PickleOp::NEWTRUE,
            p_op::NEWFALSE => PickleOp::NEWFALSE,
            p_op::LONG1 => return map(length_data(u8), PickleOp::LONG1)(i),
            p_op::LONG4 => return map(length_data(signed_len), PickleOp::LONG4)(i),
            other => PickleOp::Unsupported(other),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nom::{Err, Needed};

    #[test]
    fn fixed_width_operands() {
        assert_eq!(parse_op(b"K\x2a"), Ok((&b""[..], PickleOp::BININT1(42))));
        assert_eq!(
            parse_op(b"J\xff\xff\xff\xff"),
            Ok((&b""[..], PickleOp::BININT(-1)))
        );
        assert_eq!(
            parse_op(b"G@\x09\x1e\xb8Q\xeb\x85\x1f"),
            Ok((&b""[..], PickleOp::BINFLOAT(3.14)))
        );
    }

    #[test]
    fn reports_exact_shortfall() {
        assert_eq!(parse_op(b"J\x01"), Err(Err::Incomplete(Needed::new(2))));
        assert_eq!(
            parse_op(b"X\x05\x00\x00\x00ab"),
            Err(Err::Incomplete(Needed::new(3)))
        );
        assert_eq!(parse_op(b"I12"), Err(Err::Incomplete(Needed::new(1))));
    }

    #[test]
    fn lines_drop_the_newline() {
        assert_eq!(
            parse_op(b"I123\nK"),
            Ok((&b"K"[..], PickleOp::INT(&b"123"[..])))
        );
    }

    #[test]
    fn negative_length_is_an_error() {
        match parse_op(b"T\xff\xff\xff\xff") {
            Err(Err::Error(e)) => assert_eq!(e.reason, "negative length prefix"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn bad_utf8_is_an_error() {
        assert!(matches!(
            parse_op(b"X\x01\x00\x00\x00\xff"),
            Err(Err::Error(_))
        ));
    }

    #[test]
    fn unsupported_ops_skip_operands() {
        assert_eq!(
            parse_op(b"cos\nsystem\n"),
            Ok((&b"os\nsystem\n"[..], PickleOp::Unsupported(b'c')))
        );
        assert_eq!(parse_op(b"\xff"), Ok((&b""[..], PickleOp::Unsupported(0xff))));
    }
}
