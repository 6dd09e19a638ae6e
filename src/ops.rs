use std::borrow::Borrow;

use once_cell::sync::Lazy;

/// Raw opcode bytes.
pub mod p_op {
    // Protocol 0
    pub const MARK: u8 = b'(';
    pub const STOP: u8 = b'.';
    pub const POP: u8 = b'0';
    pub const POP_MARK: u8 = b'1';
    pub const DUP: u8 = b'2';
    pub const FLOAT: u8 = b'F';
    pub const INT: u8 = b'I';
    pub const BININT: u8 = b'J';
    pub const BININT1: u8 = b'K';
    pub const LONG: u8 = b'L';
    pub const BININT2: u8 = b'M';
    pub const NONE: u8 = b'N';
    pub const PERSID: u8 = b'P';
    pub const BINPERSID: u8 = b'Q';
    pub const REDUCE: u8 = b'R';
    pub const STRING: u8 = b'S';
    pub const BINSTRING: u8 = b'T';
    pub const SHORT_BINSTRING: u8 = b'U';
    pub const UNICODE: u8 = b'V';
    pub const BINUNICODE: u8 = b'X';
    pub const APPEND: u8 = b'a';
    pub const BUILD: u8 = b'b';
    pub const GLOBAL: u8 = b'c';
    pub const DICT: u8 = b'd';
    pub const EMPTY_DICT: u8 = b'}';
    pub const APPENDS: u8 = b'e';
    pub const GET: u8 = b'g';
    pub const BINGET: u8 = b'h';
    pub const INST: u8 = b'i';
    pub const LONG_BINGET: u8 = b'j';
    pub const LIST: u8 = b'l';
    pub const EMPTY_LIST: u8 = b']';
    pub const OBJ: u8 = b'o';
    pub const PUT: u8 = b'p';
    pub const BINPUT: u8 = b'q';
    pub const LONG_BINPUT: u8 = b'r';
    pub const SETITEM: u8 = b's';
    pub const TUPLE: u8 = b't';
    pub const EMPTY_TUPLE: u8 = b')';
    pub const SETITEMS: u8 = b'u';
    pub const BINFLOAT: u8 = b'G';

    // Protocol 2
    pub const PROTO: u8 = 0x80;
    pub const NEWOBJ: u8 = 0x81;
    pub const EXT1: u8 = 0x82;
    pub const EXT2: u8 = 0x83;
    pub const EXT4: u8 = 0x84;
    pub const TUPLE1: u8 = 0x85;
    pub const TUPLE2: u8 = 0x86;
    pub const TUPLE3: u8 = 0x87;
    pub const NEWTRUE: u8 = 0x88;
    pub const NEWFALSE: u8 = 0x89;
    pub const LONG1: u8 = 0x8a;
    pub const LONG4: u8 = 0x8b;

    // Protocol 3
    pub const BINBYTES: u8 = b'B';
    pub const SHORT_BINBYTES: u8 = b'C';

    // Protocol 4
    pub const SHORT_BINUNICODE: u8 = 0x8c;
    pub const BINUNICODE8: u8 = 0x8d;
    pub const BINBYTES8: u8 = 0x8e;
    pub const EMPTY_SET: u8 = 0x8f;
    pub const ADDITEMS: u8 = 0x90;
    pub const FROZENSET: u8 = 0x91;
    pub const NEWOBJ_EX: u8 = 0x92;
    pub const STACK_GLOBAL: u8 = 0x93;
    pub const MEMOIZE: u8 = 0x94;
    pub const FRAME: u8 = 0x95;

    // Protocol 5
    pub const BYTEARRAY8: u8 = 0x96;
    pub const NEXT_BUFFER: u8 = 0x97;
    pub const READONLY_BUFFER: u8 = 0x98;
}

/// Highest pickle protocol this crate evaluates.
pub const MAX_PROTOCOL: u8 = 2;

/// Opcodes whose operand is a newline terminated protocol 0 line.
pub fn takes_line(code: u8) -> bool {
    matches!(
        code,
        p_op::FLOAT
            | p_op::INT
            | p_op::LONG
            | p_op::STRING
            | p_op::UNICODE
            | p_op::GET
            | p_op::PUT
    )
}

#[allow(non_camel_case_types, clippy::upper_case_acronyms)]
#[derive(Debug, Clone, PartialEq)]
/// A single pickle operation with its operand, borrowed from the
/// reader's buffer.
///
/// Line-oriented protocol 0 operands are kept as the raw line (without
/// the trailing newline). Turning them into numbers or text happens
/// during evaluation.
pub enum PickleOp<'a> {
    MARK,
    STOP,
    POP,
    POP_MARK,
    DUP,
    FLOAT(&'a [u8]),
    INT(&'a [u8]),
    BININT(i32),
    BININT1(u8),
    LONG(&'a [u8]),
    BININT2(u16),
    NONE,
    STRING(&'a [u8]),
    BINSTRING(&'a [u8]),
    SHORT_BINSTRING(&'a [u8]),
    UNICODE(&'a [u8]),
    BINUNICODE(&'a str),
    APPEND,
    DICT,
    EMPTY_DICT,
    APPENDS,
    GET(&'a [u8]),
    BINGET(u8),
    LONG_BINGET(u32),
    LIST,
    EMPTY_LIST,
    PUT(&'a [u8]),
    BINPUT(u8),
    LONG_BINPUT(u32),
    SETITEM,
    TUPLE,
    EMPTY_TUPLE,
    SETITEMS,
    BINFLOAT(f64),
    PROTO(u8),
    TUPLE1,
    TUPLE2,
    TUPLE3,
    NEWTRUE,
    NEWFALSE,
    LONG1(&'a [u8]),
    LONG4(&'a [u8]),
    /// An opcode we recognize but refuse to evaluate (object
    /// reconstruction, protocol 3+), or a byte that isn't an opcode
    /// at all. The operand, if any, is never read.
    Unsupported(u8),
}

impl PickleOp<'_> {
    /// The opcode byte this operation was read from.
    pub fn code(&self) -> u8 {
        use PickleOp::*;
        match self {
            MARK => p_op::MARK,
            STOP => p_op::STOP,
            POP => p_op::POP,
            POP_MARK => p_op::POP_MARK,
            DUP => p_op::DUP,
            FLOAT(_) => p_op::FLOAT,
            INT(_) => p_op::INT,
            BININT(_) => p_op::BININT,
            BININT1(_) => p_op::BININT1,
            LONG(_) => p_op::LONG,
            BININT2(_) => p_op::BININT2,
            NONE => p_op::NONE,
            STRING(_) => p_op::STRING,
            BINSTRING(_) => p_op::BINSTRING,
            SHORT_BINSTRING(_) => p_op::SHORT_BINSTRING,
            UNICODE(_) => p_op::UNICODE,
            BINUNICODE(_) => p_op::BINUNICODE,
            APPEND => p_op::APPEND,
            DICT => p_op::DICT,
            EMPTY_DICT => p_op::EMPTY_DICT,
            APPENDS => p_op::APPENDS,
            GET(_) => p_op::GET,
            BINGET(_) => p_op::BINGET,
            LONG_BINGET(_) => p_op::LONG_BINGET,
            LIST => p_op::LIST,
            EMPTY_LIST => p_op::EMPTY_LIST,
            PUT(_) => p_op::PUT,
            BINPUT(_) => p_op::BINPUT,
            LONG_BINPUT(_) => p_op::LONG_BINPUT,
            SETITEM => p_op::SETITEM,
            TUPLE => p_op::TUPLE,
            EMPTY_TUPLE => p_op::EMPTY_TUPLE,
            SETITEMS => p_op::SETITEMS,
            BINFLOAT(_) => p_op::BINFLOAT,
            PROTO(_) => p_op::PROTO,
            TUPLE1 => p_op::TUPLE1,
            TUPLE2 => p_op::TUPLE2,
            TUPLE3 => p_op::TUPLE3,
            NEWTRUE => p_op::NEWTRUE,
            NEWFALSE => p_op::NEWFALSE,
            LONG1(_) => p_op::LONG1,
            LONG4(_) => p_op::LONG4,
            Unsupported(code) => *code,
        }
    }
}

const OPCODE_NAMES: &[(u8, &str)] = &[
    (p_op::MARK, "MARK"),
    (p_op::STOP, "STOP"),
    (p_op::POP, "POP"),
    (p_op::POP_MARK, "POP_MARK"),
    (p_op::DUP, "DUP"),
    (p_op::FLOAT, "FLOAT"),
    (p_op::INT, "INT"),
    (p_op::BININT, "BININT"),
    (p_op::BININT1, "BININT1"),
    (p_op::LONG, "LONG"),
    (p_op::BININT2, "BININT2"),
    (p_op::NONE, "NONE"),
    (p_op::PERSID, "PERSID"),
    (p_op::BINPERSID, "BINPERSID"),
    (p_op::REDUCE, "REDUCE"),
    (p_op::STRING, "STRING"),
    (p_op::BINSTRING, "BINSTRING"),
    (p_op::SHORT_BINSTRING, "SHORT_BINSTRING"),
    (p_op::UNICODE, "UNICODE"),
    (p_op::BINUNICODE, "BINUNICODE"),
    (p_op::APPEND, "APPEND"),
    (p_op::BUILD, "BUILD"),
    (p_op::GLOBAL, "GLOBAL"),
    (p_op::DICT, "DICT"),
    (p_op::EMPTY_DICT, "EMPTY_DICT"),
    (p_op::APPENDS, "APPENDS"),
    (p_op::GET, "GET"),
    (p_op::BINGET, "BINGET"),
    (p_op::INST, "INST"),
    (p_op::LONG_BINGET, "LONG_BINGET"),
    (p_op::LIST, "LIST"),
    (p_op::EMPTY_LIST, "EMPTY_LIST"),
    (p_op::OBJ, "OBJ"),
    (p_op::PUT, "PUT"),
    (p_op::BINPUT, "BINPUT"),
    (p_op::LONG_BINPUT, "LONG_BINPUT"),
    (p_op::SETITEM, "SETITEM"),
    (p_op::TUPLE, "TUPLE"),
    (p_op::EMPTY_TUPLE, "EMPTY_TUPLE"),
    (p_op::SETITEMS, "SETITEMS"),
    (p_op::BINFLOAT, "BINFLOAT"),
    (p_op::PROTO, "PROTO"),
    (p_op::NEWOBJ, "NEWOBJ"),
    (p_op::EXT1, "EXT1"),
    (p_op::EXT2, "EXT2"),
    (p_op::EXT4, "EXT4"),
    (p_op::TUPLE1, "TUPLE1"),
    (p_op::TUPLE2, "TUPLE2"),
    (p_op::TUPLE3, "TUPLE3"),
    (p_op::NEWTRUE, "NEWTRUE"),
    (p_op::NEWFALSE, "NEWFALSE"),
    (p_op::LONG1, "LONG1"),
    (p_op::LONG4, "LONG4"),
    (p_op::BINBYTES, "BINBYTES"),
    (p_op::SHORT_BINBYTES, "SHORT_BINBYTES"),
    (p_op::SHORT_BINUNICODE, "SHORT_BINUNICODE"),
    (p_op::BINUNICODE8, "BINUNICODE8"),
    (p_op::BINBYTES8, "BINBYTES8"),
    (p_op::EMPTY_SET, "EMPTY_SET"),
    (p_op::ADDITEMS, "ADDITEMS"),
    (p_op::FROZENSET, "FROZENSET"),
    (p_op::NEWOBJ_EX, "NEWOBJ_EX"),
    (p_op::STACK_GLOBAL, "STACK_GLOBAL"),
    (p_op::MEMOIZE, "MEMOIZE"),
    (p_op::FRAME, "FRAME"),
    (p_op::BYTEARRAY8, "BYTEARRAY8"),
    (p_op::NEXT_BUFFER, "NEXT_BUFFER"),
    (p_op::READONLY_BUFFER, "READONLY_BUFFER"),
];

static NAME_TABLE: Lazy<[Option<&'static str>; 256]> = Lazy::new(|| {
    let mut table = [None; 256];
    for &(code, name) in OPCODE_NAMES {
        table[code as usize] = Some(name);
    }
    table
});

/// The pickletools mnemonic for an opcode byte, if it is one at all.
pub fn opcode_name(code: u8) -> Option<&'static str> {
    NAME_TABLE[code as usize]
}

/// Formats an opcode byte for humans: `BINPUT (0x71)` or just `0xff`.
pub fn describe_opcode(code: impl Borrow<u8>) -> String {
    let code = *code.borrow();
    match opcode_name(code) {
        Some(name) => format!("{name} (0x{code:02x})"),
        None => format!("0x{code:02x}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_cover_protocol_zero_to_five() {
        assert_eq!(opcode_name(b'('), Some("MARK"));
        assert_eq!(opcode_name(0x8b), Some("LONG4"));
        assert_eq!(opcode_name(0x98), Some("READONLY_BUFFER"));
        assert_eq!(opcode_name(0xff), None);
        assert_eq!(opcode_name(b'z'), None);
    }

    #[test]
    fn describe_includes_hex() {
        assert_eq!(describe_opcode(p_op::REDUCE), "REDUCE (0x52)");
        assert_eq!(describe_opcode(0xfe), "0xfe");
    }

    #[test]
    fn code_round_trips_through_variant() {
        assert_eq!(PickleOp::LONG_BINPUT(7).code(), b'r');
        assert_eq!(PickleOp::Unsupported(0x93).code(), 0x93);
    }

    #[test]
    fn line_opcodes() {
        assert!(takes_line(p_op::STRING));
        assert!(takes_line(p_op::GET));
        assert!(!takes_line(p_op::BINSTRING));
        // GLOBAL has line operands too, but it's never evaluated.
        assert!(!takes_line(p_op::GLOBAL));
    }
}
