use crate::{error::ParseError, escape::*, ops::*, reader::*, value::*};

use std::{borrow::Cow, collections::BTreeMap, io::Read};

use log::{debug, trace};
use num_bigint::BigInt;

/// Default cap on distinct memo ids in one pickle.
pub const DEFAULT_MAX_MEMO_ENTRIES: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Limits applied while decoding. Exceeding one is a `MalformedStream`.
pub struct DecodeOptions {
    /// Longest length prefixed operand or protocol 0 line accepted.
    pub max_operand_len: u64,
    /// Most distinct memo ids a pickle may store.
    pub max_memo_entries: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            max_operand_len: DEFAULT_MAX_OPERAND_LEN,
            max_memo_entries: DEFAULT_MAX_MEMO_ENTRIES,
        }
    }
}

impl DecodeOptions {
    pub fn with_max_operand_len(mut self, max_operand_len: u64) -> Self {
        self.max_operand_len = max_operand_len;
        self
    }

    pub fn with_max_memo_entries(mut self, max_memo_entries: usize) -> Self {
        self.max_memo_entries = max_memo_entries;
        self
    }
}

/// An evaluation failure before we know where it happened.
#[derive(Debug)]
enum Fault {
    Underflow,
    NoMark,
    UnknownMemo(u32),
    Unsupported,
    Protocol(u8),
    Malformed(Cow<'static, str>),
}

impl Fault {
    fn malformed(reason: impl Into<Cow<'static, str>>) -> Self {
        Fault::Malformed(reason.into())
    }

    fn at(self, offset: u64, opcode: u8) -> ParseError {
        match self {
            Fault::Underflow => ParseError::StackUnderflow { offset, opcode },
            Fault::NoMark => ParseError::malformed(
                offset,
                format!("{} without a MARK", describe_opcode(opcode)),
            ),
            Fault::UnknownMemo(id) => ParseError::UnknownMemoReference { offset, id },
            Fault::Unsupported => ParseError::UnsupportedOpcode { offset, opcode },
            Fault::Protocol(version) => ParseError::UnsupportedProtocol { offset, version },
            Fault::Malformed(reason) => ParseError::MalformedStream { offset, reason },
        }
    }
}

type EvalResult<T> = Result<T, Fault>;

#[derive(Debug, Clone, PartialEq, Default)]
/// Basically just a Vec with some convenience functions. Marks are kept
/// off to the side as stack depths, and nothing can be popped from
/// below the most recent one.
struct PickleStack {
    items: Vec<Value>,
    marks: Vec<usize>,
}

impl PickleStack {
    fn floor(&self) -> usize {
        self.marks.last().copied().unwrap_or(0)
    }

    fn push(&mut self, val: Value) {
        self.items.push(val);
    }

    fn pop(&mut self) -> EvalResult<Value> {
        if self.items.len() <= self.floor() {
            return Err(Fault::Underflow);
        }
        self.items.pop().ok_or(Fault::Underflow)
    }

    /// Pop exactly `n` values, oldest first.
    fn pop_n(&mut self, n: usize) -> EvalResult<Vec<Value>> {
        let avail = self.items.len() - self.floor();
        if avail < n {
            return Err(Fault::Underflow);
        }
        Ok(self.items.split_off(self.items.len() - n))
    }

    fn top(&self) -> EvalResult<&Value> {
        if self.items.len() <= self.floor() {
            return Err(Fault::Underflow);
        }
        self.items.last().ok_or(Fault::Underflow)
    }

    fn mark(&mut self) {
        self.marks.push(self.items.len());
    }

    /// Everything pushed since the last mark, dropping the mark.
    fn pop_mark(&mut self) -> EvalResult<Vec<Value>> {
        let markidx = self.marks.pop().ok_or(Fault::NoMark)?;
        Ok(self.items.split_off(markidx))
    }

    /// `POP` on an empty frame discards the mark instead.
    fn pop_or_unmark(&mut self) -> EvalResult<()> {
        if self.items.len() > self.floor() {
            self.items.pop();
        } else if self.marks.pop().is_none() {
            return Err(Fault::Underflow);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
/// Basically just a BTreeMap with some convenience functions.
struct PickleMemo(BTreeMap<u32, Value>);

impl PickleMemo {
    fn get(&self, mid: u32) -> EvalResult<Value> {
        self.0.get(&mid).cloned().ok_or(Fault::UnknownMemo(mid))
    }

    fn insert(&mut self, mid: u32, val: Value, limit: usize) -> EvalResult<()> {
        if self.0.len() >= limit && !self.0.contains_key(&mid) {
            return Err(Fault::malformed(format!(
                "memo grew past {limit} entries"
            )));
        }
        self.0.insert(mid, val);
        Ok(())
    }
}

/// The pickle virtual machine, scoped to one decode.
struct Machine {
    stack: PickleStack,
    memo: PickleMemo,
    seqs: Vec<Vec<Value>>,
    dicts: Vec<Dict>,
    max_memo_entries: usize,
}

fn line_str<'a>(line: &'a [u8], what: &str) -> EvalResult<&'a str> {
    std::str::from_utf8(line)
        .map(str::trim)
        .map_err(|_| Fault::malformed(format!("{what} argument is not ASCII")))
}

fn parse_int_line(line: &[u8]) -> EvalResult<Value> {
    let s = line_str(line, "INT")?;
    // Python 2 wrote booleans this way before NEWTRUE/NEWFALSE existed.
    match s {
        "00" => return Ok(Value::Bool(false)),
        "01" => return Ok(Value::Bool(true)),
        _ => (),
    }
    if let Ok(n) = s.parse::<i64>() {
        return Ok(Value::Int(n));
    }
    s.parse::<BigInt>()
        .map(int_value)
        .map_err(|e| Fault::malformed(format!("INT argument {s:?}: {e}")))
}

fn parse_long_line(line: &[u8]) -> EvalResult<Value> {
    let s = line_str(line, "LONG")?;
    let digits = s.strip_suffix('L').unwrap_or(s);
    digits
        .parse::<BigInt>()
        .map(int_value)
        .map_err(|e| Fault::malformed(format!("LONG argument {s:?}: {e}")))
}

fn parse_float_line(line: &[u8]) -> EvalResult<f64> {
    let s = line_str(line, "FLOAT")?;
    s.parse()
        .map_err(|e| Fault::malformed(format!("FLOAT argument {s:?}: {e}")))
}

fn parse_memo_id(line: &[u8]) -> EvalResult<u32> {
    let s = line_str(line, "memo id")?;
    s.parse()
        .map_err(|_| Fault::malformed(format!("bad memo id {s:?}")))
}

impl Machine {
    fn new(options: &DecodeOptions) -> Self {
        Self {
            stack: PickleStack::default(),
            memo: PickleMemo::default(),
            seqs: vec![],
            dicts: vec![],
            max_memo_entries: options.max_memo_entries,
        }
    }

    fn new_seq(&mut self, items: Vec<Value>) -> SeqId {
        self.seqs.push(items);
        SeqId(self.seqs.len() - 1)
    }

    fn new_dict(&mut self) -> DictId {
        self.dicts.push(Dict::new());
        DictId(self.dicts.len() - 1)
    }

    /// The list on top of the stack, for appending to.
    fn top_list(&mut self, opname: &str) -> EvalResult<&mut Vec<Value>> {
        let id = match self.stack.top()? {
            Value::List(id) => *id,
            other => {
                return Err(Fault::malformed(format!(
                    "{opname} target is a {}, not a list",
                    other.kind()
                )))
            }
        };
        self.seqs
            .get_mut(id.0)
            .ok_or_else(|| Fault::malformed("dangling list handle"))
    }

    /// The dict on top of the stack, for setting items on.
    fn top_dict(&self, opname: &str) -> EvalResult<DictId> {
        match self.stack.top()? {
            Value::Dict(id) => Ok(*id),
            other => Err(Fault::malformed(format!(
                "{opname} target is a {}, not a dict",
                other.kind()
            ))),
        }
    }

    fn set_item(&mut self, id: DictId, k: Value, v: Value) -> EvalResult<()> {
        let key = Key::try_from(k)
            .map_err(|kind| Fault::malformed(format!("unhashable dict key of type {kind}")))?;
        let dict = self
            .dicts
            .get_mut(id.0)
            .ok_or_else(|| Fault::malformed("dangling dict handle"))?;
        dict.insert(key, v);
        Ok(())
    }

    /// Insert a flat `[k, v, k, v, ...]` run.
    fn set_items(&mut self, id: DictId, items: Vec<Value>) -> EvalResult<()> {
        if items.len() % 2 != 0 {
            return Err(Fault::malformed(format!(
                "odd number of items ({}) for a dict",
                items.len()
            )));
        }
        let mut it = items.into_iter();
        while let (Some(k), Some(v)) = (it.next(), it.next()) {
            self.set_item(id, k, v)?;
        }
        Ok(())
    }

    fn memoize(&mut self, mid: u32) -> EvalResult<()> {
        let top = self.stack.top()?.clone();
        self.memo.insert(mid, top, self.max_memo_entries)
    }

    fn push_memo(&mut self, mid: u32) -> EvalResult<()> {
        let val = self.memo.get(mid)?;
        self.stack.push(val);
        Ok(())
    }

    fn stop(&mut self) -> EvalResult<Value> {
        if !self.stack.marks.is_empty() {
            return Err(Fault::malformed(format!(
                "STOP with {} unclosed MARK(s)",
                self.stack.marks.len()
            )));
        }
        match self.stack.items.len() {
            1 => self.stack.pop(),
            n => Err(Fault::malformed(format!(
                "STOP with {n} values on the stack"
            ))),
        }
    }

    /// Evaluate one op. Returns the result once `STOP` is reached.
    fn eval(&mut self, op: &PickleOp<'_>) -> EvalResult<Option<Value>> {
        let val = match op {
            PickleOp::STOP => return self.stop().map(Some),
            PickleOp::MARK => {
                self.stack.mark();
                return Ok(None);
            }
            PickleOp::POP => {
                self.stack.pop_or_unmark()?;
                return Ok(None);
            }
            PickleOp::POP_MARK => {
                let _ = self.stack.pop_mark()?;
                return Ok(None);
            }
            PickleOp::DUP => self.stack.top()?.clone(),
            PickleOp::PROTO(version) => {
                if *version > MAX_PROTOCOL {
                    return Err(Fault::Protocol(*version));
                }
                return Ok(None);
            }

            PickleOp::NONE => Value::None,
            PickleOp::NEWTRUE => Value::Bool(true),
            PickleOp::NEWFALSE => Value::Bool(false),
            PickleOp::INT(line) => parse_int_line(line)?,
            PickleOp::BININT(n) => Value::Int(i64::from(*n)),
            PickleOp::BININT1(n) => Value::Int(i64::from(*n)),
            PickleOp::BININT2(n) => Value::Int(i64::from(*n)),
            PickleOp::LONG(line) => parse_long_line(line)?,
            PickleOp::LONG1(b) | PickleOp::LONG4(b) => {
                int_value(BigInt::from_signed_bytes_le(b))
            }
            PickleOp::FLOAT(line) => Value::Float(parse_float_line(line)?),
            PickleOp::BINFLOAT(f) => Value::Float(*f),
            PickleOp::STRING(line) => Value::Bytes(unquote_string(line).map_err(Fault::malformed)?),
            PickleOp::BINSTRING(b) | PickleOp::SHORT_BINSTRING(b) => Value::Bytes(b.to_vec()),
            PickleOp::UNICODE(line) => {
                Value::String(raw_unicode_unescape(line).map_err(Fault::malformed)?)
            }
            PickleOp::BINUNICODE(s) => Value::String((*s).to_owned()),

            PickleOp::EMPTY_LIST => Value::List(self.new_seq(vec![])),
            PickleOp::EMPTY_TUPLE => Value::Tuple(self.new_seq(vec![])),
            PickleOp::EMPTY_DICT => Value::Dict(self.new_dict()),
            PickleOp::LIST => {
                let items = self.stack.pop_mark()?;
                Value::List(self.new_seq(items))
            }
            PickleOp::TUPLE => {
                let items = self.stack.pop_mark()?;
                Value::Tuple(self.new_seq(items))
            }
            PickleOp::TUPLE1 | PickleOp::TUPLE2 | PickleOp::TUPLE3 => {
                let n = match op {
                    PickleOp::TUPLE1 => 1,
                    PickleOp::TUPLE2 => 2,
                    _ => 3,
                };
                let items = self.stack.pop_n(n)?;
                Value::Tuple(self.new_seq(items))
            }
            PickleOp::DICT => {
                let items = self.stack.pop_mark()?;
                let id = self.new_dict();
                self.set_items(id, items)?;
                Value::Dict(id)
            }

            PickleOp::APPEND => {
                let v = self.stack.pop()?;
                self.top_list("APPEND")?.push(v);
                return Ok(None);
            }
            PickleOp::APPENDS => {
                let postmark = self.stack.pop_mark()?;
                self.top_list("APPENDS")?.extend(postmark);
                return Ok(None);
            }
            PickleOp::SETITEM => {
                let v = self.stack.pop()?;
                let k = self.stack.pop()?;
                let id = self.top_dict("SETITEM")?;
                self.set_item(id, k, v)?;
                return Ok(None);
            }
            PickleOp::SETITEMS => {
                let items = self.stack.pop_mark()?;
                let id = self.top_dict("SETITEMS")?;
                self.set_items(id, items)?;
                return Ok(None);
            }

            PickleOp::PUT(line) => {
                self.memoize(parse_memo_id(line)?)?;
                return Ok(None);
            }
            PickleOp::BINPUT(mid) => {
                self.memoize(u32::from(*mid))?;
                return Ok(None);
            }
            PickleOp::LONG_BINPUT(mid) => {
                self.memoize(*mid)?;
                return Ok(None);
            }
            PickleOp::GET(line) => {
                self.push_memo(parse_memo_id(line)?)?;
                return Ok(None);
            }
            PickleOp::BINGET(mid) => {
                self.push_memo(u32::from(*mid))?;
                return Ok(None);
            }
            PickleOp::LONG_BINGET(mid) => {
                self.push_memo(*mid)?;
                return Ok(None);
            }

            PickleOp::Unsupported(_) => return Err(Fault::Unsupported),
        };
        self.stack.push(val);
        Ok(None)
    }

    fn finish(self, root: Value) -> Pickle {
        Pickle {
            root,
            seqs: self.seqs,
            dicts: self.dicts,
        }
    }
}

/// Decode one pickle from `reader`, stopping right after its `STOP`.
pub fn decode<R: Read>(reader: R) -> Result<Pickle, ParseError> {
    decode_with(reader, &DecodeOptions::default())
}

/// Like [`decode`] with explicit limits.
pub fn decode_with<R: Read>(reader: R, options: &DecodeOptions) -> Result<Pickle, ParseError> {
    let mut rdr = OpReader::new(reader).with_max_operand_len(options.max_operand_len);
    let mut machine = Machine::new(options);

    let result = loop {
        let end = rdr.offset();
        let (offset, op) = match rdr.next_op() {
            Ok(Some(next)) => next,
            Ok(None) => break Err(ParseError::IncompleteStream { offset: end }),
            Err(err) => break Err(err),
        };
        trace!("{offset:>8}: {op:?}");
        match machine.eval(&op) {
            Ok(None) => (),
            Ok(Some(root)) => {
                debug!(
                    "decoded pickle: {} bytes, {} sequences, {} dicts, {} memo entries",
                    rdr.offset(),
                    machine.seqs.len(),
                    machine.dicts.len(),
                    machine.memo.0.len()
                );
                break Ok(machine.finish(root));
            }
            Err(fault) => break Err(fault.at(offset, op.code())),
        }
    };
    if let Err(err) = &result {
        debug!("pickle decode failed: {err}");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(bytes: &[u8]) -> Result<Pickle, ParseError> {
        decode(bytes)
    }

    #[test]
    fn tuple_opcodes_keep_order() {
        let p = dec(b"\x80\x02K\x01K\x02K\x03\x87.").unwrap();
        assert_eq!(
            p.items(p.root()).unwrap(),
            &[Value::Int(1), Value::Int(2), Value::Int(3)]
        );
        let p = dec(b"K\x01K\x02\x86.").unwrap();
        assert_eq!(p.items(p.root()).unwrap(), &[Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn pops_never_cross_a_mark() {
        // TUPLE2 with only one value above the mark.
        assert!(matches!(
            dec(b"K\x01(K\x02\x86."),
            Err(ParseError::StackUnderflow { offset: 5, opcode: 0x86 })
        ));
        // APPEND whose list sits below the mark.
        assert!(matches!(
            dec(b"](a."),
            Err(ParseError::StackUnderflow { offset: 2, .. })
        ));
    }

    #[test]
    fn pop_on_empty_frame_drops_the_mark() {
        let p = dec(b"K\x07(0.").unwrap();
        assert_eq!(p.root(), &Value::Int(7));
        assert!(matches!(dec(b"0"), Err(ParseError::StackUnderflow { offset: 0, .. })));
    }

    #[test]
    fn pop_mark_discards_frame() {
        let p = dec(b"K\x07(K\x01K\x021.").unwrap();
        assert_eq!(p.root(), &Value::Int(7));
        assert!(matches!(dec(b"1"), Err(ParseError::MalformedStream { offset: 0, .. })));
    }

    #[test]
    fn stop_needs_exactly_one_value() {
        assert!(matches!(dec(b"."), Err(ParseError::MalformedStream { offset: 0, .. })));
        assert!(matches!(
            dec(b"K\x01K\x02."),
            Err(ParseError::MalformedStream { offset: 4, .. })
        ));
        assert!(matches!(
            dec(b"(K\x01."),
            Err(ParseError::MalformedStream { offset: 3, .. })
        ));
    }

    #[test]
    fn dup_shares_the_container() {
        let p = dec(b"]2K\x05a\x86.").unwrap();
        let items = p.items(p.root()).unwrap();
        assert_eq!(items[0], items[1]);
        assert_eq!(p.items(&items[1]).unwrap(), &[Value::Int(5)]);
    }

    #[test]
    fn memo_limit() {
        let opts = DecodeOptions::default().with_max_memo_entries(1);
        assert!(decode_with(&b"K\x01q\x00q\x00."[..], &opts).is_ok());
        let err = decode_with(&b"K\x01q\x00q\x01."[..], &opts).unwrap_err();
        assert!(matches!(err, ParseError::MalformedStream { offset: 4, .. }));
    }

    #[test]
    fn odd_dict_items() {
        assert!(matches!(
            dec(b"(K\x01d."),
            Err(ParseError::MalformedStream { offset: 3, .. })
        ));
    }
}
