use std::{
    borrow::Cow,
    fmt,
    hash::{Hash, Hasher},
};

use indexmap::IndexMap;
use num_bigint::BigInt;
use once_cell::sync::Lazy;

use crate::escape::latin1;

/// Handle to a list or tuple stored in a [`Pickle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeqId(pub(crate) usize);

/// Handle to a dict stored in a [`Pickle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DictId(pub(crate) usize);

#[derive(Debug, Clone, PartialEq, Default)]
/// A decoded value.
///
/// Containers are handles into the [`Pickle`] they came from. Two values
/// that went through the memo (or `DUP`) point at the same container, so
/// they compare equal and see each other's contents, cycles included.
pub enum Value {
    /// Python `None`.
    #[default]
    None,
    Bool(bool),
    /// Any integer that fits, whichever opcode it came from.
    Int(i64),
    /// An integer that can't fit in i64.
    BigInt(BigInt),
    Float(f64),
    /// Text from the unicode opcodes.
    String(String),
    /// Byte strings (Python 2 `str`). Treat as Latin-1 if you want text.
    Bytes(Vec<u8>),
    List(SeqId),
    Tuple(SeqId),
    Dict(DictId),
}

/// The variant of a [`Value`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    None,
    Bool,
    Int,
    BigInt,
    Float,
    String,
    Bytes,
    List,
    Tuple,
    Dict,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValueKind::None => "None",
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::BigInt => "long",
            ValueKind::Float => "float",
            ValueKind::String => "unicode",
            ValueKind::Bytes => "str",
            ValueKind::List => "list",
            ValueKind::Tuple => "tuple",
            ValueKind::Dict => "dict",
        })
    }
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::None => ValueKind::None,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::BigInt(_) => ValueKind::BigInt,
            Value::Float(_) => ValueKind::Float,
            Value::String(_) => ValueKind::String,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::List(_) => ValueKind::List,
            Value::Tuple(_) => ValueKind::Tuple,
            Value::Dict(_) => ValueKind::Dict,
        }
    }

    /// Text for `String` values and the Latin-1 reading of `Bytes`.
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            Value::String(s) => Some(Cow::Borrowed(s)),
            Value::Bytes(b) => Some(Cow::Owned(latin1(b))),
            _ => None,
        }
    }
}

/// Turn an arbitrary precision integer into a `Value`, preferring `Int`
/// when it fits.
pub(crate) fn int_value(bint: BigInt) -> Value {
    static BI64MIN: Lazy<BigInt> = Lazy::new(|| BigInt::from(i64::MIN));
    static BI64MAX: Lazy<BigInt> = Lazy::new(|| BigInt::from(i64::MAX));
    if bint >= *BI64MIN && bint <= *BI64MAX {
        i64::try_from(&bint).map_or_else(|_| Value::BigInt(bint), Value::Int)
    } else {
        Value::BigInt(bint)
    }
}

#[derive(Debug, Clone)]
/// A dict key. Only scalars can be keys, containers are rejected
/// while decoding.
///
/// Floats compare by bit pattern, except that `0.0` and `-0.0` are the
/// same key.
pub enum Key {
    None,
    Bool(bool),
    Int(i64),
    BigInt(BigInt),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl Key {
    fn float_bits(f: f64) -> u64 {
        if f == 0.0 {
            0
        } else {
            f.to_bits()
        }
    }

    /// Key text for matching against field names: `String` keys and
    /// Latin-1 decoded `Bytes` keys.
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            Key::String(s) => Some(Cow::Borrowed(s)),
            Key::Bytes(b) => Some(Cow::Owned(latin1(b))),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Key::None => Value::None,
            Key::Bool(b) => Value::Bool(*b),
            Key::Int(n) => Value::Int(*n),
            Key::BigInt(n) => Value::BigInt(n.clone()),
            Key::Float(f) => Value::Float(*f),
            Key::String(s) => Value::String(s.clone()),
            Key::Bytes(b) => Value::Bytes(b.clone()),
        }
    }
}

impl TryFrom<Value> for Key {
    type Error = ValueKind;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Ok(match value {
            Value::None => Key::None,
            Value::Bool(b) => Key::Bool(b),
            Value::Int(n) => Key::Int(n),
            Value::BigInt(n) => Key::BigInt(n),
            Value::Float(f) => Key::Float(f),
            Value::String(s) => Key::String(s),
            Value::Bytes(b) => Key::Bytes(b),
            other => return Err(other.kind()),
        })
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Key::None, Key::None) => true,
            (Key::Bool(a), Key::Bool(b)) => a == b,
            (Key::Int(a), Key::Int(b)) => a == b,
            (Key::BigInt(a), Key::BigInt(b)) => a == b,
            (Key::Float(a), Key::Float(b)) => Key::float_bits(*a) == Key::float_bits(*b),
            (Key::String(a), Key::String(b)) => a == b,
            (Key::Bytes(a), Key::Bytes(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Key::None => (),
            Key::Bool(b) => b.hash(state),
            Key::Int(n) => n.hash(state),
            Key::BigInt(n) => n.hash(state),
            Key::Float(f) => Key::float_bits(*f).hash(state),
            Key::String(s) => s.hash(state),
            Key::Bytes(b) => b.hash(state),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::None => f.write_str("None"),
            Key::Bool(true) => f.write_str("True"),
            Key::Bool(false) => f.write_str("False"),
            Key::Int(n) => write!(f, "{n}"),
            Key::BigInt(n) => write!(f, "{n}"),
            Key::Float(v) => write!(f, "{v}"),
            Key::String(s) => f.write_str(s),
            Key::Bytes(b) => f.write_str(&latin1(b)),
        }
    }
}

/// Dicts keep insertion order. Setting a key again replaces the value
/// in place.
pub type Dict = IndexMap<Key, Value>;

#[derive(Debug, Clone, PartialEq, Default)]
/// One fully decoded pickle: the top level value plus every container
/// it (directly or indirectly) refers to.
pub struct Pickle {
    pub(crate) root: Value,
    pub(crate) seqs: Vec<Vec<Value>>,
    pub(crate) dicts: Vec<Dict>,
}

impl Pickle {
    /// The value the pickle's `STOP` returned.
    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn seq(&self, id: SeqId) -> Option<&[Value]> {
        self.seqs.get(id.0).map(Vec::as_slice)
    }

    pub fn dict(&self, id: DictId) -> Option<&Dict> {
        self.dicts.get(id.0)
    }

    /// Items of a list or tuple value.
    pub fn items(&self, value: &Value) -> Option<&[Value]> {
        match value {
            Value::List(id) | Value::Tuple(id) => self.seq(*id),
            _ => None,
        }
    }

    /// Entries of a dict value.
    pub fn entries(&self, value: &Value) -> Option<&Dict> {
        match value {
            Value::Dict(id) => self.dict(*id),
            _ => None,
        }
    }

    /// How many lists and tuples were built.
    pub fn seq_count(&self) -> usize {
        self.seqs.len()
    }

    /// How many dicts were built.
    pub fn dict_count(&self) -> usize {
        self.dicts.len()
    }
}
