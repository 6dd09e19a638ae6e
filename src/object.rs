use indexmap::IndexMap;
use num_bigint::BigInt;

use crate::{
    descriptor::Descriptor,
    error::UnpackError,
    escape::latin1,
    unpack::{Unpack, Unpacker},
    value::*,
};

/// A self-contained, owned copy of a decoded value, for when you don't
/// know the shape ahead of time.
///
/// Byte strings become text (read as Latin-1) and tuples become lists.
/// That goes for dict keys too, so a dict holding both `b'a'` and `u'a'`
/// ends up with a single `"a"` entry: the later of the two in the pickle.
/// Shared containers are copied once per reference (see
/// [`UnpackOptions::max_values`](crate::UnpackOptions::max_values)), and
/// cyclic values can't be unpacked into an `Object` at all.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Object {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    BigInt(BigInt),
    Float(f64),
    String(String),
    List(Vec<Object>),
    Map(IndexMap<Key, Object>),
}

impl Object {
    pub fn is_none(&self) -> bool {
        matches!(self, Object::None)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Object::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Object::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Object::Float(f) => Some(*f),
            Object::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Object::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Object]> {
        match self {
            Object::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<Key, Object>> {
        match self {
            Object::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Look up a map entry by its text key.
    pub fn get(&self, key: &str) -> Option<&Object> {
        self.as_map()?.get(&Key::String(key.to_owned()))
    }
}

impl Unpack for Object {
    fn descriptor() -> Descriptor {
        Descriptor::Any
    }

    fn unpack(&mut self, value: &Value, cx: &mut Unpacker<'_>) -> Result<(), UnpackError> {
        *self = match value {
            Value::None => Object::None,
            Value::Bool(b) => Object::Bool(*b),
            Value::Int(n) => Object::Int(*n),
            Value::BigInt(n) => Object::BigInt(n.clone()),
            Value::Float(f) => Object::Float(*f),
            Value::String(s) => Object::String(s.clone()),
            Value::Bytes(b) => Object::String(latin1(b)),
            Value::List(_) | Value::Tuple(_) => {
                let mut items: Vec<Object> = vec![];
                items.unpack(value, cx)?;
                Object::List(items)
            }
            Value::Dict(_) => {
                let dict = cx
                    .entries(value)
                    .ok_or_else(|| UnpackError::mismatch(Descriptor::Any, value.kind()))?;
                let mut map = IndexMap::with_capacity(dict.len());
                for (key, item) in dict {
                    let mut obj = Object::None;
                    cx.unpack_child(&mut obj, item).map_err(|e| e.at_key(key))?;
                    let key = match key {
                        Key::Bytes(b) => Key::String(latin1(b)),
                        other => other.clone(),
                    };
                    map.insert(key, obj);
                }
                Object::Map(map)
            }
        };
        Ok(())
    }
}
