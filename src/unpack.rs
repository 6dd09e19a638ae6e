use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    hash::{BuildHasher, Hash},
};

use indexmap::IndexMap;
use log::{debug, trace};
use num_bigint::BigInt;

use crate::{
    descriptor::{Descriptor, Scalar},
    error::UnpackError,
    escape::latin1,
    value::*,
};

/// Default limit on how deeply containers may nest during an unpack.
pub const DEFAULT_MAX_DEPTH: usize = 250;

/// Default cap on values visited in one unpack.
pub const DEFAULT_MAX_VALUES: usize = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpackOptions {
    /// Containers nested deeper than this fail with `DepthExceeded`.
    pub max_depth: usize,
    /// Every value visited counts, so a container shared through the memo
    /// counts once per reference to it.
    pub max_values: usize,
    /// Fail on dict keys that match no struct field instead of dropping
    /// them. Map and `Object` destinations keep every key either way.
    pub deny_unknown_keys: bool,
}

impl Default for UnpackOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_values: DEFAULT_MAX_VALUES,
            deny_unknown_keys: false,
        }
    }
}

impl UnpackOptions {
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_max_values(mut self, max_values: usize) -> Self {
        self.max_values = max_values;
        self
    }

    pub fn deny_unknown_keys(mut self, deny: bool) -> Self {
        self.deny_unknown_keys = deny;
        self
    }
}

/// A destination a decoded [`Value`] can be unpacked into.
///
/// Unpacking writes into `self` in place: whatever was already there is
/// reused (allocations behind `Option`, `Vec` slots, map entries) and
/// struct fields without a matching key are left alone. When unpacking
/// fails partway, everything written up to the failure stays written.
pub trait Unpack {
    fn descriptor() -> Descriptor;

    fn unpack(&mut self, value: &Value, cx: &mut Unpacker<'_>) -> Result<(), UnpackError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Seq(SeqId),
    Dict(DictId),
}

/// Walks a [`Pickle`] while it's being unpacked. Tracks nesting depth
/// and the containers currently being unpacked, so cyclic values fail
/// instead of recursing forever, and counts values visited so shared
/// containers can't fan out without bound.
pub struct Unpacker<'p> {
    pickle: &'p Pickle,
    options: UnpackOptions,
    depth: usize,
    values: usize,
    active: Vec<Container>,
}

impl<'p> Unpacker<'p> {
    pub fn new(pickle: &'p Pickle, options: UnpackOptions) -> Self {
        Self {
            pickle,
            options,
            depth: 0,
            values: 0,
            active: vec![],
        }
    }

    pub fn pickle(&self) -> &'p Pickle {
        self.pickle
    }

    pub fn options(&self) -> &UnpackOptions {
        &self.options
    }

    /// Items of a list or tuple.
    pub fn items(&self, value: &Value) -> Option<&'p [Value]> {
        self.pickle.items(value)
    }

    /// Entries of a dict.
    pub fn entries(&self, value: &Value) -> Option<&'p Dict> {
        self.pickle.entries(value)
    }

    /// Unpack a nested value. Containers should call this for each of
    /// their children rather than calling `Unpack::unpack` directly.
    pub fn unpack_child<T: Unpack>(&mut self, dest: &mut T, value: &Value) -> Result<(), UnpackError> {
        self.values += 1;
        if self.values > self.options.max_values {
            return Err(UnpackError::TooManyValues {
                limit: self.options.max_values,
            });
        }
        if self.depth >= self.options.max_depth {
            return Err(UnpackError::DepthExceeded {
                limit: self.options.max_depth,
            });
        }
        let container = match value {
            Value::List(id) | Value::Tuple(id) => Some(Container::Seq(*id)),
            Value::Dict(id) => Some(Container::Dict(*id)),
            _ => None,
        };
        if let Some(container) = container {
            if self.active.contains(&container) {
                return Err(UnpackError::Cycle);
            }
            self.active.push(container);
        }

        self.depth += 1;
        let result = dest.unpack(value, self);
        self.depth -= 1;
        if container.is_some() {
            self.active.pop();
        }
        result
    }
}

fn mismatch<T: Unpack>(value: &Value) -> UnpackError {
    UnpackError::mismatch(T::descriptor(), value.kind())
}

macro_rules! impl_unpack_int {
    ($($ty:ty => $signed:literal),* $(,)?) => {$(
        impl Unpack for $ty {
            fn descriptor() -> Descriptor {
                Descriptor::int(<$ty>::BITS, $signed)
            }

            fn unpack(&mut self, value: &Value, _cx: &mut Unpacker<'_>) -> Result<(), UnpackError> {
                let out_of_range = |n: &dyn fmt::Display| UnpackError::RangeError {
                    value: n.to_string(),
                    expected: Self::descriptor(),
                };
                *self = match value {
                    Value::Int(n) => <$ty>::try_from(*n).map_err(|_| out_of_range(n))?,
                    Value::BigInt(n) => <$ty>::try_from(n).map_err(|_| out_of_range(n))?,
                    other => return Err(mismatch::<Self>(other)),
                };
                Ok(())
            }
        }
    )*};
}

impl_unpack_int!(
    i8 => true, i16 => true, i32 => true, i64 => true, i128 => true, isize => true,
    u8 => false, u16 => false, u32 => false, u64 => false, u128 => false, usize => false,
);

impl Unpack for f64 {
    fn descriptor() -> Descriptor {
        Descriptor::Scalar(Scalar::Float { bits: 64 })
    }

    fn unpack(&mut self, value: &Value, _cx: &mut Unpacker<'_>) -> Result<(), UnpackError> {
        *self = match value {
            Value::Float(f) => *f,
            Value::Int(n) => *n as f64,
            other => return Err(mismatch::<Self>(other)),
        };
        Ok(())
    }
}

impl Unpack for f32 {
    fn descriptor() -> Descriptor {
        Descriptor::Scalar(Scalar::Float { bits: 32 })
    }

    fn unpack(&mut self, value: &Value, _cx: &mut Unpacker<'_>) -> Result<(), UnpackError> {
        *self = match value {
            Value::Float(f) => *f as f32,
            Value::Int(n) => *n as f32,
            other => return Err(mismatch::<Self>(other)),
        };
        Ok(())
    }
}

impl Unpack for bool {
    fn descriptor() -> Descriptor {
        Descriptor::Scalar(Scalar::Bool)
    }

    fn unpack(&mut self, value: &Value, _cx: &mut Unpacker<'_>) -> Result<(), UnpackError> {
        match value {
            Value::Bool(b) => *self = *b,
            other => return Err(mismatch::<Self>(other)),
        }
        Ok(())
    }
}

impl Unpack for String {
    fn descriptor() -> Descriptor {
        Descriptor::Scalar(Scalar::String)
    }

    fn unpack(&mut self, value: &Value, _cx: &mut Unpacker<'_>) -> Result<(), UnpackError> {
        match value {
            Value::String(s) => s.clone_into(self),
            Value::Bytes(b) => *self = latin1(b),
            other => return Err(mismatch::<Self>(other)),
        }
        Ok(())
    }
}

impl Unpack for BigInt {
    fn descriptor() -> Descriptor {
        Descriptor::BigInt
    }

    fn unpack(&mut self, value: &Value, _cx: &mut Unpacker<'_>) -> Result<(), UnpackError> {
        *self = match value {
            Value::Int(n) => BigInt::from(*n),
            Value::BigInt(n) => n.clone(),
            other => return Err(mismatch::<Self>(other)),
        };
        Ok(())
    }
}

/// `None` clears it. Anything else allocates the inner value if there
/// isn't one yet and unpacks into it.
impl<T: Unpack + Default> Unpack for Option<T> {
    fn descriptor() -> Descriptor {
        Descriptor::Pointer(Box::new(T::descriptor()))
    }

    fn unpack(&mut self, value: &Value, cx: &mut Unpacker<'_>) -> Result<(), UnpackError> {
        if let Value::None = value {
            *self = None;
            return Ok(());
        }
        self.get_or_insert_with(T::default).unpack(value, cx)
    }
}

impl<T: Unpack> Unpack for Box<T> {
    fn descriptor() -> Descriptor {
        T::descriptor()
    }

    fn unpack(&mut self, value: &Value, cx: &mut Unpacker<'_>) -> Result<(), UnpackError> {
        (**self).unpack(value, cx)
    }
}

/// Resized to the length of the list or tuple. Existing elements are
/// unpacked into rather than replaced.
impl<T: Unpack + Default> Unpack for Vec<T> {
    fn descriptor() -> Descriptor {
        Descriptor::sequence(T::descriptor())
    }

    fn unpack(&mut self, value: &Value, cx: &mut Unpacker<'_>) -> Result<(), UnpackError> {
        let items = cx.items(value).ok_or_else(|| mismatch::<Self>(value))?;
        self.resize_with(items.len(), T::default);
        for (idx, (slot, item)) in self.iter_mut().zip(items).enumerate() {
            cx.unpack_child(slot, item).map_err(|e| e.at_index(idx))?;
        }
        Ok(())
    }
}

impl<T: Unpack, const N: usize> Unpack for [T; N] {
    fn descriptor() -> Descriptor {
        Descriptor::Sequence {
            element: Box::new(T::descriptor()),
            len: Some(N),
        }
    }

    fn unpack(&mut self, value: &Value, cx: &mut Unpacker<'_>) -> Result<(), UnpackError> {
        let items = cx.items(value).ok_or_else(|| mismatch::<Self>(value))?;
        if items.len() != N {
            return Err(UnpackError::LengthMismatch {
                expected: N,
                found: items.len(),
            });
        }
        for (idx, (slot, item)) in self.iter_mut().zip(items).enumerate() {
            cx.unpack_child(slot, item).map_err(|e| e.at_index(idx))?;
        }
        Ok(())
    }
}

/// Unpack every entry of a dict into fresh key and value slots and hand
/// them to `insert`.
fn unpack_entries<M, K, V>(
    value: &Value,
    cx: &mut Unpacker<'_>,
    mut insert: impl FnMut(K, V),
) -> Result<(), UnpackError>
where
    M: Unpack,
    K: Unpack + Default,
    V: Unpack + Default,
{
    let dict = cx.entries(value).ok_or_else(|| mismatch::<M>(value))?;
    for (key, item) in dict {
        let mut k = K::default();
        cx.unpack_child(&mut k, &key.to_value())
            .map_err(|e| e.at_key(key))?;
        let mut v = V::default();
        cx.unpack_child(&mut v, item).map_err(|e| e.at_key(key))?;
        insert(k, v);
    }
    Ok(())
}

impl<K, V, S> Unpack for HashMap<K, V, S>
where
    K: Unpack + Default + Eq + Hash,
    V: Unpack + Default,
    S: BuildHasher,
{
    fn descriptor() -> Descriptor {
        Descriptor::map(K::descriptor(), V::descriptor())
    }

    fn unpack(&mut self, value: &Value, cx: &mut Unpacker<'_>) -> Result<(), UnpackError> {
        unpack_entries::<Self, K, V>(value, cx, |k, v| {
            self.insert(k, v);
        })
    }
}

impl<K, V> Unpack for BTreeMap<K, V>
where
    K: Unpack + Default + Ord,
    V: Unpack + Default,
{
    fn descriptor() -> Descriptor {
        Descriptor::map(K::descriptor(), V::descriptor())
    }

    fn unpack(&mut self, value: &Value, cx: &mut Unpacker<'_>) -> Result<(), UnpackError> {
        unpack_entries::<Self, K, V>(value, cx, |k, v| {
            self.insert(k, v);
        })
    }
}

impl<K, V, S> Unpack for IndexMap<K, V, S>
where
    K: Unpack + Default + Eq + Hash,
    V: Unpack + Default,
    S: BuildHasher,
{
    fn descriptor() -> Descriptor {
        Descriptor::map(K::descriptor(), V::descriptor())
    }

    fn unpack(&mut self, value: &Value, cx: &mut Unpacker<'_>) -> Result<(), UnpackError> {
        unpack_entries::<Self, K, V>(value, cx, |k, v| {
            self.insert(k, v);
        })
    }
}

/// A struct whose fields can be matched against dict keys. Implement it
/// with [`unpack_struct!`](crate::unpack_struct), which also implements
/// [`Unpack`] by way of [`unpack_struct`].
pub trait UnpackStruct {
    const NAME: &'static str;
    /// Key each field is matched against, case-insensitively.
    const FIELDS: &'static [&'static str];

    /// Unpack into the field at `index` in `FIELDS`.
    fn unpack_field(
        &mut self,
        index: usize,
        value: &Value,
        cx: &mut Unpacker<'_>,
    ) -> Result<(), UnpackError>;
}

/// Match each entry of a dict to a field of `dest` by key and unpack it
/// there. Fields with no entry are untouched. Entries with no field are
/// dropped, unless `deny_unknown_keys` is set.
pub fn unpack_struct<T: UnpackStruct>(
    dest: &mut T,
    value: &Value,
    cx: &mut Unpacker<'_>,
) -> Result<(), UnpackError> {
    let desc = Descriptor::Struct {
        name: T::NAME,
        fields: T::FIELDS,
    };
    let Some(dict) = cx.entries(value) else {
        return Err(UnpackError::mismatch(desc, value.kind()));
    };
    for (key, item) in dict {
        match key.as_text().and_then(|name| desc.field(&name)) {
            Some((index, field)) => dest
                .unpack_field(index, item, cx)
                .map_err(|e| e.at_field(field))?,
            None if cx.options.deny_unknown_keys => {
                return Err(UnpackError::UnknownKey {
                    key: key.to_string(),
                    target: T::NAME,
                })
            }
            None => trace!("{}: dropping key {key:?} with no matching field", T::NAME),
        }
    }
    Ok(())
}

/// Implement [`Unpack`] for a struct by listing the fields to fill.
/// A field is matched to the dict key of the same name, ignoring case,
/// unless it's given an explicit key with `=>`.
///
/// ```rust
/// use sour_pickle::unpack_struct;
///
/// #[derive(Debug, Default)]
/// struct Tensor {
///     name: String,
///     shape: Vec<u64>,
///     grad: bool,
/// }
///
/// unpack_struct!(Tensor { name, shape, grad => "requires_grad" });
/// ```
#[macro_export]
macro_rules! unpack_struct {
    ($ty:ty { $($field:ident $(=> $key:literal)?),* $(,)? }) => {
        impl $crate::UnpackStruct for $ty {
            const NAME: &'static str = stringify!($ty);
            const FIELDS: &'static [&'static str] =
                &[$($crate::__unpack_field_key!($field $(, $key)?)),*];

            #[allow(unused_assignments, unused_mut, unused_variables)]
            fn unpack_field(
                &mut self,
                index: usize,
                value: &$crate::Value,
                cx: &mut $crate::Unpacker<'_>,
            ) -> ::core::result::Result<(), $crate::UnpackError> {
                let mut next = 0usize;
                $(
                    if index == next {
                        return cx.unpack_child(&mut self.$field, value);
                    }
                    next += 1;
                )*
                ::core::result::Result::Ok(())
            }
        }

        impl $crate::Unpack for $ty {
            fn descriptor() -> $crate::Descriptor {
                $crate::Descriptor::Struct {
                    name: <$ty as $crate::UnpackStruct>::NAME,
                    fields: <$ty as $crate::UnpackStruct>::FIELDS,
                }
            }

            fn unpack(
                &mut self,
                value: &$crate::Value,
                cx: &mut $crate::Unpacker<'_>,
            ) -> ::core::result::Result<(), $crate::UnpackError> {
                $crate::unpack_struct(self, value, cx)
            }
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __unpack_field_key {
    ($field:ident) => {
        stringify!($field)
    };
    ($field:ident, $key:literal) => {
        $key
    };
}

impl Pickle {
    /// Unpack the top level value into `dest`.
    pub fn unpack_into<T: Unpack>(&self, dest: &mut T) -> Result<(), UnpackError> {
        self.unpack_into_with(dest, UnpackOptions::default())
    }

    pub fn unpack_into_with<T: Unpack>(
        &self,
        dest: &mut T,
        options: UnpackOptions,
    ) -> Result<(), UnpackError> {
        let result = Unpacker::new(self, options).unpack_child(dest, &self.root);
        if let Err(err) = &result {
            debug!(
                "unpacking into {} failed at `{}`: {}",
                T::descriptor(),
                err.path_string(),
                err.root_cause()
            );
        }
        result
    }

    /// Unpack the top level value into a fresh `T`.
    pub fn unpack<T: Unpack + Default>(&self) -> Result<T, UnpackError> {
        let mut dest = T::default();
        self.unpack_into(&mut dest)?;
        Ok(dest)
    }
}

/// Unpack the top level value of `pickle` into `dest`.
pub fn unpack_into<T: Unpack>(dest: &mut T, pickle: &Pickle) -> Result<(), UnpackError> {
    pickle.unpack_into(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode;

    #[derive(Debug, Default, PartialEq)]
    struct Pair {
        left: i32,
        right: Option<String>,
    }

    unpack_struct!(Pair { left, right => "Right_Side" });

    #[test]
    fn explicit_keys_and_case() {
        let p = decode(&b"}(X\x04\x00\x00\x00LEFTK\x05X\n\x00\x00\x00right_sideX\x01\x00\x00\x00xu."[..])
            .unwrap();
        let pair: Pair = p.unpack().unwrap();
        assert_eq!(
            pair,
            Pair {
                left: 5,
                right: Some("x".into())
            }
        );
    }

    #[test]
    fn range_checks_use_the_destination_width() {
        let p = decode(&b"M\x00\x01."[..]).unwrap();
        assert_eq!(p.unpack::<u16>().unwrap(), 256);
        match p.unpack::<u8>() {
            Err(UnpackError::RangeError { value, expected }) => {
                assert_eq!(value, "256");
                assert_eq!(expected, Descriptor::int(8, false));
            }
            other => panic!("unexpected {other:?}"),
        }
        let p = decode(&b"J\xff\xff\xff\xff."[..]).unwrap();
        assert_eq!(p.unpack::<i8>().unwrap(), -1);
        assert!(matches!(p.unpack::<u64>(), Err(UnpackError::RangeError { .. })));
    }

    #[test]
    fn floats_take_ints() {
        let p = decode(&b"K\x03."[..]).unwrap();
        assert_eq!(p.unpack::<f32>().unwrap(), 3.0);
        let p = decode(&b"N."[..]).unwrap();
        assert!(matches!(
            p.unpack::<f64>(),
            Err(UnpackError::TypeMismatch {
                found: ValueKind::None,
                ..
            })
        ));
    }

    #[test]
    fn fixed_arrays_need_the_exact_length() {
        let p = decode(&b"K\x01K\x02\x86."[..]).unwrap();
        assert_eq!(p.unpack::<[u8; 2]>().unwrap(), [1, 2]);
        let mut three = [0u8; 3];
        assert_eq!(
            p.unpack_into(&mut three),
            Err(UnpackError::LengthMismatch {
                expected: 3,
                found: 2
            })
        );
    }

    #[test]
    fn depth_limit() {
        let p = decode(&b"]]]aa."[..]).unwrap();
        let opts = UnpackOptions::default().with_max_depth(2);
        let mut dest: Vec<Vec<Vec<i64>>> = vec![];
        let err = p.unpack_into_with(&mut dest, opts).unwrap_err();
        assert_eq!(err.root_cause(), &UnpackError::DepthExceeded { limit: 2 });
        assert_eq!(err.path_string(), "[0][0]");
        assert!(p.unpack_into(&mut dest).is_ok());
    }
}
