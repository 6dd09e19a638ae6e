use std::fmt;

/// Scalar destination kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scalar {
    Int { bits: u32, signed: bool },
    Float { bits: u32 },
    Bool,
    String,
}

/// The shape of a destination, as the unpacker sees it.
///
/// Every [`Unpack`](crate::Unpack) type can describe itself this way.
/// Struct descriptors carry the static field table generated by
/// [`unpack_struct!`](crate::unpack_struct).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Descriptor {
    Scalar(Scalar),
    /// Arbitrary precision integer.
    BigInt,
    /// Optional or boxed: allocated on demand, cleared by `None`.
    Pointer(Box<Descriptor>),
    /// A growable sequence, or a fixed one when `len` is set.
    Sequence {
        element: Box<Descriptor>,
        len: Option<usize>,
    },
    Map {
        key: Box<Descriptor>,
        value: Box<Descriptor>,
    },
    Struct {
        name: &'static str,
        fields: &'static [&'static str],
    },
    /// Takes whatever the pickle holds.
    Any,
}

impl Descriptor {
    pub fn int(bits: u32, signed: bool) -> Self {
        Descriptor::Scalar(Scalar::Int { bits, signed })
    }

    pub fn sequence(element: Descriptor) -> Self {
        Descriptor::Sequence {
            element: Box::new(element),
            len: None,
        }
    }

    pub fn map(key: Descriptor, value: Descriptor) -> Self {
        Descriptor::Map {
            key: Box::new(key),
            value: Box::new(value),
        }
    }

    /// Looks up a struct field by name, ignoring case. You get the
    /// field's position and its declared name.
    pub fn field(&self, name: &str) -> Option<(usize, &'static str)> {
        match self {
            Descriptor::Struct { fields, .. } => fields
                .iter()
                .enumerate()
                .find(|(_, field)| eq_ignore_case(field, name))
                .map(|(idx, field)| (idx, *field)),
            _ => None,
        }
    }
}

/// Unicode-aware case-insensitive comparison.
pub(crate) fn eq_ignore_case(a: &str, b: &str) -> bool {
    if a.is_ascii() && b.is_ascii() {
        return a.eq_ignore_ascii_case(b);
    }
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Descriptor::Scalar(Scalar::Int { bits, signed: true }) => write!(f, "i{bits}"),
            Descriptor::Scalar(Scalar::Int { bits, signed: false }) => write!(f, "u{bits}"),
            Descriptor::Scalar(Scalar::Float { bits }) => write!(f, "f{bits}"),
            Descriptor::Scalar(Scalar::Bool) => f.write_str("bool"),
            Descriptor::Scalar(Scalar::String) => f.write_str("string"),
            Descriptor::BigInt => f.write_str("big integer"),
            Descriptor::Pointer(inner) => write!(f, "optional {inner}"),
            Descriptor::Sequence { element, len: None } => write!(f, "sequence of {element}"),
            Descriptor::Sequence {
                element,
                len: Some(len),
            } => write!(f, "sequence of {len} {element}"),
            Descriptor::Map { key, value } => write!(f, "map of {key} to {value}"),
            Descriptor::Struct { name, .. } => write!(f, "struct {name}"),
            Descriptor::Any => f.write_str("any value"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_lookup_ignores_case() {
        let desc = Descriptor::Struct {
            name: "Fruit",
            fields: &["apple", "banana", "Straße"],
        };
        assert_eq!(desc.field("APPLE"), Some((0, "apple")));
        assert_eq!(desc.field("Banana"), Some((1, "banana")));
        assert_eq!(desc.field("STRASSE"), None);
        assert_eq!(desc.field("straße"), Some((2, "Straße")));
        assert_eq!(desc.field("cherry"), None);
        assert_eq!(Descriptor::Any.field("apple"), None);
    }

    #[test]
    fn renders_nested_shapes() {
        let desc = Descriptor::map(
            Descriptor::Scalar(Scalar::String),
            Descriptor::sequence(Descriptor::int(16, false)),
        );
        assert_eq!(desc.to_string(), "map of string to sequence of u16");
    }
}
