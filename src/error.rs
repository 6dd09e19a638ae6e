use std::{borrow::Cow, fmt, io};

use thiserror::Error;

use crate::{descriptor::Descriptor, ops::describe_opcode, value::ValueKind};

/// The bytes aren't a pickle we can decode. Every variant carries the
/// byte offset of the opcode that failed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParseError {
    #[error("malformed pickle at byte {offset}: {reason}")]
    MalformedStream {
        offset: u64,
        reason: Cow<'static, str>,
    },
    #[error("stack underflow at byte {offset} evaluating {}", describe_opcode(.opcode))]
    StackUnderflow { offset: u64, opcode: u8 },
    #[error("memo id {id} referenced at byte {offset} was never stored")]
    UnknownMemoReference { offset: u64, id: u32 },
    #[error("unsupported opcode {} at byte {offset}", describe_opcode(.opcode))]
    UnsupportedOpcode { offset: u64, opcode: u8 },
    #[error("unsupported pickle protocol {version} at byte {offset}")]
    UnsupportedProtocol { offset: u64, version: u8 },
    #[error("pickle ended at byte {offset} without a STOP")]
    IncompleteStream { offset: u64 },
    #[error("operand of {} at byte {offset} is truncated", describe_opcode(.opcode))]
    TruncatedOperand { offset: u64, opcode: u8 },
    #[error("read failed at byte {offset}")]
    Io {
        offset: u64,
        #[source]
        source: io::Error,
    },
}

impl ParseError {
    /// Byte offset of the opcode that failed.
    pub fn offset(&self) -> u64 {
        match self {
            ParseError::MalformedStream { offset, .. }
            | ParseError::StackUnderflow { offset, .. }
            | ParseError::UnknownMemoReference { offset, .. }
            | ParseError::UnsupportedOpcode { offset, .. }
            | ParseError::UnsupportedProtocol { offset, .. }
            | ParseError::IncompleteStream { offset }
            | ParseError::TruncatedOperand { offset, .. }
            | ParseError::Io { offset, .. } => *offset,
        }
    }

    pub(crate) fn malformed(offset: u64, reason: impl Into<Cow<'static, str>>) -> Self {
        ParseError::MalformedStream {
            offset,
            reason: reason.into(),
        }
    }
}

/// One step on the way from the unpack root to a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Index(usize),
    Key(String),
    Field(&'static str),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Index(idx) => write!(f, "[{idx}]"),
            PathSegment::Key(key) => write!(f, "[{key:?}]"),
            PathSegment::Field(name) => write!(f, ".{name}"),
        }
    }
}

/// The pickle decoded fine but doesn't fit the destination.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum UnpackError {
    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        expected: Descriptor,
        found: ValueKind,
    },
    #[error("{value} does not fit in {expected}")]
    RangeError { value: String, expected: Descriptor },
    #[error("expected a sequence of {expected} items, found {found}")]
    LengthMismatch { expected: usize, found: usize },
    #[error("index {index}: {source}")]
    Indexed {
        index: usize,
        #[source]
        source: Box<UnpackError>,
    },
    #[error("key {key:?}: {source}")]
    Keyed {
        key: String,
        #[source]
        source: Box<UnpackError>,
    },
    #[error("field `{field}`: {source}")]
    Field {
        field: &'static str,
        #[source]
        source: Box<UnpackError>,
    },
    #[error("key {key:?} has no matching field in {target}")]
    UnknownKey { key: String, target: &'static str },
    #[error("value refers back to a container that is still being unpacked")]
    Cycle,
    #[error("nesting deeper than {limit} levels")]
    DepthExceeded { limit: usize },
    #[error("more than {limit} values unpacked")]
    TooManyValues { limit: usize },
}

impl UnpackError {
    pub(crate) fn mismatch(expected: Descriptor, found: ValueKind) -> Self {
        UnpackError::TypeMismatch { expected, found }
    }

    pub(crate) fn at_index(self, index: usize) -> Self {
        UnpackError::Indexed {
            index,
            source: Box::new(self),
        }
    }

    pub(crate) fn at_key(self, key: impl fmt::Display) -> Self {
        UnpackError::Keyed {
            key: key.to_string(),
            source: Box::new(self),
        }
    }

    pub(crate) fn at_field(self, field: &'static str) -> Self {
        UnpackError::Field {
            field,
            source: Box::new(self),
        }
    }

    /// Path from the unpack root to where the failure happened.
    pub fn path(&self) -> Vec<PathSegment> {
        let mut path = vec![];
        let mut err = self;
        loop {
            err = match err {
                UnpackError::Indexed { index, source } => {
                    path.push(PathSegment::Index(*index));
                    &**source
                }
                UnpackError::Keyed { key, source } => {
                    path.push(PathSegment::Key(key.clone()));
                    &**source
                }
                UnpackError::Field { field, source } => {
                    path.push(PathSegment::Field(*field));
                    &**source
                }
                _ => return path,
            };
        }
    }

    /// The path rendered like `.cat[2]["key"]`.
    pub fn path_string(&self) -> String {
        self.path().iter().map(ToString::to_string).collect()
    }

    /// The innermost error, without any path wrappers.
    pub fn root_cause(&self) -> &UnpackError {
        match self {
            UnpackError::Indexed { source, .. }
            | UnpackError::Keyed { source, .. }
            | UnpackError::Field { source, .. } => source.root_cause(),
            err => err,
        }
    }
}

/// Either half of a one-shot decode and unpack.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Unpack(#[from] UnpackError),
}
