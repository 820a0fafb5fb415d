use std::fmt::{self, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strata_error::{StrataError, strata_err};

/// The first id handed out to a non-primitive type by a [`crate::TypeContext`].
pub const FIRST_COMPLEX_ID: u32 = 30;

/// The fixed set of primitive types. Their ids are their discriminants and are the same in
/// every type context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum PrimitiveType {
    Uint8 = 0,
    Uint16,
    Uint32,
    Uint64,
    Int8,
    Int16,
    Int32,
    Int64,
    Duration,
    Time,
    Float64,
    Bool,
    Bytes,
    String,
    Ip,
    Net,
    Type,
    Error,
    Null,
}

impl PrimitiveType {
    pub const ALL: [PrimitiveType; 19] = [
        PrimitiveType::Uint8,
        PrimitiveType::Uint16,
        PrimitiveType::Uint32,
        PrimitiveType::Uint64,
        PrimitiveType::Int8,
        PrimitiveType::Int16,
        PrimitiveType::Int32,
        PrimitiveType::Int64,
        PrimitiveType::Duration,
        PrimitiveType::Time,
        PrimitiveType::Float64,
        PrimitiveType::Bool,
        PrimitiveType::Bytes,
        PrimitiveType::String,
        PrimitiveType::Ip,
        PrimitiveType::Net,
        PrimitiveType::Type,
        PrimitiveType::Error,
        PrimitiveType::Null,
    ];

    pub fn id(self) -> u32 {
        u32::from(self as u8)
    }

    pub fn from_id(id: u32) -> Option<Self> {
        usize::try_from(id)
            .ok()
            .and_then(|idx| Self::ALL.get(idx))
            .copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            PrimitiveType::Uint8 => "uint8",
            PrimitiveType::Uint16 => "uint16",
            PrimitiveType::Uint32 => "uint32",
            PrimitiveType::Uint64 => "uint64",
            PrimitiveType::Int8 => "int8",
            PrimitiveType::Int16 => "int16",
            PrimitiveType::Int32 => "int32",
            PrimitiveType::Int64 => "int64",
            PrimitiveType::Duration => "duration",
            PrimitiveType::Time => "time",
            PrimitiveType::Float64 => "float64",
            PrimitiveType::Bool => "bool",
            PrimitiveType::Bytes => "bytes",
            PrimitiveType::String => "string",
            PrimitiveType::Ip => "ip",
            PrimitiveType::Net => "net",
            PrimitiveType::Type => "type",
            PrimitiveType::Error => "error",
            PrimitiveType::Null => "null",
        }
    }

    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            PrimitiveType::Uint8
                | PrimitiveType::Uint16
                | PrimitiveType::Uint32
                | PrimitiveType::Uint64
        )
    }

    /// Signed integers, including the time-like types stored as int64 nanoseconds.
    pub fn is_signed(self) -> bool {
        matches!(
            self,
            PrimitiveType::Int8
                | PrimitiveType::Int16
                | PrimitiveType::Int32
                | PrimitiveType::Int64
                | PrimitiveType::Duration
                | PrimitiveType::Time
        )
    }

    pub fn is_integer(self) -> bool {
        self.is_unsigned() || self.is_signed()
    }

    pub fn is_number(self) -> bool {
        self.is_integer() || self == PrimitiveType::Float64
    }

    /// Types whose bodies are strings of bytes a substring search can look inside.
    pub fn is_stringy(self) -> bool {
        matches!(
            self,
            PrimitiveType::String | PrimitiveType::Bytes | PrimitiveType::Error | PrimitiveType::Type
        )
    }
}

impl Display for PrimitiveType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PrimitiveType {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PrimitiveType::ALL
            .iter()
            .find(|p| p.name() == s)
            .copied()
            .ok_or_else(|| strata_err!(Invalid: "unknown type: {s}"))
    }
}

/// A named, typed record field.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Column {
    pub name: String,
    pub typ: Type,
}

impl Column {
    pub fn new(name: impl Into<String>, typ: Type) -> Self {
        Self {
            name: name.into(),
            typ,
        }
    }
}

/// The structure of a non-primitive type.
#[derive(Debug)]
pub(crate) enum Complex {
    Record(Vec<Column>),
    Array(Type),
    Set(Type),
    Map(Type, Type),
    Union(Vec<Type>),
}

#[derive(Debug)]
pub(crate) struct ComplexType {
    pub(crate) id: u32,
    pub(crate) context: u64,
    pub(crate) complex: Complex,
}

#[derive(Clone, Debug)]
enum Repr {
    Primitive(PrimitiveType),
    Complex(Arc<ComplexType>),
}

/// A type interned in a [`crate::TypeContext`].
///
/// Equality is identity: two complex types are equal when they were interned by the same
/// context under the same id. Types from different contexts must be translated before they
/// are compared.
#[derive(Clone, Debug)]
pub struct Type(Repr);

/// A borrowed view of a type's structure for matching.
#[derive(Clone, Copy, Debug)]
pub enum TypeKind<'a> {
    Primitive(PrimitiveType),
    Record(&'a [Column]),
    Array(&'a Type),
    Set(&'a Type),
    Map(&'a Type, &'a Type),
    Union(&'a [Type]),
}

macro_rules! primitive_consts {
    ($($name:ident => $variant:ident),* $(,)?) => {
        impl Type {
            $(pub const $name: Type = Type(Repr::Primitive(PrimitiveType::$variant));)*
        }
    };
}

primitive_consts!(
    UINT8 => Uint8,
    UINT16 => Uint16,
    UINT32 => Uint32,
    UINT64 => Uint64,
    INT8 => Int8,
    INT16 => Int16,
    INT32 => Int32,
    INT64 => Int64,
    DURATION => Duration,
    TIME => Time,
    FLOAT64 => Float64,
    BOOL => Bool,
    BYTES => Bytes,
    STRING => String,
    IP => Ip,
    NET => Net,
    TYPE => Type,
    ERROR => Error,
    NULL => Null,
);

impl Type {
    pub(crate) fn complex(ct: Arc<ComplexType>) -> Self {
        Type(Repr::Complex(ct))
    }

    pub fn primitive(p: PrimitiveType) -> Self {
        Type(Repr::Primitive(p))
    }

    /// The id of this type within its context.
    pub fn id(&self) -> u32 {
        match &self.0 {
            Repr::Primitive(p) => p.id(),
            Repr::Complex(ct) => ct.id,
        }
    }

    /// The serial of the owning context, zero for primitives.
    pub(crate) fn context(&self) -> u64 {
        match &self.0 {
            Repr::Primitive(_) => 0,
            Repr::Complex(ct) => ct.context,
        }
    }

    pub fn kind(&self) -> TypeKind<'_> {
        match &self.0 {
            Repr::Primitive(p) => TypeKind::Primitive(*p),
            Repr::Complex(ct) => match &ct.complex {
                Complex::Record(cols) => TypeKind::Record(cols),
                Complex::Array(t) => TypeKind::Array(t),
                Complex::Set(t) => TypeKind::Set(t),
                Complex::Map(k, v) => TypeKind::Map(k, v),
                Complex::Union(ts) => TypeKind::Union(ts),
            },
        }
    }

    pub fn as_primitive(&self) -> Option<PrimitiveType> {
        match &self.0 {
            Repr::Primitive(p) => Some(*p),
            Repr::Complex(_) => None,
        }
    }

    pub fn is_primitive(&self, p: PrimitiveType) -> bool {
        self.as_primitive() == Some(p)
    }

    pub fn columns(&self) -> Option<&[Column]> {
        match self.kind() {
            TypeKind::Record(cols) => Some(cols),
            _ => None,
        }
    }

    pub fn is_record(&self) -> bool {
        self.columns().is_some()
    }

    /// Index of the named column of a record type.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns()?.iter().position(|c| c.name == name)
    }

    /// The element type of an array or set.
    pub fn inner(&self) -> Option<&Type> {
        match self.kind() {
            TypeKind::Array(t) | TypeKind::Set(t) => Some(t),
            _ => None,
        }
    }

    /// Whether element bodies of this type are containers rather than primitives.
    pub fn is_container(&self) -> bool {
        self.as_primitive().is_none()
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (Repr::Primitive(a), Repr::Primitive(b)) => a == b,
            (Repr::Complex(a), Repr::Complex(b)) => a.id == b.id && a.context == b.context,
            _ => false,
        }
    }
}

impl Eq for Type {}

impl Hash for Type {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
        self.context().hash(state);
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.kind() {
            TypeKind::Primitive(p) => Display::fmt(&p, f),
            TypeKind::Record(cols) => {
                f.write_str("{")?;
                for (i, col) in cols.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}:{}", col.name, col.typ)?;
                }
                f.write_str("}")
            }
            TypeKind::Array(t) => write!(f, "[{t}]"),
            TypeKind::Set(t) => write!(f, "|[{t}]|"),
            TypeKind::Map(k, v) => write!(f, "|{{{k}:{v}}}|"),
            TypeKind::Union(ts) => {
                f.write_str("(")?;
                for (i, t) in ts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    Display::fmt(t, f)?;
                }
                f.write_str(")")
            }
        }
    }
}
