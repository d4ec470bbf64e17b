//! Type layout descriptors for marshaling values across a process boundary
//!
//! Every marshalable type implements [`Marshal`], which reports a
//! [`TypeShape`]. The [`TypeLayoutRegistry`] turns that shape into an
//! immutable [`TypeLayout`] once per type and caches it for the lifetime of
//! the registry. All later dispatch is a match on [`TypeCategory`].

mod registry;

pub use bytemuck;
pub use registry::TypeLayoutRegistry;

use crate::core::types::{Address, MemoryError, MemoryResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::mem;
use std::sync::Arc;

/// Primitive category of a marshalable type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeCategory {
    Boolean,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Character,
    /// Pointer-sized value whose bit pattern is itself an address
    Address,
    /// Blittable struct or fixed array, copied as one byte block
    Aggregate,
}

impl TypeCategory {
    /// Size in the local process, `None` for aggregates
    pub const fn fixed_size(&self) -> Option<usize> {
        match self {
            TypeCategory::Boolean | TypeCategory::I8 | TypeCategory::U8 => Some(1),
            TypeCategory::I16 | TypeCategory::U16 => Some(2),
            TypeCategory::I32 | TypeCategory::U32 | TypeCategory::F32 => Some(4),
            TypeCategory::Character => Some(mem::size_of::<char>()),
            TypeCategory::I64 | TypeCategory::U64 | TypeCategory::F64 => Some(8),
            TypeCategory::Address => Some(mem::size_of::<usize>()),
            TypeCategory::Aggregate => None,
        }
    }

    /// Whether arrays of this category can be moved with a single bulk copy
    pub const fn supports_bulk_copy(&self) -> bool {
        !matches!(self, TypeCategory::Address | TypeCategory::Aggregate)
    }

    /// Whether values of this category are addresses
    pub const fn is_address_sized(&self) -> bool {
        matches!(self, TypeCategory::Address)
    }
}

/// Cached, immutable description of how a type lives in memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeLayout {
    pub type_name: &'static str,
    pub category: TypeCategory,
    pub size: usize,
    pub is_address_sized: bool,
    pub fields: Vec<FieldLayout>,
}

/// Resolved field of an aggregate layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    pub name: &'static str,
    pub offset: usize,
    pub layout: Arc<TypeLayout>,
}

/// Resolver for a nested type, evaluated against the registry doing the resolving
pub type LayoutResolver = fn(&TypeLayoutRegistry) -> MemoryResult<Arc<TypeLayout>>;

/// Raw shape a type reports before validation
#[derive(Clone)]
pub enum TypeShape {
    Primitive(TypeCategory),
    Aggregate {
        size: usize,
        fields: Vec<FieldShape>,
    },
    Array {
        element: LayoutResolver,
        len: usize,
    },
}

/// Field declaration inside an aggregate shape
#[derive(Clone)]
pub struct FieldShape {
    pub name: &'static str,
    pub offset: usize,
    pub resolve: LayoutResolver,
}

impl fmt::Debug for FieldShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldShape")
            .field("name", &self.name)
            .field("offset", &self.offset)
            .finish()
    }
}

impl fmt::Debug for TypeShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeShape::Primitive(category) => f.debug_tuple("Primitive").field(category).finish(),
            TypeShape::Aggregate { size, fields } => f
                .debug_struct("Aggregate")
                .field("size", size)
                .field("fields", fields)
                .finish(),
            TypeShape::Array { len, .. } => f.debug_struct("Array").field("len", len).finish(),
        }
    }
}

/// A type that can be converted to and from raw bytes in a target process
pub trait Marshal: Sized + Send + Sync + 'static {
    /// Describes the type's binary shape
    fn shape() -> TypeShape;

    /// Builds a value from exactly `layout.size` bytes in native byte order
    fn decode(bytes: &[u8]) -> MemoryResult<Self>;

    /// Appends exactly `layout.size` bytes in native byte order
    fn encode(&self, out: &mut Vec<u8>);
}

fn exact<const N: usize>(bytes: &[u8], type_name: &str) -> MemoryResult<[u8; N]> {
    bytes.try_into().map_err(|_| {
        MemoryError::InvalidValueType(format!(
            "{} needs {} bytes, got {}",
            type_name,
            N,
            bytes.len()
        ))
    })
}

macro_rules! impl_marshal_number {
    ($($ty:ty => $category:ident),* $(,)?) => {
        $(
            impl Marshal for $ty {
                fn shape() -> TypeShape {
                    TypeShape::Primitive(TypeCategory::$category)
                }

                fn decode(bytes: &[u8]) -> MemoryResult<Self> {
                    Ok(<$ty>::from_ne_bytes(exact(bytes, stringify!($ty))?))
                }

                fn encode(&self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_ne_bytes());
                }
            }
        )*
    };
}

impl_marshal_number!(
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
);

impl Marshal for bool {
    fn shape() -> TypeShape {
        TypeShape::Primitive(TypeCategory::Boolean)
    }

    fn decode(bytes: &[u8]) -> MemoryResult<Self> {
        let [byte] = exact::<1>(bytes, "bool")?;
        Ok(byte != 0)
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.push(u8::from(*self));
    }
}

impl Marshal for char {
    fn shape() -> TypeShape {
        TypeShape::Primitive(TypeCategory::Character)
    }

    fn decode(bytes: &[u8]) -> MemoryResult<Self> {
        let raw = u32::from_ne_bytes(exact(bytes, "char")?);
        char::from_u32(raw).ok_or_else(|| {
            MemoryError::InvalidValueType(format!("{:#x} is not a Unicode scalar value", raw))
        })
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&u32::from(*self).to_ne_bytes());
    }
}

impl Marshal for Address {
    fn shape() -> TypeShape {
        TypeShape::Primitive(TypeCategory::Address)
    }

    fn decode(bytes: &[u8]) -> MemoryResult<Self> {
        Ok(Address::new(usize::from_ne_bytes(exact(bytes, "Address")?)))
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.as_usize().to_ne_bytes());
    }
}

impl<T: Marshal, const N: usize> Marshal for [T; N] {
    fn shape() -> TypeShape {
        TypeShape::Array {
            element: |registry| registry.resolve::<T>(),
            len: N,
        }
    }

    fn decode(bytes: &[u8]) -> MemoryResult<Self> {
        if N == 0 || bytes.len() % N != 0 {
            return Err(MemoryError::InvalidValueType(format!(
                "cannot split {} bytes into {} elements",
                bytes.len(),
                N
            )));
        }
        let stride = bytes.len() / N;
        let elements = bytes
            .chunks_exact(stride)
            .map(T::decode)
            .collect::<MemoryResult<Vec<T>>>()?;
        elements.try_into().map_err(|_| {
            MemoryError::InvalidValueType(format!("expected {} array elements", N))
        })
    }

    fn encode(&self, out: &mut Vec<u8>) {
        for element in self {
            element.encode(out);
        }
    }
}

/// Decodes a plain-old-data aggregate from an unaligned byte block
pub fn decode_pod<T: bytemuck::Pod>(bytes: &[u8]) -> MemoryResult<T> {
    if bytes.len() != mem::size_of::<T>() {
        return Err(MemoryError::InvalidValueType(format!(
            "{} needs {} bytes, got {}",
            std::any::type_name::<T>(),
            mem::size_of::<T>(),
            bytes.len()
        )));
    }
    Ok(bytemuck::pod_read_unaligned(bytes))
}

/// Implements [`Marshal`] for a `#[repr(C)]` struct deriving `bytemuck::Pod`.
///
/// Every field must be listed with its type; the registry rejects the struct
/// if any field type cannot itself be marshaled or lies outside the struct.
///
/// ```
/// use remote_marshal::blittable;
/// use bytemuck::{Pod, Zeroable};
///
/// #[repr(C)]
/// #[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
/// struct Vector3 {
///     x: f32,
///     y: f32,
///     z: f32,
/// }
///
/// blittable!(Vector3 { x: f32, y: f32, z: f32 });
/// ```
#[macro_export]
macro_rules! blittable {
    ($ty:ident { $($field:ident : $fty:ty),+ $(,)? }) => {
        impl $crate::layout::Marshal for $ty {
            fn shape() -> $crate::layout::TypeShape {
                $crate::layout::TypeShape::Aggregate {
                    size: ::core::mem::size_of::<$ty>(),
                    fields: vec![$(
                        $crate::layout::FieldShape {
                            name: stringify!($field),
                            offset: ::core::mem::offset_of!($ty, $field),
                            resolve: |registry| registry.resolve::<$fty>(),
                        }
                    ),+],
                }
            }

            fn decode(bytes: &[u8]) -> $crate::MemoryResult<Self> {
                $crate::layout::decode_pod::<$ty>(bytes)
            }

            fn encode(&self, out: &mut Vec<u8>) {
                out.extend_from_slice($crate::layout::bytemuck::bytes_of(self));
            }
        }
    };
}
