//! Memoized type layout resolution

use super::{FieldLayout, FieldShape, Marshal, TypeCategory, TypeLayout, TypeShape};
use crate::core::types::{MemoryError, MemoryResult};
use lazy_static::lazy_static;
use parking_lot::RwLock;
use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

lazy_static! {
    static ref GLOBAL_REGISTRY: TypeLayoutRegistry = TypeLayoutRegistry::new();
}

/// Cache of resolved layouts keyed by Rust type
///
/// Lookups take a shared lock. A miss computes the layout outside any lock
/// and inserts it with `entry().or_insert`, so racing first uses of the same
/// type all return the one descriptor that won the insert.
pub struct TypeLayoutRegistry {
    cache: RwLock<HashMap<TypeId, Arc<TypeLayout>>>,
}

impl TypeLayoutRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        TypeLayoutRegistry {
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// The process-wide registry used when no explicit one is supplied
    pub fn global() -> &'static TypeLayoutRegistry {
        &GLOBAL_REGISTRY
    }

    /// Resolve the layout of `T`, computing and caching it on first use
    pub fn resolve<T: Marshal>(&self) -> MemoryResult<Arc<TypeLayout>> {
        let id = TypeId::of::<T>();
        if let Some(layout) = self.cache.read().get(&id) {
            return Ok(Arc::clone(layout));
        }

        let computed = Arc::new(self.compute(type_name::<T>(), T::shape())?);
        trace!(
            type_name = computed.type_name,
            size = computed.size,
            "Resolved type layout"
        );

        let mut cache = self.cache.write();
        Ok(Arc::clone(cache.entry(id).or_insert(computed)))
    }

    /// Whether `T` has already been resolved
    pub fn contains<T: Marshal>(&self) -> bool {
        self.cache.read().contains_key(&TypeId::of::<T>())
    }

    /// Number of cached layouts
    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    /// Whether nothing has been resolved yet
    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }

    fn compute(&self, type_name: &'static str, shape: TypeShape) -> MemoryResult<TypeLayout> {
        match shape {
            TypeShape::Primitive(TypeCategory::Aggregate) => Err(MemoryError::unsupported_type(
                type_name,
                "aggregates must describe their fields",
            )),
            TypeShape::Primitive(category) => {
                let size = category.fixed_size().ok_or_else(|| {
                    MemoryError::unsupported_type(type_name, "category has no fixed size")
                })?;
                Ok(TypeLayout {
                    type_name,
                    category,
                    size,
                    is_address_sized: category.is_address_sized(),
                    fields: Vec::new(),
                })
            }
            TypeShape::Aggregate { size, fields } => self.compute_aggregate(type_name, size, fields),
            TypeShape::Array { element, len } => {
                if len == 0 {
                    return Err(MemoryError::unsupported_type(type_name, "zero-length array"));
                }
                let element = element(self)?;
                let size = element.size.checked_mul(len).ok_or_else(|| {
                    MemoryError::unsupported_type(type_name, "array size overflows")
                })?;
                let fields = (0..len)
                    .map(|index| FieldLayout {
                        name: "element",
                        offset: index * element.size,
                        layout: Arc::clone(&element),
                    })
                    .collect();
                Ok(TypeLayout {
                    type_name,
                    category: TypeCategory::Aggregate,
                    size,
                    is_address_sized: false,
                    fields,
                })
            }
        }
    }

    fn compute_aggregate(
        &self,
        type_name: &'static str,
        size: usize,
        shapes: Vec<FieldShape>,
    ) -> MemoryResult<TypeLayout> {
        if size == 0 {
            return Err(MemoryError::unsupported_type(type_name, "zero-sized aggregate"));
        }
        if shapes.is_empty() {
            return Err(MemoryError::unsupported_type(type_name, "aggregate has no fields"));
        }

        let mut fields = Vec::with_capacity(shapes.len());
        for shape in shapes {
            let layout = (shape.resolve)(self).map_err(|err| {
                MemoryError::unsupported_type(
                    type_name,
                    format!("field `{}` is not marshalable: {}", shape.name, err),
                )
            })?;
            let end = shape.offset.checked_add(layout.size).unwrap_or(usize::MAX);
            if end > size {
                return Err(MemoryError::unsupported_type(
                    type_name,
                    format!(
                        "field `{}` spans {}..{} outside {} bytes",
                        shape.name, shape.offset, end, size
                    ),
                ));
            }
            fields.push(FieldLayout {
                name: shape.name,
                offset: shape.offset,
                layout,
            });
        }

        fields.sort_by_key(|field| field.offset);
        for pair in fields.windows(2) {
            if pair[0].offset + pair[0].layout.size > pair[1].offset {
                return Err(MemoryError::unsupported_type(
                    type_name,
                    format!("fields `{}` and `{}` overlap", pair[0].name, pair[1].name),
                ));
            }
        }

        Ok(TypeLayout {
            type_name,
            category: TypeCategory::Aggregate,
            size,
            is_address_sized: false,
            fields,
        })
    }
}

impl Default for TypeLayoutRegistry {
    fn default() -> Self {
        Self::new()
    }
}
