#![forbid(unsafe_code)]

use std::fmt;

use serde::Serialize;

use crate::DType;

/// Shape and element type of an array value. Carries no data.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ShapedArray {
    pub shape: Vec<usize>,
    pub dtype: DType,
}

impl ShapedArray {
    pub fn new(shape: impl Into<Vec<usize>>, dtype: DType) -> Self {
        Self {
            shape: shape.into(),
            dtype,
        }
    }

    pub fn scalar(dtype: DType) -> Self {
        Self {
            shape: Vec::new(),
            dtype,
        }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn is_scalar(&self) -> bool {
        self.shape.is_empty()
    }
}

impl fmt::Display for ShapedArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims = self
            .shape
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(",");
        write!(f, "{}[{}]", self.dtype, dims)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MemorySpace {
    Any,
    Vmem,
    Smem,
}

impl fmt::Display for MemorySpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MemorySpace::Any => "any",
            MemorySpace::Vmem => "vmem",
            MemorySpace::Smem => "smem",
        })
    }
}

/// A mutable buffer living in some memory space.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct AbstractRef {
    pub inner: ShapedArray,
    pub memory_space: MemorySpace,
}

impl AbstractRef {
    pub fn shape(&self) -> &[usize] {
        &self.inner.shape
    }

    pub fn dtype(&self) -> DType {
        self.inner.dtype
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SemaphoreKind {
    Regular,
    Dma,
    Barrier,
}

impl fmt::Display for SemaphoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SemaphoreKind::Regular => "REGULAR",
            SemaphoreKind::Dma => "DMA",
            SemaphoreKind::Barrier => "BARRIER",
        })
    }
}

/// A synchronization counter. Its count is never visible at trace time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct AbstractSemaphore {
    pub kind: SemaphoreKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbstractValue {
    Array(ShapedArray),
    Ref(AbstractRef),
    Semaphore(AbstractSemaphore),
}

impl AbstractValue {
    pub fn array(shape: impl Into<Vec<usize>>, dtype: DType) -> Self {
        AbstractValue::Array(ShapedArray::new(shape, dtype))
    }

    pub fn scalar(dtype: DType) -> Self {
        AbstractValue::Array(ShapedArray::scalar(dtype))
    }

    pub fn buffer(shape: impl Into<Vec<usize>>, dtype: DType, memory_space: MemorySpace) -> Self {
        AbstractValue::Ref(AbstractRef {
            inner: ShapedArray::new(shape, dtype),
            memory_space,
        })
    }

    pub fn semaphore(kind: SemaphoreKind) -> Self {
        AbstractValue::Semaphore(AbstractSemaphore { kind })
    }

    /// Semaphores are rank-0 and have no element type.
    pub fn shape(&self) -> &[usize] {
        match self {
            AbstractValue::Array(a) => &a.shape,
            AbstractValue::Ref(r) => &r.inner.shape,
            AbstractValue::Semaphore(_) => &[],
        }
    }

    pub fn dtype(&self) -> Option<DType> {
        match self {
            AbstractValue::Array(a) => Some(a.dtype),
            AbstractValue::Ref(r) => Some(r.inner.dtype),
            AbstractValue::Semaphore(_) => None,
        }
    }

    pub fn as_array(&self) -> Option<&ShapedArray> {
        match self {
            AbstractValue::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&AbstractRef> {
        match self {
            AbstractValue::Ref(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_semaphore(&self) -> Option<&AbstractSemaphore> {
        match self {
            AbstractValue::Semaphore(s) => Some(s),
            _ => None,
        }
    }

    /// True for a rank-0 array of the given element type.
    pub fn is_scalar_of(&self, dtype: DType) -> bool {
        matches!(self, AbstractValue::Array(a) if a.is_scalar() && a.dtype == dtype)
    }
}

impl fmt::Display for AbstractValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbstractValue::Array(a) => write!(f, "{a}"),
            AbstractValue::Ref(r) => write!(f, "Ref{{{}}}<{}>", r.memory_space, r.inner),
            AbstractValue::Semaphore(s) => write!(f, "sem<{}>", s.kind),
        }
    }
}

/// Anything that stands in for a value during tracing.
pub trait HasAval {
    fn aval(&self) -> &AbstractValue;
}

impl HasAval for AbstractValue {
    fn aval(&self) -> &AbstractValue {
        self
    }
}
