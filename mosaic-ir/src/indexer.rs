#![forbid(unsafe_code)]

use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;

use crate::HasAval;

/// A static strided range along one dimension: `start, start+stride, ...` (`size` elements).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Slice {
    pub start: usize,
    pub size: usize,
    pub stride: usize,
}

impl Slice {
    pub fn new(start: usize, size: usize) -> Self {
        Self {
            start,
            size,
            stride: 1,
        }
    }

    pub fn strided(start: usize, size: usize, stride: usize) -> Self {
        Self { start, size, stride }
    }

    pub fn full(dim: usize) -> Self {
        Self::new(0, dim)
    }

    /// Index of the last element touched, if any.
    fn last(&self) -> Option<usize> {
        if self.size == 0 {
            return None;
        }
        (self.size - 1)
            .checked_mul(self.stride)
            .and_then(|off| off.checked_add(self.start))
            .or(Some(usize::MAX))
    }
}

/// One per-dimension index expression. Dynamic forms carry a traced scalar.
#[derive(Clone, Debug, PartialEq)]
pub enum Index<L> {
    Int(i64),
    Slice(Slice),
    Full,
    Dynamic(L),
    DynamicSlice { start: L, size: usize },
}

#[derive(Debug, Error, Diagnostic, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("too many indices: got {got} for a buffer of rank {rank}")]
    #[diagnostic(code(mosaic::index::rank))]
    TooManyIndices { got: usize, rank: usize },

    #[error("index {index} is out of bounds for dimension {dim} of size {size}")]
    #[diagnostic(code(mosaic::index::bounds))]
    OutOfBounds { dim: usize, index: i64, size: usize },

    #[error("slice start={start} size={size} stride={stride} does not fit dimension {dim} of size {extent}")]
    #[diagnostic(code(mosaic::index::slice))]
    SliceOutOfBounds {
        dim: usize,
        start: usize,
        size: usize,
        stride: usize,
        extent: usize,
    },

    #[error("slice along dimension {dim} has stride 0")]
    #[diagnostic(code(mosaic::index::stride))]
    ZeroStride { dim: usize },

    #[error("dynamic index along dimension {dim} must be an integer scalar, got {aval}")]
    #[diagnostic(code(mosaic::index::dynamic))]
    BadDynamicIndex { dim: usize, aval: String },
}

/// A validated region of a buffer: one index per dimension of `shape`.
#[derive(Clone, Debug, PartialEq)]
pub struct NdIndexer<L> {
    pub indices: Vec<Index<L>>,
    pub shape: Vec<usize>,
}

impl<L> NdIndexer<L> {
    /// Shape of the addressed region. Integer and dynamic scalar indices drop their dimension.
    pub fn region_shape(&self) -> Vec<usize> {
        self.indices
            .iter()
            .enumerate()
            .filter_map(|(dim, idx)| match idx {
                Index::Int(_) | Index::Dynamic(_) => None,
                Index::Slice(s) => Some(s.size),
                Index::DynamicSlice { size, .. } => Some(*size),
                Index::Full => self.shape.get(dim).copied(),
            })
            .collect()
    }

    pub fn dynamic_leaves(&self) -> impl Iterator<Item = &L> {
        self.indices.iter().filter_map(|idx| match idx {
            Index::Dynamic(l) | Index::DynamicSlice { start: l, .. } => Some(l),
            _ => None,
        })
    }
}

impl<L: HasAval> NdIndexer<L> {
    /// Validate `indices` against `shape`. Missing trailing indices select the whole dimension.
    pub fn from_indices_shape(indices: Vec<Index<L>>, shape: &[usize]) -> Result<Self, IndexError> {
        if indices.len() > shape.len() {
            return Err(IndexError::TooManyIndices {
                got: indices.len(),
                rank: shape.len(),
            });
        }

        let mut given = indices.into_iter();
        let mut out = Vec::with_capacity(shape.len());
        for (dim, &extent) in shape.iter().enumerate() {
            let idx = given.next().unwrap_or(Index::Full);
            out.push(normalize(idx, dim, extent)?);
        }

        Ok(Self {
            indices: out,
            shape: shape.to_vec(),
        })
    }
}

fn normalize<L: HasAval>(idx: Index<L>, dim: usize, extent: usize) -> Result<Index<L>, IndexError> {
    match idx {
        Index::Int(i) => {
            let n = extent as i64;
            let j = if i < 0 { i + n } else { i };
            if j < 0 || j >= n {
                return Err(IndexError::OutOfBounds {
                    dim,
                    index: i,
                    size: extent,
                });
            }
            Ok(Index::Int(j))
        }
        Index::Full => Ok(Index::Slice(Slice::full(extent))),
        Index::Slice(s) => {
            if s.stride == 0 {
                return Err(IndexError::ZeroStride { dim });
            }
            let fits = match s.last() {
                Some(last) => last < extent,
                None => s.start <= extent,
            };
            if !fits {
                return Err(IndexError::SliceOutOfBounds {
                    dim,
                    start: s.start,
                    size: s.size,
                    stride: s.stride,
                    extent,
                });
            }
            Ok(Index::Slice(s))
        }
        Index::Dynamic(l) => {
            check_dynamic(&l, dim)?;
            Ok(Index::Dynamic(l))
        }
        Index::DynamicSlice { start, size } => {
            check_dynamic(&start, dim)?;
            if size > extent {
                return Err(IndexError::SliceOutOfBounds {
                    dim,
                    start: 0,
                    size,
                    stride: 1,
                    extent,
                });
            }
            Ok(Index::DynamicSlice { start, size })
        }
    }
}

fn check_dynamic<L: HasAval>(leaf: &L, dim: usize) -> Result<(), IndexError> {
    let aval = leaf.aval();
    let ok = aval
        .as_array()
        .is_some_and(|a| a.is_scalar() && a.dtype.is_integer());
    if ok {
        Ok(())
    } else {
        Err(IndexError::BadDynamicIndex {
            dim,
            aval: aval.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AbstractValue, DType};

    fn idx(i: Vec<Index<AbstractValue>>, shape: &[usize]) -> Result<NdIndexer<AbstractValue>, IndexError> {
        NdIndexer::from_indices_shape(i, shape)
    }

    #[test]
    fn missing_trailing_indices_become_full_slices() {
        let ix = idx(vec![Index::Int(1)], &[4, 8, 128]).expect("valid");
        assert_eq!(ix.indices.len(), 3);
        assert_eq!(ix.region_shape(), vec![8, 128]);
        assert_eq!(ix.indices[1], Index::Slice(Slice::full(8)));
    }

    #[test]
    fn negative_int_counts_from_end() {
        let ix = idx(vec![Index::Int(-1)], &[4]).expect("valid");
        assert_eq!(ix.indices[0], Index::Int(3));
        assert!(ix.region_shape().is_empty());
    }

    #[test]
    fn out_of_bounds_int_is_rejected() {
        let err = idx(vec![Index::Int(4)], &[4]).expect_err("oob");
        assert_eq!(
            err,
            IndexError::OutOfBounds {
                dim: 0,
                index: 4,
                size: 4
            }
        );
    }

    #[test]
    fn strided_slice_must_fit() {
        assert!(idx(vec![Index::Slice(Slice::strided(1, 4, 2))], &[8]).is_ok());
        let err = idx(vec![Index::Slice(Slice::strided(1, 4, 2))], &[7]).expect_err("overrun");
        assert!(matches!(err, IndexError::SliceOutOfBounds { dim: 0, .. }));
        let err = idx(vec![Index::Slice(Slice::strided(0, 2, 0))], &[7]).expect_err("stride");
        assert_eq!(err, IndexError::ZeroStride { dim: 0 });
    }

    #[test]
    fn too_many_indices() {
        let err = idx(vec![Index::Int(0), Index::Int(0)], &[3]).expect_err("rank");
        assert_eq!(err, IndexError::TooManyIndices { got: 2, rank: 1 });
    }

    #[test]
    fn dynamic_indices_must_be_integer_scalars() {
        let good = AbstractValue::scalar(DType::I32);
        let ix = idx(
            vec![
                Index::Dynamic(good.clone()),
                Index::DynamicSlice {
                    start: good,
                    size: 16,
                },
            ],
            &[4, 64],
        )
        .expect("valid");
        assert_eq!(ix.region_shape(), vec![16]);
        assert_eq!(ix.dynamic_leaves().count(), 2);

        let err = idx(vec![Index::Dynamic(AbstractValue::scalar(DType::F32))], &[4]).expect_err("float");
        assert!(matches!(err, IndexError::BadDynamicIndex { dim: 0, .. }));
        let err = idx(vec![Index::Dynamic(AbstractValue::array([2], DType::I32))], &[4]).expect_err("vector");
        assert!(matches!(err, IndexError::BadDynamicIndex { dim: 0, .. }));
    }
}
