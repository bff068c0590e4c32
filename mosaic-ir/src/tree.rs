#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;

use crate::{Index, NdIndexer, Slice};

/// A nested operand structure. Flattening yields the leaves in order plus a
/// [`TreeDef`] that rebuilds the same structure from them.
#[derive(Clone, Debug, PartialEq)]
pub enum OperandTree<L> {
    Leaf(L),
    None,
    Tuple(Vec<OperandTree<L>>),
    Dict(BTreeMap<String, OperandTree<L>>),
    /// Static indices live in the tree definition; dynamic ones become leaves.
    Indexer(NdIndexer<L>),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexPattern {
    Int(i64),
    Slice(Slice),
    Full,
    Dynamic,
    DynamicSlice { size: usize },
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct IndexerDef {
    pub shape: Vec<usize>,
    pub pattern: Vec<IndexPattern>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeDef {
    Leaf,
    None,
    Tuple(Vec<TreeDef>),
    Dict(Vec<(String, TreeDef)>),
    Indexer(IndexerDef),
}

#[derive(Debug, Error, Diagnostic, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("tree expects {expected} leaves but only {got} were supplied")]
    #[diagnostic(code(mosaic::tree::too_few))]
    TooFewLeaves { expected: usize, got: usize },

    #[error("tree expects {expected} leaves but {got} were supplied")]
    #[diagnostic(code(mosaic::tree::too_many))]
    TooManyLeaves { expected: usize, got: usize },
}

impl<L> OperandTree<L> {
    pub fn leaf(l: L) -> Self {
        OperandTree::Leaf(l)
    }

    pub fn tuple(items: impl IntoIterator<Item = OperandTree<L>>) -> Self {
        OperandTree::Tuple(items.into_iter().collect())
    }

    pub fn into_leaf(self) -> Option<L> {
        match self {
            OperandTree::Leaf(l) => Some(l),
            _ => None,
        }
    }

    pub fn into_tuple(self) -> Option<Vec<OperandTree<L>>> {
        match self {
            OperandTree::Tuple(items) => Some(items),
            _ => None,
        }
    }

    pub fn into_indexer(self) -> Option<NdIndexer<L>> {
        match self {
            OperandTree::Indexer(ix) => Some(ix),
            _ => None,
        }
    }
}

impl TreeDef {
    pub fn num_leaves(&self) -> usize {
        match self {
            TreeDef::Leaf => 1,
            TreeDef::None => 0,
            TreeDef::Tuple(items) => items.iter().map(TreeDef::num_leaves).sum(),
            TreeDef::Dict(entries) => entries.iter().map(|(_, d)| d.num_leaves()).sum(),
            TreeDef::Indexer(def) => def
                .pattern
                .iter()
                .filter(|p| matches!(p, IndexPattern::Dynamic | IndexPattern::DynamicSlice { .. }))
                .count(),
        }
    }
}

pub fn flatten<L>(tree: OperandTree<L>) -> (Vec<L>, TreeDef) {
    let mut leaves = Vec::new();
    let def = flatten_into(tree, &mut leaves);
    (leaves, def)
}

fn flatten_into<L>(tree: OperandTree<L>, leaves: &mut Vec<L>) -> TreeDef {
    match tree {
        OperandTree::Leaf(l) => {
            leaves.push(l);
            TreeDef::Leaf
        }
        OperandTree::None => TreeDef::None,
        OperandTree::Tuple(items) => {
            TreeDef::Tuple(items.into_iter().map(|t| flatten_into(t, leaves)).collect())
        }
        OperandTree::Dict(entries) => TreeDef::Dict(
            entries
                .into_iter()
                .map(|(k, t)| (k, flatten_into(t, leaves)))
                .collect(),
        ),
        OperandTree::Indexer(ix) => {
            let pattern = ix
                .indices
                .into_iter()
                .map(|idx| match idx {
                    Index::Int(i) => IndexPattern::Int(i),
                    Index::Slice(s) => IndexPattern::Slice(s),
                    Index::Full => IndexPattern::Full,
                    Index::Dynamic(l) => {
                        leaves.push(l);
                        IndexPattern::Dynamic
                    }
                    Index::DynamicSlice { start, size } => {
                        leaves.push(start);
                        IndexPattern::DynamicSlice { size }
                    }
                })
                .collect();
            TreeDef::Indexer(IndexerDef {
                shape: ix.shape,
                pattern,
            })
        }
    }
}

pub fn unflatten<L>(def: &TreeDef, leaves: Vec<L>) -> Result<OperandTree<L>, TreeError> {
    let expected = def.num_leaves();
    if leaves.len() > expected {
        return Err(TreeError::TooManyLeaves {
            expected,
            got: leaves.len(),
        });
    }
    let got = leaves.len();
    let mut it = leaves.into_iter();
    unflatten_from(def, &mut it).ok_or(TreeError::TooFewLeaves { expected, got })
}

fn unflatten_from<L>(def: &TreeDef, it: &mut impl Iterator<Item = L>) -> Option<OperandTree<L>> {
    Some(match def {
        TreeDef::Leaf => OperandTree::Leaf(it.next()?),
        TreeDef::None => OperandTree::None,
        TreeDef::Tuple(items) => OperandTree::Tuple(
            items
                .iter()
                .map(|d| unflatten_from(d, it))
                .collect::<Option<Vec<_>>>()?,
        ),
        TreeDef::Dict(entries) => OperandTree::Dict(
            entries
                .iter()
                .map(|(k, d)| Some((k.clone(), unflatten_from(d, it)?)))
                .collect::<Option<BTreeMap<_, _>>>()?,
        ),
        TreeDef::Indexer(ix) => {
            let indices = ix
                .pattern
                .iter()
                .map(|p| {
                    Some(match p {
                        IndexPattern::Int(i) => Index::Int(*i),
                        IndexPattern::Slice(s) => Index::Slice(*s),
                        IndexPattern::Full => Index::Full,
                        IndexPattern::Dynamic => Index::Dynamic(it.next()?),
                        IndexPattern::DynamicSlice { size } => Index::DynamicSlice {
                            start: it.next()?,
                            size: *size,
                        },
                    })
                })
                .collect::<Option<Vec<_>>>()?;
            OperandTree::Indexer(NdIndexer {
                indices,
                shape: ix.shape.clone(),
            })
        }
    })
}

impl fmt::Display for TreeDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeDef::Leaf => f.write_str("*"),
            TreeDef::None => f.write_str("None"),
            TreeDef::Tuple(items) => {
                f.write_str("(")?;
                for (i, d) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{d}")?;
                }
                f.write_str(")")
            }
            TreeDef::Dict(entries) => {
                f.write_str("{")?;
                for (i, (k, d)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {d}")?;
                }
                f.write_str("}")
            }
            TreeDef::Indexer(ix) => {
                f.write_str("[")?;
                for (i, p) in ix.pattern.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    match p {
                        IndexPattern::Int(v) => write!(f, "{v}")?,
                        IndexPattern::Full => f.write_str(":")?,
                        IndexPattern::Slice(s) => {
                            let stop = s.start.saturating_add(s.size.saturating_mul(s.stride));
                            if s.stride == 1 {
                                write!(f, "{}:{}", s.start, stop)?
                            } else {
                                write!(f, "{}:{}:{}", s.start, stop, s.stride)?
                            }
                        }
                        IndexPattern::Dynamic => f.write_str("?")?,
                        IndexPattern::DynamicSlice { size } => write!(f, "?:+{size}")?,
                    }
                }
                f.write_str("]")
            }
        }
    }
}
