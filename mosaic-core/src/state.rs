#![forbid(unsafe_code)]

//! Loads and stores on buffer references. These are the primitives that carry
//! read/write effects, which `run_scoped` confines to their scope.

use mosaic_ir::{
    flatten, unflatten, AbstractValue, Atom, Effect, EffectSet, HasAval, Index, NdIndexer,
    OperandTree, Param, Params, Primitive, ShapedArray, Var,
};

use crate::error::{PrimitiveError, Result};
use crate::registry::RegistryBuilder;
use crate::trace::TraceContext;

pub const GET: Primitive = Primitive::single("get");
pub const SWAP: Primitive = Primitive::single("swap");

fn indexed(prim: Primitive, buffer: Atom, indices: Vec<Index<Atom>>) -> Result<OperandTree<Atom>> {
    let Some(r) = buffer.aval().as_buffer() else {
        return Err(PrimitiveError::validation(
            prim.name,
            format!("expected a buffer reference, got {}", buffer.aval()),
        ));
    };
    let region = NdIndexer::from_indices_shape(indices, r.shape())?;
    Ok(OperandTree::tuple([OperandTree::Leaf(buffer), OperandTree::Indexer(region)]))
}

/// Read `buffer[indices]`.
pub fn get(cx: &mut TraceContext<'_>, buffer: impl Into<Atom>, indices: Vec<Index<Atom>>) -> Result<Var> {
    let (flat, tree) = flatten(indexed(GET, buffer.into(), indices)?);
    cx.bind_single(GET, flat, Params::new().with("tree", Param::Tree(tree)))
}

/// Write `value` into `buffer[indices]` and return the previous contents.
pub fn swap(
    cx: &mut TraceContext<'_>,
    buffer: impl Into<Atom>,
    indices: Vec<Index<Atom>>,
    value: impl Into<Atom>,
) -> Result<Var> {
    let OperandTree::Tuple(mut parts) = indexed(SWAP, buffer.into(), indices)? else {
        return Err(PrimitiveError::trace("indexed operands are always a tuple"));
    };
    parts.push(OperandTree::Leaf(value.into()));
    let (flat, tree) = flatten(OperandTree::Tuple(parts));
    cx.bind_single(SWAP, flat, Params::new().with("tree", Param::Tree(tree)))
}

/// [`swap`] without the old value.
pub fn set(
    cx: &mut TraceContext<'_>,
    buffer: impl Into<Atom>,
    indices: Vec<Index<Atom>>,
    value: impl Into<Atom>,
) -> Result<()> {
    swap(cx, buffer, indices, value)?;
    Ok(())
}

/// The addressed region as an array value. The buffer is always flat operand 0.
fn region_aval(
    prim: Primitive,
    buf: OperandTree<AbstractValue>,
    ix: OperandTree<AbstractValue>,
) -> Result<ShapedArray> {
    let malformed = || PrimitiveError::validation(prim.name, "malformed operand tree");
    let buf = buf.into_leaf().ok_or_else(malformed)?;
    let ix = ix.into_indexer().ok_or_else(malformed)?;
    let Some(r) = buf.as_buffer() else {
        return Err(PrimitiveError::validation(
            prim.name,
            format!("expected a buffer reference, got {buf}"),
        ));
    };
    let region = NdIndexer::from_indices_shape(ix.indices, r.shape())?;
    Ok(ShapedArray::new(region.region_shape(), r.dtype()))
}

fn unflatten_parts<const N: usize>(
    prim: Primitive,
    avals: &[AbstractValue],
    params: &Params,
) -> Result<[OperandTree<AbstractValue>; N]> {
    let tree = params.tree("tree").ok_or_else(|| {
        PrimitiveError::configuration(format!("{} is missing its 'tree' parameter", prim.name))
    })?;
    unflatten(tree, avals.to_vec())?
        .into_tuple()
        .and_then(|parts| parts.try_into().ok())
        .ok_or_else(|| PrimitiveError::validation(prim.name, "malformed operand tree"))
}

fn get_abstract_eval(avals: &[AbstractValue], params: &Params) -> Result<(Vec<AbstractValue>, EffectSet)> {
    let [buf, ix] = unflatten_parts(GET, avals, params)?;
    let out = region_aval(GET, buf, ix)?;
    Ok((vec![AbstractValue::Array(out)], [Effect::read(0)].into_iter().collect()))
}

fn swap_abstract_eval(avals: &[AbstractValue], params: &Params) -> Result<(Vec<AbstractValue>, EffectSet)> {
    let [buf, ix, value] = unflatten_parts(SWAP, avals, params)?;
    let out = region_aval(SWAP, buf, ix)?;
    let value = value
        .into_leaf()
        .ok_or_else(|| PrimitiveError::validation(SWAP.name, "malformed operand tree"))?;
    if value.as_array() != Some(&out) {
        return Err(PrimitiveError::validation(
            SWAP.name,
            format!("stored value {value} does not match the addressed region {out}"),
        ));
    }
    Ok((vec![AbstractValue::Array(out)], [Effect::write(0)].into_iter().collect()))
}

pub(crate) fn register(b: &mut RegistryBuilder) -> Result<()> {
    b.def_effectful_abstract_eval(GET, get_abstract_eval)?
        .def_effectful_abstract_eval(SWAP, swap_abstract_eval)?;
    Ok(())
}
