#![forbid(unsafe_code)]

use mosaic_ir::{
    flatten, unflatten, AbstractRef, AbstractValue, Atom, DType, HasAval, Index, NdIndexer,
    OperandTree, Param, Params, Primitive, TreeDef,
};
use tracing::debug;

use crate::error::{PrimitiveError, Result};
use crate::registry::RegistryBuilder;
use crate::trace::TraceContext;

pub const DMA_START: Primitive = Primitive::multi("dma_start");
pub const DMA_WAIT: Primitive = Primitive::multi("dma_wait");

/// A pending asynchronous copy.
///
/// Holds the flattened `(semaphore, buffer, region)` operands that the matching
/// `dma_wait` needs. `wait` consumes the future, so a future can be waited on
/// at most once.
#[must_use = "the copied region must not be touched until the DMA future is waited on"]
#[derive(Debug)]
pub struct DmaFuture {
    flat_args: Vec<Atom>,
    tree: TreeDef,
}

/// A future's operands rebuilt into their original arrangement.
#[derive(Clone, Debug, PartialEq)]
pub struct WaitOperands {
    pub semaphore: Atom,
    pub buffer: Atom,
    pub region: NdIndexer<Atom>,
}

impl DmaFuture {
    fn new(semaphore: Atom, buffer: Atom, region: NdIndexer<Atom>) -> Self {
        let (flat_args, tree) = flatten(OperandTree::tuple([
            OperandTree::Leaf(semaphore),
            OperandTree::Leaf(buffer),
            OperandTree::Indexer(region),
        ]));
        Self { flat_args, tree }
    }

    pub fn operands(&self) -> &[Atom] {
        &self.flat_args
    }

    pub fn tree(&self) -> &TreeDef {
        &self.tree
    }

    pub fn wait_operands(&self) -> Result<WaitOperands> {
        let tree = unflatten(&self.tree, self.flat_args.clone())?;
        let malformed = || PrimitiveError::trace("DMA future operands do not form (semaphore, buffer, region)");
        let [sem, buf, region] = take::<3, _>(tree).ok_or_else(malformed)?;
        Ok(WaitOperands {
            semaphore: sem.into_leaf().ok_or_else(malformed)?,
            buffer: buf.into_leaf().ok_or_else(malformed)?,
            region: region.into_indexer().ok_or_else(malformed)?,
        })
    }

    /// Emit the `dma_wait` matching the start that produced this future.
    pub fn wait(self, cx: &mut TraceContext<'_>) -> Result<()> {
        debug!(operands = self.flat_args.len(), "dma wait");
        cx.bind(
            DMA_WAIT,
            self.flat_args,
            Params::new().with("tree", Param::Tree(self.tree)),
        )?;
        Ok(())
    }
}

fn take<const N: usize, L>(tree: OperandTree<L>) -> Option<[OperandTree<L>; N]> {
    tree.into_tuple()?.try_into().ok()
}

fn region(what: &str, buffer: &Atom, indices: Vec<Index<Atom>>) -> Result<NdIndexer<Atom>> {
    let Some(r) = buffer.aval().as_buffer() else {
        return Err(PrimitiveError::validation(
            DMA_START.name,
            format!("{what} must be a buffer reference, got {}", buffer.aval()),
        ));
    };
    Ok(NdIndexer::from_indices_shape(indices, r.shape())?)
}

/// Start copying `src_ref[src_indices]` into `dst_ref[dst_indices]`, signalling `sem` on completion.
pub fn dma_start(
    cx: &mut TraceContext<'_>,
    src_ref: impl Into<Atom>,
    src_indices: Vec<Index<Atom>>,
    dst_ref: impl Into<Atom>,
    dst_indices: Vec<Index<Atom>>,
    sem: impl Into<Atom>,
) -> Result<DmaFuture> {
    let (src_ref, dst_ref, sem) = (src_ref.into(), dst_ref.into(), sem.into());
    let src_region = region("source", &src_ref, src_indices)?;
    let dst_region = region("destination", &dst_ref, dst_indices)?;

    let (flat_args, tree) = flatten(OperandTree::tuple([
        OperandTree::Leaf(src_ref),
        OperandTree::Indexer(src_region),
        OperandTree::Leaf(dst_ref.clone()),
        OperandTree::Indexer(dst_region.clone()),
        OperandTree::Leaf(sem.clone()),
        OperandTree::None,
        OperandTree::None,
    ]));
    debug!(operands = flat_args.len(), "dma start");
    cx.bind(DMA_START, flat_args, Params::new().with("tree", Param::Tree(tree)))?;

    Ok(DmaFuture::new(sem, dst_ref, dst_region))
}

/// Start a copy to another device.
///
/// `dst_sem` is signalled on the receiving device and `src_sem` on this one.
/// Returns `(send, recv)`: waiting on `send` means the source region may be
/// reused, waiting on `recv` means the destination region is populated.
#[allow(clippy::too_many_arguments)]
pub fn remote_dma_start(
    cx: &mut TraceContext<'_>,
    src_ref: impl Into<Atom>,
    src_indices: Vec<Index<Atom>>,
    dst_ref: impl Into<Atom>,
    dst_indices: Vec<Index<Atom>>,
    src_sem: impl Into<Atom>,
    dst_sem: impl Into<Atom>,
    device_id: impl Into<Atom>,
) -> Result<(DmaFuture, DmaFuture)> {
    let (src_ref, dst_ref) = (src_ref.into(), dst_ref.into());
    let (src_sem, dst_sem) = (src_sem.into(), dst_sem.into());
    let src_region = region("source", &src_ref, src_indices)?;
    let dst_region = region("destination", &dst_ref, dst_indices)?;

    let (flat_args, tree) = flatten(OperandTree::tuple([
        OperandTree::Leaf(src_ref.clone()),
        OperandTree::Indexer(src_region.clone()),
        OperandTree::Leaf(dst_ref.clone()),
        OperandTree::Indexer(dst_region.clone()),
        OperandTree::Leaf(dst_sem.clone()),
        OperandTree::Leaf(src_sem.clone()),
        OperandTree::Leaf(device_id.into()),
    ]));
    debug!(operands = flat_args.len(), "remote dma start");
    cx.bind(DMA_START, flat_args, Params::new().with("tree", Param::Tree(tree)))?;

    let send = DmaFuture::new(src_sem, src_ref, src_region);
    let recv = DmaFuture::new(dst_sem, dst_ref, dst_region);
    Ok((send, recv))
}

fn leaf(prim: Primitive, tree: OperandTree<AbstractValue>) -> Result<AbstractValue> {
    tree.into_leaf()
        .ok_or_else(|| PrimitiveError::validation(prim.name, "malformed operand tree"))
}

fn buffer(prim: Primitive, what: &str, aval: AbstractValue) -> Result<AbstractRef> {
    match aval {
        AbstractValue::Ref(r) => Ok(r),
        other => Err(PrimitiveError::validation(
            prim.name,
            format!("{what} must be a buffer reference, got {other}"),
        )),
    }
}

fn semaphore(prim: Primitive, what: &str, aval: &AbstractValue) -> Result<()> {
    if aval.as_semaphore().is_some() {
        return Ok(());
    }
    Err(PrimitiveError::validation(
        prim.name,
        format!("{what} must be a semaphore, got {aval}"),
    ))
}

/// Re-validate a region against its buffer and return the region's shape.
fn region_shape(
    prim: Primitive,
    buf: &AbstractRef,
    tree: OperandTree<AbstractValue>,
) -> Result<Vec<usize>> {
    let ix = tree
        .into_indexer()
        .ok_or_else(|| PrimitiveError::validation(prim.name, "malformed operand tree"))?;
    if ix.shape != buf.shape() {
        return Err(PrimitiveError::validation(
            prim.name,
            format!(
                "region was built for shape {:?} but the buffer has shape {:?}",
                ix.shape,
                buf.shape()
            ),
        ));
    }
    Ok(NdIndexer::from_indices_shape(ix.indices, buf.shape())?.region_shape())
}

fn dma_start_abstract_eval(avals: &[AbstractValue], params: &Params) -> Result<Vec<AbstractValue>> {
    let tree = params
        .tree("tree")
        .ok_or_else(|| PrimitiveError::configuration("dma_start is missing its 'tree' parameter"))?;
    let [src, src_ix, dst, dst_ix, sem, src_sem, device_id] =
        take::<7, _>(unflatten(tree, avals.to_vec())?)
            .ok_or_else(|| PrimitiveError::validation(DMA_START.name, "malformed operand tree"))?;

    let src = buffer(DMA_START, "source", leaf(DMA_START, src)?)?;
    let dst = buffer(DMA_START, "destination", leaf(DMA_START, dst)?)?;
    let src_shape = region_shape(DMA_START, &src, src_ix)?;
    let dst_shape = region_shape(DMA_START, &dst, dst_ix)?;
    if src_shape != dst_shape || src.dtype() != dst.dtype() {
        return Err(PrimitiveError::validation(
            DMA_START.name,
            format!(
                "source region {}{:?} does not match destination region {}{:?}",
                src.dtype(),
                src_shape,
                dst.dtype(),
                dst_shape
            ),
        ));
    }
    semaphore(DMA_START, "DMA semaphore", &leaf(DMA_START, sem)?)?;

    match (src_sem, device_id) {
        (OperandTree::None, OperandTree::None) => {}
        (OperandTree::Leaf(src_sem), OperandTree::Leaf(device_id)) => {
            semaphore(DMA_START, "source semaphore", &src_sem)?;
            if !device_id.is_scalar_of(DType::I32) {
                return Err(PrimitiveError::validation(
                    DMA_START.name,
                    format!("`device_id` must be an int32 value, got {device_id}"),
                ));
            }
        }
        _ => {
            return Err(PrimitiveError::validation(
                DMA_START.name,
                "a remote copy needs both a source semaphore and a device id",
            ))
        }
    }
    Ok(Vec::new())
}

fn dma_wait_abstract_eval(avals: &[AbstractValue], params: &Params) -> Result<Vec<AbstractValue>> {
    let tree = params
        .tree("tree")
        .ok_or_else(|| PrimitiveError::configuration("dma_wait is missing its 'tree' parameter"))?;
    let [sem, buf, ix] = take::<3, _>(unflatten(tree, avals.to_vec())?)
        .ok_or_else(|| PrimitiveError::validation(DMA_WAIT.name, "malformed operand tree"))?;
    semaphore(DMA_WAIT, "DMA semaphore", &leaf(DMA_WAIT, sem)?)?;
    let buf = buffer(DMA_WAIT, "waited buffer", leaf(DMA_WAIT, buf)?)?;
    region_shape(DMA_WAIT, &buf, ix)?;
    Ok(Vec::new())
}

pub(crate) fn register(b: &mut RegistryBuilder) -> Result<()> {
    b.def_abstract_eval(DMA_START, dma_start_abstract_eval)?
        .def_abstract_eval(DMA_WAIT, dma_wait_abstract_eval)?;
    Ok(())
}
