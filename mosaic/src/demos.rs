#![forbid(unsafe_code)]

//! Small kernels traced by `mosaic demo`.

use clap::ValueEnum;
use mosaic_core::{
    device_id, dma_start, get, remote_dma_start, repeat, run_scoped, semaphore_signal,
    semaphore_wait, set, trace, ResourceType, Result, ScopedResources, TraceContext,
    DEFAULT_TRACE_LEVEL,
};
use mosaic_ir::{AbstractValue, DType, Index, MemorySpace, SubProgram};

const BLOCKS: usize = 4;
const TILE: [usize; 2] = [8, 128];

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Demo {
    /// One block from HBM into VMEM through a scoped DMA semaphore
    Copy,
    /// Prefetch block i+1 while block i is consumed, alternating two VMEM slots
    DoubleBuffer,
    /// Send a tile to another device and wait on both ends
    Remote,
    /// Scratch buffer and semaphore whose effects stay inside the scope
    Scoped,
    /// `repeat` along the minor axis; the only demo with a full lowering
    Repeat,
}

impl Demo {
    pub fn name(self) -> &'static str {
        match self {
            Demo::Copy => "copy",
            Demo::DoubleBuffer => "double-buffer",
            Demo::Remote => "remote",
            Demo::Scoped => "scoped",
            Demo::Repeat => "repeat",
        }
    }

    pub fn summary(self) -> &'static str {
        match self {
            Demo::Copy => "copy one block from HBM into VMEM",
            Demo::DoubleBuffer => "double-buffered block pipeline",
            Demo::Remote => "cross-device copy with send/recv futures",
            Demo::Scoped => "scoped scratch buffer and semaphore",
            Demo::Repeat => "repeat a value along an axis",
        }
    }

    pub fn build(self, cx: &mut TraceContext<'_>) -> Result<SubProgram> {
        match self {
            Demo::Copy => copy(cx),
            Demo::DoubleBuffer => double_buffer(cx),
            Demo::Remote => remote(cx),
            Demo::Scoped => scoped(cx),
            Demo::Repeat => repeat_demo(cx),
        }
    }
}

fn hbm(shape: &[usize]) -> AbstractValue {
    AbstractValue::buffer(shape.to_vec(), DType::F32, MemorySpace::Any)
}

fn vmem(shape: &[usize]) -> AbstractValue {
    AbstractValue::buffer(shape.to_vec(), DType::F32, MemorySpace::Vmem)
}

fn blocks() -> Vec<usize> {
    [BLOCKS].into_iter().chain(TILE).collect()
}

fn copy(cx: &mut TraceContext<'_>) -> Result<SubProgram> {
    cx.trace_program(&[hbm(&blocks()), vmem(&TILE)], |cx, args| {
        let (src, dst) = (&args[0], &args[1]);
        run_scoped(cx, ScopedResources::new().with(ResourceType::dma_semaphore()), |cx, res| {
            let fut = dma_start(cx, src, vec![Index::Int(1)], dst, vec![], res.get(0)?)?;
            fut.wait(cx)
        })?;
        Ok(Vec::new())
    })
}

fn double_buffer(cx: &mut TraceContext<'_>) -> Result<SubProgram> {
    cx.trace_program(&[hbm(&blocks()), hbm(&blocks())], |cx, args| {
        let (src, out) = (&args[0], &args[1]);
        let resources = ScopedResources::new()
            .with(ResourceType::vmem(TILE, DType::F32))
            .with(ResourceType::vmem(TILE, DType::F32))
            .with(ResourceType::dma_semaphore())
            .with(ResourceType::dma_semaphore());
        run_scoped(cx, resources, |cx, res| {
            let slots = [res.get(0)?, res.get(1)?];
            let sems = [res.get(2)?, res.get(3)?];

            let mut current = dma_start(cx, src, vec![Index::Int(0)], slots[0], vec![], sems[0])?;
            for step in 0..BLOCKS {
                let slot = step % 2;
                let block = step as i64;
                let next = if step + 1 < BLOCKS {
                    let other = 1 - slot;
                    Some(dma_start(cx, src, vec![Index::Int(block + 1)], slots[other], vec![], sems[other])?)
                } else {
                    None
                };
                current.wait(cx)?;
                trace(cx, format!("block {step}"), DEFAULT_TRACE_LEVEL, |cx| {
                    let tile = get(cx, slots[slot], vec![])?;
                    set(cx, out, vec![Index::Int(block)], &tile)
                })?;
                match next {
                    Some(f) => current = f,
                    None => break,
                }
            }
            Ok(())
        })?;
        Ok(Vec::new())
    })
}

fn remote(cx: &mut TraceContext<'_>) -> Result<SubProgram> {
    cx.trace_program(&[vmem(&TILE), vmem(&TILE)], |cx, args| {
        let (src, dst) = (&args[0], &args[1]);
        let resources = ScopedResources::new()
            .with_named("send", ResourceType::dma_semaphore())
            .with_named("recv", ResourceType::dma_semaphore())
            .with_named("ready", ResourceType::semaphore());
        run_scoped(cx, resources, |cx, res| {
            let peer = device_id(cx)?;
            let ready = res.named("ready")?;
            semaphore_signal(cx, ready, 1, Some((&peer).into()))?;
            semaphore_wait(cx, ready, 1)?;

            let (send, recv) = remote_dma_start(
                cx,
                src,
                vec![],
                dst,
                vec![],
                res.named("send")?,
                res.named("recv")?,
                &peer,
            )?;
            send.wait(cx)?;
            recv.wait(cx)
        })?;
        Ok(Vec::new())
    })
}

fn scoped(cx: &mut TraceContext<'_>) -> Result<SubProgram> {
    cx.trace_program(&[vmem(&TILE)], |cx, args| {
        let acc = &args[0];
        let resources = ScopedResources::new()
            .with(ResourceType::vmem(TILE, DType::F32))
            .with(ResourceType::semaphore());
        run_scoped(cx, resources, |cx, res| {
            let (scratch, sem) = (res.get(0)?, res.get(1)?);
            let x = get(cx, acc, vec![])?;
            set(cx, scratch, vec![], &x)?;
            semaphore_signal(cx, sem, 1, None)?;
            semaphore_wait(cx, sem, 1)?;
            let y = get(cx, scratch, vec![])?;
            set(cx, acc, vec![], &y)
        })?;
        Ok(Vec::new())
    })
}

fn repeat_demo(cx: &mut TraceContext<'_>) -> Result<SubProgram> {
    cx.trace_program(&[AbstractValue::array([4, 5], DType::F32)], |cx, args| {
        let y = repeat(cx, &args[0], 3, -1)?;
        Ok(vec![y.into()])
    })
}
