use mosaic_core::{device_id, dma_start, remote_dma_start, trace_kernel, PrimitiveError, WaitOperands};
use mosaic_ir::{
    AbstractValue, Atom, DType, HasAval, Index, IndexError, MemorySpace, NdIndexer, SemaphoreKind,
    Slice,
};

fn hbm(shape: &[usize]) -> AbstractValue {
    AbstractValue::buffer(shape.to_vec(), DType::F32, MemorySpace::Any)
}

fn vmem(shape: &[usize]) -> AbstractValue {
    AbstractValue::buffer(shape.to_vec(), DType::F32, MemorySpace::Vmem)
}

fn dma_sem() -> AbstractValue {
    AbstractValue::semaphore(SemaphoreKind::Dma)
}

#[test]
fn local_copy_start_then_wait() {
    let program = trace_kernel(&[hbm(&[4, 8, 128]), vmem(&[8, 128]), dma_sem()], |cx, args| {
        let (src, dst, sem) = (&args[0], &args[1], &args[2]);
        let fut = dma_start(cx, src, vec![Index::Int(1)], dst, vec![], sem)?;

        let expected = WaitOperands {
            semaphore: Atom::from(sem),
            buffer: Atom::from(dst),
            region: NdIndexer::from_indices_shape(vec![], &[8, 128])?,
        };
        assert_eq!(fut.wait_operands()?, expected);
        assert_eq!(fut.operands(), [Atom::from(sem), Atom::from(dst)]);

        fut.wait(cx)?;
        Ok(vec![])
    })
    .expect("valid copy");

    let names: Vec<_> = program.eqns.iter().map(|e| e.primitive.name).collect();
    assert_eq!(names, ["dma_start", "dma_wait"]);
    let start = &program.eqns[0];
    assert_eq!(start.inputs.len(), 3);
    assert!(start.outputs.is_empty());
    assert_eq!(program.eqns[1].inputs.len(), 2);
    assert!(program.effects.is_empty());
}

#[test]
fn dynamic_destination_offset_travels_with_the_future() {
    let program = trace_kernel(&[vmem(&[4, 128]), hbm(&[16, 128]), dma_sem()], |cx, args| {
        let offset = device_id(cx)?;
        let fut = dma_start(
            cx,
            &args[0],
            vec![],
            &args[1],
            vec![Index::DynamicSlice {
                start: Atom::from(&offset),
                size: 4,
            }],
            &args[2],
        )?;

        let ops = fut.wait_operands()?;
        assert_eq!(ops.region.region_shape(), vec![4, 128]);
        assert_eq!(ops.region.dynamic_leaves().collect::<Vec<_>>(), [&Atom::from(&offset)]);
        assert_eq!(fut.operands().len(), 3);

        fut.wait(cx)?;
        Ok(vec![])
    })
    .expect("valid copy");

    assert_eq!(program.eqns.len(), 3);
    assert_eq!(program.eqns[1].inputs.len(), 4);
}

#[test]
fn mismatched_regions_are_rejected() {
    let err = trace_kernel(&[hbm(&[4, 8, 128]), vmem(&[8, 64]), dma_sem()], |cx, args| {
        let fut = dma_start(cx, &args[0], vec![Index::Int(0)], &args[1], vec![], &args[2])?;
        fut.wait(cx)?;
        Ok(vec![])
    })
    .expect_err("shapes differ");
    match err {
        PrimitiveError::Validation { primitive, message } => {
            assert_eq!(primitive, "dma_start");
            assert!(message.contains("does not match destination region"), "{message}");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn mismatched_dtypes_are_rejected() {
    let dst = AbstractValue::buffer([8], DType::BF16, MemorySpace::Vmem);
    let err = trace_kernel(&[hbm(&[8]), dst, dma_sem()], |cx, args| {
        let fut = dma_start(cx, &args[0], vec![], &args[1], vec![], &args[2])?;
        fut.wait(cx)?;
        Ok(vec![])
    })
    .expect_err("dtypes differ");
    assert!(err.to_string().contains("f32[8] does not match destination region bf16[8]"), "{err}");
}

#[test]
fn out_of_bounds_index_is_an_index_error() {
    let err = trace_kernel(&[hbm(&[4, 8]), vmem(&[8]), dma_sem()], |cx, args| {
        let fut = dma_start(cx, &args[0], vec![Index::Int(4)], &args[1], vec![], &args[2])?;
        fut.wait(cx)?;
        Ok(vec![])
    })
    .expect_err("row 4 of 4");
    assert!(matches!(err, PrimitiveError::Index(IndexError::OutOfBounds { .. })), "{err:?}");
}

#[test]
fn slice_past_the_end_is_rejected() {
    let err = trace_kernel(&[hbm(&[8]), vmem(&[4]), dma_sem()], |cx, args| {
        let fut = dma_start(
            cx,
            &args[0],
            vec![Index::Slice(Slice::new(6, 4))],
            &args[1],
            vec![],
            &args[2],
        )?;
        fut.wait(cx)?;
        Ok(vec![])
    })
    .expect_err("6..10 of 8");
    assert!(matches!(err, PrimitiveError::Index(IndexError::SliceOutOfBounds { .. })), "{err:?}");
}

#[test]
fn source_must_be_a_buffer() {
    let err = trace_kernel(&[AbstractValue::array([8], DType::F32), vmem(&[8]), dma_sem()], |cx, args| {
        let fut = dma_start(cx, &args[0], vec![], &args[1], vec![], &args[2])?;
        fut.wait(cx)?;
        Ok(vec![])
    })
    .expect_err("array source");
    assert!(err.to_string().contains("source must be a buffer reference"), "{err}");
}

#[test]
fn remote_copy_yields_disjoint_send_and_recv_futures() {
    let avals = [vmem(&[8, 128]), vmem(&[8, 128]), dma_sem(), dma_sem()];
    let program = trace_kernel(&avals, |cx, args| {
        let (src, dst, send_sem, recv_sem) = (&args[0], &args[1], &args[2], &args[3]);
        let peer = device_id(cx)?;
        let (send, recv) = remote_dma_start(cx, src, vec![], dst, vec![], send_sem, recv_sem, &peer)?;

        let send_ops = send.wait_operands()?;
        let recv_ops = recv.wait_operands()?;
        assert_eq!(send_ops.semaphore, Atom::from(send_sem));
        assert_eq!(send_ops.buffer, Atom::from(src));
        assert_eq!(recv_ops.semaphore, Atom::from(recv_sem));
        assert_eq!(recv_ops.buffer, Atom::from(dst));
        assert!(send.operands().iter().all(|a| !recv.operands().contains(a)));

        // Waiting on the receive side alone is a complete program.
        recv.wait(cx)?;
        drop(send);
        Ok(vec![])
    })
    .expect("valid remote copy");

    let start = &program.eqns[1];
    assert_eq!(start.primitive.name, "dma_start");
    assert_eq!(start.inputs.len(), 5);
    assert_eq!(start.inputs[2].aval(), &dma_sem());
    assert!(start.inputs[4].aval().is_scalar_of(DType::I32));
    assert_eq!(program.eqns.len(), 3);
}

#[test]
fn remote_copy_needs_an_i32_device_id() {
    let avals = [vmem(&[8]), vmem(&[8]), dma_sem(), dma_sem()];
    let err = trace_kernel(&avals, |cx, args| {
        let (send, recv) = remote_dma_start(cx, &args[0], vec![], &args[1], vec![], &args[2], &args[3], 1.0f32)?;
        send.wait(cx)?;
        recv.wait(cx)?;
        Ok(vec![])
    })
    .expect_err("float device id");
    assert!(err.to_string().contains("`device_id` must be an int32 value"), "{err}");
}

#[test]
fn future_started_outside_a_scope_can_be_waited_inside() {
    use mosaic_core::{run_scoped, ScopedResources};

    let program = trace_kernel(&[hbm(&[8]), vmem(&[8]), dma_sem()], |cx, args| {
        let fut = dma_start(cx, &args[0], vec![], &args[1], vec![], &args[2])?;
        run_scoped(cx, ScopedResources::new(), |cx, _| fut.wait(cx))?;
        Ok(vec![])
    })
    .expect("wait inside a scope");

    let scoped = &program.eqns[1];
    assert_eq!(scoped.primitive.name, "run_scoped");
    // The semaphore and destination buffer are captured into the scope.
    assert_eq!(scoped.inputs.len(), 2);
}
