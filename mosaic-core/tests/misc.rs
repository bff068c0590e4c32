use mosaic_core::{
    device_id, repeat, run_scoped, trace, trace_kernel, PrimitiveError, ScopedResources, TraceRegion,
    DEFAULT_TRACE_LEVEL,
};
use mosaic_ir::{AbstractValue, DType, HasAval, Param};
use proptest::prelude::*;

#[test]
fn repeat_scales_the_chosen_axis() {
    let program = trace_kernel(&[AbstractValue::array([4, 5], DType::F32)], |cx, args| {
        let y = repeat(cx, &args[0], 3, 1)?;
        Ok(vec![y.into()])
    })
    .expect("valid repeat");

    let out = &program.eqns[0].outputs[0];
    assert_eq!(out.aval, AbstractValue::array([4, 15], DType::F32));
    assert_eq!(program.eqns[0].params.int("repeats"), Some(3));
    assert_eq!(program.eqns[0].params.int("axis"), Some(1));
}

#[test]
fn repeat_accepts_negative_axes() {
    trace_kernel(&[AbstractValue::array([2, 3, 4], DType::BF16)], |cx, args| {
        let y = repeat(cx, &args[0], 2, -3)?;
        assert_eq!(y.aval, AbstractValue::array([4, 3, 4], DType::BF16));
        Ok(vec![])
    })
    .expect("valid repeat");
}

#[test]
fn repeat_rejects_out_of_range_axis() {
    let err = trace_kernel(&[AbstractValue::array([4, 5], DType::F32)], |cx, args| {
        repeat(cx, &args[0], 2, 2)?;
        Ok(vec![])
    })
    .expect_err("rank 2 has no axis 2");
    assert!(err.to_string().contains("axis 2 is out of range for rank 2"), "{err}");
}

#[test]
fn repeat_rejects_overflowing_dimension() {
    let err = trace_kernel(&[AbstractValue::array([4, 5], DType::F32)], |cx, args| {
        repeat(cx, &args[0], 1usize << 62, 1)?;
        Ok(vec![])
    })
    .expect_err("5 * 2^62 does not fit in usize");
    match err {
        PrimitiveError::Validation { primitive, message } => {
            assert_eq!(primitive, "repeat");
            assert!(message.contains("overflows"), "{message}");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn repeat_rejects_scalars_and_buffers() {
    let err = trace_kernel(&[AbstractValue::scalar(DType::I32)], |cx, args| {
        repeat(cx, &args[0], 2, 0)?;
        Ok(vec![])
    })
    .expect_err("scalar has no axis");
    assert!(matches!(err, PrimitiveError::Validation { primitive: "repeat", .. }), "{err:?}");
}

#[test]
fn device_id_is_an_i32_scalar_everywhere() {
    trace_kernel(&[], |cx, _| {
        let top = device_id(cx)?;
        assert_eq!(top.aval, AbstractValue::scalar(DType::I32));
        run_scoped(cx, ScopedResources::new(), |cx, _| {
            let inner = device_id(cx)?;
            assert_eq!(inner.aval, AbstractValue::scalar(DType::I32));
            Ok(())
        })?;
        Ok(vec![top.into()])
    })
    .expect("valid program");
}

#[test]
fn trace_markers_bracket_the_body() {
    let program = trace_kernel(&[], |cx, _| {
        let id = trace(cx, "fetch", DEFAULT_TRACE_LEVEL, device_id)?;
        Ok(vec![id.into()])
    })
    .expect("valid program");

    let names: Vec<_> = program.eqns.iter().map(|e| e.primitive.name).collect();
    assert_eq!(names, ["trace_start", "device_id", "trace_stop"]);
    let start = &program.eqns[0];
    assert_eq!(start.params.get("message"), Some(&Param::Str("fetch".to_string())));
    assert_eq!(start.params.int("level"), Some(10));
    assert!(program.eqns[2].params.is_empty());
}

#[test]
fn trace_stop_is_emitted_when_the_body_fails() {
    let program = trace_kernel(&[AbstractValue::array([4], DType::F32)], |cx, args| {
        let err = trace(cx, "broken", 3, |cx| repeat(cx, &args[0], 2, 5))
            .expect_err("bad axis");
        assert!(matches!(err, PrimitiveError::Validation { .. }));
        Ok(vec![])
    })
    .expect("outer trace continues");

    let names: Vec<_> = program.eqns.iter().map(|e| e.primitive.name).collect();
    assert_eq!(names, ["trace_start", "trace_stop"]);
}

#[test]
fn trace_region_guard_closes_on_drop() {
    let program = trace_kernel(&[], |cx, _| {
        {
            let mut region = TraceRegion::enter(cx, "outer", 1)?;
            {
                let mut inner = TraceRegion::enter(&mut region, "inner", 2)?;
                device_id(&mut inner)?;
            }
            device_id(&mut region)?;
        }
        device_id(cx)?;
        Ok(vec![])
    })
    .expect("valid program");

    let names: Vec<_> = program.eqns.iter().map(|e| e.primitive.name).collect();
    assert_eq!(
        names,
        [
            "trace_start",
            "trace_start",
            "device_id",
            "trace_stop",
            "device_id",
            "trace_stop",
            "device_id",
        ]
    );
}

proptest! {
    #[test]
    fn repeat_shape_matches_reference(
        shape in prop::collection::vec(1usize..8, 1..4),
        repeats in 0usize..5,
        axis_seed in any::<u8>(),
        negative in any::<bool>(),
    ) {
        let rank = shape.len();
        let axis = usize::from(axis_seed) % rank;
        let axis_arg = if negative { axis as i64 - rank as i64 } else { axis as i64 };

        let mut expected = shape.clone();
        expected[axis] *= repeats;

        let input = AbstractValue::array(shape.clone(), DType::F32);
        let program = trace_kernel(&[input], |cx, args| {
            let y = repeat(cx, &args[0], repeats, axis_arg)?;
            Ok(vec![y.into()])
        })
        .expect("valid repeat");
        let out = program.outvars[0].clone();
        prop_assert_eq!(out.aval().shape(), expected.as_slice());
    }
}
