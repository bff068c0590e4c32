#![forbid(unsafe_code)]

use std::ops::{Deref, DerefMut};

use mosaic_ir::{AbstractValue, Atom, DType, Param, Params, Primitive, ShapedArray, Var};
use tracing::warn;

use crate::error::{PrimitiveError, Result};
use crate::registry::RegistryBuilder;
use crate::trace::TraceContext;

pub const REPEAT: Primitive = Primitive::single("repeat");
pub const DEVICE_ID: Primitive = Primitive::single("device_id");
pub const TRACE_START: Primitive = Primitive::multi("trace_start");
pub const TRACE_STOP: Primitive = Primitive::multi("trace_stop");

pub const DEFAULT_TRACE_LEVEL: i64 = 10;

/// Repeat every element of `x` `repeats` times along `axis`. Negative axes count from the end.
pub fn repeat(cx: &mut TraceContext<'_>, x: impl Into<Atom>, repeats: usize, axis: i64) -> Result<Var> {
    let repeats = i64::try_from(repeats)
        .map_err(|_| PrimitiveError::validation(REPEAT.name, "repeat count does not fit in i64"))?;
    cx.bind_single(
        REPEAT,
        vec![x.into()],
        Params::new()
            .with("repeats", Param::Int(repeats))
            .with("axis", Param::Int(axis)),
    )
}

/// Identity of the device executing the program, as an `i32` scalar.
pub fn device_id(cx: &mut TraceContext<'_>) -> Result<Var> {
    cx.bind_single(DEVICE_ID, Vec::new(), Params::new())
}

/// Normalise a possibly negative axis against `rank`.
pub(crate) fn canonical_axis(prim: Primitive, axis: i64, rank: usize) -> Result<usize> {
    let r = rank as i64;
    let a = if axis < 0 { axis + r } else { axis };
    if a < 0 || a >= r {
        return Err(PrimitiveError::validation(
            prim.name,
            format!("axis {axis} is out of range for rank {rank}"),
        ));
    }
    Ok(a as usize)
}

/// Size of a dimension of extent `dim` after repeating it `repeats` times.
pub(crate) fn repeated_extent(dim: usize, repeats: usize) -> Result<usize> {
    dim.checked_mul(repeats).ok_or_else(|| {
        PrimitiveError::validation(
            REPEAT.name,
            format!("repeating a dimension of size {dim} {repeats} times overflows"),
        )
    })
}

fn repeat_abstract_eval(avals: &[AbstractValue], params: &Params) -> Result<Vec<AbstractValue>> {
    let [x] = avals else {
        return Err(PrimitiveError::validation(
            REPEAT.name,
            format!("expected one operand, got {}", avals.len()),
        ));
    };
    let Some(x) = x.as_array() else {
        return Err(PrimitiveError::validation(
            REPEAT.name,
            format!("expected an array value, got {x}"),
        ));
    };
    let (Some(repeats), Some(axis)) = (params.int("repeats"), params.int("axis")) else {
        return Err(PrimitiveError::configuration(
            "repeat needs integer 'repeats' and 'axis' parameters",
        ));
    };
    let repeats = usize::try_from(repeats).map_err(|_| {
        PrimitiveError::validation(REPEAT.name, format!("repeats must be non-negative, got {repeats}"))
    })?;
    let axis = canonical_axis(REPEAT, axis, x.rank())?;

    let mut shape = x.shape.clone();
    shape[axis] = repeated_extent(shape[axis], repeats)?;
    Ok(vec![AbstractValue::Array(ShapedArray::new(shape, x.dtype))])
}

fn device_id_abstract_eval(avals: &[AbstractValue], _params: &Params) -> Result<Vec<AbstractValue>> {
    if !avals.is_empty() {
        return Err(PrimitiveError::validation(
            DEVICE_ID.name,
            format!("takes no operands, got {}", avals.len()),
        ));
    }
    Ok(vec![AbstractValue::scalar(DType::I32)])
}

fn trace_start_abstract_eval(_avals: &[AbstractValue], params: &Params) -> Result<Vec<AbstractValue>> {
    if params.str("message").is_none() || params.int("level").is_none() {
        return Err(PrimitiveError::configuration(
            "trace_start needs 'message' and 'level' parameters",
        ));
    }
    Ok(Vec::new())
}

fn trace_stop_abstract_eval(_avals: &[AbstractValue], _params: &Params) -> Result<Vec<AbstractValue>> {
    Ok(Vec::new())
}

/// An open profiling region. Dropping it emits the matching `trace_stop`.
///
/// Derefs to the trace context so the guarded code keeps binding through it.
pub struct TraceRegion<'a, 'r> {
    cx: &'a mut TraceContext<'r>,
}

impl<'a, 'r> TraceRegion<'a, 'r> {
    pub fn enter(cx: &'a mut TraceContext<'r>, message: impl Into<String>, level: i64) -> Result<Self> {
        cx.bind(
            TRACE_START,
            Vec::new(),
            Params::new()
                .with("message", Param::Str(message.into()))
                .with("level", Param::Int(level)),
        )?;
        Ok(Self { cx })
    }
}

impl<'r> Deref for TraceRegion<'_, 'r> {
    type Target = TraceContext<'r>;

    fn deref(&self) -> &Self::Target {
        self.cx
    }
}

impl DerefMut for TraceRegion<'_, '_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.cx
    }
}

impl Drop for TraceRegion<'_, '_> {
    fn drop(&mut self) {
        if let Err(e) = self.cx.bind(TRACE_STOP, Vec::new(), Params::new()) {
            warn!(error = %e, "could not close trace region");
        }
    }
}

/// Run `body` inside a profiling region; `trace_stop` is emitted on every exit path.
pub fn trace<T>(
    cx: &mut TraceContext<'_>,
    message: impl Into<String>,
    level: i64,
    body: impl FnOnce(&mut TraceContext<'_>) -> Result<T>,
) -> Result<T> {
    let mut region = TraceRegion::enter(cx, message, level)?;
    body(&mut *region)
}

pub(crate) fn register(b: &mut RegistryBuilder) -> Result<()> {
    b.def_abstract_eval(REPEAT, repeat_abstract_eval)?
        .def_abstract_eval(DEVICE_ID, device_id_abstract_eval)?
        .def_abstract_eval(TRACE_START, trace_start_abstract_eval)?
        .def_abstract_eval(TRACE_STOP, trace_stop_abstract_eval)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_axis_wraps_negative() {
        assert_eq!(canonical_axis(REPEAT, -1, 3).expect("valid"), 2);
        assert_eq!(canonical_axis(REPEAT, 0, 3).expect("valid"), 0);
        assert!(canonical_axis(REPEAT, 3, 3).is_err());
        assert!(canonical_axis(REPEAT, -4, 3).is_err());
        assert!(canonical_axis(REPEAT, 0, 0).is_err());
    }

    #[test]
    fn repeated_extent_is_checked() {
        assert_eq!(repeated_extent(5, 3).expect("fits"), 15);
        assert_eq!(repeated_extent(5, 0).expect("fits"), 0);
        assert!(repeated_extent(usize::MAX / 2 + 1, 2).is_err());
    }
}
