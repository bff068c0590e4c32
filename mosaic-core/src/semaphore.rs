#![forbid(unsafe_code)]

use mosaic_ir::{AbstractValue, Atom, DType, Param, Params, Primitive, SemaphoreKind};

use crate::error::{PrimitiveError, Result};
use crate::registry::RegistryBuilder;
use crate::trace::TraceContext;

pub const SEMAPHORE_SIGNAL: Primitive = Primitive::multi("semaphore_signal");
pub const SEMAPHORE_WAIT: Primitive = Primitive::multi("semaphore_wait");

/// Add `inc` to `sem`, optionally on another device.
///
/// Integer literals are bound as `i32`; traced values must already be `i32` scalars.
pub fn semaphore_signal(
    cx: &mut TraceContext<'_>,
    sem: impl Into<Atom>,
    inc: impl Into<Atom>,
    device_id: Option<Atom>,
) -> Result<()> {
    let mut args = vec![sem.into(), inc.into()];
    let has_device_id = device_id.is_some();
    args.extend(device_id);
    cx.bind(
        SEMAPHORE_SIGNAL,
        args,
        Params::new().with("has_device_id", Param::Bool(has_device_id)),
    )?;
    Ok(())
}

/// Subtract `dec` from `sem`, blocking at run time until the count allows it.
pub fn semaphore_wait(cx: &mut TraceContext<'_>, sem: impl Into<Atom>, dec: impl Into<Atom>) -> Result<()> {
    cx.bind(SEMAPHORE_WAIT, vec![sem.into(), dec.into()], Params::new())?;
    Ok(())
}

fn check_regular(prim: Primitive, verb: &str, sem: &AbstractValue) -> Result<()> {
    let Some(s) = sem.as_semaphore() else {
        return Err(PrimitiveError::validation(
            prim.name,
            format!("Cannot {verb} on a non-semaphore value: {sem}"),
        ));
    };
    if s.kind != SemaphoreKind::Regular {
        return Err(PrimitiveError::validation(
            prim.name,
            format!("Must {verb} a REGULAR semaphore, got {}.", s.kind),
        ));
    }
    Ok(())
}

fn check_i32(prim: Primitive, what: &str, value: &AbstractValue) -> Result<()> {
    if value.is_scalar_of(DType::I32) {
        return Ok(());
    }
    Err(PrimitiveError::validation(
        prim.name,
        format!("{what} must be an int32 value, got {value}"),
    ))
}

fn semaphore_signal_abstract_eval(avals: &[AbstractValue], params: &Params) -> Result<Vec<AbstractValue>> {
    let has_device_id = params.bool("has_device_id").unwrap_or(false);
    let (sem, value, rest) = match avals {
        [sem, value, rest @ ..] => (sem, value, rest),
        _ => {
            return Err(PrimitiveError::validation(
                SEMAPHORE_SIGNAL.name,
                format!("expected a semaphore and an increment, got {} operands", avals.len()),
            ))
        }
    };
    check_regular(SEMAPHORE_SIGNAL, "signal", sem)?;
    check_i32(SEMAPHORE_SIGNAL, "increment", value)?;
    match (has_device_id, rest) {
        (true, [device_id]) => check_i32(SEMAPHORE_SIGNAL, "`device_id`", device_id)?,
        (false, []) => {}
        _ => {
            return Err(PrimitiveError::validation(
                SEMAPHORE_SIGNAL.name,
                format!(
                    "has_device_id={has_device_id} does not match {} trailing operands",
                    rest.len()
                ),
            ))
        }
    }
    Ok(Vec::new())
}

fn semaphore_wait_abstract_eval(avals: &[AbstractValue], _params: &Params) -> Result<Vec<AbstractValue>> {
    let [sem, value] = avals else {
        return Err(PrimitiveError::validation(
            SEMAPHORE_WAIT.name,
            format!("expected a semaphore and a decrement, got {} operands", avals.len()),
        ));
    };
    check_regular(SEMAPHORE_WAIT, "wait", sem)?;
    check_i32(SEMAPHORE_WAIT, "decrement", value)?;
    Ok(Vec::new())
}

pub(crate) fn register(b: &mut RegistryBuilder) -> Result<()> {
    b.def_abstract_eval(SEMAPHORE_SIGNAL, semaphore_signal_abstract_eval)?
        .def_abstract_eval(SEMAPHORE_WAIT, semaphore_wait_abstract_eval)?;
    Ok(())
}
