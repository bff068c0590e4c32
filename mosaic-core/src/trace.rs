#![forbid(unsafe_code)]

use std::collections::HashMap;

use mosaic_ir::{
    AbstractValue, Atom, EffectSet, Equation, HasAval, IdGen, Params, Primitive, SubProgram, Var,
    VarId,
};
use tracing::{debug, trace};

use crate::config::TraceConfig;
use crate::error::{PrimitiveError, Result};
use crate::registry::Registry;

/// A value from an enclosing frame, re-bound as a constvar of this one.
#[derive(Debug)]
struct Capture {
    original: VarId,
    parent: Var,
    local: Var,
}

#[derive(Debug)]
struct Frame {
    id: u32,
    constvars: Vec<Var>,
    invars: Vec<Var>,
    eqns: Vec<Equation>,
    captures: Vec<Capture>,
}

/// Records bound primitives into (nested) sub-programs.
///
/// Each traced body gets its own frame. Variables from enclosing frames used
/// inside a body are captured as constvars, one level at a time, so the
/// finished sub-program's constants are always values of the frame that
/// binds it.
pub struct TraceContext<'r> {
    registry: &'r Registry,
    config: TraceConfig,
    ids: IdGen,
    frames: Vec<Frame>,
    next_frame: u32,
    owner: HashMap<VarId, u32>,
}

impl TraceContext<'static> {
    /// Context over the built-in primitives with default limits.
    pub fn standard() -> Self {
        TraceContext::new(Registry::standard(), TraceConfig::default())
    }
}

impl<'r> TraceContext<'r> {
    pub fn new(registry: &'r Registry, config: TraceConfig) -> Self {
        Self {
            registry,
            config,
            ids: IdGen::default(),
            frames: Vec::new(),
            next_frame: 0,
            owner: HashMap::new(),
        }
    }

    /// Number of open frames.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Bind `prim` in the innermost frame and return its result variables.
    pub fn bind(&mut self, prim: Primitive, inputs: Vec<Atom>, params: Params) -> Result<Vec<Var>> {
        let Some(depth) = self.frames.len().checked_sub(1) else {
            return Err(PrimitiveError::trace(format!(
                "cannot bind '{}' outside of a traced program",
                prim.name
            )));
        };
        if self.frames[depth].eqns.len() >= self.config.max_equations {
            return Err(PrimitiveError::trace(format!(
                "program exceeds max_equations={}",
                self.config.max_equations
            )));
        }

        let marks = self.capture_marks();
        let checked = inputs
            .into_iter()
            .map(|a| self.lift_atom(a, depth))
            .collect::<Result<Vec<_>>>()
            .and_then(|inputs| {
                let avals: Vec<AbstractValue> = inputs.iter().map(|a| a.aval().clone()).collect();
                let (out_avals, effects) = self.registry.abstract_eval(prim, &avals, &params)?;
                Ok((inputs, out_avals, effects))
            });
        let (inputs, out_avals, effects) = match checked {
            Ok(checked) => checked,
            Err(e) => {
                self.rollback_captures(&marks);
                return Err(e);
            }
        };
        let outputs: Vec<Var> = out_avals
            .into_iter()
            .map(|aval| self.fresh(aval, depth))
            .collect();

        trace!(
            primitive = prim.name,
            inputs = inputs.len(),
            outputs = outputs.len(),
            effects = effects.len(),
            depth,
            "bind"
        );

        self.frames[depth].eqns.push(Equation {
            primitive: prim,
            inputs,
            outputs: outputs.clone(),
            params,
            effects,
        });
        Ok(outputs)
    }

    /// [`bind`](Self::bind) for primitives with exactly one result.
    pub fn bind_single(&mut self, prim: Primitive, inputs: Vec<Atom>, params: Params) -> Result<Var> {
        let mut out = self.bind(prim, inputs, params)?;
        match (out.pop(), out.is_empty()) {
            (Some(v), true) => Ok(v),
            _ => Err(PrimitiveError::configuration(format!(
                "'{}' is not a single-result primitive",
                prim.name
            ))),
        }
    }

    /// Trace `body` against fresh formal parameters of the given abstract values.
    ///
    /// Returns the sub-program, its effects (indexed over `constvars ++ invars`)
    /// and the captured constants as values of the current frame. If `body`
    /// fails the partially recorded frame is discarded and the error returned
    /// unchanged.
    pub fn trace_to_subprogram<F>(
        &mut self,
        in_avals: &[AbstractValue],
        body: F,
    ) -> Result<(SubProgram, EffectSet, Vec<Atom>)>
    where
        F: FnOnce(&mut Self, Vec<Var>) -> Result<Vec<Atom>>,
    {
        if self.frames.len() >= self.config.max_scope_depth {
            return Err(PrimitiveError::trace(format!(
                "sub-program nesting exceeds max_scope_depth={}",
                self.config.max_scope_depth
            )));
        }

        let marks = self.capture_marks();
        let frame_id = self.next_frame;
        self.next_frame += 1;
        self.frames.push(Frame {
            id: frame_id,
            constvars: Vec::new(),
            invars: Vec::new(),
            eqns: Vec::new(),
            captures: Vec::new(),
        });
        let depth = self.frames.len() - 1;
        let invars: Vec<Var> = in_avals
            .iter()
            .map(|aval| self.fresh(aval.clone(), depth))
            .collect();
        self.frames[depth].invars = invars.clone();
        debug!(depth, inputs = invars.len(), "enter sub-program");

        let result = body(self, invars).and_then(|outs| {
            outs.into_iter()
                .map(|a| self.lift_atom(a, depth))
                .collect::<Result<Vec<_>>>()
        });

        let frame = match self.frames.pop() {
            Some(f) if f.id == frame_id => f,
            _ => return Err(PrimitiveError::trace("trace frames were left unbalanced")),
        };
        let outvars = match result {
            Ok(outvars) => outvars,
            Err(e) => {
                debug!(depth, eqns = frame.eqns.len(), "discarding sub-program after error");
                self.rollback_captures(&marks);
                return Err(e);
            }
        };

        let consts: Vec<Atom> = frame.captures.iter().map(|c| Atom::Var(c.parent.clone())).collect();
        let mut program = SubProgram {
            constvars: frame.constvars,
            invars: frame.invars,
            outvars,
            eqns: frame.eqns,
            effects: EffectSet::new(),
        };
        program.effects = program_effects(&program);
        debug!(
            depth,
            consts = consts.len(),
            eqns = program.eqns.len(),
            effects = program.effects.len(),
            "exit sub-program"
        );

        let effects = program.effects.clone();
        Ok((program, effects, consts))
    }

    /// Trace a top-level program. Fails if called while another trace is open.
    pub fn trace_program<F>(&mut self, in_avals: &[AbstractValue], body: F) -> Result<SubProgram>
    where
        F: FnOnce(&mut Self, Vec<Var>) -> Result<Vec<Atom>>,
    {
        if !self.frames.is_empty() {
            return Err(PrimitiveError::trace(
                "top-level programs cannot be traced inside another trace",
            ));
        }
        let (program, _, _) = self.trace_to_subprogram(in_avals, body)?;
        Ok(program)
    }

    /// Number of captures in every open frame.
    fn capture_marks(&self) -> Vec<usize> {
        self.frames.iter().map(|f| f.captures.len()).collect()
    }

    /// Drop captures made since `marks` was taken, in every frame that was open then.
    fn rollback_captures(&mut self, marks: &[usize]) {
        let Self { frames, owner, .. } = self;
        for (frame, &mark) in frames.iter_mut().zip(marks) {
            if frame.captures.len() > mark {
                trace!(frame = frame.id, dropped = frame.captures.len() - mark, "rolling back captures");
            }
            for c in frame.captures.drain(mark..) {
                owner.remove(&c.local.id);
            }
            frame.constvars.truncate(mark);
        }
    }

    fn fresh(&mut self, aval: AbstractValue, depth: usize) -> Var {
        let v = self.ids.fresh_var(aval);
        self.owner.insert(v.id, self.frames[depth].id);
        v
    }

    fn home_depth(&self, id: VarId) -> Result<usize> {
        let frame = self
            .owner
            .get(&id)
            .ok_or_else(|| PrimitiveError::trace(format!("unknown variable %{}", id.0)))?;
        self.frames
            .iter()
            .position(|f| f.id == *frame)
            .ok_or_else(|| {
                PrimitiveError::trace(format!(
                    "variable %{} escaped the sub-program that defined it",
                    id.0
                ))
            })
    }

    fn lift_atom(&mut self, atom: Atom, depth: usize) -> Result<Atom> {
        match atom {
            Atom::Var(v) => Ok(Atom::Var(self.lift(&v, depth)?)),
            lit @ Atom::Lit(_) => Ok(lit),
        }
    }

    /// Make `v` usable in the frame at `depth`, capturing it through every intermediate frame.
    fn lift(&mut self, v: &Var, depth: usize) -> Result<Var> {
        let home = self.home_depth(v.id)?;
        if home == depth {
            return Ok(v.clone());
        }
        if home > depth {
            return Err(PrimitiveError::trace(format!(
                "variable %{} is not visible at this nesting level",
                v.id.0
            )));
        }
        if let Some(c) = self.frames[depth].captures.iter().find(|c| c.original == v.id) {
            return Ok(c.local.clone());
        }

        let parent = self.lift(v, depth - 1)?;
        let local = self.fresh(v.aval.clone(), depth);
        let frame = &mut self.frames[depth];
        frame.constvars.push(local.clone());
        frame.captures.push(Capture {
            original: v.id,
            parent,
            local: local.clone(),
        });
        trace!(var = v.id.0, local = local.id.0, depth, "captured");
        Ok(local)
    }
}

/// Re-base every equation's input effects onto the program's inputs.
///
/// Effects on values that are not program inputs (literals, intermediates) have
/// nothing to refer to outside the program and are dropped.
fn program_effects(program: &SubProgram) -> EffectSet {
    let mut out = EffectSet::new();
    for eqn in &program.eqns {
        for eff in &eqn.effects {
            let rebased = eff.reindex(|i| {
                eqn.inputs
                    .get(i)
                    .and_then(Atom::as_var)
                    .and_then(|v| program.input_position(v.id))
            });
            match rebased {
                Some(e) => {
                    out.insert(e);
                }
                None => trace!(primitive = eqn.primitive.name, effect = %eff, "effect on a non-input dropped"),
            }
        }
    }
    out
}

/// Trace a top-level program over the built-in primitives.
pub fn trace_kernel<F>(in_avals: &[AbstractValue], body: F) -> Result<SubProgram>
where
    F: FnOnce(&mut TraceContext<'static>, Vec<Var>) -> Result<Vec<Atom>>,
{
    TraceContext::standard().trace_program(in_avals, body)
}
