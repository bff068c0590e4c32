#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use mosaic_ir::{
    AbstractValue, Atom, Equation, HasAval, LiteralValue, Primitive, ShapedArray, SubProgram, Var,
    VarId,
};
use serde::Serialize;
use tracing::debug;

use crate::error::{PrimitiveError, Result};
use crate::misc::{canonical_axis, repeated_extent, REPEAT};

/// One backend operation in SSA form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LoweredOp {
    pub name: String,
    pub results: Vec<String>,
    pub operands: Vec<String>,
    pub attrs: BTreeMap<String, String>,
    pub result_types: Vec<String>,
}

impl fmt::Display for LoweredOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.results.is_empty() {
            write!(f, "{} = ", self.results.join(", "))?;
        }
        write!(f, "{}", self.name)?;
        if !self.operands.is_empty() {
            write!(f, " {}", self.operands.join(", "))?;
        }
        if !self.attrs.is_empty() {
            let attrs = self
                .attrs
                .iter()
                .map(|(k, v)| format!("{k} = {v}"))
                .collect::<Vec<_>>();
            write!(f, " {{{}}}", attrs.join(", "))?;
        }
        if !self.result_types.is_empty() {
            write!(f, " : {}", self.result_types.join(", "))?;
        }
        Ok(())
    }
}

/// SSA naming and the op list being built for one program.
#[derive(Debug, Default)]
pub struct LoweringContext {
    next_value: u32,
    names: HashMap<VarId, String>,
    ops: Vec<LoweredOp>,
}

impl LoweringContext {
    pub fn fresh_value(&mut self) -> String {
        let name = format!("%{}", self.next_value);
        self.next_value += 1;
        name
    }

    /// Name the SSA value that holds `v`.
    pub fn define(&mut self, v: &Var) -> String {
        let name = self.fresh_value();
        self.names.insert(v.id, name.clone());
        name
    }

    /// SSA name for an operand; literals are materialised as constants.
    pub fn operand(&mut self, a: &Atom) -> Result<String> {
        match a {
            Atom::Var(v) => self.names.get(&v.id).cloned().ok_or_else(|| {
                PrimitiveError::configuration(format!("value %{} lowered before its definition", v.id.0))
            }),
            Atom::Lit(l) => {
                let name = self.fresh_value();
                let value = match l.value {
                    LiteralValue::Int(i) => i.to_string(),
                    LiteralValue::Float(x) => format!("{x:?}"),
                    LiteralValue::Bool(b) => b.to_string(),
                };
                self.emit(LoweredOp {
                    name: "arith.constant".to_string(),
                    results: vec![name.clone()],
                    operands: Vec::new(),
                    attrs: BTreeMap::from([("value".to_string(), value)]),
                    result_types: vec![l.aval().to_string()],
                });
                Ok(name)
            }
        }
    }

    pub fn emit(&mut self, op: LoweredOp) {
        self.ops.push(op);
    }
}

pub type LoweringRule = fn(&mut LoweringContext, &Equation) -> Result<()>;

/// Name to lowering-rule table, kept apart from abstract evaluation.
#[derive(Debug, Default)]
pub struct LoweringRegistry {
    rules: BTreeMap<&'static str, LoweringRule>,
}

impl LoweringRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with the reference lowerings defined here (currently `repeat`).
    pub fn with_builtins() -> Result<Self> {
        let mut reg = Self::new();
        reg.register_lowering(REPEAT, lower_repeat)?;
        Ok(reg)
    }

    pub fn register_lowering(&mut self, prim: Primitive, rule: LoweringRule) -> Result<()> {
        if self.rules.contains_key(prim.name) {
            return Err(PrimitiveError::configuration(format!(
                "lowering rule for '{}' registered twice",
                prim.name
            )));
        }
        self.rules.insert(prim.name, rule);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    /// Lower every equation of `program` in order.
    pub fn lower_program(&self, program: &SubProgram) -> Result<Vec<LoweredOp>> {
        let mut cx = LoweringContext::default();
        for v in program.constvars.iter().chain(&program.invars) {
            cx.define(v);
        }
        for eqn in &program.eqns {
            let Some(rule) = self.rules.get(eqn.primitive.name) else {
                return Err(PrimitiveError::configuration(format!(
                    "no lowering rule registered for '{}'",
                    eqn.primitive.name
                )));
            };
            rule(&mut cx, eqn)?;
        }
        debug!(eqns = program.eqns.len(), ops = cx.ops.len(), "lowered program");
        Ok(cx.ops)
    }
}

/// `repeat` as a broadcast that inserts a new axis right after `axis`, then a
/// reshape that folds it into `axis`. Each element ends up `repeats` times in a row.
fn lower_repeat(cx: &mut LoweringContext, eqn: &Equation) -> Result<()> {
    let (Some(x), Some(out)) = (eqn.inputs.first(), eqn.outputs.first()) else {
        return Err(PrimitiveError::configuration("repeat equation needs one input and one output"));
    };
    let Some(xa) = x.aval().as_array() else {
        return Err(PrimitiveError::validation(REPEAT.name, format!("cannot lower repeat of {}", x.aval())));
    };
    let (Some(repeats), Some(axis)) = (eqn.params.int("repeats"), eqn.params.int("axis")) else {
        return Err(PrimitiveError::configuration("repeat needs integer 'repeats' and 'axis' parameters"));
    };
    let repeats = usize::try_from(repeats)
        .map_err(|_| PrimitiveError::validation(REPEAT.name, "repeats must be non-negative"))?;
    let axis = canonical_axis(REPEAT, axis, xa.rank())?;
    repeated_extent(xa.shape[axis], repeats)?;

    let mut wide = xa.shape.clone();
    wide.insert(axis + 1, repeats);
    let dims = (0..xa.rank())
        .map(|d| (if d <= axis { d } else { d + 1 }).to_string())
        .collect::<Vec<_>>()
        .join(", ");

    let src = cx.operand(x)?;
    let tmp = cx.fresh_value();
    let wide_ty = AbstractValue::Array(ShapedArray::new(wide, xa.dtype));
    cx.emit(LoweredOp {
        name: "mosaic.broadcast_in_dim".to_string(),
        results: vec![tmp.clone()],
        operands: vec![src],
        attrs: BTreeMap::from([("broadcast_dimensions".to_string(), format!("[{dims}]"))]),
        result_types: vec![wide_ty.to_string()],
    });

    let dst = cx.define(out);
    cx.emit(LoweredOp {
        name: "mosaic.reshape".to_string(),
        results: vec![dst],
        operands: vec![tmp],
        attrs: BTreeMap::new(),
        result_types: vec![out.aval.to_string()],
    });
    Ok(())
}
