#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::Serialize;

use crate::{AbstractValue, DType, EffectSet, HasAval, TreeDef};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct VarId(pub u32);

/// A traced value. Identity is the id; the abstract value rides along.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Var {
    pub id: VarId,
    pub aval: AbstractValue,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum LiteralValue {
    Int(i64),
    Float(f64),
    Bool(bool),
}

/// A scalar constant appearing directly as an operand.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Literal {
    pub value: LiteralValue,
    pub aval: AbstractValue,
}

impl Literal {
    pub fn int(value: i64, dtype: DType) -> Self {
        Self {
            value: LiteralValue::Int(value),
            aval: AbstractValue::scalar(dtype),
        }
    }

    pub fn float(value: f64, dtype: DType) -> Self {
        Self {
            value: LiteralValue::Float(value),
            aval: AbstractValue::scalar(dtype),
        }
    }

    pub fn i32(value: i32) -> Self {
        Self::int(value.into(), DType::I32)
    }

    pub fn bool(value: bool) -> Self {
        Self {
            value: LiteralValue::Bool(value),
            aval: AbstractValue::scalar(DType::Bool),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Atom {
    Var(Var),
    Lit(Literal),
}

impl Atom {
    pub fn as_var(&self) -> Option<&Var> {
        match self {
            Atom::Var(v) => Some(v),
            Atom::Lit(_) => None,
        }
    }
}

impl HasAval for Var {
    fn aval(&self) -> &AbstractValue {
        &self.aval
    }
}

impl HasAval for Literal {
    fn aval(&self) -> &AbstractValue {
        &self.aval
    }
}

impl HasAval for Atom {
    fn aval(&self) -> &AbstractValue {
        match self {
            Atom::Var(v) => &v.aval,
            Atom::Lit(l) => &l.aval,
        }
    }
}

impl From<Var> for Atom {
    fn from(v: Var) -> Self {
        Atom::Var(v)
    }
}

impl From<&Var> for Atom {
    fn from(v: &Var) -> Self {
        Atom::Var(v.clone())
    }
}

impl From<Literal> for Atom {
    fn from(l: Literal) -> Self {
        Atom::Lit(l)
    }
}

impl From<i32> for Atom {
    fn from(v: i32) -> Self {
        Atom::Lit(Literal::i32(v))
    }
}

impl From<i64> for Atom {
    fn from(v: i64) -> Self {
        Atom::Lit(Literal::int(v, DType::I64))
    }
}

impl From<u32> for Atom {
    fn from(v: u32) -> Self {
        Atom::Lit(Literal::int(v.into(), DType::U32))
    }
}

impl From<f32> for Atom {
    fn from(v: f32) -> Self {
        Atom::Lit(Literal::float(v.into(), DType::F32))
    }
}

impl From<bool> for Atom {
    fn from(v: bool) -> Self {
        Atom::Lit(Literal::bool(v))
    }
}

/// Identity of an operation. Behaviour (abstract evaluation, lowering) is attached elsewhere.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Primitive {
    pub name: &'static str,
    pub multiple_results: bool,
}

impl Primitive {
    pub const fn single(name: &'static str) -> Self {
        Self {
            name,
            multiple_results: false,
        }
    }

    pub const fn multi(name: &'static str) -> Self {
        Self {
            name,
            multiple_results: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Param {
    Int(i64),
    Bool(bool),
    Str(String),
    Tree(TreeDef),
    Program(Box<SubProgram>),
}

/// Static parameters of an equation, keyed by name.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Params(BTreeMap<&'static str, Param>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &'static str, value: Param) -> Self {
        self.0.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Param> {
        self.0.get(key)
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        match self.0.get(key) {
            Some(Param::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        match self.0.get(key) {
            Some(Param::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(Param::Str(v)) => Some(v),
            _ => None,
        }
    }

    pub fn tree(&self, key: &str) -> Option<&TreeDef> {
        match self.0.get(key) {
            Some(Param::Tree(v)) => Some(v),
            _ => None,
        }
    }

    pub fn program(&self, key: &str) -> Option<&SubProgram> {
        match self.0.get(key) {
            Some(Param::Program(v)) => Some(v),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Param)> {
        self.0.iter().map(|(k, v)| (*k, v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Equation {
    pub primitive: Primitive,
    pub inputs: Vec<Atom>,
    pub outputs: Vec<Var>,
    pub params: Params,
    /// Input effects here index `inputs`.
    pub effects: EffectSet,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SubProgram {
    /// Values captured from the enclosing program.
    pub constvars: Vec<Var>,
    pub invars: Vec<Var>,
    pub outvars: Vec<Atom>,
    pub eqns: Vec<Equation>,
    /// Input effects here index `constvars ++ invars`.
    pub effects: EffectSet,
}

impl SubProgram {
    pub fn num_consts(&self) -> usize {
        self.constvars.len()
    }

    /// Position of `id` in `constvars ++ invars`.
    pub fn input_position(&self, id: VarId) -> Option<usize> {
        self.constvars
            .iter()
            .chain(self.invars.iter())
            .position(|v| v.id == id)
    }
}

#[derive(Default, Debug)]
pub struct IdGen {
    next_var: u32,
}

impl IdGen {
    pub fn fresh_var(&mut self, aval: AbstractValue) -> Var {
        let id = VarId(self.next_var);
        self.next_var += 1;
        Var { id, aval }
    }
}
