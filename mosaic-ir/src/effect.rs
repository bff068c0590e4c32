#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputEffectKind {
    Read,
    Write,
    Accum,
}

/// An effect on the value passed at position `input` of an equation or program.
///
/// For a program, positions run over `constvars ++ invars`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct InputEffect {
    pub kind: InputEffectKind,
    pub input: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Effect {
    Input(InputEffect),
    /// An effect not tied to any operand, ordered relative to others of the same name.
    Ordered { name: String },
}

pub type EffectSet = BTreeSet<Effect>;

impl Effect {
    pub fn read(input: usize) -> Self {
        Effect::Input(InputEffect {
            kind: InputEffectKind::Read,
            input,
        })
    }

    pub fn write(input: usize) -> Self {
        Effect::Input(InputEffect {
            kind: InputEffectKind::Write,
            input,
        })
    }

    pub fn accum(input: usize) -> Self {
        Effect::Input(InputEffect {
            kind: InputEffectKind::Accum,
            input,
        })
    }

    pub fn input_index(&self) -> Option<usize> {
        match self {
            Effect::Input(e) => Some(e.input),
            Effect::Ordered { .. } => None,
        }
    }

    /// Move an input effect to a new position. `None` from `map` drops the effect.
    pub fn reindex(&self, map: impl FnOnce(usize) -> Option<usize>) -> Option<Effect> {
        match self {
            Effect::Input(e) => map(e.input).map(|input| Effect::Input(InputEffect { input, ..*e })),
            Effect::Ordered { .. } => Some(self.clone()),
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Input(e) => {
                let kind = match e.kind {
                    InputEffectKind::Read => "Read",
                    InputEffectKind::Write => "Write",
                    InputEffectKind::Accum => "Accum",
                };
                write!(f, "{kind}<{}>", e.input)
            }
            Effect::Ordered { name } => write!(f, "Ordered<{name}>"),
        }
    }
}

/// Number of leading program inputs that are captured constants.
///
/// Inputs at or past the boundary are the program's own formal parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConstBoundary(pub usize);

/// Drop effects on a scope's own formal parameters; keep everything else.
///
/// Resources allocated for a scope are the formal parameters of its body, so
/// their effects cannot be observed once the scope exits. Effects on captured
/// constants, and effects not tied to an input, stay visible.
pub fn filter_scoped_effects(effects: &EffectSet, boundary: ConstBoundary) -> EffectSet {
    effects
        .iter()
        .filter(|eff| match eff.input_index() {
            Some(i) => i < boundary.0,
            None => true,
        })
        .cloned()
        .collect()
}
