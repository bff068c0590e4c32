#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::OnceLock;

use mosaic_ir::{AbstractValue, EffectSet, Params, Primitive};

use crate::error::{PrimitiveError, Result};

pub type AbstractEvalFn = fn(&[AbstractValue], &Params) -> Result<Vec<AbstractValue>>;
pub type EffectfulAbstractEvalFn =
    fn(&[AbstractValue], &Params) -> Result<(Vec<AbstractValue>, EffectSet)>;

#[derive(Clone, Copy)]
pub enum AbstractEvalRule {
    Pure(AbstractEvalFn),
    Effectful(EffectfulAbstractEvalFn),
}

impl AbstractEvalRule {
    fn eval(&self, avals: &[AbstractValue], params: &Params) -> Result<(Vec<AbstractValue>, EffectSet)> {
        match self {
            AbstractEvalRule::Pure(f) => Ok((f(avals, params)?, EffectSet::new())),
            AbstractEvalRule::Effectful(f) => f(avals, params),
        }
    }
}

impl std::fmt::Debug for AbstractEvalRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            AbstractEvalRule::Pure(_) => "Pure",
            AbstractEvalRule::Effectful(_) => "Effectful",
        })
    }
}

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    rules: BTreeMap<&'static str, (Primitive, AbstractEvalRule)>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn def_abstract_eval(&mut self, prim: Primitive, rule: AbstractEvalFn) -> Result<&mut Self> {
        self.insert(prim, AbstractEvalRule::Pure(rule))
    }

    pub fn def_effectful_abstract_eval(
        &mut self,
        prim: Primitive,
        rule: EffectfulAbstractEvalFn,
    ) -> Result<&mut Self> {
        self.insert(prim, AbstractEvalRule::Effectful(rule))
    }

    fn insert(&mut self, prim: Primitive, rule: AbstractEvalRule) -> Result<&mut Self> {
        if self.rules.contains_key(prim.name) {
            return Err(PrimitiveError::configuration(format!(
                "abstract evaluation rule for '{}' registered twice",
                prim.name
            )));
        }
        self.rules.insert(prim.name, (prim, rule));
        Ok(self)
    }

    pub fn build(self) -> Registry {
        Registry { rules: self.rules }
    }
}

/// Name to abstract-evaluation table. Immutable once built.
#[derive(Debug)]
pub struct Registry {
    rules: BTreeMap<&'static str, (Primitive, AbstractEvalRule)>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// A builder pre-populated with every primitive this crate defines.
    pub fn builtin_builder() -> Result<RegistryBuilder> {
        let mut b = RegistryBuilder::new();
        crate::misc::register(&mut b)?;
        crate::scoped::register(&mut b)?;
        crate::semaphore::register(&mut b)?;
        crate::dma::register(&mut b)?;
        crate::state::register(&mut b)?;
        Ok(b)
    }

    /// Process-wide registry of the built-in primitives, initialised on first use.
    ///
    /// # Panics
    ///
    /// Panics if two built-in primitives share a name.
    pub fn standard() -> &'static Registry {
        static STANDARD: OnceLock<Registry> = OnceLock::new();
        STANDARD.get_or_init(|| match Registry::builtin_builder() {
            Ok(b) => b.build(),
            Err(e) => panic!("built-in primitive table is inconsistent: {e}"),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    /// Run `prim`'s abstract-evaluation rule and check its result count.
    pub fn abstract_eval(
        &self,
        prim: Primitive,
        avals: &[AbstractValue],
        params: &Params,
    ) -> Result<(Vec<AbstractValue>, EffectSet)> {
        let Some((registered, rule)) = self.rules.get(prim.name) else {
            return Err(PrimitiveError::configuration(format!(
                "no abstract evaluation rule registered for '{}'",
                prim.name
            )));
        };
        if *registered != prim {
            return Err(PrimitiveError::configuration(format!(
                "primitive '{}' was registered with a different result multiplicity",
                prim.name
            )));
        }

        let (out, effects) = rule.eval(avals, params)?;
        if !prim.multiple_results && out.len() != 1 {
            return Err(PrimitiveError::configuration(format!(
                "single-result primitive '{}' produced {} results",
                prim.name,
                out.len()
            )));
        }
        Ok((out, effects))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_ir::DType;

    const IDENTITY: Primitive = Primitive::single("identity");

    fn identity_rule(avals: &[AbstractValue], _: &Params) -> Result<Vec<AbstractValue>> {
        Ok(avals.to_vec())
    }

    #[test]
    fn unregistered_primitive_is_a_configuration_error() {
        let reg = Registry::builder().build();
        let err = reg
            .abstract_eval(IDENTITY, &[], &Params::new())
            .expect_err("nothing registered");
        assert!(matches!(err, PrimitiveError::Configuration { .. }));
        assert!(err.to_string().contains("'identity'"), "{err}");
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut b = Registry::builder();
        b.def_abstract_eval(IDENTITY, identity_rule).expect("first");
        let err = b.def_abstract_eval(IDENTITY, identity_rule).expect_err("second");
        assert!(err.to_string().contains("registered twice"), "{err}");
    }

    #[test]
    fn single_result_primitive_must_return_one_value() {
        let mut b = Registry::builder();
        b.def_abstract_eval(IDENTITY, identity_rule).expect("register");
        let reg = b.build();

        let one = [AbstractValue::scalar(DType::I32)];
        let (out, effects) = reg.abstract_eval(IDENTITY, &one, &Params::new()).expect("one in, one out");
        assert_eq!(out, one.to_vec());
        assert!(effects.is_empty());

        let err = reg
            .abstract_eval(IDENTITY, &[], &Params::new())
            .expect_err("zero results");
        assert!(err.to_string().contains("produced 0 results"), "{err}");
    }

    #[test]
    fn standard_registry_has_every_builtin() {
        let reg = Registry::standard();
        for name in [
            "repeat",
            "device_id",
            "trace_start",
            "trace_stop",
            "run_scoped",
            "semaphore_signal",
            "semaphore_wait",
            "dma_start",
            "dma_wait",
            "get",
            "swap",
        ] {
            assert!(reg.contains(name), "missing {name}");
        }
    }
}
