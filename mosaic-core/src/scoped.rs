#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use mosaic_ir::{
    filter_scoped_effects, flatten, unflatten, AbstractValue, ConstBoundary, DType, EffectSet,
    MemorySpace, OperandTree, Param, Params, Primitive, SemaphoreKind, Var,
};
use tracing::debug;

use crate::error::{PrimitiveError, Result};
use crate::registry::RegistryBuilder;
use crate::trace::TraceContext;

pub const RUN_SCOPED: Primitive = Primitive::multi("run_scoped");

/// Type of a resource allocated for the duration of a `run_scoped` body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResourceType {
    Semaphore(SemaphoreKind),
    Buffer {
        shape: Vec<usize>,
        dtype: DType,
        memory_space: MemorySpace,
    },
}

impl ResourceType {
    pub fn semaphore() -> Self {
        ResourceType::Semaphore(SemaphoreKind::Regular)
    }

    pub fn dma_semaphore() -> Self {
        ResourceType::Semaphore(SemaphoreKind::Dma)
    }

    pub fn vmem(shape: impl Into<Vec<usize>>, dtype: DType) -> Self {
        ResourceType::Buffer {
            shape: shape.into(),
            dtype,
            memory_space: MemorySpace::Vmem,
        }
    }

    pub fn smem(shape: impl Into<Vec<usize>>, dtype: DType) -> Self {
        ResourceType::Buffer {
            shape: shape.into(),
            dtype,
            memory_space: MemorySpace::Smem,
        }
    }

    /// The value the body sees, as if the resource were already allocated.
    pub fn aval(&self) -> AbstractValue {
        match self {
            ResourceType::Semaphore(kind) => AbstractValue::semaphore(*kind),
            ResourceType::Buffer {
                shape,
                dtype,
                memory_space,
            } => AbstractValue::buffer(shape.clone(), *dtype, *memory_space),
        }
    }
}

/// Positional and named resource requests for one scope.
#[derive(Clone, Debug, Default)]
pub struct ScopedResources {
    pub positional: Vec<ResourceType>,
    pub named: BTreeMap<String, ResourceType>,
}

impl ScopedResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, ty: ResourceType) -> Self {
        self.positional.push(ty);
        self
    }

    pub fn with_named(mut self, name: impl Into<String>, ty: ResourceType) -> Self {
        self.named.insert(name.into(), ty);
        self
    }

    fn into_tree(self) -> OperandTree<ResourceType> {
        OperandTree::tuple([
            OperandTree::tuple(self.positional.into_iter().map(OperandTree::Leaf)),
            OperandTree::Dict(
                self.named
                    .into_iter()
                    .map(|(k, t)| (k, OperandTree::Leaf(t)))
                    .collect(),
            ),
        ])
    }
}

/// The allocated resources, in the same arrangement as the request.
#[derive(Clone, Debug, Default)]
pub struct ScopedArgs {
    pub positional: Vec<Var>,
    pub named: BTreeMap<String, Var>,
}

impl ScopedArgs {
    pub fn get(&self, i: usize) -> Result<&Var> {
        self.positional.get(i).ok_or_else(|| {
            PrimitiveError::validation(
                RUN_SCOPED.name,
                format!("no positional resource #{i} (have {})", self.positional.len()),
            )
        })
    }

    pub fn named(&self, name: &str) -> Result<&Var> {
        self.named.get(name).ok_or_else(|| {
            PrimitiveError::validation(RUN_SCOPED.name, format!("no resource named '{name}'"))
        })
    }

    fn from_tree(tree: OperandTree<Var>) -> Option<Self> {
        let mut parts = tree.into_tuple()?.into_iter();
        let positional = parts
            .next()?
            .into_tuple()?
            .into_iter()
            .map(OperandTree::into_leaf)
            .collect::<Option<Vec<_>>>()?;
        let OperandTree::Dict(named) = parts.next()? else {
            return None;
        };
        let named = named
            .into_iter()
            .map(|(k, t)| Some((k, t.into_leaf()?)))
            .collect::<Option<BTreeMap<_, _>>>()?;
        Some(Self { positional, named })
    }
}

/// Run `body` with freshly allocated resources whose effects stay inside the scope.
///
/// The body is traced into a sub-program whose formal parameters are the
/// requested resources. Values the body uses from outside become the
/// equation's operands. Errors from the body propagate unchanged and nothing
/// is recorded.
pub fn run_scoped<F>(cx: &mut TraceContext<'_>, resources: ScopedResources, body: F) -> Result<()>
where
    F: FnOnce(&mut TraceContext<'_>, ScopedArgs) -> Result<()>,
{
    let (flat_types, in_tree) = flatten(resources.into_tree());
    let avals: Vec<AbstractValue> = flat_types.iter().map(ResourceType::aval).collect();

    let (program, _effects, consts) = cx.trace_to_subprogram(&avals, |cx, vars| {
        let args = ScopedArgs::from_tree(unflatten(&in_tree, vars)?).ok_or_else(|| {
            PrimitiveError::trace("scoped resources did not rebuild into their request layout")
        })?;
        body(cx, args)?;
        Ok(Vec::new())
    })?;

    cx.bind(
        RUN_SCOPED,
        consts,
        Params::new().with("program", Param::Program(Box::new(program))),
    )?;
    Ok(())
}

fn run_scoped_abstract_eval(
    avals: &[AbstractValue],
    params: &Params,
) -> Result<(Vec<AbstractValue>, EffectSet)> {
    let program = params.program("program").ok_or_else(|| {
        PrimitiveError::configuration("run_scoped is missing its 'program' parameter")
    })?;
    if avals.len() != program.num_consts() {
        return Err(PrimitiveError::validation(
            RUN_SCOPED.name,
            format!(
                "expected {} captured operands, got {}",
                program.num_consts(),
                avals.len()
            ),
        ));
    }
    for (i, (given, expected)) in avals.iter().zip(&program.constvars).enumerate() {
        if *given != expected.aval {
            return Err(PrimitiveError::validation(
                RUN_SCOPED.name,
                format!("captured operand #{i} is {given}, body expects {}", expected.aval),
            ));
        }
    }

    let visible = filter_scoped_effects(&program.effects, ConstBoundary(program.num_consts()));
    debug!(
        declared = program.effects.len(),
        visible = visible.len(),
        "run_scoped effects filtered"
    );
    Ok((Vec::new(), visible))
}

pub(crate) fn register(b: &mut RegistryBuilder) -> Result<()> {
    b.def_effectful_abstract_eval(RUN_SCOPED, run_scoped_abstract_eval)?;
    Ok(())
}
