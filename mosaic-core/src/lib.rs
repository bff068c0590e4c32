#![forbid(unsafe_code)]

mod config;
mod error;
mod registry;
mod trace;

pub mod dma;
pub mod lower;
pub mod misc;
pub mod scoped;
pub mod semaphore;
pub mod state;

pub use config::TraceConfig;
pub use error::{PrimitiveError, Result};
pub use registry::{AbstractEvalFn, AbstractEvalRule, EffectfulAbstractEvalFn, Registry, RegistryBuilder};
pub use trace::{trace_kernel, TraceContext};

pub use dma::{dma_start, remote_dma_start, DmaFuture, WaitOperands};
pub use lower::{LoweredOp, LoweringContext, LoweringRegistry, LoweringRule};
pub use misc::{device_id, repeat, trace, TraceRegion, DEFAULT_TRACE_LEVEL};
pub use scoped::{run_scoped, ResourceType, ScopedArgs, ScopedResources};
pub use semaphore::{semaphore_signal, semaphore_wait};
pub use state::{get, set, swap};
