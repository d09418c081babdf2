use smallvec::SmallVec;

use super::{access::Access, graph::CompiledGraph, handle::VersionKey};
use crate::backend::Backend;

/// Everything an executor may touch while its pass replays.
pub struct PassContext<'a, B: Backend> {
    pub backend: &'a mut B,
    pub cmd: B::Command,
    pub frame_slot: usize,
    pub pass_name: &'a str,
    pub graph: &'a CompiledGraph<B>,
}

/// Records the work of one pass. Errors are logged by the replay and do not
/// stop the remaining passes.
pub trait PassExecutor<B: Backend> {
    fn execute(&self, ctx: &mut PassContext<'_, B>) -> anyhow::Result<()>;
}

impl<B, F> PassExecutor<B> for F
where
    B: Backend,
    F: Fn(&mut PassContext<'_, B>) -> anyhow::Result<()>,
{
    fn execute(&self, ctx: &mut PassContext<'_, B>) -> anyhow::Result<()> {
        self(ctx)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct ResourceRef {
    pub version: VersionKey,
    pub access: Access,
}

pub(crate) struct Pass<B: Backend> {
    pub name: String,
    pub declaration_index: usize,
    pub writes: SmallVec<[ResourceRef; 4]>,
    pub reads: SmallVec<[ResourceRef; 4]>,
    pub executor: Option<Box<dyn PassExecutor<B>>>,
}

impl<B: Backend> Pass<B> {
    pub fn new(name: String, declaration_index: usize) -> Self {
        Self {
            name,
            declaration_index,
            writes: SmallVec::new(),
            reads: SmallVec::new(),
            executor: None,
        }
    }
}
