use std::path::Path;

use cart_common::error::ErrorS;

use crate::gc::{Gc, Heap};
use crate::object::Function;

/// Turns source text into a top-level [`Function`] allocated in `heap`.
///
/// The compiler allocates strings and nested functions straight into the
/// heap; no collection runs while it works. The runtime trusts the bytecode
/// it produces.
pub trait Compile {
    fn compile(&mut self, source: &str, heap: &mut Heap) -> Result<Gc<Function>, Vec<ErrorS>>;

    /// Compiles a script loaded from `dir/name`, so that relative includes
    /// can be resolved.
    fn compile_path(
        &mut self,
        source: &str,
        dir: &Path,
        name: &str,
        heap: &mut Heap,
    ) -> Result<Gc<Function>, Vec<ErrorS>> {
        let _ = (dir, name);
        self.compile(source, heap)
    }
}

impl<F> Compile for F
where
    F: FnMut(&str, &mut Heap) -> Result<Gc<Function>, Vec<ErrorS>>,
{
    fn compile(&mut self, source: &str, heap: &mut Heap) -> Result<Gc<Function>, Vec<ErrorS>> {
        self(source, heap)
    }
}
