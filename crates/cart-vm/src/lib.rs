pub mod access;
pub mod allocator;
pub mod arith;
pub mod chunk;
mod compiler;
pub mod config;
pub mod gc;
mod native;
pub mod object;
pub mod op;
pub mod stack;
mod system;
pub mod table;
mod util;
pub mod value;
mod vm;

pub use chunk::Chunk;
pub use compiler::Compile;
pub use config::{Config, GcMode};
pub use gc::{Gc, Heap};
pub use native::BUILTINS;
pub use value::{Scalar, Value};
pub use vm::{InterpretError, RuntimeError, VM};

#[cfg(not(any(miri, target_family = "wasm")))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;
