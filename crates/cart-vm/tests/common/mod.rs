#![allow(dead_code)]

use cart_common::error::ErrorS;
use cart_common::types::Line;
use cart_vm::object::Function;
use cart_vm::{op, Chunk, Gc, Heap, InterpretError, Value, VM};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Hand assembler for test programs.
pub struct Asm<'a> {
    pub heap: &'a mut Heap,
    function: Function,
    line: Line,
}

impl<'a> Asm<'a> {
    pub fn new(heap: &'a mut Heap, name: &str, arity: u8) -> Self {
        Self { heap, function: Function::new(name, arity), line: 1 }
    }

    pub fn script(heap: &'a mut Heap) -> Self {
        Self::new(heap, "", 0)
    }

    pub fn line(&mut self, line: Line) -> &mut Self {
        self.line = line;
        self
    }

    pub fn chunk(&mut self) -> &mut Chunk {
        &mut self.function.chunk
    }

    pub fn op(&mut self, op: u16, operands: &[u16]) -> &mut Self {
        let line = self.line;
        self.function.chunk.write(op, line);
        for &operand in operands {
            self.function.chunk.write(operand, line);
        }
        self
    }

    pub fn constant(&mut self, value: impl Into<Value>) -> u16 {
        self.function.chunk.write_constant(value.into()).unwrap()
    }

    pub fn string(&mut self, string: &str) -> u16 {
        let string = self.heap.alloc_str(string).unwrap();
        self.constant(string)
    }

    pub fn push(&mut self, value: impl Into<Value>) -> &mut Self {
        let idx = self.constant(value);
        self.op(op::CONSTANT, &[idx])
    }

    pub fn push_str(&mut self, string: &str) -> &mut Self {
        let idx = self.string(string);
        self.op(op::CONSTANT, &[idx])
    }

    pub fn define_global(&mut self, name: &str) -> &mut Self {
        let idx = self.string(name);
        self.op(op::DEFINE_GLOBAL, &[idx])
    }

    pub fn get_global(&mut self, name: &str) -> &mut Self {
        let idx = self.string(name);
        self.op(op::GET_GLOBAL, &[idx])
    }

    pub fn set_global(&mut self, name: &str) -> &mut Self {
        let idx = self.string(name);
        self.op(op::SET_GLOBAL, &[idx])
    }

    /// Emits `op` with a name operand followed by `operands`.
    pub fn named(&mut self, op: u16, name: &str, operands: &[u16]) -> &mut Self {
        let idx = self.string(name);
        let mut words = vec![idx];
        words.extend_from_slice(operands);
        self.op(op, &words)
    }

    /// Emits `op::CLOSURE` for `function`, capturing `(is_local, index)`
    /// pairs.
    pub fn closure(&mut self, function: Gc<Function>, captures: &[(bool, u16)]) -> &mut Self {
        self.heap[function].upvalue_count = captures.len() as u16;
        let idx = self.constant(function);
        let mut words = vec![idx];
        for &(is_local, index) in captures {
            words.push(is_local as u16);
            words.push(index);
        }
        self.op(op::CLOSURE, &words)
    }

    pub fn ret(&mut self) -> &mut Self {
        self.op(op::NULL, &[]).op(op::RETURN, &[])
    }

    pub fn finish(self) -> Gc<Function> {
        let Asm { heap, function, .. } = self;
        heap.alloc(function).unwrap()
    }
}

/// Runs the program built by `build`, returning the result and everything
/// printed.
pub fn run(
    vm: &mut VM,
    build: impl FnOnce(&mut Heap) -> Gc<Function>,
) -> (Result<(), InterpretError>, String) {
    let mut build = Some(build);
    let mut compiler = move |_: &str, heap: &mut Heap| -> Result<Gc<Function>, Vec<ErrorS>> {
        let build = build.take().expect("program compiled twice");
        Ok(build(heap))
    };
    let mut stdout = Vec::new();
    let result = vm.interpret(&mut compiler, "", &mut stdout);
    (result, String::from_utf8(stdout).unwrap())
}
