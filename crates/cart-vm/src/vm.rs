use std::cmp::Ordering;
use std::hash::BuildHasherDefault;
use std::io::{self, Write};
use std::path::Path;
use std::{iter, mem};

use arrayvec::ArrayVec;
use cart_common::error::{
    report_err, report_trace, AttributeError, Error, ErrorS, IoError, NameError, OverflowError,
    Result, TypeError,
};
use hashbrown::HashMap;
use rustc_hash::FxHasher;
use termcolor::WriteColor;
use thiserror::Error;

use crate::access;
use crate::arith::{self, Computed};
use crate::compiler::Compile;
use crate::config::{Config, GcMode, FRAMES_MAX};
use crate::gc::{Gc, GcMark, Heap, Sweep};
use crate::native::BUILTINS;
use crate::object::{
    ArrayKind, Class, Closure, Function, HeapObject, Instance, Native, NativeFn, ObjStack, ObjString,
    Object, Upvalue, Vector,
};
use crate::op;
use crate::stack::Stack;
use crate::table::{Key, Table};
use crate::value::{hash_str, Scalar, Value};

#[derive(Debug)]
pub struct VM {
    pub heap: Heap,
    globals: Table,
    config: Config,
    next_gc: usize,

    /// Suspended callers. The running frame is kept apart in `frame`.
    frames: ArrayVec<CallFrame, FRAMES_MAX>,
    frame: CallFrame,
    stack: Stack<Value>,

    /// Sorted by stack slot, lowest first.
    open_upvalues: Vec<Gc<Upvalue>>,

    classes: Stack<Value>,
    natives: Stack<Value>,
    native_names: HashMap<&'static str, u16, BuildHasherDefault<FxHasher>>,
}

impl VM {
    pub fn new() -> Result<Self> {
        Self::with_config(Config::default())
    }

    /// Creates a VM and registers the built-in natives.
    pub fn with_config(config: Config) -> Result<Self> {
        let mut vm = Self {
            heap: Heap::new(config.page_size),
            globals: Table::with_capacity(config.globals_capacity),
            next_gc: config.initial_next_gc,
            config,
            frames: ArrayVec::new(),
            frame: CallFrame::dangling(),
            stack: Stack::new(),
            open_upvalues: Vec::new(),
            classes: Stack::new(),
            natives: Stack::new(),
            native_names: HashMap::with_hasher(BuildHasherDefault::default()),
        };
        for &(name, arity, function) in BUILTINS {
            vm.define_native(name, arity, function)?;
        }
        Ok(vm)
    }

    /// Compiles and runs `source`. Globals, classes and natives persist
    /// between calls.
    pub fn interpret(
        &mut self,
        compiler: &mut impl Compile,
        source: &str,
        stdout: &mut impl Write,
    ) -> Result<(), InterpretError> {
        let function = compiler.compile(source, &mut self.heap).map_err(InterpretError::Compile)?;
        self.run_function(function, stdout)?;
        Ok(())
    }

    /// Like [`VM::interpret`], for a script read from `dir/name`.
    pub fn interpret_path(
        &mut self,
        compiler: &mut impl Compile,
        source: &str,
        dir: &Path,
        name: &str,
        stdout: &mut impl Write,
    ) -> Result<(), InterpretError> {
        let function = compiler
            .compile_path(source, dir, name, &mut self.heap)
            .map_err(InterpretError::Compile)?;
        self.run_function(function, stdout)?;
        Ok(())
    }

    /// Runs a compiled top-level function to completion. On failure the
    /// operand stack and call frames are discarded.
    pub fn run_function(
        &mut self,
        function: Gc<Function>,
        stdout: &mut impl Write,
    ) -> Result<(), RuntimeError> {
        self.reset();
        let result = self.start(function).and_then(|()| self.run(stdout));
        let result = result.map_err(|error| {
            log::debug!("runtime error: {error}");
            RuntimeError { trace: self.trace(), error }
        });
        self.reset();
        result
    }

    /// Registers a native function under `name`, both in the native registry
    /// and as a global. Returns its registry index.
    pub fn define_native(&mut self, name: &'static str, arity: u8, function: NativeFn) -> Result<u16> {
        let native = self.heap.alloc(Native { name, arity, function })?;
        let string = self.heap.alloc_str_pinned(name)?;

        let idx = self.natives.len() as u16;
        self.natives.push(native.into());
        self.native_names.insert(name, idx);

        let key = Key { hash: self.heap[string].hash, scalar: Scalar::Str(string) };
        self.globals.insert(key, native.into());
        Ok(idx)
    }

    pub fn native_index(&self, name: &str) -> Option<u16> {
        self.native_names.get(name).copied()
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.get(&Key { hash: hash_str(name), scalar: Scalar::Null })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn next_gc(&self) -> usize {
        self.next_gc
    }

    /// Number of values on the operand stack.
    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    /// Runs a full mark and sweep cycle.
    pub fn collect_garbage(&mut self) -> Sweep {
        log::debug!("gc begin: {} bytes allocated", self.heap.bytes_allocated());

        for &value in self.stack.iter() {
            self.heap.mark(value);
        }
        self.heap.mark(self.frame.closure);
        for frame in &self.frames {
            self.heap.mark(frame.closure);
        }
        for &class in self.classes.iter() {
            self.heap.mark(class);
        }
        for &native in self.natives.iter() {
            self.heap.mark(native);
        }
        for (key, value) in self.globals.iter() {
            self.heap.mark(key.scalar);
            self.heap.mark(value);
        }
        for &upvalue in &self.open_upvalues {
            self.heap.mark(upvalue);
        }

        self.heap.trace();
        let sweep = self.heap.sweep();

        self.next_gc =
            (self.heap.bytes_allocated() * self.config.heap_grow_factor).max(self.config.initial_next_gc);

        log::debug!(
            "gc end: freed {} objects ({} bytes), {} bytes allocated, next at {}",
            sweep.objects,
            sweep.bytes,
            self.heap.bytes_allocated(),
            self.next_gc
        );
        sweep
    }

    fn start(&mut self, function: Gc<Function>) -> Result<()> {
        self.push(function.into());
        let closure = self.alloc(Closure::new(function, Vec::new()))?;
        self.stack.reset();
        self.push(closure.into());
        self.frame = CallFrame { closure, function, ip: 0, slots: 0 };
        Ok(())
    }

    fn run(&mut self, stdout: &mut impl Write) -> Result<()> {
        loop {
            let op = self.read_word();
            if cfg!(feature = "vm-trace") {
                log::trace!("{:04} {:<16} depth={}", self.frame.ip - 1, op::name(op), self.stack.len());
            }

            match op {
                op::CONSTANT => {
                    let constant = self.read_constant();
                    self.push(constant);
                }
                op::NULL => self.push(Value::NULL),
                op::TRUE => self.push(Value::TRUE),
                op::FALSE => self.push(Value::FALSE),
                op::POP => {
                    self.pop();
                }
                op::POPN => {
                    let count = self.read_word() as usize;
                    self.stack.truncate(self.stack.len().saturating_sub(count));
                }
                op::DUP => self.push(self.peek(0)),
                op::GET_LOCAL => {
                    let slot = self.frame.slots + self.read_word() as usize;
                    let local = self.stack.get(slot).unwrap_or_default();
                    self.push(local);
                }
                op::SET_LOCAL => {
                    let slot = self.frame.slots + self.read_word() as usize;
                    self.stack.set(slot, self.peek(0));
                }
                op::GET_GLOBAL => {
                    let (name, key) = self.read_name();
                    match self.globals.get(&key) {
                        Some(value) => self.push(value),
                        None => return Err(self.not_defined(name)),
                    }
                }
                op::DEFINE_GLOBAL => {
                    let (_, key) = self.read_name();
                    let value = self.pop();
                    self.globals.insert(key, value);
                }
                op::SET_GLOBAL => {
                    let (name, key) = self.read_name();
                    if self.globals.get(&key).is_none() {
                        return Err(self.not_defined(name));
                    }
                    self.globals.insert(key, self.peek(0));
                }
                op::DELETE_GLOBAL => {
                    let (name, key) = self.read_name();
                    if self.globals.remove(&key).is_none() {
                        return Err(self.not_defined(name));
                    }
                }
                op::GET_UPVALUE => {
                    let idx = self.read_word() as usize;
                    let upvalue = self.heap[self.frame.closure].upvalues[idx];
                    let value = match self.heap[upvalue] {
                        Upvalue::Open(slot) => self.stack.get(slot).unwrap_or_default(),
                        Upvalue::Closed(value) => value,
                    };
                    self.push(value);
                }
                op::SET_UPVALUE => {
                    let idx = self.read_word() as usize;
                    let upvalue = self.heap[self.frame.closure].upvalues[idx];
                    let value = self.peek(0);
                    match self.heap[upvalue] {
                        Upvalue::Open(slot) => {
                            self.stack.set(slot, value);
                        }
                        Upvalue::Closed(_) => self.heap[upvalue] = Upvalue::Closed(value),
                    }
                }
                op::GET_PROPERTY => {
                    let (name, key) = self.read_name();
                    let instance = self.instance(self.peek(0), name)?;
                    let value = self.property(instance, name, &key)?;
                    self.set_peek(0, value);
                }
                op::SET_PROPERTY => {
                    let (name, key) = self.read_name();
                    let value = self.peek(0);
                    let instance = self.instance(self.peek(1), name)?;
                    self.heap[instance].fields.insert(key, value);
                    self.heap.resize(instance.id())?;
                    self.pop();
                    self.set_peek(0, value);
                }
                op::GET_NATIVE => {
                    let idx = self.read_word() as usize;
                    let native = self.natives.get(idx).unwrap_or_default();
                    self.push(native);
                }
                op::GET_CLASS => {
                    let idx = self.read_word() as usize;
                    let class = self.classes.get(idx).unwrap_or_default();
                    self.push(class);
                }
                op::ADD => {
                    let b = self.peek(0);
                    let a = self.peek(1);
                    let value = match arith::add(&self.heap, a, b)? {
                        Computed::Scalar(scalar) => scalar.into(),
                        Computed::String(string) => {
                            self.collect_if_needed();
                            self.heap.alloc_str(string)?.into()
                        }
                    };
                    self.pop();
                    self.set_peek(0, value);
                }
                op::SUB => self.binary_op(arith::sub)?,
                op::MUL => self.binary_op(arith::mul)?,
                op::DIV => self.binary_op(arith::div)?,
                op::MOD => self.binary_op(arith::rem)?,
                op::EQ => self.equality_op(arith::equal, true),
                op::NE => self.equality_op(arith::equal, false),
                op::SEQ => self.equality_op(arith::strict_equal, true),
                op::SNE => self.equality_op(arith::strict_equal, false),
                op::LT => self.compare_op("<", Ordering::is_lt)?,
                op::LE => self.compare_op("<=", Ordering::is_le)?,
                op::GT => self.compare_op(">", Ordering::is_gt)?,
                op::GE => self.compare_op(">=", Ordering::is_ge)?,
                op::AND => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push((a.to_bool() && b.to_bool()).into());
                }
                op::OR => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push((a.to_bool() || b.to_bool()).into());
                }
                op::NEG => {
                    let value = arith::negate(&self.heap, self.peek(0))?;
                    self.set_peek(0, value.into());
                }
                op::NOT => {
                    let value = !self.peek(0).to_bool();
                    self.set_peek(0, value.into());
                }
                op::INC => {
                    let value = arith::step(&self.heap, self.peek(0), 1)?;
                    self.set_peek(0, value.into());
                }
                op::DEC => {
                    let value = arith::step(&self.heap, self.peek(0), -1)?;
                    self.set_peek(0, value.into());
                }
                op::JUMP => {
                    let offset = self.read_word() as usize;
                    self.frame.ip += offset;
                }
                op::JUMP_IF_FALSE => {
                    let offset = self.read_word() as usize;
                    if !self.peek(0).to_bool() {
                        self.frame.ip += offset;
                    }
                }
                op::JUMP_IF_TRUE => {
                    let offset = self.read_word() as usize;
                    if self.peek(0).to_bool() {
                        self.frame.ip += offset;
                    }
                }
                op::JUMP_IF_NULL => {
                    let offset = self.read_word() as usize;
                    if self.peek(0).is_null() {
                        self.frame.ip += offset;
                    }
                }
                op::JUMP_IF_NOT_NULL => {
                    let offset = self.read_word() as usize;
                    if !self.peek(0).is_null() {
                        self.frame.ip += offset;
                    }
                }
                op::JUMP_CASE => {
                    let jump = self.read_word() as usize;
                    let offset = self.read_word() as usize;
                    self.frame.ip += if self.peek(0).to_bool() { offset } else { jump };
                }
                op::JUMP_LIST => {
                    let case = self.read_word() as usize;
                    self.frame.ip = self.heap[self.frame.function].chunk.cases[case] as usize;
                }
                op::LOOP => {
                    let offset = self.read_word() as usize;
                    self.frame.ip -= offset;
                }
                op::CALL => {
                    let arg_count = self.read_word() as usize;
                    let callee = self.peek(arg_count);
                    self.call_value(callee, arg_count)?;
                }
                op::INVOKE => {
                    let (name, key) = self.read_name();
                    let arg_count = self.read_word() as usize;
                    let instance = self.instance(self.peek(arg_count), name)?;
                    match self.heap[instance].fields.get(&key) {
                        Some(field) => {
                            self.set_peek(arg_count, field);
                            self.call_value(field, arg_count)?;
                        }
                        None => {
                            let method = self.property(instance, name, &key)?;
                            self.call_value(method, arg_count)?;
                        }
                    }
                }
                op::CLOSURE => {
                    let Value::Function(function) = self.read_constant() else {
                        unreachable!("closure operand is not a function");
                    };
                    let upvalue_count = self.heap[function].upvalue_count;
                    let mut upvalues = Vec::with_capacity(upvalue_count as usize);
                    for _ in 0..upvalue_count {
                        let is_local = self.read_word() != 0;
                        let idx = self.read_word() as usize;
                        let upvalue = if is_local {
                            self.capture_upvalue(self.frame.slots + idx)?
                        } else {
                            self.heap[self.frame.closure].upvalues[idx]
                        };
                        upvalues.push(upvalue);
                    }
                    let closure = self.alloc(Closure::new(function, upvalues))?;
                    self.push(closure.into());
                }
                op::CLOSE_UPVALUE => {
                    self.close_upvalues(self.stack.len() - 1);
                    self.pop();
                }
                op::RETURN => {
                    let result = self.pop();
                    self.close_upvalues(self.frame.slots);
                    self.stack.truncate(self.frame.slots);
                    match self.frames.pop() {
                        Some(frame) => {
                            self.frame = frame;
                            self.push(result);
                        }
                        None => return Ok(()),
                    }
                }
                op::CLASS => {
                    let (name, _) = self.read_name();
                    let class = Value::from(self.alloc(Class::new(name))?);
                    self.classes.push(class);
                    self.push(class);
                }
                op::METHOD => {
                    let (name, key) = self.read_name();
                    let (Value::Class(class), Value::Closure(method)) = (self.peek(1), self.peek(0)) else {
                        unreachable!("method operands are not a class and a closure");
                    };
                    self.heap[class].methods.insert(key, method.into());
                    if self.heap.str(name) == "init" {
                        self.heap[class].init = Some(method);
                    }
                    self.heap.resize(class.id())?;
                    self.pop();
                }
                op::PRINT => {
                    let value = self.pop();
                    writeln!(stdout, "{}", value.display(&self.heap))
                        .map_err(|_| IoError::WriteError { file: "stdout".to_string() })?;
                }
                op::TABLE => {
                    let capacity = self.capacity(self.peek(0))?;
                    let table = Value::from(self.alloc(Table::with_capacity(capacity))?);
                    self.set_peek(0, table);
                }
                op::STACK => {
                    let capacity = self.capacity(self.peek(0))?;
                    let stack = Value::from(self.alloc(ObjStack::with_capacity(capacity))?);
                    self.set_peek(0, stack);
                }
                op::VECTOR => {
                    let capacity = self.capacity(self.peek(0))?;
                    let vector = Value::from(self.alloc(Vector::with_capacity(capacity))?);
                    self.set_peek(0, vector);
                }
                op::ARRAY => {
                    let kind = self.read_word();
                    let Some(kind) = ArrayKind::from_word(kind) else {
                        unreachable!("invalid array kind {kind}");
                    };
                    let count = self.read_word() as usize;
                    let start = self.stack.len() - count;

                    // A literal is exactly as long as its elements.
                    self.collect_if_needed();
                    let array = self.heap.alloc_array(kind, count)?;
                    for (idx, &value) in self.stack.as_slice()[start..].iter().enumerate() {
                        let scalar = value.as_scalar().and_then(|scalar| kind.coerce(scalar));
                        let scalar = scalar.ok_or_else(|| TypeError::ElementMismatch {
                            container: kind.name().to_string(),
                            type_: value.type_name(&self.heap).to_string(),
                        })?;
                        self.heap.array_set(array, idx, scalar);
                    }
                    self.stack.truncate(start);
                    self.push(array.into());
                }
                op::GET_INDEX => {
                    let index = self.peek(0);
                    let container = self.peek(1);
                    let value = access::get_index(&self.heap, container, index)?;
                    self.pop();
                    self.set_peek(0, value);
                }
                op::SET_INDEX => {
                    let value = self.peek(0);
                    let index = self.peek(1);
                    let container = self.peek(2);
                    access::set_index(&mut self.heap, container, index, value)?;
                    self.stack.truncate(self.stack.len() - 3);
                    self.push(value);
                }
                op::LEN => {
                    let len = access::len(&self.heap, self.peek(0))?;
                    self.set_peek(0, Scalar::num(len as i64).into());
                }
                op::PUSH_VALUE => {
                    let value = self.pop();
                    let container = self.peek(0);
                    access::push(&mut self.heap, container, value)?;
                }
                op::POP_VALUE => {
                    let container = self.peek(0);
                    let value = access::pop(&mut self.heap, container)?;
                    self.set_peek(0, value);
                }
                op::COPY => {
                    self.collect_if_needed();
                    let value = self.peek(0);
                    let copy = access::copy(&mut self.heap, value)?;
                    self.set_peek(0, copy);
                }
                op::REMOVE => {
                    let key = self.pop();
                    let container = self.peek(0);
                    let value = access::remove(&mut self.heap, container, key)?;
                    self.set_peek(0, value);
                }
                op::EACH => {
                    let Value::Scalar(Scalar::Int(cursor)) = self.peek(0) else {
                        unreachable!("iteration cursor is not an int");
                    };
                    let container = self.peek(1);
                    let element = access::each(&self.heap, container, cursor as usize)?;
                    self.set_peek(0, Value::from(cursor + 1));
                    self.push(element);
                }
                _ => unreachable!("invalid op code {op}"),
            }
        }
    }

    /// Allocates an object, collecting first when the threshold is crossed.
    fn alloc<T: HeapObject>(&mut self, object: T) -> Result<Gc<T>> {
        self.collect_if_needed();
        self.heap.alloc(object)
    }

    fn collect_if_needed(&mut self) {
        let collect = match self.config.gc_mode {
            GcMode::Normal => self.heap.bytes_allocated() + mem::size_of::<Object>() > self.next_gc,
            GcMode::Stress => true,
            GcMode::Off => false,
        };
        if collect {
            self.collect_garbage();
        }
    }

    fn call_value(&mut self, callee: Value, arg_count: usize) -> Result<()> {
        match callee {
            Value::Closure(closure) => self.call_closure(closure, arg_count),
            Value::Native(native) => {
                let Native { name, arity, function } = self.heap[native];
                check_arity(name, arity, arg_count)?;

                let start = self.stack.len() - arg_count;
                let result = function(&mut self.heap, &self.stack.as_slice()[start..])?;
                self.stack.truncate(start);
                self.set_peek(0, result);
                Ok(())
            }
            Value::Class(class) => {
                let instance = self.alloc(Instance::new(class))?;
                self.set_peek(arg_count, instance.into());
                match self.heap[class].init {
                    Some(init) => self.call_closure(init, arg_count),
                    None => check_arity("init", 0, arg_count),
                }
            }
            _ => Err(TypeError::NotCallable { type_: callee.type_name(&self.heap).to_string() }.into()),
        }
    }

    fn call_closure(&mut self, closure: Gc<Closure>, arg_count: usize) -> Result<()> {
        let function = self.heap[closure].function;
        let arity = self.heap[function].arity;
        check_arity(&self.heap[function].name, arity, arg_count)?;

        if self.frames.is_full() {
            return Err(OverflowError::StackOverflow.into());
        }
        let frame = CallFrame { closure, function, ip: 0, slots: self.stack.len() - arg_count - 1 };
        self.frames.push(mem::replace(&mut self.frame, frame));
        Ok(())
    }

    fn binary_op(&mut self, op: fn(&Heap, Value, Value) -> Result<Scalar>) -> Result<()> {
        let b = self.pop();
        let a = self.peek(0);
        let value = op(&self.heap, a, b)?;
        self.set_peek(0, value.into());
        Ok(())
    }

    fn equality_op(&mut self, op: fn(&Heap, Value, Value) -> bool, expected: bool) {
        let b = self.pop();
        let a = self.peek(0);
        let value = op(&self.heap, a, b) == expected;
        self.set_peek(0, value.into());
    }

    fn compare_op(&mut self, op: &str, accept: fn(Ordering) -> bool) -> Result<()> {
        let b = self.pop();
        let a = self.peek(0);
        let ordering = arith::compare(&self.heap, op, a, b)?;
        self.set_peek(0, ordering.map_or(false, accept).into());
        Ok(())
    }

    fn instance(&self, value: Value, name: Gc<ObjString>) -> Result<Gc<Instance>> {
        match value {
            Value::Instance(instance) => Ok(instance),
            _ => Err(AttributeError::NotAnInstance {
                type_: value.type_name(&self.heap).to_string(),
                name: self.heap.str(name).to_string(),
            }
            .into()),
        }
    }

    /// Looks a name up in the fields of an instance, then in the methods of
    /// its class.
    fn property(&self, instance: Gc<Instance>, name: Gc<ObjString>, key: &Key) -> Result<Value> {
        let instance = &self.heap[instance];
        if let Some(field) = instance.fields.get(key) {
            return Ok(field);
        }
        let class = &self.heap[instance.class];
        class.methods.get(key).ok_or_else(|| {
            AttributeError::NoSuchAttribute {
                type_: self.heap.str(class.name).to_string(),
                name: self.heap.str(name).to_string(),
            }
            .into()
        })
    }

    fn capacity(&self, value: Value) -> Result<usize> {
        value
            .as_scalar()
            .and_then(Scalar::integral)
            .and_then(|capacity| usize::try_from(capacity).ok())
            .ok_or_else(|| TypeError::InvalidCapacity { type_: value.type_name(&self.heap).to_string() }.into())
    }

    fn not_defined(&self, name: Gc<ObjString>) -> Error {
        NameError::NotDefined { name: self.heap.str(name).to_string() }.into()
    }

    fn read_word(&mut self) -> u16 {
        let word = self.heap[self.frame.function].chunk.code[self.frame.ip];
        self.frame.ip += 1;
        word
    }

    fn read_constant(&mut self) -> Value {
        let idx = self.read_word() as usize;
        self.heap[self.frame.function].chunk.constants.get(idx).unwrap_or_default()
    }

    /// Reads a string constant used as a global, property or class name.
    fn read_name(&mut self) -> (Gc<ObjString>, Key) {
        match self.read_constant() {
            Value::Scalar(scalar @ Scalar::Str(name)) => (name, Key { hash: self.heap[name].hash, scalar }),
            value => unreachable!("name operand is not a string: {value:?}"),
        }
    }

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().unwrap_or_default()
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack.peek(distance).unwrap_or_default()
    }

    fn set_peek(&mut self, distance: usize, value: Value) {
        let idx = self.stack.len() - distance - 1;
        self.stack.set(idx, value);
    }

    fn capture_upvalue(&mut self, slot: usize) -> Result<Gc<Upvalue>> {
        let heap = &self.heap;
        match self.open_upvalues.binary_search_by_key(&slot, |&upvalue| open_slot(heap, upvalue)) {
            Ok(idx) => Ok(self.open_upvalues[idx]),
            Err(idx) => {
                let upvalue = self.alloc(Upvalue::Open(slot))?;
                self.open_upvalues.insert(idx, upvalue);
                Ok(upvalue)
            }
        }
    }

    /// Closes every open upvalue at or above `last`.
    fn close_upvalues(&mut self, last: usize) {
        let heap = &self.heap;
        let idx = self.open_upvalues.partition_point(|&upvalue| open_slot(heap, upvalue) < last);
        for upvalue in self.open_upvalues.drain(idx..) {
            if let Upvalue::Open(slot) = self.heap[upvalue] {
                self.heap[upvalue] = Upvalue::Closed(self.stack.get(slot).unwrap_or_default());
            }
        }
    }

    /// One line per active frame, innermost first.
    fn trace(&self) -> Vec<String> {
        iter::once(&self.frame)
            .chain(self.frames.iter().rev())
            .filter_map(|frame| {
                let function = self.heap.get(frame.function)?;
                let line = function.chunk.line(frame.ip.saturating_sub(1)).unwrap_or_default();
                Some(if function.name.is_empty() {
                    format!("[line {line}] in script")
                } else {
                    format!("[line {line}] in {}()", function.name)
                })
            })
            .collect()
    }

    fn reset(&mut self) {
        self.close_upvalues(0);
        self.stack.reset();
        self.frames.clear();
        self.frame = CallFrame::dangling();
    }
}

fn check_arity(name: &str, arity: u8, arg_count: usize) -> Result<()> {
    if arg_count == arity as usize {
        Ok(())
    } else {
        Err(TypeError::ArityMismatch { name: name.to_string(), exp_args: arity as usize, got_args: arg_count }
            .into())
    }
}

fn open_slot(heap: &Heap, upvalue: Gc<Upvalue>) -> usize {
    match heap[upvalue] {
        Upvalue::Open(slot) => slot,
        Upvalue::Closed(_) => usize::MAX,
    }
}

#[derive(Clone, Copy, Debug)]
struct CallFrame {
    closure: Gc<Closure>,
    function: Gc<Function>,
    /// Index of the next word in the function's code.
    ip: usize,
    /// Stack index of slot 0, which holds the callee.
    slots: usize,
}

impl CallFrame {
    fn dangling() -> Self {
        Self { closure: Gc::dangling(), function: Gc::dangling(), ip: 0, slots: 0 }
    }
}

/// An error raised while running bytecode, with the call stack at the point
/// of failure.
#[derive(Clone, Debug, Error, PartialEq)]
#[error("{error}")]
pub struct RuntimeError {
    pub error: Error,
    pub trace: Vec<String>,
}

impl RuntimeError {
    pub fn report(&self, writer: &mut dyn WriteColor) -> io::Result<()> {
        report_trace(writer, &self.error, &self.trace)
    }
}

#[derive(Debug, Error)]
pub enum InterpretError {
    #[error("compilation failed with {} error(s)", .0.len())]
    Compile(Vec<ErrorS>),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl InterpretError {
    /// Process exit status for the error, following `sysexits.h`.
    pub fn exit_code(&self) -> i32 {
        match self {
            InterpretError::Compile(_) => 65,
            InterpretError::Runtime(_) => 70,
        }
    }

    pub fn report(&self, writer: &mut dyn WriteColor, source: &str) -> io::Result<()> {
        match self {
            InterpretError::Compile(errors) => {
                errors.iter().try_for_each(|e| report_err(writer, source, e))
            }
            InterpretError::Runtime(e) => e.report(writer),
        }
    }
}
