use std::mem;

use cart_common::error::{OverflowError, Result};
use cart_common::types::Line;

use crate::op;
use crate::stack::Stack;
use crate::value::Value;

/// Compiled code of one function.
#[derive(Debug, Default)]
pub struct Chunk {
    pub code: Vec<u16>,
    pub lines: VecRun<Line>,
    /// Absolute code offsets targeted by `op::JUMP_LIST`.
    pub cases: Vec<u16>,
    pub constants: Stack<Value>,
}

impl Chunk {
    pub fn write(&mut self, word: u16, line: Line) {
        self.code.push(word);
        self.lines.push(line);
    }

    /// Adds a constant and returns its index. If an equal [`Value`] is
    /// already present, its index is returned instead.
    pub fn write_constant(&mut self, value: Value) -> Result<u16> {
        let found = self.constants.iter().position(|&constant| constant == value);
        let idx = match found {
            Some(idx) => idx,
            None => {
                self.constants.push(value);
                self.constants.len() - 1
            }
        };
        u16::try_from(idx).map_err(|_| OverflowError::TooManyConstants.into())
    }

    /// Writes `op::CONSTANT` followed by the index of `value`.
    pub fn emit_constant(&mut self, value: Value, line: Line) -> Result<()> {
        let idx = self.write_constant(value)?;
        self.write(op::CONSTANT, line);
        self.write(idx, line);
        Ok(())
    }

    /// Records the current end of the code as a case target and returns its
    /// index.
    pub fn add_case(&mut self) -> Result<u16> {
        let target = u16::try_from(self.code.len()).map_err(|_| OverflowError::JumpTooLarge)?;
        self.cases.push(target);
        u16::try_from(self.cases.len() - 1).map_err(|_| OverflowError::JumpTooLarge.into())
    }

    /// Writes a forward jump with a placeholder offset and returns the
    /// position of the offset, for [`Chunk::patch_jump`].
    pub fn emit_jump(&mut self, op: u16, line: Line) -> usize {
        self.write(op, line);
        self.write(u16::MAX, line);
        self.code.len() - 1
    }

    /// Points the jump whose offset is stored at `at` to the end of the code.
    pub fn patch_jump(&mut self, at: usize) -> Result<()> {
        let offset = self.code.len() - at - 1;
        self.code[at] = u16::try_from(offset).map_err(|_| OverflowError::JumpTooLarge)?;
        Ok(())
    }

    /// Writes a backward jump to `start`.
    pub fn emit_loop(&mut self, start: usize, line: Line) -> Result<()> {
        self.write(op::LOOP, line);
        let offset = self.code.len() + 1 - start;
        let offset = u16::try_from(offset).map_err(|_| OverflowError::JumpTooLarge)?;
        self.write(offset, line);
        Ok(())
    }

    /// Source line of the word at `ip`.
    pub fn line(&self, ip: usize) -> Option<Line> {
        self.lines.get(ip).copied()
    }

    /// Bytes of storage reserved by this chunk.
    pub fn footprint(&self) -> usize {
        self.code.capacity() * mem::size_of::<u16>()
            + self.cases.capacity() * mem::size_of::<u16>()
            + self.constants.footprint()
    }
}

/// Run-length encoded [`Vec`]. Useful for storing data with a lot of contiguous
/// runs of the same value.
#[derive(Debug, Default)]
pub struct VecRun<T> {
    values: Vec<Run<T>>,
}

impl<T: Eq> VecRun<T> {
    pub fn push(&mut self, value: T) {
        match self.values.last_mut() {
            Some(run) if run.value == value && run.count < u8::MAX => {
                run.count += 1;
            }
            _ => self.values.push(Run { value, count: 1 }),
        };
    }
}

impl<T> VecRun<T> {
    pub fn get(&self, index: usize) -> Option<&T> {
        let mut count = index;
        for run in &self.values {
            match count.checked_sub(run.count as usize) {
                Some(remaining) => count = remaining,
                None => return Some(&run.value),
            }
        }
        None
    }
}

#[derive(Debug)]
struct Run<T> {
    value: T,
    count: u8,
}
