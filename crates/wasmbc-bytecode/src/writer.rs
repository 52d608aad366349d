//! Sequential instruction sink with label resolution.
//!
//! The writer is driven by one function generator at a time:
//! `begin` → (`define_label` | `mark_label` | `emit` | `enter_loop` | `exit_loop`)* → `end`.
//! A failed generation calls `reset`, which drops everything written so far so
//! that no half-written code survives.

use crate::{BytecodeError, Instr, Label};
use std::fmt;

/// Loop bookkeeping kept for later optimization passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopInfo {
    /// Label marking the loop head.
    pub head: Label,
    /// Instruction offset of the head.
    pub start: usize,
    /// Instruction offset just past the loop, once exited.
    pub end: Option<usize>,
}

/// Finished code for one function.
#[derive(Debug, Clone, PartialEq)]
pub struct Code {
    pub instrs: Vec<Instr>,
    /// Instruction offset of each label, indexed by label number.
    pub label_offsets: Vec<usize>,
    pub loops: Vec<LoopInfo>,
}

impl Code {
    /// Instruction offset `label` resolves to.
    pub fn label_offset(&self, label: Label) -> Option<usize> {
        self.label_offsets.get(label.0 as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut by_offset: Vec<(usize, u32)> = self
            .label_offsets
            .iter()
            .enumerate()
            .map(|(label, &offset)| (offset, label as u32))
            .collect();
        by_offset.sort_unstable();
        let mut pending = by_offset.iter().peekable();

        for (offset, instr) in self.instrs.iter().enumerate() {
            while let Some(&&(at, label)) = pending.peek() {
                if at != offset {
                    break;
                }
                writeln!(f, "{}:", Label(label))?;
                pending.next();
            }
            writeln!(f, "  {offset:4}  {instr}")?;
        }
        for &(_, label) in pending {
            writeln!(f, "{}:", Label(label))?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ByteCodeWriter {
    instrs: Vec<Instr>,
    labels: Vec<Option<usize>>,
    loops: Vec<LoopInfo>,
    open_loops: Vec<u32>,
    active: bool,
}

impl ByteCodeWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start writing a new function, discarding any previous state.
    pub fn begin(&mut self) {
        self.reset();
        self.active = true;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Drop everything written since `begin`.
    pub fn reset(&mut self) {
        self.instrs.clear();
        self.labels.clear();
        self.loops.clear();
        self.open_loops.clear();
        self.active = false;
    }

    pub fn instruction_count(&self) -> usize {
        self.instrs.len()
    }

    pub fn define_label(&mut self) -> Label {
        let label = Label(self.labels.len() as u32);
        self.labels.push(None);
        label
    }

    /// Bind `label` to the position of the next emitted instruction.
    pub fn mark_label(&mut self, label: Label) -> Result<(), BytecodeError> {
        self.check_active()?;
        let entry = self
            .labels
            .get_mut(label.0 as usize)
            .ok_or(BytecodeError::UnknownLabel(label))?;
        if entry.is_some() {
            return Err(BytecodeError::LabelAlreadyMarked(label));
        }
        *entry = Some(self.instrs.len());
        Ok(())
    }

    pub fn emit(&mut self, instr: Instr) -> Result<(), BytecodeError> {
        self.check_active()?;
        if let Some(target) = instr.branch_target() {
            if target.0 as usize >= self.labels.len() {
                return Err(BytecodeError::UnknownLabel(target));
            }
        }
        self.instrs.push(instr);
        Ok(())
    }

    pub fn br(&mut self, target: Label) -> Result<(), BytecodeError> {
        self.emit(Instr::Br { target })
    }

    /// Mark `head` as a loop head and open a loop record. Returns the loop id.
    pub fn enter_loop(&mut self, head: Label) -> Result<u32, BytecodeError> {
        self.mark_label(head)?;
        let id = self.loops.len() as u32;
        self.loops.push(LoopInfo {
            head,
            start: self.instrs.len(),
            end: None,
        });
        self.open_loops.push(id);
        Ok(id)
    }

    pub fn exit_loop(&mut self, id: u32) -> Result<(), BytecodeError> {
        self.check_active()?;
        if self.open_loops.pop() != Some(id) {
            return Err(BytecodeError::UnbalancedLoop(id));
        }
        if let Some(info) = self.loops.get_mut(id as usize) {
            info.end = Some(self.instrs.len());
        }
        Ok(())
    }

    /// Finish the function. Every label a jump refers to must be marked.
    pub fn end(&mut self) -> Result<Code, BytecodeError> {
        self.check_active()?;
        if let Some(&id) = self.open_loops.last() {
            return Err(BytecodeError::UnbalancedLoop(id));
        }
        for instr in &self.instrs {
            if let Some(target) = instr.branch_target() {
                if self.labels[target.0 as usize].is_none() {
                    return Err(BytecodeError::UnmarkedLabel(target));
                }
            }
        }
        // Unreferenced, unmarked labels resolve past the end.
        let end = self.instrs.len();
        let label_offsets = self.labels.iter().map(|l| l.unwrap_or(end)).collect();
        let code = Code {
            instrs: std::mem::take(&mut self.instrs),
            label_offsets,
            loops: std::mem::take(&mut self.loops),
        };
        self.reset();
        Ok(code)
    }

    fn check_active(&self) -> Result<(), BytecodeError> {
        if self.active {
            Ok(())
        } else {
            Err(BytecodeError::WriterInactive)
        }
    }
}
