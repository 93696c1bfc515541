// Copyright (c) 2016-2020 Fabian Schuiki

//! The conditional-compilation stack.
//!
//! Each `#if`/`#ifdef`/`#ifndef` pushes a frame; `#elif` and `#else` rewrite
//! the top frame; `#endif` pops it. Source lines are emitted only while
//! every frame on the stack is active.

/// State of one open conditional.
#[derive(Debug, Clone, Copy)]
pub struct Frame {
    /// The current branch emits.
    active: bool,
    /// Some branch of this conditional has been active since the frame was
    /// created; later `#elif`/`#else` branches must stay inactive.
    any_taken: bool,
    /// The `#else` clause has been entered; further `#elif`/`#else` are
    /// invalid.
    in_else: bool,
    /// Whether the enclosing context was emitting when the frame was pushed.
    parent_active: bool,
}

/// Ordered stack of conditional frames.
#[derive(Debug, Default)]
pub struct CondStack {
    frames: Vec<Frame>,
}

impl CondStack {
    pub fn new() -> CondStack {
        CondStack { frames: Vec::new() }
    }

    /// True iff every frame on the stack is active. Source lines and the
    /// state-changing directives (`#define`, `#undef`, `#include`) take
    /// effect only while this holds.
    pub fn emit(&self) -> bool {
        self.frames.iter().all(|f| f.active)
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Whether the condition of an `#if` about to be pushed needs to be
    /// evaluated at all: inside an inactive region no branch can ever emit.
    pub fn wants_condition(&self) -> bool {
        self.emit()
    }

    /// Whether the condition of an `#elif` on the top frame needs to be
    /// evaluated: only when the frame could still activate.
    pub fn wants_elif_condition(&self) -> bool {
        match self.frames.last() {
            Some(f) => f.parent_active && !f.any_taken && !f.in_else,
            None => false,
        }
    }

    /// Open a new conditional with the given condition.
    pub fn push(&mut self, cond: bool) {
        let parent_active = self.emit();
        self.frames.push(Frame {
            active: cond,
            any_taken: cond,
            in_else: false,
            parent_active,
        });
    }

    /// Handle `#elif cond` on the top frame.
    pub fn elif(&mut self, cond: bool) -> Result<(), String> {
        let frame = match self.frames.last_mut() {
            Some(f) => f,
            None => return Err("#elif without matching #if".to_string()),
        };
        if frame.in_else {
            return Err("#elif after #else".to_string());
        }
        if !frame.parent_active || frame.any_taken {
            frame.active = false;
        } else {
            frame.active = cond;
            frame.any_taken = cond;
        }
        Ok(())
    }

    /// Handle `#else` on the top frame.
    pub fn else_(&mut self) -> Result<(), String> {
        let frame = match self.frames.last_mut() {
            Some(f) => f,
            None => return Err("#else without matching #if".to_string()),
        };
        if frame.in_else {
            return Err("#else after #else".to_string());
        }
        frame.in_else = true;
        frame.active = frame.parent_active && !frame.any_taken;
        frame.any_taken |= frame.active;
        Ok(())
    }

    /// Handle `#endif`.
    pub fn endif(&mut self) -> Result<(), String> {
        match self.frames.pop() {
            Some(_) => Ok(()),
            None => Err("#endif without matching #if".to_string()),
        }
    }

    /// Discard frames beyond `depth`, returning how many were dropped. Used
    /// when a source frame reaches EOF with conditionals still open.
    pub fn truncate(&mut self, depth: usize) -> usize {
        let dropped = self.frames.len().saturating_sub(depth);
        self.frames.truncate(depth);
        dropped
    }
}
