//! Per-loop records of the jumps that target each loop.
//!
//! The executable tree has no labels: `break` and `continue` unwind to the
//! nearest [`Stmt::BreakTarget`] or [`Stmt::ContinueTarget`]. Those wrappers
//! are only emitted for loops that actually contain the matching jump.

use crate::error::CodegenErrorType;
use arbor_compiler_core::tree::Stmt;

const MAXBLOCKS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopKind {
    While,
    For,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LoopInfo {
    pub(crate) kind: LoopKind,
    pub(crate) has_break: bool,
    pub(crate) has_continue: bool,
}

/// Loops enclosing the statement being translated, innermost last.
///
/// Every function and class body starts with an empty stack.
#[derive(Debug, Default)]
pub(crate) struct LoopStack {
    loops: Vec<LoopInfo>,
}

impl LoopStack {
    pub(crate) fn push(&mut self, kind: LoopKind) -> Result<(), CodegenErrorType> {
        if self.loops.len() >= MAXBLOCKS {
            return Err(CodegenErrorType::SyntaxError(
                "too many statically nested blocks".to_owned(),
            ));
        }
        self.loops.push(LoopInfo {
            kind,
            has_break: false,
            has_continue: false,
        });
        Ok(())
    }

    pub(crate) fn pop(&mut self) -> Option<LoopInfo> {
        self.loops.pop()
    }

    pub(crate) fn mark_break(&mut self) -> Result<(), CodegenErrorType> {
        let innermost = self.loops.last_mut().ok_or(CodegenErrorType::InvalidBreak)?;
        innermost.has_break = true;
        Ok(())
    }

    pub(crate) fn mark_continue(&mut self) -> Result<(), CodegenErrorType> {
        let innermost = self
            .loops
            .last_mut()
            .ok_or(CodegenErrorType::InvalidContinue)?;
        innermost.has_continue = true;
        Ok(())
    }
}

/// Assembles a translated loop with its jump targets.
///
/// `build` receives the (possibly wrapped) body and returns the bare loop.
/// `orelse` must already be translated outside of the loop, since a `break`
/// in it belongs to an enclosing loop.
pub(crate) fn wire_loop(
    info: LoopInfo,
    body: Stmt,
    orelse: Stmt,
    build: impl FnOnce(Box<Stmt>) -> Stmt,
) -> Stmt {
    let body = if info.has_continue {
        Stmt::ContinueTarget(Box::new(body))
    } else {
        body
    };
    let looped = build(Box::new(body));
    trace!(
        "wired {:?} loop: break={} continue={}",
        info.kind, info.has_break, info.has_continue
    );
    if info.has_break {
        Stmt::BreakTarget {
            body: Box::new(looped),
            orelse: Box::new(orelse),
        }
    } else if orelse.is_empty() {
        looped
    } else {
        Stmt::Block(vec![looped, orelse])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_compiler_core::tree::{ConstantData, Expr};

    fn while_true(body: Box<Stmt>) -> Stmt {
        Stmt::While {
            test: Expr::Constant(ConstantData::Boolean { value: true }),
            body,
        }
    }

    #[test]
    fn jumps_outside_loops_are_rejected() {
        let mut loops = LoopStack::default();
        assert!(matches!(
            loops.mark_break(),
            Err(CodegenErrorType::InvalidBreak)
        ));
        assert!(matches!(
            loops.mark_continue(),
            Err(CodegenErrorType::InvalidContinue)
        ));
    }

    #[test]
    fn jumps_mark_the_innermost_loop() {
        let mut loops = LoopStack::default();
        loops.push(LoopKind::For).unwrap();
        loops.push(LoopKind::While).unwrap();
        loops.mark_continue().unwrap();
        let inner = loops.pop().unwrap();
        assert_eq!(inner.kind, LoopKind::While);
        assert!(inner.has_continue && !inner.has_break);
        loops.mark_break().unwrap();
        let outer = loops.pop().unwrap();
        assert!(outer.has_break && !outer.has_continue);
        assert!(loops.pop().is_none());
    }

    #[test]
    fn plain_loops_are_not_wrapped() {
        let info = LoopInfo {
            kind: LoopKind::While,
            has_break: false,
            has_continue: false,
        };
        let wired = wire_loop(info, Stmt::Pass, Stmt::Return(None), while_true);
        assert_eq!(
            wired,
            Stmt::Block(vec![while_true(Box::new(Stmt::Pass)), Stmt::Return(None)])
        );
    }

    #[test]
    fn break_and_continue_get_targets() {
        let info = LoopInfo {
            kind: LoopKind::While,
            has_break: true,
            has_continue: true,
        };
        let wired = wire_loop(info, Stmt::Break, Stmt::empty(), while_true);
        assert_eq!(
            wired,
            Stmt::BreakTarget {
                body: Box::new(while_true(Box::new(Stmt::ContinueTarget(Box::new(
                    Stmt::Break
                ))))),
                orelse: Box::new(Stmt::empty()),
            }
        );
    }

    #[test]
    fn nesting_is_bounded() {
        let mut loops = LoopStack::default();
        for _ in 0..MAXBLOCKS {
            loops.push(LoopKind::For).unwrap();
        }
        assert!(loops.push(LoopKind::For).is_err());
    }
}
