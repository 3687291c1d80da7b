//! Lowering of generator bodies into resumable form.
//!
//! A suspended generator is resumed by running its body again from the top.
//! Resumable statements keep their progress in slots of the generator
//! instance and skip whatever already ran, so control flows straight back to
//! the `yield` that suspended, which then evaluates to the sent value.
//!
//! Sub-expressions evaluated before a yield would run again on that path.
//! Unless reading them twice is harmless they are hoisted into an
//! [`Expr::SideEffects`] that stores each of them once into a temporary.

use crate::error::InternalError;
use arbor_compiler_core::tree::{
    ConstantData, ExceptHandler, Expr, GeneratorDescriptor, MakeClass, MakeFunction, NameRef,
    Stmt, Target, YieldKind, YieldPoint,
};
use core::{iter, mem};

type TransformResult<T> = Result<T, InternalError>;

/// Rewrites a translated generator body and returns it with the shape of the
/// storage each instance needs.
///
/// Fast locals become persistent ones. Temporaries introduced for hoisting
/// are appended to `varnames`.
pub fn transform(
    body: Stmt,
    varnames: &mut Vec<String>,
) -> TransformResult<(Stmt, GeneratorDescriptor)> {
    let mut transformer = Transformer {
        varnames,
        descriptor: GeneratorDescriptor::default(),
        temporaries: 0,
    };
    let body = match body {
        Stmt::Block(body) => body,
        body => vec![body],
    };
    let position = transformer.position();
    let body = transformer.stmts(body)?;
    let descriptor = transformer.descriptor;
    debug!(
        "made generator resumable: {} yields, {} flags, {} positions, {} iterators, {} exceptions",
        descriptor.yields.len(),
        descriptor.flag_slots,
        descriptor.position_slots,
        descriptor.iterator_slots,
        descriptor.exception_slots,
    );
    Ok((Stmt::GeneratorBlock { body, position }, descriptor))
}

struct Transformer<'a> {
    varnames: &'a mut Vec<String>,
    descriptor: GeneratorDescriptor,
    temporaries: u32,
}

fn redirect(name: &mut NameRef) {
    if let NameRef::Fast(index) = *name {
        *name = NameRef::Persistent(index);
    }
}

fn target_contains_yield(target: &Target) -> bool {
    match target {
        Target::Name(_) => false,
        Target::Attribute { value, .. } => value.contains_yield(),
        Target::Subscript { value, index } => value.contains_yield() || index.contains_yield(),
        Target::Unpack { targets, .. } => targets.iter().any(target_contains_yield),
    }
}

impl Transformer<'_> {
    fn flag(&mut self) -> u32 {
        let slot = self.descriptor.flag_slots;
        self.descriptor.flag_slots += 1;
        slot
    }

    fn position(&mut self) -> u32 {
        let slot = self.descriptor.position_slots;
        self.descriptor.position_slots += 1;
        slot
    }

    fn iterator(&mut self) -> u32 {
        let slot = self.descriptor.iterator_slots;
        self.descriptor.iterator_slots += 1;
        slot
    }

    fn exception(&mut self) -> u32 {
        let slot = self.descriptor.exception_slots;
        self.descriptor.exception_slots += 1;
        slot
    }

    fn temporary(&mut self) -> NameRef {
        self.varnames.push(format!(".h{}", self.temporaries));
        self.temporaries += 1;
        NameRef::Persistent((self.varnames.len() - 1) as u32)
    }

    fn yield_point(&mut self, index: &mut Option<u32>, kind: YieldKind) -> TransformResult<()> {
        if let Some(index) = *index {
            return Err(InternalError::YieldIndexCollision(index));
        }
        let next = self.descriptor.yields.len() as u32;
        debug_assert!(
            self.descriptor.yields.iter().all(|point| point.index != next),
            "yield index {next} assigned twice"
        );
        self.descriptor.yields.push(YieldPoint { index: next, kind });
        *index = Some(next);
        Ok(())
    }

    fn stmts(&mut self, body: Vec<Stmt>) -> TransformResult<Vec<Stmt>> {
        body.into_iter().map(|stmt| self.stmt(stmt)).collect()
    }

    fn boxed(&mut self, stmt: Box<Stmt>) -> TransformResult<Box<Stmt>> {
        Ok(Box::new(self.stmt(*stmt)?))
    }

    fn stmt(&mut self, stmt: Stmt) -> TransformResult<Stmt> {
        let resumable = stmt.contains_yield();
        let stmt = match stmt {
            Stmt::Expr(value) => Stmt::Expr(self.expr(value)?),
            Stmt::PrintExpr(value) => Stmt::PrintExpr(self.expr(value)?),
            Stmt::Assign { target, value } => self.assign(target, value)?,
            Stmt::Delete(mut target) => {
                self.target(&mut target)?;
                Stmt::Delete(target)
            }
            Stmt::Block(body) if resumable => {
                let position = self.position();
                Stmt::GeneratorBlock {
                    body: self.stmts(body)?,
                    position,
                }
            }
            Stmt::Block(body) => Stmt::Block(self.stmts(body)?),
            Stmt::If { test, body, orelse } if resumable => {
                let then_flag = self.flag();
                let else_flag = self.flag();
                Stmt::GeneratorIf {
                    test: self.expr(test)?,
                    body: self.boxed(body)?,
                    orelse: self.boxed(orelse)?,
                    then_flag,
                    else_flag,
                }
            }
            Stmt::If { test, body, orelse } => Stmt::If {
                test: self.expr(test)?,
                body: self.boxed(body)?,
                orelse: self.boxed(orelse)?,
            },
            Stmt::While { test, body } if resumable => {
                let flag = self.flag();
                Stmt::GeneratorWhile {
                    test: self.expr(test)?,
                    body: self.boxed(body)?,
                    flag,
                }
            }
            Stmt::While { test, body } => Stmt::While {
                test: self.expr(test)?,
                body: self.boxed(body)?,
            },
            Stmt::For { target, iter, body } if resumable => {
                let flag = self.flag();
                let iterator = self.iterator();
                let iter = self.expr(iter)?;
                let mut prologue = Vec::new();
                let target = self.bound_target(target, &mut prologue)?;
                Stmt::GeneratorFor {
                    target,
                    iter,
                    body: Box::new(self.with_prologue(prologue, *body)?),
                    flag,
                    iterator,
                }
            }
            Stmt::For {
                mut target,
                iter,
                body,
            } => {
                let iter = self.expr(iter)?;
                self.target(&mut target)?;
                Stmt::For {
                    target,
                    iter,
                    body: self.boxed(body)?,
                }
            }
            Stmt::ContinueTarget(body) => Stmt::ContinueTarget(self.boxed(body)?),
            Stmt::BreakTarget { body, orelse } if orelse.contains_yield() => {
                self.break_target(*body, *orelse)?
            }
            Stmt::BreakTarget { body, orelse } => Stmt::BreakTarget {
                body: self.boxed(body)?,
                orelse: self.boxed(orelse)?,
            },
            Stmt::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } if resumable => self.try_stmt(*body, handlers, *orelse, finalbody)?,
            Stmt::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => Stmt::Try {
                body: self.boxed(body)?,
                handlers: self.handlers(handlers)?,
                orelse: self.boxed(orelse)?,
                finalbody: finalbody.map(|stmt| self.boxed(stmt)).transpose()?,
            },
            Stmt::With {
                context,
                target,
                body,
            } if resumable => {
                let flag = self.flag();
                let manager = self.iterator();
                let context = self.expr(context)?;
                let mut prologue = Vec::new();
                let target = target
                    .map(|target| self.bound_target(target, &mut prologue))
                    .transpose()?;
                Stmt::GeneratorWith {
                    context,
                    target,
                    body: Box::new(self.with_prologue(prologue, *body)?),
                    flag,
                    manager,
                }
            }
            Stmt::With {
                context,
                mut target,
                body,
            } => {
                let context = self.expr(context)?;
                if let Some(target) = &mut target {
                    self.target(target)?;
                }
                Stmt::With {
                    context,
                    target,
                    body: self.boxed(body)?,
                }
            }
            Stmt::Raise {
                mut exc,
                mut cause,
            } => {
                self.statement_operands(exc.iter_mut().chain(cause.iter_mut()).collect())?;
                Stmt::Raise { exc, cause }
            }
            Stmt::Return(value) => Stmt::Return(value.map(|value| self.expr(value)).transpose()?),
            Stmt::Assert { mut test, mut msg } => {
                self.statement_operands(iter::once(&mut test).chain(msg.iter_mut()).collect())?;
                Stmt::Assert { test, msg }
            }
            stmt @ (Stmt::Break | Stmt::Continue | Stmt::Pass) => stmt,
            Stmt::GeneratorBlock { .. }
            | Stmt::GeneratorIf { .. }
            | Stmt::GeneratorWhile { .. }
            | Stmt::GeneratorFor { .. }
            | Stmt::GeneratorTryExcept { .. }
            | Stmt::GeneratorTryFinally { .. }
            | Stmt::GeneratorWith { .. } => return Err(InternalError::ResumableInput),
        };
        Ok(stmt)
    }

    fn handlers(&mut self, handlers: Vec<ExceptHandler>) -> TransformResult<Vec<ExceptHandler>> {
        handlers
            .into_iter()
            .map(|ExceptHandler { typ, mut name, body }| {
                if let Some(name) = &mut name {
                    redirect(name);
                }
                Ok(ExceptHandler {
                    typ: typ.map(|typ| self.expr(typ)).transpose()?,
                    name,
                    body: self.stmt(body)?,
                })
            })
            .collect()
    }

    fn try_stmt(
        &mut self,
        body: Stmt,
        handlers: Vec<ExceptHandler>,
        orelse: Stmt,
        finalbody: Option<Box<Stmt>>,
    ) -> TransformResult<Stmt> {
        let Some(finalbody) = finalbody else {
            let position = self.position();
            let exception = self.exception();
            return Ok(Stmt::GeneratorTryExcept {
                body: Box::new(self.stmt(body)?),
                handlers: self.handlers(handlers)?,
                orelse: Box::new(self.stmt(orelse)?),
                position,
                exception,
            });
        };
        let flag = self.flag();
        let pending = self.exception();
        let body = if handlers.is_empty() && orelse.is_empty() {
            self.stmt(body)?
        } else {
            self.stmt(Stmt::Try {
                body: Box::new(body),
                handlers,
                orelse: Box::new(orelse),
                finalbody: None,
            })?
        };
        Ok(Stmt::GeneratorTryFinally {
            body: Box::new(body),
            finalbody: self.boxed(finalbody)?,
            flag,
            pending,
        })
    }

    /// A loop `else` that may suspend runs after the break target, guarded by
    /// a temporary set once the loop finishes without `break`.
    fn break_target(&mut self, body: Stmt, orelse: Stmt) -> TransformResult<Stmt> {
        let position = self.position();
        let completed = self.temporary();
        let set = |value| Stmt::Assign {
            target: Target::Name(completed.clone()),
            value: Expr::Constant(ConstantData::Boolean { value }),
        };
        let looped = self.stmt(Stmt::Block(vec![body, set(true)]))?;
        let orelse = self.stmt(Stmt::If {
            test: Expr::Load(completed.clone()),
            body: Box::new(orelse),
            orelse: Box::new(Stmt::empty()),
        })?;
        Ok(Stmt::GeneratorBlock {
            body: vec![
                set(false),
                Stmt::BreakTarget {
                    body: Box::new(looped),
                    orelse: Box::new(Stmt::empty()),
                },
                orelse,
            ],
            position,
        })
    }

    fn assign(&mut self, mut target: Target, value: Expr) -> TransformResult<Stmt> {
        let value = self.expr(value)?;
        if !target_contains_yield(&target) {
            self.target(&mut target)?;
            return Ok(Stmt::Assign { target, value });
        }
        // Storing may suspend: keep the value so it is not computed again.
        let position = self.position();
        let temp = self.temporary();
        let mut body = vec![Stmt::Assign {
            target: Target::Name(temp.clone()),
            value,
        }];
        self.store(target, temp, &mut body)?;
        Ok(Stmt::GeneratorBlock { body, position })
    }

    /// Appends statements storing `source` into `target`. Unpacking into
    /// targets that may suspend goes through one temporary per element.
    fn store(&mut self, mut target: Target, source: NameRef, body: &mut Vec<Stmt>) -> TransformResult<()> {
        if let Target::Unpack {
            targets,
            star_index,
        } = &mut target
            && targets.iter().any(target_contains_yield)
        {
            let targets = mem::take(targets);
            let temps: Vec<NameRef> = targets.iter().map(|_| self.temporary()).collect();
            body.push(Stmt::Assign {
                target: Target::Unpack {
                    targets: temps.iter().cloned().map(Target::Name).collect(),
                    star_index: *star_index,
                },
                value: Expr::Load(source),
            });
            for (target, temp) in targets.into_iter().zip(temps) {
                self.store(target, temp, body)?;
            }
            return Ok(());
        }
        self.target(&mut target)?;
        body.push(Stmt::Assign {
            target,
            value: Expr::Load(source),
        });
        Ok(())
    }

    /// The target bound by a resumable `for` or `with`. When binding may
    /// suspend, the construct binds a temporary and the real store moves to
    /// `prologue`.
    fn bound_target(&mut self, mut target: Target, prologue: &mut Vec<Stmt>) -> TransformResult<Target> {
        if !target_contains_yield(&target) {
            self.target(&mut target)?;
            return Ok(target);
        }
        let temp = self.temporary();
        self.store(target, temp.clone(), prologue)?;
        Ok(Target::Name(temp))
    }

    fn with_prologue(&mut self, mut prologue: Vec<Stmt>, body: Stmt) -> TransformResult<Stmt> {
        if prologue.is_empty() {
            return self.stmt(body);
        }
        let position = self.position();
        prologue.push(self.stmt(body)?);
        Ok(Stmt::GeneratorBlock {
            body: prologue,
            position,
        })
    }

    fn target(&mut self, target: &mut Target) -> TransformResult<()> {
        match target {
            Target::Name(name) => redirect(name),
            Target::Attribute { value, .. } => self.expr_mut(value)?,
            Target::Subscript { value, index } => self.statement_operands(vec![value, index])?,
            Target::Unpack { targets, .. } => {
                for target in targets {
                    self.target(target)?;
                }
            }
        }
        Ok(())
    }

    fn expr_mut(&mut self, expr: &mut Expr) -> TransformResult<()> {
        *expr = self.expr(mem::replace(expr, Expr::none()))?;
        Ok(())
    }

    /// Replaces `expr` with a read of a temporary holding its value.
    fn hoist(&mut self, expr: Expr, effects: &mut Vec<Stmt>) -> Expr {
        match expr {
            Expr::Starred(value) => Expr::Starred(Box::new(self.hoist(*value, effects))),
            expr if expr.is_side_effect_free() => expr,
            expr => {
                let temp = self.temporary();
                effects.push(Stmt::Assign {
                    target: Target::Name(temp.clone()),
                    value: expr,
                });
                Expr::Load(temp)
            }
        }
    }

    /// Transforms `operands`, evaluated left to right, hoisting every one
    /// that runs before the last operand containing a yield.
    fn operands(&mut self, operands: &mut [&mut Expr], effects: &mut Vec<Stmt>) -> TransformResult<()> {
        let last = operands.iter().rposition(|operand| operand.contains_yield());
        for (i, operand) in operands.iter_mut().enumerate() {
            let transformed = self.expr(mem::replace(*operand, Expr::none()))?;
            **operand = match last {
                Some(last) if i < last => self.hoist(transformed, effects),
                _ => transformed,
            };
        }
        Ok(())
    }

    /// Operands of a statement or target. Hoisted effects run when the first
    /// operand is evaluated.
    fn statement_operands(&mut self, mut operands: Vec<&mut Expr>) -> TransformResult<()> {
        let mut effects = Vec::new();
        self.operands(&mut operands, &mut effects)?;
        if let Some(first) = operands.first_mut()
            && !effects.is_empty()
        {
            let value = mem::replace(&mut **first, Expr::none());
            **first = Expr::SideEffects {
                effects,
                value: Box::new(value),
                position: self.position(),
            };
        }
        Ok(())
    }

    fn expr(&mut self, mut expr: Expr) -> TransformResult<Expr> {
        let mut effects = Vec::new();
        match &mut expr {
            Expr::Constant(_) | Expr::Import { .. } => {}
            Expr::Load(name) => redirect(name),
            Expr::Tuple(elements)
            | Expr::List(elements)
            | Expr::Set(elements)
            | Expr::JoinedStr(elements) => {
                self.operands(&mut elements.iter_mut().collect::<Vec<_>>(), &mut effects)?;
            }
            Expr::Dict(entries) => {
                let mut operands: Vec<&mut Expr> = entries
                    .iter_mut()
                    .flat_map(|entry| entry.key.iter_mut().chain([&mut entry.value]))
                    .collect();
                self.operands(&mut operands, &mut effects)?;
            }
            Expr::Starred(value)
            | Expr::UnaryOp { operand: value, .. }
            | Expr::Attribute { value, .. }
            | Expr::GetIter(value)
            | Expr::Collect {
                iterable: value, ..
            }
            | Expr::ImportFrom { module: value, .. } => self.expr_mut(value)?,
            Expr::BinOp { left, right, .. }
            | Expr::Compare { left, right, .. }
            | Expr::Subscript {
                value: left,
                index: right,
            } => self.operands(&mut [&mut **left, &mut **right], &mut effects)?,
            // Only the deciding operand of a short-circuit runs before the rest.
            Expr::BoolOp { left, right, .. } => {
                let hoist = right.contains_yield();
                self.expr_mut(left)?;
                self.expr_mut(right)?;
                if hoist {
                    let value = mem::replace(&mut **left, Expr::none());
                    **left = self.hoist(value, &mut effects);
                }
            }
            Expr::IfExp { test, body, orelse } => {
                let hoist = body.contains_yield() || orelse.contains_yield();
                self.expr_mut(test)?;
                self.expr_mut(body)?;
                self.expr_mut(orelse)?;
                if hoist {
                    let value = mem::replace(&mut **test, Expr::none());
                    **test = self.hoist(value, &mut effects);
                }
            }
            Expr::Call {
                func,
                args,
                keywords,
            } => {
                let mut operands: Vec<&mut Expr> = iter::once(&mut **func)
                    .chain(args.iter_mut())
                    .chain(keywords.iter_mut().map(|keyword| &mut keyword.value))
                    .collect();
                self.operands(&mut operands, &mut effects)?;
            }
            Expr::Slice { lower, upper, step } => {
                let mut operands: Vec<&mut Expr> = [lower, upper, step]
                    .into_iter()
                    .flatten()
                    .map(|part| &mut **part)
                    .collect();
                self.operands(&mut operands, &mut effects)?;
            }
            Expr::NamedExpr { target, value } => {
                redirect(target);
                self.expr_mut(value)?;
            }
            Expr::MakeFunction(make) => {
                let MakeFunction {
                    defaults,
                    kw_defaults,
                    ..
                } = &mut **make;
                let mut operands: Vec<&mut Expr> = defaults
                    .iter_mut()
                    .chain(kw_defaults.iter_mut().map(|(_, value)| value))
                    .collect();
                self.operands(&mut operands, &mut effects)?;
            }
            Expr::MakeClass(make) => {
                let MakeClass {
                    bases, keywords, ..
                } = &mut **make;
                let mut operands: Vec<&mut Expr> = bases
                    .iter_mut()
                    .chain(keywords.iter_mut().map(|keyword| &mut keyword.value))
                    .collect();
                self.operands(&mut operands, &mut effects)?;
            }
            Expr::Yield { value, index } => {
                self.yield_point(index, YieldKind::Yield)?;
                if let Some(value) = value {
                    self.expr_mut(value)?;
                }
            }
            Expr::YieldFrom {
                value,
                index,
                iterator,
            } => {
                self.yield_point(index, YieldKind::YieldFrom)?;
                *iterator = Some(self.iterator());
                self.expr_mut(value)?;
            }
            Expr::FormatValue { value, spec, .. } => {
                let mut operands: Vec<&mut Expr> = iter::once(&mut **value)
                    .chain(spec.iter_mut().map(|spec| &mut **spec))
                    .collect();
                self.operands(&mut operands, &mut effects)?;
            }
            Expr::StmtExpr(stmt) => {
                **stmt = self.stmt(mem::replace(&mut **stmt, Stmt::Pass))?;
            }
            Expr::SideEffects { .. } => return Err(InternalError::ResumableInput),
        }
        if !effects.is_empty() {
            expr = Expr::SideEffects {
                effects,
                value: Box::new(expr),
                position: self.position(),
            };
        }
        Ok(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::{CompileOpts, compile_program};
    use arbor_compiler_core::{SourceFileBuilder, tree::CodeObject};
    use ruff_python_ast as ast;

    fn compile_exec(source: &str) -> CodeObject {
        let source_file = SourceFileBuilder::new("source_path", source).finish();
        let parsed = ruff_python_parser::parse(
            source_file.source_text(),
            ruff_python_parser::Mode::Module.into(),
        )
        .unwrap();
        let ast::Mod::Module(module) = parsed.into_syntax() else {
            unreachable!()
        };
        compile_program(&module, source_file, CompileOpts::default()).unwrap()
    }

    #[test]
    fn test_loop_state_is_persistent() {
        insta::assert_snapshot!(compile_exec("\
def gen(n):
    i = 0
    while i < n:
        yield i
        i += 1
").to_string(), @r"
        code <module>
          name:gen = <function gen>
        code gen
          varnames: n, i
          generator: yields=1 flags=1 positions=2 iterators=0 exceptions=0
          block @p0:
            persistent:i = 0
            while (persistent:i < persistent:n) @f0:
              block @p1:
                (yield#0 persistent:i)
                persistent:i = (persistent:i += 1)
        ");
    }

    #[test]
    fn test_operands_before_a_yield_are_hoisted() {
        insta::assert_snapshot!(compile_exec("\
def g():
    return f() + (yield 1) + (yield 2)
").to_string(), @r"
        code <module>
          name:g = <function g>
        code g
          varnames: .h0, .h1
          generator: yields=2 flags=0 positions=3 iterators=0 exceptions=0
          block @p0:
            return (once @p2 [persistent:.h1 = (once @p1 [persistent:.h0 = global:f()] (persistent:.h0 + (yield#0 1)))] (persistent:.h1 + (yield#1 2)))
        ");
    }

    #[test]
    fn test_names_and_constants_are_not_hoisted() {
        let code = compile_exec("def g(a):\n    return [a, 1, (yield)]\n");
        let Expr::MakeFunction(make) = (match &code.body {
            Stmt::Assign { value, .. } => value,
            other => panic!("unexpected {other:?}"),
        }) else {
            panic!("expected function");
        };
        let Stmt::GeneratorBlock { body, .. } = &make.code.body else {
            panic!("expected resumable body");
        };
        assert_eq!(
            body[0],
            Stmt::Return(Some(Expr::List(vec![
                Expr::Load(NameRef::Persistent(0)),
                Expr::Constant(ConstantData::Integer { value: 1.into() }),
                Expr::Yield {
                    value: None,
                    index: Some(0),
                },
            ])))
        );
    }

    #[test]
    fn test_short_circuit_hoists_deciding_operand() {
        let mut varnames = Vec::new();
        let body = Stmt::Expr(Expr::BoolOp {
            op: arbor_compiler_core::tree::BoolOperator::And,
            left: Box::new(Expr::Call {
                func: Box::new(Expr::Load(NameRef::Global("f".to_owned()))),
                args: Vec::new(),
                keywords: Vec::new(),
            }),
            right: Box::new(Expr::Yield {
                value: None,
                index: None,
            }),
        });
        let (body, descriptor) = transform(body, &mut varnames).unwrap();
        assert_eq!(varnames, [".h0"]);
        assert_eq!(descriptor.position_slots, 2);
        let Stmt::GeneratorBlock { body, .. } = body else {
            panic!("expected resumable body");
        };
        let Stmt::Expr(Expr::SideEffects { effects, value, .. }) = &body[0] else {
            panic!("expected hoisted effects: {body:?}");
        };
        assert_eq!(effects.len(), 1);
        assert!(matches!(
            &**value,
            Expr::BoolOp { left, .. } if **left == Expr::Load(NameRef::Persistent(0))
        ));
    }

    #[test]
    fn test_try_finally_around_for() {
        insta::assert_snapshot!(compile_exec("\
def g(xs):
    try:
        for x in xs:
            yield x
    finally:
        close()
").to_string(), @r"
        code <module>
          name:g = <function g>
        code g
          varnames: xs, x
          generator: yields=1 flags=2 positions=1 iterators=1 exceptions=1
          block @p0:
            try @f0 @e0:
              for persistent:x in persistent:xs @f1 @i0:
                (yield#0 persistent:x)
            finally:
              global:close()
        ");
    }

    #[test]
    fn test_handlers() {
        insta::assert_snapshot!(compile_exec("\
def g():
    try:
        yield 1
    except E as e:
        yield e
").to_string(), @r"
        code <module>
          name:g = <function g>
        code g
          varnames: e
          generator: yields=2 flags=1 positions=2 iterators=0 exceptions=2
          block @p0:
            try @p1 @e0:
              (yield#0 1)
            except global:E as persistent:e:
              try @f0 @e1:
                (yield#1 persistent:e)
              finally:
                persistent:e = None
                del persistent:e
        ");
    }

    #[test]
    fn test_with_keeps_manager() {
        insta::assert_snapshot!(compile_exec("\
def g(m):
    with m as v:
        yield v
").to_string(), @r"
        code <module>
          name:g = <function g>
        code g
          varnames: m, v
          generator: yields=1 flags=1 positions=1 iterators=1 exceptions=0
          block @p0:
            with persistent:m as persistent:v @f0 @i0:
              (yield#0 persistent:v)
        ");
    }

    #[test]
    fn test_comprehension_body() {
        insta::assert_snapshot!(compile_exec("[x for x in xs]\n").to_string(), @r"
        code <module>
          collect_list(<function <listcomp>>(iter(name:xs)))
        code <listcomp>
          varnames: .0, x
          generator: yields=1 flags=1 positions=1 iterators=1 exceptions=0
          block @p0:
            for persistent:x in persistent:.0 @f0 @i0:
              (yield#0 persistent:x)
        ");
    }

    #[test]
    fn test_yield_from_gets_delegate_slot() {
        let code = compile_exec("def g(a, b):\n    yield from a\n    yield from b\n");
        let Stmt::Assign {
            value: Expr::MakeFunction(make),
            ..
        } = &code.body
        else {
            panic!("expected function");
        };
        let descriptor = make.code.generator.as_ref().unwrap();
        assert_eq!(descriptor.iterator_slots, 2);
        assert_eq!(
            descriptor.yields,
            [
                YieldPoint {
                    index: 0,
                    kind: YieldKind::YieldFrom
                },
                YieldPoint {
                    index: 1,
                    kind: YieldKind::YieldFrom
                },
            ]
        );
    }

    #[test]
    fn test_loop_else_that_suspends_runs_after_break_target() {
        let code = compile_exec("\
def g(xs):
    for x in xs:
        if x:
            break
    else:
        yield 0
");
        let Stmt::Assign {
            value: Expr::MakeFunction(make),
            ..
        } = &code.body
        else {
            panic!("expected function");
        };
        let Stmt::GeneratorBlock { body, .. } = &make.code.body else {
            panic!("expected resumable body");
        };
        let Stmt::GeneratorBlock { body, .. } = &body[0] else {
            panic!("expected lowered loop: {body:?}");
        };
        assert!(matches!(&body[1], Stmt::BreakTarget { orelse, .. } if orelse.is_empty()));
        assert!(matches!(&body[2], Stmt::GeneratorIf { .. }));
        assert_eq!(make.code.varnames.last().map(String::as_str), Some(".h0"));
    }

    #[test]
    fn test_yield_in_store_target_keeps_value() {
        let code = compile_exec("def g(a):\n    a[(yield)] = f()\n");
        let Stmt::Assign {
            value: Expr::MakeFunction(make),
            ..
        } = &code.body
        else {
            panic!("expected function");
        };
        insta::assert_snapshot!(make.code.to_string(), @r"
        code g
          varnames: a, .h0
          generator: yields=1 flags=0 positions=2 iterators=0 exceptions=0
          block @p0:
            block @p1:
              persistent:.h0 = global:f()
              persistent:a[(yield#0)] = persistent:.h0
        ");
    }

    #[test]
    fn test_indexed_yield_is_rejected() {
        let mut varnames = Vec::new();
        let body = Stmt::Expr(Expr::Yield {
            value: None,
            index: Some(3),
        });
        assert_eq!(
            transform(body, &mut varnames).unwrap_err(),
            InternalError::YieldIndexCollision(3)
        );
    }

    #[test]
    fn test_resumable_input_is_rejected() {
        let mut varnames = Vec::new();
        let body = Stmt::Expr(Expr::Yield {
            value: None,
            index: None,
        });
        let (body, _) = transform(body, &mut varnames).unwrap();
        assert_eq!(
            transform(body, &mut varnames).unwrap_err(),
            InternalError::ResumableInput
        );
    }
}
