//! Human-readable dump of code objects, used by `arbor --dump tree` and tests.

use super::{
    BoolOperator, CodeObject, CollectionKind, ConstantData, Conversion, DictEntry, Expr, Keyword,
    NameRef, Stmt, Target, UnaryOperator, Visitor,
};
use alloc::sync::Arc;
use core::fmt::{self, Write};
use itertools::Itertools;

impl fmt::Display for CodeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.display_inner(f)?;
        for code in nested_code_objects(&self.body) {
            code.fmt(f)?;
        }
        Ok(())
    }
}

impl CodeObject {
    fn display_inner(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "code {}", self.qualname)?;
        for (label, names) in [
            ("varnames", &self.varnames),
            ("cellvars", &self.cellvars),
            ("freevars", &self.freevars),
        ] {
            if !names.is_empty() {
                writeln!(f, "  {label}: {}", names.iter().join(", "))?;
            }
        }
        if let Some(generator) = &self.generator {
            writeln!(
                f,
                "  generator: yields={} flags={} positions={} iterators={} exceptions={}",
                generator.yields.len(),
                generator.flag_slots,
                generator.position_slots,
                generator.iterator_slots,
                generator.exception_slots,
            )?;
        }
        Printer { code: self, out: f }.stmt(&self.body, 1)
    }
}

/// Code objects created directly by `body`, in source order.
fn nested_code_objects(body: &Stmt) -> Vec<&Arc<CodeObject>> {
    struct Collector<'a>(Vec<&'a Arc<CodeObject>>);
    impl<'a> Visitor<'a> for Collector<'a> {
        fn visit_expr(&mut self, expr: &'a Expr) {
            match expr {
                Expr::MakeFunction(make) => self.0.push(&make.code),
                Expr::MakeClass(make) => self.0.push(&make.code),
                _ => {}
            }
            super::visitor::walk_expr(self, expr);
        }
    }
    let mut collector = Collector(Vec::new());
    collector.visit_stmt(body);
    collector.0
}

struct Printer<'a, W: Write> {
    code: &'a CodeObject,
    out: W,
}

impl<W: Write> Printer<'_, W> {
    fn line(&mut self, level: usize, text: fmt::Arguments<'_>) -> fmt::Result {
        for _ in 0..level {
            self.out.write_str("  ")?;
        }
        self.out.write_fmt(text)?;
        self.out.write_char('\n')
    }

    fn stmt(&mut self, stmt: &Stmt, level: usize) -> fmt::Result {
        match stmt {
            Stmt::Expr(expr) => {
                let expr = self.expr_str(expr);
                self.line(level, format_args!("{expr}"))
            }
            Stmt::PrintExpr(expr) => {
                let expr = self.expr_str(expr);
                self.line(level, format_args!("print_expr {expr}"))
            }
            Stmt::Assign { target, value } => {
                let target = self.target_str(target);
                let value = self.expr_str(value);
                self.line(level, format_args!("{target} = {value}"))
            }
            Stmt::Delete(target) => {
                let target = self.target_str(target);
                self.line(level, format_args!("del {target}"))
            }
            Stmt::Block(body) => {
                for stmt in body {
                    self.stmt(stmt, level)?;
                }
                Ok(())
            }
            Stmt::GeneratorBlock { body, position } => {
                self.line(level, format_args!("block @p{position}:"))?;
                for stmt in body {
                    self.stmt(stmt, level + 1)?;
                }
                Ok(())
            }
            Stmt::If { test, body, orelse } => {
                let test = self.expr_str(test);
                self.line(level, format_args!("if {test}:"))?;
                self.branches(body, orelse, level)
            }
            Stmt::GeneratorIf {
                test,
                body,
                orelse,
                then_flag,
                else_flag,
            } => {
                let test = self.expr_str(test);
                self.line(
                    level,
                    format_args!("if {test} @f{then_flag} @f{else_flag}:"),
                )?;
                self.branches(body, orelse, level)
            }
            Stmt::While { test, body } => {
                let test = self.expr_str(test);
                self.line(level, format_args!("while {test}:"))?;
                self.stmt(body, level + 1)
            }
            Stmt::GeneratorWhile { test, body, flag } => {
                let test = self.expr_str(test);
                self.line(level, format_args!("while {test} @f{flag}:"))?;
                self.stmt(body, level + 1)
            }
            Stmt::For { target, iter, body } => {
                let target = self.target_str(target);
                let iter = self.expr_str(iter);
                self.line(level, format_args!("for {target} in {iter}:"))?;
                self.stmt(body, level + 1)
            }
            Stmt::GeneratorFor {
                target,
                iter,
                body,
                flag,
                iterator,
            } => {
                let target = self.target_str(target);
                let iter = self.expr_str(iter);
                self.line(
                    level,
                    format_args!("for {target} in {iter} @f{flag} @i{iterator}:"),
                )?;
                self.stmt(body, level + 1)
            }
            Stmt::ContinueTarget(body) => {
                self.line(level, format_args!("continue_target:"))?;
                self.stmt(body, level + 1)
            }
            Stmt::BreakTarget { body, orelse } => {
                self.line(level, format_args!("break_target:"))?;
                self.branches(body, orelse, level)
            }
            Stmt::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                self.line(level, format_args!("try:"))?;
                self.stmt(body, level + 1)?;
                self.handlers(handlers, orelse, level)?;
                if let Some(finalbody) = finalbody {
                    self.line(level, format_args!("finally:"))?;
                    self.stmt(finalbody, level + 1)?;
                }
                Ok(())
            }
            Stmt::GeneratorTryExcept {
                body,
                handlers,
                orelse,
                position,
                exception,
            } => {
                self.line(level, format_args!("try @p{position} @e{exception}:"))?;
                self.stmt(body, level + 1)?;
                self.handlers(handlers, orelse, level)
            }
            Stmt::GeneratorTryFinally {
                body,
                finalbody,
                flag,
                pending,
            } => {
                self.line(level, format_args!("try @f{flag} @e{pending}:"))?;
                self.stmt(body, level + 1)?;
                self.line(level, format_args!("finally:"))?;
                self.stmt(finalbody, level + 1)
            }
            Stmt::With {
                context,
                target,
                body,
            } => {
                let head = self.with_head(context, target.as_ref());
                self.line(level, format_args!("{head}:"))?;
                self.stmt(body, level + 1)
            }
            Stmt::GeneratorWith {
                context,
                target,
                body,
                flag,
                manager,
            } => {
                let head = self.with_head(context, target.as_ref());
                self.line(level, format_args!("{head} @f{flag} @i{manager}:"))?;
                self.stmt(body, level + 1)
            }
            Stmt::Raise { exc, cause } => {
                let mut text = "raise".to_owned();
                if let Some(exc) = exc {
                    text.push(' ');
                    text.push_str(&self.expr_str(exc));
                }
                if let Some(cause) = cause {
                    text.push_str(" from ");
                    text.push_str(&self.expr_str(cause));
                }
                self.line(level, format_args!("{text}"))
            }
            Stmt::Return(value) => match value {
                Some(value) => {
                    let value = self.expr_str(value);
                    self.line(level, format_args!("return {value}"))
                }
                None => self.line(level, format_args!("return")),
            },
            Stmt::Break => self.line(level, format_args!("break")),
            Stmt::Continue => self.line(level, format_args!("continue")),
            Stmt::Pass => self.line(level, format_args!("pass")),
            Stmt::Assert { test, msg } => {
                let test = self.expr_str(test);
                match msg {
                    Some(msg) => {
                        let msg = self.expr_str(msg);
                        self.line(level, format_args!("assert {test}, {msg}"))
                    }
                    None => self.line(level, format_args!("assert {test}")),
                }
            }
        }
    }

    fn branches(&mut self, body: &Stmt, orelse: &Stmt, level: usize) -> fmt::Result {
        self.stmt(body, level + 1)?;
        if !orelse.is_empty() {
            self.line(level, format_args!("else:"))?;
            self.stmt(orelse, level + 1)?;
        }
        Ok(())
    }

    fn handlers(
        &mut self,
        handlers: &[super::ExceptHandler],
        orelse: &Stmt,
        level: usize,
    ) -> fmt::Result {
        for handler in handlers {
            let mut head = "except".to_owned();
            if let Some(typ) = &handler.typ {
                head.push(' ');
                head.push_str(&self.expr_str(typ));
            }
            if let Some(name) = &handler.name {
                head.push_str(" as ");
                head.push_str(&self.name_str(name));
            }
            self.line(level, format_args!("{head}:"))?;
            self.stmt(&handler.body, level + 1)?;
        }
        if !orelse.is_empty() {
            self.line(level, format_args!("else:"))?;
            self.stmt(orelse, level + 1)?;
        }
        Ok(())
    }

    fn with_head(&self, context: &Expr, target: Option<&Target>) -> String {
        let mut head = format!("with {}", self.expr_str(context));
        if let Some(target) = target {
            head.push_str(" as ");
            head.push_str(&self.target_str(target));
        }
        head
    }

    fn name_str(&self, name: &NameRef) -> String {
        let slot = |names: &[String], index: u32| {
            names
                .get(index as usize)
                .cloned()
                .unwrap_or_else(|| format!("#{index}"))
        };
        match name {
            NameRef::Fast(index) => format!("fast:{}", slot(&self.code.varnames, *index)),
            NameRef::Persistent(index) => {
                format!("persistent:{}", slot(&self.code.varnames, *index))
            }
            NameRef::Deref(index) => {
                let cells = self.code.cellvars.len() as u32;
                let name = if *index < cells {
                    slot(&self.code.cellvars, *index)
                } else {
                    slot(&self.code.freevars, *index - cells)
                };
                format!("deref:{name}")
            }
            NameRef::Global(name) => format!("global:{name}"),
            NameRef::Name(name) => format!("name:{name}"),
            NameRef::DictOrDeref { name, .. } => format!("dict_or_deref:{name}"),
        }
    }

    fn target_str(&self, target: &Target) -> String {
        match target {
            Target::Name(name) => self.name_str(name),
            Target::Attribute { value, attr } => format!("{}.{attr}", self.expr_str(value)),
            Target::Subscript { value, index } => {
                format!("{}[{}]", self.expr_str(value), self.expr_str(index))
            }
            Target::Unpack {
                targets,
                star_index,
            } => {
                let parts = targets
                    .iter()
                    .enumerate()
                    .map(|(i, target)| {
                        let target = self.target_str(target);
                        if Some(i) == *star_index {
                            format!("*{target}")
                        } else {
                            target
                        }
                    })
                    .join(", ");
                format!("({parts})")
            }
        }
    }

    fn exprs_str(&self, exprs: &[Expr]) -> String {
        exprs.iter().map(|expr| self.expr_str(expr)).join(", ")
    }

    fn keywords_str(&self, keywords: &[Keyword]) -> String {
        keywords
            .iter()
            .map(|keyword| match &keyword.name {
                Some(name) => format!("{name}={}", self.expr_str(&keyword.value)),
                None => format!("**{}", self.expr_str(&keyword.value)),
            })
            .join(", ")
    }

    fn expr_str(&self, expr: &Expr) -> String {
        match expr {
            Expr::Constant(constant) => constant_str(constant),
            Expr::Load(name) => self.name_str(name),
            Expr::Tuple(elements) if elements.len() == 1 => {
                format!("({},)", self.expr_str(&elements[0]))
            }
            Expr::Tuple(elements) => format!("({})", self.exprs_str(elements)),
            Expr::List(elements) => format!("[{}]", self.exprs_str(elements)),
            Expr::Set(elements) => format!("{{{}}}", self.exprs_str(elements)),
            Expr::Dict(entries) => {
                let entries = entries
                    .iter()
                    .map(|DictEntry { key, value }| match key {
                        Some(key) => format!("{}: {}", self.expr_str(key), self.expr_str(value)),
                        None => format!("**{}", self.expr_str(value)),
                    })
                    .join(", ");
                format!("{{{entries}}}")
            }
            Expr::Starred(value) => format!("*{}", self.expr_str(value)),
            Expr::BinOp {
                op,
                left,
                right,
                inplace,
            } => {
                let eq = if *inplace { "=" } else { "" };
                format!(
                    "({} {}{eq} {})",
                    self.expr_str(left),
                    op.as_str(),
                    self.expr_str(right)
                )
            }
            Expr::UnaryOp { op, operand } => {
                let operand = self.expr_str(operand);
                match op {
                    UnaryOperator::Not => format!("(not {operand})"),
                    UnaryOperator::Invert => format!("(~{operand})"),
                    UnaryOperator::Minus => format!("(-{operand})"),
                    UnaryOperator::Plus => format!("(+{operand})"),
                }
            }
            Expr::BoolOp { op, left, right } => {
                let op = match op {
                    BoolOperator::And => "and",
                    BoolOperator::Or => "or",
                };
                format!("({} {op} {})", self.expr_str(left), self.expr_str(right))
            }
            Expr::Compare { op, left, right } => format!(
                "({} {} {})",
                self.expr_str(left),
                op.as_str(),
                self.expr_str(right)
            ),
            Expr::Call {
                func,
                args,
                keywords,
            } => {
                let mut parts = self.exprs_str(args);
                if !keywords.is_empty() {
                    if !parts.is_empty() {
                        parts.push_str(", ");
                    }
                    parts.push_str(&self.keywords_str(keywords));
                }
                format!("{}({parts})", self.expr_str(func))
            }
            Expr::Attribute { value, attr } => format!("{}.{attr}", self.expr_str(value)),
            Expr::Subscript { value, index } => {
                format!("{}[{}]", self.expr_str(value), self.expr_str(index))
            }
            Expr::Slice { lower, upper, step } => {
                let part = |part: &Option<Box<Expr>>| {
                    part.as_deref()
                        .map(|part| self.expr_str(part))
                        .unwrap_or_default()
                };
                match step {
                    Some(_) => format!("{}:{}:{}", part(lower), part(upper), part(step)),
                    None => format!("{}:{}", part(lower), part(upper)),
                }
            }
            Expr::IfExp { test, body, orelse } => format!(
                "({} if {} else {})",
                self.expr_str(body),
                self.expr_str(test),
                self.expr_str(orelse)
            ),
            Expr::NamedExpr { target, value } => {
                format!("({} := {})", self.name_str(target), self.expr_str(value))
            }
            Expr::MakeFunction(make) => format!("<function {}>", make.code.qualname),
            Expr::MakeClass(make) => {
                let mut parts = self.exprs_str(&make.bases);
                if !make.keywords.is_empty() {
                    if !parts.is_empty() {
                        parts.push_str(", ");
                    }
                    parts.push_str(&self.keywords_str(&make.keywords));
                }
                format!("<class {}>({parts})", make.code.qualname)
            }
            Expr::Yield { value, index } => {
                let mut text = "(yield".to_owned();
                if let Some(index) = index {
                    let _ = write!(text, "#{index}");
                }
                if let Some(value) = value {
                    text.push(' ');
                    text.push_str(&self.expr_str(value));
                }
                text.push(')');
                text
            }
            Expr::YieldFrom {
                value,
                index,
                iterator,
            } => {
                let mut text = "(yield from".to_owned();
                if let Some(index) = index {
                    let _ = write!(text, "#{index}");
                }
                if let Some(iterator) = iterator {
                    let _ = write!(text, " @i{iterator}");
                }
                let _ = write!(text, " {})", self.expr_str(value));
                text
            }
            Expr::GetIter(value) => format!("iter({})", self.expr_str(value)),
            Expr::Collect { kind, iterable } => {
                let kind = match kind {
                    CollectionKind::List => "list",
                    CollectionKind::Set => "set",
                    CollectionKind::Dict => "dict",
                };
                format!("collect_{kind}({})", self.expr_str(iterable))
            }
            Expr::JoinedStr(values) => format!("joined({})", self.exprs_str(values)),
            Expr::FormatValue {
                value,
                conversion,
                spec,
            } => {
                let conversion = match conversion {
                    Conversion::None => "",
                    Conversion::Str => "!s",
                    Conversion::Repr => "!r",
                    Conversion::Ascii => "!a",
                };
                let spec = spec
                    .as_deref()
                    .map(|spec| format!(":{}", self.expr_str(spec)))
                    .unwrap_or_default();
                format!("format({}{conversion}{spec})", self.expr_str(value))
            }
            Expr::Import {
                name,
                fromlist,
                level,
            } => {
                if fromlist.is_empty() {
                    format!("import({name}, level={level})")
                } else {
                    format!(
                        "import({name}, from=[{}], level={level})",
                        fromlist.iter().join(", ")
                    )
                }
            }
            Expr::ImportFrom { module, name } => {
                format!("import_from({}, {name})", self.expr_str(module))
            }
            Expr::StmtExpr(stmt) => format!("<{}>", self.stmt_inline(stmt)),
            Expr::SideEffects {
                effects,
                value,
                position,
            } => {
                let effects = effects.iter().map(|stmt| self.stmt_inline(stmt)).join("; ");
                format!("(once @p{position} [{effects}] {})", self.expr_str(value))
            }
        }
    }

    fn stmt_inline(&self, stmt: &Stmt) -> String {
        let mut text = String::new();
        let mut printer = Printer {
            code: self.code,
            out: &mut text,
        };
        // writing into a String cannot fail
        let _ = printer.stmt(stmt, 0);
        text.lines().map(str::trim).join("; ")
    }
}

fn constant_str(constant: &ConstantData) -> String {
    match constant {
        ConstantData::None => "None".to_owned(),
        ConstantData::Ellipsis => "...".to_owned(),
        ConstantData::Boolean { value: true } => "True".to_owned(),
        ConstantData::Boolean { value: false } => "False".to_owned(),
        ConstantData::Integer { value } => value.to_string(),
        ConstantData::Float { value } => format!("{value:?}"),
        ConstantData::Complex { value } => format!("({:?}+{:?}j)", value.re, value.im),
        ConstantData::Str { value } => format!("'{}'", value.escape_default()),
        ConstantData::Bytes { value } => format!("b'{}'", value.escape_ascii()),
        ConstantData::Tuple { elements } if elements.len() == 1 => {
            format!("({},)", constant_str(&elements[0]))
        }
        ConstantData::Tuple { elements } => {
            format!("({})", elements.iter().map(constant_str).join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::*;

    #[test]
    fn display_generator_code() {
        let code = CodeObject {
            body: Stmt::GeneratorBlock {
                body: vec![
                    Stmt::Assign {
                        target: Target::Name(NameRef::Persistent(0)),
                        value: Expr::Constant(ConstantData::Integer { value: 1.into() }),
                    },
                    Stmt::Expr(Expr::Yield {
                        value: Some(Box::new(Expr::Load(NameRef::Persistent(0)))),
                        index: Some(0),
                    }),
                ],
                position: 0,
            },
            flags: CodeFlags::NEWLOCALS | CodeFlags::GENERATOR,
            posonlyarg_count: 0,
            arg_count: 0,
            kwonlyarg_count: 0,
            source_path: "<test>".to_owned(),
            first_line_number: None,
            obj_name: "g".to_owned(),
            qualname: "g".to_owned(),
            doc: None,
            varnames: vec!["x".to_owned()].into_boxed_slice(),
            cellvars: Box::new([]),
            freevars: Box::new([]),
            cell2arg: None,
            generator: Some(GeneratorDescriptor {
                yields: vec![YieldPoint {
                    index: 0,
                    kind: YieldKind::Yield,
                }],
                flag_slots: 0,
                position_slots: 1,
                iterator_slots: 0,
                exception_slots: 0,
            }),
        };
        insta::assert_snapshot!(code.to_string(), @r"
        code g
          varnames: x
          generator: yields=1 flags=0 positions=1 iterators=0 exceptions=0
          block @p0:
            persistent:x = 1
            (yield#0 persistent:x)
        ");
    }

    #[test]
    fn display_inline_statement() {
        let code = CodeObject {
            body: Stmt::Expr(Expr::StmtExpr(Box::new(Stmt::Assign {
                target: Target::Unpack {
                    targets: vec![
                        Target::Name(NameRef::Global("a".to_owned())),
                        Target::Name(NameRef::Global("b".to_owned())),
                    ],
                    star_index: Some(1),
                },
                value: Expr::Tuple(vec![Expr::Constant(ConstantData::None)]),
            }))),
            flags: CodeFlags::empty(),
            posonlyarg_count: 0,
            arg_count: 0,
            kwonlyarg_count: 0,
            source_path: "<test>".to_owned(),
            first_line_number: None,
            obj_name: "<module>".to_owned(),
            qualname: "<module>".to_owned(),
            doc: None,
            varnames: Box::new([]),
            cellvars: Box::new([]),
            freevars: Box::new([]),
            cell2arg: None,
            generator: None,
        };
        assert_eq!(
            code.to_string(),
            "code <module>\n  <(global:a, *global:b) = (None,)>\n"
        );
    }
}
