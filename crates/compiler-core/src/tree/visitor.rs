//! Read-only traversal of the executable tree.
//!
//! Nested code objects are not entered: a [`MakeFunction`](super::MakeFunction)
//! is visited for its defaults only.

use super::{DictEntry, ExceptHandler, Expr, Keyword, Stmt, Target};

pub trait Visitor<'a> {
    fn visit_stmt(&mut self, stmt: &'a Stmt) {
        walk_stmt(self, stmt);
    }
    fn visit_expr(&mut self, expr: &'a Expr) {
        walk_expr(self, expr);
    }
    fn visit_target(&mut self, target: &'a Target) {
        walk_target(self, target);
    }
    fn visit_handler(&mut self, handler: &'a ExceptHandler) {
        walk_handler(self, handler);
    }
}

pub fn walk_stmt<'a, V: Visitor<'a> + ?Sized>(visitor: &mut V, stmt: &'a Stmt) {
    match stmt {
        Stmt::Expr(expr) | Stmt::PrintExpr(expr) => visitor.visit_expr(expr),
        Stmt::Assign { target, value } => {
            visitor.visit_expr(value);
            visitor.visit_target(target);
        }
        Stmt::Delete(target) => visitor.visit_target(target),
        Stmt::Block(body) | Stmt::GeneratorBlock { body, .. } => {
            for stmt in body {
                visitor.visit_stmt(stmt);
            }
        }
        Stmt::If {
            test, body, orelse, ..
        }
        | Stmt::GeneratorIf {
            test, body, orelse, ..
        } => {
            visitor.visit_expr(test);
            visitor.visit_stmt(body);
            visitor.visit_stmt(orelse);
        }
        Stmt::While { test, body } | Stmt::GeneratorWhile { test, body, .. } => {
            visitor.visit_expr(test);
            visitor.visit_stmt(body);
        }
        Stmt::For {
            target, iter, body, ..
        }
        | Stmt::GeneratorFor {
            target, iter, body, ..
        } => {
            visitor.visit_expr(iter);
            visitor.visit_target(target);
            visitor.visit_stmt(body);
        }
        Stmt::ContinueTarget(body) => visitor.visit_stmt(body),
        Stmt::BreakTarget { body, orelse } => {
            visitor.visit_stmt(body);
            visitor.visit_stmt(orelse);
        }
        Stmt::Try {
            body,
            handlers,
            orelse,
            finalbody,
        } => {
            visitor.visit_stmt(body);
            for handler in handlers {
                visitor.visit_handler(handler);
            }
            visitor.visit_stmt(orelse);
            if let Some(finalbody) = finalbody {
                visitor.visit_stmt(finalbody);
            }
        }
        Stmt::GeneratorTryExcept {
            body,
            handlers,
            orelse,
            ..
        } => {
            visitor.visit_stmt(body);
            for handler in handlers {
                visitor.visit_handler(handler);
            }
            visitor.visit_stmt(orelse);
        }
        Stmt::GeneratorTryFinally {
            body, finalbody, ..
        } => {
            visitor.visit_stmt(body);
            visitor.visit_stmt(finalbody);
        }
        Stmt::With {
            context,
            target,
            body,
        }
        | Stmt::GeneratorWith {
            context,
            target,
            body,
            ..
        } => {
            visitor.visit_expr(context);
            if let Some(target) = target {
                visitor.visit_target(target);
            }
            visitor.visit_stmt(body);
        }
        Stmt::Raise { exc, cause } => {
            if let Some(exc) = exc {
                visitor.visit_expr(exc);
            }
            if let Some(cause) = cause {
                visitor.visit_expr(cause);
            }
        }
        Stmt::Return(value) => {
            if let Some(value) = value {
                visitor.visit_expr(value);
            }
        }
        Stmt::Assert { test, msg } => {
            visitor.visit_expr(test);
            if let Some(msg) = msg {
                visitor.visit_expr(msg);
            }
        }
        Stmt::Break | Stmt::Continue | Stmt::Pass => {}
    }
}

pub fn walk_expr<'a, V: Visitor<'a> + ?Sized>(visitor: &mut V, expr: &'a Expr) {
    match expr {
        Expr::Constant(_) | Expr::Load(_) | Expr::Import { .. } => {}
        Expr::Tuple(elements) | Expr::List(elements) | Expr::Set(elements) => {
            for element in elements {
                visitor.visit_expr(element);
            }
        }
        Expr::JoinedStr(values) => {
            for value in values {
                visitor.visit_expr(value);
            }
        }
        Expr::Dict(entries) => {
            for DictEntry { key, value } in entries {
                if let Some(key) = key {
                    visitor.visit_expr(key);
                }
                visitor.visit_expr(value);
            }
        }
        Expr::Starred(value)
        | Expr::UnaryOp { operand: value, .. }
        | Expr::Attribute { value, .. }
        | Expr::NamedExpr { value, .. }
        | Expr::GetIter(value)
        | Expr::Collect {
            iterable: value, ..
        }
        | Expr::YieldFrom { value, .. }
        | Expr::ImportFrom { module: value, .. } => visitor.visit_expr(value),
        Expr::BinOp { left, right, .. }
        | Expr::BoolOp { left, right, .. }
        | Expr::Compare { left, right, .. } => {
            visitor.visit_expr(left);
            visitor.visit_expr(right);
        }
        Expr::Call {
            func,
            args,
            keywords,
        } => {
            visitor.visit_expr(func);
            for arg in args {
                visitor.visit_expr(arg);
            }
            walk_keywords(visitor, keywords);
        }
        Expr::Subscript { value, index } => {
            visitor.visit_expr(value);
            visitor.visit_expr(index);
        }
        Expr::Slice { lower, upper, step } => {
            for part in [lower, upper, step].into_iter().flatten() {
                visitor.visit_expr(part);
            }
        }
        Expr::IfExp { test, body, orelse } => {
            visitor.visit_expr(test);
            visitor.visit_expr(body);
            visitor.visit_expr(orelse);
        }
        Expr::MakeFunction(make) => {
            for default in &make.defaults {
                visitor.visit_expr(default);
            }
            for (_, default) in &make.kw_defaults {
                visitor.visit_expr(default);
            }
        }
        Expr::MakeClass(make) => {
            for base in &make.bases {
                visitor.visit_expr(base);
            }
            walk_keywords(visitor, &make.keywords);
        }
        Expr::Yield { value, .. } => {
            if let Some(value) = value {
                visitor.visit_expr(value);
            }
        }
        Expr::FormatValue { value, spec, .. } => {
            visitor.visit_expr(value);
            if let Some(spec) = spec {
                visitor.visit_expr(spec);
            }
        }
        Expr::StmtExpr(stmt) => visitor.visit_stmt(stmt),
        Expr::SideEffects { effects, value, .. } => {
            for effect in effects {
                visitor.visit_stmt(effect);
            }
            visitor.visit_expr(value);
        }
    }
}

fn walk_keywords<'a, V: Visitor<'a> + ?Sized>(visitor: &mut V, keywords: &'a [Keyword]) {
    for keyword in keywords {
        visitor.visit_expr(&keyword.value);
    }
}

pub fn walk_target<'a, V: Visitor<'a> + ?Sized>(visitor: &mut V, target: &'a Target) {
    match target {
        Target::Name(_) => {}
        Target::Attribute { value, .. } => visitor.visit_expr(value),
        Target::Subscript { value, index } => {
            visitor.visit_expr(value);
            visitor.visit_expr(index);
        }
        Target::Unpack { targets, .. } => {
            for target in targets {
                visitor.visit_target(target);
            }
        }
    }
}

pub fn walk_handler<'a, V: Visitor<'a> + ?Sized>(visitor: &mut V, handler: &'a ExceptHandler) {
    if let Some(typ) = &handler.typ {
        visitor.visit_expr(typ);
    }
    visitor.visit_stmt(&handler.body);
}
