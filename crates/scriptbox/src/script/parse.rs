//! Converts ruff's Python syntax tree into the evaluator's [`ast`](super::ast).
//!
//! ruff does the parsing; this module keeps the supported subset, attaches 1-based
//! line numbers and reports everything else as a `SyntaxError` on the offending line
//! instead of skipping it.

use std::sync::Arc;

use num_bigint::BigInt;
use ruff_python_ast::{
    self as ast, BoolOp as AstBoolOp, CmpOp as AstCmpOp, ConversionFlag, ElifElseClause, Expr as AstExpr,
    InterpolatedStringElement, Number, Operator, ParameterWithDefault, Stmt as AstStmt, UnaryOp as AstUnaryOp,
};
use ruff_python_parser::parse_module;
use ruff_text_size::{Ranged, TextRange};

use super::{
    ast::{
        Arg, BinOp, BoolOp, CmpOp, Comprehension, Conversion, ExceptHandler, Expr, FStringPart, FunctionDef, Param,
        Stmt, StmtKind, Target, UnaryOp,
    },
    exception::{ExcType, ScriptError},
};

/// Maximum nesting of statements and expressions, matching CPython's limit of 200
/// nested parentheses.
pub(crate) const MAX_NESTING_DEPTH: u16 = 200;

type ParseResult<T> = Result<T, ScriptError>;

/// Parses a whole program.
pub(crate) fn parse_program(source: &str) -> ParseResult<Vec<Stmt>> {
    let mut parser = Parser::new(source);
    parser.check_bracket_depth()?;
    let parsed = parse_module(source).map_err(|error| parser.parse_error(&error))?;
    let module = parsed.into_syntax();
    parser.statements(module.body)
}

struct Parser<'a> {
    code: &'a str,
    /// Byte offset of every newline, to turn ranges into line numbers.
    line_ends: Vec<usize>,
    /// Remaining nesting budget; each statement or expression level takes one.
    depth_remaining: u16,
}

impl<'a> Parser<'a> {
    fn new(code: &'a str) -> Self {
        Self {
            code,
            line_ends: code.match_indices('\n').map(|(i, _)| i).collect(),
            depth_remaining: MAX_NESTING_DEPTH,
        }
    }

    fn line(&self, range: TextRange) -> usize {
        let offset = usize::from(range.start());
        self.line_ends.partition_point(|&end| end < offset) + 1
    }

    fn error(&self, message: impl Into<String>, range: TextRange) -> ScriptError {
        ScriptError::at_line(ExcType::SyntaxError, message, self.line(range))
    }

    fn unsupported<T>(&self, what: &str, range: TextRange) -> ParseResult<T> {
        Err(self.error(format!("{what} are not supported"), range))
    }

    fn parse_error(&self, error: &ruff_python_parser::ParseError) -> ScriptError {
        let message = error.error.to_string();
        let exc_type = if message.to_ascii_lowercase().contains("indent") {
            ExcType::IndentationError
        } else {
            ExcType::SyntaxError
        };
        ScriptError::at_line(exc_type, message, self.line(error.range()))
    }

    /// Rejects bracket nesting, and runs of prefix signs, beyond the budget before
    /// ruff recurses into them.
    ///
    /// String literals and comments are skipped.
    fn check_bracket_depth(&self) -> ParseResult<()> {
        let limit = usize::from(MAX_NESTING_DEPTH);
        let mut depth = 0usize;
        let mut signs = 0usize;
        let mut quote: Option<char> = None;
        let mut comment = false;
        let mut escaped = false;
        for (offset, c) in self.code.char_indices() {
            if comment {
                comment = c != '\n';
                continue;
            }
            if let Some(q) = quote {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
                continue;
            }
            match c {
                '-' | '+' | '~' => signs += 1,
                ' ' | '\t' => {}
                _ => signs = 0,
            }
            match c {
                '#' => comment = true,
                '\'' | '"' => quote = Some(c),
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => depth = depth.saturating_sub(1),
                _ => {}
            }
            if depth > limit || signs > limit {
                let line = self.line_ends.partition_point(|&end| end < offset) + 1;
                return Err(ScriptError::at_line(ExcType::SyntaxError, "too many nested parentheses", line));
            }
        }
        Ok(())
    }

    fn enter(&mut self, range: TextRange) -> ParseResult<()> {
        match self.depth_remaining.checked_sub(1) {
            Some(remaining) => {
                self.depth_remaining = remaining;
                Ok(())
            }
            None => Err(self.error("too many nested parentheses", range)),
        }
    }

    fn leave(&mut self) {
        self.depth_remaining += 1;
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn statements(&mut self, body: impl IntoIterator<Item = AstStmt>) -> ParseResult<Vec<Stmt>> {
        body.into_iter().map(|statement| self.statement(statement)).collect()
    }

    fn statement(&mut self, statement: AstStmt) -> ParseResult<Stmt> {
        let range = statement.range();
        self.enter(range)?;
        let kind = self.statement_kind(statement);
        self.leave();
        Ok(Stmt {
            kind: kind?,
            line: self.line(range),
        })
    }

    fn statement_kind(&mut self, statement: AstStmt) -> ParseResult<StmtKind> {
        match statement {
            AstStmt::FunctionDef(function) => {
                let range = function.range;
                if function.is_async {
                    return self.unsupported("async functions", range);
                }
                if !function.decorator_list.is_empty() {
                    return self.unsupported("decorators", range);
                }
                let name = function.name.id.to_string();
                let params = self.parameters(&function.parameters, range)?;
                Ok(StmtKind::FunctionDef(Arc::new(FunctionDef {
                    name,
                    params,
                    body: self.statements(function.body)?,
                })))
            }
            AstStmt::Return(ast::StmtReturn { value, .. }) => {
                Ok(StmtKind::Return(value.map(|value| self.expr(*value)).transpose()?))
            }
            AstStmt::Delete(ast::StmtDelete { targets, .. }) => Ok(StmtKind::Del(
                targets
                    .into_iter()
                    .map(|target| self.target(target))
                    .collect::<ParseResult<_>>()?,
            )),
            AstStmt::Assign(ast::StmtAssign { targets, value, .. }) => {
                let targets = targets
                    .into_iter()
                    .map(|target| self.target(target))
                    .collect::<ParseResult<_>>()?;
                Ok(StmtKind::Assign {
                    targets,
                    value: self.expr(*value)?,
                })
            }
            AstStmt::AugAssign(ast::StmtAugAssign {
                target, op, value, range, ..
            }) => {
                let op = self.binary_operator(op, range)?;
                let target = self.target(*target)?;
                if matches!(target, Target::Tuple(_)) {
                    return Err(self.error("illegal expression for augmented assignment", range));
                }
                Ok(StmtKind::AugAssign {
                    target,
                    op,
                    value: self.expr(*value)?,
                })
            }
            // Annotations are accepted and ignored.
            AstStmt::AnnAssign(ast::StmtAnnAssign { target, value, .. }) => match value {
                Some(value) => Ok(StmtKind::Assign {
                    targets: vec![self.target(*target)?],
                    value: self.expr(*value)?,
                }),
                None => Ok(StmtKind::Pass),
            },
            AstStmt::For(ast::StmtFor {
                is_async,
                target,
                iter,
                body,
                orelse,
                range,
                ..
            }) => {
                if is_async {
                    return self.unsupported("async for loops", range);
                }
                Ok(StmtKind::For {
                    target: self.target(*target)?,
                    iter: self.expr(*iter)?,
                    body: self.statements(body)?,
                    orelse: self.statements(orelse)?,
                })
            }
            AstStmt::While(ast::StmtWhile { test, body, orelse, .. }) => Ok(StmtKind::While {
                test: self.expr(*test)?,
                body: self.statements(body)?,
                orelse: self.statements(orelse)?,
            }),
            AstStmt::If(ast::StmtIf {
                test,
                body,
                elif_else_clauses,
                ..
            }) => Ok(StmtKind::If {
                test: self.expr(*test)?,
                body: self.statements(body)?,
                orelse: self.elif_else_clauses(elif_else_clauses)?,
            }),
            AstStmt::Raise(ast::StmtRaise { exc, .. }) => Ok(StmtKind::Raise(exc.map(|exc| self.expr(*exc)).transpose()?)),
            AstStmt::Try(ast::StmtTry {
                body,
                handlers,
                orelse,
                finalbody,
                is_star,
                range,
                ..
            }) => {
                if is_star {
                    return self.unsupported("'except*' clauses", range);
                }
                Ok(StmtKind::Try {
                    body: self.statements(body)?,
                    handlers: handlers
                        .into_iter()
                        .map(|handler| self.except_handler(handler))
                        .collect::<ParseResult<_>>()?,
                    orelse: self.statements(orelse)?,
                    finally: self.statements(finalbody)?,
                })
            }
            AstStmt::Assert(ast::StmtAssert { test, msg, .. }) => Ok(StmtKind::Assert {
                test: self.expr(*test)?,
                message: msg.map(|msg| self.expr(*msg)).transpose()?,
            }),
            AstStmt::Import(ast::StmtImport { names, .. }) => Ok(StmtKind::Import(
                names
                    .iter()
                    .map(|alias| {
                        let module = alias.name.id.to_string();
                        let binding = alias.asname.as_ref().map_or_else(|| module.clone(), |name| name.id.to_string());
                        (module, binding)
                    })
                    .collect(),
            )),
            AstStmt::ImportFrom(ast::StmtImportFrom {
                module,
                names,
                level,
                range,
                ..
            }) => {
                let Some(module) = module.filter(|_| level == 0) else {
                    return Err(ScriptError::at_line(
                        ExcType::ImportError,
                        "attempted relative import with no known parent package",
                        self.line(range),
                    ));
                };
                let mut imported = Vec::with_capacity(names.len());
                for alias in &names {
                    let name = alias.name.id.to_string();
                    if name == "*" {
                        return self.unsupported("wildcard imports", range);
                    }
                    let binding = alias.asname.as_ref().map_or_else(|| name.clone(), |name| name.id.to_string());
                    imported.push((name, binding));
                }
                Ok(StmtKind::ImportFrom {
                    module: module.id.to_string(),
                    names: imported,
                })
            }
            AstStmt::Global(ast::StmtGlobal { names, .. }) => {
                Ok(StmtKind::Global(names.iter().map(|name| name.id.to_string()).collect()))
            }
            // `...` is the usual placeholder body.
            AstStmt::Expr(ast::StmtExpr { value, .. }) if value.is_ellipsis_literal_expr() => Ok(StmtKind::Pass),
            AstStmt::Expr(ast::StmtExpr { value, .. }) => Ok(StmtKind::Expr(self.expr(*value)?)),
            AstStmt::Pass(_) => Ok(StmtKind::Pass),
            AstStmt::Break(_) => Ok(StmtKind::Break),
            AstStmt::Continue(_) => Ok(StmtKind::Continue),
            AstStmt::ClassDef(c) => self.unsupported("class definitions", c.range),
            AstStmt::With(w) => self.unsupported("'with' statements", w.range),
            AstStmt::Match(m) => self.unsupported("'match' statements", m.range),
            AstStmt::Nonlocal(n) => self.unsupported("'nonlocal' declarations", n.range),
            other => self.unsupported("statements of this kind", other.range()),
        }
    }

    /// `elif` chains nest as a single `if` in the `orelse` of the previous branch.
    fn elif_else_clauses(&mut self, clauses: Vec<ElifElseClause>) -> ParseResult<Vec<Stmt>> {
        let mut tail: Vec<Stmt> = Vec::new();
        for clause in clauses.into_iter().rev() {
            let line = self.line(clause.range);
            match clause.test {
                Some(test) => {
                    let kind = StmtKind::If {
                        test: self.expr(test)?,
                        body: self.statements(clause.body)?,
                        orelse: tail,
                    };
                    tail = vec![Stmt { kind, line }];
                }
                None => tail = self.statements(clause.body)?,
            }
        }
        Ok(tail)
    }

    fn except_handler(&mut self, handler: ast::ExceptHandler) -> ParseResult<ExceptHandler> {
        let ast::ExceptHandler::ExceptHandler(handler) = handler;
        let range = handler.range;
        let types = match handler.type_.map(|expr| *expr) {
            None => Vec::new(),
            Some(AstExpr::Name(ast::ExprName { id, .. })) => vec![id.to_string()],
            Some(AstExpr::Tuple(ast::ExprTuple { elts, .. })) => elts
                .into_iter()
                .map(|elt| match elt {
                    AstExpr::Name(ast::ExprName { id, .. }) => Ok(id.to_string()),
                    other => Err(self.error("except clauses must name exception classes", other.range())),
                })
                .collect::<ParseResult<_>>()?,
            Some(other) => return Err(self.error("except clauses must name exception classes", other.range())),
        };
        Ok(ExceptHandler {
            types,
            binding: handler.name.map(|name| name.id.to_string()),
            body: self.statements(handler.body)?,
            line: self.line(range),
        })
    }

    fn parameters(&mut self, parameters: &ast::Parameters, range: TextRange) -> ParseResult<Vec<Param>> {
        if parameters.vararg.is_some() || parameters.kwarg.is_some() {
            return self.unsupported("*args and **kwargs parameters", range);
        }
        if !parameters.kwonlyargs.is_empty() {
            return self.unsupported("keyword-only parameters", range);
        }
        let mut params: Vec<Param> = Vec::new();
        for parameter in parameters.posonlyargs.iter().chain(&parameters.args) {
            let param = self.parameter(parameter)?;
            if param.default.is_none() && params.iter().any(|p| p.default.is_some()) {
                return Err(self.error("non-default argument follows default argument", parameter.range));
            }
            if params.iter().any(|p| p.name == param.name) {
                return Err(self.error(
                    format!("duplicate argument '{}' in function definition", param.name),
                    parameter.range,
                ));
            }
            params.push(param);
        }
        Ok(params)
    }

    fn parameter(&mut self, parameter: &ParameterWithDefault) -> ParseResult<Param> {
        let default = match &parameter.default {
            Some(expr) => Some(self.expr((**expr).clone())?),
            None => None,
        };
        Ok(Param {
            name: parameter.parameter.name.id.to_string(),
            default,
        })
    }

    fn target(&mut self, expression: AstExpr) -> ParseResult<Target> {
        let range = expression.range();
        self.enter(range)?;
        let target = self.target_impl(expression);
        self.leave();
        target
    }

    fn target_impl(&mut self, expression: AstExpr) -> ParseResult<Target> {
        match expression {
            AstExpr::Name(ast::ExprName { id, .. }) => Ok(Target::Name(id.to_string())),
            AstExpr::Subscript(ast::ExprSubscript { slice, range, .. }) if slice.is_slice_expr() => {
                self.unsupported("slice assignments", range)
            }
            AstExpr::Subscript(ast::ExprSubscript { value, slice, .. }) => Ok(Target::Subscript {
                object: self.expr(*value)?,
                index: self.expr(*slice)?,
            }),
            AstExpr::Attribute(ast::ExprAttribute { value, attr, .. }) => Ok(Target::Attribute {
                object: self.expr(*value)?,
                name: attr.id.to_string(),
            }),
            AstExpr::Tuple(ast::ExprTuple { elts, .. }) | AstExpr::List(ast::ExprList { elts, .. }) => Ok(Target::Tuple(
                elts.into_iter()
                    .map(|elt| self.target(elt))
                    .collect::<ParseResult<_>>()?,
            )),
            AstExpr::Starred(starred) => self.unsupported("starred assignment targets", starred.range),
            other => Err(self.error("cannot assign to expression", other.range())),
        }
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn exprs(&mut self, expressions: impl IntoIterator<Item = AstExpr>) -> ParseResult<Vec<Expr>> {
        expressions.into_iter().map(|expression| self.expr(expression)).collect()
    }

    fn boxed(&mut self, expression: AstExpr) -> ParseResult<Box<Expr>> {
        self.expr(expression).map(Box::new)
    }

    fn expr(&mut self, expression: AstExpr) -> ParseResult<Expr> {
        let range = expression.range();
        self.enter(range)?;
        let expr = self.expr_impl(expression);
        self.leave();
        expr
    }

    fn expr_impl(&mut self, expression: AstExpr) -> ParseResult<Expr> {
        match expression {
            AstExpr::BoolOp(ast::ExprBoolOp { op, values, range, .. }) => {
                let op = match op {
                    AstBoolOp::And => BoolOp::And,
                    AstBoolOp::Or => BoolOp::Or,
                };
                let mut values = values.into_iter();
                let Some(first) = values.next() else {
                    return Err(self.error("invalid syntax", range));
                };
                let mut left = self.expr(first)?;
                for value in values {
                    left = Expr::BoolOp {
                        op,
                        left: Box::new(left),
                        right: self.boxed(value)?,
                    };
                }
                Ok(left)
            }
            AstExpr::BinOp(ast::ExprBinOp {
                left, op, right, range, ..
            }) => Ok(Expr::Binary {
                op: self.binary_operator(op, range)?,
                left: self.boxed(*left)?,
                right: self.boxed(*right)?,
            }),
            AstExpr::UnaryOp(ast::ExprUnaryOp { op, operand, range, .. }) => {
                let op = match op {
                    AstUnaryOp::Not => UnaryOp::Not,
                    AstUnaryOp::USub => UnaryOp::Neg,
                    AstUnaryOp::UAdd => UnaryOp::Pos,
                    AstUnaryOp::Invert => return self.unsupported("bitwise operators", range),
                };
                Ok(Expr::Unary {
                    op,
                    operand: self.boxed(*operand)?,
                })
            }
            AstExpr::Lambda(ast::ExprLambda {
                parameters, body, range, ..
            }) => {
                let params = match parameters {
                    Some(parameters) => self.parameters(&parameters, range)?,
                    None => Vec::new(),
                };
                let body = self.expr(*body)?;
                Ok(Expr::Lambda(Arc::new(FunctionDef {
                    name: "<lambda>".to_owned(),
                    params,
                    body: vec![Stmt {
                        kind: StmtKind::Return(Some(body)),
                        line: self.line(range),
                    }],
                })))
            }
            AstExpr::If(ast::ExprIf { test, body, orelse, .. }) => Ok(Expr::IfElse {
                test: self.boxed(*test)?,
                body: self.boxed(*body)?,
                orelse: self.boxed(*orelse)?,
            }),
            AstExpr::Dict(ast::ExprDict { items, range, .. }) => {
                let mut entries = Vec::with_capacity(items.len());
                for ast::DictItem { key, value } in items {
                    let Some(key) = key else {
                        return self.unsupported("dict unpacking expressions", range);
                    };
                    entries.push((self.expr(key)?, self.expr(value)?));
                }
                Ok(Expr::Dict(entries))
            }
            AstExpr::ListComp(ast::ExprListComp { elt, generators, .. })
            | AstExpr::Generator(ast::ExprGenerator { elt, generators, .. }) => Ok(Expr::ListComp {
                element: self.boxed(*elt)?,
                generators: self.comprehensions(generators)?,
            }),
            AstExpr::DictComp(ast::ExprDictComp {
                key, value, generators, ..
            }) => Ok(Expr::DictComp {
                key: self.boxed(*key)?,
                value: self.boxed(*value)?,
                generators: self.comprehensions(generators)?,
            }),
            AstExpr::Compare(ast::ExprCompare {
                left, ops, comparators, ..
            }) => {
                let left = self.boxed(*left)?;
                let mut rest = Vec::with_capacity(ops.len());
                for (op, right) in ops.into_vec().into_iter().zip(comparators.into_vec()) {
                    rest.push((compare_operator(op), self.expr(right)?));
                }
                Ok(Expr::Compare { left, rest })
            }
            AstExpr::Call(ast::ExprCall {
                func, arguments, range, ..
            }) => {
                let ast::Arguments { args, keywords, .. } = arguments;
                let mut call_args = Vec::with_capacity(args.len() + keywords.len());
                for arg in args.into_vec() {
                    if arg.is_starred_expr() {
                        return self.unsupported("starred call arguments", range);
                    }
                    call_args.push(Arg {
                        keyword: None,
                        value: self.expr(arg)?,
                    });
                }
                for keyword in keywords {
                    let Some(name) = keyword.arg else {
                        return self.unsupported("'**' call arguments", range);
                    };
                    call_args.push(Arg {
                        keyword: Some(name.id.to_string()),
                        value: self.expr(keyword.value)?,
                    });
                }
                match *func {
                    AstExpr::Attribute(ast::ExprAttribute { value, attr, .. }) => Ok(Expr::MethodCall {
                        object: self.boxed(*value)?,
                        method: attr.id.to_string(),
                        args: call_args,
                    }),
                    other => Ok(Expr::Call {
                        func: self.boxed(other)?,
                        args: call_args,
                    }),
                }
            }
            AstExpr::FString(ast::ExprFString { value, .. }) => self.fstring(&value),
            AstExpr::StringLiteral(ast::ExprStringLiteral { value, .. }) => Ok(Expr::Str(value.to_string())),
            AstExpr::NumberLiteral(ast::ExprNumberLiteral { value, range, .. }) => match value {
                Number::Int(int) => match int.as_i64() {
                    Some(i) => Ok(Expr::Int(i)),
                    None => parse_int_literal(&int.to_string())
                        .map(Expr::BigInt)
                        .ok_or_else(|| self.error(format!("invalid integer literal: {int}"), range)),
                },
                Number::Float(f) => Ok(Expr::Float(f)),
                Number::Complex { .. } => self.unsupported("complex numbers", range),
            },
            AstExpr::BooleanLiteral(ast::ExprBooleanLiteral { value, .. }) => Ok(Expr::Bool(value)),
            AstExpr::NoneLiteral(_) => Ok(Expr::None),
            AstExpr::Attribute(ast::ExprAttribute { value, attr, .. }) => Ok(Expr::Attribute {
                object: self.boxed(*value)?,
                name: attr.id.to_string(),
            }),
            AstExpr::Subscript(ast::ExprSubscript { value, slice, .. }) => {
                let object = self.boxed(*value)?;
                match *slice {
                    AstExpr::Slice(ast::ExprSlice { lower, upper, step, .. }) => Ok(Expr::Slice {
                        object,
                        start: lower.map(|e| self.boxed(*e)).transpose()?,
                        stop: upper.map(|e| self.boxed(*e)).transpose()?,
                        step: step.map(|e| self.boxed(*e)).transpose()?,
                    }),
                    index => Ok(Expr::Subscript {
                        object,
                        index: self.boxed(index)?,
                    }),
                }
            }
            AstExpr::Name(ast::ExprName { id, .. }) => Ok(Expr::Name(id.to_string())),
            AstExpr::List(ast::ExprList { elts, range, .. }) => {
                if elts.iter().any(AstExpr::is_starred_expr) {
                    return self.unsupported("starred expressions", range);
                }
                Ok(Expr::List(self.exprs(elts)?))
            }
            AstExpr::Tuple(ast::ExprTuple { elts, range, .. }) => {
                if elts.iter().any(AstExpr::is_starred_expr) {
                    return self.unsupported("starred expressions", range);
                }
                Ok(Expr::Tuple(self.exprs(elts)?))
            }
            AstExpr::Set(s) => self.unsupported("set literals", s.range),
            AstExpr::SetComp(s) => self.unsupported("set comprehensions", s.range),
            AstExpr::Named(n) => self.unsupported("assignment expressions", n.range),
            AstExpr::BytesLiteral(b) => self.unsupported("bytes literals", b.range),
            AstExpr::Starred(s) => self.unsupported("starred expressions", s.range),
            AstExpr::Await(a) => self.unsupported("'await' expressions", a.range),
            AstExpr::Yield(y) => self.unsupported("generators", y.range),
            AstExpr::YieldFrom(y) => self.unsupported("generators", y.range),
            other => self.unsupported("expressions of this kind", other.range()),
        }
    }

    fn binary_operator(&self, op: Operator, range: TextRange) -> ParseResult<BinOp> {
        Ok(match op {
            Operator::Add => BinOp::Add,
            Operator::Sub => BinOp::Sub,
            Operator::Mult => BinOp::Mul,
            Operator::Div => BinOp::Div,
            Operator::FloorDiv => BinOp::FloorDiv,
            Operator::Mod => BinOp::Mod,
            Operator::Pow => BinOp::Pow,
            Operator::MatMult => return self.unsupported("matrix multiplication", range),
            Operator::LShift | Operator::RShift | Operator::BitOr | Operator::BitXor | Operator::BitAnd => {
                return self.unsupported("bitwise operators", range);
            }
        })
    }

    fn comprehensions(&mut self, generators: Vec<ast::Comprehension>) -> ParseResult<Vec<Comprehension>> {
        generators
            .into_iter()
            .map(|comprehension| {
                if comprehension.is_async {
                    return self.unsupported("async comprehensions", comprehension.range);
                }
                Ok(Comprehension {
                    target: self.target(comprehension.target)?,
                    iter: self.expr(comprehension.iter)?,
                    conditions: self.exprs(comprehension.ifs)?,
                })
            })
            .collect()
    }

    /// Joins the literal and interpolated pieces of an (implicitly concatenated) f-string.
    fn fstring(&mut self, value: &ast::FStringValue) -> ParseResult<Expr> {
        let mut parts = Vec::new();
        for part in value {
            match part {
                ast::FStringPart::Literal(literal) => push_literal(&mut parts, &literal.value),
                ast::FStringPart::FString(fstring) => {
                    for element in &fstring.elements {
                        self.fstring_element(element, &mut parts)?;
                    }
                }
            }
        }
        match parts.as_slice() {
            [] => Ok(Expr::Str(String::new())),
            [FStringPart::Literal(text)] => Ok(Expr::Str(text.clone())),
            _ => Ok(Expr::FString(parts)),
        }
    }

    fn fstring_element(&mut self, element: &InterpolatedStringElement, parts: &mut Vec<FStringPart>) -> ParseResult<()> {
        match element {
            InterpolatedStringElement::Literal(literal) => push_literal(parts, &literal.value),
            InterpolatedStringElement::Interpolation(interpolation) => {
                let mut conversion = match interpolation.conversion {
                    ConversionFlag::None => Conversion::None,
                    ConversionFlag::Str => Conversion::Str,
                    ConversionFlag::Repr | ConversionFlag::Ascii => Conversion::Repr,
                };
                // `f'{x=}'` prints the source text, then the repr unless a spec or conversion is given.
                if let Some(debug) = &interpolation.debug_text {
                    let source = &self.code[interpolation.expression.range()];
                    push_literal(parts, &format!("{}{source}{}", debug.leading(), debug.trailing()));
                    if conversion == Conversion::None && interpolation.format_spec.is_none() {
                        conversion = Conversion::Repr;
                    }
                }
                let mut spec = Vec::new();
                if let Some(format_spec) = &interpolation.format_spec {
                    for element in &format_spec.elements {
                        self.fstring_element(element, &mut spec)?;
                    }
                }
                parts.push(FStringPart::Field {
                    expr: self.expr((*interpolation.expression).clone())?,
                    conversion,
                    spec,
                });
            }
        }
        Ok(())
    }
}

fn push_literal(parts: &mut Vec<FStringPart>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(FStringPart::Literal(previous)) = parts.last_mut() {
        previous.push_str(text);
    } else {
        parts.push(FStringPart::Literal(text.to_owned()));
    }
}

fn compare_operator(op: AstCmpOp) -> CmpOp {
    match op {
        AstCmpOp::Eq => CmpOp::Eq,
        AstCmpOp::NotEq => CmpOp::NotEq,
        AstCmpOp::Lt => CmpOp::Lt,
        AstCmpOp::LtE => CmpOp::Le,
        AstCmpOp::Gt => CmpOp::Gt,
        AstCmpOp::GtE => CmpOp::Ge,
        AstCmpOp::Is => CmpOp::Is,
        AstCmpOp::IsNot => CmpOp::IsNot,
        AstCmpOp::In => CmpOp::In,
        AstCmpOp::NotIn => CmpOp::NotIn,
    }
}

/// Parses an integer literal, with its radix prefix and digit separators, into a `BigInt`.
fn parse_int_literal(text: &str) -> Option<BigInt> {
    let cleaned: String = text.chars().filter(|c| *c != '_').collect();
    let lowered = cleaned.to_ascii_lowercase();
    let (radix, digits) = match lowered.get(..2) {
        Some("0x") => (16, &lowered[2..]),
        Some("0o") => (8, &lowered[2..]),
        Some("0b") => (2, &lowered[2..]),
        _ => (10, lowered.as_str()),
    };
    BigInt::parse_bytes(digits.as_bytes(), radix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statements_record_their_line() {
        let body = parse_program("x = 1\n\nif x:\n    print(x)\n").unwrap();
        assert_eq!(body.len(), 2);
        assert_eq!(body[1].line, 3);
        let StmtKind::If { body: inner, .. } = &body[1].kind else {
            panic!("expected if");
        };
        assert_eq!(inner[0].line, 4);
    }

    #[test]
    fn elif_chains_nest_in_orelse() {
        let body = parse_program("if a:\n    pass\nelif b:\n    pass\nelse:\n    pass\n").unwrap();
        let StmtKind::If { orelse, .. } = &body[0].kind else {
            panic!("expected if");
        };
        assert_eq!(orelse[0].line, 3);
        assert!(matches!(&orelse[0].kind, StmtKind::If { orelse, .. } if orelse.len() == 1));
    }

    #[test]
    fn tuple_unpacking_and_chained_assignment() {
        let body = parse_program("a, b = 1, 2\nx = y = 0\n").unwrap();
        let StmtKind::Assign { targets, .. } = &body[0].kind else {
            panic!("expected assign");
        };
        assert!(matches!(targets[0], Target::Tuple(_)));
        let StmtKind::Assign { targets, .. } = &body[1].kind else {
            panic!("expected assign");
        };
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn fstring_fields_and_specs() {
        let body = parse_program("f'total={a + b:.2f} {{done}} {c!r}'\n").unwrap();
        let StmtKind::Expr(Expr::FString(parts)) = &body[0].kind else {
            panic!("expected an f-string");
        };
        assert_eq!(parts.len(), 4);
        assert!(matches!(&parts[0], FStringPart::Literal(s) if s == "total="));
        assert!(matches!(&parts[1], FStringPart::Field { spec, .. } if matches!(spec.as_slice(), [FStringPart::Literal(s)] if s == ".2f")));
        assert!(matches!(&parts[2], FStringPart::Literal(s) if s == " {done} "));
        assert!(matches!(&parts[3], FStringPart::Field { conversion: Conversion::Repr, .. }));
    }

    #[test]
    fn list_comprehension_keeps_every_clause() {
        let body = parse_program("[x * y for x in a if x for y in b]\n").unwrap();
        let StmtKind::Expr(Expr::ListComp { generators, .. }) = &body[0].kind else {
            panic!("expected a list comprehension");
        };
        assert_eq!(generators.len(), 2);
        assert_eq!(generators[0].conditions.len(), 1);
        assert!(matches!(generators[1].target, Target::Name(ref name) if name == "y"));
    }

    #[test]
    fn large_integer_literals_become_bigints() {
        let body = parse_program("x = 123456789012345678901234567890\ny = 0xFFFF_FFFF_FFFF_FFFF_FF\n").unwrap();
        let StmtKind::Assign { value: Expr::BigInt(x), .. } = &body[0].kind else {
            panic!("expected a bigint literal");
        };
        assert_eq!(x.to_string(), "123456789012345678901234567890");
        let StmtKind::Assign { value: Expr::BigInt(y), .. } = &body[1].kind else {
            panic!("expected a bigint literal");
        };
        assert_eq!(y.to_string(), "4722366482869645213695");
    }

    #[test]
    fn syntax_error_reports_line() {
        let err = parse_program("x = 1\ny = (2 +\n").unwrap_err();
        assert!(matches!(err.exc_type, ExcType::SyntaxError | ExcType::IndentationError));
        let err = parse_program("x = 1\nprint(x))\n").unwrap_err();
        assert_eq!(err.into_raised().frames[0].line, 2);
    }

    #[test]
    fn unsupported_syntax_is_a_syntax_error_on_its_line() {
        let err = parse_program("x = 1\nclass A:\n    pass\n").unwrap_err();
        assert_eq!(err.exc_type, ExcType::SyntaxError);
        assert_eq!(err.message, "class definitions are not supported");
        assert_eq!(err.into_raised().frames[0].line, 2);
        let err = parse_program("def f(a=1, b):\n    pass\n").unwrap_err();
        assert_eq!(err.exc_type, ExcType::SyntaxError);
    }

    /// Parses on a thread with the evaluation thread's stack, as `execute` does.
    fn parse_on_eval_stack(source: String) -> ParseResult<Vec<Stmt>> {
        std::thread::Builder::new()
            .stack_size(64 * 1024 * 1024)
            .spawn(move || parse_program(&source))
            .unwrap()
            .join()
            .unwrap()
    }

    #[test]
    fn deep_nesting_is_rejected_not_overflowed() {
        let depth = usize::from(MAX_NESTING_DEPTH) + 1;
        let source = format!("x = {}1{}\n", "(".repeat(depth), ")".repeat(depth));
        let err = parse_program(&source).unwrap_err();
        assert_eq!(err.exc_type, ExcType::SyntaxError);
        assert_eq!(err.message, "too many nested parentheses");

        let source = format!("x = {}1\n", "-".repeat(usize::from(MAX_NESTING_DEPTH) * 2));
        let err = parse_program(&source).unwrap_err();
        assert_eq!(err.message, "too many nested parentheses");

        // Nesting through calls and subscripts is caught by the lowering budget instead.
        let source = format!("x = {}\n", "f(".repeat(150) + "1" + &")".repeat(150));
        assert!(parse_on_eval_stack(source).is_ok());
        let source = format!("x = {}1\n", "not ".repeat(usize::from(MAX_NESTING_DEPTH) + 1));
        let err = parse_on_eval_stack(source).unwrap_err();
        assert_eq!(err.message, "too many nested parentheses");

        assert!(parse_program(&format!("x = {}1{}\n", "(".repeat(20), ")".repeat(20))).is_ok());
        assert!(parse_program("s = '((((((((((((('\n# ]]]]]]]]\n").is_ok());
    }
}
