//! Tree-walking evaluator.
//!
//! [`Runtime`] is the state that survives between executions (globals, heap, PRNG);
//! [`Eval`] is one execution over it, borrowing the host I/O and owning the resource
//! tracker and the call-frame stack.

use std::{str::FromStr, sync::Arc};

use ahash::{AHashMap, AHashSet};
use indexmap::IndexMap;
use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{Signed, ToPrimitive, Zero};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::{
    ast::{
        Arg, BinOp, BoolOp, CmpOp, Comprehension, Conversion, ExceptHandler, Expr, FStringPart, FunctionDef, Stmt,
        StmtKind, Target, UnaryOp,
    },
    builtins::Builtin,
    exception::{ExcType, RunResult, ScriptError, Signal, Unwind, raise},
    format::FormatSpec,
    modules::Module,
    value::{DictKey, Heap, HeapData, HeapId, Number, UserFunction, Value, py_cmp, py_eq, py_is, range_len},
};
use crate::{io::HostIo, resource::LimitedTracker};

/// Interpreter state that persists across executions until reset.
#[derive(Debug)]
pub(crate) struct Runtime {
    pub heap: Heap,
    pub globals: AHashMap<String, Value>,
    pub rng: ChaCha8Rng,
    /// Seed last applied by the host; `random.seed()` without arguments returns to it.
    pub seed: u64,
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            heap: Heap::default(),
            globals: AHashMap::new(),
            rng: ChaCha8Rng::seed_from_u64(0),
            seed: 0,
        }
    }
}

impl Runtime {
    pub fn reseed(&mut self, seed: u64) {
        self.seed = seed;
        self.rng = ChaCha8Rng::seed_from_u64(seed);
    }

    pub fn reset(&mut self) {
        self.heap.clear();
        self.globals.clear();
    }
}

/// Statement completion.
#[derive(Debug)]
pub(crate) enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

#[derive(Debug)]
struct Frame {
    function: Arc<UserFunction>,
    locals: AHashMap<String, Value>,
    global_names: AHashSet<String>,
}

/// Lazy iteration state for `for` loops and comprehensions.
pub(crate) enum IterState {
    Range { next: i64, remaining: usize, step: i64 },
    /// Lists are read live by index so appends during iteration are seen.
    Live { id: HeapId, index: usize },
    Items(std::vec::IntoIter<Value>),
    /// Dict keys are snapshotted; tuple keys are rebuilt on the heap as they are reached.
    Keys(std::vec::IntoIter<DictKey>),
}

pub(crate) struct Eval<'a> {
    pub rt: &'a mut Runtime,
    pub io: &'a mut dyn HostIo,
    pub tracker: LimitedTracker,
    frames: Vec<Frame>,
    /// Exceptions currently being handled, innermost last; bare `raise` re-raises the top.
    handling: Vec<ScriptError>,
    /// Line of the statement currently executing.
    pub line: usize,
}

impl<'a> Eval<'a> {
    pub fn new(rt: &'a mut Runtime, io: &'a mut dyn HostIo, tracker: LimitedTracker) -> Self {
        Self {
            rt,
            io,
            tracker,
            frames: Vec::new(),
            handling: Vec::new(),
            line: 1,
        }
    }

    fn function_name(&self) -> &str {
        self.frames.last().map_or("<module>", |frame| frame.function.def.name.as_str())
    }

    // =========================================================================
    // Statements
    // =========================================================================

    pub fn exec_block(&mut self, body: &[Stmt]) -> RunResult<Flow> {
        for stmt in body {
            match self.exec_stmt(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> RunResult<Flow> {
        self.line = stmt.line;
        self.tracker.check_time()?;
        self.exec_kind(&stmt.kind).map_err(|mut unwind| {
            if let Unwind::Error(error) = &mut unwind {
                error.locate(stmt.line, self.function_name());
            }
            unwind
        })
    }

    fn exec_kind(&mut self, kind: &StmtKind) -> RunResult<Flow> {
        match kind {
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value)?,
            StmtKind::If { test, body, orelse } => {
                let test = self.eval(test)?;
                return if test.truthy(&self.rt.heap) {
                    self.exec_block(body)
                } else {
                    self.exec_block(orelse)
                };
            }
            StmtKind::While { test, body, orelse } => {
                loop {
                    self.tracker.check_time()?;
                    let test = self.eval(test)?;
                    if !test.truthy(&self.rt.heap) {
                        return self.exec_block(orelse);
                    }
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                let iterable = self.eval(iter)?;
                let mut state = self.iterate(&iterable)?;
                loop {
                    self.tracker.check_time()?;
                    let Some(item) = self.next_item(&mut state) else {
                        return self.exec_block(orelse);
                    };
                    self.assign(target, item)?;
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            StmtKind::FunctionDef(def) => {
                let function = self.make_function(def)?;
                self.store_name(&def.name, function);
            }
            StmtKind::Return(value) => {
                if self.frames.is_empty() {
                    return raise(ExcType::SyntaxError, "'return' outside function");
                }
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
            StmtKind::Global(names) => {
                if let Some(frame) = self.frames.last_mut() {
                    frame.global_names.extend(names.iter().cloned());
                }
            }
            StmtKind::Import(modules) => {
                for (module, binding) in modules {
                    let Ok(found) = Module::from_str(module) else {
                        return raise(ExcType::ImportError, format!("No module named '{module}'"));
                    };
                    self.store_name(binding, Value::Module(found));
                }
            }
            StmtKind::ImportFrom { module, names } => {
                let Ok(found) = Module::from_str(module) else {
                    return raise(ExcType::ImportError, format!("No module named '{module}'"));
                };
                for (name, binding) in names {
                    let Some(value) = found.attribute(name) else {
                        return raise(
                            ExcType::ImportError,
                            format!("cannot import name '{name}' from '{module}'"),
                        );
                    };
                    self.store_name(binding, value);
                }
            }
            StmtKind::Raise(value) => return Err(self.raise_statement(value.as_ref())?),
            StmtKind::Assert { test, message } => {
                let test = self.eval(test)?;
                if !test.truthy(&self.rt.heap) {
                    let message = match message {
                        Some(expr) => {
                            let value = self.eval(expr)?;
                            value.py_str(&self.rt.heap)
                        }
                        None => String::new(),
                    };
                    return raise(ExcType::AssertionError, message);
                }
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finally,
            } => {
                let outcome = match self.exec_block(body) {
                    Err(Unwind::Error(error)) => self.handle_exception(error, handlers),
                    Ok(Flow::Normal) => self.exec_block(orelse),
                    other => other,
                };
                // A pending signal is a pause of the whole program, not an exit from this
                // block, so `finally` must not run for it.
                if matches!(outcome, Err(Unwind::Signal(_))) || finally.is_empty() {
                    return outcome;
                }
                match self.exec_block(finally)? {
                    Flow::Normal => return outcome,
                    flow => return Ok(flow),
                }
            }
            StmtKind::Del(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
            }
        }
        Ok(Flow::Normal)
    }

    fn handle_exception(&mut self, error: ScriptError, handlers: &[ExceptHandler]) -> RunResult<Flow> {
        for handler in handlers {
            let mut matched = handler.types.is_empty();
            for name in &handler.types {
                let Ok(exc_type) = ExcType::from_str(name) else {
                    return raise(ExcType::NameError, format!("name '{name}' is not defined"));
                };
                if error.exc_type.is_subclass_of(exc_type) {
                    matched = true;
                    break;
                }
            }
            if !matched {
                continue;
            }
            self.line = handler.line;
            if let Some(binding) = &handler.binding {
                self.store_name(binding, Value::Exception(error.exc_type, error.message.clone()));
            }
            self.handling.push(error);
            let result = self.exec_block(&handler.body);
            self.handling.pop();
            return result;
        }
        Err(Unwind::Error(error))
    }

    fn raise_statement(&mut self, value: Option<&Expr>) -> RunResult<Unwind> {
        let Some(expr) = value else {
            return match self.handling.last() {
                Some(active) => Ok(Unwind::Error(active.clone())),
                None => raise(ExcType::RuntimeError, "No active exception to reraise"),
            };
        };
        match self.eval(expr)? {
            Value::ExcClass(exc_type) => Ok(ScriptError::new(exc_type, "").into()),
            Value::Exception(exc_type, message) => Ok(ScriptError::new(exc_type, message).into()),
            _ => raise(ExcType::TypeError, "exceptions must derive from BaseException"),
        }
    }

    fn make_function(&mut self, def: &Arc<FunctionDef>) -> RunResult<Value> {
        let mut defaults = Vec::new();
        for param in &def.params {
            if let Some(default) = &param.default {
                defaults.push(self.eval(default)?);
            }
        }
        let captured = match self.frames.last() {
            Some(frame) => {
                let mut captured = frame.function.captured.clone();
                captured.extend(frame.locals.iter().map(|(k, v)| (k.clone(), v.clone())));
                captured
            }
            None => AHashMap::new(),
        };
        let function = UserFunction {
            def: Arc::clone(def),
            defaults,
            captured,
        };
        Ok(Value::Ref(self.rt.heap.allocate(HeapData::Function(Arc::new(function)))))
    }

    // =========================================================================
    // Names and targets
    // =========================================================================

    fn store_name(&mut self, name: &str, value: Value) {
        match self.frames.last_mut() {
            Some(frame) if !frame.global_names.contains(name) => {
                frame.locals.insert(name.to_owned(), value);
            }
            _ => {
                self.rt.globals.insert(name.to_owned(), value);
            }
        }
    }

    fn load_name(&self, name: &str) -> RunResult<Value> {
        if let Some(frame) = self.frames.last() {
            if let Some(value) = frame.locals.get(name) {
                return Ok(value.clone());
            }
            if !frame.global_names.contains(name)
                && let Some(value) = frame.function.captured.get(name)
            {
                return Ok(value.clone());
            }
        }
        if let Some(value) = self.rt.globals.get(name) {
            return Ok(value.clone());
        }
        if let Ok(builtin) = Builtin::from_str(name) {
            return Ok(Value::Builtin(builtin));
        }
        if let Ok(exc_type) = ExcType::from_str(name) {
            return Ok(Value::ExcClass(exc_type));
        }
        raise(ExcType::NameError, format!("name '{name}' is not defined"))
    }

    fn assign(&mut self, target: &Target, value: Value) -> RunResult<()> {
        match target {
            Target::Name(name) => {
                self.store_name(name, value);
                Ok(())
            }
            Target::Subscript { object, index } => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                self.set_item(&object, &index, value)
            }
            Target::Attribute { object, name } => {
                let object = self.eval(object)?;
                raise(
                    ExcType::AttributeError,
                    format!(
                        "'{}' object attribute '{name}' is read-only",
                        object.type_name(&self.rt.heap)
                    ),
                )
            }
            Target::Tuple(targets) => {
                let items = self.collect(&value)?;
                if items.len() < targets.len() {
                    return raise(
                        ExcType::ValueError,
                        format!(
                            "not enough values to unpack (expected {}, got {})",
                            targets.len(),
                            items.len()
                        ),
                    );
                }
                if items.len() > targets.len() {
                    return raise(
                        ExcType::ValueError,
                        format!("too many values to unpack (expected {})", targets.len()),
                    );
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item)?;
                }
                Ok(())
            }
        }
    }

    fn aug_assign(&mut self, target: &Target, op: BinOp, value: &Expr) -> RunResult<()> {
        match target {
            Target::Name(name) => {
                let current = self.load_name(name)?;
                let operand = self.eval(value)?;
                let result = self.in_place_op(op, current, operand)?;
                self.store_name(name, result);
                Ok(())
            }
            Target::Subscript { object, index } => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                let current = self.get_item(&object, &index)?;
                let operand = self.eval(value)?;
                let result = self.in_place_op(op, current, operand)?;
                self.set_item(&object, &index, result)
            }
            _ => raise(ExcType::SyntaxError, "illegal expression for augmented assignment"),
        }
    }

    /// `+=` on a list extends it in place; everything else rebinds.
    fn in_place_op(&mut self, op: BinOp, current: Value, operand: Value) -> RunResult<Value> {
        if op == BinOp::Add
            && let Value::Ref(id) = current
            && matches!(self.rt.heap.get(id), HeapData::List(_))
        {
            let items = self.collect(&operand)?;
            if let HeapData::List(list) = self.rt.heap.get_mut(id) {
                list.extend(items);
            }
            return Ok(current);
        }
        self.binary_op(op, current, operand)
    }

    fn delete(&mut self, target: &Target) -> RunResult<()> {
        match target {
            Target::Name(name) => {
                let removed = match self.frames.last_mut() {
                    Some(frame) if !frame.global_names.contains(name) => frame.locals.remove(name),
                    _ => self.rt.globals.remove(name),
                };
                if removed.is_none() {
                    return raise(ExcType::NameError, format!("name '{name}' is not defined"));
                }
                Ok(())
            }
            Target::Subscript { object, index } => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                let Value::Ref(id) = object else {
                    return raise(
                        ExcType::TypeError,
                        format!(
                            "'{}' object does not support item deletion",
                            object.type_name(&self.rt.heap)
                        ),
                    );
                };
                let key = match self.rt.heap.get(id) {
                    HeapData::Dict(_) => Some(index.to_key(&self.rt.heap)?),
                    _ => None,
                };
                let index_repr = index.py_repr(&self.rt.heap);
                match (self.rt.heap.get_mut(id), key) {
                    (HeapData::List(items), _) => {
                        let position = index
                            .as_int()
                            .and_then(|i| normalize_index(i, items.len()))
                            .ok_or_else(|| ScriptError::new(ExcType::IndexError, "list assignment index out of range"))?;
                        items.remove(position);
                        Ok(())
                    }
                    (HeapData::Dict(entries), Some(key)) => {
                        if entries.shift_remove(&key).is_none() {
                            return raise(ExcType::KeyError, index_repr);
                        }
                        Ok(())
                    }
                    _ => raise(ExcType::TypeError, "object does not support item deletion"),
                }
            }
            Target::Attribute { name, .. } => raise(ExcType::AttributeError, format!("cannot delete attribute '{name}'")),
            Target::Tuple(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
                Ok(())
            }
        }
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    pub fn eval(&mut self, expr: &Expr) -> RunResult<Value> {
        match expr {
            Expr::None => Ok(Value::None),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Int(i) => Ok(Value::Int(*i)),
            Expr::BigInt(i) => Ok(Value::BigInt(i.clone())),
            Expr::Float(f) => Ok(Value::Float(*f)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::FString(parts) => self.fstring(parts).map(Value::Str),
            Expr::Name(name) => self.load_name(name),
            Expr::List(items) => {
                let items = self.eval_all(items)?;
                Ok(self.rt.heap.new_list(items))
            }
            Expr::Tuple(items) => {
                let items = self.eval_all(items)?;
                Ok(self.rt.heap.new_tuple(items))
            }
            Expr::Dict(entries) => {
                let mut map = IndexMap::with_capacity(entries.len());
                for (key, value) in entries {
                    let key = self.eval(key)?.to_key(&self.rt.heap)?;
                    let value = self.eval(value)?;
                    map.insert(key, value);
                }
                Ok(self.rt.heap.new_dict(map))
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                self.binary_op(*op, left, right)
            }
            Expr::Unary { op, operand } => {
                let operand = self.eval(operand)?;
                self.unary_op(*op, &operand)
            }
            Expr::BoolOp { op, left, right } => {
                let left = self.eval(left)?;
                let truthy = left.truthy(&self.rt.heap);
                match (op, truthy) {
                    (BoolOp::And, false) | (BoolOp::Or, true) => Ok(left),
                    _ => self.eval(right),
                }
            }
            Expr::Compare { left, rest } => {
                let mut current = self.eval(left)?;
                for (op, right) in rest {
                    let right = self.eval(right)?;
                    if !self.compare(*op, &current, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    current = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::IfElse { test, body, orelse } => {
                let test = self.eval(test)?;
                if test.truthy(&self.rt.heap) {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
            Expr::Call { func, args } => {
                let func = self.eval(func)?;
                let (args, kwargs) = self.eval_args(args)?;
                self.call_value(&func, args, kwargs)
            }
            Expr::MethodCall { object, method, args } => {
                let object = self.eval(object)?;
                let (args, kwargs) = self.eval_args(args)?;
                self.call_method(&object, method, args, kwargs)
            }
            Expr::Attribute { object, name } => {
                let object = self.eval(object)?;
                self.get_attribute(&object, name)
            }
            Expr::Subscript { object, index } => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                self.get_item(&object, &index)
            }
            Expr::Slice {
                object,
                start,
                stop,
                step,
            } => {
                let object = self.eval(object)?;
                let start = self.eval_optional(start.as_deref())?;
                let stop = self.eval_optional(stop.as_deref())?;
                let step = self.eval_optional(step.as_deref())?;
                self.slice(&object, start, stop, step)
            }
            Expr::ListComp { element, generators } => {
                let mut items = Vec::new();
                self.comprehension(generators, &mut |eval: &mut Self| -> RunResult<()> {
                    items.push(eval.eval(element)?);
                    Ok(())
                })?;
                Ok(self.rt.heap.new_list(items))
            }
            Expr::DictComp { key, value, generators } => {
                let mut entries = IndexMap::new();
                self.comprehension(generators, &mut |eval: &mut Self| -> RunResult<()> {
                    let key = eval.eval(key)?.to_key(&eval.rt.heap)?;
                    entries.insert(key, eval.eval(value)?);
                    Ok(())
                })?;
                Ok(self.rt.heap.new_dict(entries))
            }
            Expr::Lambda(def) => self.make_function(def),
        }
    }

    /// Runs `emit` once per combination of the comprehension clauses, outermost first.
    fn comprehension(
        &mut self,
        generators: &[Comprehension],
        emit: &mut dyn FnMut(&mut Self) -> RunResult<()>,
    ) -> RunResult<()> {
        let Some((clause, rest)) = generators.split_first() else {
            return emit(self);
        };
        let iterable = self.eval(&clause.iter)?;
        let mut state = self.iterate(&iterable)?;
        'items: while let Some(item) = self.next_item(&mut state) {
            self.tracker.check_time()?;
            self.assign(&clause.target, item)?;
            for condition in &clause.conditions {
                if !self.eval(condition)?.truthy(&self.rt.heap) {
                    continue 'items;
                }
            }
            self.comprehension(rest, emit)?;
        }
        Ok(())
    }

    fn fstring(&mut self, parts: &[FStringPart]) -> RunResult<String> {
        let mut out = String::new();
        for part in parts {
            match part {
                FStringPart::Literal(text) => out.push_str(text),
                FStringPart::Field { expr, conversion, spec } => {
                    let value = self.eval(expr)?;
                    let value = match conversion {
                        Conversion::None => value,
                        Conversion::Str => Value::Str(value.py_str(&self.rt.heap)),
                        Conversion::Repr => Value::Str(value.py_repr(&self.rt.heap)),
                    };
                    let spec = self.fstring(spec)?;
                    out.push_str(&self.format_value(&value, Some(&spec))?);
                }
            }
        }
        Ok(out)
    }

    fn eval_all(&mut self, exprs: &[Expr]) -> RunResult<Vec<Value>> {
        exprs.iter().map(|expr| self.eval(expr)).collect()
    }

    fn eval_optional(&mut self, expr: Option<&Expr>) -> RunResult<Option<Value>> {
        expr.map(|expr| self.eval(expr)).transpose()
    }

    fn eval_args(&mut self, args: &[Arg]) -> RunResult<(Vec<Value>, Vec<(String, Value)>)> {
        let mut positional = Vec::with_capacity(args.len());
        let mut keywords = Vec::new();
        for arg in args {
            let value = self.eval(&arg.value)?;
            match &arg.keyword {
                Some(name) => keywords.push((name.clone(), value)),
                None => positional.push(value),
            }
        }
        Ok((positional, keywords))
    }

    // =========================================================================
    // Calls
    // =========================================================================

    pub fn call_value(&mut self, func: &Value, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> RunResult<Value> {
        match func {
            Value::Builtin(builtin) => self.call_builtin(*builtin, args, kwargs),
            Value::ModuleFunction(function) => self.call_module_function(*function, args, kwargs),
            Value::ExcClass(exc_type) => {
                if !kwargs.is_empty() {
                    return raise(ExcType::TypeError, format!("{exc_type}() takes no keyword arguments"));
                }
                let message = match args.as_slice() {
                    [] => String::new(),
                    [single] => single.py_str(&self.rt.heap),
                    _ => {
                        let tuple = self.rt.heap.new_tuple(args);
                        tuple.py_repr(&self.rt.heap)
                    }
                };
                Ok(Value::Exception(*exc_type, message))
            }
            Value::Ref(id) => match self.rt.heap.get(*id) {
                HeapData::Function(function) => {
                    let function = Arc::clone(function);
                    self.call_function(function, args, kwargs)
                }
                _ => self.not_callable(func),
            },
            _ => self.not_callable(func),
        }
    }

    fn not_callable<T>(&self, func: &Value) -> RunResult<T> {
        raise(
            ExcType::TypeError,
            format!("'{}' object is not callable", func.type_name(&self.rt.heap)),
        )
    }

    fn call_function(
        &mut self,
        function: Arc<UserFunction>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> RunResult<Value> {
        self.tracker.check_recursion_depth(self.frames.len())?;
        let locals = bind_arguments(&function, args, kwargs)?;
        self.frames.push(Frame {
            function: Arc::clone(&function),
            locals,
            global_names: AHashSet::new(),
        });
        let saved_line = self.line;
        let saved_handling = self.handling.len();
        let result = self.exec_block(&function.def.body);
        self.frames.pop();
        self.handling.truncate(saved_handling);
        self.line = saved_line;
        match result {
            Ok(Flow::Return(value)) => Ok(value),
            Ok(_) => Ok(Value::None),
            Err(Unwind::Error(mut error)) => {
                error.leave_frame();
                Err(Unwind::Error(error))
            }
            Err(signal) => Err(signal),
        }
    }

    // =========================================================================
    // Operators
    // =========================================================================

    pub fn binary_op(&mut self, op: BinOp, left: Value, right: Value) -> RunResult<Value> {
        if let (Some(a), Some(b)) = (left.as_number(), right.as_number()) {
            return numeric_op(op, &a, &b);
        }
        let heap = &self.rt.heap;
        match (op, &left, &right) {
            (BinOp::Add, Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
            (BinOp::Add, Value::Str(_), _) => raise(
                ExcType::TypeError,
                format!(
                    "can only concatenate str (not \"{}\") to str",
                    right.type_name(heap)
                ),
            ),
            (BinOp::Mul, Value::Str(s), other) | (BinOp::Mul, other, Value::Str(s)) if other.as_int().is_some() => {
                let count = usize::try_from(other.as_int().unwrap_or(0)).unwrap_or(0);
                Ok(Value::Str(s.repeat(count)))
            }
            (BinOp::Mod, Value::Str(format), _) => {
                let format = format.clone();
                let text = self.percent_format(&format, &right)?;
                Ok(Value::Str(text))
            }
            (BinOp::Add, Value::Ref(a), Value::Ref(b)) => match (heap.get(*a), heap.get(*b)) {
                (HeapData::List(x), HeapData::List(y)) => {
                    let items = x.iter().chain(y).cloned().collect();
                    Ok(self.rt.heap.new_list(items))
                }
                (HeapData::Tuple(x), HeapData::Tuple(y)) => {
                    let items = x.iter().chain(y).cloned().collect();
                    Ok(self.rt.heap.new_tuple(items))
                }
                _ => self.unsupported(op, &left, &right),
            },
            (BinOp::Mul, Value::Ref(id), other) | (BinOp::Mul, other, Value::Ref(id)) if other.as_int().is_some() => {
                let count = usize::try_from(other.as_int().unwrap_or(0)).unwrap_or(0);
                match heap.get(*id) {
                    HeapData::List(items) => {
                        let items = repeat_items(items, count);
                        Ok(self.rt.heap.new_list(items))
                    }
                    HeapData::Tuple(items) => {
                        let items = repeat_items(items, count);
                        Ok(self.rt.heap.new_tuple(items))
                    }
                    _ => self.unsupported(op, &left, &right),
                }
            }
            _ => self.unsupported(op, &left, &right),
        }
    }

    fn unsupported<T>(&self, op: BinOp, left: &Value, right: &Value) -> RunResult<T> {
        raise(
            ExcType::TypeError,
            format!(
                "unsupported operand type(s) for {}: '{}' and '{}'",
                op.symbol(),
                left.type_name(&self.rt.heap),
                right.type_name(&self.rt.heap)
            ),
        )
    }

    fn unary_op(&self, op: UnaryOp, operand: &Value) -> RunResult<Value> {
        match (op, operand.as_number()) {
            (UnaryOp::Not, _) => Ok(Value::Bool(!operand.truthy(&self.rt.heap))),
            (UnaryOp::Neg, Some(Number::Int(i))) => {
                Ok(i.checked_neg().map_or_else(|| Value::from_bigint(-BigInt::from(i)), Value::Int))
            }
            (UnaryOp::Neg, Some(Number::Big(i))) => Ok(Value::from_bigint(-i)),
            (UnaryOp::Neg, Some(Number::Float(f))) => Ok(Value::Float(-f)),
            (UnaryOp::Pos, Some(Number::Int(i))) => Ok(Value::Int(i)),
            (UnaryOp::Pos, Some(Number::Big(i))) => Ok(Value::BigInt(i)),
            (UnaryOp::Pos, Some(Number::Float(f))) => Ok(Value::Float(f)),
            (_, None) => raise(
                ExcType::TypeError,
                format!(
                    "bad operand type for unary {}: '{}'",
                    if op == UnaryOp::Neg { '-' } else { '+' },
                    operand.type_name(&self.rt.heap)
                ),
            ),
        }
    }

    fn compare(&mut self, op: CmpOp, left: &Value, right: &Value) -> RunResult<bool> {
        let heap = &self.rt.heap;
        let ordering = |symbol: &str| {
            py_cmp(left, right, heap)?.ok_or_else(|| {
                Unwind::from(ScriptError::new(
                    ExcType::TypeError,
                    format!(
                        "'{symbol}' not supported between instances of '{}' and '{}'",
                        left.type_name(heap),
                        right.type_name(heap)
                    ),
                ))
            })
        };
        Ok(match op {
            CmpOp::Eq => py_eq(left, right, heap)?,
            CmpOp::NotEq => !py_eq(left, right, heap)?,
            CmpOp::Lt => ordering("<")?.is_lt(),
            CmpOp::Le => ordering("<=")?.is_le(),
            CmpOp::Gt => ordering(">")?.is_gt(),
            CmpOp::Ge => ordering(">=")?.is_ge(),
            CmpOp::Is => py_is(left, right),
            CmpOp::IsNot => !py_is(left, right),
            CmpOp::In => self.contains(right, left)?,
            CmpOp::NotIn => !self.contains(right, left)?,
        })
    }

    pub fn contains(&self, container: &Value, item: &Value) -> RunResult<bool> {
        let heap = &self.rt.heap;
        match container {
            Value::Str(haystack) => match item {
                Value::Str(needle) => Ok(haystack.contains(needle.as_str())),
                _ => raise(
                    ExcType::TypeError,
                    format!(
                        "'in <string>' requires string as left operand, not {}",
                        item.type_name(heap)
                    ),
                ),
            },
            Value::Range { start, stop, step } => Ok(item.as_int().is_some_and(|i| {
                let in_bounds = if *step > 0 {
                    i >= *start && i < *stop
                } else {
                    i <= *start && i > *stop
                };
                in_bounds && (i128::from(i) - i128::from(*start)) % i128::from(*step) == 0
            })),
            Value::Ref(id) => match heap.get(*id) {
                HeapData::List(items) | HeapData::Tuple(items) => {
                    for candidate in items {
                        if py_eq(candidate, item, heap)? {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                }
                HeapData::Dict(entries) => Ok(entries.contains_key(&item.to_key(heap)?)),
                HeapData::Function(_) => self.not_iterable(container),
            },
            _ => self.not_iterable(container),
        }
    }

    fn not_iterable<T>(&self, value: &Value) -> RunResult<T> {
        raise(
            ExcType::TypeError,
            format!("'{}' object is not iterable", value.type_name(&self.rt.heap)),
        )
    }

    // =========================================================================
    // Iteration
    // =========================================================================

    pub fn iterate(&self, value: &Value) -> RunResult<IterState> {
        match value {
            Value::Range { start, stop, step } => Ok(IterState::Range {
                next: *start,
                remaining: range_len(*start, *stop, *step),
                step: *step,
            }),
            Value::Str(s) => Ok(IterState::Items(
                s.chars().map(|c| Value::Str(c.to_string())).collect::<Vec<_>>().into_iter(),
            )),
            Value::Ref(id) => match self.rt.heap.get(*id) {
                HeapData::List(_) | HeapData::Tuple(_) => Ok(IterState::Live { id: *id, index: 0 }),
                HeapData::Dict(entries) => Ok(IterState::Keys(
                    entries.keys().cloned().collect::<Vec<_>>().into_iter(),
                )),
                HeapData::Function(_) => self.not_iterable(value),
            },
            _ => self.not_iterable(value),
        }
    }

    pub fn next_item(&mut self, state: &mut IterState) -> Option<Value> {
        match state {
            IterState::Range { next, remaining, step } => {
                if *remaining == 0 {
                    return None;
                }
                let value = *next;
                *remaining -= 1;
                *next = next.wrapping_add(*step);
                Some(Value::Int(value))
            }
            IterState::Live { id, index } => {
                let item = match self.rt.heap.get(*id) {
                    HeapData::List(items) | HeapData::Tuple(items) => items.get(*index).cloned(),
                    _ => None,
                };
                *index += 1;
                item
            }
            IterState::Items(items) => items.next(),
            IterState::Keys(keys) => keys.next().map(|key| key.to_value(&mut self.rt.heap)),
        }
    }

    /// Materializes any iterable, counting each element against the operation budget.
    pub fn collect(&mut self, value: &Value) -> RunResult<Vec<Value>> {
        if let Value::Ref(id) = value
            && let HeapData::List(items) | HeapData::Tuple(items) = self.rt.heap.get(*id)
        {
            return Ok(items.clone());
        }
        let mut state = self.iterate(value)?;
        let mut items = Vec::new();
        while let Some(item) = self.next_item(&mut state) {
            self.tracker.check_time()?;
            items.push(item);
        }
        Ok(items)
    }

    // =========================================================================
    // Subscripts
    // =========================================================================

    pub fn get_item(&mut self, object: &Value, index: &Value) -> RunResult<Value> {
        let heap = &self.rt.heap;
        match object {
            Value::Str(s) => {
                let Some(i) = index.as_int() else {
                    return self.bad_index("string", index);
                };
                let chars: Vec<char> = s.chars().collect();
                match normalize_index(i, chars.len()) {
                    Some(position) => Ok(Value::Str(chars[position].to_string())),
                    None => raise(ExcType::IndexError, "string index out of range"),
                }
            }
            Value::Range { start, stop, step } => {
                let Some(i) = index.as_int() else {
                    return self.bad_index("range object", index);
                };
                match normalize_index(i, range_len(*start, *stop, *step)) {
                    Some(position) => {
                        let offset = i64::try_from(position).unwrap_or(i64::MAX);
                        Ok(Value::Int(start.wrapping_add(offset.wrapping_mul(*step))))
                    }
                    None => raise(ExcType::IndexError, "range object index out of range"),
                }
            }
            Value::Ref(id) => match heap.get(*id) {
                HeapData::List(items) | HeapData::Tuple(items) => {
                    let kind = if matches!(heap.get(*id), HeapData::List(_)) { "list" } else { "tuple" };
                    let Some(i) = index.as_int() else {
                        return self.bad_index(kind, index);
                    };
                    match normalize_index(i, items.len()) {
                        Some(position) => Ok(items[position].clone()),
                        None => raise(ExcType::IndexError, format!("{kind} index out of range")),
                    }
                }
                HeapData::Dict(entries) => {
                    let key = index.to_key(heap)?;
                    match entries.get(&key) {
                        Some(value) => Ok(value.clone()),
                        None => raise(ExcType::KeyError, index.py_repr(heap)),
                    }
                }
                HeapData::Function(_) => self.not_subscriptable(object),
            },
            _ => self.not_subscriptable(object),
        }
    }

    fn bad_index<T>(&self, kind: &str, index: &Value) -> RunResult<T> {
        if matches!(index, Value::BigInt(_)) {
            return raise(ExcType::IndexError, "cannot fit 'int' into an index-sized integer");
        }
        raise(
            ExcType::TypeError,
            format!(
                "{kind} indices must be integers or slices, not {}",
                index.type_name(&self.rt.heap)
            ),
        )
    }

    fn not_subscriptable<T>(&self, object: &Value) -> RunResult<T> {
        raise(
            ExcType::TypeError,
            format!("'{}' object is not subscriptable", object.type_name(&self.rt.heap)),
        )
    }

    fn set_item(&mut self, object: &Value, index: &Value, value: Value) -> RunResult<()> {
        let Value::Ref(id) = object else {
            return raise(
                ExcType::TypeError,
                format!(
                    "'{}' object does not support item assignment",
                    object.type_name(&self.rt.heap)
                ),
            );
        };
        let key = match self.rt.heap.get(*id) {
            HeapData::Dict(_) => Some(index.to_key(&self.rt.heap)?),
            HeapData::List(_) => None,
            _ => {
                return raise(
                    ExcType::TypeError,
                    format!(
                        "'{}' object does not support item assignment",
                        object.type_name(&self.rt.heap)
                    ),
                );
            }
        };
        let index_type = index.type_name(&self.rt.heap);
        match (self.rt.heap.get_mut(*id), key) {
            (HeapData::Dict(entries), Some(key)) => {
                entries.insert(key, value);
                Ok(())
            }
            (HeapData::List(items), _) => {
                let Some(i) = index.as_int() else {
                    return raise(
                        ExcType::TypeError,
                        format!("list indices must be integers or slices, not {index_type}"),
                    );
                };
                match normalize_index(i, items.len()) {
                    Some(position) => {
                        items[position] = value;
                        Ok(())
                    }
                    None => raise(ExcType::IndexError, "list assignment index out of range"),
                }
            }
            _ => raise(ExcType::TypeError, "object does not support item assignment"),
        }
    }

    fn slice(&mut self, object: &Value, start: Option<Value>, stop: Option<Value>, step: Option<Value>) -> RunResult<Value> {
        let bound = |value: Option<Value>| -> RunResult<Option<i64>> {
            match value {
                None | Some(Value::None) => Ok(None),
                Some(other) => match other.as_int() {
                    Some(i) => Ok(Some(i)),
                    None => raise(
                        ExcType::TypeError,
                        "slice indices must be integers or None or have an __index__ method",
                    ),
                },
            }
        };
        let start = bound(start)?;
        let stop = bound(stop)?;
        let step = bound(step)?.unwrap_or(1);
        if step == 0 {
            return raise(ExcType::ValueError, "slice step cannot be zero");
        }
        match object {
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let indices = slice_indices(chars.len(), start, stop, step);
                Ok(Value::Str(indices.into_iter().map(|i| chars[i]).collect()))
            }
            Value::Ref(id) => match self.rt.heap.get(*id) {
                HeapData::List(items) => {
                    let picked = slice_indices(items.len(), start, stop, step)
                        .into_iter()
                        .map(|i| items[i].clone())
                        .collect();
                    Ok(self.rt.heap.new_list(picked))
                }
                HeapData::Tuple(items) => {
                    let picked = slice_indices(items.len(), start, stop, step)
                        .into_iter()
                        .map(|i| items[i].clone())
                        .collect();
                    Ok(self.rt.heap.new_tuple(picked))
                }
                _ => self.not_subscriptable(object),
            },
            Value::Range {
                start: first,
                stop: last,
                step: stride,
            } => {
                let len = range_len(*first, *last, *stride);
                let picked = slice_indices(len, start, stop, step)
                    .into_iter()
                    .map(|i| Value::Int(first + i64::try_from(i).unwrap_or(0) * stride))
                    .collect();
                Ok(self.rt.heap.new_list(picked))
            }
            _ => self.not_subscriptable(object),
        }
    }

    fn get_attribute(&self, object: &Value, name: &str) -> RunResult<Value> {
        if let Value::Module(module) = object
            && let Some(value) = module.attribute(name)
        {
            return Ok(value);
        }
        let owner = match object {
            Value::Module(module) => {
                let module: &'static str = module.into();
                return raise(
                    ExcType::AttributeError,
                    format!("module '{module}' has no attribute '{name}'"),
                );
            }
            other => other.type_name(&self.rt.heap),
        };
        raise(ExcType::AttributeError, format!("'{owner}' object has no attribute '{name}'"))
    }

    // =========================================================================
    // Formatting
    // =========================================================================

    pub fn format_value(&self, value: &Value, spec: Option<&str>) -> RunResult<String> {
        let heap = &self.rt.heap;
        let spec = match spec {
            None | Some("") => return Ok(value.py_str(heap)),
            Some(spec) => spec,
        };
        let Some(parsed) = FormatSpec::parse(spec) else {
            return raise(ExcType::ValueError, format!("Invalid format specifier '{spec}'"));
        };
        let formatted = match value {
            Value::Bool(_) | Value::Int(_) | Value::BigInt(_) if parsed.kind == Some('s') => None,
            Value::Int(i) => parsed.format_int(&BigInt::from(*i)),
            Value::BigInt(i) => parsed.format_int(i),
            Value::Bool(b) if parsed.kind.is_some() || parsed.precision.is_some() => {
                parsed.format_int(&BigInt::from(u8::from(*b)))
            }
            Value::Float(f) => parsed.format_float(*f),
            other => parsed.format_str(&other.py_str(heap)),
        };
        formatted.ok_or_else(|| {
            ScriptError::new(
                ExcType::ValueError,
                format!(
                    "Unknown format code '{}' for object of type '{}'",
                    parsed.kind.unwrap_or('?'),
                    value.type_name(heap)
                ),
            )
            .into()
        })
    }

    /// `format % args` with the common `%s %r %d %i %f %e %g %x %%` conversions.
    fn percent_format(&self, format: &str, args: &Value) -> RunResult<String> {
        let heap = &self.rt.heap;
        let values: Vec<Value> = match args {
            Value::Ref(id) => match heap.get(*id) {
                HeapData::Tuple(items) => items.clone(),
                _ => vec![args.clone()],
            },
            other => vec![other.clone()],
        };
        let mut values = values.into_iter();
        let mut out = String::new();
        let mut chars = format.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            let mut spec = String::new();
            let mut left_align = false;
            while let Some(&flag) = chars.peek() {
                match flag {
                    '-' => left_align = true,
                    '0' | '+' | ' ' => spec.push(flag),
                    _ => break,
                }
                chars.next();
            }
            while let Some(&d) = chars.peek().filter(|d| d.is_ascii_digit() || **d == '.') {
                spec.push(d);
                chars.next();
            }
            let Some(conversion) = chars.next() else {
                return raise(ExcType::ValueError, "incomplete format");
            };
            if conversion == '%' {
                out.push('%');
                continue;
            }
            let Some(value) = values.next() else {
                return raise(ExcType::TypeError, "not enough arguments for format string");
            };
            let prefix = if left_align { "<" } else { "" };
            let text = match conversion {
                's' => self.format_value(&Value::Str(value.py_str(heap)), Some(&format!("{prefix}{spec}")))?,
                'r' => self.format_value(&Value::Str(value.py_repr(heap)), Some(&format!("{prefix}{spec}")))?,
                'd' | 'i' => {
                    let int = match value {
                        #[expect(clippy::cast_possible_truncation, reason = "%d truncates floats like Python")]
                        Value::Float(f) => Value::Int(f.trunc() as i64),
                        other => other,
                    };
                    if !matches!(int.as_number(), Some(Number::Int(_) | Number::Big(_))) {
                        return raise(
                            ExcType::TypeError,
                            format!("%d format: a real number is required, not {}", int.type_name(heap)),
                        );
                    }
                    self.format_value(&int, Some(&format!("{prefix}{spec}d")))?
                }
                'f' | 'F' | 'e' | 'E' | 'g' | 'G' | 'x' | 'X' | 'o' => {
                    if value.as_number().is_none() {
                        return raise(
                            ExcType::TypeError,
                            format!("must be real number, not {}", value.type_name(heap)),
                        );
                    }
                    self.format_value(&value, Some(&format!("{prefix}{spec}{conversion}")))?
                }
                other => {
                    return raise(
                        ExcType::ValueError,
                        format!("unsupported format character '{other}'"),
                    );
                }
            };
            out.push_str(&text);
        }
        if values.next().is_some() {
            return raise(ExcType::TypeError, "not all arguments converted during string formatting");
        }
        Ok(out)
    }
}

fn repeat_items(items: &[Value], count: usize) -> Vec<Value> {
    let mut out = Vec::with_capacity(items.len() * count);
    for _ in 0..count {
        out.extend(items.iter().cloned());
    }
    out
}

/// Resolves a possibly negative index against `len`.
pub(crate) fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len_i = i64::try_from(len).ok()?;
    let resolved = if index < 0 { index + len_i } else { index };
    if (0..len_i).contains(&resolved) {
        usize::try_from(resolved).ok()
    } else {
        None
    }
}

/// Element positions selected by `[start:stop:step]` on a sequence of `len` items.
pub(crate) fn slice_indices(len: usize, start: Option<i64>, stop: Option<i64>, step: i64) -> Vec<usize> {
    let len = i64::try_from(len).unwrap_or(i64::MAX);
    let clamp = |value: i64, low: i64, high: i64| {
        let resolved = if value < 0 { value + len } else { value };
        resolved.clamp(low, high)
    };
    let mut indices = Vec::new();
    if step > 0 {
        let mut i = start.map_or(0, |s| clamp(s, 0, len));
        let end = stop.map_or(len, |s| clamp(s, 0, len));
        while i < end {
            indices.push(usize::try_from(i).unwrap_or(0));
            i += step;
        }
    } else {
        let mut i = start.map_or(len - 1, |s| clamp(s, -1, len - 1));
        let end = stop.map_or(-1, |s| clamp(s, -1, len - 1));
        while i > end {
            indices.push(usize::try_from(i).unwrap_or(0));
            i += step;
        }
    }
    indices
}

/// Largest bigint result `**` will build, in bits.
const MAX_POW_BITS: u64 = 1 << 22;

fn numeric_op(op: BinOp, left: &Number, right: &Number) -> RunResult<Value> {
    if let (Number::Int(a), Number::Int(b)) = (left, right)
        && let Some(value) = small_int_op(op, *a, *b)?
    {
        return Ok(value);
    }
    match (left.to_bigint(), right.to_bigint()) {
        (Some(a), Some(b)) => big_int_op(op, &a, &b),
        _ => float_op(op, left.as_f64(), right.as_f64()),
    }
}

/// `i64` arithmetic; `Ok(None)` when the result does not fit and needs a bigint.
fn small_int_op(op: BinOp, a: i64, b: i64) -> RunResult<Option<Value>> {
    Ok(match op {
        BinOp::Add => a.checked_add(b).map(Value::Int),
        BinOp::Sub => a.checked_sub(b).map(Value::Int),
        BinOp::Mul => a.checked_mul(b).map(Value::Int),
        BinOp::Div => {
            if b == 0 {
                return raise(ExcType::ZeroDivisionError, "division by zero");
            }
            Some(Value::Float(a as f64 / b as f64))
        }
        BinOp::FloorDiv | BinOp::Mod => {
            if b == 0 {
                return raise(ExcType::ZeroDivisionError, "integer division or modulo by zero");
            }
            if a == i64::MIN && b == -1 {
                None
            } else if op == BinOp::FloorDiv {
                Some(Value::Int(Integer::div_floor(&a, &b)))
            } else {
                Some(Value::Int(Integer::mod_floor(&a, &b)))
            }
        }
        BinOp::Pow => {
            if b < 0 {
                return float_op(op, a as f64, b as f64).map(Some);
            }
            u32::try_from(b).ok().and_then(|exp| a.checked_pow(exp)).map(Value::Int)
        }
    })
}

fn big_int_op(op: BinOp, a: &BigInt, b: &BigInt) -> RunResult<Value> {
    match op {
        BinOp::Add => Ok(Value::from_bigint(a + b)),
        BinOp::Sub => Ok(Value::from_bigint(a - b)),
        BinOp::Mul => Ok(Value::from_bigint(a * b)),
        BinOp::Div => {
            if b.is_zero() {
                return raise(ExcType::ZeroDivisionError, "division by zero");
            }
            let quotient = big_to_f64(a) / big_to_f64(b);
            if quotient.is_finite() {
                Ok(Value::Float(quotient))
            } else {
                raise(ExcType::OverflowError, "integer division result too large for a float")
            }
        }
        BinOp::FloorDiv | BinOp::Mod => {
            if b.is_zero() {
                return raise(ExcType::ZeroDivisionError, "integer division or modulo by zero");
            }
            Ok(Value::from_bigint(if op == BinOp::FloorDiv {
                a.div_floor(b)
            } else {
                a.mod_floor(b)
            }))
        }
        BinOp::Pow => {
            if b.is_negative() {
                return float_op(op, big_to_f64(a), big_to_f64(b));
            }
            // 0, 1 and -1 stay small for any exponent.
            if a.magnitude().bits() <= 1 {
                let negative = a.is_negative() && b.is_odd();
                let one = if negative { -1 } else { 1 };
                return Ok(Value::Int(if a.is_zero() && !b.is_zero() { 0 } else { one }));
            }
            let exponent = b.to_u32().filter(|exp| a.bits().saturating_mul(u64::from(*exp)) <= MAX_POW_BITS);
            match exponent {
                Some(exp) => Ok(Value::from_bigint(a.pow(exp))),
                None => raise(ExcType::OverflowError, "integer result too large"),
            }
        }
    }
}

fn big_to_f64(value: &BigInt) -> f64 {
    value.to_f64().unwrap_or(f64::NAN)
}

fn float_op(op: BinOp, a: f64, b: f64) -> RunResult<Value> {
    match op {
        BinOp::Add => Ok(Value::Float(a + b)),
        BinOp::Sub => Ok(Value::Float(a - b)),
        BinOp::Mul => Ok(Value::Float(a * b)),
        BinOp::Div => {
            if b == 0.0 {
                return raise(ExcType::ZeroDivisionError, "float division by zero");
            }
            Ok(Value::Float(a / b))
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return raise(ExcType::ZeroDivisionError, "float floor division by zero");
            }
            Ok(Value::Float((a / b).floor()))
        }
        BinOp::Mod => {
            if b == 0.0 {
                return raise(ExcType::ZeroDivisionError, "float modulo");
            }
            let r = a % b;
            Ok(Value::Float(if r != 0.0 && ((r < 0.0) != (b < 0.0)) { r + b } else { r }))
        }
        BinOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return raise(ExcType::ZeroDivisionError, "0.0 cannot be raised to a negative power");
            }
            if a < 0.0 && b.fract() != 0.0 {
                return raise(ExcType::ValueError, "math domain error");
            }
            let result = a.powf(b);
            if result.is_infinite() && a.is_finite() && b.is_finite() {
                return raise(ExcType::OverflowError, "(34, 'Numerical result out of range')");
            }
            Ok(Value::Float(result))
        }
    }
}

/// Binds call arguments to parameters, producing the new frame's locals.
fn bind_arguments(
    function: &UserFunction,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> RunResult<AHashMap<String, Value>> {
    let def = &function.def;
    let name = &def.name;
    let params = &def.params;
    if args.len() > params.len() {
        return raise(
            ExcType::TypeError,
            format!(
                "{name}() takes {} positional argument{} but {} {} given",
                params.len(),
                if params.len() == 1 { "" } else { "s" },
                args.len(),
                if args.len() == 1 { "was" } else { "were" }
            ),
        );
    }
    let mut slots: Vec<Option<Value>> = args.into_iter().map(Some).collect();
    slots.resize(params.len(), None);
    for (keyword, value) in kwargs {
        let Some(position) = params.iter().position(|p| p.name == keyword) else {
            return raise(
                ExcType::TypeError,
                format!("{name}() got an unexpected keyword argument '{keyword}'"),
            );
        };
        if slots[position].is_some() {
            return raise(
                ExcType::TypeError,
                format!("{name}() got multiple values for argument '{keyword}'"),
            );
        }
        slots[position] = Some(value);
    }
    let first_default = params.len() - function.defaults.len();
    let mut missing = Vec::new();
    let mut locals = AHashMap::with_capacity(params.len());
    for (i, (param, slot)) in params.iter().zip(slots).enumerate() {
        let value = match slot {
            Some(value) => value,
            None if i >= first_default => function.defaults[i - first_default].clone(),
            None => {
                missing.push(format!("'{}'", param.name));
                continue;
            }
        };
        locals.insert(param.name.clone(), value);
    }
    if !missing.is_empty() {
        let list = match missing.as_slice() {
            [one] => one.clone(),
            [init @ .., last] => format!("{} and {last}", init.join(", ")),
            [] => String::new(),
        };
        return raise(
            ExcType::TypeError,
            format!(
                "{name}() missing {} required positional argument{}: {list}",
                missing.len(),
                if missing.len() == 1 { "" } else { "s" }
            ),
        );
    }
    Ok(locals)
}

/// Raised by `input()` when the host has no value left.
pub(crate) fn input_exhausted(prompt: String, line: usize) -> Unwind {
    Unwind::Signal(Signal::InputExhausted {
        prompt,
        line: Some(line),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn python_index_normalization() {
        assert_eq!(normalize_index(-1, 3), Some(2));
        assert_eq!(normalize_index(3, 3), None);
        assert_eq!(normalize_index(-4, 3), None);
    }

    #[test]
    fn slice_positions_follow_python() {
        assert_eq!(slice_indices(5, None, None, 1), vec![0, 1, 2, 3, 4]);
        assert_eq!(slice_indices(5, Some(1), Some(-1), 1), vec![1, 2, 3]);
        assert_eq!(slice_indices(5, None, None, -1), vec![4, 3, 2, 1, 0]);
        assert_eq!(slice_indices(5, None, None, 2), vec![0, 2, 4]);
        assert_eq!(slice_indices(5, Some(10), None, 1), Vec::<usize>::new());
        assert_eq!(slice_indices(3, Some(-10), Some(2), 1), vec![0, 1]);
    }

    #[test]
    fn floor_division_and_modulo_round_toward_negative_infinity() {
        let div = numeric_op(BinOp::FloorDiv, &Number::Int(-7), &Number::Int(2)).unwrap();
        assert!(matches!(div, Value::Int(-4)));
        let rem = numeric_op(BinOp::Mod, &Number::Int(-7), &Number::Int(2)).unwrap();
        assert!(matches!(rem, Value::Int(1)));
        let rem = numeric_op(BinOp::Mod, &Number::Float(7.5), &Number::Float(-2.0)).unwrap();
        assert!(matches!(rem, Value::Float(f) if (f + 0.5).abs() < 1e-12));
        let big = Number::Big(-(BigInt::from(1) << 70));
        let div = numeric_op(BinOp::FloorDiv, &big, &Number::Int(3)).unwrap();
        assert!(matches!(div, Value::BigInt(q) if q.to_string() == "-393530540239137101142"));
    }

    #[test]
    fn integer_overflow_promotes_to_bigint() {
        let result = numeric_op(BinOp::Mul, &Number::Int(i64::MAX), &Number::Int(2)).unwrap();
        assert!(matches!(result, Value::BigInt(i) if i.to_string() == "18446744073709551614"));
        let result = numeric_op(BinOp::Pow, &Number::Int(2), &Number::Int(64)).unwrap();
        assert!(matches!(result, Value::BigInt(i) if i.to_string() == "18446744073709551616"));
        let back = numeric_op(BinOp::Sub, &Number::Big(BigInt::from(1) << 64), &Number::Big(BigInt::from(1) << 64));
        assert!(matches!(back, Ok(Value::Int(0))));
        let result = numeric_op(BinOp::FloorDiv, &Number::Int(i64::MIN), &Number::Int(-1)).unwrap();
        assert!(matches!(result, Value::BigInt(_)));
        let result = numeric_op(BinOp::Div, &Number::Int(1), &Number::Int(0));
        assert!(matches!(result, Err(Unwind::Error(e)) if e.exc_type == ExcType::ZeroDivisionError));
        let result = numeric_op(BinOp::Pow, &Number::Int(10), &Number::Int(10_000_000));
        assert!(matches!(result, Err(Unwind::Error(e)) if e.exc_type == ExcType::OverflowError));
        let result = numeric_op(BinOp::Pow, &Number::Int(-1), &Number::Big(BigInt::from(1) << 80)).unwrap();
        assert!(matches!(result, Value::Int(1)));
    }
}
