//! Tree-walking evaluator.
//!
//! An [`Interpreter`] owns one program run: its module scope, the
//! capability table it was built with and the output buffer that `print`
//! writes to. Nothing is shared between interpreters, so two runs can
//! never see each other's output or bindings.

use super::ast::*;
use super::error::{ErrorKind, RunResult, RuntimeError};
use super::format::{format_value, percent_format};
use super::methods;
use super::value::*;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::Instant;

/// Largest list/tuple/set/dict the sandbox will build.
pub const MAX_ITEMS: usize = 2_000_000;
pub const MAX_STRING_BYTES: usize = 16 * 1024 * 1024;
const DEADLINE_CHECK_INTERVAL: u32 = 64;

#[derive(Debug, Clone)]
pub struct ExecutionLimits {
    pub deadline: Option<Instant>,
    pub max_output_bytes: usize,
    pub max_call_depth: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            deadline: None,
            max_output_bytes: 1024 * 1024,
            max_call_depth: 200,
        }
    }
}

/// Variable bindings for the module, a function call or a comprehension.
#[derive(Default)]
pub struct Scope {
    vars: HashMap<String, Value>,
    parent: Option<Rc<RefCell<Scope>>>,
    function: Option<Rc<FunctionDef>>,
}

impl Scope {
    fn child(parent: Rc<RefCell<Scope>>) -> Self {
        Self {
            vars: HashMap::new(),
            parent: Some(parent),
            function: None,
        }
    }
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// Call-local standard output buffer with a hard size cap.
#[derive(Debug, Default)]
pub struct OutputSink {
    buffer: String,
    limit: usize,
}

impl OutputSink {
    pub fn new(limit: usize) -> Self {
        Self {
            buffer: String::new(),
            limit,
        }
    }

    pub fn write(&mut self, text: &str) -> RunResult<()> {
        if self.buffer.len() + text.len() > self.limit {
            return Err(RuntimeError::new(
                ErrorKind::OutputLimitError,
                format!("output exceeded {} bytes", self.limit),
            ));
        }
        self.buffer.push_str(text);
        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.buffer
    }
}

/// Subscript after evaluation: a single key or resolved slice bounds.
pub enum Index {
    Item(Value),
    Slice(Option<i64>, Option<i64>, Option<i64>),
}

pub struct Interpreter {
    globals: Rc<RefCell<Scope>>,
    scope: Rc<RefCell<Scope>>,
    capabilities: HashMap<&'static str, Builtin>,
    output: OutputSink,
    limits: ExecutionLimits,
    depth: usize,
    ticks: u32,
    /// Scopes closed over by functions or generators; cleared on drop to
    /// break the scope -> function -> scope reference cycles.
    captured: Vec<Weak<RefCell<Scope>>>,
    compact_at: usize,
}

impl Interpreter {
    /// Build an interpreter whose global namespace can reach exactly the
    /// given capabilities and nothing else.
    pub fn new(capabilities: &[Builtin], limits: ExecutionLimits) -> Self {
        let globals = Rc::new(RefCell::new(Scope::default()));
        Self {
            scope: globals.clone(),
            globals,
            capabilities: capabilities.iter().map(|b| (b.name, *b)).collect(),
            output: OutputSink::new(limits.max_output_bytes),
            limits,
            depth: 0,
            ticks: 0,
            captured: Vec::new(),
            compact_at: 4096,
        }
    }

    pub fn run(&mut self, module: &Module) -> RunResult<()> {
        self.exec_block(&module.body)?;
        Ok(())
    }

    pub fn output(&self) -> &str {
        self.output.as_str()
    }

    pub fn write(&mut self, text: &str) -> RunResult<()> {
        self.output.write(text)
    }

    /// Cooperative deadline check, called from every loop iteration,
    /// call and iterator step.
    pub fn tick(&mut self) -> RunResult<()> {
        self.ticks = self.ticks.wrapping_add(1);
        if self.ticks % DEADLINE_CHECK_INTERVAL == 0 {
            if let Some(deadline) = self.limits.deadline {
                if Instant::now() >= deadline {
                    return Err(RuntimeError::new(
                        ErrorKind::TimeoutError,
                        "code took too long to run (possible infinite loop)",
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn check_items(count: usize) -> RunResult<()> {
        if count > MAX_ITEMS {
            return Err(RuntimeError::memory());
        }
        Ok(())
    }

    pub fn check_string(bytes: usize) -> RunResult<()> {
        if bytes > MAX_STRING_BYTES {
            return Err(RuntimeError::memory());
        }
        Ok(())
    }

    // ---- statements ----

    fn exec_block(&mut self, block: &[Stmt]) -> RunResult<Flow> {
        for stmt in block {
            match self.exec_stmt(stmt).map_err(|e| e.at_line(stmt.line))? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> RunResult<Flow> {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.exec_aug_assign(target, *op, value)?,
            StmtKind::If { branches, orelse } => {
                for (test, body) in branches {
                    if self.eval(test)?.truthy() {
                        return self.exec_block(body);
                    }
                }
                return self.exec_block(orelse);
            }
            StmtKind::While { test, body, orelse } => loop {
                self.tick()?;
                if !self.eval(test)?.truthy() {
                    return self.exec_block(orelse);
                }
                match self.exec_block(body)? {
                    Flow::Break => break,
                    Flow::Return(value) => return Ok(Flow::Return(value)),
                    Flow::Normal | Flow::Continue => {}
                }
            },
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                let iterable = self.eval(iter)?;
                let mut cursor = self.iterate(&iterable)?;
                loop {
                    let Some(item) = self.next(&mut cursor)? else {
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
            StmtKind::Def(def) => {
                let function = self.make_function(def)?;
                self.store_name(&def.name, function);
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Assert { test, message } => {
                if !self.eval(test)?.truthy() {
                    let detail = match message {
                        Some(expr) => self.eval(expr)?.to_str(),
                        None => String::new(),
                    };
                    return Err(RuntimeError::new(ErrorKind::AssertionError, detail));
                }
            }
            StmtKind::Del(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
            }
            StmtKind::Global(_) | StmtKind::Pass => {}
            StmtKind::Import(_) => {
                return Err(RuntimeError::new(ErrorKind::ImportError, "__import__ not found"))
            }
            StmtKind::Raise(expr) => {
                return Err(match expr {
                    Some(expr) => {
                        self.eval(expr)?;
                        RuntimeError::type_error("exceptions must derive from BaseException")
                    }
                    None => RuntimeError::new(ErrorKind::RuntimeError, "No active exception to reraise"),
                })
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
        }
        Ok(Flow::Normal)
    }

    fn exec_aug_assign(&mut self, target: &Target, op: BinOp, value: &Expr) -> RunResult<()> {
        match target {
            Target::Name(name) => {
                let current = self.load_name(name)?;
                let rhs = self.eval(value)?;
                let result = self.inplace_op(op, current, &rhs)?;
                self.store_name(name, result);
            }
            Target::Subscript { object, index } => {
                let object = self.eval(object)?;
                let index = self.eval_index(index)?;
                let current = self.get_item(&object, &index)?;
                let rhs = self.eval(value)?;
                let result = self.inplace_op(op, current, &rhs)?;
                self.set_item(&object, index, result)?;
            }
            Target::Attribute { object, name } => {
                let object = self.eval(object)?;
                return Err(no_attribute(&object, name));
            }
            Target::Sequence(_) => {
                return Err(RuntimeError::type_error(
                    "illegal expression for augmented assignment",
                ))
            }
        }
        Ok(())
    }

    /// `+=` on a list extends it in place; set operators update in place.
    fn inplace_op(&mut self, op: BinOp, current: Value, rhs: &Value) -> RunResult<Value> {
        if let Value::List(list) = &current {
            if op == BinOp::Add {
                let items = self.collect(rhs)?;
                Self::check_items(list.borrow().len() + items.len())?;
                list.borrow_mut().extend(items);
                return Ok(current);
            }
        }
        if let (Value::Set(set), Value::Set(_)) = (&current, rhs) {
            if matches!(op, BinOp::BitOr | BinOp::BitAnd | BinOp::BitXor | BinOp::Sub) {
                let Value::Set(result) = binary_op(op, &current, rhs)? else {
                    return Err(RuntimeError::new(ErrorKind::InternalError, "set operation"));
                };
                let items = result.borrow().items().to_vec();
                let mut set = set.borrow_mut();
                set.clear();
                for item in items {
                    set.add(item)?;
                }
                drop(set);
                return Ok(current);
            }
        }
        binary_op(op, &current, rhs)
    }

    // ---- names ----

    fn load_name(&self, name: &str) -> RunResult<Value> {
        {
            let scope = self.scope.borrow();
            if let Some(def) = &scope.function {
                if def.globals.contains(name) {
                    return self.load_global(name);
                }
                if def.locals.contains(name) {
                    return scope.vars.get(name).cloned().ok_or_else(|| {
                        RuntimeError::new(
                            ErrorKind::UnboundLocalError,
                            format!(
                                "cannot access local variable '{}' where it is not associated with a value",
                                name
                            ),
                        )
                    });
                }
            }
        }

        let mut current = Some(self.scope.clone());
        while let Some(scope_rc) = current {
            let scope = scope_rc.borrow();
            if let Some(value) = scope.vars.get(name) {
                return Ok(value.clone());
            }
            current = scope.parent.clone();
        }
        self.load_capability(name)
    }

    fn load_global(&self, name: &str) -> RunResult<Value> {
        if let Some(value) = self.globals.borrow().vars.get(name) {
            return Ok(value.clone());
        }
        self.load_capability(name)
    }

    fn load_capability(&self, name: &str) -> RunResult<Value> {
        self.capabilities
            .get(name)
            .map(|b| Value::Builtin(*b))
            .ok_or_else(|| RuntimeError::name_error(name))
    }

    fn binding_scope(&self, name: &str) -> Rc<RefCell<Scope>> {
        let scope = self.scope.borrow();
        match &scope.function {
            Some(def) if def.globals.contains(name) => self.globals.clone(),
            _ => self.scope.clone(),
        }
    }

    fn store_name(&mut self, name: &str, value: Value) {
        let scope = self.binding_scope(name);
        let previous = scope.borrow_mut().vars.insert(name.to_string(), value);
        if let Some(previous) = previous {
            release_all(vec![previous]);
        }
    }

    fn remove_name(&mut self, name: &str) -> RunResult<()> {
        let scope = self.binding_scope(name);
        let removed = scope.borrow_mut().vars.remove(name);
        match removed {
            Some(value) => {
                release_all(vec![value]);
                Ok(())
            }
            None => Err(RuntimeError::name_error(name)),
        }
    }

    fn capture(&mut self, scope: &Rc<RefCell<Scope>>) {
        if Rc::ptr_eq(scope, &self.globals) {
            return;
        }
        if let Some(last) = self.captured.last() {
            if std::ptr::eq(last.as_ptr(), Rc::as_ptr(scope)) {
                return;
            }
        }
        if self.captured.len() >= self.compact_at {
            self.captured.retain(|weak| weak.strong_count() > 0);
            self.compact_at = (self.captured.len() * 2).max(4096);
        }
        self.captured.push(Rc::downgrade(scope));
    }

    // ---- assignment ----

    fn assign(&mut self, target: &Target, value: Value) -> RunResult<()> {
        match target {
            Target::Name(name) => {
                self.store_name(name, value);
                Ok(())
            }
            Target::Subscript { object, index } => {
                let object = self.eval(object)?;
                let index = self.eval_index(index)?;
                self.set_item(&object, index, value)
            }
            Target::Attribute { object, name } => {
                let object = self.eval(object)?;
                Err(no_attribute(&object, name))
            }
            Target::Sequence(targets) => {
                if matches!(
                    value,
                    Value::None
                        | Value::Bool(_)
                        | Value::Int(_)
                        | Value::Float(_)
                        | Value::Function(_)
                        | Value::Builtin(_)
                        | Value::Method(_)
                ) {
                    return Err(RuntimeError::type_error(format!(
                        "cannot unpack non-iterable {} object",
                        value.type_name()
                    )));
                }
                let items = self.collect(&value)?;
                if items.len() > targets.len() {
                    return Err(RuntimeError::value_error(format!(
                        "too many values to unpack (expected {})",
                        targets.len()
                    )));
                }
                if items.len() < targets.len() {
                    return Err(RuntimeError::value_error(format!(
                        "not enough values to unpack (expected {}, got {})",
                        targets.len(),
                        items.len()
                    )));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item)?;
                }
                Ok(())
            }
        }
    }

    fn delete(&mut self, target: &Target) -> RunResult<()> {
        match target {
            Target::Name(name) => self.remove_name(name),
            Target::Subscript { object, index } => {
                let object = self.eval(object)?;
                let index = self.eval_index(index)?;
                match (&object, index) {
                    (Value::List(list), Index::Item(i)) => {
                        let mut list = list.borrow_mut();
                        let pos = seq_index(&i, list.len(), "list", "list assignment index out of range")?;
                        list.remove(pos);
                        Ok(())
                    }
                    (Value::List(list), Index::Slice(lower, upper, step)) => {
                        let mut list = list.borrow_mut();
                        let mut positions = slice_positions(list.len(), lower, upper, step)?;
                        positions.sort_unstable();
                        for pos in positions.into_iter().rev() {
                            list.remove(pos);
                        }
                        Ok(())
                    }
                    (Value::Dict(dict), Index::Item(key)) => {
                        let removed = dict.borrow_mut().remove(&key)?;
                        removed.map(|_| ()).ok_or_else(|| key_error(&key))
                    }
                    (other, _) => Err(RuntimeError::type_error(format!(
                        "'{}' object doesn't support item deletion",
                        other.type_name()
                    ))),
                }
            }
            Target::Attribute { object, name } => {
                let object = self.eval(object)?;
                Err(no_attribute(&object, name))
            }
            Target::Sequence(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
                Ok(())
            }
        }
    }

    // ---- expressions ----

    pub fn eval(&mut self, expr: &Expr) -> RunResult<Value> {
        match expr {
            Expr::Literal(literal) => Ok(match literal {
                Literal::None => Value::None,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Int(i) => Value::Int(*i),
                Literal::Float(f) => Value::Float(*f),
                Literal::Str(s) => Value::Str(s.clone()),
            }),
            Expr::Name(name) => self.load_name(name),
            Expr::FString(parts) => Ok(Value::str(self.render_fstring(parts)?)),
            Expr::List(items) => Ok(Value::list(self.eval_all(items)?)),
            Expr::Tuple(items) => Ok(Value::tuple(self.eval_all(items)?)),
            Expr::Set(items) => {
                let values = self.eval_all(items)?;
                Ok(Value::set(Set::from_values(values)?))
            }
            Expr::Dict(pairs) => {
                let mut dict = Dict::new();
                for (key, value) in pairs {
                    let key = self.eval(key)?;
                    let value = self.eval(value)?;
                    dict.insert(key, value)?;
                }
                Ok(Value::dict(dict))
            }
            Expr::BinOp { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                binary_op(*op, &left, &right)
            }
            Expr::Unary { op, operand } => {
                let operand = self.eval(operand)?;
                unary_op(*op, &operand)
            }
            Expr::And(left, right) => {
                let left = self.eval(left)?;
                if !left.truthy() {
                    return Ok(left);
                }
                self.eval(right)
            }
            Expr::Or(left, right) => {
                let left = self.eval(left)?;
                if left.truthy() {
                    return Ok(left);
                }
                self.eval(right)
            }
            Expr::Compare { first, rest } => {
                let mut left = self.eval(first)?;
                for (op, expr) in rest {
                    let right = self.eval(expr)?;
                    if !self.compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::IfElse { test, body, orelse } => {
                if self.eval(test)?.truthy() {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
            Expr::Lambda(def) => self.make_function(def),
            Expr::Call { func, args } => {
                let callee = self.eval(func)?;
                let (positional, keywords) = self.eval_args(args)?;
                self.call(&callee, positional, keywords)
            }
            Expr::Attribute { object, name } => {
                let object = self.eval(object)?;
                get_attribute(object, name)
            }
            Expr::Subscript { object, index } => {
                let object = self.eval(object)?;
                let index = self.eval_index(index)?;
                self.get_item(&object, &index)
            }
            Expr::Slice { .. } => Err(RuntimeError::type_error("slices are only valid inside []")),
            Expr::Comprehension(comp) => self.eval_comprehension(comp),
        }
    }

    fn eval_all(&mut self, exprs: &[Expr]) -> RunResult<Vec<Value>> {
        exprs.iter().map(|e| self.eval(e)).collect()
    }

    fn eval_args(&mut self, args: &[Arg]) -> RunResult<(Vec<Value>, Vec<(String, Value)>)> {
        let mut positional = Vec::with_capacity(args.len());
        let mut keywords = Vec::new();
        for arg in args {
            match arg {
                Arg::Positional(expr) => positional.push(self.eval(expr)?),
                Arg::Keyword(name, expr) => keywords.push((name.clone(), self.eval(expr)?)),
                Arg::Star(expr) => {
                    let value = self.eval(expr)?;
                    positional.extend(self.collect(&value)?);
                }
            }
        }
        Ok((positional, keywords))
    }

    fn eval_index(&mut self, expr: &Expr) -> RunResult<Index> {
        match expr {
            Expr::Slice { lower, upper, step } => Ok(Index::Slice(
                self.slice_bound(lower)?,
                self.slice_bound(upper)?,
                self.slice_bound(step)?,
            )),
            other => Ok(Index::Item(self.eval(other)?)),
        }
    }

    fn slice_bound(&mut self, bound: &Option<Box<Expr>>) -> RunResult<Option<i64>> {
        let Some(expr) = bound else { return Ok(None) };
        match self.eval(expr)? {
            Value::None => Ok(None),
            value => value.as_int().map(Some).ok_or_else(|| {
                RuntimeError::type_error(
                    "slice indices must be integers or None or have an __index__ method",
                )
            }),
        }
    }

    fn render_fstring(&mut self, parts: &[FStringPart]) -> RunResult<String> {
        let mut out = String::new();
        for part in parts {
            match part {
                FStringPart::Literal(text) => out.push_str(text),
                FStringPart::Field {
                    expr,
                    conversion,
                    spec,
                } => {
                    let value = self.eval(expr)?;
                    let value = match conversion {
                        Some('r') | Some('a') => Value::str(value.repr()),
                        Some(_) => Value::str(value.to_str()),
                        None => value,
                    };
                    let spec = self.render_fstring(spec)?;
                    out.push_str(&format_value(&value, &spec)?);
                }
            }
            Self::check_string(out.len())?;
        }
        Ok(out)
    }

    fn compare(&mut self, op: CmpOp, left: &Value, right: &Value) -> RunResult<bool> {
        Ok(match op {
            CmpOp::Eq => left.py_eq(right),
            CmpOp::NotEq => !left.py_eq(right),
            CmpOp::Is => left.is_same(right),
            CmpOp::IsNot => !left.is_same(right),
            CmpOp::In => self.contains(right, left)?,
            CmpOp::NotIn => !self.contains(right, left)?,
            CmpOp::Lt | CmpOp::LtE | CmpOp::Gt | CmpOp::GtE => {
                if let (Value::Set(a), Value::Set(b)) = (left, right) {
                    return Ok(set_relation(op, &a.borrow(), &b.borrow()));
                }
                let symbol = match op {
                    CmpOp::Lt => "<",
                    CmpOp::LtE => "<=",
                    CmpOp::Gt => ">",
                    _ => ">=",
                };
                let ordering = left.py_cmp(right).map_err(|mut err| {
                    err.message = err.message.replacen("'<'", &format!("'{}'", symbol), 1);
                    err
                })?;
                match op {
                    CmpOp::Lt => ordering == Ordering::Less,
                    CmpOp::LtE => ordering != Ordering::Greater,
                    CmpOp::Gt => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                }
            }
        })
    }

    pub fn contains(&mut self, container: &Value, item: &Value) -> RunResult<bool> {
        match container {
            Value::Str(text) => match item {
                Value::Str(needle) => Ok(text.contains(needle.as_ref())),
                other => Err(RuntimeError::type_error(format!(
                    "'in <string>' requires string as left operand, not {}",
                    other.type_name()
                ))),
            },
            Value::List(list) => Ok(list.borrow().iter().any(|v| v.py_eq(item))),
            Value::Tuple(items) => Ok(items.iter().any(|v| v.py_eq(item))),
            Value::Dict(dict) => dict.borrow().contains(item),
            Value::Set(set) => set.borrow().contains(item),
            Value::DictView { dict, kind } => {
                let dict = dict.borrow();
                match kind {
                    ViewKind::Keys => dict.contains(item),
                    ViewKind::Values => Ok(dict.entries().iter().any(|(_, v)| v.py_eq(item))),
                    ViewKind::Items => Ok(match item {
                        Value::Tuple(pair) if pair.len() == 2 => {
                            matches!(dict.get(&pair[0]), Ok(Some(value)) if value.py_eq(&pair[1]))
                        }
                        _ => false,
                    }),
                }
            }
            Value::Range(range) => Ok(match item.as_int() {
                Some(i) => {
                    let offset = i as i128 - range.start as i128;
                    let step = range.step as i128;
                    let within = if step > 0 {
                        i >= range.start && i < range.stop
                    } else {
                        i <= range.start && i > range.stop
                    };
                    within && offset % step == 0
                }
                None => false,
            }),
            Value::Iter(_) => {
                let mut cursor = self.iterate(container)?;
                while let Some(value) = self.next(&mut cursor)? {
                    if value.py_eq(item) {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            other => Err(RuntimeError::type_error(format!(
                "argument of type '{}' is not iterable",
                other.type_name()
            ))),
        }
    }

    // ---- calls ----

    fn make_function(&mut self, def: &Rc<FunctionDef>) -> RunResult<Value> {
        let defaults = def
            .params
            .iter()
            .filter_map(|p| p.default.as_ref())
            .map(|e| self.eval(e))
            .collect::<RunResult<Vec<_>>>()?;
        let closure = self.scope.clone();
        self.capture(&closure);
        Ok(Value::Function(Rc::new(Function {
            def: def.clone(),
            defaults,
            closure,
        })))
    }

    pub fn call(
        &mut self,
        callee: &Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> RunResult<Value> {
        self.tick()?;
        match callee {
            Value::Builtin(builtin) => (builtin.func)(self, args, kwargs),
            Value::Method(method) => {
                methods::call_method(self, &method.receiver, &method.name, args, kwargs)
            }
            Value::Function(function) => self.call_function(function, args, kwargs),
            other => Err(RuntimeError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(
        &mut self,
        function: &Rc<Function>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> RunResult<Value> {
        if self.depth >= self.limits.max_call_depth {
            return Err(RuntimeError::new(
                ErrorKind::RecursionError,
                "maximum recursion depth exceeded",
            ));
        }
        let def = &function.def;
        let vars = bind_arguments(function, args, kwargs)?;
        let frame = Rc::new(RefCell::new(Scope {
            vars,
            parent: Some(function.closure.clone()),
            function: Some(def.clone()),
        }));

        let caller = std::mem::replace(&mut self.scope, frame);
        self.depth += 1;
        let result = self.exec_block(&def.body);
        self.depth -= 1;
        let frame = std::mem::replace(&mut self.scope, caller);
        release_scope(frame);

        match result? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }

    // ---- comprehensions ----

    fn eval_comprehension(&mut self, comp: &Rc<Comprehension>) -> RunResult<Value> {
        let Some(first) = comp.clauses.first() else {
            return Err(RuntimeError::new(ErrorKind::InternalError, "empty comprehension"));
        };
        // The outermost iterable is evaluated in the enclosing scope.
        let iterable = self.eval(&first.iter)?;
        let cursor = self.iterate(&iterable)?;
        let enclosing = self.scope.clone();
        let scope = Rc::new(RefCell::new(Scope::child(enclosing.clone())));

        if comp.kind == CompKind::Generator {
            self.capture(&enclosing);
            return Ok(Value::iter(
                "generator",
                IterState::Generator {
                    body: comp.clone(),
                    scope,
                    cursors: vec![cursor],
                },
            ));
        }

        let mut cursors = vec![cursor];
        let saved = std::mem::replace(&mut self.scope, scope);
        let result = self.fill_comprehension(comp, &mut cursors);
        let scope = std::mem::replace(&mut self.scope, saved);
        release_scope(scope);
        result
    }

    fn fill_comprehension(&mut self, comp: &Comprehension, cursors: &mut Vec<Cursor>) -> RunResult<Value> {
        match comp.kind {
            CompKind::Set => {
                let mut set = Set::new();
                while let Some(value) = self.comprehension_next(comp, cursors)? {
                    set.add(value)?;
                    Self::check_items(set.len())?;
                }
                Ok(Value::set(set))
            }
            CompKind::Dict => {
                let mut dict = Dict::new();
                while let Some(pair) = self.comprehension_next(comp, cursors)? {
                    if let Value::Tuple(kv) = pair {
                        dict.insert(kv[0].clone(), kv[1].clone())?;
                        Self::check_items(dict.len())?;
                    }
                }
                Ok(Value::dict(dict))
            }
            CompKind::List | CompKind::Generator => {
                let mut items = Vec::new();
                while let Some(value) = self.comprehension_next(comp, cursors)? {
                    items.push(value);
                    Self::check_items(items.len())?;
                }
                Ok(Value::list(items))
            }
        }
    }

    /// Advance the nested `for` clauses to the next produced element. The
    /// cursor stack holds one cursor per clause currently being iterated.
    fn comprehension_next(
        &mut self,
        comp: &Comprehension,
        cursors: &mut Vec<Cursor>,
    ) -> RunResult<Option<Value>> {
        loop {
            let Some(level) = cursors.len().checked_sub(1) else {
                return Ok(None);
            };
            let Some(item) = self.next(&mut cursors[level])? else {
                cursors.pop();
                continue;
            };
            let clause = &comp.clauses[level];
            self.assign(&clause.target, item)?;

            let mut keep = true;
            for condition in &clause.conditions {
                if !self.eval(condition)?.truthy() {
                    keep = false;
                    break;
                }
            }
            if !keep {
                continue;
            }

            if let Some(inner) = comp.clauses.get(level + 1) {
                let iterable = self.eval(&inner.iter)?;
                let cursor = self.iterate(&iterable)?;
                cursors.push(cursor);
                continue;
            }

            let element = self.eval(&comp.element)?;
            return Ok(Some(match &comp.value {
                Some(value) => {
                    let value = self.eval(value)?;
                    Value::tuple(vec![element, value])
                }
                None => element,
            }));
        }
    }

    // ---- iteration ----

    pub fn iterate(&mut self, value: &Value) -> RunResult<Cursor> {
        Ok(match value {
            Value::List(list) => Cursor::List {
                list: list.clone(),
                idx: 0,
            },
            Value::Tuple(items) => Cursor::Items(items.to_vec().into_iter()),
            Value::Str(text) => Cursor::Chars {
                text: text.clone(),
                pos: 0,
            },
            Value::Dict(dict) => Cursor::Dict {
                len: dict.borrow().len(),
                dict: dict.clone(),
                kind: ViewKind::Keys,
                idx: 0,
            },
            Value::DictView { dict, kind } => Cursor::Dict {
                len: dict.borrow().len(),
                dict: dict.clone(),
                kind: *kind,
                idx: 0,
            },
            Value::Set(set) => Cursor::Set {
                len: set.borrow().len(),
                set: set.clone(),
                idx: 0,
            },
            Value::Range(range) => Cursor::Range {
                next: range.start,
                remaining: range.len(),
                step: range.step,
            },
            Value::Iter(iter) => Cursor::Shared(iter.clone()),
            other => {
                return Err(RuntimeError::type_error(format!(
                    "'{}' object is not iterable",
                    other.type_name()
                )))
            }
        })
    }

    pub fn next(&mut self, cursor: &mut Cursor) -> RunResult<Option<Value>> {
        self.tick()?;
        Ok(match cursor {
            Cursor::List { list, idx } => {
                let item = list.borrow().get(*idx).cloned();
                if item.is_some() {
                    *idx += 1;
                }
                item
            }
            Cursor::Dict { dict, kind, idx, len } => {
                let dict = dict.borrow();
                if dict.len() != *len {
                    return Err(RuntimeError::new(
                        ErrorKind::RuntimeError,
                        "dictionary changed size during iteration",
                    ));
                }
                let item = dict.entries().get(*idx).map(|entry| kind.project(entry));
                if item.is_some() {
                    *idx += 1;
                }
                item
            }
            Cursor::Set { set, idx, len } => {
                let set = set.borrow();
                if set.len() != *len {
                    return Err(RuntimeError::new(
                        ErrorKind::RuntimeError,
                        "Set changed size during iteration",
                    ));
                }
                let item = set.items().get(*idx).cloned();
                if item.is_some() {
                    *idx += 1;
                }
                item
            }
            Cursor::Items(items) => items.next(),
            Cursor::Chars { text, pos } => match text[*pos..].chars().next() {
                Some(c) => {
                    *pos += c.len_utf8();
                    Some(char_value(c))
                }
                None => None,
            },
            Cursor::Range {
                next,
                remaining,
                step,
            } => {
                if *remaining <= 0 {
                    None
                } else {
                    let value = *next;
                    *remaining -= 1;
                    *next = next.wrapping_add(*step);
                    Some(Value::Int(value))
                }
            }
            Cursor::Shared(iter) => {
                let iter = iter.clone();
                return self.advance_iter(&iter);
            }
        })
    }

    fn advance_iter(&mut self, iter: &Rc<RefCell<IterObject>>) -> RunResult<Option<Value>> {
        // Take the state out so callbacks can run without holding the borrow.
        let state = match iter.try_borrow_mut() {
            Ok(mut object) => std::mem::replace(&mut object.state, IterState::Running),
            Err(_) => return Err(RuntimeError::value_error("generator already executing")),
        };
        if matches!(state, IterState::Running) {
            return Err(RuntimeError::value_error("generator already executing"));
        }
        let (result, state) = self.step_iter(state);
        if let Ok(mut object) = iter.try_borrow_mut() {
            object.state = state;
        }
        result
    }

    fn step_iter(&mut self, mut state: IterState) -> (RunResult<Option<Value>>, IterState) {
        let result = match &mut state {
            IterState::Map { func, sources } => {
                let mut args = Vec::with_capacity(sources.len());
                let mut exhausted = false;
                for source in sources.iter_mut() {
                    match self.next(source) {
                        Ok(Some(value)) => args.push(value),
                        Ok(None) => {
                            exhausted = true;
                            break;
                        }
                        Err(err) => return (Err(err), IterState::Exhausted),
                    }
                }
                if exhausted {
                    Ok(None)
                } else {
                    let func = func.clone();
                    self.call(&func, args, Vec::new()).map(Some)
                }
            }
            IterState::Filter { func, source } => loop {
                match self.next(source) {
                    Ok(Some(value)) => {
                        let keep = match func {
                            None | Some(Value::None) => Ok(value.truthy()),
                            Some(func) => {
                                let func = func.clone();
                                self.call(&func, vec![value.clone()], Vec::new())
                                    .map(|v| v.truthy())
                            }
                        };
                        match keep {
                            Ok(true) => break Ok(Some(value)),
                            Ok(false) => {}
                            Err(err) => break Err(err),
                        }
                    }
                    other => break other,
                }
            },
            IterState::Zip { sources } => {
                let mut items = Vec::with_capacity(sources.len());
                let mut outcome = Ok(None);
                let mut exhausted = sources.is_empty();
                for source in sources.iter_mut() {
                    match self.next(source) {
                        Ok(Some(value)) => items.push(value),
                        Ok(None) => {
                            exhausted = true;
                            break;
                        }
                        Err(err) => {
                            outcome = Err(err);
                            exhausted = true;
                            break;
                        }
                    }
                }
                if exhausted {
                    outcome
                } else {
                    Ok(Some(Value::tuple(items)))
                }
            }
            IterState::Enumerate { source, index } => match self.next(source) {
                Ok(Some(value)) => {
                    let pair = Value::tuple(vec![Value::Int(*index), value]);
                    *index += 1;
                    Ok(Some(pair))
                }
                other => other,
            },
            IterState::Plain(cursor) => self.next(cursor),
            IterState::Generator {
                body,
                scope,
                cursors,
            } => {
                let body = body.clone();
                let saved = std::mem::replace(&mut self.scope, scope.clone());
                let result = self.comprehension_next(&body, cursors);
                self.scope = saved;
                result
            }
            IterState::Running | IterState::Exhausted => Ok(None),
        };
        match result {
            Ok(None) => (Ok(None), IterState::Exhausted),
            other => (other, state),
        }
    }

    /// Materialize any iterable into a vector.
    pub fn collect(&mut self, value: &Value) -> RunResult<Vec<Value>> {
        match value {
            Value::List(list) => Ok(list.borrow().clone()),
            Value::Tuple(items) => Ok(items.to_vec()),
            Value::Str(text) => Ok(text.chars().map(char_value).collect()),
            Value::Dict(dict) => Ok(dict.borrow().keys()),
            Value::Set(set) => Ok(set.borrow().items().to_vec()),
            Value::Range(range) => {
                let len = range.len() as usize;
                Self::check_items(len)?;
                Ok((0..len as i64).map(|i| Value::Int(range.get(i))).collect())
            }
            other => {
                let mut cursor = self.iterate(other)?;
                let mut items = Vec::new();
                while let Some(item) = self.next(&mut cursor)? {
                    items.push(item);
                    Self::check_items(items.len())?;
                }
                Ok(items)
            }
        }
    }

    // ---- subscripts ----

    pub fn get_item(&mut self, object: &Value, index: &Index) -> RunResult<Value> {
        match (object, index) {
            (Value::List(list), Index::Item(i)) => {
                let list = list.borrow();
                let pos = seq_index(i, list.len(), "list", "list index out of range")?;
                Ok(list[pos].clone())
            }
            (Value::List(list), Index::Slice(lower, upper, step)) => {
                let list = list.borrow();
                Ok(Value::list(slice_items(&list, *lower, *upper, *step)?))
            }
            (Value::Tuple(items), Index::Item(i)) => {
                let pos = seq_index(i, items.len(), "tuple", "tuple index out of range")?;
                Ok(items[pos].clone())
            }
            (Value::Tuple(items), Index::Slice(lower, upper, step)) => {
                Ok(Value::tuple(slice_items(items, *lower, *upper, *step)?))
            }
            (Value::Str(text), Index::Item(i)) => {
                let len = text.chars().count();
                let pos = seq_index(i, len, "string", "string index out of range")?;
                Ok(text.chars().nth(pos).map(char_value).unwrap_or(Value::None))
            }
            (Value::Str(text), Index::Slice(lower, upper, step)) => {
                let chars: Vec<char> = text.chars().collect();
                Ok(Value::str(
                    slice_items(&chars, *lower, *upper, *step)?
                        .into_iter()
                        .collect::<String>(),
                ))
            }
            (Value::Dict(dict), Index::Item(key)) => {
                let found = dict.borrow().get(key)?;
                found.ok_or_else(|| key_error(key))
            }
            (Value::Range(range), Index::Item(i)) => {
                let pos = seq_index(
                    i,
                    range.len() as usize,
                    "range",
                    "range object index out of range",
                )?;
                Ok(Value::Int(range.get(pos as i64)))
            }
            (Value::Range(range), Index::Slice(lower, upper, step)) => {
                let (start, stop, step) = slice_indices(range.len(), *lower, *upper, *step)?;
                let step = range.step.checked_mul(step).ok_or_else(RuntimeError::overflow)?;
                Ok(Value::Range(Range {
                    start: range.get(start),
                    stop: range.get(stop),
                    step,
                }))
            }
            (Value::Dict(_), Index::Slice(..)) => {
                Err(RuntimeError::type_error("unhashable type: 'slice'"))
            }
            (other, _) => Err(RuntimeError::type_error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    pub fn set_item(&mut self, object: &Value, index: Index, value: Value) -> RunResult<()> {
        match (object, index) {
            (Value::List(list), Index::Item(i)) => {
                let mut list = list.borrow_mut();
                let pos = seq_index(&i, list.len(), "list", "list assignment index out of range")?;
                list[pos] = value;
                Ok(())
            }
            (Value::List(list), Index::Slice(lower, upper, step)) => {
                let items = self.collect(&value)?;
                let mut list = list.borrow_mut();
                let len = list.len();
                if step.unwrap_or(1) == 1 {
                    let (start, stop, _) = slice_indices(len as i64, lower, upper, Some(1))?;
                    let (start, stop) = (start as usize, (stop.max(start)) as usize);
                    Self::check_items(len - (stop - start) + items.len())?;
                    let tail = list.split_off(stop);
                    list.truncate(start);
                    list.extend(items);
                    list.extend(tail);
                } else {
                    let positions = slice_positions(len, lower, upper, step)?;
                    if positions.len() != items.len() {
                        return Err(RuntimeError::value_error(format!(
                            "attempt to assign sequence of size {} to extended slice of size {}",
                            items.len(),
                            positions.len()
                        )));
                    }
                    for (pos, item) in positions.into_iter().zip(items) {
                        list[pos] = item;
                    }
                }
                Ok(())
            }
            (Value::Dict(dict), Index::Item(key)) => {
                let mut dict = dict.borrow_mut();
                dict.insert(key, value)?;
                Self::check_items(dict.len())
            }
            (other, _) => Err(RuntimeError::type_error(format!(
                "'{}' object does not support item assignment",
                other.type_name()
            ))),
        }
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        for weak in std::mem::take(&mut self.captured) {
            if let Some(scope) = weak.upgrade() {
                if let Ok(mut bindings) = scope.try_borrow_mut() {
                    pending.extend(bindings.vars.drain().map(|(_, v)| v));
                }
            }
        }
        if let Ok(mut globals) = self.globals.try_borrow_mut() {
            pending.extend(globals.vars.drain().map(|(_, v)| v));
        }
        release_all(pending);
    }
}

/// Drop values without recursing through nested containers, so a deeply
/// nested list built by a loop can't exhaust the stack on teardown.
fn release_all(mut pending: Vec<Value>) {
    while let Some(value) = pending.pop() {
        match value {
            Value::List(list) => {
                if let Ok(cell) = Rc::try_unwrap(list) {
                    pending.extend(cell.into_inner());
                }
            }
            Value::Tuple(items) => {
                if let Ok(items) = Rc::try_unwrap(items) {
                    pending.extend(items);
                }
            }
            Value::Dict(dict) => {
                if let Ok(cell) = Rc::try_unwrap(dict) {
                    pending.extend(cell.into_inner().into_values_flat());
                }
            }
            Value::Set(set) => {
                if let Ok(cell) = Rc::try_unwrap(set) {
                    pending.extend(cell.into_inner().into_items());
                }
            }
            _ => {}
        }
    }
}

fn release_scope(scope: Rc<RefCell<Scope>>) {
    if let Ok(cell) = Rc::try_unwrap(scope) {
        release_all(cell.into_inner().vars.into_values().collect());
    }
}

fn bind_arguments(
    function: &Function,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> RunResult<HashMap<String, Value>> {
    let def = &function.def;
    let params = &def.params;
    if args.len() > params.len() {
        return Err(RuntimeError::type_error(format!(
            "{}() takes {} positional argument{} but {} {} given",
            def.name,
            params.len(),
            if params.len() == 1 { "" } else { "s" },
            args.len(),
            if args.len() == 1 { "was" } else { "were" }
        )));
    }

    let mut slots: Vec<Option<Value>> = vec![None; params.len()];
    for (slot, value) in slots.iter_mut().zip(args) {
        *slot = Some(value);
    }
    for (name, value) in kwargs {
        let Some(pos) = params.iter().position(|p| p.name == name) else {
            return Err(RuntimeError::type_error(format!(
                "{}() got an unexpected keyword argument '{}'",
                def.name, name
            )));
        };
        if slots[pos].is_some() {
            return Err(RuntimeError::type_error(format!(
                "{}() got multiple values for argument '{}'",
                def.name, name
            )));
        }
        slots[pos] = Some(value);
    }

    let first_default = params.len() - function.defaults.len();
    let mut missing = Vec::new();
    let mut vars = HashMap::with_capacity(params.len());
    for (pos, (param, slot)) in params.iter().zip(slots).enumerate() {
        let value = match slot {
            Some(value) => value,
            None if pos >= first_default => function.defaults[pos - first_default].clone(),
            None => {
                missing.push(format!("'{}'", param.name));
                continue;
            }
        };
        vars.insert(param.name.clone(), value);
    }
    if !missing.is_empty() {
        return Err(RuntimeError::type_error(format!(
            "{}() missing {} required positional argument{}: {}",
            def.name,
            missing.len(),
            if missing.len() == 1 { "" } else { "s" },
            missing.join(" and ")
        )));
    }
    Ok(vars)
}

fn get_attribute(object: Value, name: &str) -> RunResult<Value> {
    if methods::has_method(&object, name) {
        return Ok(Value::Method(Rc::new(BoundMethod {
            receiver: object,
            name: name.to_string(),
        })));
    }
    Err(no_attribute(&object, name))
}

fn no_attribute(object: &Value, name: &str) -> RuntimeError {
    RuntimeError::new(
        ErrorKind::AttributeError,
        format!("'{}' object has no attribute '{}'", object.type_name(), name),
    )
}

pub fn char_value(c: char) -> Value {
    let mut buf = [0u8; 4];
    Value::str(c.encode_utf8(&mut buf))
}

// ---- indexing helpers ----

fn seq_index(index: &Value, len: usize, kind: &str, out_of_range: &str) -> RunResult<usize> {
    let Some(i) = index.as_int() else {
        return Err(RuntimeError::type_error(format!(
            "{} indices must be integers or slices, not {}",
            kind,
            index.type_name()
        )));
    };
    let len = len as i64;
    let pos = if i < 0 { i + len } else { i };
    if pos < 0 || pos >= len {
        return Err(RuntimeError::index_error(out_of_range));
    }
    Ok(pos as usize)
}

/// Resolve slice bounds against a sequence length the way the reference
/// language does: clamp out-of-range bounds, count negatives from the end.
pub fn slice_indices(
    len: i64,
    lower: Option<i64>,
    upper: Option<i64>,
    step: Option<i64>,
) -> RunResult<(i64, i64, i64)> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(RuntimeError::value_error("slice step cannot be zero"));
    }
    let adjust = |bound: Option<i64>, default: i64| match bound {
        None => default,
        Some(mut i) => {
            if i < 0 {
                i = i.saturating_add(len);
                if i < 0 {
                    i = if step < 0 { -1 } else { 0 };
                }
            } else if i >= len {
                i = if step < 0 { len - 1 } else { len };
            }
            i
        }
    };
    let (start, stop) = if step > 0 {
        (adjust(lower, 0), adjust(upper, len))
    } else {
        (adjust(lower, len - 1), adjust(upper, -1))
    };
    Ok((start, stop, step))
}

pub fn slice_positions(
    len: usize,
    lower: Option<i64>,
    upper: Option<i64>,
    step: Option<i64>,
) -> RunResult<Vec<usize>> {
    let (start, stop, step) = slice_indices(len as i64, lower, upper, step)?;
    let mut positions = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        positions.push(i as usize);
        match i.checked_add(step) {
            Some(next) => i = next,
            None => break,
        }
    }
    Ok(positions)
}

fn slice_items<T: Clone>(
    items: &[T],
    lower: Option<i64>,
    upper: Option<i64>,
    step: Option<i64>,
) -> RunResult<Vec<T>> {
    Ok(slice_positions(items.len(), lower, upper, step)?
        .into_iter()
        .map(|i| items[i].clone())
        .collect())
}

// ---- operators ----

pub fn unary_op(op: UnaryOp, operand: &Value) -> RunResult<Value> {
    let bad = |symbol: &str| {
        RuntimeError::type_error(format!(
            "bad operand type for unary {}: '{}'",
            symbol,
            operand.type_name()
        ))
    };
    match op {
        UnaryOp::Not => Ok(Value::Bool(!operand.truthy())),
        UnaryOp::Neg => match operand {
            Value::Float(f) => Ok(Value::Float(-f)),
            other => match other.as_int() {
                Some(i) => i.checked_neg().map(Value::Int).ok_or_else(RuntimeError::overflow),
                None => Err(bad("-")),
            },
        },
        UnaryOp::Pos => match operand {
            Value::Float(f) => Ok(Value::Float(*f)),
            other => other.as_int().map(Value::Int).ok_or_else(|| bad("+")),
        },
        UnaryOp::Invert => match operand {
            Value::Int(_) | Value::Bool(_) => Ok(Value::Int(!operand.as_int().unwrap_or(0))),
            _ => Err(bad("~")),
        },
    }
}

pub fn binary_op(op: BinOp, left: &Value, right: &Value) -> RunResult<Value> {
    if let (Some(a), Some(b)) = (left.as_int(), right.as_int()) {
        if let (Value::Bool(x), Value::Bool(y)) = (left, right) {
            match op {
                BinOp::BitAnd => return Ok(Value::Bool(*x & *y)),
                BinOp::BitOr => return Ok(Value::Bool(*x | *y)),
                BinOp::BitXor => return Ok(Value::Bool(*x ^ *y)),
                _ => {}
            }
        }
        return int_op(op, a, b);
    }
    if left.is_number() && right.is_number() {
        let (a, b) = (left.as_float().unwrap_or(0.0), right.as_float().unwrap_or(0.0));
        return float_op(op, a, b, left, right);
    }

    match (op, left, right) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => {
            Interpreter::check_string(a.len() + b.len())?;
            let mut joined = String::with_capacity(a.len() + b.len());
            joined.push_str(a);
            joined.push_str(b);
            Ok(Value::str(joined))
        }
        (BinOp::Add, Value::List(a), Value::List(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Interpreter::check_items(items.len())?;
            Ok(Value::list(items))
        }
        (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
            let mut items = a.to_vec();
            items.extend(b.iter().cloned());
            Interpreter::check_items(items.len())?;
            Ok(Value::tuple(items))
        }
        (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s)) if n.as_int().is_some() => {
            let times = repeat_count(n, s.len(), MAX_STRING_BYTES)?;
            Ok(Value::str(s.repeat(times)))
        }
        (BinOp::Mul, Value::List(l), n) | (BinOp::Mul, n, Value::List(l)) if n.as_int().is_some() => {
            let items = l.borrow();
            let times = repeat_count(n, items.len(), MAX_ITEMS)?;
            Ok(Value::list(repeat_items(&items, times)))
        }
        (BinOp::Mul, Value::Tuple(t), n) | (BinOp::Mul, n, Value::Tuple(t)) if n.as_int().is_some() => {
            let times = repeat_count(n, t.len(), MAX_ITEMS)?;
            Ok(Value::tuple(repeat_items(t, times)))
        }
        (BinOp::Mod, Value::Str(template), args) => Ok(Value::str(percent_format(template, args)?)),
        (BinOp::Sub | BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor, Value::Set(a), Value::Set(b)) => {
            Ok(Value::set(set_op(op, &a.borrow(), &b.borrow())?))
        }
        (BinOp::BitOr, Value::Dict(a), Value::Dict(b)) => {
            let mut merged = Dict::new();
            for (k, v) in a.borrow().entries().iter().chain(b.borrow().entries()) {
                merged.insert(k.clone(), v.clone())?;
            }
            Ok(Value::dict(merged))
        }
        _ => Err(unsupported(op, left, right)),
    }
}

fn unsupported(op: BinOp, left: &Value, right: &Value) -> RuntimeError {
    match (op, left) {
        (BinOp::Add, Value::Str(_)) => RuntimeError::type_error(format!(
            "can only concatenate str (not \"{}\") to str",
            right.type_name()
        )),
        (BinOp::Add, Value::List(_)) => RuntimeError::type_error(format!(
            "can only concatenate list (not \"{}\") to list",
            right.type_name()
        )),
        _ => RuntimeError::type_error(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op.symbol(),
            left.type_name(),
            right.type_name()
        )),
    }
}

fn repeat_count(n: &Value, unit: usize, cap: usize) -> RunResult<usize> {
    let times = n.as_int().unwrap_or(0).max(0) as u64;
    let total = (unit as u64).checked_mul(times).ok_or_else(RuntimeError::memory)?;
    if total > cap as u64 {
        return Err(RuntimeError::memory());
    }
    if unit == 0 {
        return Ok(0);
    }
    Ok(times as usize)
}

fn repeat_items(items: &[Value], times: usize) -> Vec<Value> {
    let mut out = Vec::with_capacity(items.len() * times);
    for _ in 0..times {
        out.extend_from_slice(items);
    }
    out
}

fn int_op(op: BinOp, a: i64, b: i64) -> RunResult<Value> {
    let overflow = RuntimeError::overflow;
    Ok(match op {
        BinOp::Add => Value::Int(a.checked_add(b).ok_or_else(overflow)?),
        BinOp::Sub => Value::Int(a.checked_sub(b).ok_or_else(overflow)?),
        BinOp::Mul => Value::Int(a.checked_mul(b).ok_or_else(overflow)?),
        BinOp::Div => {
            if b == 0 {
                return Err(RuntimeError::zero_division("division by zero"));
            }
            Value::Float(a as f64 / b as f64)
        }
        BinOp::FloorDiv => {
            if b == 0 {
                return Err(RuntimeError::zero_division("integer division or modulo by zero"));
            }
            let q = a.checked_div(b).ok_or_else(overflow)?;
            let r = a.checked_rem(b).unwrap_or(0);
            Value::Int(if r != 0 && ((r < 0) != (b < 0)) { q - 1 } else { q })
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(RuntimeError::zero_division("integer modulo by zero"));
            }
            let r = a.checked_rem(b).unwrap_or(0);
            Value::Int(if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r })
        }
        BinOp::Pow => int_pow(a, b)?,
        BinOp::BitAnd => Value::Int(a & b),
        BinOp::BitOr => Value::Int(a | b),
        BinOp::BitXor => Value::Int(a ^ b),
        BinOp::LShift => {
            if b < 0 {
                return Err(RuntimeError::value_error("negative shift count"));
            }
            if a == 0 {
                return Ok(Value::Int(0));
            }
            if b >= 64 {
                return Err(overflow());
            }
            let shifted = (a as i128) << b;
            i64::try_from(shifted).map(Value::Int).map_err(|_| overflow())?
        }
        BinOp::RShift => {
            if b < 0 {
                return Err(RuntimeError::value_error("negative shift count"));
            }
            if b >= 64 {
                Value::Int(if a < 0 { -1 } else { 0 })
            } else {
                Value::Int(a >> b)
            }
        }
    })
}

fn int_pow(base: i64, exp: i64) -> RunResult<Value> {
    if exp < 0 {
        if base == 0 {
            return Err(RuntimeError::zero_division(
                "0.0 cannot be raised to a negative power",
            ));
        }
        return Ok(Value::Float((base as f64).powf(exp as f64)));
    }
    match u32::try_from(exp) {
        Ok(exp) => base
            .checked_pow(exp)
            .map(Value::Int)
            .ok_or_else(RuntimeError::overflow),
        Err(_) => match base {
            0 | 1 => Ok(Value::Int(base)),
            -1 => Ok(Value::Int(if exp % 2 == 0 { 1 } else { -1 })),
            _ => Err(RuntimeError::overflow()),
        },
    }
}

fn float_op(op: BinOp, a: f64, b: f64, left: &Value, right: &Value) -> RunResult<Value> {
    Ok(Value::Float(match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(RuntimeError::zero_division("float division by zero"));
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(RuntimeError::zero_division("float floor division by zero"));
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(RuntimeError::zero_division("float modulo by zero"));
            }
            let r = a % b;
            if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
                r + b
            } else {
                r
            }
        }
        BinOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(RuntimeError::zero_division(
                    "0.0 cannot be raised to a negative power",
                ));
            }
            if a < 0.0 && b.fract() != 0.0 {
                return Err(RuntimeError::value_error(
                    "negative number cannot be raised to a fractional power",
                ));
            }
            let result = a.powf(b);
            if result.is_infinite() && a.is_finite() && b.is_finite() {
                return Err(RuntimeError::new(
                    ErrorKind::OverflowError,
                    "(34, 'Numerical result out of range')",
                ));
            }
            result
        }
        _ => return Err(unsupported(op, left, right)),
    }))
}

fn set_op(op: BinOp, a: &Set, b: &Set) -> RunResult<Set> {
    let mut out = Set::new();
    match op {
        BinOp::BitOr => {
            for item in a.items().iter().chain(b.items()) {
                out.add(item.clone())?;
            }
        }
        BinOp::BitAnd => {
            for item in a.items() {
                if b.contains(item)? {
                    out.add(item.clone())?;
                }
            }
        }
        BinOp::Sub => {
            for item in a.items() {
                if !b.contains(item)? {
                    out.add(item.clone())?;
                }
            }
        }
        _ => {
            for item in a.items() {
                if !b.contains(item)? {
                    out.add(item.clone())?;
                }
            }
            for item in b.items() {
                if !a.contains(item)? {
                    out.add(item.clone())?;
                }
            }
        }
    }
    Ok(out)
}

fn set_relation(op: CmpOp, a: &Set, b: &Set) -> bool {
    let a_in_b = a.items().iter().all(|v| b.contains(v).unwrap_or(false));
    let b_in_a = b.items().iter().all(|v| a.contains(v).unwrap_or(false));
    match op {
        CmpOp::LtE => a_in_b,
        CmpOp::Lt => a_in_b && a.len() < b.len(),
        CmpOp::GtE => b_in_a,
        _ => b_in_a && a.len() > b.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allowlist::capabilities;
    use crate::runtime::parser::parse;

    fn run(source: &str) -> Result<String, String> {
        let module = parse(source).map_err(|e| e.to_string())?;
        let mut interp = Interpreter::new(&capabilities(), ExecutionLimits::default());
        match interp.run(&module) {
            Ok(()) => Ok(interp.output().to_string()),
            Err(err) => Err(err.to_string()),
        }
    }

    #[test]
    fn test_loops_and_accumulators() {
        let out = run("total = 0\nfor i in range(1, 6):\n    total += i\nprint(total)\n").unwrap();
        assert_eq!(out, "15\n");

        let out = run("n = 3\nwhile n > 0:\n    print(n)\n    n -= 1\nelse:\n    print('done')\n").unwrap();
        assert_eq!(out, "3\n2\n1\ndone\n");
    }

    #[test]
    fn test_break_skips_loop_else() {
        let out = run("for x in [1, 2, 3]:\n    if x == 2:\n        break\nelse:\n    print('no')\nprint(x)\n").unwrap();
        assert_eq!(out, "2\n");
    }

    #[test]
    fn test_unpacking_in_loops() {
        let out = run(
            "fruits = ['apple', 'kiwi']\nfor i, f in enumerate(fruits, 1):\n    print(i, f)\nd = {'a': 1}\nfor k, v in d.items():\n    print(k, v)\n",
        )
        .unwrap();
        assert_eq!(out, "1 apple\n2 kiwi\na 1\n");
    }

    #[test]
    fn test_functions_closures_and_defaults() {
        let source = "def make(n):\n    def add(x, y=1):\n        return x + n + y\n    return add\nf = make(10)\nprint(f(1), f(1, y=0))\n";
        assert_eq!(run(source).unwrap(), "12 11\n");
    }

    #[test]
    fn test_unbound_local() {
        let err = run("x = 1\ndef f():\n    print(x)\n    x = 2\nf()\n").unwrap_err();
        assert!(err.starts_with("UnboundLocalError"));
    }

    #[test]
    fn test_global_statement() {
        let out = run("count = 0\ndef bump():\n    global count\n    count += 1\nbump()\nbump()\nprint(count)\n").unwrap();
        assert_eq!(out, "2\n");
    }

    #[test]
    fn test_comprehensions_and_generators() {
        let out = run("print([x * x for x in range(5) if x % 2 == 0])\nprint({k: len(k) for k in ['ab', 'c']})\nprint(sum(x for x in range(4)))\nprint([(a, b) for a in range(2) for b in 'xy'])\n").unwrap();
        assert_eq!(
            out,
            "[0, 4, 16]\n{'ab': 2, 'c': 1}\n6\n[(0, 'x'), (0, 'y'), (1, 'x'), (1, 'y')]\n"
        );
    }

    #[test]
    fn test_generator_is_lazy() {
        let out = run("g = (x for x in range(10**12) if x > 3)\nfor v in g:\n    print(v)\n    break\n").unwrap();
        assert_eq!(out, "4\n");
    }

    #[test]
    fn test_arithmetic_semantics() {
        let out = run("print(7 // 2, -7 // 2, -7 % 3, 7 / 2, 2 ** 10, 2 ** -1)\n").unwrap();
        assert_eq!(out, "3 -4 2 3.5 1024 0.5\n");
        assert_eq!(
            run("print(1 / 0)\n").unwrap_err(),
            "ZeroDivisionError: division by zero"
        );
        assert!(run("print(2 ** 200)\n").unwrap_err().starts_with("OverflowError"));
    }

    #[test]
    fn test_slicing() {
        let out = run("s = 'hello'\nprint(s[::-1], s[1:3], s[-1])\nl = [0, 1, 2, 3, 4]\nl[1:3] = ['a']\nprint(l, l[::2])\nprint(range(10)[2:8:3])\n").unwrap();
        assert_eq!(out, "olleh el o\n[0, 'a', 3, 4] [0, 3]\nrange(2, 8, 3)\n");
    }

    #[test]
    fn test_list_aliasing_with_inplace_add() {
        let out = run("a = [1]\nb = a\na += [2]\nprint(b)\n").unwrap();
        assert_eq!(out, "[1, 2]\n");
    }

    #[test]
    fn test_resizing_dict_or_set_during_loop_fails() {
        assert_eq!(
            run("d = {'a': 1, 'b': 2}\nfor k in d:\n    d[k + 'x'] = 0\n").unwrap_err(),
            "RuntimeError: dictionary changed size during iteration"
        );
        assert_eq!(
            run("d = {'a': 1, 'b': 2}\nfor k in d.keys():\n    del d[k]\n").unwrap_err(),
            "RuntimeError: dictionary changed size during iteration"
        );
        assert_eq!(
            run("s = {1, 2}\nfor x in s:\n    s.add(x + 10)\n").unwrap_err(),
            "RuntimeError: Set changed size during iteration"
        );
    }

    #[test]
    fn test_updating_values_during_dict_loop_is_allowed() {
        let out = run("d = {'a': 1, 'b': 2}\nfor k, v in d.items():\n    d[k] = v * 10\nfor k in list(d):\n    del d[k]\nprint(d)\nl = [1, 2, 3, 4]\nfor x in l:\n    l.remove(x)\nprint(l)\n").unwrap();
        assert_eq!(out, "{}\n[2, 4]\n");
    }

    #[test]
    fn test_self_containing_list_prints_ellipsis() {
        let out = run("a = [1]\na.append(a)\nprint(a)\nd = {}\nd['self'] = d\nprint(d)\n").unwrap();
        assert_eq!(out, "[1, [...]]\n{'self': {...}}\n");
    }

    #[test]
    fn test_runtime_errors_carry_lines() {
        let module = parse("x = 1\ny = [1, 2]\nprint(y[5])\n").unwrap();
        let mut interp = Interpreter::new(&capabilities(), ExecutionLimits::default());
        let err = interp.run(&module).unwrap_err();
        assert_eq!(err.to_string(), "IndexError: list index out of range");
        assert_eq!(err.line, Some(3));
    }

    #[test]
    fn test_unknown_names_are_unreachable() {
        assert_eq!(
            run("open('x')\n").unwrap_err(),
            "NameError: name 'open' is not defined"
        );
        assert_eq!(
            run("import os\n").unwrap_err(),
            "ImportError: __import__ not found"
        );
        assert!(run("print(''.__class__)\n").unwrap_err().starts_with("AttributeError"));
    }

    #[test]
    fn test_recursion_limit() {
        let err = std::thread::Builder::new()
            .stack_size(64 * 1024 * 1024)
            .spawn(|| run("def f(n):\n    return f(n + 1)\nf(0)\n").unwrap_err())
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(err, "RecursionError: maximum recursion depth exceeded");
    }

    #[test]
    fn test_deadline_stops_infinite_loop() {
        let module = parse("while True:\n    pass\n").unwrap();
        let limits = ExecutionLimits {
            deadline: Some(Instant::now() + std::time::Duration::from_millis(50)),
            ..ExecutionLimits::default()
        };
        let mut interp = Interpreter::new(&capabilities(), limits);
        let err = interp.run(&module).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TimeoutError);
    }

    #[test]
    fn test_output_cap() {
        let module = parse("while True:\n    print('spam' * 100)\n").unwrap();
        let limits = ExecutionLimits {
            max_output_bytes: 10_000,
            ..ExecutionLimits::default()
        };
        let mut interp = Interpreter::new(&capabilities(), limits);
        let err = interp.run(&module).unwrap_err();
        assert_eq!(err.kind, ErrorKind::OutputLimitError);
        assert!(interp.output().len() <= 10_000);
    }

    #[test]
    fn test_deeply_nested_list_teardown() {
        let out = std::thread::Builder::new()
            .stack_size(8 * 1024 * 1024)
            .spawn(|| run("a = []\nfor i in range(300000):\n    a = [a]\nprint('built')\n").unwrap())
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(out, "built\n");
    }
}
