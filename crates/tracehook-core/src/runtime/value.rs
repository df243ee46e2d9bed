// Runtime object model

use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use indexmap::IndexMap;

use super::{Interpreter, RtResult};
use crate::analysis::LocalScope;
use crate::ast::{Expr, Parameters, Stmt};
use crate::tracer::Tracer;

/// Attribute / variable namespace in insertion order
pub type Namespace = RefCell<IndexMap<String, Value>>;

/// A variable slot of a function frame; `None` while unbound
pub type Cell = Rc<RefCell<Option<Value>>>;

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<[Value]>),
    Dict(Rc<RefCell<Dict>>),
    Range(Range),
    Function(Rc<Function>),
    Builtin(Rc<Builtin>),
    BoundMethod(Rc<BoundMethod>),
    Class(Rc<Class>),
    Instance(Rc<Instance>),
    Module(Rc<ModuleObject>),
    Tracer(Rc<Tracer>),
    /// A function wrapped by a tracer decorator
    Traced(Rc<Traced>),
}

impl Value {
    pub fn str(s: impl AsRef<str>) -> Self {
        Value::Str(Rc::from(s.as_ref()))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Rc::from(items))
    }

    pub fn dict(dict: Dict) -> Self {
        Value::Dict(Rc::new(RefCell::new(dict)))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn type_name(&self) -> String {
        match self {
            Value::None => "NoneType".into(),
            Value::Bool(_) => "bool".into(),
            Value::Int(_) => "int".into(),
            Value::Float(_) => "float".into(),
            Value::Str(_) => "str".into(),
            Value::List(_) => "list".into(),
            Value::Tuple(_) => "tuple".into(),
            Value::Dict(_) => "dict".into(),
            Value::Range(_) => "range".into(),
            Value::Function(_) | Value::Traced(_) => "function".into(),
            Value::Builtin(_) => "builtin_function_or_method".into(),
            Value::BoundMethod(_) => "method".into(),
            Value::Class(_) => "type".into(),
            Value::Instance(instance) => instance.class.name.clone(),
            Value::Module(_) => "module".into(),
            Value::Tracer(_) => "tracer".into(),
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Dict(dict) => !dict.borrow().is_empty(),
            Value::Range(range) => range.len() > 0,
            _ => true,
        }
    }

    /// Object identity for reference types, value identity otherwise
    pub fn is(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b) || a == b,
            (Value::Range(a), Value::Range(b)) => a == b,
            _ => match (self.identity(), other.identity()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    /// Address of the shared object behind a reference value
    pub fn identity(&self) -> Option<usize> {
        Some(match self {
            Value::List(rc) => Rc::as_ptr(rc) as *const u8 as usize,
            Value::Tuple(rc) => Rc::as_ptr(rc) as *const u8 as usize,
            Value::Dict(rc) => Rc::as_ptr(rc) as *const u8 as usize,
            Value::Function(rc) => Rc::as_ptr(rc) as *const u8 as usize,
            Value::Builtin(rc) => Rc::as_ptr(rc) as *const u8 as usize,
            Value::BoundMethod(rc) => Rc::as_ptr(rc) as *const u8 as usize,
            Value::Class(rc) => Rc::as_ptr(rc) as *const u8 as usize,
            Value::Instance(rc) => Rc::as_ptr(rc) as *const u8 as usize,
            Value::Module(rc) => Rc::as_ptr(rc) as *const u8 as usize,
            Value::Tracer(rc) => Rc::as_ptr(rc) as *const u8 as usize,
            Value::Traced(rc) => Rc::as_ptr(rc) as *const u8 as usize,
            _ => return None,
        })
    }

    /// Structural equality as `==` sees it
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Float(a), _) => other.as_number().is_some_and(|b| *a == b),
            (_, Value::Float(b)) => self.as_number().is_some_and(|a| a == *b),
            (Value::Int(_) | Value::Bool(_), Value::Int(_) | Value::Bool(_)) => self.as_int() == other.as_int(),
            (Value::List(a), Value::List(b)) => {
                Rc::ptr_eq(a, b) || seq_equals(&a.borrow(), &b.borrow())
            }
            (Value::Tuple(a), Value::Tuple(b)) => seq_equals(a, b),
            (Value::Dict(a), Value::Dict(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.entries.iter().all(|(key, (_, value))| {
                        b.entries.get(key).is_some_and(|(_, other)| value.equals(other))
                    })
            }
            (Value::Range(a), Value::Range(b)) => a == b,
            _ => self.is(other),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(*b as i64 as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }
}

fn seq_equals(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equals(y))
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(b) => write!(f, "{b:?}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x:?}"),
            Value::Str(s) => write!(f, "{s:?}"),
            other => write!(f, "<{}>", other.type_name()),
        }
    }
}

/// `range(start, stop, step)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl Range {
    pub fn len(&self) -> usize {
        let (lo, hi, step) = if self.step > 0 {
            (self.start, self.stop, self.step)
        } else {
            (self.stop, self.start, -self.step)
        };
        if hi <= lo {
            0
        } else {
            ((hi as i128 - lo as i128 - 1) / step as i128 + 1) as usize
        }
    }

    pub fn get(&self, index: usize) -> Option<i64> {
        (index < self.len()).then(|| self.start + self.step * index as i64)
    }
}

/// Hashable projection of a value used as a dict key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    None,
    Int(i64),
    Float(u64),
    Str(Rc<str>),
    Tuple(Vec<Key>),
    Object(usize),
}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Key::None => {}
            Key::Int(i) => i.hash(state),
            Key::Float(bits) => bits.hash(state),
            Key::Str(s) => s.hash(state),
            Key::Tuple(items) => items.hash(state),
            Key::Object(addr) => addr.hash(state),
        }
    }
}

impl Key {
    /// `None` for unhashable values
    pub fn from_value(value: &Value) -> Option<Key> {
        Some(match value {
            Value::None => Key::None,
            Value::Bool(b) => Key::Int(*b as i64),
            Value::Int(i) => Key::Int(*i),
            Value::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Key::Int(*f as i64),
            Value::Float(f) => Key::Float(f.to_bits()),
            Value::Str(s) => Key::Str(s.clone()),
            Value::Tuple(items) => Key::Tuple(items.iter().map(Key::from_value).collect::<Option<_>>()?),
            Value::Range(r) => Key::Tuple(vec![Key::Int(r.start), Key::Int(r.stop), Key::Int(r.step)]),
            Value::List(_) | Value::Dict(_) => return None,
            other => Key::Object(other.identity()?),
        })
    }
}

/// Insertion-ordered mapping; each entry keeps the original key value
#[derive(Debug, Clone, Default)]
pub struct Dict {
    pub entries: IndexMap<Key, (Value, Value)>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Key) -> Option<&Value> {
        self.entries.get(key).map(|(_, value)| value)
    }

    pub fn insert(&mut self, key: Key, key_value: Value, value: Value) {
        match self.entries.get_mut(&key) {
            Some(entry) => entry.1 = value,
            None => {
                self.entries.insert(key, (key_value, value));
            }
        }
    }

    /// Insert under a string key
    pub fn set_str(&mut self, key: &str, value: Value) {
        let key_value = Value::str(key);
        self.insert(Key::Str(Rc::from(key)), key_value, value);
    }

    pub fn remove(&mut self, key: &Key) -> Option<Value> {
        self.entries.shift_remove(key).map(|(_, value)| value)
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.values().map(|(key, _)| key.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.values().map(|(_, value)| value.clone()).collect()
    }

    pub fn items(&self) -> Vec<(Value, Value)> {
        self.entries.values().cloned().collect()
    }
}

/// Lexically enclosing variable cells of a function or comprehension
#[derive(Debug, Default)]
pub struct Env {
    pub cells: IndexMap<String, Cell>,
    pub parent: Option<Rc<Env>>,
}

impl Env {
    pub fn new(names: impl IntoIterator<Item = String>, parent: Option<Rc<Env>>) -> Self {
        Self {
            cells: names
                .into_iter()
                .map(|name| (name, Rc::new(RefCell::new(None))))
                .collect(),
            parent,
        }
    }

    /// Nearest enclosing cell for `name`, skipping this env's own cells
    pub fn enclosing(&self, name: &str) -> Option<Cell> {
        let mut env = self.parent.as_ref();
        while let Some(current) = env {
            if let Some(cell) = current.cells.get(name) {
                return Some(cell.clone());
            }
            env = current.parent.as_ref();
        }
        None
    }

    /// Bound variables in declaration order
    pub fn bound(&self) -> Vec<(String, Value)> {
        self.cells
            .iter()
            .filter_map(|(name, cell)| cell.borrow().clone().map(|value| (name.clone(), value)))
            .collect()
    }
}

#[derive(Debug)]
pub enum FunctionBody {
    Block(Rc<[Stmt]>),
    Lambda(Rc<Expr>),
}

pub struct Function {
    pub name: String,
    pub qualname: String,
    pub filename: Rc<str>,
    pub line: u32,
    pub params: Parameters,
    /// Evaluated defaults, aligned with `params.args`
    pub defaults: Vec<Option<Value>>,
    /// Evaluated defaults, aligned with `params.kwonly`
    pub kw_defaults: Vec<Option<Value>>,
    pub body: FunctionBody,
    pub scope: Rc<LocalScope>,
    pub globals: Rc<ModuleObject>,
    pub closure: Option<Rc<Env>>,
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<function {}>", self.qualname)
    }
}

pub type BuiltinFn = fn(&mut Interpreter, Option<&Value>, Args) -> RtResult<Value>;

/// A native function, optionally bound to a receiver (`"a".upper`)
pub struct Builtin {
    pub name: String,
    pub func: BuiltinFn,
    pub receiver: Option<Value>,
}

impl Builtin {
    pub fn new(name: impl Into<String>, func: BuiltinFn) -> Self {
        Self {
            name: name.into(),
            func,
            receiver: None,
        }
    }

    pub fn bound(name: impl Into<String>, func: BuiltinFn, receiver: Value) -> Self {
        Self {
            name: name.into(),
            func,
            receiver: Some(receiver),
        }
    }
}

pub struct BoundMethod {
    pub receiver: Value,
    pub func: Value,
}

pub struct Class {
    pub name: String,
    pub module: String,
    pub bases: Vec<Rc<Class>>,
    pub dict: Namespace,
}

impl Class {
    pub fn new(name: impl Into<String>, module: impl Into<String>, bases: Vec<Rc<Class>>) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
            bases,
            dict: RefCell::new(IndexMap::new()),
        }
    }

    /// Depth-first, left-to-right, first occurrence wins
    pub fn mro(self: &Rc<Self>) -> Vec<Rc<Class>> {
        let mut order: Vec<Rc<Class>> = Vec::new();
        let mut stack = vec![Rc::clone(self)];
        while let Some(class) = stack.pop() {
            if order.iter().any(|seen| Rc::ptr_eq(seen, &class)) {
                continue;
            }
            stack.extend(class.bases.iter().rev().cloned());
            order.push(class);
        }
        order
    }

    pub fn lookup(self: &Rc<Self>, name: &str) -> Option<Value> {
        self.mro()
            .iter()
            .find_map(|class| class.dict.borrow().get(name).cloned())
    }

    pub fn is_subclass(self: &Rc<Self>, other: &Rc<Class>) -> bool {
        self.mro().iter().any(|class| Rc::ptr_eq(class, other))
    }
}

pub struct Instance {
    pub class: Rc<Class>,
    pub dict: Namespace,
}

impl Instance {
    pub fn new(class: Rc<Class>) -> Self {
        Self {
            class,
            dict: RefCell::new(IndexMap::new()),
        }
    }
}

/// A module's namespace
pub struct ModuleObject {
    pub name: String,
    pub dict: Namespace,
}

impl ModuleObject {
    pub fn new(name: impl Into<String>) -> Rc<Self> {
        let name = name.into();
        let mut dict = IndexMap::new();
        dict.insert("__name__".to_string(), Value::str(&name));
        Rc::new(Self {
            name,
            dict: RefCell::new(dict),
        })
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.dict.borrow().get(name).cloned()
    }

    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.dict.borrow_mut().insert(name.into(), value);
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.dict.borrow_mut().shift_remove(name)
    }

    pub fn file(&self) -> Option<String> {
        self.get("__file__").and_then(|v| v.as_str().map(str::to_string))
    }
}

pub struct Traced {
    pub func: Value,
    pub tracer: Rc<Tracer>,
}

/// Call arguments after `*` / `**` expansion
#[derive(Debug, Clone, Default)]
pub struct Args {
    pub positional: Vec<Value>,
    pub keywords: Vec<(String, Value)>,
}

impl Args {
    pub fn new(positional: Vec<Value>) -> Self {
        Self {
            positional,
            keywords: Vec::new(),
        }
    }

    pub fn keyword(&self, name: &str) -> Option<&Value> {
        self.keywords.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_len_and_get() {
        assert_eq!(Range { start: 0, stop: 5, step: 1 }.len(), 5);
        assert_eq!(Range { start: 0, stop: 5, step: 2 }.len(), 3);
        assert_eq!(Range { start: 5, stop: 0, step: -2 }.len(), 3);
        assert_eq!(Range { start: 5, stop: 0, step: 1 }.len(), 0);
        assert_eq!(Range { start: 5, stop: 0, step: -2 }.get(2), Some(1));
        assert_eq!(Range { start: 0, stop: 3, step: 1 }.get(3), None);
    }

    #[test]
    fn test_numeric_equality_and_keys() {
        assert!(Value::Int(1).equals(&Value::Float(1.0)));
        assert!(Value::Bool(true).equals(&Value::Int(1)));
        assert_eq!(Key::from_value(&Value::Float(2.0)), Key::from_value(&Value::Int(2)));
        assert!(Key::from_value(&Value::list(vec![])).is_none());
    }

    #[test]
    fn test_dict_keeps_insertion_order() {
        let mut dict = Dict::new();
        dict.set_str("b", Value::Int(1));
        dict.set_str("a", Value::Int(2));
        dict.set_str("b", Value::Int(3));
        let keys: Vec<String> = dict.keys().iter().map(|k| k.as_str().unwrap().to_string()).collect();
        assert_eq!(keys, ["b", "a"]);
        assert!(dict.get(&Key::Str(Rc::from("b"))).unwrap().equals(&Value::Int(3)));
    }

    #[test]
    fn test_mro_is_depth_first() {
        let base = Rc::new(Class::new("Base", "m", vec![]));
        let left = Rc::new(Class::new("Left", "m", vec![base.clone()]));
        let right = Rc::new(Class::new("Right", "m", vec![]));
        let child = Rc::new(Class::new("Child", "m", vec![left.clone(), right.clone()]));
        let names: Vec<String> = child.mro().iter().map(|c| c.name.clone()).collect();
        assert_eq!(names, ["Child", "Left", "Base", "Right"]);
        assert!(child.is_subclass(&base));
        assert!(!right.is_subclass(&base));
    }
}
