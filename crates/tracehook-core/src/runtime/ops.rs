// Operators, comparisons, item access and text conversion

use std::cmp::Ordering;
use std::rc::Rc;

use super::exceptions::ExcKind;
use super::value::{Args, Dict, Key, Range, Value};
use super::{Interpreter, RtResult};
use crate::ast::source_gen::quote_str;
use crate::ast::{BinOp, CmpOp, UnaryOp};

/// Float text as `repr` prints it: shortest round-trip digits, exponent form
/// outside `1e-4 <= |x| < 1e16`
pub fn float_repr(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let text = format!("{f:?}");
    match text.split_once('e') {
        Some((mantissa, exponent)) => format!("{mantissa}e{}", exponent_suffix(exponent)),
        None => text,
    }
}

/// `-5` -> `-05`, `16` -> `+16`
fn exponent_suffix(exponent: &str) -> String {
    let (sign, digits) = match exponent.strip_prefix('-') {
        Some(digits) => ('-', digits),
        None => ('+', exponent.trim_start_matches('+')),
    };
    format!("{sign}{digits:0>2}")
}

/// `repr` without calling user-defined methods
pub fn basic_repr(value: &Value) -> String {
    match value {
        Value::None => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => float_repr(*f),
        Value::Str(s) => quote_str(s),
        Value::List(items) => sequence_text(&items.borrow(), "[", "]", basic_repr),
        Value::Tuple(items) => tuple_text(items, basic_repr),
        Value::Dict(dict) => {
            let body: Vec<String> = dict
                .borrow()
                .items()
                .iter()
                .map(|(k, v)| format!("{}: {}", basic_repr(k), basic_repr(v)))
                .collect();
            format!("{{{}}}", body.join(", "))
        }
        Value::Range(r) if r.step == 1 => format!("range({}, {})", r.start, r.stop),
        Value::Range(r) => format!("range({}, {}, {})", r.start, r.stop, r.step),
        Value::Function(func) => format!("<function {}>", func.qualname),
        Value::Traced(traced) => basic_repr(&traced.func),
        Value::Builtin(builtin) => match &builtin.receiver {
            Some(receiver) if !matches!(receiver, Value::Module(_) | Value::Tracer(_)) => format!(
                "<built-in method {} of {} object>",
                builtin.name,
                receiver.type_name()
            ),
            _ => format!("<built-in function {}>", builtin.name),
        },
        Value::BoundMethod(method) => {
            let name = match &method.func {
                Value::Function(func) => func.qualname.clone(),
                Value::Traced(traced) => match &traced.func {
                    Value::Function(func) => func.qualname.clone(),
                    _ => "?".to_string(),
                },
                _ => "?".to_string(),
            };
            format!("<bound method {name}>")
        }
        Value::Class(class) => format!("<class '{}'>", class.name),
        Value::Instance(instance) => {
            if let Some(Value::Tuple(args)) = exception_args(value) {
                let inner = match args.len() {
                    1 => basic_repr(&args[0]),
                    _ => tuple_text(&args, basic_repr).trim_start_matches('(').trim_end_matches(')').to_string(),
                };
                format!("{}({})", instance.class.name, inner)
            } else {
                format!("<{}.{} object>", instance.class.module, instance.class.name)
            }
        }
        Value::Module(module) => format!("<module '{}'>", module.name),
        Value::Tracer(_) => "<tracer>".to_string(),
    }
}

/// `str` without calling user-defined methods
pub fn basic_str(value: &Value) -> String {
    match value {
        Value::Str(s) => s.to_string(),
        Value::Instance(instance) => match exception_args(value) {
            Some(Value::Tuple(args)) => match args.as_ref() {
                [] => String::new(),
                [single] if instance.class.name == "KeyError" => basic_repr(single),
                [single] => basic_str(single),
                _ => tuple_text(&args, basic_repr),
            },
            _ => basic_repr(value),
        },
        other => basic_repr(other),
    }
}

/// `args` of an exception instance
fn exception_args(value: &Value) -> Option<Value> {
    match value {
        Value::Instance(instance) if is_exception_instance(instance) => {
            instance.dict.borrow().get("args").cloned()
        }
        _ => None,
    }
}

fn is_exception_instance(instance: &super::value::Instance) -> bool {
    instance
        .class
        .mro()
        .iter()
        .any(|class| class.name == "BaseException" && class.module == "builtins")
}

fn sequence_text(items: &[Value], open: &str, close: &str, render: impl Fn(&Value) -> String) -> String {
    let body: Vec<String> = items.iter().map(render).collect();
    format!("{open}{}{close}", body.join(", "))
}

fn tuple_text(items: &[Value], render: impl Fn(&Value) -> String) -> String {
    match items {
        [single] => format!("({},)", render(single)),
        _ => sequence_text(items, "(", ")", render),
    }
}

/// Resolve a possibly negative index against `len`
fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let index = if index < 0 { index + len } else { index };
    (0..len).contains(&index).then_some(index as usize)
}

/// Positions selected by `[lower:upper:step]` on a sequence of `len` items
pub fn slice_indices(len: usize, lower: Option<i64>, upper: Option<i64>, step: i64) -> Vec<usize> {
    let len = len as i64;
    let clamp = |bound: i64, low: i64, high: i64| {
        let bound = if bound < 0 { bound + len } else { bound };
        bound.clamp(low, high)
    };
    let mut out = Vec::new();
    if step > 0 {
        let start = lower.map_or(0, |b| clamp(b, 0, len));
        let stop = upper.map_or(len, |b| clamp(b, 0, len));
        let mut i = start;
        while i < stop {
            out.push(i as usize);
            i += step;
        }
    } else {
        let start = lower.map_or(len - 1, |b| clamp(b, -1, len - 1));
        let stop = upper.map_or(-1, |b| clamp(b, -1, len - 1));
        let mut i = start;
        while i > stop {
            out.push(i as usize);
            i += step;
        }
    }
    out
}

fn floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    Some(if a % b != 0 && ((a < 0) != (b < 0)) { q - 1 } else { q })
}

fn floor_mod(a: i64, b: i64) -> Option<i64> {
    let r = a.checked_rem(b)?;
    Some(if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r })
}

fn float_mod(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
        r + b
    } else {
        r
    }
}

fn dunder(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "__add__",
        BinOp::Sub => "__sub__",
        BinOp::Mult => "__mul__",
        BinOp::Div => "__truediv__",
        BinOp::FloorDiv => "__floordiv__",
        BinOp::Mod => "__mod__",
        BinOp::Pow => "__pow__",
    }
}

fn compare_dunder(op: CmpOp) -> Option<&'static str> {
    Some(match op {
        CmpOp::Eq => "__eq__",
        CmpOp::NotEq => "__ne__",
        CmpOp::Lt => "__lt__",
        CmpOp::LtE => "__le__",
        CmpOp::Gt => "__gt__",
        CmpOp::GtE => "__ge__",
        _ => return None,
    })
}

/// Parsed `[[fill]align][sign][0][width][,][.precision][type]`
#[derive(Debug, Clone, PartialEq)]
struct FormatSpec {
    fill: char,
    align: Option<char>,
    sign: Option<char>,
    width: usize,
    grouping: bool,
    precision: Option<usize>,
    ty: Option<char>,
}

impl FormatSpec {
    fn parse(spec: &str) -> Option<Self> {
        let chars: Vec<char> = spec.chars().collect();
        let mut parsed = FormatSpec {
            fill: ' ',
            align: None,
            sign: None,
            width: 0,
            grouping: false,
            precision: None,
            ty: None,
        };
        let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');
        let mut i = 0;
        if chars.len() >= 2 && is_align(chars[1]) {
            parsed.fill = chars[0];
            parsed.align = Some(chars[1]);
            i = 2;
        } else if chars.first().copied().is_some_and(is_align) {
            parsed.align = Some(chars[0]);
            i = 1;
        }
        if let Some(&c) = chars.get(i) {
            if matches!(c, '+' | '-' | ' ') {
                parsed.sign = Some(c);
                i += 1;
            }
        }
        if chars.get(i) == Some(&'0') {
            if parsed.align.is_none() {
                parsed.fill = '0';
                parsed.align = Some('=');
            }
            i += 1;
        }
        let start = i;
        while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
            i += 1;
        }
        if i > start {
            parsed.width = chars[start..i].iter().collect::<String>().parse().ok()?;
        }
        if chars.get(i) == Some(&',') {
            parsed.grouping = true;
            i += 1;
        }
        if chars.get(i) == Some(&'.') {
            i += 1;
            let start = i;
            while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
                i += 1;
            }
            if i == start {
                return None;
            }
            parsed.precision = Some(chars[start..i].iter().collect::<String>().parse().ok()?);
        }
        if let Some(&c) = chars.get(i) {
            parsed.ty = Some(c);
            i += 1;
        }
        (i == chars.len()).then_some(parsed)
    }

    fn pad(&self, sign: &str, body: &str, default_align: char) -> String {
        let len = sign.chars().count() + body.chars().count();
        if len >= self.width {
            return format!("{sign}{body}");
        }
        let fill = |n: usize| self.fill.to_string().repeat(n);
        let gap = self.width - len;
        match self.align.unwrap_or(default_align) {
            '<' => format!("{sign}{body}{}", fill(gap)),
            '^' => format!("{}{sign}{body}{}", fill(gap / 2), fill(gap - gap / 2)),
            '=' => format!("{sign}{}{body}", fill(gap)),
            _ => format!("{}{sign}{body}", fill(gap)),
        }
    }

    fn sign_of(&self, negative: bool) -> &'static str {
        match (negative, self.sign) {
            (true, _) => "-",
            (false, Some('+')) => "+",
            (false, Some(' ')) => " ",
            _ => "",
        }
    }
}

fn group_thousands(digits: &str) -> String {
    let (int_part, rest) = match digits.find('.') {
        Some(dot) => digits.split_at(dot),
        None => (digits, ""),
    };
    let mut grouped = String::new();
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    grouped + rest
}

/// `{:.Ne}` with a signed two-digit exponent
fn exp_format(f: f64, precision: usize) -> String {
    let text = format!("{f:.precision$e}");
    match text.split_once('e') {
        Some((mantissa, exponent)) => format!("{mantissa}e{}", exponent_suffix(exponent)),
        None => text,
    }
}

fn general_format(f: f64, precision: usize) -> String {
    let precision = precision.max(1);
    if f == 0.0 {
        return "0".to_string();
    }
    let exponent = f.abs().log10().floor() as i64;
    let strip = |text: String| {
        if text.contains('.') {
            text.trim_end_matches('0').trim_end_matches('.').to_string()
        } else {
            text
        }
    };
    if exponent >= -4 && exponent < precision as i64 {
        let decimals = (precision as i64 - 1 - exponent).max(0) as usize;
        strip(format!("{f:.decimals$}"))
    } else {
        let text = exp_format(f, precision - 1);
        match text.split_once('e') {
            Some((mantissa, exponent)) => format!("{}e{}", strip(mantissa.to_string()), exponent),
            None => text,
        }
    }
}

fn format_float_spec(f: f64, spec: &FormatSpec, ty: Option<char>) -> Option<String> {
    let negative = f < 0.0;
    let magnitude = f.abs();
    let precision = spec.precision.unwrap_or(6);
    let body = match ty {
        Some('f') | Some('F') => format!("{magnitude:.precision$}"),
        Some('e') => exp_format(magnitude, precision),
        Some('%') => format!("{:.precision$}%", magnitude * 100.0),
        Some('g') => general_format(magnitude, precision),
        None => match spec.precision {
            Some(precision) => general_format(magnitude, precision),
            None => float_repr(magnitude),
        },
        _ => return None,
    };
    let body = if spec.grouping { group_thousands(&body) } else { body };
    Some(spec.pad(spec.sign_of(negative), &body, '>'))
}

fn format_int_spec(i: i64, spec: &FormatSpec) -> Option<String> {
    let magnitude = i.unsigned_abs();
    let body = match spec.ty {
        None | Some('d') | Some('n') => magnitude.to_string(),
        Some('x') => format!("{magnitude:x}"),
        Some('X') => format!("{magnitude:X}"),
        Some('o') => format!("{magnitude:o}"),
        Some('b') => format!("{magnitude:b}"),
        Some('f' | 'F' | 'e' | '%' | 'g') => return format_float_spec(i as f64, spec, spec.ty),
        Some('c') => char::from_u32(i as u32)?.to_string(),
        _ => return None,
    };
    let body = if spec.grouping { group_thousands(&body) } else { body };
    Some(spec.pad(spec.sign_of(i < 0), &body, '>'))
}

impl Interpreter {
    /// A user-defined method of an instance's class, bound to it
    pub(crate) fn user_method(&self, value: &Value, name: &str) -> Option<Value> {
        let Value::Instance(instance) = value else {
            return None;
        };
        let method = instance.class.lookup(name)?;
        matches!(method, Value::Function(_) | Value::Traced(_)).then(|| {
            Value::BoundMethod(Rc::new(super::value::BoundMethod {
                receiver: value.clone(),
                func: method,
            }))
        })
    }

    fn call_user_method(&mut self, value: &Value, name: &str, args: Vec<Value>) -> Option<RtResult<Value>> {
        let method = self.user_method(value, name)?;
        Some(self.call(&method, Args::new(args)))
    }

    pub fn repr(&mut self, value: &Value) -> RtResult<String> {
        if let Some(id) = value.identity() {
            if self.repr_active.contains(&id) {
                return Ok(match value {
                    Value::List(_) => "[...]",
                    Value::Dict(_) => "{...}",
                    _ => "...",
                }
                .to_string());
            }
        }
        match value {
            Value::List(_) | Value::Tuple(_) | Value::Dict(_) => {
                let id = value.identity().unwrap_or(0);
                self.repr_active.push(id);
                let result = self.container_repr(value);
                self.repr_active.pop();
                result
            }
            Value::Instance(_) => match self.call_user_method(value, "__repr__", vec![]) {
                Some(result) => self.expect_str(result?, "__repr__"),
                None => Ok(basic_repr(value)),
            },
            _ => Ok(basic_repr(value)),
        }
    }

    fn container_repr(&mut self, value: &Value) -> RtResult<String> {
        let mut reprs = Vec::new();
        match value {
            Value::List(items) => {
                let items = items.borrow().clone();
                for item in &items {
                    reprs.push(self.repr(item)?);
                }
                Ok(format!("[{}]", reprs.join(", ")))
            }
            Value::Tuple(items) => {
                for item in items.iter() {
                    reprs.push(self.repr(item)?);
                }
                Ok(match reprs.as_slice() {
                    [single] => format!("({single},)"),
                    _ => format!("({})", reprs.join(", ")),
                })
            }
            Value::Dict(dict) => {
                let items = dict.borrow().items();
                for (key, item) in &items {
                    reprs.push(format!("{}: {}", self.repr(key)?, self.repr(item)?));
                }
                Ok(format!("{{{}}}", reprs.join(", ")))
            }
            other => Ok(basic_repr(other)),
        }
    }

    fn expect_str(&self, value: Value, method: &str) -> RtResult<String> {
        match value {
            Value::Str(s) => Ok(s.to_string()),
            other => Err(self.error(
                ExcKind::TypeError,
                format!("{method} returned non-string (type {})", other.type_name()),
            )),
        }
    }

    pub fn str(&mut self, value: &Value) -> RtResult<String> {
        match value {
            Value::Str(s) => Ok(s.to_string()),
            Value::Instance(_) => {
                if let Some(result) = self.call_user_method(value, "__str__", vec![]) {
                    return self.expect_str(result?, "__str__");
                }
                if exception_args(value).is_some() {
                    return Ok(basic_str(value));
                }
                self.repr(value)
            }
            other => self.repr(other),
        }
    }

    pub(crate) fn hash_key(&self, value: &Value) -> RtResult<Key> {
        Key::from_value(value).ok_or_else(|| {
            self.error(ExcKind::TypeError, format!("unhashable type: '{}'", value.type_name()))
        })
    }

    /// Items of an iterable, materialized
    pub fn iterate(&mut self, value: &Value) -> RtResult<Vec<Value>> {
        Ok(match value {
            Value::List(items) => items.borrow().clone(),
            Value::Tuple(items) => items.to_vec(),
            Value::Str(s) => s.chars().map(|c| Value::str(c.to_string())).collect(),
            Value::Dict(dict) => dict.borrow().keys(),
            Value::Range(range) => (0..range.len()).filter_map(|i| range.get(i)).map(Value::Int).collect(),
            Value::Instance(_) if self.user_method(value, "__iter__").is_some() => {
                let iterable = self
                    .call_user_method(value, "__iter__", vec![])
                    .unwrap_or(Ok(Value::None))?;
                return self.iterate(&iterable);
            }
            other => {
                return Err(self.error(
                    ExcKind::TypeError,
                    format!("'{}' object is not iterable", other.type_name()),
                ))
            }
        })
    }

    pub fn len_of(&mut self, value: &Value) -> RtResult<usize> {
        Ok(match value {
            Value::Str(s) => s.chars().count(),
            Value::List(items) => items.borrow().len(),
            Value::Tuple(items) => items.len(),
            Value::Dict(dict) => dict.borrow().len(),
            Value::Range(range) => range.len(),
            Value::Instance(_) => match self.call_user_method(value, "__len__", vec![]) {
                Some(result) => match result? {
                    Value::Int(n) if n >= 0 => n as usize,
                    _ => return Err(self.error(ExcKind::TypeError, "__len__() should return a non-negative int")),
                },
                None => {
                    return Err(self.error(
                        ExcKind::TypeError,
                        format!("object of type '{}' has no len()", value.type_name()),
                    ))
                }
            },
            other => {
                return Err(self.error(
                    ExcKind::TypeError,
                    format!("object of type '{}' has no len()", other.type_name()),
                ))
            }
        })
    }

    pub fn binary_op(&mut self, op: BinOp, left: &Value, right: &Value) -> RtResult<Value> {
        if let Some(result) = self.call_user_method(left, dunder(op), vec![right.clone()]) {
            return result;
        }
        let unsupported = || {
            format!(
                "unsupported operand type(s) for {}: '{}' and '{}'",
                op.symbol(),
                left.type_name(),
                right.type_name()
            )
        };
        let overflow = || self.error(ExcKind::OverflowError, "integer overflow");
        let zero = || self.error(ExcKind::ZeroDivisionError, "division by zero");

        match (left, right) {
            (Value::Int(_) | Value::Bool(_), Value::Int(_) | Value::Bool(_)) => {
                let (a, b) = (left.as_int().unwrap_or(0), right.as_int().unwrap_or(0));
                Ok(match op {
                    BinOp::Add => Value::Int(a.checked_add(b).ok_or_else(overflow)?),
                    BinOp::Sub => Value::Int(a.checked_sub(b).ok_or_else(overflow)?),
                    BinOp::Mult => Value::Int(a.checked_mul(b).ok_or_else(overflow)?),
                    BinOp::Div if b == 0 => return Err(zero()),
                    BinOp::Div => Value::Float(a as f64 / b as f64),
                    BinOp::FloorDiv if b == 0 => return Err(zero()),
                    BinOp::FloorDiv => Value::Int(floor_div(a, b).ok_or_else(overflow)?),
                    BinOp::Mod if b == 0 => return Err(zero()),
                    BinOp::Mod => Value::Int(floor_mod(a, b).ok_or_else(overflow)?),
                    BinOp::Pow if b < 0 => {
                        if a == 0 {
                            return Err(self.error(
                                ExcKind::ZeroDivisionError,
                                "0.0 cannot be raised to a negative power",
                            ));
                        }
                        Value::Float((a as f64).powf(b as f64))
                    }
                    BinOp::Pow => {
                        let exp = u32::try_from(b).map_err(|_| overflow())?;
                        Value::Int(a.checked_pow(exp).ok_or_else(overflow)?)
                    }
                })
            }
            (Value::Int(_) | Value::Bool(_) | Value::Float(_), Value::Int(_) | Value::Bool(_) | Value::Float(_)) => {
                let (a, b) = (left.as_number().unwrap_or(0.0), right.as_number().unwrap_or(0.0));
                Ok(Value::Float(match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mult => a * b,
                    BinOp::Div | BinOp::FloorDiv | BinOp::Mod if b == 0.0 => return Err(zero()),
                    BinOp::Div => a / b,
                    BinOp::FloorDiv => (a / b).floor(),
                    BinOp::Mod => float_mod(a, b),
                    BinOp::Pow if a == 0.0 && b < 0.0 => {
                        return Err(self.error(
                            ExcKind::ZeroDivisionError,
                            "0.0 cannot be raised to a negative power",
                        ))
                    }
                    BinOp::Pow => a.powf(b),
                }))
            }
            (Value::Str(a), Value::Str(b)) if op == BinOp::Add => Ok(Value::str(format!("{a}{b}"))),
            (Value::Str(s), Value::Int(n)) | (Value::Int(n), Value::Str(s)) if op == BinOp::Mult => {
                Ok(Value::str(s.repeat((*n).max(0) as usize)))
            }
            (Value::Str(format), args) if op == BinOp::Mod => {
                let format = format.clone();
                self.percent_format(&format, args).map(Value::str)
            }
            (Value::List(a), Value::List(b)) if op == BinOp::Add => {
                let mut items = a.borrow().clone();
                items.extend(b.borrow().iter().cloned());
                Ok(Value::list(items))
            }
            (Value::Tuple(a), Value::Tuple(b)) if op == BinOp::Add => {
                Ok(Value::tuple(a.iter().chain(b.iter()).cloned().collect()))
            }
            (Value::List(items), Value::Int(n)) | (Value::Int(n), Value::List(items)) if op == BinOp::Mult => {
                let items = items.borrow();
                Ok(Value::list(repeat_items(&items, *n)))
            }
            (Value::Tuple(items), Value::Int(n)) | (Value::Int(n), Value::Tuple(items)) if op == BinOp::Mult => {
                Ok(Value::tuple(repeat_items(items, *n)))
            }
            _ => Err(self.error(ExcKind::TypeError, unsupported())),
        }
    }

    pub fn unary_op(&mut self, op: UnaryOp, operand: &Value) -> RtResult<Value> {
        match (op, operand) {
            (UnaryOp::Not, value) => Ok(Value::Bool(!self.truthy(value)?)),
            (UnaryOp::Neg, Value::Int(_) | Value::Bool(_)) => operand
                .as_int()
                .and_then(i64::checked_neg)
                .map(Value::Int)
                .ok_or_else(|| self.error(ExcKind::OverflowError, "integer overflow")),
            (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
            (UnaryOp::Pos, Value::Int(_) | Value::Bool(_)) => Ok(Value::Int(operand.as_int().unwrap_or(0))),
            (UnaryOp::Pos, Value::Float(f)) => Ok(Value::Float(*f)),
            (_, value) => {
                let name = if op == UnaryOp::Neg { "__neg__" } else { "__pos__" };
                if let Some(result) = self.call_user_method(value, name, vec![]) {
                    return result;
                }
                let symbol = if op == UnaryOp::Neg { "-" } else { "+" };
                Err(self.error(
                    ExcKind::TypeError,
                    format!("bad operand type for unary {symbol}: '{}'", value.type_name()),
                ))
            }
        }
    }

    /// Truthiness, honoring `__bool__` and `__len__`
    pub fn truthy(&mut self, value: &Value) -> RtResult<bool> {
        if let Value::Instance(_) = value {
            if let Some(result) = self.call_user_method(value, "__bool__", vec![]) {
                return Ok(result?.truthy());
            }
            if self.user_method(value, "__len__").is_some() {
                return Ok(self.len_of(value)? > 0);
            }
        }
        Ok(value.truthy())
    }

    pub fn equals(&mut self, left: &Value, right: &Value) -> RtResult<bool> {
        if let Some(result) = self.call_user_method(left, "__eq__", vec![right.clone()]) {
            return Ok(result?.truthy());
        }
        Ok(left.equals(right))
    }

    pub fn compare(&mut self, op: CmpOp, left: &Value, right: &Value) -> RtResult<bool> {
        match op {
            CmpOp::Is => return Ok(left.is(right)),
            CmpOp::IsNot => return Ok(!left.is(right)),
            CmpOp::In => return self.contains(right, left),
            CmpOp::NotIn => return Ok(!self.contains(right, left)?),
            CmpOp::Eq => return self.equals(left, right),
            CmpOp::NotEq => {
                if let Some(result) = self.call_user_method(left, "__ne__", vec![right.clone()]) {
                    return Ok(result?.truthy());
                }
                return Ok(!self.equals(left, right)?);
            }
            _ => {}
        }
        if let Some(name) = compare_dunder(op) {
            if let Some(result) = self.call_user_method(left, name, vec![right.clone()]) {
                return Ok(result?.truthy());
            }
        }
        let ordering = self.order(left, right, op.symbol())?;
        Ok(match ordering {
            None => false,
            Some(ordering) => match op {
                CmpOp::Lt => ordering == Ordering::Less,
                CmpOp::LtE => ordering != Ordering::Greater,
                CmpOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            },
        })
    }

    /// Ordering of two values; `Ok(None)` for unordered floats (NaN)
    pub fn order(&mut self, left: &Value, right: &Value, symbol: &str) -> RtResult<Option<Ordering>> {
        match (left, right) {
            (Value::Int(_) | Value::Bool(_), Value::Int(_) | Value::Bool(_)) => {
                Ok(Some(left.as_int().cmp(&right.as_int())))
            }
            (Value::Int(_) | Value::Bool(_) | Value::Float(_), Value::Int(_) | Value::Bool(_) | Value::Float(_)) => {
                Ok(left.as_number().partial_cmp(&right.as_number()))
            }
            (Value::Str(a), Value::Str(b)) => Ok(Some(a.cmp(b))),
            (Value::List(a), Value::List(b)) => {
                let (a, b) = (a.borrow().clone(), b.borrow().clone());
                self.order_sequences(&a, &b, symbol)
            }
            (Value::Tuple(a), Value::Tuple(b)) => {
                let (a, b) = (a.clone(), b.clone());
                self.order_sequences(&a, &b, symbol)
            }
            (Value::Instance(_), _) if self.user_method(left, "__lt__").is_some() => {
                if self.compare(CmpOp::Lt, left, right)? {
                    Ok(Some(Ordering::Less))
                } else if self.compare(CmpOp::Lt, right, left)? {
                    Ok(Some(Ordering::Greater))
                } else {
                    Ok(Some(Ordering::Equal))
                }
            }
            _ => Err(self.error(
                ExcKind::TypeError,
                format!(
                    "'{}' not supported between instances of '{}' and '{}'",
                    symbol,
                    left.type_name(),
                    right.type_name()
                ),
            )),
        }
    }

    fn order_sequences(&mut self, a: &[Value], b: &[Value], symbol: &str) -> RtResult<Option<Ordering>> {
        for (x, y) in a.iter().zip(b) {
            if !self.equals(x, y)? {
                return self.order(x, y, symbol);
            }
        }
        Ok(Some(a.len().cmp(&b.len())))
    }

    pub fn contains(&mut self, container: &Value, item: &Value) -> RtResult<bool> {
        match container {
            Value::Str(haystack) => match item {
                Value::Str(needle) => Ok(haystack.contains(needle.as_ref())),
                other => Err(self.error(
                    ExcKind::TypeError,
                    format!("'in <string>' requires string as left operand, not {}", other.type_name()),
                )),
            },
            Value::List(_) | Value::Tuple(_) => {
                let items = self.iterate(container)?;
                for candidate in &items {
                    if self.equals(candidate, item)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Value::Dict(dict) => {
                let key = self.hash_key(item)?;
                Ok(dict.borrow().get(&key).is_some())
            }
            Value::Range(range) => Ok(match item.as_int() {
                Some(n) => range_contains(range, n),
                None => false,
            }),
            Value::Instance(_) => match self.call_user_method(container, "__contains__", vec![item.clone()]) {
                Some(result) => Ok(result?.truthy()),
                None => {
                    let items = self.iterate(container)?;
                    Ok(items.iter().any(|candidate| candidate.equals(item)))
                }
            },
            other => Err(self.error(
                ExcKind::TypeError,
                format!("argument of type '{}' is not iterable", other.type_name()),
            )),
        }
    }

    fn sequence_index(&self, index: &Value, len: usize, kind: &str) -> RtResult<usize> {
        let Some(i) = index.as_int() else {
            return Err(self.error(
                ExcKind::TypeError,
                format!("{kind} indices must be integers or slices, not {}", index.type_name()),
            ));
        };
        normalize_index(i, len).ok_or_else(|| self.error(ExcKind::IndexError, format!("{kind} index out of range")))
    }

    pub fn get_item(&mut self, container: &Value, index: &Value) -> RtResult<Value> {
        match container {
            Value::List(items) => {
                let items = items.borrow();
                let i = self.sequence_index(index, items.len(), "list")?;
                Ok(items[i].clone())
            }
            Value::Tuple(items) => {
                let i = self.sequence_index(index, items.len(), "tuple")?;
                Ok(items[i].clone())
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let i = self.sequence_index(index, chars.len(), "string")?;
                Ok(Value::str(chars[i].to_string()))
            }
            Value::Range(range) => {
                let i = self.sequence_index(index, range.len(), "range object")?;
                Ok(Value::Int(range.get(i).unwrap_or(0)))
            }
            Value::Dict(dict) => {
                let key = self.hash_key(index)?;
                let found = dict.borrow().get(&key).cloned();
                found.ok_or_else(|| self.key_error(index))
            }
            Value::Instance(_) => match self.call_user_method(container, "__getitem__", vec![index.clone()]) {
                Some(result) => result,
                None => Err(self.not_subscriptable(container)),
            },
            other => Err(self.not_subscriptable(other)),
        }
    }

    fn not_subscriptable(&self, value: &Value) -> super::RuntimeError {
        self.error(
            ExcKind::TypeError,
            format!("'{}' object is not subscriptable", value.type_name()),
        )
    }

    /// `KeyError` carrying the key itself as its argument
    pub(crate) fn key_error(&self, key: &Value) -> super::RuntimeError {
        let error = self.error(ExcKind::KeyError, "");
        if let super::RuntimeError::Raised(exc) = &error {
            exc.value
                .dict
                .borrow_mut()
                .insert("args".to_string(), Value::tuple(vec![key.clone()]));
        }
        error
    }

    pub fn get_slice(&mut self, container: &Value, lower: Option<i64>, upper: Option<i64>, step: Option<i64>) -> RtResult<Value> {
        let step = step.unwrap_or(1);
        if step == 0 {
            return Err(self.error(ExcKind::ValueError, "slice step cannot be zero"));
        }
        match container {
            Value::List(items) => {
                let items = items.borrow();
                let picked = slice_indices(items.len(), lower, upper, step);
                Ok(Value::list(picked.into_iter().map(|i| items[i].clone()).collect()))
            }
            Value::Tuple(items) => {
                let picked = slice_indices(items.len(), lower, upper, step);
                Ok(Value::tuple(picked.into_iter().map(|i| items[i].clone()).collect()))
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let picked = slice_indices(chars.len(), lower, upper, step);
                Ok(Value::str(picked.into_iter().map(|i| chars[i]).collect::<String>()))
            }
            Value::Range(range) => {
                let picked = slice_indices(range.len(), lower, upper, step);
                Ok(Value::list(
                    picked.into_iter().filter_map(|i| range.get(i)).map(Value::Int).collect(),
                ))
            }
            other => Err(self.not_subscriptable(other)),
        }
    }

    pub fn set_item(&mut self, container: &Value, index: &Value, value: Value) -> RtResult<()> {
        match container {
            Value::List(items) => {
                let len = items.borrow().len();
                let i = self
                    .sequence_index(index, len, "list")
                    .map_err(|_| self.error(ExcKind::IndexError, "list assignment index out of range"))?;
                items.borrow_mut()[i] = value;
                Ok(())
            }
            Value::Dict(dict) => {
                let key = self.hash_key(index)?;
                dict.borrow_mut().insert(key, index.clone(), value);
                Ok(())
            }
            Value::Instance(_) => match self.call_user_method(container, "__setitem__", vec![index.clone(), value]) {
                Some(result) => result.map(|_| ()),
                None => Err(self.error(
                    ExcKind::TypeError,
                    format!("'{}' object does not support item assignment", container.type_name()),
                )),
            },
            other => Err(self.error(
                ExcKind::TypeError,
                format!("'{}' object does not support item assignment", other.type_name()),
            )),
        }
    }

    pub fn del_item(&mut self, container: &Value, index: &Value) -> RtResult<()> {
        match container {
            Value::List(items) => {
                let len = items.borrow().len();
                let i = self
                    .sequence_index(index, len, "list")
                    .map_err(|_| self.error(ExcKind::IndexError, "list assignment index out of range"))?;
                items.borrow_mut().remove(i);
                Ok(())
            }
            Value::Dict(dict) => {
                let key = self.hash_key(index)?;
                let removed = dict.borrow_mut().remove(&key);
                removed.map(|_| ()).ok_or_else(|| self.key_error(index))
            }
            other => Err(self.error(
                ExcKind::TypeError,
                format!("'{}' object doesn't support item deletion", other.type_name()),
            )),
        }
    }

    /// `format(value, spec)`
    pub fn format_value(&mut self, value: &Value, spec: &str) -> RtResult<String> {
        if spec.is_empty() {
            return self.str(value);
        }
        let invalid = || self.error(ExcKind::ValueError, format!("Invalid format specifier '{spec}'"));
        let parsed = FormatSpec::parse(spec).ok_or_else(invalid)?;
        let rendered = match value {
            Value::Int(i) => format_int_spec(*i, &parsed),
            Value::Bool(b) if parsed.ty.is_some() => format_int_spec(*b as i64, &parsed),
            Value::Float(f) => match parsed.ty {
                Some('d' | 'x' | 'X' | 'o' | 'b' | 'c') => None,
                ty => format_float_spec(*f, &parsed, ty),
            },
            other => {
                if !matches!(parsed.ty, None | Some('s')) {
                    None
                } else {
                    let text = self.str(other)?;
                    let text: String = match parsed.precision {
                        Some(p) => text.chars().take(p).collect(),
                        None => text,
                    };
                    Some(parsed.pad("", &text, '<'))
                }
            }
        };
        rendered.ok_or_else(|| {
            self.error(
                ExcKind::ValueError,
                format!(
                    "Unknown format code '{}' for object of type '{}'",
                    parsed.ty.unwrap_or('s'),
                    value.type_name()
                ),
            )
        })
    }

    /// printf-style `format % args`
    fn percent_format(&mut self, format: &str, args: &Value) -> RtResult<String> {
        let mut values: Vec<Value> = match args {
            Value::Tuple(items) => items.to_vec(),
            other => vec![other.clone()],
        };
        values.reverse();
        let mut out = String::new();
        let mut chars = format.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            let mut spec = String::new();
            while let Some(&next) = chars.peek() {
                if next.is_ascii_digit() || matches!(next, '.' | '-' | '+' | ' ') {
                    spec.push(next);
                    chars.next();
                } else {
                    break;
                }
            }
            let Some(conversion) = chars.next() else {
                return Err(self.error(ExcKind::ValueError, "incomplete format"));
            };
            if conversion == '%' {
                out.push('%');
                continue;
            }
            let Some(value) = values.pop() else {
                return Err(self.error(ExcKind::TypeError, "not enough arguments for format string"));
            };
            let spec = spec.replacen('-', "<", 1);
            let text = match conversion {
                's' => {
                    let text = self.str(&value)?;
                    self.format_value(&Value::str(text), &spec)?
                }
                'r' => {
                    let text = self.repr(&value)?;
                    self.format_value(&Value::str(text), &spec)?
                }
                'd' | 'i' => {
                    let int = match value {
                        Value::Float(f) => Value::Int(f.trunc() as i64),
                        other => other,
                    };
                    self.format_value(&int, &format!("{spec}d"))?
                }
                'f' | 'e' | 'g' | 'x' | 'o' => self.format_value(&value, &format!("{spec}{conversion}"))?,
                other => {
                    return Err(self.error(
                        ExcKind::ValueError,
                        format!("unsupported format character '{other}'"),
                    ))
                }
            };
            out.push_str(&text);
        }
        if !values.is_empty() {
            return Err(self.error(
                ExcKind::TypeError,
                "not all arguments converted during string formatting",
            ));
        }
        Ok(out)
    }

    /// Build a dict from `(key, value)` pairs
    pub(crate) fn dict_from_pairs(&mut self, pairs: Vec<(Value, Value)>) -> RtResult<Dict> {
        let mut dict = Dict::new();
        for (key, value) in pairs {
            let hashed = self.hash_key(&key)?;
            dict.insert(hashed, key, value);
        }
        Ok(dict)
    }
}

fn range_contains(range: &Range, n: i64) -> bool {
    let offset = n as i128 - range.start as i128;
    let in_bounds = if range.step > 0 {
        n >= range.start && n < range.stop
    } else {
        n <= range.start && n > range.stop
    };
    in_bounds && offset % range.step as i128 == 0
}

fn repeat_items(items: &[Value], n: i64) -> Vec<Value> {
    let mut out = Vec::with_capacity(items.len() * n.max(0) as usize);
    for _ in 0..n.max(0) {
        out.extend(items.iter().cloned());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::InterpreterConfig;
    use pretty_assertions::assert_eq;

    fn interp() -> Interpreter {
        Interpreter::with_output(
            InterpreterConfig::default(),
            super::super::io::SharedBuffer::new().sink(),
            super::super::io::SharedBuffer::new().sink(),
        )
    }

    #[test]
    fn test_float_repr() {
        assert_eq!(float_repr(1.0), "1.0");
        assert_eq!(float_repr(0.1), "0.1");
        assert_eq!(float_repr(2.5), "2.5");
        assert_eq!(float_repr(1e16), "1e+16");
        assert_eq!(float_repr(1.5e-5), "1.5e-05");
        assert_eq!(float_repr(-0.0001), "-0.0001");
        assert_eq!(float_repr(f64::INFINITY), "inf");
    }

    #[test]
    fn test_floor_semantics() {
        let mut interp = interp();
        let floor = interp.binary_op(BinOp::FloorDiv, &Value::Int(-7), &Value::Int(2)).unwrap();
        assert!(floor.equals(&Value::Int(-4)));
        let modulo = interp.binary_op(BinOp::Mod, &Value::Int(-7), &Value::Int(2)).unwrap();
        assert!(modulo.equals(&Value::Int(1)));
        let modulo = interp.binary_op(BinOp::Mod, &Value::Int(7), &Value::Int(-2)).unwrap();
        assert!(modulo.equals(&Value::Int(-1)));
        let div = interp.binary_op(BinOp::Div, &Value::Int(7), &Value::Int(2)).unwrap();
        assert!(div.equals(&Value::Float(3.5)));
        let pow = interp.binary_op(BinOp::Pow, &Value::Int(2), &Value::Int(-1)).unwrap();
        assert!(pow.equals(&Value::Float(0.5)));
    }

    #[test]
    fn test_division_by_zero_and_overflow() {
        let mut interp = interp();
        let err = interp.binary_op(BinOp::Div, &Value::Int(1), &Value::Int(0)).unwrap_err();
        assert_eq!(err.to_string(), "ZeroDivisionError: division by zero");
        let err = interp
            .binary_op(BinOp::Mult, &Value::Int(i64::MAX), &Value::Int(2))
            .unwrap_err();
        assert_eq!(err.exception().unwrap().class_name(), "OverflowError");
    }

    #[test]
    fn test_unsupported_operands() {
        let mut interp = interp();
        let err = interp.binary_op(BinOp::Add, &Value::Int(1), &Value::str("a")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "TypeError: unsupported operand type(s) for +: 'int' and 'str'"
        );
    }

    #[test]
    fn test_container_reprs() {
        let mut interp = interp();
        let value = Value::list(vec![
            Value::Int(1),
            Value::str("a"),
            Value::tuple(vec![Value::None]),
            Value::Float(2.0),
        ]);
        assert_eq!(interp.repr(&value).unwrap(), "[1, 'a', (None,), 2.0]");

        let cyclic = Value::list(vec![]);
        if let Value::List(items) = &cyclic {
            items.borrow_mut().push(cyclic.clone());
        }
        assert_eq!(interp.repr(&cyclic).unwrap(), "[[...]]");
        if let Value::List(items) = &cyclic {
            items.borrow_mut().clear();
        }
    }

    #[test]
    fn test_format_specs() {
        let mut interp = interp();
        let cases = [
            (Value::Int(42), ">5", "   42"),
            (Value::Int(42), "05d", "00042"),
            (Value::Int(-42), "06d", "-00042"),
            (Value::Int(1234567), ",", "1,234,567"),
            (Value::Int(255), "x", "ff"),
            (Value::Int(5), "b", "101"),
            (Value::Float(3.14159), ".2f", "3.14"),
            (Value::Float(0.25), ".1%", "25.0%"),
            (Value::Float(1234.5), "e", "1.234500e+03"),
            (Value::Float(0.0001234), "g", "0.0001234"),
            (Value::Float(1234567.0), "g", "1.23457e+06"),
            (Value::Int(3), "+d", "+3"),
            (Value::str("ab"), "*^6", "**ab**"),
            (Value::str("abcdef"), ".3", "abc"),
            (Value::str("x"), "<3", "x  "),
        ];
        for (value, spec, expected) in cases {
            assert_eq!(interp.format_value(&value, spec).unwrap(), expected, "spec {spec:?}");
        }
        assert!(interp.format_value(&Value::str("x"), "d").is_err());
    }

    #[test]
    fn test_percent_format() {
        let mut interp = interp();
        let args = Value::tuple(vec![Value::str("x"), Value::Int(3), Value::Float(1.5)]);
        let text = interp.percent_format("%s=%d (%.2f) 100%%", &args).unwrap();
        assert_eq!(text, "x=3 (1.50) 100%");
    }

    #[test]
    fn test_slices() {
        assert_eq!(slice_indices(5, None, None, -1), vec![4, 3, 2, 1, 0]);
        assert_eq!(slice_indices(5, Some(1), Some(-1), 1), vec![1, 2, 3]);
        assert_eq!(slice_indices(5, Some(-2), None, 1), vec![3, 4]);
        assert_eq!(slice_indices(5, None, None, 2), vec![0, 2, 4]);
        assert!(slice_indices(3, Some(10), None, 1).is_empty());
    }

    #[test]
    fn test_membership() {
        let mut interp = interp();
        let range = Value::Range(Range { start: 0, stop: 10, step: 3 });
        assert!(interp.contains(&range, &Value::Int(9)).unwrap());
        assert!(!interp.contains(&range, &Value::Int(4)).unwrap());
        assert!(interp.contains(&Value::str("hello"), &Value::str("ell")).unwrap());
        assert!(interp.contains(&Value::Int(1), &Value::Int(1)).is_err());
    }
}
