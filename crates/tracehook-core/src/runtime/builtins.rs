//! Builtin functions, methods of the builtin types, and the native `sys`
//! and `math` modules.

use std::cmp::Ordering;
use std::rc::Rc;

use super::exceptions::{ExcKind, RuntimeError};
use super::value::{Args, Builtin, BuiltinFn, Class, Dict, Key, ModuleObject, Range, Value};
use super::{io, Interpreter, InterpreterConfig, RtResult, VERSION_STRING};

/// Modules implemented natively rather than loaded from source
pub const BUILTIN_MODULES: &[&str] = &["sys", "math"];

/// One class per [`ExcKind`], parents first
pub fn exception_classes() -> Vec<Rc<Class>> {
    let mut classes: Vec<Rc<Class>> = Vec::with_capacity(ExcKind::ALL.len());
    for kind in ExcKind::ALL {
        let bases = kind
            .parent()
            .map(|parent| vec![classes[parent.index()].clone()])
            .unwrap_or_default();
        classes.push(Rc::new(Class::new(kind.name(), "builtins", bases)));
    }
    classes
}

fn builtin(name: &str, func: BuiltinFn) -> Value {
    Value::Builtin(Rc::new(Builtin::new(name, func)))
}

pub(crate) fn install(namespace: &Rc<ModuleObject>, exc_classes: &[Rc<Class>]) {
    let functions: &[(&str, BuiltinFn)] = &[
        ("print", builtin_print),
        ("len", builtin_len),
        ("range", builtin_range),
        ("str", builtin_str),
        ("repr", builtin_repr),
        ("int", builtin_int),
        ("float", builtin_float),
        ("bool", builtin_bool),
        ("list", builtin_list),
        ("tuple", builtin_tuple),
        ("dict", builtin_dict),
        ("type", builtin_type),
        ("isinstance", builtin_isinstance),
        ("abs", builtin_abs),
        ("min", builtin_min),
        ("max", builtin_max),
        ("sum", builtin_sum),
        ("sorted", builtin_sorted),
        ("reversed", builtin_reversed),
        ("enumerate", builtin_enumerate),
        ("zip", builtin_zip),
        ("any", builtin_any),
        ("all", builtin_all),
        ("round", builtin_round),
        ("chr", builtin_chr),
        ("ord", builtin_ord),
        ("format", builtin_format),
        ("callable", builtin_callable),
        ("id", builtin_id),
        ("hasattr", builtin_hasattr),
        ("getattr", builtin_getattr),
        ("setattr", builtin_setattr),
    ];
    for (name, func) in functions {
        namespace.set(*name, builtin(name, *func));
    }
    for class in exc_classes {
        namespace.set(class.name.clone(), Value::Class(class.clone()));
    }
}

pub(crate) fn init_sys(sys: &Rc<ModuleObject>, config: &InterpreterConfig) {
    let strings = |items: Vec<String>| Value::list(items.into_iter().map(Value::str).collect());
    sys.set("argv", strings(config.argv.clone()));
    sys.set(
        "path",
        strings(config.path.iter().map(|p| p.to_string_lossy().into_owned()).collect()),
    );
    let prefix = config.prefix.to_string_lossy().into_owned();
    sys.set("prefix", Value::str(&prefix));
    sys.set("base_prefix", Value::str(&prefix));
    sys.set("version", Value::str(VERSION_STRING));
    sys.set("platform", Value::str(std::env::consts::OS));
    sys.set("dont_write_bytecode", Value::Bool(config.dont_write_bytecode));
    sys.set("exit", builtin("exit", sys_exit));
}

/// Fresh instance of a native module, `None` for unknown names
pub(crate) fn create_module(interp: &Interpreter, name: &str) -> Option<Rc<ModuleObject>> {
    match name {
        "sys" => Some(interp.sys_module().clone()),
        "math" => {
            let math = ModuleObject::new("math");
            math.set("pi", Value::Float(std::f64::consts::PI));
            math.set("e", Value::Float(std::f64::consts::E));
            math.set("inf", Value::Float(f64::INFINITY));
            math.set("sqrt", builtin("sqrt", math_sqrt));
            math.set("floor", builtin("floor", math_floor));
            math.set("ceil", builtin("ceil", math_ceil));
            math.set("fabs", builtin("fabs", math_fabs));
            math.set("log", builtin("log", math_log));
            Some(math)
        }
        _ => None,
    }
}

/// Bound builtin method `name` of a builtin-typed `receiver`
pub(crate) fn method(receiver: &Value, name: &str) -> Option<Value> {
    let func: BuiltinFn = match receiver {
        Value::Str(_) => match name {
            "upper" => str_upper,
            "lower" => str_lower,
            "strip" => str_strip,
            "lstrip" => str_lstrip,
            "rstrip" => str_rstrip,
            "split" => str_split,
            "join" => str_join,
            "replace" => str_replace,
            "startswith" => str_startswith,
            "endswith" => str_endswith,
            "find" => str_find,
            "count" => str_count,
            "isdigit" => str_isdigit,
            "isalpha" => str_isalpha,
            "isspace" => str_isspace,
            "format" => str_format,
            _ => return None,
        },
        Value::List(_) => match name {
            "append" => list_append,
            "extend" => list_extend,
            "pop" => list_pop,
            "insert" => list_insert,
            "remove" => list_remove,
            "index" => list_index,
            "count" => list_count,
            "sort" => list_sort,
            "reverse" => list_reverse,
            "copy" => list_copy,
            "clear" => list_clear,
            _ => return None,
        },
        Value::Dict(_) => match name {
            "get" => dict_get,
            "keys" => dict_keys,
            "values" => dict_values,
            "items" => dict_items,
            "pop" => dict_pop,
            "update" => dict_update,
            "setdefault" => dict_setdefault,
            "copy" => dict_copy,
            "clear" => dict_clear,
            _ => return None,
        },
        _ => return None,
    };
    Some(Value::Builtin(Rc::new(Builtin::bound(name, func, receiver.clone()))))
}

// -- argument helpers --

fn arity(interp: &Interpreter, name: &str, args: &Args, min: usize, max: usize) -> RtResult<()> {
    let n = args.positional.len();
    if (min..=max).contains(&n) {
        return Ok(());
    }
    let plural = |count: usize| if count == 1 { "" } else { "s" };
    let message = if min == max {
        format!("{name}() takes exactly {min} argument{} ({n} given)", plural(min))
    } else if n < min {
        format!("{name}() expected at least {min} argument{}, got {n}", plural(min))
    } else {
        format!("{name}() expected at most {max} argument{}, got {n}", plural(max))
    };
    Err(interp.error(ExcKind::TypeError, message))
}

fn int_arg(interp: &Interpreter, name: &str, value: &Value) -> RtResult<i64> {
    value.as_int().ok_or_else(|| {
        interp.error(
            ExcKind::TypeError,
            format!("{name}() argument must be int, not '{}'", value.type_name()),
        )
    })
}

fn str_arg(interp: &Interpreter, name: &str, value: &Value) -> RtResult<Rc<str>> {
    match value {
        Value::Str(s) => Ok(s.clone()),
        other => Err(interp.error(
            ExcKind::TypeError,
            format!("{name}() argument must be str, not '{}'", other.type_name()),
        )),
    }
}

fn number_arg(interp: &Interpreter, name: &str, value: &Value) -> RtResult<f64> {
    value.as_number().ok_or_else(|| {
        interp.error(
            ExcKind::TypeError,
            format!("{name}() argument must be a real number, not '{}'", value.type_name()),
        )
    })
}

fn receiver<'a>(interp: &Interpreter, recv: Option<&'a Value>) -> RtResult<&'a Value> {
    recv.ok_or_else(|| interp.error(ExcKind::TypeError, "unbound builtin method"))
}

fn receiver_str(interp: &Interpreter, recv: Option<&Value>) -> RtResult<Rc<str>> {
    match receiver(interp, recv)? {
        Value::Str(s) => Ok(s.clone()),
        _ => Err(interp.error(ExcKind::TypeError, "descriptor requires a 'str' object")),
    }
}

fn receiver_list(interp: &Interpreter, recv: Option<&Value>) -> RtResult<Rc<std::cell::RefCell<Vec<Value>>>> {
    match receiver(interp, recv)? {
        Value::List(items) => Ok(items.clone()),
        _ => Err(interp.error(ExcKind::TypeError, "descriptor requires a 'list' object")),
    }
}

fn receiver_dict(interp: &Interpreter, recv: Option<&Value>) -> RtResult<Rc<std::cell::RefCell<Dict>>> {
    match receiver(interp, recv)? {
        Value::Dict(dict) => Ok(dict.clone()),
        _ => Err(interp.error(ExcKind::TypeError, "descriptor requires a 'dict' object")),
    }
}

/// Stable sort by `key`, optionally reversed
fn sort_values(interp: &mut Interpreter, items: Vec<Value>, key: Option<&Value>, reverse: bool) -> RtResult<Vec<Value>> {
    let keys = match key.filter(|k| !k.is_none()) {
        Some(key) => items
            .iter()
            .map(|item| interp.call(key, Args::new(vec![item.clone()])))
            .collect::<RtResult<Vec<_>>>()?,
        None => items.clone(),
    };
    let mut order: Vec<usize> = (0..items.len()).collect();
    let mut failure = None;
    order.sort_by(|&a, &b| {
        if failure.is_some() {
            return Ordering::Equal;
        }
        let ordering = match interp.order(&keys[a], &keys[b], "<") {
            Ok(ordering) => ordering.unwrap_or(Ordering::Equal),
            Err(err) => {
                failure = Some(err);
                Ordering::Equal
            }
        };
        if reverse {
            ordering.reverse()
        } else {
            ordering
        }
    });
    if let Some(err) = failure {
        return Err(err);
    }
    Ok(order.into_iter().map(|i| items[i].clone()).collect())
}

fn extreme(interp: &mut Interpreter, name: &str, args: Args, wanted: Ordering) -> RtResult<Value> {
    let candidates = match args.positional.as_slice() {
        [] => return Err(interp.error(ExcKind::TypeError, format!("{name} expected at least 1 argument, got 0"))),
        [single] => interp.iterate(single)?,
        many => many.to_vec(),
    };
    let key = args.keyword("key").filter(|k| !k.is_none()).cloned();
    let mut best: Option<(Value, Value)> = None;
    for candidate in candidates {
        let rank = match &key {
            Some(key) => interp.call(key, Args::new(vec![candidate.clone()]))?,
            None => candidate.clone(),
        };
        let replace = match &best {
            None => true,
            Some((best_rank, _)) => interp.order(&rank, best_rank, if wanted == Ordering::Less { "<" } else { ">" })? == Some(wanted),
        };
        if replace {
            best = Some((rank, candidate));
        }
    }
    match best {
        Some((_, value)) => Ok(value),
        None => match args.keyword("default") {
            Some(default) => Ok(default.clone()),
            None => Err(interp.error(ExcKind::ValueError, format!("{name}() arg is an empty sequence"))),
        },
    }
}

// -- builtin functions --

fn builtin_print(interp: &mut Interpreter, _: Option<&Value>, args: Args) -> RtResult<Value> {
    let sep = match args.keyword("sep") {
        Some(Value::None) | None => " ".to_string(),
        Some(value) => interp.str(value)?,
    };
    let end = match args.keyword("end") {
        Some(Value::None) | None => "\n".to_string(),
        Some(value) => interp.str(value)?,
    };
    let mut parts = Vec::with_capacity(args.positional.len());
    for value in &args.positional {
        parts.push(interp.str(value)?);
    }
    let sink = interp.stdout.clone();
    io::emit(&sink, &format!("{}{}", parts.join(&sep), end));
    Ok(Value::None)
}

fn builtin_len(interp: &mut Interpreter, _: Option<&Value>, args: Args) -> RtResult<Value> {
    arity(interp, "len", &args, 1, 1)?;
    Ok(Value::Int(interp.len_of(&args.positional[0])? as i64))
}

fn builtin_range(interp: &mut Interpreter, _: Option<&Value>, args: Args) -> RtResult<Value> {
    arity(interp, "range", &args, 1, 3)?;
    let ints = args
        .positional
        .iter()
        .map(|value| int_arg(interp, "range", value))
        .collect::<RtResult<Vec<_>>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => unreachable!("arity checked"),
    };
    if step == 0 {
        return Err(interp.error(ExcKind::ValueError, "range() arg 3 must not be zero"));
    }
    Ok(Value::Range(Range { start, stop, step }))
}

fn builtin_str(interp: &mut Interpreter, _: Option<&Value>, args: Args) -> RtResult<Value> {
    arity(interp, "str", &args, 0, 1)?;
    match args.positional.first() {
        Some(value) => Ok(Value::str(interp.str(value)?)),
        None => Ok(Value::str("")),
    }
}

fn builtin_repr(interp: &mut Interpreter, _: Option<&Value>, args: Args) -> RtResult<Value> {
    arity(interp, "repr", &args, 1, 1)?;
    Ok(Value::str(interp.repr(&args.positional[0])?))
}

fn builtin_int(interp: &mut Interpreter, _: Option<&Value>, args: Args) -> RtResult<Value> {
    arity(interp, "int", &args, 0, 2)?;
    let base = match args.positional.get(1).or(args.keyword("base")) {
        Some(base) => Some(int_arg(interp, "int", base)?),
        None => None,
    };
    let Some(value) = args.positional.first() else {
        return Ok(Value::Int(0));
    };
    match (value, base) {
        (Value::Int(_) | Value::Bool(_), None) => Ok(Value::Int(value.as_int().unwrap_or(0))),
        (Value::Float(f), None) => {
            if !f.is_finite() {
                return Err(interp.error(
                    ExcKind::OverflowError,
                    "cannot convert float infinity or nan to integer",
                ));
            }
            let truncated = f.trunc();
            if truncated.abs() >= 9.2e18 {
                return Err(interp.error(ExcKind::OverflowError, "integer overflow"));
            }
            Ok(Value::Int(truncated as i64))
        }
        (Value::Str(text), base) => {
            let base = base.unwrap_or(10);
            let cleaned: String = text.trim().chars().filter(|c| *c != '_').collect();
            let (negative, digits) = match cleaned.strip_prefix('-') {
                Some(rest) => (true, rest.to_string()),
                None => (false, cleaned.trim_start_matches('+').to_string()),
            };
            let lower = digits.to_ascii_lowercase();
            let digits = match base {
                16 => lower.strip_prefix("0x").unwrap_or(&lower).to_string(),
                8 => lower.strip_prefix("0o").unwrap_or(&lower).to_string(),
                2 => lower.strip_prefix("0b").unwrap_or(&lower).to_string(),
                _ => lower,
            };
            let parsed = u32::try_from(base)
                .ok()
                .filter(|b| (2..=36).contains(b))
                .and_then(|b| i64::from_str_radix(&digits, b).ok());
            match parsed {
                Some(n) if negative => Ok(Value::Int(-n)),
                Some(n) => Ok(Value::Int(n)),
                None => Err(interp.error(
                    ExcKind::ValueError,
                    format!(
                        "invalid literal for int() with base {base}: {}",
                        super::ops::basic_repr(value)
                    ),
                )),
            }
        }
        (other, Some(_)) => Err(interp.error(
            ExcKind::TypeError,
            format!("int() can't convert non-string with explicit base: '{}'", other.type_name()),
        )),
        (other, None) => Err(interp.error(
            ExcKind::TypeError,
            format!(
                "int() argument must be a string or a real number, not '{}'",
                other.type_name()
            ),
        )),
    }
}

fn builtin_float(interp: &mut Interpreter, _: Option<&Value>, args: Args) -> RtResult<Value> {
    arity(interp, "float", &args, 0, 1)?;
    let Some(value) = args.positional.first() else {
        return Ok(Value::Float(0.0));
    };
    match value {
        Value::Str(text) => {
            let trimmed = text.trim();
            let parsed = match trimmed.to_ascii_lowercase().as_str() {
                "inf" | "+inf" | "infinity" => Some(f64::INFINITY),
                "-inf" | "-infinity" => Some(f64::NEG_INFINITY),
                "nan" | "+nan" | "-nan" => Some(f64::NAN),
                _ => trimmed.parse::<f64>().ok(),
            };
            parsed.map(Value::Float).ok_or_else(|| {
                interp.error(
                    ExcKind::ValueError,
                    format!("could not convert string to float: {}", super::ops::basic_repr(value)),
                )
            })
        }
        other => Ok(Value::Float(number_arg(interp, "float", other)?)),
    }
}

fn builtin_bool(interp: &mut Interpreter, _: Option<&Value>, args: Args) -> RtResult<Value> {
    arity(interp, "bool", &args, 0, 1)?;
    match args.positional.first() {
        Some(value) => Ok(Value::Bool(interp.truthy(value)?)),
        None => Ok(Value::Bool(false)),
    }
}

fn builtin_list(interp: &mut Interpreter, _: Option<&Value>, args: Args) -> RtResult<Value> {
    arity(interp, "list", &args, 0, 1)?;
    match args.positional.first() {
        Some(value) => Ok(Value::list(interp.iterate(value)?)),
        None => Ok(Value::list(Vec::new())),
    }
}

fn builtin_tuple(interp: &mut Interpreter, _: Option<&Value>, args: Args) -> RtResult<Value> {
    arity(interp, "tuple", &args, 0, 1)?;
    match args.positional.first() {
        Some(value) => Ok(Value::tuple(interp.iterate(value)?)),
        None => Ok(Value::tuple(Vec::new())),
    }
}

/// `(key, value)` pairs of a mapping or an iterable of pairs
fn pairs_of(interp: &mut Interpreter, source: &Value) -> RtResult<Vec<(Value, Value)>> {
    if let Value::Dict(dict) = source {
        return Ok(dict.borrow().items());
    }
    let mut pairs = Vec::new();
    for (index, item) in interp.iterate(source)?.into_iter().enumerate() {
        match interp.iterate(&item)?.as_slice() {
            [key, value] => pairs.push((key.clone(), value.clone())),
            other => {
                return Err(interp.error(
                    ExcKind::ValueError,
                    format!(
                        "dictionary update sequence element #{index} has length {}; 2 is required",
                        other.len()
                    ),
                ))
            }
        }
    }
    Ok(pairs)
}

fn builtin_dict(interp: &mut Interpreter, _: Option<&Value>, args: Args) -> RtResult<Value> {
    arity(interp, "dict", &args, 0, 1)?;
    let mut pairs = match args.positional.first() {
        Some(source) => pairs_of(interp, source)?,
        None => Vec::new(),
    };
    pairs.extend(args.keywords.into_iter().map(|(k, v)| (Value::str(k), v)));
    let dict = interp.dict_from_pairs(pairs)?;
    Ok(Value::dict(dict))
}

fn builtin_type(interp: &mut Interpreter, _: Option<&Value>, args: Args) -> RtResult<Value> {
    arity(interp, "type", &args, 1, 1)?;
    Ok(match &args.positional[0] {
        Value::Instance(instance) => Value::Class(instance.class.clone()),
        other => {
            let name = other.type_name();
            interp
                .builtins
                .get(&name)
                .unwrap_or_else(|| Value::Class(Rc::new(Class::new(name, "builtins", Vec::new()))))
        }
    })
}

fn is_instance_of(value: &Value, class: &Value) -> bool {
    match class {
        Value::Class(class) => match value {
            Value::Instance(instance) => instance.class.is_subclass(class),
            _ => false,
        },
        Value::Builtin(builtin) if builtin.receiver.is_none() => {
            let type_name = value.type_name();
            type_name == builtin.name || (builtin.name == "int" && type_name == "bool")
        }
        Value::Tuple(classes) => classes.iter().any(|class| is_instance_of(value, class)),
        _ => false,
    }
}

fn builtin_isinstance(interp: &mut Interpreter, _: Option<&Value>, args: Args) -> RtResult<Value> {
    arity(interp, "isinstance", &args, 2, 2)?;
    let class = &args.positional[1];
    let valid = |class: &Value| matches!(class, Value::Class(_) | Value::Builtin(_));
    let all_valid = match class {
        Value::Tuple(classes) => classes.iter().all(valid),
        other => valid(other),
    };
    if !all_valid {
        return Err(interp.error(
            ExcKind::TypeError,
            "isinstance() arg 2 must be a type or tuple of types",
        ));
    }
    Ok(Value::Bool(is_instance_of(&args.positional[0], class)))
}

fn builtin_abs(interp: &mut Interpreter, _: Option<&Value>, args: Args) -> RtResult<Value> {
    arity(interp, "abs", &args, 1, 1)?;
    match &args.positional[0] {
        Value::Float(f) => Ok(Value::Float(f.abs())),
        value @ (Value::Int(_) | Value::Bool(_)) => value
            .as_int()
            .and_then(i64::checked_abs)
            .map(Value::Int)
            .ok_or_else(|| interp.error(ExcKind::OverflowError, "integer overflow")),
        other => Err(interp.error(
            ExcKind::TypeError,
            format!("bad operand type for abs(): '{}'", other.type_name()),
        )),
    }
}

fn builtin_min(interp: &mut Interpreter, _: Option<&Value>, args: Args) -> RtResult<Value> {
    extreme(interp, "min", args, Ordering::Less)
}

fn builtin_max(interp: &mut Interpreter, _: Option<&Value>, args: Args) -> RtResult<Value> {
    extreme(interp, "max", args, Ordering::Greater)
}

fn builtin_sum(interp: &mut Interpreter, _: Option<&Value>, args: Args) -> RtResult<Value> {
    arity(interp, "sum", &args, 1, 2)?;
    let mut total = args
        .positional
        .get(1)
        .or(args.keyword("start"))
        .cloned()
        .unwrap_or(Value::Int(0));
    for item in interp.iterate(&args.positional[0])? {
        total = interp.binary_op(crate::ast::BinOp::Add, &total, &item)?;
    }
    Ok(total)
}

fn builtin_sorted(interp: &mut Interpreter, _: Option<&Value>, args: Args) -> RtResult<Value> {
    arity(interp, "sorted", &args, 1, 1)?;
    let items = interp.iterate(&args.positional[0])?;
    let reverse = args.keyword("reverse").is_some_and(Value::truthy);
    let sorted = sort_values(interp, items, args.keyword("key"), reverse)?;
    Ok(Value::list(sorted))
}

fn builtin_reversed(interp: &mut Interpreter, _: Option<&Value>, args: Args) -> RtResult<Value> {
    arity(interp, "reversed", &args, 1, 1)?;
    let mut items = interp.iterate(&args.positional[0])?;
    items.reverse();
    Ok(Value::list(items))
}

fn builtin_enumerate(interp: &mut Interpreter, _: Option<&Value>, args: Args) -> RtResult<Value> {
    arity(interp, "enumerate", &args, 1, 2)?;
    let start = match args.positional.get(1).or(args.keyword("start")) {
        Some(start) => int_arg(interp, "enumerate", start)?,
        None => 0,
    };
    let items = interp.iterate(&args.positional[0])?;
    Ok(Value::list(
        items
            .into_iter()
            .enumerate()
            .map(|(i, item)| Value::tuple(vec![Value::Int(start + i as i64), item]))
            .collect(),
    ))
}

fn builtin_zip(interp: &mut Interpreter, _: Option<&Value>, args: Args) -> RtResult<Value> {
    let columns = args
        .positional
        .iter()
        .map(|value| interp.iterate(value))
        .collect::<RtResult<Vec<_>>>()?;
    let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
    Ok(Value::list(
        (0..rows)
            .map(|row| Value::tuple(columns.iter().map(|column| column[row].clone()).collect()))
            .collect(),
    ))
}

fn builtin_any(interp: &mut Interpreter, _: Option<&Value>, args: Args) -> RtResult<Value> {
    arity(interp, "any", &args, 1, 1)?;
    for item in interp.iterate(&args.positional[0])? {
        if interp.truthy(&item)? {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn builtin_all(interp: &mut Interpreter, _: Option<&Value>, args: Args) -> RtResult<Value> {
    arity(interp, "all", &args, 1, 1)?;
    for item in interp.iterate(&args.positional[0])? {
        if !interp.truthy(&item)? {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

fn builtin_round(interp: &mut Interpreter, _: Option<&Value>, args: Args) -> RtResult<Value> {
    arity(interp, "round", &args, 1, 2)?;
    let digits = match args.positional.get(1).or(args.keyword("ndigits")) {
        None | Some(Value::None) => None,
        Some(digits) => Some(int_arg(interp, "round", digits)?),
    };
    match (&args.positional[0], digits) {
        (value @ (Value::Int(_) | Value::Bool(_)), _) => Ok(Value::Int(value.as_int().unwrap_or(0))),
        (Value::Float(f), None) => {
            let rounded = f.round_ties_even();
            if !rounded.is_finite() {
                return Err(interp.error(
                    ExcKind::OverflowError,
                    "cannot convert float infinity or nan to integer",
                ));
            }
            Ok(Value::Int(rounded as i64))
        }
        (Value::Float(f), Some(digits)) => {
            let scale = 10f64.powi(digits as i32);
            Ok(Value::Float((f * scale).round_ties_even() / scale))
        }
        (other, _) => Err(interp.error(
            ExcKind::TypeError,
            format!("type {} doesn't define __round__ method", other.type_name()),
        )),
    }
}

fn builtin_chr(interp: &mut Interpreter, _: Option<&Value>, args: Args) -> RtResult<Value> {
    arity(interp, "chr", &args, 1, 1)?;
    let code = int_arg(interp, "chr", &args.positional[0])?;
    u32::try_from(code)
        .ok()
        .and_then(char::from_u32)
        .map(|c| Value::str(c.to_string()))
        .ok_or_else(|| interp.error(ExcKind::ValueError, "chr() arg not in range(0x110000)"))
}

fn builtin_ord(interp: &mut Interpreter, _: Option<&Value>, args: Args) -> RtResult<Value> {
    arity(interp, "ord", &args, 1, 1)?;
    let text = str_arg(interp, "ord", &args.positional[0])?;
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(Value::Int(c as i64)),
        _ => Err(interp.error(
            ExcKind::TypeError,
            format!(
                "ord() expected a character, but string of length {} found",
                text.chars().count()
            ),
        )),
    }
}

fn builtin_format(interp: &mut Interpreter, _: Option<&Value>, args: Args) -> RtResult<Value> {
    arity(interp, "format", &args, 1, 2)?;
    let spec = match args.positional.get(1) {
        Some(spec) => str_arg(interp, "format", spec)?,
        None => Rc::from(""),
    };
    Ok(Value::str(interp.format_value(&args.positional[0], &spec)?))
}

fn builtin_callable(interp: &mut Interpreter, _: Option<&Value>, args: Args) -> RtResult<Value> {
    arity(interp, "callable", &args, 1, 1)?;
    Ok(Value::Bool(matches!(
        args.positional[0],
        Value::Function(_)
            | Value::Builtin(_)
            | Value::BoundMethod(_)
            | Value::Class(_)
            | Value::Tracer(_)
            | Value::Traced(_)
    )))
}

fn builtin_id(interp: &mut Interpreter, _: Option<&Value>, args: Args) -> RtResult<Value> {
    arity(interp, "id", &args, 1, 1)?;
    let value = &args.positional[0];
    let id = value.identity().map(|addr| addr as i64).unwrap_or_else(|| match Key::from_value(value) {
        Some(Key::Int(i)) => i,
        _ => 0,
    });
    Ok(Value::Int(id))
}

fn builtin_hasattr(interp: &mut Interpreter, _: Option<&Value>, args: Args) -> RtResult<Value> {
    arity(interp, "hasattr", &args, 2, 2)?;
    let name = str_arg(interp, "hasattr", &args.positional[1])?;
    match interp.get_attr(&args.positional[0], &name) {
        Ok(_) => Ok(Value::Bool(true)),
        Err(RuntimeError::Raised(exc)) if interp.exception_is(&exc, ExcKind::AttributeError) => Ok(Value::Bool(false)),
        Err(err) => Err(err),
    }
}

fn builtin_getattr(interp: &mut Interpreter, _: Option<&Value>, args: Args) -> RtResult<Value> {
    arity(interp, "getattr", &args, 2, 3)?;
    let name = str_arg(interp, "getattr", &args.positional[1])?;
    match (interp.get_attr(&args.positional[0], &name), args.positional.get(2)) {
        (Err(RuntimeError::Raised(exc)), Some(default)) if interp.exception_is(&exc, ExcKind::AttributeError) => {
            Ok(default.clone())
        }
        (result, _) => result,
    }
}

fn builtin_setattr(interp: &mut Interpreter, _: Option<&Value>, args: Args) -> RtResult<Value> {
    arity(interp, "setattr", &args, 3, 3)?;
    let name = str_arg(interp, "setattr", &args.positional[1])?;
    interp.set_attr(&args.positional[0], &name, args.positional[2].clone())?;
    Ok(Value::None)
}

// -- sys and math --

fn sys_exit(interp: &mut Interpreter, _: Option<&Value>, args: Args) -> RtResult<Value> {
    arity(interp, "exit", &args, 0, 1)?;
    let class = Value::Class(interp.exc_class(ExcKind::SystemExit));
    let exc = interp.call(&class, Args::new(args.positional))?;
    match exc {
        Value::Instance(instance) => Err(RuntimeError::Raised(Box::new(
            super::exceptions::RaisedException::new(instance),
        ))),
        _ => Ok(Value::None),
    }
}

fn math_sqrt(interp: &mut Interpreter, _: Option<&Value>, args: Args) -> RtResult<Value> {
    arity(interp, "sqrt", &args, 1, 1)?;
    let x = number_arg(interp, "sqrt", &args.positional[0])?;
    if x < 0.0 {
        return Err(interp.error(ExcKind::ValueError, "math domain error"));
    }
    Ok(Value::Float(x.sqrt()))
}

fn math_floor(interp: &mut Interpreter, _: Option<&Value>, args: Args) -> RtResult<Value> {
    arity(interp, "floor", &args, 1, 1)?;
    if let Some(i) = args.positional[0].as_int() {
        return Ok(Value::Int(i));
    }
    let x = number_arg(interp, "floor", &args.positional[0])?;
    Ok(Value::Int(x.floor() as i64))
}

fn math_ceil(interp: &mut Interpreter, _: Option<&Value>, args: Args) -> RtResult<Value> {
    arity(interp, "ceil", &args, 1, 1)?;
    if let Some(i) = args.positional[0].as_int() {
        return Ok(Value::Int(i));
    }
    let x = number_arg(interp, "ceil", &args.positional[0])?;
    Ok(Value::Int(x.ceil() as i64))
}

fn math_fabs(interp: &mut Interpreter, _: Option<&Value>, args: Args) -> RtResult<Value> {
    arity(interp, "fabs", &args, 1, 1)?;
    Ok(Value::Float(number_arg(interp, "fabs", &args.positional[0])?.abs()))
}

fn math_log(interp: &mut Interpreter, _: Option<&Value>, args: Args) -> RtResult<Value> {
    arity(interp, "log", &args, 1, 2)?;
    let x = number_arg(interp, "log", &args.positional[0])?;
    if x <= 0.0 {
        return Err(interp.error(ExcKind::ValueError, "math domain error"));
    }
    match args.positional.get(1) {
        Some(base) => {
            let base = number_arg(interp, "log", base)?;
            Ok(Value::Float(x.ln() / base.ln()))
        }
        None => Ok(Value::Float(x.ln())),
    }
}

// -- str methods --

fn str_upper(interp: &mut Interpreter, recv: Option<&Value>, _: Args) -> RtResult<Value> {
    Ok(Value::str(receiver_str(interp, recv)?.to_uppercase()))
}

fn str_lower(interp: &mut Interpreter, recv: Option<&Value>, _: Args) -> RtResult<Value> {
    Ok(Value::str(receiver_str(interp, recv)?.to_lowercase()))
}

fn strip_chars(interp: &Interpreter, args: &Args) -> RtResult<Option<Vec<char>>> {
    match args.positional.first() {
        None | Some(Value::None) => Ok(None),
        Some(chars) => Ok(Some(str_arg(interp, "strip", chars)?.chars().collect())),
    }
}

fn str_strip(interp: &mut Interpreter, recv: Option<&Value>, args: Args) -> RtResult<Value> {
    let text = receiver_str(interp, recv)?;
    Ok(Value::str(match strip_chars(interp, &args)? {
        Some(chars) => text.trim_matches(chars.as_slice()).to_string(),
        None => text.trim().to_string(),
    }))
}

fn str_lstrip(interp: &mut Interpreter, recv: Option<&Value>, args: Args) -> RtResult<Value> {
    let text = receiver_str(interp, recv)?;
    Ok(Value::str(match strip_chars(interp, &args)? {
        Some(chars) => text.trim_start_matches(chars.as_slice()).to_string(),
        None => text.trim_start().to_string(),
    }))
}

fn str_rstrip(interp: &mut Interpreter, recv: Option<&Value>, args: Args) -> RtResult<Value> {
    let text = receiver_str(interp, recv)?;
    Ok(Value::str(match strip_chars(interp, &args)? {
        Some(chars) => text.trim_end_matches(chars.as_slice()).to_string(),
        None => text.trim_end().to_string(),
    }))
}

fn str_split(interp: &mut Interpreter, recv: Option<&Value>, args: Args) -> RtResult<Value> {
    let text = receiver_str(interp, recv)?;
    let sep = match args.positional.first().or(args.keyword("sep")) {
        None | Some(Value::None) => None,
        Some(sep) => Some(str_arg(interp, "split", sep)?),
    };
    let maxsplit = match args.positional.get(1).or(args.keyword("maxsplit")) {
        Some(n) => int_arg(interp, "split", n)?,
        None => -1,
    };
    let limit = if maxsplit < 0 { usize::MAX } else { maxsplit as usize + 1 };
    let parts: Vec<Value> = match sep {
        Some(sep) if sep.is_empty() => return Err(interp.error(ExcKind::ValueError, "empty separator")),
        Some(sep) => text.splitn(limit, sep.as_ref()).map(Value::str).collect(),
        None => {
            let mut parts = Vec::new();
            let mut rest = text.trim_start();
            while !rest.is_empty() {
                if parts.len() + 1 == limit {
                    parts.push(Value::str(rest.trim_end()));
                    break;
                }
                let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                parts.push(Value::str(&rest[..end]));
                rest = rest[end..].trim_start();
            }
            parts
        }
    };
    Ok(Value::list(parts))
}

fn str_join(interp: &mut Interpreter, recv: Option<&Value>, args: Args) -> RtResult<Value> {
    let sep = receiver_str(interp, recv)?;
    arity(interp, "join", &args, 1, 1)?;
    let mut parts = Vec::new();
    for (index, item) in interp.iterate(&args.positional[0])?.into_iter().enumerate() {
        match item {
            Value::Str(s) => parts.push(s.to_string()),
            other => {
                return Err(interp.error(
                    ExcKind::TypeError,
                    format!(
                        "sequence item {index}: expected str instance, {} found",
                        other.type_name()
                    ),
                ))
            }
        }
    }
    Ok(Value::str(parts.join(&sep)))
}

fn str_replace(interp: &mut Interpreter, recv: Option<&Value>, args: Args) -> RtResult<Value> {
    let text = receiver_str(interp, recv)?;
    arity(interp, "replace", &args, 2, 3)?;
    let old = str_arg(interp, "replace", &args.positional[0])?;
    let new = str_arg(interp, "replace", &args.positional[1])?;
    Ok(Value::str(match args.positional.get(2) {
        Some(count) => {
            let count = int_arg(interp, "replace", count)?;
            if count < 0 {
                text.replace(old.as_ref(), &new)
            } else {
                text.replacen(old.as_ref(), &new, count as usize)
            }
        }
        None => text.replace(old.as_ref(), &new),
    }))
}

fn affix_matches(interp: &Interpreter, name: &str, args: &Args, test: impl Fn(&str) -> bool) -> RtResult<Value> {
    arity(interp, name, args, 1, 1)?;
    let candidates = match &args.positional[0] {
        Value::Tuple(items) => items.to_vec(),
        other => vec![other.clone()],
    };
    for candidate in &candidates {
        if test(&str_arg(interp, name, candidate)?) {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn str_startswith(interp: &mut Interpreter, recv: Option<&Value>, args: Args) -> RtResult<Value> {
    let text = receiver_str(interp, recv)?;
    affix_matches(interp, "startswith", &args, |prefix| text.starts_with(prefix))
}

fn str_endswith(interp: &mut Interpreter, recv: Option<&Value>, args: Args) -> RtResult<Value> {
    let text = receiver_str(interp, recv)?;
    affix_matches(interp, "endswith", &args, |suffix| text.ends_with(suffix))
}

fn str_find(interp: &mut Interpreter, recv: Option<&Value>, args: Args) -> RtResult<Value> {
    let text = receiver_str(interp, recv)?;
    arity(interp, "find", &args, 1, 1)?;
    let needle = str_arg(interp, "find", &args.positional[0])?;
    Ok(Value::Int(match text.find(needle.as_ref()) {
        Some(byte) => text[..byte].chars().count() as i64,
        None => -1,
    }))
}

fn str_count(interp: &mut Interpreter, recv: Option<&Value>, args: Args) -> RtResult<Value> {
    let text = receiver_str(interp, recv)?;
    arity(interp, "count", &args, 1, 1)?;
    let needle = str_arg(interp, "count", &args.positional[0])?;
    let count = if needle.is_empty() {
        text.chars().count() + 1
    } else {
        text.matches(needle.as_ref()).count()
    };
    Ok(Value::Int(count as i64))
}

fn str_isdigit(interp: &mut Interpreter, recv: Option<&Value>, _: Args) -> RtResult<Value> {
    let text = receiver_str(interp, recv)?;
    Ok(Value::Bool(!text.is_empty() && text.chars().all(|c| c.is_ascii_digit())))
}

fn str_isalpha(interp: &mut Interpreter, recv: Option<&Value>, _: Args) -> RtResult<Value> {
    let text = receiver_str(interp, recv)?;
    Ok(Value::Bool(!text.is_empty() && text.chars().all(char::is_alphabetic)))
}

fn str_isspace(interp: &mut Interpreter, recv: Option<&Value>, _: Args) -> RtResult<Value> {
    let text = receiver_str(interp, recv)?;
    Ok(Value::Bool(!text.is_empty() && text.chars().all(char::is_whitespace)))
}

/// `"{} {name!r:>5}".format(...)`
fn str_format(interp: &mut Interpreter, recv: Option<&Value>, args: Args) -> RtResult<Value> {
    let template = receiver_str(interp, recv)?;
    let mut out = String::new();
    let mut auto_index = 0;
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => field.push(c),
                        None => {
                            return Err(interp.error(
                                ExcKind::ValueError,
                                "expected '}' before end of string",
                            ))
                        }
                    }
                }
                let (head, spec) = match field.split_once(':') {
                    Some((head, spec)) => (head.to_string(), spec.to_string()),
                    None => (field, String::new()),
                };
                let (name, conversion) = match head.split_once('!') {
                    Some((name, conversion)) => (name.to_string(), conversion.chars().next()),
                    None => (head, None),
                };
                let value = if name.is_empty() {
                    let value = args.positional.get(auto_index).cloned();
                    auto_index += 1;
                    value
                } else if let Ok(index) = name.parse::<usize>() {
                    args.positional.get(index).cloned()
                } else {
                    args.keyword(&name).cloned()
                };
                let Some(mut value) = value else {
                    return Err(if name.is_empty() || name.parse::<usize>().is_ok() {
                        interp.error(
                            ExcKind::IndexError,
                            "Replacement index out of range for positional args tuple",
                        )
                    } else {
                        interp.key_error(&Value::str(&name))
                    });
                };
                match conversion {
                    Some('r') => value = Value::str(interp.repr(&value)?),
                    Some('s') => value = Value::str(interp.str(&value)?),
                    _ => {}
                }
                out.push_str(&interp.format_value(&value, &spec)?);
            }
            '}' => return Err(interp.error(ExcKind::ValueError, "Single '}' encountered in format string")),
            c => out.push(c),
        }
    }
    Ok(Value::str(out))
}

// -- list methods --

fn list_append(interp: &mut Interpreter, recv: Option<&Value>, args: Args) -> RtResult<Value> {
    let items = receiver_list(interp, recv)?;
    arity(interp, "append", &args, 1, 1)?;
    items.borrow_mut().push(args.positional[0].clone());
    Ok(Value::None)
}

fn list_extend(interp: &mut Interpreter, recv: Option<&Value>, args: Args) -> RtResult<Value> {
    let items = receiver_list(interp, recv)?;
    arity(interp, "extend", &args, 1, 1)?;
    let extra = interp.iterate(&args.positional[0])?;
    items.borrow_mut().extend(extra);
    Ok(Value::None)
}

fn list_pop(interp: &mut Interpreter, recv: Option<&Value>, args: Args) -> RtResult<Value> {
    let items = receiver_list(interp, recv)?;
    arity(interp, "pop", &args, 0, 1)?;
    let len = items.borrow().len();
    if len == 0 {
        return Err(interp.error(ExcKind::IndexError, "pop from empty list"));
    }
    let index = match args.positional.first() {
        Some(index) => int_arg(interp, "pop", index)?,
        None => -1,
    };
    let resolved = if index < 0 { index + len as i64 } else { index };
    if !(0..len as i64).contains(&resolved) {
        return Err(interp.error(ExcKind::IndexError, "pop index out of range"));
    }
    let value = items.borrow_mut().remove(resolved as usize);
    Ok(value)
}

fn list_insert(interp: &mut Interpreter, recv: Option<&Value>, args: Args) -> RtResult<Value> {
    let items = receiver_list(interp, recv)?;
    arity(interp, "insert", &args, 2, 2)?;
    let len = items.borrow().len() as i64;
    let index = int_arg(interp, "insert", &args.positional[0])?;
    let index = if index < 0 { (index + len).max(0) } else { index.min(len) };
    items.borrow_mut().insert(index as usize, args.positional[1].clone());
    Ok(Value::None)
}

fn position_of(interp: &mut Interpreter, items: &[Value], needle: &Value) -> RtResult<Option<usize>> {
    for (index, item) in items.iter().enumerate() {
        if interp.equals(item, needle)? {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

fn list_remove(interp: &mut Interpreter, recv: Option<&Value>, args: Args) -> RtResult<Value> {
    let items = receiver_list(interp, recv)?;
    arity(interp, "remove", &args, 1, 1)?;
    let snapshot = items.borrow().clone();
    match position_of(interp, &snapshot, &args.positional[0])? {
        Some(index) => {
            items.borrow_mut().remove(index);
            Ok(Value::None)
        }
        None => Err(interp.error(ExcKind::ValueError, "list.remove(x): x not in list")),
    }
}

fn list_index(interp: &mut Interpreter, recv: Option<&Value>, args: Args) -> RtResult<Value> {
    let items = receiver_list(interp, recv)?;
    arity(interp, "index", &args, 1, 1)?;
    let snapshot = items.borrow().clone();
    match position_of(interp, &snapshot, &args.positional[0])? {
        Some(index) => Ok(Value::Int(index as i64)),
        None => {
            let repr = interp.repr(&args.positional[0])?;
            Err(interp.error(ExcKind::ValueError, format!("{repr} is not in list")))
        }
    }
}

fn list_count(interp: &mut Interpreter, recv: Option<&Value>, args: Args) -> RtResult<Value> {
    let items = receiver_list(interp, recv)?;
    arity(interp, "count", &args, 1, 1)?;
    let snapshot = items.borrow().clone();
    let mut count = 0;
    for item in &snapshot {
        if interp.equals(item, &args.positional[0])? {
            count += 1;
        }
    }
    Ok(Value::Int(count))
}

fn list_sort(interp: &mut Interpreter, recv: Option<&Value>, args: Args) -> RtResult<Value> {
    let items = receiver_list(interp, recv)?;
    arity(interp, "sort", &args, 0, 0)?;
    let snapshot = items.borrow().clone();
    let reverse = args.keyword("reverse").is_some_and(Value::truthy);
    let sorted = sort_values(interp, snapshot, args.keyword("key"), reverse)?;
    *items.borrow_mut() = sorted;
    Ok(Value::None)
}

fn list_reverse(interp: &mut Interpreter, recv: Option<&Value>, _: Args) -> RtResult<Value> {
    receiver_list(interp, recv)?.borrow_mut().reverse();
    Ok(Value::None)
}

fn list_copy(interp: &mut Interpreter, recv: Option<&Value>, _: Args) -> RtResult<Value> {
    let items = receiver_list(interp, recv)?;
    let copy = items.borrow().clone();
    Ok(Value::list(copy))
}

fn list_clear(interp: &mut Interpreter, recv: Option<&Value>, _: Args) -> RtResult<Value> {
    receiver_list(interp, recv)?.borrow_mut().clear();
    Ok(Value::None)
}

// -- dict methods --

fn dict_get(interp: &mut Interpreter, recv: Option<&Value>, args: Args) -> RtResult<Value> {
    let dict = receiver_dict(interp, recv)?;
    arity(interp, "get", &args, 1, 2)?;
    let key = interp.hash_key(&args.positional[0])?;
    let found = dict.borrow().get(&key).cloned();
    Ok(found.unwrap_or_else(|| args.positional.get(1).cloned().unwrap_or(Value::None)))
}

fn dict_keys(interp: &mut Interpreter, recv: Option<&Value>, _: Args) -> RtResult<Value> {
    let keys = receiver_dict(interp, recv)?.borrow().keys();
    Ok(Value::list(keys))
}

fn dict_values(interp: &mut Interpreter, recv: Option<&Value>, _: Args) -> RtResult<Value> {
    let values = receiver_dict(interp, recv)?.borrow().values();
    Ok(Value::list(values))
}

fn dict_items(interp: &mut Interpreter, recv: Option<&Value>, _: Args) -> RtResult<Value> {
    let items = receiver_dict(interp, recv)?.borrow().items();
    Ok(Value::list(
        items.into_iter().map(|(k, v)| Value::tuple(vec![k, v])).collect(),
    ))
}

fn dict_pop(interp: &mut Interpreter, recv: Option<&Value>, args: Args) -> RtResult<Value> {
    let dict = receiver_dict(interp, recv)?;
    arity(interp, "pop", &args, 1, 2)?;
    let key = interp.hash_key(&args.positional[0])?;
    let removed = dict.borrow_mut().remove(&key);
    match (removed, args.positional.get(1)) {
        (Some(value), _) => Ok(value),
        (None, Some(default)) => Ok(default.clone()),
        (None, None) => Err(interp.key_error(&args.positional[0])),
    }
}

fn dict_update(interp: &mut Interpreter, recv: Option<&Value>, args: Args) -> RtResult<Value> {
    let dict = receiver_dict(interp, recv)?;
    arity(interp, "update", &args, 0, 1)?;
    let mut pairs = match args.positional.first() {
        Some(source) => pairs_of(interp, source)?,
        None => Vec::new(),
    };
    pairs.extend(args.keywords.into_iter().map(|(k, v)| (Value::str(k), v)));
    for (key, value) in pairs {
        let hashed = interp.hash_key(&key)?;
        dict.borrow_mut().insert(hashed, key, value);
    }
    Ok(Value::None)
}

fn dict_setdefault(interp: &mut Interpreter, recv: Option<&Value>, args: Args) -> RtResult<Value> {
    let dict = receiver_dict(interp, recv)?;
    arity(interp, "setdefault", &args, 1, 2)?;
    let key = interp.hash_key(&args.positional[0])?;
    if let Some(existing) = dict.borrow().get(&key) {
        return Ok(existing.clone());
    }
    let default = args.positional.get(1).cloned().unwrap_or(Value::None);
    dict.borrow_mut()
        .insert(key, args.positional[0].clone(), default.clone());
    Ok(default)
}

fn dict_copy(interp: &mut Interpreter, recv: Option<&Value>, _: Args) -> RtResult<Value> {
    let copy = receiver_dict(interp, recv)?.borrow().clone();
    Ok(Value::dict(copy))
}

fn dict_clear(interp: &mut Interpreter, recv: Option<&Value>, _: Args) -> RtResult<Value> {
    *receiver_dict(interp, recv)?.borrow_mut() = Dict::new();
    Ok(Value::None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::io::SharedBuffer;
    use pretty_assertions::assert_eq;

    fn run(source: &str) -> String {
        let stdout = SharedBuffer::new();
        let mut interp = Interpreter::with_output(
            InterpreterConfig::default(),
            stdout.sink(),
            SharedBuffer::new().sink(),
        );
        let module = ModuleObject::new("__main__");
        interp
            .run_source(source, "test.py", &module)
            .unwrap_or_else(|e| panic!("script failed: {e}"));
        stdout.contents()
    }

    #[test]
    fn test_exception_hierarchy_classes() {
        let classes = exception_classes();
        let base = &classes[ExcKind::BaseException.index()];
        let not_found = &classes[ExcKind::ModuleNotFoundError.index()];
        let import = &classes[ExcKind::ImportError.index()];
        assert!(not_found.is_subclass(import));
        assert!(not_found.is_subclass(base));
        assert_eq!(not_found.module, "builtins");
    }

    #[test]
    fn test_string_methods() {
        let out = run("\
s = '  Hello, World  '
print(s.strip().lower(), s.split(), '-'.join(['a', 'b']))
print('a,b,,c'.split(','), 'x'.startswith(('y', 'x')), 'abcabc'.count('bc'), 'abc'.find('c'))
print('{} + {x} = {0!r}'.format(1, x='two'))
");
        assert_eq!(
            out,
            "hello, world ['Hello,', 'World'] a-b\n['a', 'b', '', 'c'] True 2 2\n1 + two = 1\n"
        );
    }

    #[test]
    fn test_list_and_dict_methods() {
        let out = run("\
xs = [3, 1, 2]
xs.append(0)
xs.sort()
print(xs, xs.pop(), xs.index(2))
words = ['bb', 'a', 'ccc']
print(sorted(words, key=len, reverse=True))
d = {'a': 1}
d.update(b=2)
print(d.get('c', 0), d.setdefault('c', 3), list(d.items()), d.pop('a'))
");
        assert_eq!(
            out,
            "[0, 1, 2] 3 2\n['ccc', 'bb', 'a']\n0 3 [('a', 1), ('b', 2), ('c', 3)] 1\n"
        );
    }

    #[test]
    fn test_conversions_and_aggregates() {
        let out = run("\
print(int('42'), int(' -7 '), int('ff', 16), float('2.5'), str(1.0), bool([]))
print(min(3, 1, 2), max([1, 5, 2]), sum([1, 2, 3]), abs(-4), round(2.5), round(3.14159, 2))
print(list(enumerate('ab', 1)), list(zip([1, 2, 3], 'xy')), any([0, 1]), all([]))
print(isinstance(True, int), isinstance('s', (int, str)), type(3) is int)
");
        assert_eq!(
            out,
            "42 -7 255 2.5 1.0 False\n1 5 6 4 2 3.14\n[(1, 'a'), (2, 'b')] [(1, 'x'), (2, 'y')] True True\nTrue True True\n"
        );
    }

    #[test]
    fn test_print_separators() {
        assert_eq!(run("print(1, 2, sep='-', end='!')\nprint()\n"), "1-2!\n");
    }

    #[test]
    fn test_math_module() {
        let module = ModuleObject::new("probe");
        let stdout = SharedBuffer::new();
        let mut interp = Interpreter::with_output(
            InterpreterConfig::default(),
            stdout.sink(),
            SharedBuffer::new().sink(),
        );
        interp
            .run_source("import math\nprint(math.sqrt(16), math.floor(2.7), math.ceil(2.1))\n", "m.py", &module)
            .unwrap();
        assert_eq!(stdout.contents(), "4.0 2 3\n");
        let err = interp
            .run_source("math.sqrt(-1)\n", "m.py", &module)
            .unwrap_err();
        assert!(err.to_string().contains("ValueError: math domain error"));
    }
}
