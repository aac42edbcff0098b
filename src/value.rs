// File: src/value.rs
//
// The Value model (component A of spec.md §2): a tagged union of the ten
// variants named in spec.md §3.1, each satisfying the common contract
// (to_string, code_form, hash, fuzzy_eq, bool_value, int/double_value, is_a,
// val, full_eval). Number/String/List/Map/SeqElem are pool-backed per
// spec.md §3.2; everything else is plain data or an Rc.

use crate::context::Context;
use crate::errors::{EngineError, EngineResult};
use crate::line::Line;
use crate::machine::Machine;
use crate::pool::Pooled;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Equality/hash recursion budget. Exhausting it resolves container
/// equality to 0.5 ("indeterminate") per spec.md §4.1.
pub const DEFAULT_DEPTH: usize = 64;

/// `__isa` chain walk cap, per spec.md §3.2/§4.3/§8.
pub const ISA_CHAIN_LIMIT: usize = 1000;

/// Approximate string/list/map length cap from spec.md §3.1.
pub const MAX_LENGTH: usize = 16 * 1024 * 1024;

thread_local! {
    static INTERN_TABLE: RefCell<std::collections::HashMap<&'static str, Rc<str>>> =
        RefCell::new(std::collections::HashMap::new());
}

/// Hot identifiers kept out of the pool entirely (spec.md §3.2, §9
/// "Interned strings"). Looking one of these up in `intern` never touches a
/// pool free list.
const INTERNED_NAMES: &[&str] =
    &["self", "super", "__isa", "len", "to", "from", " ", "seq"];

/// Intern a well-known identifier; anything not in `INTERNED_NAMES` still
/// gets an `Rc<str>` (cheap to clone) but is not cached process-wide.
pub fn intern(name: &str) -> Rc<str> {
    if let Some(&known) = INTERNED_NAMES.iter().find(|&&n| n == name) {
        INTERN_TABLE.with(|t| {
            let mut t = t.borrow_mut();
            t.entry(known).or_insert_with(|| Rc::from(known)).clone()
        })
    } else {
        Rc::from(name)
    }
}

/// A `Number` handle: either one of the two non-pool singletons (zero/one)
/// or a pool-backed cell. See spec.md §3.2.
#[derive(Clone)]
pub enum NumberHandle {
    Interned(f64),
    Pooled(Pooled<f64>),
}

impl NumberHandle {
    pub fn get(&self) -> f64 {
        match self {
            NumberHandle::Interned(v) => *v,
            NumberHandle::Pooled(cell) => *cell.borrow(),
        }
    }
}

impl fmt::Debug for NumberHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Number({})", self.get())
    }
}

/// A `String` handle: interned well-known names or a pool-backed cell.
#[derive(Clone)]
pub enum StringHandle {
    Interned(Rc<str>),
    Pooled(Pooled<String>),
}

impl StringHandle {
    pub fn as_str_cow(&self) -> std::borrow::Cow<'_, str> {
        match self {
            StringHandle::Interned(s) => std::borrow::Cow::Borrowed(s.as_ref()),
            StringHandle::Pooled(cell) => std::borrow::Cow::Owned(cell.borrow().clone()),
        }
    }

    pub fn len_chars(&self) -> usize {
        match self {
            StringHandle::Interned(s) => s.chars().count(),
            StringHandle::Pooled(cell) => cell.borrow().chars().count(),
        }
    }
}

impl fmt::Debug for StringHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "String({:?})", self.as_str_cow())
    }
}

/// A Map key wraps a `Value` with structural equality/hash consistent with
/// spec.md §4.1 ("equality >= 0.5" counts as equal for keying purposes).
#[derive(Clone, Debug)]
pub struct MapKey(pub Value);

impl PartialEq for MapKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.fuzzy_eq(&other.0, DEFAULT_DEPTH) >= 0.5
    }
}
impl Eq for MapKey {}

impl std::hash::Hash for MapKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash_value(DEFAULT_DEPTH).hash(state);
    }
}

pub type MapData = IndexMap<MapKey, Value>;

#[derive(Debug)]
pub struct FunctionData {
    pub params: Vec<(Rc<str>, Option<Value>)>,
    pub code: Rc<Vec<Line>>,
    pub outer_vars: RefCell<Option<Pooled<MapData>>>,
}

#[derive(Debug, Clone)]
pub struct SeqElemData {
    pub sequence: Box<Value>,
    pub index: Box<Value>,
    pub no_invoke: bool,
}

/// A variable reference by identifier, with the `@`-style no-invoke flag
/// (spec.md §3.1 row for Var; SPEC_FULL.md §C.1).
#[derive(Debug, Clone)]
pub struct VarRef {
    pub name: Rc<str>,
    pub no_invoke: bool,
}

/// Host-defined payload. `Custom` values expose a type-function map, an
/// identifier lookup, and optional arithmetic overrides per spec.md §4.4.
pub trait CustomValue: fmt::Debug {
    fn type_name(&self) -> &str;
    fn type_functions(&self) -> Option<Pooled<MapData>> {
        None
    }
    fn lookup(&self, _ident: &str) -> Option<Value> {
        None
    }
    fn add(&self, _other: &Value) -> Option<Value> {
        None
    }
    fn sub(&self, _other: &Value) -> Option<Value> {
        None
    }
    fn mul(&self, _other: &Value) -> Option<Value> {
        None
    }
    fn div(&self, _other: &Value) -> Option<Value> {
        None
    }
    fn to_display(&self) -> String {
        format!("<{}>", self.type_name())
    }
}

#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Number(NumberHandle),
    Str(StringHandle),
    List(Pooled<Vec<Value>>),
    Map(Pooled<MapData>),
    Function(Rc<FunctionData>),
    SeqElem(Pooled<SeqElemData>),
    Temp(usize),
    Var(VarRef),
    Custom(Rc<dyn CustomValue>),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(StringHandle::Interned(Rc::from(s.into().as_str())))
    }

    pub fn var(name: &str) -> Value {
        Value::Var(VarRef { name: intern(name), no_invoke: false })
    }

    pub fn var_no_invoke(name: &str) -> Value {
        Value::Var(VarRef { name: intern(name), no_invoke: true })
    }

    pub fn truth(n: f64) -> bool {
        n != 0.0
    }

    // ---- BoolValue ----
    pub fn bool_value(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Number(n) => n.get() != 0.0,
            Value::Str(s) => !s.as_str_cow().is_empty(),
            Value::List(l) => !l.borrow().is_empty(),
            Value::Map(m) => !m.borrow().is_empty(),
            Value::Function(_) => true,
            Value::SeqElem(_) | Value::Temp(_) | Value::Var(_) => true,
            Value::Custom(_) => true,
        }
    }

    // ---- IntValue / DoubleValue ----
    pub fn double_value(&self) -> f64 {
        match self {
            Value::Number(n) => n.get(),
            Value::Str(s) => s.as_str_cow().trim().parse::<f64>().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    pub fn int_value(&self) -> i64 {
        self.double_value() as i64
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// `absClamp01`: fold negatives to positive first, then clamp to [0,1].
    pub fn abs_clamp01(x: f64) -> f64 {
        x.abs().clamp(0.0, 1.0)
    }

    // ---- Equality (fuzzy) ----
    pub fn fuzzy_eq(&self, other: &Value, depth: usize) -> f64 {
        use Value::*;
        match (self, other) {
            (Null, Null) => 1.0,
            (Null, _) | (_, Null) => 0.0,
            (Number(a), Number(b)) => {
                if a.get() == b.get() {
                    1.0
                } else {
                    0.0
                }
            }
            (Number(_), _) | (_, Number(_)) => 0.0,
            (Str(a), Str(b)) => {
                if a.as_str_cow() == b.as_str_cow() {
                    1.0
                } else {
                    0.0
                }
            }
            (Function(a), Function(b)) => {
                if Rc::ptr_eq(a, b) {
                    1.0
                } else {
                    0.0
                }
            }
            (List(a), List(b)) => {
                if a.ptr_eq(b) {
                    return 1.0;
                }
                if depth == 0 {
                    return 0.5;
                }
                let a = a.borrow();
                let b = b.borrow();
                if a.len() != b.len() {
                    return 0.0;
                }
                let mut product = 1.0;
                for (x, y) in a.iter().zip(b.iter()) {
                    product *= x.fuzzy_eq(y, depth - 1);
                    if product == 0.0 {
                        return 0.0;
                    }
                }
                product
            }
            (Map(a), Map(b)) => {
                if a.ptr_eq(b) {
                    return 1.0;
                }
                if depth == 0 {
                    return 0.5;
                }
                let a = a.borrow();
                let b = b.borrow();
                if a.len() != b.len() {
                    return 0.0;
                }
                let mut product = 1.0;
                for (k, v) in a.iter() {
                    match b.get(k) {
                        Some(other_v) => {
                            product *= v.fuzzy_eq(other_v, depth - 1);
                            if product == 0.0 {
                                return 0.0;
                            }
                        }
                        None => return 0.0,
                    }
                }
                product
            }
            _ => 0.0,
        }
    }

    pub fn strict_eq_truth(&self, other: &Value) -> bool {
        self.fuzzy_eq(other, DEFAULT_DEPTH) != 0.0
    }

    // ---- Hash ----
    pub fn hash_value(&self, depth: usize) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        match self {
            Value::Null => 0u8.hash(&mut hasher),
            Value::Number(n) => {
                1u8.hash(&mut hasher);
                n.get().to_bits().hash(&mut hasher);
            }
            Value::Str(s) => {
                2u8.hash(&mut hasher);
                s.as_str_cow().hash(&mut hasher);
            }
            Value::List(l) => {
                3u8.hash(&mut hasher);
                if depth == 0 {
                    0u8.hash(&mut hasher);
                } else {
                    for v in l.borrow().iter() {
                        v.hash_value(depth - 1).hash(&mut hasher);
                    }
                }
            }
            Value::Map(m) => {
                4u8.hash(&mut hasher);
                if depth == 0 {
                    0u8.hash(&mut hasher);
                } else {
                    // order-independent: fold with addition
                    let mut acc: u64 = 0;
                    for (k, v) in m.borrow().iter() {
                        acc = acc.wrapping_add(
                            k.0.hash_value(depth - 1) ^ v.hash_value(depth - 1),
                        );
                    }
                    acc.hash(&mut hasher);
                }
            }
            Value::Function(f) => {
                5u8.hash(&mut hasher);
                (Rc::as_ptr(f) as *const () as usize).hash(&mut hasher);
            }
            Value::SeqElem(_) => 6u8.hash(&mut hasher),
            Value::Temp(i) => {
                7u8.hash(&mut hasher);
                i.hash(&mut hasher);
            }
            Value::Var(v) => {
                8u8.hash(&mut hasher);
                v.name.hash(&mut hasher);
            }
            Value::Custom(_) => 9u8.hash(&mut hasher),
        }
        hasher.finish()
    }

    // ---- ToString ----
    pub fn to_display_string(&self, vm: &Machine) -> String {
        match self {
            Value::Null => String::new(),
            Value::Number(n) => format_number(n.get()),
            Value::Str(s) => s.as_str_cow().into_owned(),
            Value::List(l) => {
                let items: Vec<String> =
                    l.borrow().iter().map(|v| v.code_form(vm, DEFAULT_DEPTH)).collect();
                format!("[{}]", items.join(", "))
            }
            Value::Map(m) => {
                let items: Vec<String> = m
                    .borrow()
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.0.code_form(vm, DEFAULT_DEPTH), v.code_form(vm, DEFAULT_DEPTH)))
                    .collect();
                format!("{{{}}}", items.join(", "))
            }
            Value::Function(_) => "function".to_string(),
            Value::SeqElem(cell) => {
                let data = cell.borrow();
                format!("{}.{}", data.sequence.to_display_string(vm), data.index.to_display_string(vm))
            }
            Value::Temp(i) => format!("_t{}", i),
            Value::Var(v) => v.name.to_string(),
            Value::Custom(c) => c.to_display(),
        }
    }

    // ---- CodeForm ----
    pub fn code_form(&self, vm: &Machine, depth: usize) -> String {
        match self {
            Value::Str(s) => format!("\"{}\"", s.as_str_cow().replace('"', "\"\"")),
            Value::List(_) if depth == 0 => "[...]".to_string(),
            Value::Map(_) if depth == 0 => "{...}".to_string(),
            Value::List(l) => {
                let items: Vec<String> =
                    l.borrow().iter().map(|v| v.code_form(vm, depth - 1)).collect();
                format!("[{}]", items.join(", "))
            }
            Value::Map(m) => {
                let items: Vec<String> = m
                    .borrow()
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.0.code_form(vm, depth - 1), v.code_form(vm, depth - 1)))
                    .collect();
                format!("{{{}}}", items.join(", "))
            }
            other => other.to_display_string(vm),
        }
    }

    // ---- IsA ----
    pub fn is_a(&self, ty: &Value, vm: &Machine) -> EngineResult<bool> {
        crate::resolver::is_a(self, ty, vm)
    }

    /// `Val`: resolve Temp/Var through the Context, SeqElem via member
    /// lookup; everything else is the identity. `take_ref` mirrors the
    /// spec's refcounting hint; with `Rc`-backed pooling a plain clone
    /// already performs the ref.
    pub fn val(&self, ctx: &mut Context, vm: &Machine, take_ref: bool) -> EngineResult<Value> {
        let _ = take_ref;
        match self {
            Value::Temp(i) => ctx.get_temp(*i),
            Value::Var(v) => ctx.get_var(&v.name),
            Value::SeqElem(cell) => {
                let data = cell.borrow();
                let seq = data.sequence.val(ctx, vm, false)?;
                let idx = data.index.val(ctx, vm, false)?;
                crate::resolver::elem_of(&seq, &idx, ctx, vm)
            }
            other => Ok(other.clone()),
        }
    }

    /// `FullEval`: recursively resolve Temp/Var elements inside List/Map
    /// literals (spec.md §3.1, §3.3 "EvalCopy").
    pub fn full_eval(&self, ctx: &mut Context, vm: &Machine) -> EngineResult<Value> {
        match self {
            Value::List(l) => {
                let items = l.borrow();
                let mut out = Vec::with_capacity(items.len());
                for item in items.iter() {
                    out.push(item.val(ctx, vm, true)?.full_eval(ctx, vm)?);
                }
                drop(items);
                Ok(vm.new_list(out))
            }
            Value::Map(m) => {
                let data = m.borrow();
                let mut out = MapData::new();
                for (k, v) in data.iter() {
                    let key = k.0.val(ctx, vm, true)?.full_eval(ctx, vm)?;
                    let val = v.val(ctx, vm, true)?.full_eval(ctx, vm)?;
                    out.insert(MapKey(key), val);
                }
                drop(data);
                Ok(vm.new_map(out))
            }
            other => other.val(ctx, vm, true),
        }
    }

    /// `CopyA`/`EvalCopy`: a fresh List/Map for literal re-execution; any
    /// other variant behaves like `Val` (spec.md §4.5 `CopyA`).
    pub fn eval_copy(&self, ctx: &mut Context, vm: &Machine) -> EngineResult<Value> {
        self.full_eval(ctx, vm)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Function(_) => "function",
            Value::SeqElem(_) => "seq_elem",
            Value::Temp(_) => "temp",
            Value::Var(_) => "var",
            Value::Custom(_) => "custom",
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::Machine;

    #[test]
    fn null_equals_null() {
        assert_eq!(Value::Null.fuzzy_eq(&Value::Null, DEFAULT_DEPTH), 1.0);
    }

    #[test]
    fn number_vs_string_never_equal() {
        let n = Value::Number(NumberHandle::Interned(1.0));
        let s = Value::str("1");
        assert_eq!(n.fuzzy_eq(&s, DEFAULT_DEPTH), 0.0);
    }

    #[test]
    fn integral_double_prints_without_trailing_zero() {
        let vm = Machine::new();
        let n = Value::Number(NumberHandle::Interned(3.0));
        assert_eq!(n.to_display_string(&vm), "3");
    }

    #[test]
    fn bool_value_matches_spec_truth_table() {
        assert!(!Value::Null.bool_value());
        assert!(!Value::Number(NumberHandle::Interned(0.0)).bool_value());
        assert!(Value::Number(NumberHandle::Interned(-1.0)).bool_value());
        assert!(!Value::str("").bool_value());
        assert!(Value::str("x").bool_value());
    }

    #[test]
    fn list_equality_is_deep_and_order_sensitive() {
        let vm = Machine::new();
        let a = vm.new_list(vec![Value::Number(NumberHandle::Interned(1.0)), Value::str("x")]);
        let b = vm.new_list(vec![Value::Number(NumberHandle::Interned(1.0)), Value::str("x")]);
        let c = vm.new_list(vec![Value::str("x"), Value::Number(NumberHandle::Interned(1.0))]);
        assert_eq!(a.fuzzy_eq(&b, DEFAULT_DEPTH), 1.0);
        assert_eq!(a.fuzzy_eq(&c, DEFAULT_DEPTH), 0.0);
    }

    #[test]
    fn map_key_replacement_does_not_reorder() {
        let mut m = MapData::new();
        m.insert(MapKey(Value::str("a")), Value::Number(NumberHandle::Interned(1.0)));
        m.insert(MapKey(Value::str("b")), Value::Number(NumberHandle::Interned(2.0)));
        m.insert(MapKey(Value::str("a")), Value::Number(NumberHandle::Interned(9.0)));
        let keys: Vec<String> = m.keys().map(|k| k.0.to_display_string(&Machine::new())).collect();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(m.get(&MapKey(Value::str("a"))).unwrap().double_value(), 9.0);
    }

    #[test]
    fn equality_and_hash_agree_at_same_depth() {
        let vm = Machine::new();
        let a = vm.new_list(vec![Value::Number(NumberHandle::Interned(1.0))]);
        let b = vm.new_list(vec![Value::Number(NumberHandle::Interned(1.0))]);
        assert!(a.fuzzy_eq(&b, DEFAULT_DEPTH) >= 0.5);
        assert_eq!(a.hash_value(DEFAULT_DEPTH), b.hash_value(DEFAULT_DEPTH));
    }
}
