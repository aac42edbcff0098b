// File: src/resolver.rs
//
// Component C: the `__isa` prototype walk (spec.md §4.3). Grounded on the
// teacher's `interpreter/environment.rs` scope-chain walk (innermost to
// outermost, stop at first hit) — here applied to a Map's `__isa` chain
// instead of a `Vec<HashMap>` lexical scope stack.

use crate::context::Context;
use crate::errors::{EngineError, EngineResult};
use crate::machine::Machine;
use crate::pool::Pooled;
use crate::value::{intern, MapData, MapKey, Value, ISA_CHAIN_LIMIT};

fn isa_key() -> MapKey {
    MapKey(Value::Str(crate::value::StringHandle::Interned(intern("__isa"))))
}

/// Step one level of a Map's `__isa` chain. Returns `None` once the chain
/// ends (no `__isa` entry) rather than erroring — callers decide whether
/// that means "fall back to the generic map type" or "stop".
fn next_proto(map: &Pooled<MapData>) -> Option<Pooled<MapData>> {
    let data = map.borrow();
    match data.get(&isa_key()) {
        Some(Value::Map(parent)) => Some(parent.clone()),
        _ => None,
    }
}

/// Walk (sequence, identifier) per spec.md §4.3, returning the resolved
/// value and the Map that defined it.
pub fn resolve_member(
    seq: &Value,
    key: &Value,
    ctx: &mut Context,
    vm: &Machine,
) -> EngineResult<Value> {
    // Rule 1: Temp/Var resolve one step first.
    let seq = match seq {
        Value::Temp(_) | Value::Var(_) => seq.val(ctx, vm, false)?,
        other => other.clone(),
    };

    match &seq {
        Value::Map(m) => {
            let map_key = MapKey(key.clone());
            let mut current = m.clone();
            let mut used_generic_fallback = false;
            for _ in 0..ISA_CHAIN_LIMIT {
                if let Some(v) = current.borrow().get(&map_key) {
                    return Ok(v.clone());
                }
                match next_proto(&current) {
                    Some(parent) => current = parent,
                    None => {
                        if used_generic_fallback {
                            break;
                        }
                        used_generic_fallback = true;
                        current = vm.map_type();
                    }
                }
            }
            Err(EngineError::key_error(format!(
                "'{}' not found",
                key.to_display_string(vm)
            )))
        }
        Value::List(l) => index_or_type_fallback(l.borrow().len(), &seq, key, vm, |i| {
            l.borrow().get(i).cloned().unwrap_or(Value::Null)
        }),
        Value::Str(s) => {
            let text = s.as_str_cow();
            let chars: Vec<char> = text.chars().collect();
            index_or_type_fallback(chars.len(), &seq, key, vm, |i| {
                Value::str(chars[i].to_string())
            })
        }
        Value::Number(_) => type_default_lookup(&vm.number_type(), key, vm),
        Value::Function(_) => type_default_lookup(&vm.function_type(), key, vm),
        Value::Custom(c) => {
            if let Value::Str(k) = key {
                if let Some(v) = c.lookup(&k.as_str_cow()) {
                    return Ok(v);
                }
            }
            // spec.md §4.4: a Custom value's type-function map is the
            // fallback when the per-identifier `lookup` doesn't cover it,
            // walked like the other per-type default maps.
            if let Some(type_map) = c.type_functions() {
                if let Ok(v) = type_default_lookup(&type_map, key, vm) {
                    return Ok(v);
                }
            }
            Err(EngineError::key_error(format!(
                "'{}' not found on {}",
                key.to_display_string(vm),
                c.type_name()
            )))
        }
        Value::Null => Err(EngineError::type_error("cannot index into null")),
        other => Err(EngineError::type_error(format!(
            "cannot index into a {}",
            other.type_name()
        ))),
    }
}

fn index_or_type_fallback(
    len: usize,
    seq: &Value,
    key: &Value,
    vm: &Machine,
    get: impl Fn(usize) -> Value,
) -> EngineResult<Value> {
    if let Value::Number(n) = key {
        let idx = wrap_index(n.get() as i64, len)
            .ok_or_else(|| EngineError::index_error(format!("index {} out of range", n.get())))?;
        return Ok(get(idx));
    }
    match seq {
        Value::List(_) => type_default_lookup(&vm.list_type(), key, vm),
        Value::Str(_) => type_default_lookup(&vm.string_type(), key, vm),
        _ => unreachable!(),
    }
}

fn type_default_lookup(type_map: &Pooled<MapData>, key: &Value, vm: &Machine) -> EngineResult<Value> {
    let map_key = MapKey(key.clone());
    let mut current = type_map.clone();
    for _ in 0..ISA_CHAIN_LIMIT {
        if let Some(v) = current.borrow().get(&map_key) {
            return Ok(v.clone());
        }
        match next_proto(&current) {
            Some(parent) => current = parent,
            None => break,
        }
    }
    Err(EngineError::key_error(format!("'{}' not found", key.to_display_string(vm))))
}

/// Negative indices wrap from the end; out-of-range in either direction is
/// `None` (callers raise `IndexError`).
pub fn wrap_index(i: i64, len: usize) -> Option<usize> {
    let len_i = len as i64;
    let idx = if i < 0 { i + len_i } else { i };
    if idx < 0 || idx >= len_i {
        None
    } else {
        Some(idx as usize)
    }
}

/// `ElemBofA` entry point used by `Value::val` for `SeqElem` and by the
/// `ElemBofA` opcode directly.
pub fn elem_of(seq: &Value, index: &Value, ctx: &mut Context, vm: &Machine) -> EngineResult<Value> {
    resolve_member(seq, index, ctx, vm)
}

/// `ElemBofIterA`: like `elem_of` for List/String; for Map, returns the
/// one-shot mini-map `{"key": k, "value": v}` at ordinal `n` (spec.md §4.2).
pub fn elem_of_iter(
    seq: &Value,
    ordinal: &Value,
    ctx: &mut Context,
    vm: &Machine,
) -> EngineResult<Value> {
    let seq = match seq {
        Value::Temp(_) | Value::Var(_) => seq.val(ctx, vm, false)?,
        other => other.clone(),
    };
    match &seq {
        Value::Map(m) => {
            let n = wrap_index(ordinal.int_value(), m.borrow().len())
                .ok_or_else(|| EngineError::index_error("map iteration index out of range"))?;
            let (k, v) = m
                .borrow()
                .get_index(n)
                .map(|(k, v)| (k.0.clone(), v.clone()))
                .ok_or_else(|| EngineError::index_error("map iteration index out of range"))?;
            let mut mini = MapData::new();
            mini.insert(MapKey(Value::str("key")), k);
            mini.insert(MapKey(Value::str("value")), v);
            Ok(vm.new_map(mini))
        }
        _ => resolve_member(&seq, ordinal, ctx, vm),
    }
}

/// `IsA`/`AisaB`: true if `value`'s type (or, for a Map, the Map itself)
/// appears in `ty`'s `__isa` chain.
pub fn is_a(value: &Value, ty: &Value, vm: &Machine) -> EngineResult<bool> {
    let ty_map = match ty {
        Value::Map(m) => m.clone(),
        _ => return Ok(false),
    };
    let start: Option<Pooled<MapData>> = match value {
        Value::Map(m) => Some(m.clone()),
        Value::List(_) => Some(vm.list_type()),
        Value::Str(_) => Some(vm.string_type()),
        Value::Number(_) => Some(vm.number_type()),
        Value::Function(_) => Some(vm.function_type()),
        _ => None,
    };
    let Some(mut current) = start else { return Ok(false) };
    for _ in 0..ISA_CHAIN_LIMIT {
        if current.ptr_eq(&ty_map) {
            return Ok(true);
        }
        match next_proto(&current) {
            Some(parent) => current = parent,
            None => return Ok(false),
        }
    }
    Err(EngineError::limit_exceeded("__isa chain exceeded 1000 hops"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::Machine;

    #[test]
    fn prototype_speak_falls_through_isa_chain() {
        let vm = Machine::new();
        let mut animal = MapData::new();
        animal.insert(MapKey(Value::str("speak")), Value::str("?"));
        let animal_map = vm.new_map_handle(animal);

        let mut dog = MapData::new();
        dog.insert(MapKey(Value::str("__isa")), Value::Map(animal_map.clone()));
        let dog_map = vm.new_map_handle(dog);

        let mut ctx = crate::context::Context::new(
            std::rc::Rc::new(Vec::new()),
            vm.new_map_handle(MapData::new()),
            None,
            None,
            None,
        );
        let result =
            resolve_member(&Value::Map(dog_map), &Value::str("speak"), &mut ctx, &vm).unwrap();
        assert_eq!(result.to_display_string(&vm), "?");
    }

    #[test]
    fn negative_index_wraps() {
        assert_eq!(wrap_index(-1, 3), Some(2));
        assert_eq!(wrap_index(-4, 3), None);
        assert_eq!(wrap_index(3, 3), None);
    }
}
