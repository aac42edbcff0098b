// File: src/context.rs
//
// Component D (half): the per-call Context (spec.md §3.3). Holds the
// program counter, temporary slots, local variables, the closure
// (`outerVars`), the bound `self` map, and a suspended intrinsic's partial
// result. Contexts form the Machine's call stack.

use crate::errors::{EngineError, EngineResult};
use crate::line::Line;
use crate::machine::Machine;
use crate::pool::Pooled;
use crate::value::{intern, MapData, MapKey, Value};
use std::rc::Rc;

/// The suspended state of a `CallIntrinsicA` that returned `done = false`
/// (spec.md §4.6). The resume token (`state`) is opaque to the Machine.
#[derive(Clone, Debug)]
pub struct PartialResult {
    pub intrinsic_id: usize,
    pub state: Value,
}

#[derive(Debug)]
pub struct Context {
    pub line_num: usize,
    pub code: Rc<Vec<Line>>,
    temps: Vec<Value>,
    pub locals: Pooled<MapData>,
    pub outer_vars: Option<Pooled<MapData>>,
    /// The map bound to `self` for this call, used to resolve `super`
    /// directly instead of re-walking `__isa` (SPEC_FULL.md §C.2).
    pub self_map: Option<Pooled<MapData>>,
    pub partial_result: Option<PartialResult>,
    /// Where the caller wants this Context's return value written, once it
    /// pops — the `lhs` operand of the `CallFunctionA` line that pushed us.
    pub return_slot: Option<Value>,
}

impl Context {
    pub fn new(
        code: Rc<Vec<Line>>,
        locals: Pooled<MapData>,
        outer_vars: Option<Pooled<MapData>>,
        self_map: Option<Pooled<MapData>>,
        return_slot: Option<Value>,
    ) -> Self {
        Context {
            line_num: 0,
            code,
            temps: Vec::new(),
            locals,
            outer_vars,
            self_map,
            partial_result: None,
            return_slot,
        }
    }

    pub fn current_line(&self) -> Option<&Line> {
        self.code.get(self.line_num)
    }

    fn ensure_capacity(&mut self, i: usize) {
        if self.temps.len() <= i {
            self.temps.resize(i + 1, Value::Null);
        }
    }

    pub fn get_temp(&self, i: usize) -> EngineResult<Value> {
        Ok(self.temps.get(i).cloned().unwrap_or(Value::Null))
    }

    /// Overwrites temp slot `i`, releasing whatever value it previously held
    /// back to its pool first (spec.md §5: assignment refs the new value and
    /// unrefs the displaced one).
    pub fn set_temp(&mut self, vm: &Machine, i: usize, v: Value) {
        self.ensure_capacity(i);
        let old = std::mem::replace(&mut self.temps[i], v);
        vm.release(&old);
    }

    pub fn temps_snapshot(&self) -> &[Value] {
        &self.temps
    }

    /// Look up an identifier: locals first, then the closure's `outerVars`,
    /// matching spec.md §3.3's Context shape. Neither is `__isa`-walked —
    /// that chain only applies to member/index access (`ElemBofA`), not
    /// plain name resolution.
    pub fn get_var(&self, name: &str) -> EngineResult<Value> {
        // `super`: the `__isa` of the Map bound to `self` for this call, not
        // a generic lookup (SPEC_FULL.md §C.2) — O(1) instead of re-walking
        // the chain from scratch.
        if name == "super" {
            if let Some(self_map) = &self.self_map {
                let isa_key = MapKey(Value::Str(crate::value::StringHandle::Interned(intern("__isa"))));
                if let Some(Value::Map(parent)) = self_map.borrow().get(&isa_key) {
                    return Ok(Value::Map(parent.clone()));
                }
            }
            return Ok(Value::Null);
        }
        let key = MapKey(Value::Str(crate::value::StringHandle::Interned(intern(name))));
        if let Some(v) = self.locals.borrow().get(&key) {
            return Ok(v.clone());
        }
        if let Some(outer) = &self.outer_vars {
            if let Some(v) = outer.borrow().get(&key) {
                return Ok(v.clone());
            }
        }
        Err(EngineError::key_error(format!("'{}' is not defined", name)))
    }

    /// Overwrites local variable `name`, releasing whatever value it
    /// previously held back to its pool first (spec.md §5).
    pub fn set_var(&mut self, vm: &Machine, name: &str, v: Value) {
        let key = MapKey(Value::Str(crate::value::StringHandle::Interned(intern(name))));
        let old = self.locals.borrow_mut().insert(key, v);
        if let Some(old) = old {
            vm.release(&old);
        }
    }

    /// Release every pool-backed Value this Context owns back to its pool,
    /// matching spec.md §5: "Context teardown unrefs temporaries and local
    /// variables."
    pub fn teardown(&self, vm: &Machine) {
        for v in &self.temps {
            vm.release(v);
        }
        vm.release_map(&self.locals);
    }
}
