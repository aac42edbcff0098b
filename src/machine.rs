// File: src/machine.rs
//
// Component D (call stack half) + component G (error surfacing) +
// component H (RunUntilDone). Grounded on the teacher's `vm.rs` `VM`
// struct (instruction pointer driven through a flat instruction vector
// with a call-frame stack) and `main.rs`'s error-to-`eprintln!` reporting
// path.

use crate::context::Context;
use crate::errors::{EngineError, EngineResult};
use crate::intrinsic::IntrinsicRegistry;
use crate::line::StepOutcome;
use crate::pool::Pool;
use crate::value::{FunctionData, MapData, NumberHandle, Value};
use std::cell::RefCell;
use std::rc::Rc;

/// Result of a single `RunUntilDone` call (spec.md §4.7).
#[derive(Debug, PartialEq, Eq)]
pub enum RunState {
    /// The call stack emptied out; the script finished.
    Finished,
    /// The step limit was reached with work still pending.
    StepLimitReached,
    /// A suspendable intrinsic returned `done = false` and
    /// `return_early_on_partial` was set.
    Suspended,
}

type OutputSink = Box<dyn FnMut(&str)>;

pub struct Machine {
    number_pool: Pool<f64>,
    string_pool: Pool<String>,
    list_pool: Pool<Vec<Value>>,
    map_pool: Pool<MapData>,
    seq_elem_pool: Pool<crate::value::SeqElemData>,

    map_type: Pooled<MapData>,
    list_type: Pooled<MapData>,
    string_type: Pooled<MapData>,
    number_type: Pooled<MapData>,
    function_type: Pooled<MapData>,

    intrinsics: IntrinsicRegistry,
    pending_args: RefCell<Vec<Value>>,
    call_stack: RefCell<Vec<Context>>,

    pub standard_output: RefCell<OutputSink>,
    pub error_output: RefCell<OutputSink>,
    pub implicit_output: RefCell<OutputSink>,
}

use crate::pool::Pooled;

impl Machine {
    pub fn new() -> Self {
        let map_pool: Pool<MapData> = Pool::new();
        let map_type = map_pool.create(MapData::new());
        let list_type = map_pool.create(MapData::new());
        let string_type = map_pool.create(MapData::new());
        let number_type = map_pool.create(MapData::new());
        let function_type = map_pool.create(MapData::new());
        Machine {
            number_pool: Pool::new(),
            string_pool: Pool::new(),
            list_pool: Pool::new(),
            map_pool,
            seq_elem_pool: Pool::new(),
            map_type,
            list_type,
            string_type,
            number_type,
            function_type,
            intrinsics: IntrinsicRegistry::new(),
            pending_args: RefCell::new(Vec::new()),
            call_stack: RefCell::new(Vec::new()),
            standard_output: RefCell::new(Box::new(|s: &str| println!("{}", s))),
            error_output: RefCell::new(Box::new(|s: &str| eprintln!("{}", s))),
            implicit_output: RefCell::new(Box::new(|s: &str| println!("{}", s))),
        }
    }

    // ---- pools ----
    pub fn number_pool(&self) -> &Pool<f64> {
        &self.number_pool
    }
    pub fn string_pool(&self) -> &Pool<String> {
        &self.string_pool
    }
    pub fn list_pool(&self) -> &Pool<Vec<Value>> {
        &self.list_pool
    }
    pub fn map_pool(&self) -> &Pool<MapData> {
        &self.map_pool
    }
    pub fn seq_elem_pool(&self) -> &Pool<crate::value::SeqElemData> {
        &self.seq_elem_pool
    }

    // ---- type default maps (installed by the intrinsic library; here
    // exposed as plain VM-owned fields per Design Notes §9) ----
    pub fn map_type(&self) -> Pooled<MapData> {
        self.map_type.clone()
    }
    pub fn list_type(&self) -> Pooled<MapData> {
        self.list_type.clone()
    }
    pub fn string_type(&self) -> Pooled<MapData> {
        self.string_type.clone()
    }
    pub fn number_type(&self) -> Pooled<MapData> {
        self.number_type.clone()
    }
    pub fn function_type(&self) -> Pooled<MapData> {
        self.function_type.clone()
    }

    pub fn intrinsics(&self) -> &IntrinsicRegistry {
        &self.intrinsics
    }

    // ---- value construction ----

    /// `Number.zero`/`Number.one` are non-pool-backed singletons
    /// (spec.md §3.2); every other double is pool-backed.
    pub fn new_number(&self, n: f64) -> Value {
        if n == 0.0 {
            Value::Number(NumberHandle::Interned(0.0))
        } else if n == 1.0 {
            Value::Number(NumberHandle::Interned(1.0))
        } else {
            Value::Number(NumberHandle::Pooled(self.number_pool.create(n)))
        }
    }

    pub fn new_list(&self, items: Vec<Value>) -> Value {
        Value::List(self.list_pool.create(items))
    }

    pub fn new_map(&self, data: MapData) -> Value {
        Value::Map(self.map_pool.create(data))
    }

    pub fn new_map_handle(&self, data: MapData) -> Pooled<MapData> {
        self.map_pool.create(data)
    }

    /// A pool-backed `SeqElem` (unresolved `sequence.index` access), used as
    /// a `CallFunctionA` callee operand for `obj.method(...)`-style calls so
    /// the self-binding in SPEC_FULL.md §C.2 applies.
    pub fn new_seq_elem(&self, sequence: Value, index: Value, no_invoke: bool) -> Value {
        Value::SeqElem(self.seq_elem_pool.create(crate::value::SeqElemData {
            sequence: Box::new(sequence),
            index: Box::new(index),
            no_invoke,
        }))
    }

    /// Release a pool-backed Value back to its pool if this was the last
    /// reference (spec.md §5: container replacement and Context teardown
    /// both unref their previous occupants).
    pub fn release(&self, v: &Value) {
        match v {
            Value::Number(NumberHandle::Pooled(cell)) => self.number_pool.release_if_unreferenced(cell),
            Value::Str(crate::value::StringHandle::Pooled(cell)) => self.string_pool.release_if_unreferenced(cell),
            Value::List(cell) => self.list_pool.release_if_unreferenced(cell),
            Value::Map(cell) => self.map_pool.release_if_unreferenced(cell),
            Value::SeqElem(cell) => self.seq_elem_pool.release_if_unreferenced(cell),
            _ => {}
        }
    }

    pub fn release_map(&self, m: &Pooled<MapData>) {
        self.map_pool.release_if_unreferenced(m);
    }

    // ---- call-argument staging (PushParam / CallFunctionA) ----

    pub fn push_param(&self, v: Value) {
        self.pending_args.borrow_mut().push(v);
    }

    pub fn drain_params(&self, argc: usize) -> Vec<Value> {
        let mut pending = self.pending_args.borrow_mut();
        let start = pending.len().saturating_sub(argc);
        pending.split_off(start)
    }

    /// Push a fresh Context for a user (or intrinsic-wrapper) function
    /// call: bind positional `args` to `func`'s parameter list (falling
    /// back to each parameter's default), wire up the closure's
    /// `outerVars`, and remember where the eventual return value belongs.
    pub fn push_call(
        &self,
        func: Rc<FunctionData>,
        args: Vec<Value>,
        return_slot: Option<Value>,
    ) -> EngineResult<()> {
        self.push_call_with_self(func, args, return_slot, None)
    }

    pub fn push_call_with_self(
        &self,
        func: Rc<FunctionData>,
        args: Vec<Value>,
        return_slot: Option<Value>,
        self_value: Option<Value>,
    ) -> EngineResult<()> {
        let locals = self.new_map_handle(MapData::new());
        for (i, (name, default)) in func.params.iter().enumerate() {
            let v = args
                .get(i)
                .cloned()
                .or_else(|| default.clone())
                .unwrap_or(Value::Null);
            locals.borrow_mut().insert(
                crate::value::MapKey(Value::Str(crate::value::StringHandle::Interned(name.clone()))),
                v,
            );
        }
        let self_map = match &self_value {
            Some(Value::Map(m)) => Some(m.clone()),
            _ => None,
        };
        if let Some(sv) = self_value {
            locals.borrow_mut().insert(
                crate::value::MapKey(Value::Str(crate::value::StringHandle::Interned(crate::value::intern("self")))),
                sv,
            );
        }
        let outer_vars = func.outer_vars.borrow().clone();
        let ctx = Context::new(func.code.clone(), locals, outer_vars, self_map, return_slot);
        self.call_stack.borrow_mut().push(ctx);
        Ok(())
    }

    pub fn call_intrinsic(
        &self,
        id: usize,
        ctx: &mut Context,
        partial: Option<Value>,
    ) -> EngineResult<(Value, bool)> {
        let intrinsic = self
            .intrinsics
            .get(id)
            .ok_or_else(|| EngineError::runtime(format!("unknown intrinsic id {}", id)))?;
        intrinsic.invoke(ctx, self, partial)
    }

    fn pop_context(&self) -> Option<Context> {
        self.call_stack.borrow_mut().pop()
    }

    fn push_context(&self, ctx: Context) {
        self.call_stack.borrow_mut().push(ctx);
    }

    pub fn call_depth(&self) -> usize {
        self.call_stack.borrow().len()
    }

    /// Start a fresh top-level call: used by hosts to run a Function value
    /// as a script entry point (spec.md §6).
    pub fn call_top_level(&self, func: Rc<FunctionData>) {
        let locals = self.new_map_handle(MapData::new());
        let ctx = Context::new(func.code.clone(), locals, None, None, None);
        self.push_context(ctx);
    }

    /// `RunUntilDone(stepLimit, returnEarlyOnPartial)` (spec.md §4.7).
    /// Repeatedly fetches, advances, and evaluates the top Context's
    /// current Line; pops on return; surfaces typed errors (annotated with
    /// the Line's source line) via `error_output`.
    pub fn run_until_done(&self, step_limit: usize, return_early_on_partial: bool) -> RunState {
        for _ in 0..step_limit {
            let mut ctx = match self.pop_context() {
                Some(c) => c,
                None => return RunState::Finished,
            };

            let Some(line) = ctx.current_line().cloned() else {
                // Ran off the end of the code without an explicit ReturnA:
                // implicit return of Null.
                ctx.teardown(self);
                self.complete_return(ctx, Value::Null);
                continue;
            };

            match line.evaluate(&mut ctx, self) {
                Ok(StepOutcome::Continue) => {
                    ctx.line_num += 1;
                    self.push_context(ctx);
                }
                Ok(StepOutcome::Jump(target)) => {
                    ctx.line_num = target;
                    self.push_context(ctx);
                }
                Ok(StepOutcome::Call) => {
                    // The callee Context is already on top of the stack
                    // (pushed by `push_call_with_self` during `evaluate`).
                    // Reinsert it *above* the caller so the callee runs
                    // next; the caller's `line_num` is left pointing at the
                    // `CallFunctionA` line for `complete_return` to advance
                    // past once the callee's `ReturnA` pops back to it.
                    let callee = self.pop_context().expect("CallFunctionA must push a callee context");
                    self.push_context(ctx);
                    self.push_context(callee);
                }
                Ok(StepOutcome::Return(value)) => {
                    ctx.teardown(self);
                    self.complete_return(ctx, value);
                }
                Ok(StepOutcome::Suspend) => {
                    self.push_context(ctx);
                    if return_early_on_partial {
                        return RunState::Suspended;
                    }
                }
                Err(e) => {
                    (self.error_output.borrow_mut())(&format!("{}", e));
                    // The failing Context is discarded; its caller (if any)
                    // never resumes — spec.md §7: "Errors are not
                    // catchable from within the script."
                    ctx.teardown(self);
                    return RunState::Finished;
                }
            }
        }
        // Put the interrupted context back so a later call can resume it —
        // run_until_done only pops at the top of each step.
        RunState::StepLimitReached
    }

    fn complete_return(&self, popped: Context, value: Value) {
        if let Some(mut caller) = self.pop_context() {
            if let Some(slot) = popped.return_slot.clone() {
                let _ = store_return(&slot, value, &mut caller, self);
            }
            caller.line_num += 1;
            self.push_context(caller);
        }
        // If there was no caller, `value` is the script's final result;
        // hosts observe it by inspecting the popped context before
        // teardown (see `host::Interpreter::run_until_done`).
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

fn store_return(slot: &Value, value: Value, caller: &mut Context, vm: &Machine) -> EngineResult<()> {
    match slot {
        Value::Temp(i) => {
            caller.set_temp(vm, *i, value);
            Ok(())
        }
        Value::Var(v) => {
            caller.set_var(vm, &v.name, value);
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line::{Line, OpCode};

    #[test]
    fn empty_call_stack_finishes_immediately() {
        let vm = Machine::new();
        assert_eq!(vm.run_until_done(10, false), RunState::Finished);
    }

    #[test]
    fn arithmetic_script_two_plus_three_times_four() {
        // x = 2 + 3 * 4  =>  14
        let vm = Machine::new();
        let code = vec![
            Line::new(
                Some(Value::Temp(0)),
                OpCode::ATimesB,
                Some(vm.new_number(3.0)),
                Some(vm.new_number(4.0)),
                1,
            ),
            Line::new(
                Some(Value::Temp(1)),
                OpCode::APlusB,
                Some(vm.new_number(2.0)),
                Some(Value::Temp(0)),
                1,
            ),
            Line::new(Some(Value::var("x")), OpCode::AssignA, Some(Value::Temp(1)), None, 1),
        ];
        let func = Rc::new(FunctionData {
            params: vec![],
            code: Rc::new(code),
            outer_vars: RefCell::new(None),
        });
        vm.call_top_level(func);
        assert_eq!(vm.run_until_done(100, false), RunState::Finished);
    }
}
