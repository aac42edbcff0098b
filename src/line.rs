// File: src/line.rs
//
// Component E (30% of budget): the TAC `Line` and its `OpCode`, and the
// per-opcode evaluator (spec.md §4.5). Grounded on the teacher's
// `bytecode.rs` `OpCode` enum (one documented variant per instruction) but
// reshaped from stack operands to the spec's three-address
// `(lhs, op, rhsA, rhsB)` shape.

use crate::context::{Context, PartialResult};
use crate::errors::{EngineError, EngineResult};
use crate::machine::Machine;
use crate::resolver;
use crate::value::{MapKey, StringHandle, Value, MAX_LENGTH};

/// One three-address instruction. `source_line` is the only location info
/// this core carries (spec.md §1: "source-location error reporting beyond
/// a line number" is explicitly out of scope).
#[derive(Debug, Clone)]
pub struct Line {
    pub lhs: Option<Value>,
    pub op: OpCode,
    pub rhs_a: Option<Value>,
    pub rhs_b: Option<Value>,
    pub source_line: usize,
}

impl Line {
    pub fn new(lhs: Option<Value>, op: OpCode, rhs_a: Option<Value>, rhs_b: Option<Value>, source_line: usize) -> Self {
        Line { lhs, op, rhs_a, rhs_b, source_line }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OpCode {
    Noop,
    AssignA,
    AssignImplicit,
    ReturnA,
    CopyA,
    APlusB,
    AMinusB,
    ATimesB,
    ADivB,
    APowB,
    AModB,
    AEqualB,
    ANotEqualB,
    AGreaterThanB,
    AGreatOrEqualB,
    ALessThanB,
    ALessOrEqualB,
    AisaB,
    AAndB,
    AOrB,
    NotA,
    GotoA,
    GotoAifB,
    GotoAifTrulyB,
    GotoAifNotB,
    PushParam,
    CallFunctionA,
    CallIntrinsicA,
    ElemBofA,
    ElemBofIterA,
    LengthOfA,
    BindContextOfA,
}

/// What running one `Line` asked the Machine to do next.
pub enum StepOutcome {
    Continue,
    Jump(usize),
    /// Pop the current Context; the carried Value is written into the
    /// *caller's* frame at that caller's `return_slot` (captured from the
    /// `CallFunctionA` site), not into this Context's own `lhs`.
    Return(Value),
    Suspend,
    /// `CallFunctionA` already pushed the callee's Context onto the
    /// Machine's call stack (via `push_call_with_self`). The caller's own
    /// Context must go back on the stack *underneath* that callee — its
    /// `line_num` still points at this `CallFunctionA` line, so the callee's
    /// eventual `complete_return` advances past it exactly once.
    Call,
}

impl Line {
    /// Execute this line against the top Context, per spec.md §4.5.
    pub fn evaluate(&self, ctx: &mut Context, vm: &Machine) -> EngineResult<StepOutcome> {
        let result = self.eval_inner(ctx, vm);
        result.map_err(|e| e.with_line(self.source_line))
    }

    fn rhs_a(&self) -> EngineResult<&Value> {
        self.rhs_a.as_ref().ok_or_else(|| EngineError::runtime("missing rhsA operand"))
    }
    fn rhs_b(&self) -> EngineResult<&Value> {
        self.rhs_b.as_ref().ok_or_else(|| EngineError::runtime("missing rhsB operand"))
    }
    fn lhs(&self) -> EngineResult<&Value> {
        self.lhs.as_ref().ok_or_else(|| EngineError::runtime("missing lhs operand"))
    }

    fn store(&self, ctx: &mut Context, vm: &Machine, value: Value) -> EngineResult<()> {
        store_into(self.lhs()?, value, ctx, vm)
    }

    fn eval_inner(&self, ctx: &mut Context, vm: &Machine) -> EngineResult<StepOutcome> {
        use OpCode::*;
        match &self.op {
            Noop => Ok(StepOutcome::Continue),

            AssignA | AssignImplicit => {
                let rhs = self.rhs_a()?;
                let value = match rhs {
                    Value::List(_) | Value::Map(_) => rhs.full_eval(ctx, vm)?,
                    other => other.val(ctx, vm, true)?,
                };
                self.store(ctx, vm, value)?;
                Ok(StepOutcome::Continue)
            }

            ReturnA => {
                let rhs = self.rhs_a()?;
                let value = match rhs {
                    Value::List(_) | Value::Map(_) => rhs.full_eval(ctx, vm)?,
                    other => other.val(ctx, vm, true)?,
                };
                Ok(StepOutcome::Return(value))
            }

            CopyA => {
                let rhs = self.rhs_a()?;
                let value = rhs.eval_copy(ctx, vm)?;
                self.store(ctx, vm, value)?;
                Ok(StepOutcome::Continue)
            }

            APlusB => {
                let v = arith_plus(&self.operand_a(ctx, vm)?, &self.operand_b(ctx, vm)?, vm)?;
                self.store(ctx, vm, v)?;
                Ok(StepOutcome::Continue)
            }
            AMinusB => {
                let v = arith_minus(&self.operand_a(ctx, vm)?, &self.operand_b(ctx, vm)?, vm)?;
                self.store(ctx, vm, v)?;
                Ok(StepOutcome::Continue)
            }
            ATimesB => {
                let v = arith_times(&self.operand_a(ctx, vm)?, &self.operand_b(ctx, vm)?, vm)?;
                self.store(ctx, vm, v)?;
                Ok(StepOutcome::Continue)
            }
            ADivB => {
                let v = arith_div(&self.operand_a(ctx, vm)?, &self.operand_b(ctx, vm)?, vm)?;
                self.store(ctx, vm, v)?;
                Ok(StepOutcome::Continue)
            }
            APowB => {
                let a = self.operand_a(ctx, vm)?;
                let b = self.operand_b(ctx, vm)?;
                self.store(ctx, vm, vm.new_number(a.double_value().powf(b.double_value())))?;
                Ok(StepOutcome::Continue)
            }
            AModB => {
                let a = self.operand_a(ctx, vm)?;
                let b = self.operand_b(ctx, vm)?;
                self.store(ctx, vm, vm.new_number(a.double_value() % b.double_value()))?;
                Ok(StepOutcome::Continue)
            }

            AEqualB => {
                let a = self.operand_a(ctx, vm)?;
                let b = self.operand_b(ctx, vm)?;
                self.store(ctx, vm, vm.new_number(bool_to_num(a.strict_eq_truth(&b))))?;
                Ok(StepOutcome::Continue)
            }
            ANotEqualB => {
                let a = self.operand_a(ctx, vm)?;
                let b = self.operand_b(ctx, vm)?;
                self.store(ctx, vm, vm.new_number(bool_to_num(!a.strict_eq_truth(&b))))?;
                Ok(StepOutcome::Continue)
            }
            AGreaterThanB => self.compare(ctx, vm, |o| o == std::cmp::Ordering::Greater),
            AGreatOrEqualB => self.compare(ctx, vm, |o| o != std::cmp::Ordering::Less),
            ALessThanB => self.compare(ctx, vm, |o| o == std::cmp::Ordering::Less),
            ALessOrEqualB => self.compare(ctx, vm, |o| o != std::cmp::Ordering::Greater),

            AisaB => {
                let a = self.operand_a(ctx, vm)?;
                let b = self.operand_b(ctx, vm)?;
                let truth = if a.is_null() {
                    b.is_null()
                } else {
                    a.is_a(&b, vm)?
                };
                self.store(ctx, vm, vm.new_number(bool_to_num(truth)))?;
                Ok(StepOutcome::Continue)
            }

            AAndB => {
                let a = self.operand_a(ctx, vm)?.double_value();
                let b = self.operand_b(ctx, vm)?.double_value();
                self.store(ctx, vm, vm.new_number(Value::abs_clamp01(a * b)))?;
                Ok(StepOutcome::Continue)
            }
            AOrB => {
                let a = self.operand_a(ctx, vm)?.double_value();
                let b = self.operand_b(ctx, vm)?.double_value();
                self.store(ctx, vm, vm.new_number(Value::abs_clamp01(a + b - a * b)))?;
                Ok(StepOutcome::Continue)
            }

            NotA => {
                let a = self.operand_a(ctx, vm)?;
                let truth = match &a {
                    Value::Null => true,
                    Value::Number(n) => Value::abs_clamp01(n.get()) == 0.0,
                    other => !other.bool_value(),
                };
                let result = match &a {
                    Value::Number(n) => 1.0 - Value::abs_clamp01(n.get()),
                    _ => bool_to_num(truth),
                };
                self.store(ctx, vm, vm.new_number(result))?;
                Ok(StepOutcome::Continue)
            }

            GotoA => {
                let target = self.operand_a(ctx, vm)?.int_value();
                Ok(StepOutcome::Jump(target.max(0) as usize))
            }
            GotoAifB => {
                let cond = self.operand_b(ctx, vm)?;
                if cond.bool_value() {
                    let target = self.operand_a(ctx, vm)?.int_value();
                    Ok(StepOutcome::Jump(target.max(0) as usize))
                } else {
                    Ok(StepOutcome::Continue)
                }
            }
            GotoAifTrulyB => {
                let cond = self.operand_b(ctx, vm)?;
                if cond.int_value() != 0 {
                    let target = self.operand_a(ctx, vm)?.int_value();
                    Ok(StepOutcome::Jump(target.max(0) as usize))
                } else {
                    Ok(StepOutcome::Continue)
                }
            }
            GotoAifNotB => {
                let cond = self.operand_b(ctx, vm)?;
                if cond.is_null() || !cond.bool_value() {
                    let target = self.operand_a(ctx, vm)?.int_value();
                    Ok(StepOutcome::Jump(target.max(0) as usize))
                } else {
                    Ok(StepOutcome::Continue)
                }
            }

            PushParam => {
                let v = self.operand_a(ctx, vm)?;
                vm.push_param(v);
                Ok(StepOutcome::Continue)
            }

            CallFunctionA => {
                let callee_operand = self.rhs_a()?.clone();
                let no_invoke = matches!(&callee_operand, Value::Var(v) if v.no_invoke)
                    || matches!(&callee_operand, Value::SeqElem(s) if s.borrow().no_invoke);
                // `obj.method(...)` binds `self` to `obj` for the call
                // (SPEC_FULL.md §C.2); plain `f(...)` binds no `self`.
                let self_value = match &callee_operand {
                    Value::SeqElem(cell) => Some(cell.borrow().sequence.val(ctx, vm, false)?),
                    _ => None,
                };
                let callee = callee_operand.val(ctx, vm, true)?;
                let argc = self.rhs_b()?.int_value().max(0) as usize;
                if no_invoke {
                    // `@f(...)`-style reference: yield the Function value
                    // itself without invoking it (SPEC_FULL.md §C.1).
                    vm.drain_params(argc);
                    self.store(ctx, vm, callee)?;
                    return Ok(StepOutcome::Continue);
                }
                let Value::Function(func) = &callee else {
                    vm.drain_params(argc);
                    return Err(EngineError::type_error("cannot call a non-function value"));
                };
                let args = vm.drain_params(argc);
                vm.push_call_with_self(func.clone(), args, self.lhs.clone(), self_value)?;
                Ok(StepOutcome::Call)
            }

            CallIntrinsicA => {
                // Arguments are already bound into `ctx`'s locals by the
                // `CallFunctionA` that pushed this Context, keyed by the
                // intrinsic's own parameter names (spec.md §4.6) — there is
                // no separate positional argument stack to drain here.
                let id = self.rhs_a()?.int_value() as usize;
                let partial = ctx.partial_result.take().map(|p| p.state);
                let (result, done) = vm.call_intrinsic(id, ctx, partial)?;
                if done {
                    self.store(ctx, vm, result)?;
                    Ok(StepOutcome::Continue)
                } else {
                    ctx.partial_result = Some(PartialResult { intrinsic_id: id, state: result });
                    Ok(StepOutcome::Suspend)
                }
            }

            ElemBofA => {
                let seq = self.operand_a(ctx, vm)?;
                let idx = self.operand_b(ctx, vm)?;
                let v = resolver::elem_of(&seq, &idx, ctx, vm)?;
                self.store(ctx, vm, v)?;
                Ok(StepOutcome::Continue)
            }
            ElemBofIterA => {
                let seq = self.operand_a(ctx, vm)?;
                let idx = self.operand_b(ctx, vm)?;
                let v = resolver::elem_of_iter(&seq, &idx, ctx, vm)?;
                self.store(ctx, vm, v)?;
                Ok(StepOutcome::Continue)
            }

            LengthOfA => {
                let a = self.operand_a(ctx, vm)?;
                let len = match &a {
                    Value::Str(s) => s.len_chars(),
                    Value::List(l) => l.borrow().len(),
                    Value::Map(m) => m.borrow().len(),
                    other => return Err(EngineError::type_error(format!("cannot take length of a {}", other.type_name()))),
                };
                self.store(ctx, vm, vm.new_number(len as f64))?;
                Ok(StepOutcome::Continue)
            }

            BindContextOfA => {
                let target = self.rhs_a()?.clone();
                if let Value::Function(f) = target.val(ctx, vm, false)? {
                    *f.outer_vars.borrow_mut() = Some(ctx.locals.clone());
                }
                Ok(StepOutcome::Continue)
            }
        }
    }

    fn operand_a(&self, ctx: &mut Context, vm: &Machine) -> EngineResult<Value> {
        self.rhs_a()?.val(ctx, vm, false)
    }
    fn operand_b(&self, ctx: &mut Context, vm: &Machine) -> EngineResult<Value> {
        self.rhs_b()?.val(ctx, vm, false)
    }

    fn compare(
        &self,
        ctx: &mut Context,
        vm: &Machine,
        pick: impl Fn(std::cmp::Ordering) -> bool,
    ) -> EngineResult<StepOutcome> {
        let a = self.operand_a(ctx, vm)?;
        let b = self.operand_b(ctx, vm)?;
        let truth = match (&a, &b) {
            (Value::Number(x), Value::Number(y)) => {
                x.get().partial_cmp(&y.get()).map(&pick).unwrap_or(false)
            }
            (Value::Str(x), Value::Str(y)) => pick(x.as_str_cow().cmp(&y.as_str_cow())),
            _ => false,
        };
        self.store(ctx, vm, vm.new_number(bool_to_num(truth)))?;
        Ok(StepOutcome::Continue)
    }
}

fn bool_to_num(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn store_into(lhs: &Value, value: Value, ctx: &mut Context, vm: &Machine) -> EngineResult<()> {
    match lhs {
        Value::Temp(i) => {
            ctx.set_temp(vm, *i, value);
            Ok(())
        }
        Value::Var(v) => {
            ctx.set_var(vm, &v.name, value);
            Ok(())
        }
        Value::SeqElem(cell) => {
            let data = cell.borrow();
            let seq = data.sequence.clone();
            let idx = data.index.clone();
            drop(data);
            store_into_seq_elem(&seq, &idx, value, ctx, vm)
        }
        _ => Err(EngineError::runtime("invalid assignment target")),
    }
}

/// SPEC_FULL.md §C.3: writing through a `SeqElem` assignment target —
/// List index store (auto-extending with Null padding), Map key store. Both
/// branches release the displaced element back to its pool (spec.md §5).
fn store_into_seq_elem(seq: &Value, idx: &Value, value: Value, ctx: &mut Context, vm: &Machine) -> EngineResult<()> {
    // Resolving the container must not copy it — Temp/Var hold the real
    // pooled handle, so a plain clone aliases the same backing storage.
    let container = match seq {
        Value::Temp(i) => ctx.get_temp(*i)?,
        Value::Var(v) => ctx.get_var(&v.name)?,
        other => other.clone(),
    };
    match &container {
        Value::List(l) => {
            let Value::Number(n) = idx else {
                return Err(EngineError::type_error("list index must be a number"));
            };
            let i = n.get() as i64;
            let mut list = l.borrow_mut();
            let target = if i < 0 {
                crate::resolver::wrap_index(i, list.len())
                    .ok_or_else(|| EngineError::index_error(format!("index {} out of range", i)))?
            } else {
                i as usize
            };
            if target >= list.len() {
                if target >= MAX_LENGTH {
                    return Err(EngineError::limit_exceeded("list exceeds maximum length"));
                }
                list.resize(target + 1, Value::Null);
            }
            let old = std::mem::replace(&mut list[target], value);
            vm.release(&old);
            Ok(())
        }
        Value::Map(m) => {
            let old = m.borrow_mut().insert(MapKey(idx.clone()), value);
            if let Some(old) = old {
                vm.release(&old);
            }
            Ok(())
        }
        _ => Err(EngineError::type_error("cannot assign into this container")),
    }
}

// ---- Arithmetic (spec.md §4.2, §4.4) ----

fn custom_override(a: &Value, b: &Value, pick: impl Fn(&dyn crate::value::CustomValue, &Value) -> Option<Value>) -> Option<Value> {
    if let Value::Custom(c) = a {
        if let Some(v) = pick(c.as_ref(), b) {
            return Some(v);
        }
    }
    if let Value::Custom(c) = b {
        if let Some(v) = pick(c.as_ref(), a) {
            return Some(v);
        }
    }
    None
}

fn arith_plus(a: &Value, b: &Value, vm: &Machine) -> EngineResult<Value> {
    if matches!(a, Value::Custom(_)) || matches!(b, Value::Custom(_)) {
        if let Some(v) = custom_override(a, b, |c, o| c.add(o)) {
            return Ok(v);
        }
    }
    match (a, b) {
        (Value::Str(_), _) | (_, Value::Str(_)) => {
            let s = format!("{}{}", a_to_string(a, vm), a_to_string(b, vm));
            if s.chars().count() > MAX_LENGTH {
                return Err(EngineError::limit_exceeded("string exceeds maximum length"));
            }
            Ok(Value::Str(StringHandle::Pooled(vm.string_pool().create(s))))
        }
        (Value::Number(x), Value::Number(y)) => Ok(vm.new_number(x.get() + y.get())),
        (Value::List(x), Value::List(y)) => {
            let mut out = x.borrow().clone();
            out.extend(y.borrow().iter().cloned());
            if out.len() > MAX_LENGTH {
                return Err(EngineError::limit_exceeded("list exceeds maximum length"));
            }
            Ok(vm.new_list(out))
        }
        (Value::Map(x), Value::Map(y)) => {
            let mut out = x.borrow().clone();
            for (k, v) in y.borrow().iter() {
                out.insert(k.clone(), v.clone());
            }
            Ok(vm.new_map(out))
        }
        _ => Err(EngineError::type_error(format!(
            "cannot add {} and {}",
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn a_to_string(v: &Value, vm: &Machine) -> String {
    v.to_display_string(vm)
}

fn arith_minus(a: &Value, b: &Value, vm: &Machine) -> EngineResult<Value> {
    if matches!(a, Value::Custom(_)) || matches!(b, Value::Custom(_)) {
        if let Some(v) = custom_override(a, b, |c, o| c.sub(o)) {
            return Ok(v);
        }
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => Ok(vm.new_number(x.get() - y.get())),
        (Value::Str(x), Value::Str(y)) => {
            let xs = x.as_str_cow();
            let ys = y.as_str_cow();
            let result = xs.strip_suffix(ys.as_ref()).unwrap_or(&xs).to_string();
            Ok(Value::Str(StringHandle::Pooled(vm.string_pool().create(result))))
        }
        _ => Err(EngineError::type_error(format!(
            "cannot subtract {} from {}",
            b.type_name(),
            a.type_name()
        ))),
    }
}

fn arith_times(a: &Value, b: &Value, vm: &Machine) -> EngineResult<Value> {
    if matches!(a, Value::Custom(_)) || matches!(b, Value::Custom(_)) {
        if let Some(v) = custom_override(a, b, |c, o| c.mul(o)) {
            return Ok(v);
        }
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => Ok(vm.new_number(x.get() * y.get())),
        (Value::Str(s), Value::Number(n)) | (Value::Number(n), Value::Str(s)) => {
            Ok(Value::Str(StringHandle::Pooled(vm.string_pool().create(replicate_string(&s.as_str_cow(), n.get())?))))
        }
        (Value::List(l), Value::Number(n)) | (Value::Number(n), Value::List(l)) => {
            Ok(vm.new_list(replicate_list(&l.borrow(), n.get())?))
        }
        _ => Err(EngineError::type_error(format!(
            "cannot multiply {} and {}",
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn arith_div(a: &Value, b: &Value, vm: &Machine) -> EngineResult<Value> {
    if matches!(a, Value::Custom(_)) || matches!(b, Value::Custom(_)) {
        if let Some(v) = custom_override(a, b, |c, o| c.div(o)) {
            return Ok(v);
        }
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => Ok(vm.new_number(x.get() / y.get())),
        (Value::Str(s), Value::Number(n)) => {
            Ok(Value::Str(StringHandle::Pooled(vm.string_pool().create(replicate_string(&s.as_str_cow(), 1.0 / n.get())?))))
        }
        (Value::List(l), Value::Number(n)) => Ok(vm.new_list(replicate_list(&l.borrow(), 1.0 / n.get())?)),
        _ => Err(EngineError::type_error(format!(
            "cannot divide {} by {}",
            a.type_name(),
            b.type_name()
        ))),
    }
}

/// `*n`/`/n` replication: integer part repeats the whole sequence, the
/// fractional remainder appends that fraction of one more copy (spec.md
/// §4.2).
fn replicate_string(s: &str, factor: f64) -> EngineResult<String> {
    if factor <= 0.0 || !factor.is_finite() {
        return Ok(String::new());
    }
    let whole = factor.trunc() as usize;
    let frac = factor.fract();
    let mut out = s.repeat(whole);
    let chars: Vec<char> = s.chars().collect();
    let extra = (chars.len() as f64 * frac).round() as usize;
    out.extend(chars.iter().take(extra));
    if out.chars().count() > MAX_LENGTH {
        return Err(EngineError::limit_exceeded("string exceeds maximum length"));
    }
    Ok(out)
}

fn replicate_list(items: &[Value], factor: f64) -> EngineResult<Vec<Value>> {
    if factor <= 0.0 || !factor.is_finite() {
        return Ok(Vec::new());
    }
    let whole = factor.trunc() as usize;
    let frac = factor.fract();
    let mut out = Vec::with_capacity(items.len() * whole.max(1));
    for _ in 0..whole {
        out.extend(items.iter().cloned());
    }
    let extra = (items.len() as f64 * frac).round() as usize;
    out.extend(items.iter().take(extra).cloned());
    if out.len() > MAX_LENGTH {
        return Err(EngineError::limit_exceeded("list exceeds maximum length"));
    }
    Ok(out)
}
