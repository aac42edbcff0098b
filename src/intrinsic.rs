// File: src/intrinsic.rs
//
// Component F: the intrinsic calling contract (spec.md §4.6) and a small
// registry of host functions. Grounded on the teacher's
// `interpreter/native_functions/mod.rs` dispatch registry — kept the
// "named host function, looked up by id/name and invoked with the current
// arguments" shape, trimmed to the calling *contract* only: the
// math/string/list/map standard library itself is out of scope
// (spec.md §1).

use crate::context::Context;
use crate::errors::EngineResult;
use crate::value::{FunctionData, Value};
use std::cell::RefCell;
use std::rc::Rc;

/// A host function of shape `(Context, partial_result) -> Result`, where a
/// `Result` is `(Value, done)` (spec.md §4.6). Returning `done = false`
/// suspends: the VM stashes the returned `Value` as the new partial result
/// and re-invokes this same line next step.
pub type IntrinsicFn =
    dyn Fn(&mut Context, &crate::machine::Machine, Option<Value>) -> EngineResult<(Value, bool)>;

pub struct Intrinsic {
    pub id: usize,
    pub name: String,
    pub params: Vec<(String, Option<Value>)>,
    func: Box<IntrinsicFn>,
}

impl std::fmt::Debug for Intrinsic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Intrinsic").field("id", &self.id).field("name", &self.name).finish()
    }
}

impl Intrinsic {
    pub fn invoke(
        &self,
        ctx: &mut Context,
        vm: &crate::machine::Machine,
        partial: Option<Value>,
    ) -> EngineResult<(Value, bool)> {
        (self.func)(ctx, vm, partial)
    }
}

/// Builder mirroring the host API of spec.md §6:
/// `Intrinsic.Create(name) -> Intrinsic; .AddParam(name, default); ...;
/// GetFunc()`.
pub struct IntrinsicBuilder {
    name: String,
    params: Vec<(String, Option<Value>)>,
    func: Option<Box<IntrinsicFn>>,
}

impl IntrinsicBuilder {
    pub fn add_param(mut self, name: impl Into<String>, default: Option<Value>) -> Self {
        self.params.push((name.into(), default));
        self
    }

    pub fn body<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Context, &crate::machine::Machine, Option<Value>) -> EngineResult<(Value, bool)> + 'static,
    {
        self.func = Some(Box::new(f));
        self
    }
}

#[derive(Default)]
pub struct IntrinsicRegistry {
    intrinsics: RefCell<Vec<Rc<Intrinsic>>>,
}

impl IntrinsicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, name: impl Into<String>) -> IntrinsicBuilder {
        IntrinsicBuilder { name: name.into(), params: Vec::new(), func: None }
    }

    /// Finish registering a builder, assigning it the next free id.
    pub fn register(&self, builder: IntrinsicBuilder) -> Rc<Intrinsic> {
        let mut list = self.intrinsics.borrow_mut();
        let id = list.len();
        let intrinsic = Rc::new(Intrinsic {
            id,
            name: builder.name,
            params: builder.params,
            func: builder.func.expect("intrinsic body must be set before registering"),
        });
        list.push(intrinsic.clone());
        intrinsic
    }

    pub fn get(&self, id: usize) -> Option<Rc<Intrinsic>> {
        self.intrinsics.borrow().get(id).cloned()
    }

    pub fn find_by_name(&self, name: &str) -> Option<Rc<Intrinsic>> {
        self.intrinsics.borrow().iter().find(|i| i.name == name).cloned()
    }

    /// `GetFunc()`: a Function Value whose entire body is one
    /// `CallIntrinsicA` line referencing this intrinsic's id, followed by a
    /// `ReturnA` of its result — so calling it through the ordinary
    /// `CallFunctionA` path (parameter binding included) "just works" for
    /// callers, exactly as spec.md §6 describes.
    pub fn get_func(&self, intrinsic: &Intrinsic) -> Value {
        use crate::line::{Line, OpCode};
        let params: Vec<(Rc<str>, Option<Value>)> = intrinsic
            .params
            .iter()
            .map(|(n, d)| (crate::value::intern(n), d.clone()))
            .collect();
        let code = vec![
            Line::new(
                Some(Value::Temp(0)),
                OpCode::CallIntrinsicA,
                Some(crate::value::Value::Number(crate::value::NumberHandle::Interned(intrinsic.id as f64))),
                None,
                0,
            ),
            Line::new(Some(Value::Temp(1)), OpCode::ReturnA, Some(Value::Temp(0)), None, 0),
        ];
        Value::Function(Rc::new(FunctionData {
            params,
            code: Rc::new(code),
            outer_vars: RefCell::new(None),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::Machine;

    #[test]
    fn suspendable_intrinsic_resumes_with_partial_state() {
        let vm = Machine::new();
        let builder = vm.intrinsics().create("count_to_three").body(|_ctx, vm, partial| {
            let n = partial.map(|v| v.double_value()).unwrap_or(0.0) + 1.0;
            Ok((vm.new_number(n), n >= 3.0))
        });
        let intrinsic = vm.intrinsics().register(builder);
        let mut ctx = crate::context::Context::new(
            Rc::new(Vec::new()),
            vm.new_map_handle(crate::value::MapData::new()),
            None,
            None,
            None,
        );
        let (v1, done1) = intrinsic.invoke(&mut ctx, &vm, None).unwrap();
        assert!(!done1);
        let (v2, done2) = intrinsic.invoke(&mut ctx, &vm, Some(v1)).unwrap();
        assert!(!done2);
        let (v3, done3) = intrinsic.invoke(&mut ctx, &vm, Some(v2)).unwrap();
        assert!(done3);
        assert_eq!(v3.double_value(), 3.0);
    }
}
