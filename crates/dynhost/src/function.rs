//! Function objects wrapping builtin method members
//!
//! Reading a method member yields a function object bound to the owning
//! instance. Calling the object dispatches the builtin on its owner;
//! `apply` and `call` redirect the dispatch to an explicit receiver, which
//! must expose the same member from the same source interface.

use crate::error::{DispatchError, DispatchResult};
use crate::handle::{CompatMode, Handle, InterfaceId, InvokeKind, LookupFlags};
use crate::object::{FunctionData, InstanceKind, NullSlots, TypeDesc, TypeOps};
use crate::runtime::{InstanceId, Runtime};
use crate::value::{change_type, ParamKind, Value};

struct FunctionOps;

static FUNCTION_OPS: FunctionOps = FunctionOps;

pub(crate) static FUNCTION_TYPE: TypeDesc = TypeDesc::new("Function", &[], &FUNCTION_OPS, None);

const APPLY: u32 = 0;
const CALL: u32 = 1;

impl TypeOps for FunctionOps {
    fn value(
        &self,
        rt: &mut Runtime,
        this: InstanceId,
        kind: InvokeKind,
        args: &[Value],
    ) -> DispatchResult<Value> {
        match kind {
            InvokeKind::Call | InvokeKind::CallOrGet => {
                let target = match &rt.instance(this)?.kind {
                    InstanceKind::Function(data) => data.target,
                    _ => None,
                };
                // A wrapper outliving its owner is no longer callable.
                let receiver = target.ok_or(DispatchError::NotCallable)?;
                call_with_receiver(rt, this, receiver, args)
            }
            InvokeKind::Get => {
                let name = match &rt.instance(this)?.kind {
                    InstanceKind::Function(data) => data.name.clone(),
                    _ => return Err(DispatchError::NotCallable),
                };
                Ok(Value::Str(format!(
                    "\nfunction {name}() {{\n    [native code]\n}}\n"
                )))
            }
            _ => Err(DispatchError::Unsupported(kind)),
        }
    }

    fn lookup_handle(
        &self,
        _rt: &mut Runtime,
        _this: InstanceId,
        name: &str,
        flags: LookupFlags,
    ) -> Option<DispatchResult<Handle>> {
        for (idx, candidate) in ["apply", "call"].iter().enumerate() {
            let hit = if flags.case_insensitive {
                name.eq_ignore_ascii_case(candidate)
            } else {
                name == *candidate
            };
            if hit {
                return Some(Ok(Handle::custom(idx as u32)));
            }
        }
        None
    }

    fn invoke_custom(
        &self,
        rt: &mut Runtime,
        this: InstanceId,
        handle: Handle,
        kind: InvokeKind,
        args: &[Value],
    ) -> DispatchResult<Value> {
        if !matches!(kind, InvokeKind::Call | InvokeKind::CallOrGet) {
            return Err(DispatchError::Unsupported(kind));
        }
        match handle.custom_index() {
            Some(APPLY) => apply(rt, this, args),
            Some(CALL) => call(rt, this, args),
            _ => Err(DispatchError::MemberNotFound(handle)),
        }
    }

    fn custom_name(
        &self,
        _rt: &Runtime,
        _this: InstanceId,
        handle: Handle,
    ) -> DispatchResult<String> {
        match handle.custom_index() {
            Some(APPLY) => Ok("apply".to_string()),
            Some(CALL) => Ok("call".to_string()),
            _ => Err(DispatchError::MemberNotFound(handle)),
        }
    }
}

fn function_identity(rt: &Runtime, func: InstanceId) -> DispatchResult<(Handle, InterfaceId)> {
    match &rt.instance(func)?.kind {
        InstanceKind::Function(data) => Ok((data.member, data.iface)),
        _ => Err(DispatchError::NotCallable),
    }
}

/// Dispatch the wrapped builtin against `receiver`, which must expose the
/// same member from the same interface as a method.
fn call_with_receiver(
    rt: &mut Runtime,
    func: InstanceId,
    receiver: InstanceId,
    args: &[Value],
) -> DispatchResult<Value> {
    let (member, iface) = function_identity(rt, func)?;
    let table = rt.ensure_table(receiver)?;
    let desc = table
        .by_handle(member)
        .filter(|m| m.iface == iface && m.is_method())
        .ok_or(DispatchError::IllegalCall)?;
    rt.call_builtin_member(receiver, desc, args)
}

fn apply(rt: &mut Runtime, this: InstanceId, args: &[Value]) -> DispatchResult<Value> {
    let receiver = args
        .first()
        .and_then(Value::as_object)
        .ok_or(DispatchError::IllegalCall)?;
    let gathered = match args.get(1) {
        None | Some(Value::Empty) | Some(Value::Null) => Vec::new(),
        Some(Value::Object(array)) => gather_array(rt, *array)?,
        Some(_) => return Err(DispatchError::IllegalCall),
    };
    let result = call_with_receiver(rt, this, receiver, &gathered);
    for value in &gathered {
        rt.release_value(value);
    }
    result
}

fn call(rt: &mut Runtime, this: InstanceId, args: &[Value]) -> DispatchResult<Value> {
    let receiver = args
        .first()
        .and_then(Value::as_object)
        .ok_or(DispatchError::IllegalCall)?;
    call_with_receiver(rt, this, receiver, &args[1..])
}

/// Read an array-like object: a non-negative `length` plus elements under
/// their decimal-index names. Holes become empty values.
fn gather_array(rt: &mut Runtime, array: InstanceId) -> DispatchResult<Vec<Value>> {
    let len_handle = rt.get_handle(array, "length", LookupFlags::new().caseless())?;
    let len_value = rt.invoke(array, len_handle, InvokeKind::Get, &[])?;
    let coerced = change_type(&len_value, ParamKind::I32, rt.converter());
    rt.release_value(&len_value);
    let len = match coerced? {
        Value::I32(v) if v >= 0 => v,
        _ => return Err(DispatchError::IllegalCall),
    };

    let mut out = Vec::with_capacity(len as usize);
    let bail = |rt: &mut Runtime, out: &Vec<Value>, e: DispatchError| {
        for value in out {
            rt.release_value(value);
        }
        Err(e)
    };
    for i in 0..len {
        let name = i.to_string();
        match rt.get_handle(array, &name, LookupFlags::new()) {
            Ok(handle) => match rt.invoke(array, handle, InvokeKind::Get, &[]) {
                Ok(value) => out.push(value),
                Err(e) => return bail(rt, &out, e),
            },
            Err(DispatchError::UnknownName(_)) => out.push(Value::Empty),
            Err(e) => return bail(rt, &out, e),
        }
    }
    Ok(out)
}

impl Runtime {
    /// Create the function object wrapping `member` of `owner`. The owner
    /// keeps the only initial reference; the wrapper's back-reference is
    /// unowned and cleared when the owner is torn down.
    pub(crate) fn create_function(
        &mut self,
        owner: InstanceId,
        member: Handle,
        iface: InterfaceId,
        name: String,
    ) -> DispatchResult<InstanceId> {
        let mode = self.instance(owner)?.mode.unwrap_or(CompatMode::Modern);
        let id = self.create(&FUNCTION_TYPE, mode, Box::new(NullSlots))?;
        self.instance_mut(id)?.kind =
            InstanceKind::Function(FunctionData { target: Some(owner), member, iface, name });
        Ok(id)
    }
}
