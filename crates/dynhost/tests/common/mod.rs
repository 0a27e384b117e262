#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use dynhost::{
    CompatMode, DefaultOps, Handle, HostSlots, InstanceId, InterfaceId, MemoryCatalog, NullSlots,
    ParamKind, RawMember, RawParam, Runtime, SlotError, TypeDesc, Value,
};

pub const IFACE_WIDGET: InterfaceId = InterfaceId(1);
pub const IFACE_EXTRA: InterfaceId = InterfaceId(2);

pub const H_WIDTH: Handle = Handle(1);
pub const H_TITLE: Handle = Handle(2);
pub const H_LENGTH: Handle = Handle(3);
pub const H_HIDDEN: Handle = Handle(4);
pub const H_RESIZE: Handle = Handle(10);
pub const H_ODD: Handle = Handle(11);
pub const H_ATTACH: Handle = Handle(12);

static WIDGET_OPS: DefaultOps = DefaultOps;
static WIDGET_IFACES: [InterfaceId; 1] = [IFACE_WIDGET];
pub static WIDGET_TYPE: TypeDesc = TypeDesc::new("Widget", &WIDGET_IFACES, &WIDGET_OPS, None);

static EXTRA_IFACES: [InterfaceId; 1] = [IFACE_EXTRA];
pub static EXTRA_TYPE: TypeDesc = TypeDesc::new("Extra", &EXTRA_IFACES, &WIDGET_OPS, None);

/// A purely dynamic object: no builtin members at all.
pub static BAG_TYPE: TypeDesc = TypeDesc::new("Object", &[], &WIDGET_OPS, None);

#[derive(Default)]
pub struct WidgetState {
    pub width: i32,
    pub title: String,
    pub calls: Vec<String>,
}

pub struct WidgetHost(pub Arc<Mutex<WidgetState>>);

impl HostSlots for WidgetHost {
    fn call_slot(
        &mut self,
        iface: InterfaceId,
        offset: u16,
        args: &[Value],
    ) -> Result<Value, SlotError> {
        if iface != IFACE_WIDGET {
            return Err(SlotError::BadSlot(offset));
        }
        let mut st = self.0.lock().unwrap();
        match offset {
            1 => Ok(Value::I32(st.width)),
            2 => match args.first() {
                Some(Value::I32(v)) => {
                    st.width = *v;
                    Ok(Value::Empty)
                }
                _ => Err(SlotError::Failed("width expects i32".into())),
            },
            3 => Ok(Value::Str(st.title.clone())),
            4 => match args.first() {
                Some(Value::Str(s)) => {
                    st.title = s.clone();
                    Ok(Value::Empty)
                }
                Some(Value::Empty) => {
                    st.title.clear();
                    Ok(Value::Empty)
                }
                _ => Err(SlotError::Failed("title expects string".into())),
            },
            5 => Ok(Value::I32(st.title.len() as i32)),
            6 => match (args.first(), args.get(1)) {
                (Some(Value::I32(n)), Some(Value::Str(unit))) => {
                    st.width = *n;
                    st.calls.push(format!("resize({n},{unit})"));
                    Ok(Value::I32(*n))
                }
                _ => Err(SlotError::Failed("resize expects (i32, string)".into())),
            },
            7 => Ok(Value::I32(99)),
            8 => {
                st.calls.push("odd".into());
                Ok(args.first().cloned().unwrap_or(Value::Empty))
            }
            10 => {
                st.calls.push("attach".into());
                Ok(Value::Empty)
            }
            _ => Err(SlotError::BadSlot(offset)),
        }
    }
}

pub fn widget_catalog() -> Arc<MemoryCatalog> {
    let cat = MemoryCatalog::new();
    cat.define(
        IFACE_WIDGET,
        vec![
            RawMember::getter(H_WIDTH, "width", 1, ParamKind::I32),
            RawMember::setter(H_WIDTH, "width", 2, ParamKind::I32),
            RawMember::getter(H_TITLE, "title", 3, ParamKind::Str),
            RawMember::setter(H_TITLE, "title", 4, ParamKind::Str),
            RawMember::getter(H_LENGTH, "length", 5, ParamKind::I32),
            RawMember::getter(H_HIDDEN, "internalState", 7, ParamKind::I32).hidden(),
            RawMember::method(
                H_RESIZE,
                "resize",
                6,
                vec![
                    RawParam::plain(ParamKind::I32),
                    RawParam::with_default(ParamKind::Str, Value::Str("px".into())),
                ],
                ParamKind::I32,
            ),
            RawMember::method(
                H_ODD,
                "oddEcho",
                8,
                vec![RawParam::plain(ParamKind::Variant)],
                ParamKind::Variant,
            ),
            RawMember::method(
                H_ATTACH,
                "attachExtra",
                10,
                vec![RawParam::object_of(IFACE_EXTRA)],
                ParamKind::Void,
            ),
        ],
    );
    cat.define(IFACE_EXTRA, vec![]);
    Arc::new(cat)
}

pub fn new_runtime() -> Runtime {
    Runtime::new(widget_catalog())
}

pub fn new_widget(rt: &mut Runtime, mode: CompatMode) -> (InstanceId, Arc<Mutex<WidgetState>>) {
    let state = Arc::new(Mutex::new(WidgetState::default()));
    let id = rt
        .create(&WIDGET_TYPE, mode, Box::new(WidgetHost(state.clone())))
        .unwrap();
    (id, state)
}

pub fn new_bag(rt: &mut Runtime) -> InstanceId {
    rt.create(&BAG_TYPE, CompatMode::Modern, Box::new(NullSlots)).unwrap()
}
