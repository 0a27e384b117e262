mod common;

use std::sync::atomic::{AtomicUsize, Ordering};

use common::*;
use dynhost::{CompatMode, InstanceId, LookupFlags, Runtime, TypeDesc, TypeOps, Value};

#[test]
fn test_release_destroys_instance() {
    let mut rt = new_runtime();
    let (w, _state) = new_widget(&mut rt, CompatMode::Modern);

    assert!(rt.is_live(w));
    assert_eq!(rt.release(w).unwrap(), 0);
    assert!(!rt.is_live(w));
    assert_eq!(rt.live_instances(), 0);
}

#[test]
fn test_add_ref_keeps_alive() {
    let mut rt = new_runtime();
    let (w, _state) = new_widget(&mut rt, CompatMode::Modern);

    assert_eq!(rt.add_ref(w).unwrap(), 2);
    assert_eq!(rt.release(w).unwrap(), 1);
    assert!(rt.is_live(w));
    assert_eq!(rt.release(w).unwrap(), 0);
    assert!(!rt.is_live(w));
}

static RELEASES: AtomicUsize = AtomicUsize::new(0);

struct NotifyOps;

impl TypeOps for NotifyOps {
    fn last_release(&self, _rt: &mut Runtime, _this: InstanceId) {
        RELEASES.fetch_add(1, Ordering::SeqCst);
    }
}

static NOTIFY_OPS: NotifyOps = NotifyOps;
static NOTIFY_TYPE: TypeDesc = TypeDesc::new("Notify", &[], &NOTIFY_OPS, None);

#[test]
fn test_last_release_fires_once() {
    let mut rt = new_runtime();
    let n = rt
        .create(&NOTIFY_TYPE, CompatMode::Modern, Box::new(dynhost::NullSlots))
        .unwrap();

    assert_eq!(RELEASES.load(Ordering::SeqCst), 0);
    rt.release(n).unwrap();
    assert_eq!(RELEASES.load(Ordering::SeqCst), 1);
    assert!(!rt.is_live(n));
}

#[test]
fn test_expando_cycle_collected() {
    let mut rt = new_runtime();
    let a = new_bag(&mut rt);
    let b = new_bag(&mut rt);

    let ha = rt.get_handle(a, "other", LookupFlags::new().ensure()).unwrap();
    rt.put(a, ha, Value::Object(b)).unwrap();
    let hb = rt.get_handle(b, "other", LookupFlags::new().ensure()).unwrap();
    rt.put(b, hb, Value::Object(a)).unwrap();

    // Drop the external references; the cycle keeps both alive.
    rt.release(a).unwrap();
    rt.release(b).unwrap();
    assert!(rt.is_live(a));
    assert!(rt.is_live(b));

    let stats = rt.collect();
    assert_eq!(stats.examined, 2);
    assert_eq!(stats.collected, 2);
    assert!(!rt.is_live(a));
    assert!(!rt.is_live(b));
}

#[test]
fn test_externally_rooted_survives_collection() {
    let mut rt = new_runtime();
    let a = new_bag(&mut rt);
    let b = new_bag(&mut rt);

    let ha = rt.get_handle(a, "child", LookupFlags::new().ensure()).unwrap();
    rt.put(a, ha, Value::Object(b)).unwrap();
    rt.release(b).unwrap();

    // `b` is only held by `a`, but `a` is externally rooted.
    let stats = rt.collect();
    assert_eq!(stats.collected, 0);
    assert!(rt.is_live(a));
    assert!(rt.is_live(b));

    // Severing the edge lets the plain refcount reclaim `b`.
    assert_eq!(rt.remove(a, ha).unwrap(), true);
    assert!(!rt.is_live(b));
}

#[test]
fn test_wrapper_released_with_owner() {
    let mut rt = new_runtime();
    let (w, _state) = new_widget(&mut rt, CompatMode::Modern);

    let func = rt.get(w, H_RESIZE).unwrap().as_object().unwrap();
    rt.release_value(&Value::Object(func));
    assert!(rt.is_live(func));

    rt.release(w).unwrap();
    assert!(!rt.is_live(w));
    assert!(!rt.is_live(func));
    assert_eq!(rt.live_instances(), 0);
}

#[test]
fn test_cycle_through_bound_member_value() {
    let mut rt = new_runtime();
    let (w, _state) = new_widget(&mut rt, CompatMode::Modern);

    // Materialize the wrapper, then bind the member slot to the widget
    // itself and drop every external reference.
    let func = rt.get(w, H_RESIZE).unwrap();
    rt.put(w, H_RESIZE, Value::Object(w)).unwrap();
    rt.release_value(&func);
    rt.release(w).unwrap();

    assert!(rt.is_live(w));
    let stats = rt.collect();
    assert_eq!(stats.collected, 2);
    assert_eq!(rt.live_instances(), 0);
}

#[test]
fn test_collect_examines_all_live() {
    let mut rt = new_runtime();
    let a = new_bag(&mut rt);
    let b = new_bag(&mut rt);
    let c = new_bag(&mut rt);

    let stats = rt.collect();
    assert_eq!(stats.examined, 3);
    assert_eq!(stats.collected, 0);
    for id in [a, b, c] {
        assert!(rt.is_live(id));
    }
}
