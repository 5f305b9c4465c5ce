mod common;

use bindery::{CallArgs, Ownership, TransferTarget, Wrapper};
use common::{fixture, Fixture};
use proptest::prelude::*;
use std::sync::Arc;

fn widget(fx: &Fixture, size: i32) -> Arc<Wrapper> {
    fx.rt.construct(fx.widget, &CallArgs::new().arg(size)).unwrap()
}

#[test]
fn test_owner_keeps_child_alive() {
    let fx = fixture();
    let parent = widget(&fx, 1);
    let child = widget(&fx, 2);

    fx.rt.transfer_to(&child, TransferTarget::Owner(parent.clone())).unwrap();
    assert_eq!(child.ownership(), Ownership::DynamicOwned);
    assert_eq!(fx.rt.children_of(&parent).len(), 1);

    drop(child);
    assert_eq!(fx.releases.count(), 0);
    drop(parent);
    assert_eq!(fx.releases.count(), 2);
    assert_eq!(fx.rt.stats().ownership_nodes, 0);
}

#[test]
fn test_native_owned_is_not_released() {
    let fx = fixture();
    let child = widget(&fx, 2);
    let ptr = child.address().unwrap();

    fx.rt.transfer_to(&child, TransferTarget::None).unwrap();
    assert_eq!(child.ownership(), Ownership::NativeOwned);
    drop(child);
    assert_eq!(fx.releases.count(), 0);
    fx.rt.release(ptr, fx.widget, None).unwrap();
}

#[test]
fn test_extra_reference_and_back() {
    let fx = fixture();
    let embedded = widget(&fx, 7);

    fx.rt.transfer_to(&embedded, TransferTarget::NoDynamicOwner).unwrap();
    assert_eq!(embedded.ownership(), Ownership::NativeHasExtraRef);
    assert!(fx.rt.parent_of(&embedded).is_none());

    fx.rt.transfer_back(&embedded);
    assert_eq!(embedded.ownership(), Ownership::DynamicOwned);
    drop(embedded);
    assert_eq!(fx.releases.count(), 1);
}

#[test]
fn test_releasing_parent_releases_subtree() {
    let fx = fixture();
    let root = widget(&fx, 0);
    let mut parent = root.clone();
    for size in 1..5 {
        let child = widget(&fx, size);
        fx.rt.attach(&child, &parent).unwrap();
        parent = child;
    }
    drop(parent);
    assert_eq!(fx.releases.count(), 0);

    drop(root);
    assert_eq!(fx.releases.count(), 5);
}

#[test]
fn test_reattach_and_cycles() {
    let fx = fixture();
    let a = widget(&fx, 1);
    let b = widget(&fx, 2);
    let child = widget(&fx, 3);

    fx.rt.attach(&child, &a).unwrap();
    fx.rt.attach(&child, &b).unwrap();
    assert!(Arc::ptr_eq(&fx.rt.parent_of(&child).unwrap(), &b));
    assert!(fx.rt.children_of(&a).is_empty());

    assert!(fx.rt.attach(&b, &child).is_err());
    assert!(fx.rt.attach(&child, &child).is_err());
}

#[derive(Debug, Clone)]
enum Step {
    ToNone,
    ToExtraRef,
    ToOwner(usize),
    Back,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        Just(Step::ToNone),
        Just(Step::ToExtraRef),
        (0usize..3).prop_map(Step::ToOwner),
        Just(Step::Back),
    ]
}

proptest! {
    #[test]
    fn transfer_back_restores_unparented_dynamic_ownership(steps in prop::collection::vec(step(), 0..12)) {
        let fx = fixture();
        let owners: Vec<_> = (0..3).map(|i| widget(&fx, i)).collect();
        let object = widget(&fx, 9);

        for step in steps {
            match step {
                Step::ToNone => fx.rt.transfer_to(&object, TransferTarget::None).unwrap(),
                Step::ToExtraRef => fx.rt.transfer_to(&object, TransferTarget::NoDynamicOwner).unwrap(),
                Step::ToOwner(i) => fx.rt.transfer_to(&object, TransferTarget::Owner(owners[i].clone())).unwrap(),
                Step::Back => fx.rt.transfer_back(&object),
            }
        }
        fx.rt.transfer_back(&object);

        prop_assert_eq!(object.ownership(), Ownership::DynamicOwned);
        prop_assert!(fx.rt.parent_of(&object).is_none());
        for owner in &owners {
            prop_assert!(fx.rt.children_of(owner).is_empty());
        }
    }
}
