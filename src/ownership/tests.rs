use super::*;
use crate::registry::TypeId;
use crate::wrapper::WrapperType;

fn node_type() -> Arc<WrapperType> {
    Arc::new(WrapperType::new(TypeId(0), "Node", vec![], vec![TypeId(0)]))
}

fn wrapper(ty: &Arc<WrapperType>) -> Arc<Wrapper> {
    Wrapper::new(ty.clone(), Weak::new())
}

#[test]
fn test_attach_prepends_and_holds_reference() {
    let ty = node_type();
    let mut forest = OwnershipForest::new();
    let parent = wrapper(&ty);
    let a = wrapper(&ty);
    let b = wrapper(&ty);

    assert!(forest.attach(&a, &parent).unwrap().is_empty());
    assert!(forest.attach(&b, &parent).unwrap().is_empty());

    let children = forest.children(&parent);
    assert_eq!(children.len(), 2);
    assert!(Arc::ptr_eq(&children[0], &b));
    assert!(Arc::ptr_eq(&children[1], &a));
    assert!(Arc::ptr_eq(&forest.parent(&a).unwrap(), &parent));
    // Test handle, forest reference, and the clone in `children`.
    assert_eq!(Arc::strong_count(&a), 3);
}

#[test]
fn test_detach_middle_child_relinks_siblings() {
    let ty = node_type();
    let mut forest = OwnershipForest::new();
    let parent = wrapper(&ty);
    let kids: Vec<_> = (0..3).map(|_| wrapper(&ty)).collect();
    for k in &kids {
        let _ = forest.attach(k, &parent).unwrap();
    }

    let released = forest.detach(&kids[1]);
    assert_eq!(released.len(), 1);
    drop(released);

    let children = forest.children(&parent);
    assert_eq!(children.len(), 2);
    assert!(Arc::ptr_eq(&children[0], &kids[2]));
    assert!(Arc::ptr_eq(&children[1], &kids[0]));
    assert!(forest.parent(&kids[1]).is_none());
    assert_eq!(Arc::strong_count(&kids[1]), 1);
}

#[test]
fn test_reattach_moves_between_parents() {
    let ty = node_type();
    let mut forest = OwnershipForest::new();
    let first = wrapper(&ty);
    let second = wrapper(&ty);
    let child = wrapper(&ty);

    let _ = forest.attach(&child, &first).unwrap();
    let released = forest.attach(&child, &second).unwrap();
    assert_eq!(released.len(), 1);
    drop(released);

    assert!(forest.children(&first).is_empty());
    assert!(Arc::ptr_eq(&forest.parent(&child).unwrap(), &second));
}

#[test]
fn test_cycles_are_rejected() {
    let ty = node_type();
    let mut forest = OwnershipForest::new();
    let root = wrapper(&ty);
    let leaf = wrapper(&ty);
    let _ = forest.attach(&leaf, &root).unwrap();

    assert!(forest.attach(&root, &leaf).is_err());
    assert!(forest.attach(&root, &root).is_err());
    assert!(forest
        .transfer_to(&root, TransferTarget::Owner(leaf.clone()))
        .is_err());
    assert!(forest.parent(&root).is_none());
}

#[test]
fn test_transfer_protocol_states() {
    let ty = node_type();
    let mut forest = OwnershipForest::new();
    let owner = wrapper(&ty);
    let w = wrapper(&ty);
    w.set_ownership(Ownership::DynamicOwned);

    drop(forest.transfer_to(&w, TransferTarget::Owner(owner.clone())).unwrap());
    assert_eq!(w.ownership(), Ownership::DynamicOwned);
    assert!(Arc::ptr_eq(&forest.parent(&w).unwrap(), &owner));

    drop(forest.transfer_to(&w, TransferTarget::NoDynamicOwner).unwrap());
    assert_eq!(w.ownership(), Ownership::NativeHasExtraRef);
    assert!(forest.parent(&w).is_none());
    assert!(forest.is_owned_by_native(&w));

    drop(forest.transfer_to(&w, TransferTarget::None).unwrap());
    assert_eq!(w.ownership(), Ownership::NativeOwned);
    assert!(!forest.is_owned_by_native(&w));

    drop(forest.transfer_back(&w));
    assert_eq!(w.ownership(), Ownership::DynamicOwned);
    assert_eq!(Arc::strong_count(&w), 1);
}

#[test]
fn test_release_node_frees_children_and_recycles_slot() {
    let ty = node_type();
    let mut forest = OwnershipForest::new();
    let parent = wrapper(&ty);
    let child = wrapper(&ty);
    let _ = forest.attach(&child, &parent).unwrap();
    assert_eq!(forest.node_count(), 2);

    let node = parent.node().unwrap();
    let released = forest.release_node(node);
    assert_eq!(released.len(), 1);
    drop(released);
    assert!(forest.parent(&child).is_none());
    assert_eq!(forest.node_count(), 1);

    // The recycled slot gets a new generation; the old handle is dead.
    let other = wrapper(&ty);
    let _ = forest.attach(&other, &child).unwrap();
    assert!(forest.release_node(node).is_empty());
    assert_eq!(forest.children(&child).len(), 1);
}
