//! Proof assertions

use chainkv::{ChainState, SafeItem, Store};

/// Assert that `item` verifies against `trusted` and return the new state
pub fn assert_verifies(item: &SafeItem, trusted: &ChainState) -> ChainState {
    match item.verify(trusted) {
        Ok(state) => state,
        Err(e) => panic!(
            "item for tx {} should verify against tx {}: {e}",
            item.tx_id, trusted.tx_id
        ),
    }
}

/// Assert that the store's head extends `earlier`
pub fn assert_extends(store: &Store, earlier: &ChainState) {
    let head = store.current_root();
    let proof = store.consistency(earlier.tx_id).unwrap();
    assert!(
        proof.verify(&earlier.alh, &head.alh),
        "head {} does not extend tx {}",
        head.tx_id,
        earlier.tx_id
    );
}
