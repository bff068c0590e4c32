use mosaic_ir::{flatten, unflatten, Index, NdIndexer, OperandTree, Slice};
use proptest::prelude::*;

fn index() -> impl Strategy<Value = Index<u32>> {
    prop_oneof![
        (-8i64..8).prop_map(Index::Int),
        (0usize..16, 0usize..16, 1usize..4).prop_map(|(a, b, c)| Index::Slice(Slice::strided(a, b, c))),
        Just(Index::Full),
        any::<u32>().prop_map(Index::Dynamic),
        (any::<u32>(), 0usize..16).prop_map(|(start, size)| Index::DynamicSlice { start, size }),
    ]
}

fn indexer() -> impl Strategy<Value = NdIndexer<u32>> {
    prop::collection::vec(index(), 0..4).prop_map(|indices| {
        let shape = vec![16; indices.len()];
        NdIndexer { indices, shape }
    })
}

fn tree() -> impl Strategy<Value = OperandTree<u32>> {
    let leaf = prop_oneof![
        any::<u32>().prop_map(OperandTree::Leaf),
        Just(OperandTree::<u32>::None),
        indexer().prop_map(OperandTree::Indexer),
    ];
    leaf.prop_recursive(4, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(OperandTree::Tuple),
            prop::collection::btree_map("[a-z]{1,3}", inner, 0..4).prop_map(OperandTree::Dict),
        ]
    })
}

proptest! {
    #[test]
    fn flatten_then_unflatten_rebuilds_the_tree(t in tree()) {
        let (leaves, def) = flatten(t.clone());
        prop_assert_eq!(leaves.len(), def.num_leaves());
        let rebuilt = unflatten(&def, leaves).expect("leaf count matches");
        prop_assert_eq!(rebuilt, t);
    }

    #[test]
    fn dropping_a_leaf_is_reported(t in tree()) {
        let (mut leaves, def) = flatten(t);
        prop_assume!(!leaves.is_empty());
        leaves.pop();
        prop_assert!(unflatten(&def, leaves).is_err());
    }
}
