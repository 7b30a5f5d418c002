//! Cross-component tests for the Merkle commitment engine.

use remu_merkle::{
    concat_hash, keccak256, tree_hash, BackMerkleTree, Hash, MerkleError, PageMerkleTree,
    PristineHashes,
};

/// Deterministic pseudo-random bytes for payloads.
fn fill_bytes(buf: &mut [u8], seed: u64) {
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
    for b in buf.iter_mut() {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        *b = (state >> 56) as u8;
    }
}

/// Root of a fully materialised tree over `leaves` padded with pristine
/// leaf hashes to `2^depth` slots.
fn materialised_root(leaves: &[Hash], depth: u32, pristine_leaf: Hash) -> Hash {
    let mut level: Vec<Hash> = leaves.to_vec();
    level.resize(1usize << depth, pristine_leaf);
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| concat_hash(&pair[0], &pair[1]))
            .collect();
    }
    level[0]
}

#[test]
fn test_back_tree_matches_materialised_tree() {
    // 2^(10-3) = 128 leaf slots.
    let pristine = PristineHashes::new(10, 3).unwrap();
    let pristine_leaf = pristine.hash_of(3).unwrap();
    for n in [0usize, 1, 2, 3, 5, 64, 127, 128] {
        let mut tree = BackMerkleTree::new(10, 3, 3).unwrap();
        let leaves: Vec<Hash> = (0..n).map(|i| keccak256(&(i as u64).to_be_bytes())).collect();
        for leaf in &leaves {
            tree.push_back(*leaf).unwrap();
        }
        assert_eq!(
            tree.root_hash(),
            materialised_root(&leaves, 7, pristine_leaf),
            "back tree root diverges after {} pushes",
            n
        );
    }
}

#[test]
fn test_back_tree_next_leaf_proofs_are_sound() {
    let mut tree = BackMerkleTree::new(9, 3, 3).unwrap();
    let pristine = PristineHashes::new(9, 3).unwrap();
    for i in 0u64..64 {
        let proof = tree.next_leaf_proof().unwrap();
        assert!(proof.verify(), "proof for slot {} does not verify", i);
        assert_eq!(proof.target_address(), i << 3);
        assert_eq!(*proof.target_hash(), pristine.hash_of(3).unwrap());
        assert_eq!(*proof.root_hash(), tree.root_hash());
        tree.push_back(keccak256(&i.to_be_bytes())).unwrap();
    }
    assert!(tree.next_leaf_proof().is_err());
}

#[test]
fn test_back_tree_single_byte_leaves() {
    // Geometry with one-byte words and leaves: 32 slots.
    let pristine = PristineHashes::new(5, 0).unwrap();
    let mut tree = BackMerkleTree::new(5, 0, 0).unwrap();
    assert_eq!(tree.root_hash(), pristine.hash_of(5).unwrap());

    // One arbitrary leaf, checked against explicit materialisation.
    let h = keccak256(b"leaf");
    tree.push_back(h).unwrap();
    assert_eq!(
        tree.root_hash(),
        materialised_root(&[h], 5, pristine.hash_of(0).unwrap())
    );

    // Fill the tree with pristine leaf hashes: the root must come back to
    // the pristine root.
    let mut tree = BackMerkleTree::new(5, 0, 0).unwrap();
    for _ in 0..32 {
        tree.push_back(pristine.hash_of(0).unwrap()).unwrap();
    }
    assert_eq!(tree.root_hash(), pristine.hash_of(5).unwrap());
    assert_eq!(tree.push_back(h), Err(MerkleError::TooManyLeaves));
}

#[test]
fn test_page_tree_agrees_with_bulk_hash() {
    // 2^15 bytes of payload in 64 pages of 512 bytes.
    let mut payload = vec![0u8; 1 << 15];
    fill_bytes(&mut payload, 42);

    let mut tree = PageMerkleTree::new(15, 9, 3).unwrap();
    tree.begin_update().unwrap();
    for (i, page) in payload.chunks(512).enumerate() {
        tree.update_page((i as u64) << 9, tree_hash(page)).unwrap();
    }
    let root = tree.end_update().unwrap();

    assert_eq!(root, tree_hash(&payload));
    assert_eq!(tree.root_hash().unwrap(), tree_hash(&payload));
}

#[test]
fn test_page_tree_batched_updates_match_single_bracket() {
    let mut payload = vec![0u8; 1 << 14];
    fill_bytes(&mut payload, 7);

    // All pages in one bracket.
    let mut one = PageMerkleTree::new(14, 10, 3).unwrap();
    one.begin_update().unwrap();
    for (i, page) in payload.chunks(1024).enumerate() {
        one.update_page((i as u64) << 10, tree_hash(page)).unwrap();
    }
    one.end_update().unwrap();

    // One bracket per page, in reverse order.
    let mut many = PageMerkleTree::new(14, 10, 3).unwrap();
    for (i, page) in payload.chunks(1024).enumerate().rev() {
        many.begin_update().unwrap();
        many.update_page((i as u64) << 10, tree_hash(page)).unwrap();
        many.end_update().unwrap();
    }

    assert_eq!(one.root_hash().unwrap(), many.root_hash().unwrap());
}

#[test]
fn test_page_tree_proofs_are_sound_and_tight() {
    let mut payload = vec![0u8; 1 << 13];
    fill_bytes(&mut payload, 99);

    let mut tree = PageMerkleTree::new(13, 9, 3).unwrap();
    tree.begin_update().unwrap();
    for (i, page) in payload.chunks(512).enumerate() {
        tree.update_page((i as u64) << 9, tree_hash(page)).unwrap();
    }
    tree.end_update().unwrap();

    for log2_size in [9u32, 10, 12, 13] {
        let address = if log2_size == 13 { 0 } else { 1u64 << log2_size };
        let proof = tree.get_proof(address, log2_size).unwrap();
        assert!(proof.verify());
        assert_eq!(
            *proof.target_hash(),
            tree_hash(&payload[address as usize..address as usize + (1 << log2_size)])
        );

        // Tightness: flipping any single sibling byte must break the proof.
        for level in log2_size..13 {
            let mut tampered = proof.clone();
            let mut sibling = *tampered.sibling_hash(level).unwrap();
            sibling[(level % 32) as usize] ^= 0x01;
            tampered.set_sibling_hash(level, sibling).unwrap();
            assert!(
                !tampered.verify(),
                "tampered sibling at level {} still verifies",
                level
            );
        }
        let mut tampered = proof.clone();
        let mut target = *tampered.target_hash();
        target[0] ^= 0x01;
        tampered.set_target_hash(target);
        assert!(!tampered.verify());
    }
}

#[test]
fn test_page_proof_slices_to_page_subtree() {
    let mut payload = vec![0u8; 1 << 13];
    fill_bytes(&mut payload, 5);

    let mut tree = PageMerkleTree::new(13, 9, 3).unwrap();
    tree.begin_update().unwrap();
    for (i, page) in payload.chunks(512).enumerate() {
        tree.update_page((i as u64) << 9, tree_hash(page)).unwrap();
    }
    tree.end_update().unwrap();

    // Slice a page proof down to the 2^11-byte subtree containing it.
    let proof = tree.get_proof(0xA00, 9).unwrap();
    let subtree_root = tree_hash(&payload[0x800..0x1000]);
    let sliced = proof.slice(11, subtree_root).unwrap();
    assert!(sliced.verify());
    assert_eq!(sliced.sibling_hashes().len(), 2);
}

#[test]
fn test_back_and_page_trees_commit_identically() {
    // Both trees over the same 2^12-byte payload with 2^9-byte leaves must
    // produce the same root.
    let mut payload = vec![0u8; 1 << 12];
    fill_bytes(&mut payload, 1234);

    let mut back = BackMerkleTree::new(12, 9, 3).unwrap();
    let mut page = PageMerkleTree::new(12, 9, 3).unwrap();
    page.begin_update().unwrap();
    for (i, leaf) in payload.chunks(512).enumerate() {
        back.push_back(tree_hash(leaf)).unwrap();
        page.update_page((i as u64) << 9, tree_hash(leaf)).unwrap();
    }
    page.end_update().unwrap();

    assert_eq!(back.root_hash(), page.root_hash().unwrap());
}
