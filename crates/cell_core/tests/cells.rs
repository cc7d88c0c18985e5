use cell_core::encoding::{decode, MAX_EMBEDDED_LENGTH};
use cell_core::record::{Record, ACCOUNT_STATUS, FORMATS, RECEIPT, TRANSACTION};
use cell_core::store::{load_all, preload, resolve_all, resolve_with_timeout, WalkLimits};
use cell_core::{
    Cell, CellError, CellMap, KeyPair, MemStore, Ref, SignedData, Store, VerificationCache,
};
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;

fn random_cell(rng: &mut rand::rngs::StdRng, depth: u32) -> Cell {
    let pick = if depth == 0 { rng.gen_range(0..5) } else { rng.gen_range(0..8) };
    match pick {
        0 => Cell::Nil,
        1 => Cell::Long(rng.gen()),
        2 => Cell::Bool(rng.gen()),
        3 => {
            let len = rng.gen_range(0..300);
            Cell::Blob((0..len).map(|_| rng.gen()).collect())
        }
        4 => Cell::string("s".repeat(rng.gen_range(0..200))),
        5 => Cell::Vector(
            (0..rng.gen_range(0..6))
                .map(|_| Ref::new(random_cell(rng, depth - 1)))
                .collect(),
        ),
        6 => {
            let mut m = CellMap::new();
            for _ in 0..rng.gen_range(0..5) {
                m = m.assoc(Cell::Long(rng.gen_range(0..1000)), random_cell(rng, depth - 1));
            }
            Cell::Map(m)
        }
        _ => {
            let format = FORMATS[rng.gen_range(0..FORMATS.len())];
            let values = (0..format.count())
                .map(|_| Ref::new(random_cell(rng, depth - 1)))
                .collect();
            Cell::Record(Record::create(format, values).unwrap())
        }
    }
}

#[test]
fn stored_and_embedded_trees_keep_their_hash() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(0xce11);
    for _ in 0..50 {
        let cell = random_cell(&mut rng, 3);
        let bytes = cell.encode();
        let back = decode(&bytes).unwrap();
        assert_eq!(back, cell);
        assert_eq!(back.hash(), cell.hash());

        let store = MemStore::new();
        let root = Ref::new(cell.clone());
        root.persist(&store).unwrap();
        let loaded = load_all(root.hash(), &store).unwrap();
        assert_eq!(loaded.value().unwrap().as_ref(), &cell);
        assert_eq!(loaded.hash(), root.hash());
    }
}

#[test]
fn parent_hash_ignores_child_residency() {
    let store = MemStore::new();
    let big = Ref::new(Cell::Blob(vec![8u8; 500]));
    let parent = Cell::Vector(vec![big.clone(), Ref::new(Cell::Long(3))]);
    Ref::new(parent.clone()).persist(&store).unwrap();

    let decoded = decode(&parent.encode()).unwrap();
    let child = decoded.get_ref(0).unwrap();
    assert!(!child.is_resolved());
    let before = decoded.hash();
    child.resolve(&store).unwrap();
    assert!(child.is_resolved());
    assert_eq!(decoded.hash(), before);
    assert_eq!(before, parent.hash());

    // a small cell named by hash is never canonical
    let small = Ref::new(Cell::Long(3));
    small.persist(&store).unwrap();
    let odd = Cell::Vector(vec![Ref::for_hash(small.hash())]);
    let odd_hash = odd.hash();
    assert!(matches!(
        odd.get_ref(0).unwrap().resolve(&store),
        Err(CellError::Format(_))
    ));
    assert_eq!(odd.hash(), odd_hash);
}

#[test]
fn embedding_threshold_is_exact() {
    // BLOB tag + 2-byte length + payload
    let at_limit = Cell::Blob(vec![0u8; MAX_EMBEDDED_LENGTH - 3]);
    assert_eq!(at_limit.encode().len(), MAX_EMBEDDED_LENGTH);
    assert!(Ref::new(at_limit).is_embedded());
    let over = Cell::Blob(vec![0u8; MAX_EMBEDDED_LENGTH - 2]);
    assert!(!Ref::new(over).is_embedded());
}

#[test]
fn partially_stored_tree_reports_missing_data() {
    let store = MemStore::new();
    let leaf = Ref::new(Cell::Blob(vec![1u8; 400]));
    let root = Ref::new(Cell::Vector(vec![leaf.clone()]));
    // only the root goes in
    store.put(root.hash(), root.encoding().unwrap()).unwrap();

    let top = Ref::load(root.hash(), &store).unwrap();
    assert_eq!(top.value().unwrap().ref_count(), 1);
    match resolve_all(&top, &store) {
        Err(CellError::MissingData { hash, .. }) => assert_eq!(hash, leaf.hash()),
        other => panic!("expected missing data, got {other:?}"),
    }
}

#[tokio::test]
async fn async_resolution_paths() {
    let store = Arc::new(MemStore::new());
    let leaf = Ref::new(Cell::string("x".repeat(500)));
    let mut children = vec![leaf.clone()];
    children.extend((0..4u8).map(|i| Ref::new(Cell::Blob(vec![i; 200]))));
    let root = Ref::new(Cell::Vector(children));
    assert!(!root.is_embedded());
    root.persist(store.as_ref()).unwrap();

    let cell = resolve_with_timeout(Ref::for_hash(leaf.hash()), store.clone(), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(cell.as_ref(), leaf.value().unwrap().as_ref());

    let tree = preload(
        Ref::for_hash(root.hash()),
        store.clone(),
        Duration::from_secs(5),
        WalkLimits::default(),
    )
    .await
    .unwrap();
    assert!(tree.value().unwrap().get_ref(0).unwrap().is_resolved());

    let missing = resolve_with_timeout(
        Ref::for_hash(cell_hash::blake3(b"absent")),
        store,
        Duration::from_secs(5),
    )
    .await;
    assert!(matches!(missing, Err(CellError::MissingData { .. })));
}

#[test]
fn record_map_law_holds_for_every_format() {
    for format in [&TRANSACTION, &ACCOUNT_STATUS, &RECEIPT] {
        let values = format
            .keys
            .iter()
            .map(|k| Ref::new(Cell::string(*k)))
            .collect();
        let rec = Record::create(format, values).unwrap();
        let map = rec.to_map();
        assert_eq!(Record::from_map(format, &map).unwrap(), rec);
        for key in format.keys {
            let k = Cell::keyword(*key);
            let v = rec.get(&k).unwrap().clone();
            assert_eq!(map.get(&k), Some(&v));
            assert_eq!(rec.assoc(k, v), Cell::Record(rec.clone()));
        }
    }
}

#[test]
fn signature_lifecycle_across_store() {
    let cache = VerificationCache::new(32);
    let store = MemStore::new();
    let kp = KeyPair::from_seed(&[7u8; 32]);
    let value = Ref::new(Cell::Blob(vec![9u8; 256]));

    let good = kp.sign_data_in(value.clone(), &cache);
    assert!(good.is_signature_checked_in(&cache));

    let bad = SignedData::create(kp.account_key(), kp.sign(b"unrelated"), value);
    assert!(!bad.is_signature_checked_in(&cache));
    assert!(bad.validate_signature_in(&cache).is_err());

    let envelope = Ref::new(Cell::Signed(bad.clone()));
    envelope.persist(&store).unwrap();
    let reread = Ref::load(envelope.hash(), &store).unwrap();
    let Cell::Signed(copy) = reread.value().unwrap().as_ref() else {
        panic!("not a signed cell");
    };
    assert_eq!(copy.hash(), bad.hash());
    assert!(copy.is_signature_checked_in(&cache));
    assert!(!copy.check_signature_in(&cache));
    assert!(copy.value_ref().is_bad());
}
