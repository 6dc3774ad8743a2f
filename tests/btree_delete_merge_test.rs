// Delete-driven merge and branch collapse: deleting enough keys from
// a tree that was forced to split leaves the remaining keys readable
// and the deleted ones gone, exercising §4.H's merge-into-sibling and
// branch-collapse paths rather than just single-leaf deletes.

use reldb_core::btree::Bound;
use reldb_core::Database;

#[test]
fn delete_after_split_merges_and_keeps_survivors_readable() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path()).unwrap();
    let mut txn = db.begin();
    let tree = db.create_btree(&mut txn).unwrap();

    let keys: Vec<String> = (0..20).map(|i| format!("k{i:03}")).collect();
    for k in &keys {
        let value = "v".repeat(2000);
        tree.insert(&mut txn, k.as_bytes(), value.as_bytes()).unwrap();
    }
    db.commit(&mut txn);

    // Delete every other key, which empties several leaves and
    // should trigger steal-or-merge with their right sibling.
    let mut txn = db.begin();
    for (i, k) in keys.iter().enumerate() {
        if i % 2 == 0 {
            tree.delete(&mut txn, k.as_bytes()).unwrap();
        }
    }
    db.commit(&mut txn);

    for (i, k) in keys.iter().enumerate() {
        let result = tree.read(k.as_bytes());
        if i % 2 == 0 {
            assert!(result.is_err(), "key {k} should have been deleted");
        } else {
            assert_eq!(result.unwrap(), "v".repeat(2000).into_bytes());
        }
    }

    let remaining: Vec<String> = tree
        .begin(Bound::Unbounded, Bound::Unbounded, true)
        .unwrap()
        .map(|(k, _)| String::from_utf8(k).unwrap())
        .collect();
    let expected: Vec<String> = keys.iter().enumerate().filter(|(i, _)| i % 2 == 1).map(|(_, k)| k.clone()).collect();
    assert_eq!(remaining, expected);
}

#[test]
fn delete_missing_key_returns_not_exists() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path()).unwrap();
    let mut txn = db.begin();
    let tree = db.create_btree(&mut txn).unwrap();
    tree.insert(&mut txn, b"a", b"1").unwrap();
    db.commit(&mut txn);

    let mut txn = db.begin();
    let err = tree.delete(&mut txn, b"missing").unwrap_err();
    assert!(matches!(err, reldb_core::error::Error::NotExists));
    db.abort(&mut txn).unwrap();
}
