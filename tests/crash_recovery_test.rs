// Scenario S3: a committed transaction's writes survive a restart
// that discards every in-memory page, driven purely through the
// checkpoint master record and the write-ahead log.

use reldb_core::btree::Bound;
use reldb_core::Database;

#[test]
fn committed_writes_survive_restart() {
    let dir = tempfile::tempdir().unwrap();

    let root = {
        let db = Database::open(dir.path()).unwrap();
        let mut txn = db.begin();
        let tree = db.create_btree(&mut txn).unwrap();
        for i in 0..10 {
            let key = format!("k{i}");
            let value = format!("v{i}");
            tree.insert(&mut txn, key.as_bytes(), value.as_bytes()).unwrap();
        }
        db.commit(&mut txn);
        tree.root_page_id()
        // `db` drops here: no explicit flush, simulating a crash that
        // loses every in-memory page and pin.
    };

    let db = Database::open(dir.path()).unwrap();
    let tree = db.open_btree(root);
    for i in 0..10 {
        let key = format!("k{i}");
        let expected = format!("v{i}");
        assert_eq!(tree.read(key.as_bytes()).unwrap(), expected.as_bytes());
    }

    let all: Vec<_> = tree.begin(Bound::Unbounded, Bound::Unbounded, true).unwrap().collect();
    assert_eq!(all.len(), 10);
}
