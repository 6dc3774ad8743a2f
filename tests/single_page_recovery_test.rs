// A page whose on-disk checksum no longer matches its body is
// rebuilt by single-page recovery (§4.F) from the log alone, rather
// than the whole-database analysis/redo/undo pass.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};

use reldb_core::config::{PAGE_HEADER_SIZE, PAGE_SIZE};
use reldb_core::error::Error;
use reldb_core::Database;

#[test]
fn corrupted_page_is_rebuilt_by_single_page_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().to_path_buf();

    let db = Database::open(&db_path).unwrap();
    let mut txn = db.begin();
    let tree = db.create_btree(&mut txn).unwrap();
    tree.insert(&mut txn, b"a", b"1").unwrap();
    db.commit(&mut txn);
    let root = tree.root_page_id();
    db.pool().flush_for_test(root).unwrap();

    // Flip a byte inside the body region of the root page's on-disk
    // image, past the header, so the checksum no longer matches. Done
    // without restarting the process, so the whole-database recovery
    // pass (which would otherwise self-heal the page via ordinary
    // redo) never runs.
    {
        let mut file = OpenOptions::new().write(true).open(db_path.join("data.db")).unwrap();
        let offset = root * PAGE_SIZE as u64 + PAGE_HEADER_SIZE as u64 + 10;
        file.seek(SeekFrom::Start(offset)).unwrap();
        file.write_all(&[0xFFu8]).unwrap();
    }

    db.pool().drop_all_pages();

    let err = db.page_manager().get_page(root).unwrap_err();
    assert!(matches!(err, Error::Corrupt(_)));

    db.recovery_manager().single_page_recovery(root).unwrap();

    let tree = db.open_btree(root);
    assert_eq!(tree.read(b"a").unwrap(), b"1");
}
