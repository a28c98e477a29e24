//! End-to-end scenarios driven entirely through the public `Connection`
//! facade, against a real file on disk.

use cask::{Connection, PageNumber, PageSize};

fn pn(n: u32) -> PageNumber {
    PageNumber::new(n).unwrap()
}

#[test]
fn statement_rollback_leaves_the_enclosing_transaction_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stmt.db");

    let options = cask::OpenOptions::new().with_page_size(PageSize::new(512).unwrap());
    let mut conn = Connection::open_with_options(&path, options).unwrap();

    conn.begin(None).unwrap();
    conn.write_page(pn(1), &[b'A'; 512]).unwrap();

    conn.stmt_begin().unwrap();
    conn.write_page(pn(1), &[b'B'; 512]).unwrap();
    conn.write_page(pn(2), &[b'C'; 512]).unwrap();
    conn.stmt_rollback().unwrap();

    assert_eq!(conn.read_page(pn(1)).unwrap(), vec![b'A'; 512]);
    assert_eq!(conn.state(), cask::PagerState::Reserved);

    conn.commit().unwrap();
    assert_eq!(conn.read_page(pn(1)).unwrap(), vec![b'A'; 512]);
}

#[test]
fn reopening_after_commit_sees_the_committed_change_counter() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("counter.db");

    let make_options = || cask::OpenOptions::new().with_page_size(PageSize::new(512).unwrap());
    let mut conn = Connection::open_with_options(&path, make_options()).unwrap();
    conn.begin(None).unwrap();
    conn.write_page(pn(1), &[0u8; 512]).unwrap();
    conn.commit().unwrap();
    conn.close().unwrap();

    let mut conn = Connection::open_with_options(&path, make_options()).unwrap();
    let page1 = conn.read_page(pn(1)).unwrap();
    let counter = u32::from_be_bytes(page1[24..28].try_into().unwrap());
    assert_eq!(counter, 1);
}
