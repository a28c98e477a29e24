//! End-to-end check against the real filesystem (as opposed to the
//! in-memory simulation the rest of the suite uses), to catch anything
//! that only the `MemoryVfs`/`OsVfs` divergence would expose.

use cask_pager::{OpenOptions, Pager};
use cask_types::{PageNumber, PageSize};
use cask_vfs::OsVfs;

fn pn(n: u32) -> PageNumber {
    PageNumber::new(n).unwrap()
}

#[test]
fn commit_and_reopen_round_trips_through_real_files() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("data.db");

    let opts = OpenOptions::new().with_page_size(PageSize::new(512).unwrap());
    let mut pager = Pager::open(OsVfs::new(), &db_path, opts).unwrap();

    pager.begin(None).unwrap();
    let page = pager.get(pn(1)).unwrap();
    pager.write(page).unwrap();
    pager.page_data_mut(page)[10] = 0x42;
    pager.commit().unwrap();
    pager.close().unwrap();

    let mut journal_path = db_path.clone().into_os_string();
    journal_path.push("-journal");
    assert!(!std::path::Path::new(&journal_path).exists());

    let opts = OpenOptions::new().with_page_size(PageSize::new(512).unwrap());
    let mut pager = Pager::open(OsVfs::new(), &db_path, opts).unwrap();
    let page = pager.get(pn(1)).unwrap();
    assert_eq!(pager.page_data(page)[10], 0x42);
}
