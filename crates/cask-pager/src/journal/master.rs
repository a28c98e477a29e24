//! Master-journal delete protocol (§3 "Master journal", §4.4).

use std::path::{Path, PathBuf};

use cask_error::Result;
use cask_vfs::{Vfs, VfsFile};

use super::format::JournalHeader;

/// Split a master journal's nul-separated child list into paths.
fn parse_child_list(raw: &[u8]) -> Vec<PathBuf> {
    raw.split(|&b| b == 0)
        .filter(|chunk| !chunk.is_empty())
        .map(|chunk| PathBuf::from(String::from_utf8_lossy(chunk).into_owned()))
        .collect()
}

/// Whether `master_path` is still referenced by any of its children: a
/// child counts as a live reference if it exists and its journal
/// header names this exact master path.
pub fn master_is_referenced<V: Vfs>(vfs: &V, master_path: &Path, page_size: usize) -> Result<bool> {
    let mut master = vfs.open_read_only(master_path)?;
    let size = master.file_size()?;
    let mut raw = vec![0u8; size as usize];
    master.read_at(&mut raw, 0)?;
    drop(master);

    let master_name = master_path.as_os_str().as_encoded_bytes().to_vec();

    for child in parse_child_list(&raw) {
        if !vfs.exists(&child) {
            continue;
        }
        let mut child_file = match vfs.open_read_only(&child) {
            Ok(f) => f,
            Err(_) => continue,
        };
        let child_size = child_file.file_size()?;
        let probe_len = child_size.min(4096) as usize;
        let mut probe = vec![0u8; probe_len];
        child_file.read_at(&mut probe, 0)?;
        let Ok((header, _)) = JournalHeader::decode(&probe) else {
            continue;
        };
        let _ = page_size;
        if header.master_name.as_deref() == Some(master_name.as_slice()) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Run the master delete protocol: unlink `master_path` iff none of
/// its children still reference it.
pub fn try_delete_master<V: Vfs>(vfs: &V, master_path: &Path, page_size: usize) -> Result<()> {
    if !vfs.exists(master_path) {
        return Ok(());
    }
    if !master_is_referenced(vfs, master_path, page_size)? {
        vfs.delete(master_path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::journal::Journal;
    use cask_types::PageNumber;
    use cask_vfs::MemoryVfs;

    #[test]
    fn master_with_no_referencing_children_is_deleted() {
        let vfs = MemoryVfs::new();
        let master_path = Path::new("/db-mj0001");
        let mut master = vfs.open_exclusive(master_path, false).unwrap();
        master.write_at(b"/db-journal\0", 0).unwrap();
        drop(master);

        // The only named child does not exist at all.
        try_delete_master(&vfs, master_path, 4).unwrap();
        assert!(!vfs.exists(master_path));
    }

    #[test]
    fn master_referenced_by_a_live_child_is_kept() {
        let vfs = MemoryVfs::new();
        let master_path = Path::new("/db-mj0001");
        let mut master = vfs.open_exclusive(master_path, false).unwrap();
        master.write_at(b"/db-journal\0", 0).unwrap();
        drop(master);

        let child_file = vfs.open_exclusive(Path::new("/db-journal"), false).unwrap();
        let master_name = master_path.as_os_str().as_encoded_bytes().to_vec();
        let mut journal = Journal::create(child_file, 1, 1, Some(master_name), 4).unwrap();
        journal.append(PageNumber::ONE, &[1; 4]).unwrap();
        journal.sync_normal().unwrap();
        drop(journal);

        try_delete_master(&vfs, master_path, 4).unwrap();
        assert!(vfs.exists(master_path));
    }

    #[test]
    fn master_whose_child_no_longer_references_it_is_deleted() {
        let vfs = MemoryVfs::new();
        let master_path = Path::new("/db-mj0001");
        let mut master = vfs.open_exclusive(master_path, false).unwrap();
        master.write_at(b"/db-journal\0", 0).unwrap();
        drop(master);

        let child_file = vfs.open_exclusive(Path::new("/db-journal"), false).unwrap();
        // Child references a different master entirely.
        let mut journal = Journal::create(child_file, 1, 1, Some(b"/other-mj".to_vec()), 4).unwrap();
        journal.append(PageNumber::ONE, &[1; 4]).unwrap();
        journal.sync_normal().unwrap();
        drop(journal);

        try_delete_master(&vfs, master_path, 4).unwrap();
        assert!(!vfs.exists(master_path));
    }
}
