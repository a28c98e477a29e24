//! OS-file abstraction and advisory locking (§6).
//!
//! The pager never touches `std::fs` directly; every byte it moves to
//! or from disk goes through a [`Vfs`]/[`VfsFile`] pair. This lets the
//! same pager logic run against a real filesystem ([`OsVfs`]) or an
//! in-process simulation ([`MemoryVfs`]) used by the test suite to
//! exercise crash and torn-write scenarios that are impractical to
//! reproduce against a real disk.

mod memory;
mod os;
mod traits;

pub use memory::{MemoryFile, MemoryVfs};
pub use os::{OsFile, OsVfs};
pub use traits::{DirHandle, Vfs, VfsFile};
