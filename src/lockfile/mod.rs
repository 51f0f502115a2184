pub mod editor;
pub mod environments;
pub mod pins;

pub use editor::{edit_file, read_entry, remove_section, upsert_entry};
pub use environments::{PackageDir, SyncReport, drop_stale_publication, sync_environment, sync_environments};
pub use pins::{LockDependencyEntry, LockView, RevisionGroups, read_lock};
