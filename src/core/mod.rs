pub mod archive;
pub mod archiving;
pub mod comparator;
pub mod folder;
pub mod manager;
pub mod mirror;
pub mod pending;
pub mod scanner;
pub mod timing;

pub use archiving::{find_hashed_file, mirror_hashed_file, ArchivingSharedFolderManager};
pub use comparator::{ActionSummary, CompareConfig, FileComparator, MirrorPolicy, SyncAction};
pub use folder::{Folder, LocalTree, RemoteTree, TreeOpener};
pub use manager::{run_all, Command, FolderManager, RunSummary, SharedFolderManager};
pub use mirror::{mirror, MirrorOptions, MirrorReport};
pub use pending::PendingRemovals;
pub use scanner::{FileScanner, ScanConfig};
pub use timing::DurationReport;
