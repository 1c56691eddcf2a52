pub mod listing;
pub mod records;

pub use listing::{DirEntry, DirectoryListing, Download, FileEntry, OwnerInfo, UploadedFile};
pub use records::{DirectoryNode, FileRecord, User};
