pub mod directory;
pub mod file_record;
pub mod user;
