pub mod chrome_page;
pub mod files;

pub use chrome_page::ChromePage;
pub use files::{list_matching, list_subdirs, ArtifactRecord};
