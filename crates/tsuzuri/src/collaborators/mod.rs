//! Filesystem and process-backed implementations of the collaborator traits.

mod export;
mod generate;
mod scan;

pub use export::FileExporter;
pub use generate::{CommandGenerator, EchoGenerator};
pub use scan::DirectoryScanner;
