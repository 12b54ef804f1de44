pub mod index;
pub mod writer;

pub use index::DocumentIndex;
pub use writer::MultiSourceJsonlWriter;
