pub mod constant;
pub mod defs;
pub mod frequency;
pub mod state;

pub use constant::ConstantModel;
pub use defs::*;
pub use frequency::FrequencyModel;
pub use state::{BlobStore, MemoryBlobStore, SqliteBlobStore};
