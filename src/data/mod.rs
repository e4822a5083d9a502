//! Dataset layer: bin mappers, bin storage, metadata and dataset builders.

mod bin;
mod bin_mapper;
mod dataset;
mod loader;
mod metadata;

pub use bin::{DenseBin, OrderedSparseBin, SparseBin, SparseBinIterator};
pub use bin_mapper::{BinMapper, BinType};
pub use dataset::{BinIterator, BinStorage, Dataset, DatasetBuilder, Feature};
pub use loader::load_from_file;
pub use metadata::Metadata;
