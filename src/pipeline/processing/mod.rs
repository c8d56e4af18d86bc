// Pipeline processing: table decoding, name generalization, and cataloguing

pub mod catalog;
pub mod decode;
pub mod normalize;
pub mod table;

pub use catalog::LaserchronImporter;
pub use decode::{decode_table, DecodeOptions};
pub use normalize::{GeneralizedTable, SampleGeneralizer};
