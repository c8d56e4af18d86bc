pub mod cas_fs;

pub use cas_fs::{read_cas, write_cas};
