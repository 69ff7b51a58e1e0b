pub mod table;
pub mod zip;
