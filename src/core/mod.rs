pub mod counter;
pub mod engine;
pub mod error;
pub mod eval;
pub mod histogram;
pub mod io;
pub mod model;
pub mod partition;
pub mod sketch;
