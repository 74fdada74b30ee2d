pub mod file;
pub mod runtime;
