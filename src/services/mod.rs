pub mod codegen;
pub mod receipt;
pub mod sync;
pub mod visits;
