pub mod minimize;
pub mod shutdown;
