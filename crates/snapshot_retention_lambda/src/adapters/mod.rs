pub mod fsx;
pub mod memory;
pub mod provider;
