pub mod enforce;
pub mod trigger;
