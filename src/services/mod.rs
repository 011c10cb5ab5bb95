pub mod memory;
pub mod queue;
pub mod store;
pub mod worker;
