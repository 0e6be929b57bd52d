pub mod decisions;
pub mod fraud;
pub mod knowledge;
pub mod memory;
pub mod transactions;
