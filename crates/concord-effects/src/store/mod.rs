//! Durable store handlers

mod filesystem;
mod memory;

pub use filesystem::FilesystemStore;
pub use memory::MemoryStore;
