// Test Helpers Module - Unit Testing Infrastructure
//
// In-memory stand-ins for the database seam so the range iterator, executor and job
// can be exercised without PostgreSQL. SQL semantics are covered by the integration
// tests under tests/.

pub mod memory;

pub use memory::{MemoryConnection, MemoryTransaction};
