//! Assertion Engine (§4.8): evaluates a task's declarative
//! [`mcpbench_core::TaskAssertions`] against its recorded
//! [`mcpbench_core::CallHistory`].

mod engine;

pub use engine::evaluate;
