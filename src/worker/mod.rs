//! In-container worker: execution queue, engine, history, HTTP surface.

pub mod api;
pub mod engine;
pub mod history;
pub mod queue;
