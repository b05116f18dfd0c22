//! Dyad - supervisor for actor/critic pairs of interactive LLM CLIs

pub mod cancel;
pub mod commands;
pub mod config;
pub mod container;
pub mod error;
pub mod report;
pub mod subprocess;
pub mod telemetry;
pub mod template;
pub mod terminal;

#[cfg(test)]
mod test_support;
