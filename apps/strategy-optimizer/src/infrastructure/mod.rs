//! Infrastructure Layer
//!
//! Adapters for the ports defined in the application layer:
//!
//! - `engine/`: Backtest engine adapters (HTTP API, scripted in-process engine)
//! - `persistence/`: Job store adapters (SQLite, in-memory)

pub mod engine;
pub mod persistence;
