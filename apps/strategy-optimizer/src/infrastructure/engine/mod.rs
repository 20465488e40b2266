//! Backtest Engine Adapters
//!
//! Implementations of `BacktestEnginePort`:
//! - `HttpBacktestEngine`: the engine's REST API with retries
//! - `ScriptedEngine`: deterministic in-process engine for tests and dry runs

mod api_types;
mod http;
mod http_client;
mod scripted;

pub use http::HttpBacktestEngine;
pub use scripted::{NodeScript, ScriptedEngine};
