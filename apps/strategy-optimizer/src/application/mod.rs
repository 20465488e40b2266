//! Application Layer
//!
//! The application layer coordinates the optimisation domain with the outside
//! world. It defines:
//!
//! - **Ports**: Interfaces to the backtest engine and the job store
//! - **Services**: The orchestrator, the live run registry and the run driver
//! - **DTOs**: Requests and views exposed by the orchestrator

pub mod dto;
pub mod ports;
pub mod services;

pub use dto::*;
pub use ports::*;
pub use services::*;
