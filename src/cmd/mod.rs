//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module      | Commands handled  |
//! |-------------|-------------------|
//! | `spec`      | `Check`, `Plan`   |
//! | `simulate`  | `Simulate`        |
//! | `config`    | `Config`          |

pub mod config;
pub mod simulate;
pub mod spec;

pub use config::cmd_config;
pub use simulate::cmd_simulate;
pub use spec::{cmd_check, cmd_plan};
