//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module          | Commands handled                                   |
//! |-----------------|-----------------------------------------------------|
//! | `run`           | `Start`, `Resume`, `Goto`                          |
//! | `phase`         | `List`, `Status`, `Reset`                          |
//! | `project`       | `Init`                                             |
//! | `config`        | `Config`                                           |

pub mod config;
pub mod phase;
pub mod project;
pub mod run;

pub use config::cmd_config;
pub use phase::{cmd_list, cmd_reset, cmd_status};
pub use project::cmd_init;
pub use run::{cmd_goto, cmd_resume, cmd_start};
