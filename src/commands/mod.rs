//! CLI command implementations

mod erase;
pub mod layout;
mod list;
mod probe;
mod read;
mod verify;
mod write;

pub use erase::run_erase;
pub use list::{list_chips, list_programmers};
pub use probe::run_probe;
pub use read::run_read;
pub use verify::run_verify;
pub use write::run_write;
