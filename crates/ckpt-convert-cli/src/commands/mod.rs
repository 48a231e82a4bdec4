//! CLI command implementations

pub mod config;
pub mod convert;
pub mod export;
pub mod inspect;

pub use config::ConfigAction;
pub use convert::ConvertCommand;
pub use export::ExportCommand;
pub use inspect::InspectCommand;
