pub mod config;
pub mod errors;
pub mod legend;
pub mod services;
pub mod templates;
pub mod text;
pub mod webmap;

pub use config::PrintServiceConfig;
pub use errors::{PrintError, PrintResult};
pub use services::{PrintCoordinator, PrintRequest, PrintTask};
