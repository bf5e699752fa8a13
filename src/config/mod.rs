pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{load_config, load_config_file};
pub use models::*;
pub use validation::{SidecarConfigValidator, ValidationError, ValidationResult};
