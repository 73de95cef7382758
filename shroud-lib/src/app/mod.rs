pub mod logging;
pub mod registry;
