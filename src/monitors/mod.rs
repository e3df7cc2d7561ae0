pub mod host;
pub mod resources;
