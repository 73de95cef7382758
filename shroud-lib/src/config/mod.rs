pub mod def;
pub mod scheme;
