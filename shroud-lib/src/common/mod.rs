pub mod errors;
pub mod http;
pub mod pool;
pub mod tls;
