pub mod http;
pub mod sessions;
