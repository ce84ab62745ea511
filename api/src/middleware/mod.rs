pub mod access_log;
pub mod admin;
pub mod rate_limit;
