pub mod admission;
pub mod health;
pub mod metrics;
pub mod security;
