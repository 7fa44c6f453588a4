pub mod health;
pub mod rate_limits;
pub mod runs;
