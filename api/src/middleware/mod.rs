pub mod containment;
pub mod cors;
pub mod rate_limit;
pub mod telemetry;
