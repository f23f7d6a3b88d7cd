pub mod calibrations;
pub mod experiments;
pub mod generate;
pub mod health;
