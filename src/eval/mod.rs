pub mod analysis;
pub mod matcher;
pub mod report;
pub mod runner;
pub mod scenario;
