//! Database models and DTOs for all domain entities.

pub mod feedback;
pub mod pagination;
pub mod report;
pub mod security_finding;
pub mod vulnerability;
