//! Route definitions for the vulnerability store API.

pub mod alerts;
pub mod feedback;
pub mod findings;
pub mod health;
pub mod reports;
pub mod vulnerabilities;
