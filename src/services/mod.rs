//! Business logic services.

pub mod alerts;
pub mod autofix;
pub mod feedback;
pub mod findings_finder;
pub mod fingerprint;
pub mod patch;
pub mod reconciler;
pub mod store_reports;
pub mod vulnerabilities;
