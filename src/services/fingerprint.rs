//! Fingerprint computation for finding identity across scans.
//!
//! Two hashes per finding: the location fingerprint tracks where an issue
//! currently sits and is recomputed every scan, while the project fingerprint
//! is the stable identity key used to match the same logical vulnerability
//! across re-scans. The project fingerprint excludes volatile fields (line
//! numbers, image tags, package versions) that shift without the underlying
//! issue changing.

use sha2::{Digest, Sha256};

use crate::errors::AppError;
use crate::models::report::{Identifier, Location, ReportType};

/// Compute the content/position hash of a finding's current location.
///
/// May drift across scans as code moves; persisted on the finding row and
/// refreshed on every reconcile.
pub fn location_fingerprint(location: &Location) -> Result<String, AppError> {
    validate(location)?;
    let input = match location {
        Location::File {
            file,
            start_line,
            end_line,
        } => format!(
            "file:{file}:{}:{}",
            start_line.map_or(String::new(), |l| l.to_string()),
            end_line.map_or(String::new(), |l| l.to_string()),
        ),
        Location::Dependency {
            file,
            package,
            version,
        } => format!(
            "dependency:{}:{package}:{version}",
            file.as_deref().unwrap_or("")
        ),
        Location::Image {
            image,
            operating_system,
            package,
            version,
        } => format!(
            "image:{image}:{}:{}:{}",
            operating_system.as_deref().unwrap_or(""),
            package.as_deref().unwrap_or(""),
            version.as_deref().unwrap_or(""),
        ),
        Location::Url {
            hostname,
            path,
            method,
            param,
        } => format!(
            "url:{}:{path}:{}:{}",
            hostname.as_deref().unwrap_or(""),
            method.as_deref().unwrap_or(""),
            param.as_deref().unwrap_or(""),
        ),
        Location::Crash {
            crash_type,
            crash_state,
        } => format!("crash:{crash_type}:{}", crash_state.as_deref().unwrap_or("")),
    };
    Ok(hash(&input))
}

/// Compute the stable identity hash for a finding.
///
/// Derived from the primary (first) identifier plus the stable part of the
/// location, so the same rule firing at two sites yields two fingerprints
/// while a line shift or version bump yields the same one.
pub fn project_fingerprint(
    report_type: ReportType,
    identifiers: &[Identifier],
    location: &Location,
) -> Result<String, AppError> {
    let primary = identifiers
        .first()
        .ok_or_else(|| AppError::InvalidFinding("finding has no identifiers".to_string()))?;
    let context = stable_context(location)?;
    Ok(hash(&format!(
        "{}:{}:{}:{context}",
        report_type.as_str(),
        primary.id_type,
        primary.value,
    )))
}

/// The location fields that survive churn in scan output.
fn stable_context(location: &Location) -> Result<String, AppError> {
    validate(location)?;
    Ok(match location {
        Location::File { file, .. } => normalize_path(file),
        Location::Dependency { package, .. } => package.clone(),
        Location::Image { image, package, .. } => format!(
            "{}:{}",
            strip_image_tag(image),
            package.as_deref().unwrap_or("")
        ),
        Location::Url {
            path,
            method,
            param,
            ..
        } => format!(
            "{path}:{}:{}",
            method.as_deref().unwrap_or(""),
            param.as_deref().unwrap_or("")
        ),
        Location::Crash { crash_type, .. } => crash_type.clone(),
    })
}

fn validate(location: &Location) -> Result<(), AppError> {
    let problem = match location {
        Location::File { file, .. } if file.trim().is_empty() => Some("empty file path"),
        Location::Dependency { package, version, .. }
            if package.trim().is_empty() || version.trim().is_empty() =>
        {
            Some("empty package coordinates")
        }
        Location::Image { image, .. } if image.trim().is_empty() => Some("empty image name"),
        Location::Url { path, .. } if path.trim().is_empty() => Some("empty url path"),
        Location::Crash { crash_type, .. } if crash_type.trim().is_empty() => {
            Some("empty crash type")
        }
        _ => None,
    };
    match problem {
        Some(p) => Err(AppError::InvalidFinding(format!("malformed location: {p}"))),
        None => Ok(()),
    }
}

fn normalize_path(path: &str) -> String {
    path.trim().trim_start_matches("./").replace('\\', "/")
}

/// Drop the tag or digest suffix; a rebuilt image is the same logical target.
fn strip_image_tag(image: &str) -> &str {
    let name = image.split_once('@').map_or(image, |(name, _)| name);
    name.split_once(':').map_or(name, |(name, _)| name)
}

/// SHA-256 hash a string and return the hex-encoded digest.
fn hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cwe(value: &str) -> Identifier {
        Identifier {
            id_type: "cwe".to_string(),
            name: format!("CWE-{value}"),
            value: value.to_string(),
            external_id: None,
        }
    }

    fn file_location(file: &str, line: u32) -> Location {
        Location::File {
            file: file.to_string(),
            start_line: Some(line),
            end_line: None,
        }
    }

    #[test]
    fn project_fingerprint_stable_across_line_shifts() {
        let ids = [cwe("327")];
        let fp1 =
            project_fingerprint(ReportType::Sast, &ids, &file_location("app.rb", 10)).unwrap();
        let fp2 =
            project_fingerprint(ReportType::Sast, &ids, &file_location("app.rb", 12)).unwrap();
        assert_eq!(fp1, fp2);
    }

    #[test]
    fn location_fingerprint_changes_with_line() {
        let fp1 = location_fingerprint(&file_location("app.rb", 10)).unwrap();
        let fp2 = location_fingerprint(&file_location("app.rb", 12)).unwrap();
        assert_ne!(fp1, fp2);
    }

    #[test]
    fn different_primary_identifier_different_fingerprint() {
        let loc = file_location("app.rb", 10);
        let fp1 = project_fingerprint(ReportType::Sast, &[cwe("327")], &loc).unwrap();
        let fp2 = project_fingerprint(ReportType::Sast, &[cwe("328")], &loc).unwrap();
        assert_ne!(fp1, fp2);
    }

    #[test]
    fn different_file_different_fingerprint() {
        let ids = [cwe("89")];
        let fp1 =
            project_fingerprint(ReportType::Sast, &ids, &file_location("a.rb", 1)).unwrap();
        let fp2 =
            project_fingerprint(ReportType::Sast, &ids, &file_location("b.rb", 1)).unwrap();
        assert_ne!(fp1, fp2);
    }

    #[test]
    fn path_normalization_ignores_leading_dot_slash() {
        let ids = [cwe("89")];
        let fp1 =
            project_fingerprint(ReportType::Sast, &ids, &file_location("./src/a.rb", 1)).unwrap();
        let fp2 =
            project_fingerprint(ReportType::Sast, &ids, &file_location("src/a.rb", 1)).unwrap();
        assert_eq!(fp1, fp2);
    }

    #[test]
    fn dependency_identity_survives_version_bump() {
        let ids = [Identifier {
            id_type: "cve".to_string(),
            name: "CVE-2021-23337".to_string(),
            value: "CVE-2021-23337".to_string(),
            external_id: None,
        }];
        let v1 = Location::Dependency {
            file: Some("package-lock.json".to_string()),
            package: "lodash".to_string(),
            version: "4.17.20".to_string(),
        };
        let v2 = Location::Dependency {
            file: Some("package-lock.json".to_string()),
            package: "lodash".to_string(),
            version: "4.17.21".to_string(),
        };
        let fp1 = project_fingerprint(ReportType::DependencyScanning, &ids, &v1).unwrap();
        let fp2 = project_fingerprint(ReportType::DependencyScanning, &ids, &v2).unwrap();
        assert_eq!(fp1, fp2);
        // location fingerprint does move with the version
        assert_ne!(
            location_fingerprint(&v1).unwrap(),
            location_fingerprint(&v2).unwrap()
        );
    }

    #[test]
    fn image_tag_excluded_from_identity() {
        let ids = [cwe("400")];
        let tagged = Location::Image {
            image: "registry.example.com/app:v1.2".to_string(),
            operating_system: None,
            package: Some("openssl".to_string()),
            version: None,
        };
        let retagged = Location::Image {
            image: "registry.example.com/app:v1.3".to_string(),
            operating_system: None,
            package: Some("openssl".to_string()),
            version: None,
        };
        let pinned = Location::Image {
            image: "registry.example.com/app@sha256:deadbeef".to_string(),
            operating_system: None,
            package: Some("openssl".to_string()),
            version: None,
        };
        let fp1 = project_fingerprint(ReportType::ContainerScanning, &ids, &tagged).unwrap();
        let fp2 = project_fingerprint(ReportType::ContainerScanning, &ids, &retagged).unwrap();
        let fp3 = project_fingerprint(ReportType::ContainerScanning, &ids, &pinned).unwrap();
        assert_eq!(fp1, fp2);
        assert_eq!(fp1, fp3);
    }

    #[test]
    fn report_type_separates_fingerprints() {
        let ids = [cwe("327")];
        let loc = file_location("app.rb", 10);
        let sast = project_fingerprint(ReportType::Sast, &ids, &loc).unwrap();
        let secrets = project_fingerprint(ReportType::SecretDetection, &ids, &loc).unwrap();
        assert_ne!(sast, secrets);
    }

    #[test]
    fn missing_identifiers_rejected() {
        let err =
            project_fingerprint(ReportType::Sast, &[], &file_location("a.rb", 1)).unwrap_err();
        assert!(matches!(err, AppError::InvalidFinding(_)));
    }

    #[test]
    fn malformed_location_rejected() {
        let empty = Location::File {
            file: "  ".to_string(),
            start_line: None,
            end_line: None,
        };
        assert!(matches!(
            location_fingerprint(&empty),
            Err(AppError::InvalidFinding(_))
        ));
        assert!(matches!(
            project_fingerprint(ReportType::Sast, &[cwe("1")], &empty),
            Err(AppError::InvalidFinding(_))
        ));
    }

    #[test]
    fn fingerprint_is_hex_sha256() {
        let fp = location_fingerprint(&file_location("a.rb", 1)).unwrap();
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
