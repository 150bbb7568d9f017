//! sasmap error codes
//!
//! Error codes follow the pattern: SASMAP-{CATEGORY}-{3-digit number}
//!
//! Categories (1-3 uppercase letters):
//! - CFG: Configuration errors (rejected before any scanning)
//! - SRC: Remote file source errors (listing, reads, timeouts)
//! - SCN: Scan pass errors (ordering violations, persistence)
//! - QRY: Query errors (unknown identifiers, bad arguments)
//! - GEN: Anything else surfaced by a command
//!
//! Each error code is stable and should not be reused.

/// Configuration file could not be read or parsed
pub const SASMAP_CFG_001_UNREADABLE: &str = "SASMAP-CFG-001";

/// Configuration failed validation (roots, macro root, workers, engines)
pub const SASMAP_CFG_002_INVALID: &str = "SASMAP-CFG-002";

/// Root listing failed
pub const SASMAP_SRC_001_LIST_FAILED: &str = "SASMAP-SRC-001";

/// File read failed after retries
pub const SASMAP_SRC_002_READ_FAILED: &str = "SASMAP-SRC-002";

/// Resolution attempted before the macro catalog was built
pub const SASMAP_SCN_001_ORDERING_VIOLATION: &str = "SASMAP-SCN-001";

/// Fact persistence failed
pub const SASMAP_SCN_002_STORE_FAILED: &str = "SASMAP-SCN-002";

/// Worker pool could not be started
pub const SASMAP_SCN_003_WORKER_POOL: &str = "SASMAP-SCN-003";

/// Identifier not present in any fact relation
pub const SASMAP_QRY_001_NOT_FOUND: &str = "SASMAP-QRY-001";

/// Invalid query parameters
pub const SASMAP_QRY_002_INVALID_PARAMS: &str = "SASMAP-QRY-002";

/// Command failed for a reason without a dedicated code
pub const SASMAP_GEN_001_COMMAND_FAILED: &str = "SASMAP-GEN-001";

/// Every code, for uniqueness checks and documentation
pub const ALL_CODES: &[&str] = &[
    SASMAP_CFG_001_UNREADABLE,
    SASMAP_CFG_002_INVALID,
    SASMAP_SRC_001_LIST_FAILED,
    SASMAP_SRC_002_READ_FAILED,
    SASMAP_SCN_001_ORDERING_VIOLATION,
    SASMAP_SCN_002_STORE_FAILED,
    SASMAP_SCN_003_WORKER_POOL,
    SASMAP_QRY_001_NOT_FOUND,
    SASMAP_QRY_002_INVALID_PARAMS,
    SASMAP_GEN_001_COMMAND_FAILED,
];

/// Error code documentation
///
/// | Code | Description | Remediation |
/// |------|-------------|-------------|
/// | SASMAP-CFG-001 | Config unreadable | Check the `--config` path and YAML syntax |
/// | SASMAP-CFG-002 | Config invalid | Macro root must be one of `roots`; `workers` > 0 |
/// | SASMAP-SRC-001 | Listing failed | Check the remote base directory is reachable |
/// | SASMAP-SRC-002 | Read failed | Program kept its last facts; rerun the scan |
/// | SASMAP-SCN-001 | Ordering violation | Internal error; report it |
/// | SASMAP-SCN-002 | Store failed | Check the database file is writable |
/// | SASMAP-SCN-003 | Worker pool | Lower `workers` or raise the thread limit |
/// | SASMAP-QRY-001 | Not found | Use a stored program path or table identifier |
/// | SASMAP-QRY-002 | Invalid parameters | Check command arguments |
/// | SASMAP-GEN-001 | Command failed | Read the message; rerun with `-v` |
pub const ERROR_CODE_DOCUMENTATION: &str = "Error code documentation available in source";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_unique() {
        let mut unique = std::collections::HashSet::new();
        for code in ALL_CODES {
            assert!(unique.insert(code), "Duplicate error code detected: {}", code);
        }
    }

    #[test]
    fn test_error_code_format() {
        for code in ALL_CODES {
            // Format: SASMAP-{CATEGORY}-{3-digit number}
            let parts: Vec<&str> = code.split('-').collect();
            assert_eq!(parts.len(), 3, "Error code must have 3 parts: {}", code);
            assert_eq!(parts[0], "SASMAP");
            assert!((1..=3).contains(&parts[1].len()), "Category must be 1-3 chars: {}", code);
            assert!(parts[1].chars().all(|c| c.is_ascii_uppercase()));
            assert_eq!(parts[2].len(), 3, "Number must be 3 digits: {}", code);
            assert!(parts[2].chars().all(|c| c.is_ascii_digit()));
        }
    }
}
