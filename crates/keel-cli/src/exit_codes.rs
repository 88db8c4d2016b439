//! Standard exit codes for CLI operations
//!
//! These exit codes follow Unix conventions and sysexits.h where applicable.

/// General error - unspecified failure
pub const ERROR: i32 = 1;

/// Values or configuration could not be parsed
pub const VALIDATION_ERROR: i32 = 2;

/// Template error - template rendering or classification failed
pub const TEMPLATE_ERROR: i32 = 3;

/// Pack error - not found, unreachable or malformed
pub const PACK_ERROR: i32 = 4;

/// IO error - file not found, permission denied, etc.
pub const IO_ERROR: i32 = 5;

/// The release or revision does not exist
pub const NOT_FOUND: i32 = 6;

/// The release already exists
pub const CONFLICT: i32 = 7;

/// The cluster was changed but the operation did not complete
pub const PARTIAL_APPLY: i32 = 8;

/// The cluster rejected or could not be reached
pub const CLUSTER_ERROR: i32 = 9;

/// The operation deadline passed
pub const TIMEOUT: i32 = 124;

/// Interrupted (128 + SIGINT)
pub const CANCELLED: i32 = 130;
