//! Process exit codes
//!
//! These follow sysexits.h where one applies.

/// Release installed or upgraded
pub const SUCCESS: u8 = 0;

/// General error, including history lookup failures
pub const ERROR: u8 = 1;

/// Overrides could not be merged
pub const VALUE_ERROR: u8 = 2;

/// Chart could not be located or loaded
pub const RESOLUTION_ERROR: u8 = 3;

/// Install or upgrade failed
pub const EXECUTION_ERROR: u8 = 4;

/// Invalid arguments or options
pub const USAGE_ERROR: u8 = 64;

/// Interrupted by Ctrl-C or the timeout (128 + SIGINT)
pub const INTERRUPTED: u8 = 130;
