//! Typed ID definitions.

use crate::{define_id, define_int_key, define_str_key};

/// Maximum length of an externally issued string key, in bytes.
pub const MAX_STR_KEY_LEN: usize = 256;

// =============================================================================
// Fleet
// =============================================================================

define_str_key!(DeviceId, "device");
define_int_key!(ClusterId, "cluster");
define_int_key!(AppReqId, "app requirement");

// =============================================================================
// Optimizer
// =============================================================================

define_id!(CycleId, "cyc");

// =============================================================================
// Tests
// =============================================================================
