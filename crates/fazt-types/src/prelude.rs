//! Common imports re-exported across the workspace, mirroring the teacher's
//! single `use crate::prelude::*;` convention.

pub use crate::error::{ClResult, Error};
pub use crate::types::{AppId, ApiResponse, ErrorResponse, Patch, Timestamp};
pub use tracing::{debug, error, info, warn};

// vim: ts=4
