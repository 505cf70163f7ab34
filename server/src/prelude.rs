pub use crate::core::app::App;
pub use fazt_types::prelude::*;
pub use fazt_types::substrate::{AliasKind, AliasRecord, AppPatch, AppRecord, AppState as AppRunState};

pub use tracing::{debug_span, error_span, info_span, warn_span};

// vim: ts=4
