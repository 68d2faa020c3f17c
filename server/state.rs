use std::sync::Arc;

use sickle_cam::{Explainer, Storage};

/// Read-only state shared by every worker thread.
///
/// The explainer and storage are both safe to use through `&self`, so no
/// lock is needed around them.
pub struct AppState {
    pub explainer: Explainer,
    pub storage: Storage,
    pub max_upload_bytes: usize,
}

pub type SharedState = Arc<AppState>;
