use std::path::PathBuf;
use std::sync::Arc;

use crate::pipeline::Analyzer;

#[derive(Clone)]
pub struct AppState {
    pub analyzer: Arc<Analyzer>,
    /// Where uploads are spooled while a batch runs.
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
}
