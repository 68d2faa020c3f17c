use sickle_cam::Storage;

use crate::routes::Reply;

/// `GET /static/heatmaps/{file}`
///
/// Serves a stored overlay. Unknown names and anything that could leave the
/// heatmap folder get a 404.
pub fn handle(file_name: &str, storage: &Storage) -> Reply {
    let Some(path) = storage.resolve_heatmap(file_name) else {
        return Reply::not_found();
    };
    match std::fs::read(&path) {
        Ok(bytes) => Reply::jpeg(bytes),
        Err(_) => Reply::not_found(),
    }
}
