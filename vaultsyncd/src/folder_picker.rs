use std::path::PathBuf;

use ashpd::desktop::ResponseError;
use ashpd::desktop::file_chooser::SelectedFiles;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum PickerError {
    #[error("file chooser portal failed: {0}")]
    Portal(#[from] ashpd::Error),
    #[error("portal returned an unusable uri: {0}")]
    BadUri(String),
}

/// Asks the desktop for a directory. `Ok(None)` when the user cancels.
pub async fn pick_folder() -> Result<Option<PathBuf>, PickerError> {
    let request = SelectedFiles::open_file()
        .title("Select sync folder")
        .directory(true)
        .modal(true)
        .send()
        .await?;
    let selected = match request.response() {
        Ok(selected) => selected,
        Err(ashpd::Error::Response(ResponseError::Cancelled)) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    selected
        .uris()
        .first()
        .map(|uri| file_uri_to_path(&uri.to_string()))
        .transpose()
}

fn file_uri_to_path(uri: &str) -> Result<PathBuf, PickerError> {
    Url::parse(uri)
        .ok()
        .filter(|url| url.scheme() == "file")
        .and_then(|url| url.to_file_path().ok())
        .ok_or_else(|| PickerError::BadUri(uri.to_string()))
}
