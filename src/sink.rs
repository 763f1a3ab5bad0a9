//! Persists a collected item sequence as one flat JSON array in one file.

use std::path::Path;

use thiserror::Error;

use crate::api::Item;

/// The error returned by [`save_to_file`].
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SinkError {
    /// The file could not be written.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The items could not be serialized.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Serialize `items` as a JSON array and write it to `path`.
///
/// # Errors
///
/// If the serialization or the write fails, this function will return an error.
pub async fn save_to_file(path: impl AsRef<Path>, items: &[Item]) -> Result<(), SinkError> {
    let json = serde_json::to_vec(items)?;
    tokio::fs::write(path, json).await?;
    Ok(())
}
