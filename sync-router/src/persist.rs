//! Saving and loading the data model.
//!
//! The model is written as MessagePack to a temporary file next to the
//! target and renamed into place, so a crash mid-save leaves the previous
//! file intact.

use crate::error::PersistError;
use crate::model::{ModelSnapshot, RouterDataModel};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn io_error(path: &Path, source: std::io::Error) -> PersistError {
    PersistError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Write `model` to `path`.
pub async fn save_model(model: &RouterDataModel, path: &Path) -> Result<(), PersistError> {
    let bytes = rmp_serde::to_vec(&model.snapshot())?;
    let temp = temp_path(path);

    tokio::fs::write(&temp, &bytes)
        .await
        .map_err(|e| io_error(&temp, e))?;
    tokio::fs::rename(&temp, path)
        .await
        .map_err(|e| io_error(path, e))?;

    tracing::debug!("Saved data model to {:?} ({} bytes)", path, bytes.len());
    Ok(())
}

/// Read a model from `path`.
pub async fn load_model(path: &Path, capacity: usize) -> Result<RouterDataModel, PersistError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| io_error(path, e))?;
    let snapshot: ModelSnapshot = rmp_serde::from_slice(&bytes)?;
    Ok(RouterDataModel::from_snapshot(snapshot, capacity))
}

/// Read a model from `path`, falling back to an empty model on any error.
pub async fn load_model_or_empty(path: &Path, capacity: usize) -> RouterDataModel {
    match load_model(path, capacity).await {
        Ok(model) => {
            tracing::info!(
                "Loaded data model from {:?} at index {:?}",
                path,
                model.current_index()
            );
            model
        }
        Err(e) => {
            tracing::error!("Could not load data model from {:?}: {}", path, e);
            RouterDataModel::new(capacity)
        }
    }
}

/// Spawn a task that saves the current model every `interval` until
/// shutdown.
///
/// `current` is asked for the model on every tick, so a replaced model is
/// picked up.
pub fn spawn_model_save<F>(
    current: F,
    path: PathBuf,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()>
where
    F: Fn() -> Arc<RouterDataModel> + Send + 'static,
{
    tokio::spawn(async move {
        tracing::info!("Model save task started (interval: {:?}, path: {:?})", interval, path);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::info!("Model save task stopping");
                    return;
                }
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = save_model(&current(), &path).await {
                        tracing::error!("Model save error: {}", e);
                    }
                }
            }
        }
    })
}
