//! File access inside a workload root

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};
use crate::paths::resolve_in_root;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDesc {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Unix epoch seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<i64>,
    #[serde(rename = "isFile")]
    pub is_file: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FileItem {
    Directory(Vec<FileDesc>),
    File,
}

pub(crate) async fn get_item(root: &Path, requested: &str) -> Result<FileItem> {
    let path = resolve_in_root(root, requested)?;
    let metadata = match tokio::fs::metadata(&path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::NotFound(requested.to_string()))
        }
        Err(e) => return Err(e.into()),
    };
    if !metadata.is_dir() {
        return Ok(FileItem::File);
    }

    let mut listing = Vec::new();
    let mut entries = tokio::fs::read_dir(&path).await?;
    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_file = !metadata.is_dir();
        let modified = metadata
            .modified()
            .ok()
            .map(|time| chrono::DateTime::<chrono::Utc>::from(time).timestamp());
        let extension = is_file
            .then(|| Path::new(&name).extension().map(|e| e.to_string_lossy().into_owned()))
            .flatten();
        listing.push(FileDesc {
            size: is_file.then(|| metadata.len()),
            name,
            modified,
            is_file,
            extension,
        });
    }
    listing.sort_by(|a, b| a.is_file.cmp(&b.is_file).then_with(|| a.name.cmp(&b.name)));
    Ok(FileItem::Directory(listing))
}

pub(crate) async fn delete_item(root: &Path, requested: &str) -> Result<()> {
    let path = resolve_in_root(root, requested)?;
    if path == root {
        return Err(Error::PathOutsideRoot(path));
    }
    let metadata = match tokio::fs::symlink_metadata(&path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::NotFound(requested.to_string()))
        }
        Err(e) => return Err(e.into()),
    };
    if metadata.is_dir() {
        tokio::fs::remove_dir_all(&path).await?;
    } else {
        tokio::fs::remove_file(&path).await?;
    }
    Ok(())
}

pub(crate) async fn create_folder(root: &Path, requested: &str) -> Result<()> {
    let path = resolve_in_root(root, requested)?;
    tokio::fs::create_dir_all(&path).await?;
    Ok(())
}
