//! Moving archive images into the blob store.
//!
//! Native posts carry a document tree whose image sources still point at
//! the exporting blog's media keys; their bytes sit under the post's
//! `images/` directory. Markdown posts reference images by relative path
//! or inline `data:` URI. Both relocators upload the bytes under a
//! content-addressed key and rewrite the references to the media route.
//!
//! A reference that cannot be resolved is reported as a warning and left
//! as it was. Only a failing blob store aborts relocation.

use std::collections::HashMap;

use thiserror::Error;
use tracing::warn;

use crate::archive::Archive;
use crate::document::Node;
use crate::images::{
    content_addressed_key, content_type_for, decode_data_uri, extension_for, extract_image_keys,
    extract_markdown_image_refs, image_file_names, media_url, resolve_relative_path,
    rewrite_markdown_image_paths, rewrite_tree_image_paths, ImageRefKind,
};
use crate::store::BlobStore;

#[derive(Debug, Error)]
pub enum RelocateError {
    #[error("failed to store image {key}: {message}")]
    Blob { key: String, message: String },
}

/// A rewritten tree or markdown text plus what happened on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct Relocated<T> {
    pub value: T,
    /// Blob keys written, in reference order.
    pub uploaded: Vec<String>,
    pub warnings: Vec<String>,
}

async fn upload(
    blobs: &dyn BlobStore,
    file_name: &str,
    bytes: Vec<u8>,
) -> Result<String, RelocateError> {
    let key = content_addressed_key(file_name, &bytes);
    blobs
        .put(&key, bytes, content_type_for(file_name))
        .await
        .map_err(|e| RelocateError::Blob {
            key: key.clone(),
            message: e.to_string(),
        })?;
    Ok(key)
}

/// Upload the images of a native post and point its tree at them.
///
/// Image file names are derived from the tree's storage keys with
/// [`image_file_names`], mirroring how the exporter named them.
pub async fn relocate_tree_images(
    archive: &Archive,
    image_dir: &str,
    tree: &Node,
    blobs: &dyn BlobStore,
) -> Result<Relocated<Node>, RelocateError> {
    let keys = extract_image_keys(tree);
    let mut mapping: HashMap<String, String> = HashMap::new();
    let mut uploaded = Vec::new();
    let mut warnings = Vec::new();

    for (old_key, file_name) in image_file_names(&keys) {
        let path = format!("{}/{}", image_dir, file_name);
        let Some(bytes) = archive.get(&path) else {
            warn!(%path, "image missing from archive");
            warnings.push(format!("image not found in archive: {}", path));
            continue;
        };
        // Re-importing into the blog that exported the archive: the bytes
        // are already stored under the original key. Foreign keys may not
        // even be valid here, so a lookup error just means "not stored".
        let existing = blobs.get(&old_key).await.ok().flatten();
        if existing.as_deref() == Some(bytes) {
            mapping.insert(old_key.clone(), old_key);
            continue;
        }
        let new_key = upload(blobs, &file_name, bytes.to_vec()).await?;
        uploaded.push(new_key.clone());
        mapping.insert(old_key, new_key);
    }

    Ok(Relocated {
        value: rewrite_tree_image_paths(tree, &mapping),
        uploaded,
        warnings,
    })
}

/// Upload the relative and `data:` images of a markdown post and rewrite
/// its text to reference them. Remote images are left untouched.
pub async fn relocate_markdown_images(
    archive: &Archive,
    base_dir: &str,
    markdown: &str,
    blobs: &dyn BlobStore,
) -> Result<Relocated<String>, RelocateError> {
    let mut mapping: HashMap<String, String> = HashMap::new();
    let mut uploaded = Vec::new();
    let mut warnings = Vec::new();

    for image in extract_markdown_image_refs(markdown) {
        if mapping.contains_key(&image.original) {
            continue;
        }
        let (file_name, bytes) = match image.kind {
            ImageRefKind::Remote => continue,
            ImageRefKind::Relative => {
                let path = resolve_relative_path(base_dir, &image.original);
                let Some(bytes) = archive.get(&path) else {
                    warn!(%path, reference = %image.original, "image missing from archive");
                    warnings.push(format!(
                        "image not found in archive: {} (referenced as {})",
                        path, image.original
                    ));
                    continue;
                };
                let file_name = path.rsplit('/').next().unwrap_or(&path).to_string();
                (file_name, bytes.to_vec())
            }
            ImageRefKind::DataUri => match decode_data_uri(&image.original) {
                Some((media_type, bytes)) => {
                    (format!("inline.{}", extension_for(&media_type)), bytes)
                }
                None => {
                    warnings.push("unreadable data URI image left in place".to_string());
                    continue;
                }
            },
        };
        let key = upload(blobs, &file_name, bytes).await?;
        uploaded.push(key.clone());
        mapping.insert(image.original, media_url(&key));
    }

    Ok(Relocated {
        value: rewrite_markdown_image_paths(markdown, &mapping),
        uploaded,
        warnings,
    })
}
