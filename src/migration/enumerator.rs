//! Archive enumeration.

use tracing::{info, warn};

use crate::error::AppError;
use crate::migration::model::Archive;
use crate::migration::ops::ArchiveSource;

/// Case-insensitive suffix match on the archive extension.
pub fn matches_extension(name: &str, extension: &str) -> bool {
    let name = name.as_bytes();
    let ext = extension.as_bytes();
    name.len() >= ext.len() && name[name.len() - ext.len()..].eq_ignore_ascii_case(ext)
}

/// Lists the archives in `container`, in the order the source returns them.
///
/// Blobs whose name does not end with `extension` are skipped, as are names
/// that leave no database name once the extension is removed.
///
/// # Errors
/// Propagates listing errors without retrying.
pub async fn enumerate_archives<S: ArchiveSource + ?Sized>(
    source: &S,
    container: &str,
    extension: &str,
) -> Result<Vec<Archive>, AppError> {
    let blobs = source.list_blobs(container).await?;
    let listed = blobs.len();

    let archives: Vec<Archive> = blobs
        .into_iter()
        .filter(|blob| matches_extension(&blob.name, extension))
        .map(|blob| Archive::new(blob.name, blob.content_length))
        .filter(|archive| {
            let keep = !archive.database_name().is_empty();
            if !keep {
                warn!("[ENUMERATE] Skipping {}: no database name", archive.name());
            }
            keep
        })
        .collect();

    info!(
        "[ENUMERATE] Found {} archive(s) among {} blob(s) in {}",
        archives.len(),
        listed,
        container
    );
    Ok(archives)
}
