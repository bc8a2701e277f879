pub mod extract;
mod fetch;

pub use fetch::{sha256_file, Fetch};

use std::fs;
use std::path::Path;

use tracing::{debug, info};
use url::Url;

use crate::recipe::{BuildRecipe, Checksum, Recipe};
use crate::{Error, Result};

/// Populates `src_dir` with every source of one architecture variant,
/// verified and auto-extracted. Sources are acquired strictly in
/// declaration order.
pub async fn acquire(
    recipe: &Recipe,
    variant: &BuildRecipe,
    fetcher: &dyn Fetch,
    src_dir: &Path,
) -> Result<()> {
    fs::create_dir_all(src_dir)?;

    for (uri, checksum) in variant.sources.iter().zip(variant.checksums.iter()) {
        let name = basename(uri);
        let dest = src_dir.join(name);

        match remote_url(uri) {
            Some(url) => {
                info!(%uri, "fetching source");
                fetcher.fetch(&url, &dest).await.map_err(|cause| Error::Fetch {
                    uri: uri.clone(),
                    cause,
                })?;
            }
            None => {
                debug!(%uri, "copying local source");
                fs::copy(recipe.recipe_dir.join(uri), &dest)?;
            }
        }

        if let Checksum::Sha256(expected) = checksum {
            let actual = sha256_file(&dest)?;
            if &actual != expected {
                return Err(Error::ChecksumMismatch {
                    uri: uri.clone(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        if extract::is_extractable(name) && !variant.noextract.iter().any(|n| n == name) {
            extract::extract(&dest, src_dir)?;
        }
    }

    Ok(())
}

/// Parses `uri` as a URL if it uses a supported download scheme; everything
/// else is a path relative to the recipe directory.
fn remote_url(uri: &str) -> Option<Url> {
    let url = Url::parse(uri).ok()?;
    matches!(url.scheme(), "http" | "https" | "ftp").then_some(url)
}

fn basename(uri: &str) -> &str {
    uri.rsplit('/').next().unwrap_or(uri)
}
