use crate::core::{Result, UpgradeError};
use crate::upgrade::release::ReleaseInfo;
use crate::upgrade::transport::RetryingTransport;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

/// Read buffer used while hashing; files are never loaded whole.
const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Parsed `SHA256SUMS.txt`: asset name to lowercase hex digest.
///
/// Lines have the `sha256sum` shape `<hash>  <filename>`. Lines with fewer
/// than two whitespace-separated tokens are ignored, a leading `*`
/// (binary-mode marker) on the file name is dropped, and when a name appears
/// twice the last line wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChecksumManifest {
    entries: HashMap<String, String>,
}

impl ChecksumManifest {
    pub fn parse(text: &str) -> Self {
        let mut entries = HashMap::new();
        for line in text.lines() {
            let mut tokens = line.split_whitespace();
            let (Some(hash), Some(name)) = (tokens.next(), tokens.next()) else {
                continue;
            };
            let name = name.strip_prefix('*').unwrap_or(name);
            entries.insert(name.to_string(), hash.to_lowercase());
        }
        Self {
            entries,
        }
    }

    /// Expected digest for `asset`, `None` when no checksum is published.
    pub fn get(&self, asset: &str) -> Option<&str> {
        self.entries.get(asset).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Verifies the integrity of downloaded release assets using SHA256 checksums.
///
/// The release publishes a manifest asset (by default `SHA256SUMS.txt`)
/// listing the digest of every other asset. The verifier fetches that
/// manifest through the shared transport and compares it with a streaming
/// hash of the downloaded file.
///
/// # Security Benefits
///
/// - **Download Integrity**: Detects corrupted or truncated downloads
/// - **Tamper Detection**: Refuses binaries that differ from what was published
pub struct ChecksumVerifier<'a> {
    transport: &'a RetryingTransport,
    manifest_name: String,
}

impl<'a> ChecksumVerifier<'a> {
    pub fn new(transport: &'a RetryingTransport, manifest_name: impl Into<String>) -> Self {
        Self {
            transport,
            manifest_name: manifest_name.into(),
        }
    }

    /// Downloads and parses the release's checksum manifest.
    ///
    /// # Errors
    ///
    /// - [`UpgradeError::ManifestNotFound`] if the release has no asset with
    ///   the manifest's exact name
    /// - any transport error from fetching it
    pub async fn fetch_manifest(&self, release: &ReleaseInfo) -> Result<ChecksumManifest> {
        let asset = release.asset(&self.manifest_name).ok_or_else(|| UpgradeError::ManifestNotFound {
            manifest: self.manifest_name.clone(),
            tag: release.tag.clone(),
        })?;

        debug!("Fetching checksum manifest from {}", asset.url);
        let text = self.transport.get_asset_text(&asset.url).await?;
        let manifest = ChecksumManifest::parse(&text);
        if manifest.is_empty() {
            warn!("Checksum manifest {} for {} has no entries", self.manifest_name, release.tag);
        }
        Ok(manifest)
    }

    /// Compute the SHA256 checksum of a file as lowercase hex.
    ///
    /// The file is read in fixed-size chunks, so memory use does not grow
    /// with the file.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use cloudsqlctl::upgrade::verification::ChecksumVerifier;
    /// use std::path::Path;
    ///
    /// # async fn example() -> cloudsqlctl::core::Result<()> {
    /// let checksum = ChecksumVerifier::compute_sha256(Path::new("/path/to/binary")).await?;
    /// println!("SHA256: {}", checksum);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn compute_sha256(file_path: &Path) -> Result<String> {
        debug!("Computing SHA256 checksum for: {}", file_path.display());

        let mut file = tokio::fs::File::open(file_path)
            .await
            .map_err(|e| UpgradeError::io("open file for hashing", file_path, e))?;

        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
        loop {
            let read = file
                .read(&mut buffer)
                .await
                .map_err(|e| UpgradeError::io("read file for hashing", file_path, e))?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }

        Ok(hex::encode(hasher.finalize()))
    }

    /// Verify a file against an expected checksum.
    ///
    /// # Returns
    ///
    /// - `Ok(true)` if the digests match (case-insensitive)
    /// - `Ok(false)` on a mismatch
    /// - `Err` if the file cannot be read
    pub async fn verify(file_path: &Path, expected_checksum: &str) -> Result<bool> {
        let actual = Self::compute_sha256(file_path).await?;
        let matches = actual.eq_ignore_ascii_case(expected_checksum.trim());
        if matches {
            info!("Checksum verified for {}", file_path.display());
        } else {
            warn!(
                "Checksum mismatch for {}: expected {}, got {}",
                file_path.display(),
                expected_checksum,
                actual
            );
        }
        Ok(matches)
    }
}
