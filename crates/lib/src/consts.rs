//! Names and defaults shared across the crate.

pub const APP_NAME: &str = "buildchain";

/// Default build file looked up in the working directory.
pub const BUILD_FILE_NAME: &str = "Buildchain.toml";

/// Fingerprint store file inside the state directory.
pub const FINGERPRINTS_FILENAME: &str = "fingerprints.json";

/// Current fingerprint store format version.
pub const FINGERPRINTS_VERSION: u32 = 1;

/// Digest-keyed image cache, relative to the state directory.
pub const IMAGE_CACHE_DIR: &str = "images";

/// Manifest file written by `skopeo copy ... dir:<path>`.
pub const IMAGE_MANIFEST: &str = "manifest.json";

/// Media type served for v2 schema 2 manifests.
pub const MANIFEST_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";

pub const ENV_JOBS: &str = "BUILDCHAIN_JOBS";
pub const ENV_SKOPEO: &str = "BUILDCHAIN_SKOPEO";
pub const ENV_STATE_DIR: &str = "BUILDCHAIN_STATE_DIR";
