//! Static container registry configuration for nginx.
//!
//! Images laid out as `<image_root>/<name>/<version>/manifest.json` (plus one
//! file per blob, named by its hex digest) are served read-only through the
//! registry v2 API: manifests by tag and by digest, blobs by digest.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use tracing::debug;

use crate::action::RegistryConfigSpec;
use crate::consts::{IMAGE_MANIFEST, MANIFEST_MEDIA_TYPE};
use crate::execute::types::ExecuteError;
use crate::util::atomic::write_atomic;
use crate::util::hash::hash_file;

/// Configuration shared by every static registry.
pub fn common_config() -> String {
  format!(
    r#"# Generated by buildchain, do not edit.
location = /v2/ {{
    default_type application/json;
    return 200 '{{}}';
}}

types {{
    {media_type} manifest;
}}
"#,
    media_type = MANIFEST_MEDIA_TYPE
  )
}

/// One image version found under the image root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageEntry {
  pub name: String,
  pub version: String,
  /// `sha256:<hex>` of the manifest.
  pub digest: String,
}

/// Find every `<name>/<version>/manifest.json` below `root`, sorted by name
/// then version.
pub fn scan_images(root: &Path) -> Result<Vec<ImageEntry>, ExecuteError> {
  if !root.is_dir() {
    return Err(ExecuteError::Registry(format!("image root {} is not a directory", root.display())));
  }

  let mut images = Vec::new();

  for entry in walkdir::WalkDir::new(root)
    .min_depth(3)
    .max_depth(3)
    .sort_by_file_name()
  {
    let entry = entry.map_err(|e| ExecuteError::Registry(e.to_string()))?;
    if !entry.file_type().is_file() || entry.file_name() != IMAGE_MANIFEST {
      continue;
    }

    let rel = entry
      .path()
      .strip_prefix(root)
      .map_err(|e| ExecuteError::Registry(e.to_string()))?;
    let mut parts = rel.iter().map(|p| p.to_string_lossy().into_owned());
    let (Some(name), Some(version)) = (parts.next(), parts.next()) else {
      continue;
    };

    images.push(ImageEntry {
      name,
      version,
      digest: format!("sha256:{}", hash_file(entry.path())?),
    });
  }

  Ok(images)
}

/// Render the nginx configuration for `images`.
pub fn render_config(images: &[ImageEntry], server_root: &str, name_prefix: &str) -> String {
  let mut by_name: BTreeMap<&str, Vec<&ImageEntry>> = BTreeMap::new();
  for image in images {
    by_name.entry(image.name.as_str()).or_default().push(image);
  }

  let mut out = String::from("# Generated by buildchain, do not edit.\n");

  for (name, versions) in &by_name {
    let repo = format!("{}{}", name_prefix, name);

    for image in versions {
      let manifest = format!("{}/{}/{}/{}", server_root, name, image.version, IMAGE_MANIFEST);
      for reference in [image.version.as_str(), image.digest.as_str()] {
        let _ = write!(
          out,
          r#"
location = /v2/{repo}/manifests/{reference} {{
    alias {manifest};
    default_type {media_type};
    add_header Docker-Content-Digest {digest};
}}
"#,
          media_type = MANIFEST_MEDIA_TYPE,
          digest = image.digest,
        );
      }
    }

    let candidates: Vec<String> = versions.iter().map(|i| format!("/{}/$1", i.version)).collect();
    let _ = write!(
      out,
      r#"
location ~ ^/v2/{repo}/blobs/sha256:([a-f0-9]{{64}})$ {{
    root {server_root}/{name};
    try_files {candidates} =404;
}}
"#,
      candidates = candidates.join(" "),
    );
  }

  out
}

/// Generate the configuration described by `spec` and write it atomically.
pub fn generate(spec: &RegistryConfigSpec) -> Result<(), ExecuteError> {
  let images = scan_images(&spec.image_root)?;
  let config = render_config(&images, &spec.server_root, &spec.name_prefix);
  write_atomic(&spec.destination, config.as_bytes()).map_err(ExecuteError::at(&spec.destination))?;
  debug!(images = images.len(), destination = ?spec.destination, "generated registry config");
  Ok(())
}
