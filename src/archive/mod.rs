//! Named-entry extraction from package bundles.
//!
//! A `.qmod` bundle is a zip archive; installation only ever needs specific
//! entries out of it (the manifest, declared mod/library files, file copies,
//! the cover image), never a full unpack.

use anyhow::{Context, Result, anyhow};
use log::debug;
use std::io::Read;
use std::path::Path;
use zip::ZipArchive;
use zip::result::ZipError;

use crate::runtime::Runtime;

/// Trait for extracting named entries from a bundle into a directory.
#[cfg_attr(test, mockall::automock)]
pub trait BundleExtractor: Send + Sync {
    /// Extract every entry in `entries` from `bundle` into `dest`, preserving
    /// each entry's internal path. Fails if any entry is absent.
    fn extract_entries<R: Runtime + 'static>(
        &self,
        runtime: &R,
        bundle: &Path,
        entries: &[String],
        dest: &Path,
    ) -> Result<()>;

    /// Extract a single entry if present. Returns `Ok(false)` when the bundle
    /// has no such entry.
    fn try_extract_entry<R: Runtime + 'static>(
        &self,
        runtime: &R,
        bundle: &Path,
        entry: &str,
        dest: &Path,
    ) -> Result<bool>;
}

/// Extractor for zip-based `.qmod` bundles
pub struct ZipBundleExtractor;

impl BundleExtractor for ZipBundleExtractor {
    #[tracing::instrument(skip(self, runtime, entries, dest))]
    fn extract_entries<R: Runtime + 'static>(
        &self,
        runtime: &R,
        bundle: &Path,
        entries: &[String],
        dest: &Path,
    ) -> Result<()> {
        let mut archive = self.open_archive(runtime, bundle)?;

        for entry in entries {
            if !extract_one(runtime, &mut archive, entry, dest)? {
                return Err(anyhow!(
                    "Bundle {:?} has no entry named {:?}",
                    bundle,
                    entry
                ));
            }
        }

        Ok(())
    }

    #[tracing::instrument(skip(self, runtime, dest))]
    fn try_extract_entry<R: Runtime + 'static>(
        &self,
        runtime: &R,
        bundle: &Path,
        entry: &str,
        dest: &Path,
    ) -> Result<bool> {
        let mut archive = self.open_archive(runtime, bundle)?;
        extract_one(runtime, &mut archive, entry, dest)
    }
}

impl ZipBundleExtractor {
    fn open_archive<R: Runtime + 'static>(
        &self,
        runtime: &R,
        bundle: &Path,
    ) -> Result<ZipArchive<std::io::Cursor<Vec<u8>>>> {
        let mut reader = runtime
            .open(bundle)
            .with_context(|| format!("Failed to open bundle at {:?}", bundle))?;

        // zip requires Read + Seek, but Runtime::open returns Box<dyn Read + Send>,
        // so buffer the whole bundle for seeking capability
        let mut buffer = Vec::new();
        reader
            .read_to_end(&mut buffer)
            .with_context(|| format!("Failed to read bundle {:?}", bundle))?;

        ZipArchive::new(std::io::Cursor::new(buffer))
            .with_context(|| format!("Failed to parse bundle {:?} as a zip archive", bundle))
    }
}

fn extract_one<R: Runtime + 'static>(
    runtime: &R,
    archive: &mut ZipArchive<std::io::Cursor<Vec<u8>>>,
    entry: &str,
    dest: &Path,
) -> Result<bool> {
    let mut file = match archive.by_name(entry) {
        Ok(file) => file,
        Err(ZipError::FileNotFound) => return Ok(false),
        Err(e) => return Err(e).with_context(|| format!("Failed to read entry {:?}", entry)),
    };

    let entry_path = file
        .enclosed_name()
        .ok_or_else(|| anyhow!("Entry {:?} has an unsafe path", entry))?;
    let full_path = dest.join(entry_path);

    debug!("Extracting entry {:?} -> {:?}", entry, full_path);

    if file.is_dir() {
        runtime.create_dir_all(&full_path)?;
        return Ok(true);
    }

    if let Some(parent) = full_path.parent() {
        runtime.create_dir_all(parent)?;
    }

    let mut writer = runtime.create_file(&full_path)?;
    std::io::copy(&mut file, &mut writer)
        .with_context(|| format!("Failed to extract entry {:?}", entry))?;

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RealRuntime;
    use std::collections::HashMap;
    use std::fs::File;
    use tempfile::tempdir;

    fn create_test_bundle(path: &Path, files: HashMap<&str, &str>) -> Result<()> {
        use std::io::Write;
        use zip::CompressionMethod;
        use zip::ZipWriter;
        use zip::write::FileOptions;

        let file = File::create(path)?;
        let mut zip = ZipWriter::new(file);
        let options: FileOptions<()> =
            FileOptions::default().compression_method(CompressionMethod::Deflated);

        for (name, content) in files.iter() {
            zip.start_file(*name, options)?;
            zip.write_all(content.as_bytes())?;
        }

        zip.finish()?;
        Ok(())
    }

    #[test]
    fn test_extract_entries_preserves_internal_paths() -> Result<()> {
        let dir = tempdir()?;
        let bundle = dir.path().join("test.qmod");
        let dest = dir.path().join("out");
        std::fs::create_dir(&dest)?;

        create_test_bundle(
            &bundle,
            HashMap::from([
                ("libexample.so", "mod binary"),
                ("assets/icon.png", "image bytes"),
            ]),
        )?;

        let extractor = ZipBundleExtractor;
        extractor.extract_entries(
            &RealRuntime,
            &bundle,
            &["libexample.so".into(), "assets/icon.png".into()],
            &dest,
        )?;

        assert_eq!(
            std::fs::read_to_string(dest.join("libexample.so"))?,
            "mod binary"
        );
        assert_eq!(
            std::fs::read_to_string(dest.join("assets").join("icon.png"))?,
            "image bytes"
        );
        Ok(())
    }

    #[test]
    fn test_extract_entries_fails_on_missing_entry() -> Result<()> {
        let dir = tempdir()?;
        let bundle = dir.path().join("test.qmod");
        let dest = dir.path().join("out");
        std::fs::create_dir(&dest)?;

        create_test_bundle(&bundle, HashMap::from([("present.so", "x")]))?;

        let extractor = ZipBundleExtractor;
        let result = extractor.extract_entries(
            &RealRuntime,
            &bundle,
            &["present.so".into(), "absent.so".into()],
            &dest,
        );

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("absent.so"));
        Ok(())
    }

    #[test]
    fn test_try_extract_entry_reports_absence() -> Result<()> {
        let dir = tempdir()?;
        let bundle = dir.path().join("test.qmod");
        let dest = dir.path().join("out");
        std::fs::create_dir(&dest)?;

        create_test_bundle(&bundle, HashMap::from([("mod.json", "{}")]))?;

        let extractor = ZipBundleExtractor;
        assert!(extractor.try_extract_entry(&RealRuntime, &bundle, "mod.json", &dest)?);
        assert!(!extractor.try_extract_entry(&RealRuntime, &bundle, "cover.png", &dest)?);
        assert!(dest.join("mod.json").exists());
        Ok(())
    }

    #[test]
    fn test_open_archive_rejects_non_zip() {
        let dir = tempdir().unwrap();
        let bundle = dir.path().join("not-a-zip.qmod");
        std::fs::write(&bundle, "plain text").unwrap();

        let extractor = ZipBundleExtractor;
        let result =
            extractor.try_extract_entry(&RealRuntime, &bundle, "mod.json", dir.path());
        assert!(result.is_err());
    }
}
