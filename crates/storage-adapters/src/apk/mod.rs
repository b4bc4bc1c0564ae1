//! # APK manifest reader
//!
//! Opens an APK (a zip archive), decodes the binary `AndroidManifest.xml`
//! and resolves `@string/…`-style references through `resources.arsc`.
//! Pure and blocking: run it on `spawn_blocking`.

mod arsc;
mod axml;
mod chunk;
#[cfg(any(test, feature = "testing"))]
pub mod fixture;

use std::fs::File;
use std::io::Read;
use std::path::Path;

use domains::{DomainError, DomainResult, ManifestReader, PackageManifest};
use thiserror::Error;
use tracing::warn;

use self::arsc::ResourceTable;
use self::axml::AttrValue;
use self::chunk::{TYPE_INT_BOOLEAN, TYPE_INT_DEC, TYPE_INT_HEX, TYPE_REFERENCE, TYPE_STRING};

const MANIFEST_ENTRY: &str = "AndroidManifest.xml";
const RESOURCES_ENTRY: &str = "resources.arsc";

/// Reference chains longer than this are treated as cycles.
const MAX_REFERENCE_DEPTH: usize = 8;

/// Archive entries larger than this are not loaded.
const MAX_ENTRY_SIZE: u64 = 64 * 1024 * 1024;

/// Why a file could not be read as an APK. Never leaves this crate: the
/// reader converts it into a validation error on `artifact_url`.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("not a zip archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("{0} is missing")]
    MissingEntry(&'static str),

    #[error("{0} exceeds the size limit")]
    EntryTooLarge(&'static str),

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("truncated data at offset {offset}")]
    Truncated { offset: usize },

    #[error("malformed resource data: {0}")]
    Malformed(String),

    #[error("manifest has no usable {0}")]
    MissingAttribute(&'static str),

    #[error("unresolvable resource reference 0x{0:08x}")]
    Unresolved(u32),
}

/// Android implementation of [`ManifestReader`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ApkManifestReader;

impl ApkManifestReader {
    pub fn new() -> Self {
        Self
    }

    /// Parses the manifest of the APK at `path`.
    pub fn read_path(&self, path: &Path) -> Result<PackageManifest, ManifestError> {
        let mut archive = zip::ZipArchive::new(File::open(path)?)?;

        let manifest = read_entry(&mut archive, MANIFEST_ENTRY)?
            .ok_or(ManifestError::MissingEntry(MANIFEST_ENTRY))?;
        let raw = axml::parse(&manifest)?;

        // Only needed when something is a reference; a missing table is
        // reported as an unresolved reference at that point.
        let table = match read_entry(&mut archive, RESOURCES_ENTRY)? {
            Some(bytes) => Some(ResourceTable::parse(&bytes)?),
            None => None,
        };
        let resolver = Resolver {
            table: table.as_ref(),
        };

        let package_name = resolver
            .string(raw.package)?
            .filter(|s| !s.is_empty())
            .ok_or(ManifestError::MissingAttribute("package"))?;
        let version_code = resolver
            .int(raw.version_code)?
            .ok_or(ManifestError::MissingAttribute("versionCode"))?;
        let version_name = resolver
            .string(raw.version_name)?
            .filter(|s| !s.is_empty())
            .ok_or(ManifestError::MissingAttribute("versionName"))?;
        let min_sdk_version = resolver.int(raw.min_sdk_version)?.unwrap_or(1);
        let target_sdk_version = resolver
            .int(raw.target_sdk_version)?
            .unwrap_or(min_sdk_version);

        Ok(PackageManifest {
            package_name,
            version_code,
            version_name,
            min_sdk_version,
            target_sdk_version,
        })
    }
}

impl ManifestReader for ApkManifestReader {
    fn platform(&self) -> &'static str {
        "android"
    }

    fn read_manifest(&self, path: &Path) -> DomainResult<PackageManifest> {
        self.read_path(path).map_err(|e| {
            warn!(error = %e, "rejected binary");
            DomainError::validation("artifact_url", format!("invalid APK file: {e}"))
        })
    }
}

fn read_entry<R: std::io::Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &'static str,
) -> Result<Option<Vec<u8>>, ManifestError> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if entry.size() > MAX_ENTRY_SIZE {
        return Err(ManifestError::EntryTooLarge(name));
    }
    read_capped(&mut entry, name, MAX_ENTRY_SIZE).map(Some)
}

/// Reads at most `limit` bytes. The declared entry size is only a hint, so
/// the cap is enforced on what the decompressor actually yields.
fn read_capped<R: Read>(
    reader: R,
    name: &'static str,
    limit: u64,
) -> Result<Vec<u8>, ManifestError> {
    let mut bytes = Vec::new();
    reader.take(limit.saturating_add(1)).read_to_end(&mut bytes)?;
    if bytes.len() as u64 > limit {
        return Err(ManifestError::EntryTooLarge(name));
    }
    Ok(bytes)
}

struct Resolver<'a> {
    table: Option<&'a ResourceTable>,
}

impl Resolver<'_> {
    /// Follows references until a plain value is reached.
    fn resolve(&self, value: AttrValue) -> Result<AttrValue, ManifestError> {
        let mut current = value;
        for _ in 0..MAX_REFERENCE_DEPTH {
            let AttrValue::Reference(id) = current else {
                return Ok(current);
            };
            let entry = self
                .table
                .and_then(|t| t.get(id))
                .ok_or(ManifestError::Unresolved(id))?;
            current = match entry.data_type {
                TYPE_STRING => AttrValue::Str(
                    self.table
                        .and_then(|t| t.string(entry.data))
                        .ok_or(ManifestError::Unresolved(id))?
                        .to_owned(),
                ),
                TYPE_INT_DEC | TYPE_INT_HEX => AttrValue::Int(entry.data as i32),
                TYPE_INT_BOOLEAN => AttrValue::Bool(entry.data != 0),
                TYPE_REFERENCE => AttrValue::Reference(entry.data),
                _ => return Err(ManifestError::Unresolved(id)),
            };
        }
        match current {
            AttrValue::Reference(id) => Err(ManifestError::Unresolved(id)),
            other => Ok(other),
        }
    }

    fn string(&self, value: Option<AttrValue>) -> Result<Option<String>, ManifestError> {
        let Some(value) = value else {
            return Ok(None);
        };
        Ok(match self.resolve(value)? {
            AttrValue::Str(s) => Some(s),
            AttrValue::Int(i) => Some(i.to_string()),
            AttrValue::Bool(_) | AttrValue::Reference(_) => None,
        })
    }

    /// Integers may also be written as decimal strings.
    fn int(&self, value: Option<AttrValue>) -> Result<Option<i32>, ManifestError> {
        let Some(value) = value else {
            return Ok(None);
        };
        Ok(match self.resolve(value)? {
            AttrValue::Int(i) => Some(i),
            AttrValue::Str(s) => s.trim().parse().ok(),
            AttrValue::Bool(_) | AttrValue::Reference(_) => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::fixture::{zip_entries, ManifestFixture, ResourceFixture, TableValue, Value};
    use super::*;

    fn read(apk: &[u8]) -> DomainResult<PackageManifest> {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(apk).unwrap();
        file.flush().unwrap();
        ApkManifestReader::new().read_manifest(file.path())
    }

    #[test]
    fn reads_a_plain_manifest() {
        let apk = ManifestFixture::new("com.example.app")
            .version_code(Value::Int(5))
            .version_name(Value::str("1.0.5"))
            .build_apk();

        let manifest = read(&apk).unwrap();
        assert_eq!(
            manifest,
            PackageManifest {
                package_name: "com.example.app".into(),
                version_code: 5,
                version_name: "1.0.5".into(),
                min_sdk_version: 21,
                target_sdk_version: 34,
            }
        );
    }

    #[test]
    fn resolves_version_name_through_the_resource_table() {
        let apk = ManifestFixture::new("com.example.app")
            .version_name(Value::Ref(0x7f01_0000))
            .resources(
                ResourceFixture::new(0x7f)
                    .string_entry(0x01, 0, "2.0-beta-fr", false)
                    .string_entry(0x01, 0, "2.0-beta", true),
            )
            .build_apk();

        assert_eq!(read(&apk).unwrap().version_name, "2.0-beta");
    }

    #[test]
    fn resolves_integer_references() {
        let apk = ManifestFixture::new("com.example.app")
            .min_sdk(Some(Value::Ref(0x7f02_0001)))
            .resources(ResourceFixture::new(0x7f).entry(0x02, 1, TableValue::Int(26), true))
            .build_apk();

        assert_eq!(read(&apk).unwrap().min_sdk_version, 26);
    }

    #[test]
    fn sdk_levels_have_defaults() {
        let apk = ManifestFixture::new("com.example.app")
            .min_sdk(None)
            .target_sdk(None)
            .build_apk();
        let manifest = read(&apk).unwrap();
        assert_eq!(manifest.min_sdk_version, 1);
        assert_eq!(manifest.target_sdk_version, 1);

        let apk = ManifestFixture::new("com.example.app")
            .min_sdk(Some(Value::Int(24)))
            .target_sdk(None)
            .build_apk();
        assert_eq!(read(&apk).unwrap().target_sdk_version, 24);
    }

    #[test]
    fn version_code_is_mandatory() {
        let apk = ManifestFixture::new("com.example.app")
            .without_version_code()
            .build_apk();
        let err = read(&apk).unwrap_err();
        assert_eq!(err.field(), Some("artifact_url"));
        assert!(err.to_string().contains("versionCode"), "{err}");
    }

    #[test]
    fn version_name_is_mandatory() {
        let apk = ManifestFixture::new("com.example.app")
            .without_version_name()
            .build_apk();
        assert!(read(&apk).unwrap_err().to_string().contains("versionName"));
    }

    #[test]
    fn dangling_reference_is_invalid() {
        let apk = ManifestFixture::new("com.example.app")
            .version_name(Value::Ref(0x7f01_0009))
            .build_apk();
        let err = read(&apk).unwrap_err();
        assert!(err.to_string().contains("0x7f010009"), "{err}");
    }

    #[test]
    fn non_zip_input_is_invalid() {
        let err = read(b"definitely not an archive").unwrap_err();
        assert_eq!(err.field(), Some("artifact_url"));
        assert!(err.to_string().starts_with("artifact_url: invalid APK file"));
    }

    #[test]
    fn archive_without_manifest_is_invalid() {
        let apk = zip_entries(&[("classes.dex", b"dex".to_vec())]);
        let err = read(&apk).unwrap_err();
        assert!(err.to_string().contains("AndroidManifest.xml is missing"));
    }

    #[test]
    fn entry_reads_stop_at_the_cap() {
        let exact = read_capped(std::io::Cursor::new(vec![7u8; 16]), MANIFEST_ENTRY, 16).unwrap();
        assert_eq!(exact.len(), 16);

        let err = read_capped(std::io::repeat(0), MANIFEST_ENTRY, 16).unwrap_err();
        assert!(matches!(err, ManifestError::EntryTooLarge(MANIFEST_ENTRY)), "{err}");
    }

    #[test]
    fn reports_the_android_platform() {
        assert_eq!(ApkManifestReader::new().platform(), "android");
    }
}
