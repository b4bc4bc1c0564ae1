//! Binary XML (`AndroidManifest.xml` as packaged) decoder.
//!
//! Only the attributes the pipeline needs are extracted; everything else in
//! the document is skipped chunk by chunk.

use super::chunk::{
    chunks, u16_at, u32_at, ChunkHeader, ResValue, StringPool, NO_INDEX,
    RES_STRING_POOL_TYPE, RES_XML_END_ELEMENT_TYPE, RES_XML_END_NAMESPACE_TYPE,
    RES_XML_RESOURCE_MAP_TYPE, RES_XML_START_ELEMENT_TYPE, RES_XML_START_NAMESPACE_TYPE,
    RES_XML_TYPE, TYPE_INT_BOOLEAN, TYPE_INT_DEC, TYPE_INT_HEX, TYPE_REFERENCE, TYPE_STRING,
};
use super::ManifestError;

pub(crate) const ATTR_VERSION_CODE: u32 = 0x0101_021b;
pub(crate) const ATTR_VERSION_NAME: u32 = 0x0101_021c;
pub(crate) const ATTR_MIN_SDK_VERSION: u32 = 0x0101_020c;
pub(crate) const ATTR_TARGET_SDK_VERSION: u32 = 0x0101_0270;

/// An attribute value before resource references are resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AttrValue {
    Str(String),
    Int(i32),
    Bool(bool),
    Reference(u32),
}

/// Manifest attributes as they appear in the document.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct RawManifest {
    pub package: Option<AttrValue>,
    pub version_code: Option<AttrValue>,
    pub version_name: Option<AttrValue>,
    pub min_sdk_version: Option<AttrValue>,
    pub target_sdk_version: Option<AttrValue>,
}

/// Which manifest field an attribute feeds, if any.
#[derive(Clone, Copy)]
enum Field {
    Package,
    VersionCode,
    VersionName,
    MinSdk,
    TargetSdk,
}

pub(crate) fn parse(buf: &[u8]) -> Result<RawManifest, ManifestError> {
    let root = ChunkHeader::read(buf, 0)?;
    if root.kind != RES_XML_TYPE {
        return Err(ManifestError::Malformed(format!(
            "expected binary XML, found chunk type 0x{:04x}",
            root.kind
        )));
    }

    let mut pool = StringPool::default();
    let mut resource_ids: Vec<u32> = Vec::new();
    let mut manifest = RawManifest::default();

    for chunk in chunks(buf, root.body(), root.end()) {
        let chunk = chunk?;
        match chunk.kind {
            RES_STRING_POOL_TYPE => pool = StringPool::parse(buf, &chunk)?,
            RES_XML_RESOURCE_MAP_TYPE => {
                resource_ids = (chunk.body()..chunk.end())
                    .step_by(4)
                    .map(|at| u32_at(buf, at))
                    .collect::<Result<_, _>>()?;
            }
            RES_XML_START_ELEMENT_TYPE => {
                read_element(buf, &chunk, &pool, &resource_ids, &mut manifest)?
            }
            RES_XML_START_NAMESPACE_TYPE | RES_XML_END_NAMESPACE_TYPE | RES_XML_END_ELEMENT_TYPE => {}
            _ => {}
        }
    }

    Ok(manifest)
}

fn read_element(
    buf: &[u8],
    chunk: &ChunkHeader,
    pool: &StringPool,
    resource_ids: &[u32],
    manifest: &mut RawManifest,
) -> Result<(), ManifestError> {
    // ResXMLTree_attrExt follows the 16-byte node header.
    let ext = chunk.body();
    let name = pool.get(u32_at(buf, ext + 4)?).unwrap_or_default();
    let in_manifest = match name {
        "manifest" => true,
        "uses-sdk" => false,
        _ => return Ok(()),
    };

    let attribute_start = u16_at(buf, ext + 8)? as usize;
    let attribute_size = u16_at(buf, ext + 10)? as usize;
    let attribute_count = u16_at(buf, ext + 12)? as usize;
    if attribute_size < 20 {
        return Err(ManifestError::Malformed(format!(
            "attribute size {attribute_size} is too small"
        )));
    }

    for i in 0..attribute_count {
        let at = ext + attribute_start + i * attribute_size;
        if at + attribute_size > chunk.end() {
            return Err(ManifestError::Truncated { offset: at });
        }
        let name_index = u32_at(buf, at + 4)?;
        let resource_id = resource_ids.get(name_index as usize).copied().unwrap_or(0);
        let attr_name = pool.get(name_index).unwrap_or_default();

        let Some(field) = classify(in_manifest, resource_id, attr_name) else {
            continue;
        };
        let raw = u32_at(buf, at + 8)?;
        let Some(value) = decode_value(ResValue::read(buf, at + 12)?, raw, pool) else {
            continue;
        };

        let slot = match field {
            Field::Package => &mut manifest.package,
            Field::VersionCode => &mut manifest.version_code,
            Field::VersionName => &mut manifest.version_name,
            Field::MinSdk => &mut manifest.min_sdk_version,
            Field::TargetSdk => &mut manifest.target_sdk_version,
        };
        *slot = Some(value);
    }
    Ok(())
}

/// Matches by framework resource ID first and falls back to the attribute
/// name for documents without a resource map.
fn classify(in_manifest: bool, resource_id: u32, name: &str) -> Option<Field> {
    if in_manifest {
        match (resource_id, name) {
            (ATTR_VERSION_CODE, _) | (0, "versionCode") => Some(Field::VersionCode),
            (ATTR_VERSION_NAME, _) | (0, "versionName") => Some(Field::VersionName),
            (0, "package") => Some(Field::Package),
            _ => None,
        }
    } else {
        match (resource_id, name) {
            (ATTR_MIN_SDK_VERSION, _) | (0, "minSdkVersion") => Some(Field::MinSdk),
            (ATTR_TARGET_SDK_VERSION, _) | (0, "targetSdkVersion") => Some(Field::TargetSdk),
            _ => None,
        }
    }
}

fn decode_value(value: ResValue, raw: u32, pool: &StringPool) -> Option<AttrValue> {
    match value.data_type {
        TYPE_STRING => pool
            .get(value.data)
            .or_else(|| pool.get(raw))
            .map(|s| AttrValue::Str(s.to_owned())),
        TYPE_INT_DEC | TYPE_INT_HEX => Some(AttrValue::Int(value.data as i32)),
        TYPE_INT_BOOLEAN => Some(AttrValue::Bool(value.data != 0)),
        TYPE_REFERENCE => Some(AttrValue::Reference(value.data)),
        _ if raw != NO_INDEX => pool.get(raw).map(|s| AttrValue::Str(s.to_owned())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apk::fixture::{ManifestFixture, Value};

    #[test]
    fn reads_manifest_and_uses_sdk_attributes() {
        let xml = ManifestFixture::new("com.example.app")
            .version_code(Value::Int(5))
            .version_name(Value::str("1.0.5"))
            .min_sdk(Some(Value::Int(21)))
            .target_sdk(Some(Value::Int(34)))
            .encode_manifest();

        let raw = parse(&xml).unwrap();
        assert_eq!(raw.package, Some(AttrValue::Str("com.example.app".into())));
        assert_eq!(raw.version_code, Some(AttrValue::Int(5)));
        assert_eq!(raw.version_name, Some(AttrValue::Str("1.0.5".into())));
        assert_eq!(raw.min_sdk_version, Some(AttrValue::Int(21)));
        assert_eq!(raw.target_sdk_version, Some(AttrValue::Int(34)));
    }

    #[test]
    fn references_are_kept_for_later_resolution() {
        let xml = ManifestFixture::new("com.example.app")
            .version_name(Value::Ref(0x7f01_0000))
            .encode_manifest();

        let raw = parse(&xml).unwrap();
        assert_eq!(raw.version_name, Some(AttrValue::Reference(0x7f01_0000)));
    }

    #[test]
    fn plain_xml_is_rejected() {
        let err = parse(b"<?xml version=\"1.0\"?><manifest/>").unwrap_err();
        assert!(matches!(err, ManifestError::Malformed(_)));
    }
}
