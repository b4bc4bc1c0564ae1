//! Builds small but structurally faithful APKs for tests: a binary
//! `AndroidManifest.xml`, an optional `resources.arsc` and a placeholder
//! `classes.dex`, zipped together.

use std::collections::BTreeMap;
use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::axml::{
    ATTR_MIN_SDK_VERSION, ATTR_TARGET_SDK_VERSION, ATTR_VERSION_CODE, ATTR_VERSION_NAME,
};
use super::chunk::{
    NO_INDEX, RES_STRING_POOL_TYPE, RES_TABLE_PACKAGE_TYPE, RES_TABLE_TYPE, RES_TABLE_TYPE_TYPE,
    RES_XML_END_ELEMENT_TYPE, RES_XML_END_NAMESPACE_TYPE, RES_XML_RESOURCE_MAP_TYPE,
    RES_XML_START_ELEMENT_TYPE, RES_XML_START_NAMESPACE_TYPE, RES_XML_TYPE, TYPE_INT_DEC,
    TYPE_REFERENCE, TYPE_STRING,
};

const ANDROID_NS: &str = "http://schemas.android.com/apk/res/android";

/// A manifest attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i32),
    Str(String),
    /// Reference into `resources.arsc`, e.g. `0x7f010000`.
    Ref(u32),
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

/// Description of an APK to encode.
#[derive(Debug, Clone)]
pub struct ManifestFixture {
    package: String,
    version_code: Option<Value>,
    version_name: Option<Value>,
    min_sdk: Option<Value>,
    target_sdk: Option<Value>,
    resources: Option<ResourceFixture>,
}

impl ManifestFixture {
    /// Version code 1, version name "1.0", SDK 21 / 34.
    pub fn new(package: &str) -> Self {
        Self {
            package: package.to_owned(),
            version_code: Some(Value::Int(1)),
            version_name: Some(Value::str("1.0")),
            min_sdk: Some(Value::Int(21)),
            target_sdk: Some(Value::Int(34)),
            resources: None,
        }
    }

    pub fn version_code(mut self, value: Value) -> Self {
        self.version_code = Some(value);
        self
    }

    pub fn without_version_code(mut self) -> Self {
        self.version_code = None;
        self
    }

    pub fn version_name(mut self, value: Value) -> Self {
        self.version_name = Some(value);
        self
    }

    pub fn without_version_name(mut self) -> Self {
        self.version_name = None;
        self
    }

    pub fn min_sdk(mut self, value: Option<Value>) -> Self {
        self.min_sdk = value;
        self
    }

    pub fn target_sdk(mut self, value: Option<Value>) -> Self {
        self.target_sdk = value;
        self
    }

    pub fn resources(mut self, table: ResourceFixture) -> Self {
        self.resources = Some(table);
        self
    }

    /// The binary XML document alone.
    pub fn encode_manifest(&self) -> Vec<u8> {
        let mut pool = Pool::default();
        // Attribute names first, in resource-map order.
        let version_code = pool.intern("versionCode");
        let version_name = pool.intern("versionName");
        let min_sdk = pool.intern("minSdkVersion");
        let target_sdk = pool.intern("targetSdkVersion");
        let resource_map = [
            ATTR_VERSION_CODE,
            ATTR_VERSION_NAME,
            ATTR_MIN_SDK_VERSION,
            ATTR_TARGET_SDK_VERSION,
        ];
        let package_attr = pool.intern("package");
        let manifest_tag = pool.intern("manifest");
        let uses_sdk_tag = pool.intern("uses-sdk");
        let prefix = pool.intern("android");
        let ns = pool.intern(ANDROID_NS);

        let mut manifest_attrs = vec![Attr::string(NO_INDEX, package_attr, &mut pool, &self.package)];
        if let Some(v) = &self.version_code {
            manifest_attrs.push(Attr::new(ns, version_code, v, &mut pool));
        }
        if let Some(v) = &self.version_name {
            manifest_attrs.push(Attr::new(ns, version_name, v, &mut pool));
        }
        let mut sdk_attrs = Vec::new();
        if let Some(v) = &self.min_sdk {
            sdk_attrs.push(Attr::new(ns, min_sdk, v, &mut pool));
        }
        if let Some(v) = &self.target_sdk {
            sdk_attrs.push(Attr::new(ns, target_sdk, v, &mut pool));
        }

        let mut body = pool.encode();

        let mut map = Vec::new();
        for id in resource_map {
            map.extend_from_slice(&id.to_le_bytes());
        }
        body.extend(chunk(RES_XML_RESOURCE_MAP_TYPE, &[], &map));

        body.extend(namespace_chunk(RES_XML_START_NAMESPACE_TYPE, prefix, ns));
        body.extend(start_element(manifest_tag, &manifest_attrs));
        body.extend(start_element(uses_sdk_tag, &sdk_attrs));
        body.extend(end_element(uses_sdk_tag));
        body.extend(end_element(manifest_tag));
        body.extend(namespace_chunk(RES_XML_END_NAMESPACE_TYPE, prefix, ns));

        chunk(RES_XML_TYPE, &[], &body)
    }

    /// A zipped APK.
    pub fn build_apk(&self) -> Vec<u8> {
        let mut files: Vec<(&str, Vec<u8>)> = vec![("AndroidManifest.xml", self.encode_manifest())];
        if let Some(table) = &self.resources {
            files.push(("resources.arsc", table.encode()));
        }
        files.push(("classes.dex", b"dex\n035\0".to_vec()));
        zip_entries(&files)
    }
}

/// Zips arbitrary entries; useful for archives that lack a manifest.
pub fn zip_entries(files: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, bytes) in files {
        writer
            .start_file(*name, options)
            .expect("in-memory zip entry");
        writer.write_all(bytes).expect("in-memory zip write");
    }
    writer.finish().expect("in-memory zip finish").into_inner()
}

/// A value stored in the resource table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableValue {
    Int(i32),
    Str(String),
}

/// Description of a `resources.arsc` with a single package.
#[derive(Debug, Clone)]
pub struct ResourceFixture {
    package_id: u8,
    entries: Vec<(u8, u16, TableValue, bool)>,
}

impl ResourceFixture {
    pub fn new(package_id: u8) -> Self {
        Self {
            package_id,
            entries: Vec::new(),
        }
    }

    /// Adds an entry of type `type_id` at `index`; `default_config == false`
    /// places it under a French locale configuration.
    pub fn entry(mut self, type_id: u8, index: u16, value: TableValue, default_config: bool) -> Self {
        self.entries.push((type_id, index, value, default_config));
        self
    }

    pub fn string_entry(self, type_id: u8, index: u16, value: &str, default_config: bool) -> Self {
        self.entry(type_id, index, TableValue::Str(value.to_owned()), default_config)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut values = Pool::default();
        let mut groups: BTreeMap<(u8, bool), BTreeMap<u16, (u8, u32)>> = BTreeMap::new();
        for (type_id, index, value, default_config) in &self.entries {
            let encoded = match value {
                TableValue::Int(i) => (TYPE_INT_DEC, *i as u32),
                TableValue::Str(s) => (TYPE_STRING, values.intern(s)),
            };
            groups
                .entry((*type_id, *default_config))
                .or_default()
                .insert(*index, encoded);
        }

        let mut package_body = Pool::default().encode(); // type names
        let key_strings_at = 288 + package_body.len();
        package_body.extend(Pool::default().encode()); // key names
        for ((type_id, default_config), entries) in &groups {
            package_body.extend(type_chunk(*type_id, *default_config, entries));
        }

        let mut package_header = Vec::new();
        package_header.extend_from_slice(&(self.package_id as u32).to_le_bytes());
        package_header.extend_from_slice(&[0u8; 256]); // name
        package_header.extend_from_slice(&288u32.to_le_bytes()); // typeStrings
        package_header.extend_from_slice(&0u32.to_le_bytes()); // lastPublicType
        package_header.extend_from_slice(&(key_strings_at as u32).to_le_bytes());
        package_header.extend_from_slice(&0u32.to_le_bytes()); // lastPublicKey
        package_header.extend_from_slice(&0u32.to_le_bytes()); // typeIdOffset
        let package = chunk(RES_TABLE_PACKAGE_TYPE, &package_header, &package_body);

        let mut body = values.encode();
        body.extend(package);
        chunk(RES_TABLE_TYPE, &1u32.to_le_bytes(), &body)
    }
}

fn type_chunk(type_id: u8, default_config: bool, entries: &BTreeMap<u16, (u8, u32)>) -> Vec<u8> {
    let entry_count = entries.keys().max().map_or(0, |max| *max as usize + 1);

    let mut config = [0u8; 64];
    config[..4].copy_from_slice(&64u32.to_le_bytes());
    if !default_config {
        config[8..10].copy_from_slice(b"fr");
    }

    let header_size = 8 + 12 + config.len();
    let entries_start = header_size + entry_count * 4;

    let mut header = vec![type_id, 0, 0, 0];
    header.extend_from_slice(&(entry_count as u32).to_le_bytes());
    header.extend_from_slice(&(entries_start as u32).to_le_bytes());
    header.extend_from_slice(&config);

    let mut offsets = Vec::new();
    let mut data = Vec::new();
    for index in 0..entry_count as u16 {
        match entries.get(&index) {
            Some((data_type, value)) => {
                offsets.extend_from_slice(&(data.len() as u32).to_le_bytes());
                data.extend_from_slice(&8u16.to_le_bytes()); // entry size
                data.extend_from_slice(&0u16.to_le_bytes()); // flags
                data.extend_from_slice(&0u32.to_le_bytes()); // key
                data.extend_from_slice(&res_value(*data_type, *value));
            }
            None => offsets.extend_from_slice(&NO_INDEX.to_le_bytes()),
        }
    }
    offsets.extend(data);
    chunk(RES_TABLE_TYPE_TYPE, &header, &offsets)
}

/// Interned UTF-16 string pool.
#[derive(Default)]
struct Pool {
    strings: Vec<String>,
}

impl Pool {
    fn intern(&mut self, s: &str) -> u32 {
        if let Some(i) = self.strings.iter().position(|existing| existing == s) {
            return i as u32;
        }
        self.strings.push(s.to_owned());
        (self.strings.len() - 1) as u32
    }

    fn encode(&self) -> Vec<u8> {
        let mut offsets = Vec::new();
        let mut data = Vec::new();
        for s in &self.strings {
            offsets.extend_from_slice(&(data.len() as u32).to_le_bytes());
            let units: Vec<u16> = s.encode_utf16().collect();
            data.extend_from_slice(&(units.len() as u16).to_le_bytes());
            for unit in units {
                data.extend_from_slice(&unit.to_le_bytes());
            }
            data.extend_from_slice(&0u16.to_le_bytes());
        }
        while data.len() % 4 != 0 {
            data.push(0);
        }

        let strings_start = 28 + offsets.len();
        let mut header = Vec::new();
        header.extend_from_slice(&(self.strings.len() as u32).to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes()); // styleCount
        header.extend_from_slice(&0u32.to_le_bytes()); // flags: UTF-16
        header.extend_from_slice(&(strings_start as u32).to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes()); // stylesStart
        offsets.extend(data);
        chunk(RES_STRING_POOL_TYPE, &header, &offsets)
    }
}

struct Attr {
    ns: u32,
    name: u32,
    raw: u32,
    data_type: u8,
    data: u32,
}

impl Attr {
    fn new(ns: u32, name: u32, value: &Value, pool: &mut Pool) -> Self {
        match value {
            Value::Int(i) => Attr {
                ns,
                name,
                raw: NO_INDEX,
                data_type: TYPE_INT_DEC,
                data: *i as u32,
            },
            Value::Str(s) => Attr::string(ns, name, pool, s),
            Value::Ref(id) => Attr {
                ns,
                name,
                raw: NO_INDEX,
                data_type: TYPE_REFERENCE,
                data: *id,
            },
        }
    }

    fn string(ns: u32, name: u32, pool: &mut Pool, s: &str) -> Self {
        let index = pool.intern(s);
        Attr {
            ns,
            name,
            raw: index,
            data_type: TYPE_STRING,
            data: index,
        }
    }
}

fn res_value(data_type: u8, data: u32) -> [u8; 8] {
    let mut out = [0u8; 8];
    out[..2].copy_from_slice(&8u16.to_le_bytes());
    out[3] = data_type;
    out[4..].copy_from_slice(&data.to_le_bytes());
    out
}

/// Node header extension shared by element and namespace chunks: line number
/// and comment index.
fn node_header() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&NO_INDEX.to_le_bytes());
    out
}

fn namespace_chunk(kind: u16, prefix: u32, uri: u32) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&prefix.to_le_bytes());
    body.extend_from_slice(&uri.to_le_bytes());
    chunk(kind, &node_header(), &body)
}

fn start_element(name: u32, attrs: &[Attr]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&NO_INDEX.to_le_bytes()); // ns
    body.extend_from_slice(&name.to_le_bytes());
    body.extend_from_slice(&20u16.to_le_bytes()); // attributeStart
    body.extend_from_slice(&20u16.to_le_bytes()); // attributeSize
    body.extend_from_slice(&(attrs.len() as u16).to_le_bytes());
    body.extend_from_slice(&[0u8; 6]); // id, class, style indices
    for attr in attrs {
        body.extend_from_slice(&attr.ns.to_le_bytes());
        body.extend_from_slice(&attr.name.to_le_bytes());
        body.extend_from_slice(&attr.raw.to_le_bytes());
        body.extend_from_slice(&res_value(attr.data_type, attr.data));
    }
    chunk(RES_XML_START_ELEMENT_TYPE, &node_header(), &body)
}

fn end_element(name: u32) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&NO_INDEX.to_le_bytes());
    body.extend_from_slice(&name.to_le_bytes());
    chunk(RES_XML_END_ELEMENT_TYPE, &node_header(), &body)
}

/// `ResChunk_header` + extra header fields + body.
fn chunk(kind: u16, extra_header: &[u8], body: &[u8]) -> Vec<u8> {
    let header_size = 8 + extra_header.len();
    let size = header_size + body.len();
    let mut out = Vec::with_capacity(size);
    out.extend_from_slice(&kind.to_le_bytes());
    out.extend_from_slice(&(header_size as u16).to_le_bytes());
    out.extend_from_slice(&(size as u32).to_le_bytes());
    out.extend_from_slice(extra_header);
    out.extend_from_slice(body);
    out
}
