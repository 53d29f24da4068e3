//! `00README` ("ZZRM") manifest loading, merging with preflight, and
//! round-trip serialization.
//!
//! Ported wholesale from `original_source/tex2pdf_tools/zerozeroreadme/__init__.py`:
//! the v1 line-tokenizer, the v2 extension-dispatch parser, and the
//! `from_dict`/`to_dict` field ordering all follow that file directly.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::ZZRMError;
use crate::types::{CompilerSpec, PreflightResponse, DEFAULT_ENGINE_TYPE, DEFAULT_LANGUAGE_TYPE, DEFAULT_OUTPUT_TYPE, DEFAULT_POSTPROCESS_TYPE};

pub const ZZRM_CURRENT_VERSION: u32 = 1;
const ZZRM_V1_EXT: &str = "xxx";
const ZZRM_V2_EXTS: &[&str] = &["yml", "yaml", "json", "jsn", "ndjson", "toml"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileUsageType {
    Toplevel,
    Ignore,
    Include,
    Append,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrientationType {
    Portrait,
    Landscape,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserFile {
    pub filename: String,
    pub usage: FileUsageType,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub orientation: Option<OrientationType>,
    #[serde(default)]
    pub keep_comments: bool,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub fontmaps: Vec<String>,
}

impl UserFile {
    pub fn new(filename: impl Into<String>) -> Self {
        Self { filename: filename.into(), usage: FileUsageType::Toplevel, orientation: None, keep_comments: false, fontmaps: Vec::new() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZZRMProcessSpec {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub compiler: Option<CompilerSpec>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub fontmaps: Vec<String>,
}

impl ZZRMProcessSpec {
    /// Accept `compiler: "pdflatex"` shorthand and expand it via the
    /// canonical compiler-string table.
    pub fn with_compiler_string(s: &str) -> Result<Self, ZZRMError> {
        let compiler = CompilerSpec::from_compiler_string(s).ok_or_else(|| ZZRMError::Unsupported(format!("unknown compiler string: {s}")))?;
        Ok(Self { compiler: Some(compiler), fontmaps: Vec::new() })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ZeroZeroReadMe {
    pub filetype_version: u32,
    pub readme_filename: Option<String>,
    pub process: ZZRMProcessSpec,
    /// Keyed by filename, preserving insertion order — `to_dict`/`to_yaml`
    /// etc. must reproduce that order exactly (§8 invariant 4).
    pub sources: Vec<UserFile>,
    pub stamp: bool,
    pub nohyperref: Option<bool>,
    pub texlive_version: Option<String>,
    pub comment: Option<String>,
    pub spec_version: u32,
}

impl ZeroZeroReadMe {
    pub fn new() -> Self {
        Self { filetype_version: ZZRM_CURRENT_VERSION, stamp: true, spec_version: ZZRM_CURRENT_VERSION, ..Default::default() }
    }

    pub fn find_user_file(&self, filename: &str) -> Option<&UserFile> {
        self.sources.iter().find(|f| f.filename.eq_ignore_ascii_case(filename))
    }

    pub fn is_landscape(&self, filename: &str) -> bool {
        matches!(self.find_user_file(filename).and_then(|f| f.orientation), Some(OrientationType::Landscape))
    }

    pub fn is_keep_comments(&self, filename: &str) -> bool {
        self.find_user_file(filename).map(|f| f.keep_comments).unwrap_or(false)
    }

    pub fn toplevels(&self) -> Vec<&UserFile> {
        self.sources.iter().filter(|f| f.usage == FileUsageType::Toplevel).collect()
    }

    pub fn ignores(&self) -> Vec<&UserFile> {
        self.sources.iter().filter(|f| f.usage == FileUsageType::Ignore).collect()
    }

    pub fn fontmaps(&self) -> Vec<String> {
        let mut maps: Vec<String> = self.sources.iter().flat_map(|f| f.fontmaps.clone()).chain(self.process.fontmaps.clone()).collect();
        maps.sort();
        maps.dedup();
        maps
    }

    pub fn hyperref(&self) -> bool {
        !self.nohyperref.unwrap_or(false)
    }

    pub fn is_supported_compiler(&self) -> bool {
        self.process.compiler.map(|c| c.is_supported()).unwrap_or(false)
    }

    pub fn is_ready_for_compilation(&self) -> bool {
        !self.toplevels().is_empty() && self.process.compiler.map(|c| c.is_determined()).unwrap_or(false)
    }

    /// Ordered basenames (with `.pdf` extension) that drive final assembly
    /// order. Falls back to toplevel declaration order.
    pub fn assembling_files(&self) -> Vec<String> {
        self.toplevels()
            .iter()
            .map(|f| {
                let stem = f.filename.trim_end_matches(".tex");
                format!("{stem}.pdf")
            })
            .collect()
    }

    // ---- v1 (line-oriented) parsing ----

    pub fn from_v1(contents: &str) -> Result<Self, ZZRMError> {
        let mut zzrm = Self::new();
        zzrm.filetype_version = 1;

        for line in contents.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let mut tokens = trimmed.split_whitespace();
            let first = tokens.next().unwrap_or("");
            let second = tokens.next();

            match second {
                None => match first {
                    "nostamp" => zzrm.stamp = false,
                    "nohyperref" => zzrm.nohyperref = Some(true),
                    _ => return Err(ZZRMError::Key(format!("unrecognized single-token line: {first}"))),
                },
                Some(key) => {
                    let filename = first;
                    match key {
                        "toplevelfile" => zzrm.user_file_mut(filename).usage = FileUsageType::Toplevel,
                        "ignore" => zzrm.user_file_mut(filename).usage = FileUsageType::Ignore,
                        "include" => zzrm.user_file_mut(filename).usage = FileUsageType::Include,
                        "append" => zzrm.user_file_mut(filename).usage = FileUsageType::Append,
                        "landscape" => zzrm.user_file_mut(filename).orientation = Some(OrientationType::Landscape),
                        "keepcomments" => zzrm.user_file_mut(filename).keep_comments = true,
                        "fontmap" => zzrm.process.fontmaps.push(filename.to_string()),
                        other => return Err(ZZRMError::Key(format!("invalid key for 00README: {other}"))),
                    }
                }
            }
        }
        Ok(zzrm)
    }

    fn user_file_mut(&mut self, filename: &str) -> &mut UserFile {
        if let Some(idx) = self.sources.iter().position(|f| f.filename == filename) {
            &mut self.sources[idx]
        } else {
            self.sources.push(UserFile::new(filename));
            self.sources.last_mut().unwrap()
        }
    }

    // ---- v2 (structured) parsing ----

    pub fn from_v2(contents: &str, ext: &str) -> Result<Self, ZZRMError> {
        let value: serde_json::Value = match ext {
            "yaml" | "yml" => serde_yaml::from_str(contents).map_err(|e| ZZRMError::InvalidFormat(e.to_string()))?,
            "json" | "jsn" | "ndjson" => serde_json::from_str(contents).map_err(|e| ZZRMError::InvalidFormat(e.to_string()))?,
            "toml" => {
                let toml_value: toml::Value = toml::from_str(contents).map_err(|e| ZZRMError::InvalidFormat(e.to_string()))?;
                serde_json::to_value(toml_value).map_err(|e| ZZRMError::InvalidFormat(e.to_string()))?
            }
            other => return Err(ZZRMError::UnsupportedFile(format!("unknown 00README extension: {other}"))),
        };
        Self::from_dict(&value)
    }

    pub fn from_dict(value: &serde_json::Value) -> Result<Self, ZZRMError> {
        let mut zzrm = Self::new();
        let obj = value.as_object().ok_or_else(|| ZZRMError::Parse("00README v2 root must be a mapping".to_string()))?;

        for (k, v) in obj {
            match k.as_str() {
                "process" => {
                    let process_obj = v.as_object().ok_or_else(|| ZZRMError::Parse("process must be a mapping".to_string()))?;
                    for key in process_obj.keys() {
                        if !matches!(key.as_str(), "compiler" | "fontmaps") {
                            return Err(ZZRMError::Parse(format!("Invalid key for 00README process: {key}")));
                        }
                    }
                    if let Some(compiler_str) = v.get("compiler").and_then(|c| c.as_str()) {
                        zzrm.process = ZZRMProcessSpec::with_compiler_string(compiler_str)?;
                    }
                    if let Some(fontmaps) = v.get("fontmaps").and_then(|f| f.as_array()) {
                        zzrm.process.fontmaps = fontmaps.iter().filter_map(|f| f.as_str().map(String::from)).collect();
                    }
                }
                "sources" => {
                    let arr = v.as_array().ok_or_else(|| ZZRMError::Parse("sources must be a list".to_string()))?;
                    for entry in arr {
                        let entry_obj = entry.as_object().ok_or_else(|| ZZRMError::Parse("source entry must be a mapping".to_string()))?;
                        for key in entry_obj.keys() {
                            if !matches!(key.as_str(), "filename" | "usage" | "landscape" | "keep_comments" | "fontmaps") {
                                return Err(ZZRMError::Parse(format!("Invalid key for 00README source entry: {key}")));
                            }
                        }
                        let filename = entry.get("filename").and_then(|f| f.as_str()).ok_or_else(|| ZZRMError::Parse("source entry missing filename".to_string()))?;
                        let mut uf = UserFile::new(filename);
                        if let Some(usage) = entry.get("usage").and_then(|u| u.as_str()) {
                            uf.usage = match usage {
                                "toplevel" => FileUsageType::Toplevel,
                                "ignore" => FileUsageType::Ignore,
                                "include" => FileUsageType::Include,
                                "append" => FileUsageType::Append,
                                other => return Err(ZZRMError::Key(format!("invalid usage for 00README: {other}"))),
                            };
                        }
                        if let Some(true) = entry.get("landscape").and_then(|o| o.as_bool()) {
                            uf.orientation = Some(OrientationType::Landscape);
                        }
                        if let Some(true) = entry.get("keep_comments").and_then(|o| o.as_bool()) {
                            uf.keep_comments = true;
                        }
                        if let Some(fontmaps) = entry.get("fontmaps").and_then(|f| f.as_array()) {
                            uf.fontmaps = fontmaps.iter().filter_map(|f| f.as_str().map(String::from)).collect();
                        }
                        zzrm.sources.push(uf);
                    }
                }
                "stamp" => zzrm.stamp = v.as_bool().unwrap_or(true),
                "nohyperref" => zzrm.nohyperref = v.as_bool(),
                "version" => { /* legacy, kept for consistency check only, never used */ }
                "spec_version" | "spec-version" => {
                    let n = v.as_u64().ok_or_else(|| ZZRMError::Parse("spec_version must be an integer".to_string()))? as u32;
                    if n < 1 || n > ZZRM_CURRENT_VERSION {
                        return Err(ZZRMError::UnsupportedFiletypeVersion(n.to_string()));
                    }
                    zzrm.spec_version = n;
                }
                "texlive_version" | "texlive-version" => {
                    zzrm.texlive_version = Some(parse_texlive_version(v)?);
                }
                "comment" => zzrm.comment = Some(value_to_string(v)),
                other => return Err(ZZRMError::Parse(format!("Invalid key for 00README: {other}"))),
            }
        }
        Ok(zzrm)
    }

    // ---- preflight merge ----

    /// Import preflight-detected toplevels when ZZRM declares none, and
    /// derive a compiler from the first toplevel's preflight entry when the
    /// manifest doesn't specify one.
    pub fn update_from_preflight(&mut self, preflight: &PreflightResponse) -> Result<bool, ZZRMError> {
        if self.toplevels().is_empty() {
            for top in &preflight.toplevels {
                if self.find_user_file(&top.filename).is_none() {
                    self.sources.push(UserFile::new(&top.filename));
                }
            }
        }
        if self.toplevels().is_empty() {
            return Err(ZZRMError::Underspecified);
        }

        if self.process.compiler.is_none() {
            if let Some(first) = preflight.toplevels.first() {
                let mut spec = first.process;
                if spec.lang == crate::types::LanguageType::Unknown {
                    spec.lang = DEFAULT_LANGUAGE_TYPE;
                }
                if spec.engine == crate::types::EngineType::Unknown {
                    spec.engine = DEFAULT_ENGINE_TYPE;
                }
                if spec.output == crate::types::OutputType::Unknown {
                    spec.output = DEFAULT_OUTPUT_TYPE;
                }
                if spec.postp == crate::types::PostProcessType::Unknown {
                    spec.postp = DEFAULT_POSTPROCESS_TYPE;
                }
                self.process.compiler = Some(spec);
            }
        }

        Ok(self.is_ready_for_compilation())
    }

    // ---- round-trip serialization ----

    /// `comment` first, then `process` (compiler serialized as
    /// `compiler_string`), then `sources`, `stamp`, `nohyperref`,
    /// `texlive_version`, `spec_version` last.
    pub fn to_dict(&self) -> BTreeMap<&'static str, serde_json::Value> {
        let mut map: Vec<(&'static str, serde_json::Value)> = Vec::new();

        if let Some(c) = &self.comment {
            map.push(("comment", serde_json::Value::String(c.clone())));
        }

        let mut process = serde_json::Map::new();
        if let Some(compiler) = self.process.compiler {
            process.insert("compiler".to_string(), serde_json::Value::String(compiler.compiler_string()));
        }
        if !self.process.fontmaps.is_empty() {
            process.insert("fontmaps".to_string(), serde_json::json!(self.process.fontmaps));
        }
        map.push(("process", serde_json::Value::Object(process)));

        let sources: Vec<serde_json::Value> = self
            .sources
            .iter()
            .map(|f| {
                serde_json::json!({
                    "filename": f.filename,
                    "usage": match f.usage {
                        FileUsageType::Toplevel => "toplevel",
                        FileUsageType::Ignore => "ignore",
                        FileUsageType::Include => "include",
                        FileUsageType::Append => "append",
                    },
                })
            })
            .collect();
        map.push(("sources", serde_json::Value::Array(sources)));
        map.push(("stamp", serde_json::Value::Bool(self.stamp)));
        if let Some(nh) = self.nohyperref {
            map.push(("nohyperref", serde_json::Value::Bool(nh)));
        }
        if let Some(tlv) = &self.texlive_version {
            map.push(("texlive_version", serde_json::Value::String(tlv.clone())));
        }
        map.push(("spec_version", serde_json::Value::Number(self.spec_version.into())));

        // BTreeMap only used for a stable-keyed return type; ordering of the
        // actual serialized document comes from `map`'s insertion order via
        // to_yaml/to_json/to_toml below, not from this map's iteration.
        map.into_iter().collect()
    }

    pub fn to_json(&self) -> Result<String, ZZRMError> {
        serde_json::to_string_pretty(&self.ordered_dict()).map_err(|e| ZZRMError::InvalidFormat(e.to_string()))
    }

    pub fn to_yaml(&self) -> Result<String, ZZRMError> {
        serde_yaml::to_string(&self.ordered_dict()).map_err(|e| ZZRMError::InvalidFormat(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String, ZZRMError> {
        let value = self.ordered_dict();
        let toml_value: toml::Value = serde_json::from_value(value).map_err(|e| ZZRMError::InvalidFormat(e.to_string()))?;
        toml::to_string_pretty(&toml_value).map_err(|e| ZZRMError::InvalidFormat(e.to_string()))
    }

    /// Builds the actual ordered JSON value (unlike `to_dict`, which returns
    /// a `BTreeMap` for programmatic inspection and loses key order).
    fn ordered_dict(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        if let Some(c) = &self.comment {
            map.insert("comment".to_string(), serde_json::Value::String(c.clone()));
        }
        let mut process = serde_json::Map::new();
        if let Some(compiler) = self.process.compiler {
            process.insert("compiler".to_string(), serde_json::Value::String(compiler.compiler_string()));
        }
        if !self.process.fontmaps.is_empty() {
            process.insert("fontmaps".to_string(), serde_json::json!(self.process.fontmaps));
        }
        map.insert("process".to_string(), serde_json::Value::Object(process));
        map.insert(
            "sources".to_string(),
            serde_json::json!(self
                .sources
                .iter()
                .map(|f| serde_json::json!({"filename": f.filename, "usage": format!("{:?}", f.usage).to_lowercase()}))
                .collect::<Vec<_>>()),
        );
        map.insert("stamp".to_string(), serde_json::Value::Bool(self.stamp));
        if let Some(nh) = self.nohyperref {
            map.insert("nohyperref".to_string(), serde_json::Value::Bool(nh));
        }
        if let Some(tlv) = &self.texlive_version {
            map.insert("texlive_version".to_string(), serde_json::Value::String(tlv.clone()));
        }
        map.insert("spec_version".to_string(), serde_json::Value::Number(self.spec_version.into()));
        serde_json::Value::Object(map)
    }
}

fn value_to_string(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Accepts an int, a numeric string, or a `tl<NNNN>`/`TL<NNNN>` prefixed
/// string.
fn parse_texlive_version(v: &serde_json::Value) -> Result<String, ZZRMError> {
    match v {
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::String(s) => {
            let upper = s.to_uppercase();
            if s.chars().all(|c| c.is_ascii_digit()) {
                Ok(s.clone())
            } else if let Some(rest) = upper.strip_prefix("TL") {
                if rest.chars().all(|c| c.is_ascii_digit()) {
                    Ok(s.clone())
                } else {
                    Err(ZZRMError::InvalidFormat(format!("invalid texlive_version: {s}")))
                }
            } else if s == "current" {
                Ok(s.clone())
            } else {
                Err(ZZRMError::InvalidFormat(format!("invalid texlive_version: {s}")))
            }
        }
        other => Err(ZZRMError::InvalidFormat(format!("invalid texlive_version: {other}"))),
    }
}

/// Locate and load the 00README in `dir`, per the filename policy in
/// SPEC_FULL.md §4.5: `.xxx` is v1, the v2 extension set wins if both are
/// present, multiple files of the same version is an error.
pub fn init_from_dir(dir: &Path) -> Result<ZeroZeroReadMe, ZZRMError> {
    let mut v1_candidates = Vec::new();
    let mut v2_candidates = Vec::new();

    let entries = std::fs::read_dir(dir).map_err(|e| ZZRMError::FileNotFound(e.to_string()))?;
    for entry in entries.flatten() {
        let path = entry.path();
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
        if !stem.eq_ignore_ascii_case("00README") {
            continue;
        }
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("").to_lowercase();
        if ext == ZZRM_V1_EXT {
            v1_candidates.push(path);
        } else if ZZRM_V2_EXTS.contains(&ext.as_str()) {
            v2_candidates.push(path);
        }
    }

    if v2_candidates.len() > 1 {
        return Err(ZZRMError::MultipleFiles(format!("{v2_candidates:?}")));
    }
    if let Some(path) = v2_candidates.first() {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("").to_lowercase();
        let contents = std::fs::read_to_string(path).map_err(|e| ZZRMError::FileNotFound(e.to_string()))?;
        let mut zzrm = ZeroZeroReadMe::from_v2(&contents, &ext)?;
        zzrm.readme_filename = path.file_name().and_then(|f| f.to_str()).map(String::from);
        return Ok(zzrm);
    }

    if v1_candidates.len() > 1 {
        return Err(ZZRMError::MultipleFiles(format!("{v1_candidates:?}")));
    }
    if let Some(path) = v1_candidates.first() {
        let contents = std::fs::read_to_string(path).map_err(|e| ZZRMError::FileNotFound(e.to_string()))?;
        let mut zzrm = ZeroZeroReadMe::from_v1(&contents)?;
        zzrm.readme_filename = path.file_name().and_then(|f| f.to_str()).map(String::from);
        return Ok(zzrm);
    }

    Err(ZZRMError::FileNotFound(dir.display().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v1_parses_toplevel_and_flags() {
        let contents = "main.tex toplevelfile\nappendix.tex include\nnostamp\n";
        let zzrm = ZeroZeroReadMe::from_v1(contents).unwrap();
        assert!(!zzrm.stamp);
        assert_eq!(zzrm.toplevels().len(), 1);
        assert_eq!(zzrm.toplevels()[0].filename, "main.tex");
    }

    #[test]
    fn v1_rejects_unknown_key() {
        let err = ZeroZeroReadMe::from_v1("main.tex bogus\n").unwrap_err();
        assert!(matches!(err, ZZRMError::Key(_)));
    }

    #[test]
    fn v2_compiler_shorthand_expands() {
        let json = r#"{"process": {"compiler": "pdflatex"}, "sources": [{"filename": "main.tex", "usage": "toplevel"}]}"#;
        let zzrm = ZeroZeroReadMe::from_v2(json, "json").unwrap();
        assert_eq!(zzrm.process.compiler.unwrap().compiler_string(), "pdflatex");
    }

    #[test]
    fn v2_rejects_unknown_key() {
        let json = r#"{"bogus_field": true}"#;
        let err = ZeroZeroReadMe::from_v2(json, "json").unwrap_err();
        assert!(matches!(err, ZZRMError::Parse(_)));
    }

    #[test]
    fn round_trip_preserves_compiler_string_not_struct() {
        let json = r#"{"process": {"compiler": "pdflatex"}, "sources": [{"filename": "main.tex", "usage": "toplevel"}]}"#;
        let zzrm = ZeroZeroReadMe::from_v2(json, "json").unwrap();
        let reserialized = zzrm.to_json().unwrap();
        assert!(reserialized.contains("\"pdflatex\""));
        assert!(!reserialized.contains("\"lang\""));
    }

    #[test]
    fn texlive_version_accepts_tl_prefix() {
        let json = r#"{"texlive_version": "TL2024"}"#;
        let zzrm = ZeroZeroReadMe::from_v2(json, "json").unwrap();
        assert_eq!(zzrm.texlive_version.unwrap(), "TL2024");
    }
}
