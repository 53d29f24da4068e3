use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Unique id for a node in an [`crate::graph::IncludeGraph`]. Indexes, not
/// owning pointers, so the graph can hold cycles without any unsafe code.
pub type NodeId = usize;

/// The four kinds of files a submission's include graph can be built from.
///
/// `idx`/`ind` can in practice carry arbitrary extensions (MakeIndex style
/// files), but we still classify by role rather than extension alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Tex,
    Bib,
    Idx,
    Bbl,
    Ind,
    Bst,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageType {
    #[default]
    Unknown,
    Tex,
    Latex,
    /// Old-style submissions using bare `\documentstyle`. Detected so we can
    /// raise `unsupported_compiler_type_latex209`; there is no accept path.
    Latex209,
    Pdf,
    Html,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineType {
    #[default]
    Unknown,
    Tex,
    Luatex,
    Xetex,
    Ptex,
    Uptex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    #[default]
    Unknown,
    Dvi,
    Pdf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostProcessType {
    #[default]
    Unknown,
    None,
    DvipsPs2pdf,
    Dvipdfmx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexCompiler {
    #[default]
    Unknown,
    Makeindex,
    Mendex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BibCompiler {
    #[default]
    Unknown,
    Bibtex,
    Bibtex8,
    Bibtexu,
    Upbibtex,
    Biber,
    Biblatex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BblType {
    #[default]
    Unknown,
    Plain,
    Biblatex,
}

pub const DEFAULT_ENGINE_TYPE: EngineType = EngineType::Tex;
pub const DEFAULT_LANGUAGE_TYPE: LanguageType = LanguageType::Latex;
pub const DEFAULT_OUTPUT_TYPE: OutputType = OutputType::Pdf;
pub const DEFAULT_POSTPROCESS_TYPE: PostProcessType = PostProcessType::None;

/// Every kind of problem preflight analysis, ZZRM loading, or compilation can
/// surface about a submission. Ported from the Python `IssueType` enum,
/// including the bibliography/unsupported-compiler variants that the
/// distilled spec dropped (see SPEC_FULL.md §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    FileNotFound,
    ConflictingFileType,
    ConflictingOutputType,
    ConflictingEngineType,
    ConflictingPostprocessType,
    UnsupportedCompilerType,
    UnsupportedCompilerTypeUnicode,
    UnsupportedCompilerTypeImageMix,
    UnsupportedCompilerTypeLatex209,
    ConflictingImageTypes,
    IncludeCommandWithMacro,
    ContentsDecodeError,
    IssueInSubfile,
    IndexDefinitionMissing,
    BblVersionMismatch,
    BblVersionNeedsPreviousVersion,
    BblFileMissing,
    BblBibFileMissing,
    MultipleBibliographyTypes,
    BblUsageMismatch,
    OversizedImage,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeXFileIssue {
    pub key: IssueType,
    pub info: String,
    pub filename: Option<String>,
}

impl TeXFileIssue {
    pub fn new(key: IssueType, info: impl Into<String>, filename: Option<String>) -> Self {
        Self { key, info: info.into(), filename }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreflightStatusValues {
    Success,
    Error,
    Suspicious,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightStatus {
    pub key: PreflightStatusValues,
    pub info: String,
}

/// Size information for a raster image found while walking the submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageInfo {
    pub filename: String,
    pub width: u32,
    pub height: u32,
    pub megapixels: f64,
    pub file_bytes: u64,
    pub is_oversized: bool,
    #[serde(rename = "pdftex-fast-copy")]
    pub pdftex_fast_copy: bool,
}

impl ImageInfo {
    pub fn file_size_mb(&self) -> f64 {
        self.file_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// The compiler dimensions for one toplevel file, or for a whole submission
/// once ZZRM and preflight have agreed on one set of values.
///
/// Serialized (in ZZRM) as a single `compiler_string` like `"pdflatex"` or
/// `"latex+dvips_ps2pdf"` rather than as a structured object — see
/// `compiler_string`/`from_compiler_string`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompilerSpec {
    pub lang: LanguageType,
    pub engine: EngineType,
    pub output: OutputType,
    pub postp: PostProcessType,
}

/// Canonical compiler-string table. Each row is (lang, engine, output, postp,
/// canonical name). `from_compiler_string` does exact-name lookup;
/// `compiler_string` formats whichever row matches `self` exactly, falling
/// back to a dimension-by-dimension rendering. `pdfetex` is accepted on
/// input but always normalized to `pdftex` on output.
const COMPILER_SELECTION: &[(LanguageType, EngineType, OutputType, PostProcessType, &str)] = &[
    (LanguageType::Tex, EngineType::Tex, OutputType::Dvi, PostProcessType::None, "etex"),
    (LanguageType::Tex, EngineType::Tex, OutputType::Dvi, PostProcessType::DvipsPs2pdf, "etex+dvips_ps2pdf"),
    (LanguageType::Tex, EngineType::Tex, OutputType::Dvi, PostProcessType::Dvipdfmx, "etex+dvipdfmx"),
    (LanguageType::Tex, EngineType::Tex, OutputType::Pdf, PostProcessType::None, "pdftex"),
    (LanguageType::Latex, EngineType::Tex, OutputType::Dvi, PostProcessType::None, "latex"),
    (LanguageType::Latex, EngineType::Tex, OutputType::Dvi, PostProcessType::DvipsPs2pdf, "latex+dvips_ps2pdf"),
    (LanguageType::Latex, EngineType::Tex, OutputType::Dvi, PostProcessType::Dvipdfmx, "latex+dvipdfmx"),
    (LanguageType::Latex, EngineType::Tex, OutputType::Pdf, PostProcessType::None, "pdflatex"),
    (LanguageType::Latex, EngineType::Luatex, OutputType::Pdf, PostProcessType::None, "lualatex"),
    (LanguageType::Latex, EngineType::Xetex, OutputType::Pdf, PostProcessType::None, "xelatex"),
];

/// Compiler-strings this driver actually knows how to run end to end.
/// Anything else is detected and classified but raises `unsupported_compiler_type`.
pub const SUPPORTED_PIPELINES: &[&str] = &["etex+dvips_ps2pdf", "latex+dvips_ps2pdf", "pdflatex"];

const COMPILER_STRING_ALIASES: &[(&str, &str)] = &[("tex", "etex"), ("pdfetex", "pdftex")];

impl CompilerSpec {
    pub fn from_compiler_string(s: &str) -> Option<Self> {
        let s = COMPILER_STRING_ALIASES.iter().find(|(alias, _)| *alias == s).map(|(_, canon)| *canon).unwrap_or(s);
        if s == "pdf_submission" {
            return Some(CompilerSpec { lang: LanguageType::Pdf, engine: EngineType::Unknown, output: OutputType::Pdf, postp: PostProcessType::None });
        }
        if s == "html_submission" {
            return Some(CompilerSpec { lang: LanguageType::Html, engine: EngineType::Unknown, output: OutputType::Unknown, postp: PostProcessType::Unknown });
        }
        COMPILER_SELECTION
            .iter()
            .find(|(_, _, _, _, name)| *name == s)
            .map(|(lang, engine, output, postp, _)| CompilerSpec { lang: *lang, engine: *engine, output: *output, postp: *postp })
    }

    pub fn compiler_string(&self) -> String {
        if self.lang == LanguageType::Pdf {
            return "pdf_submission".to_string();
        }
        if self.lang == LanguageType::Html {
            return "html_submission".to_string();
        }
        if let Some((.., name)) = COMPILER_SELECTION
            .iter()
            .find(|(lang, engine, output, postp, _)| *lang == self.lang && *engine == self.engine && *output == self.output && *postp == self.postp)
        {
            return name.to_string();
        }
        format!("{:?}+{:?}+{:?}+{:?}", self.lang, self.engine, self.output, self.postp).to_lowercase()
    }

    /// Is this one of the compiler-strings the driver can actually run?
    pub fn is_supported(&self) -> bool {
        SUPPORTED_PIPELINES.contains(&self.compiler_string().as_str())
    }

    /// True once every dimension has been resolved away from `Unknown`.
    pub fn is_determined(&self) -> bool {
        self.lang != LanguageType::Unknown && self.engine != EngineType::Unknown && self.output != OutputType::Unknown
    }

    /// Fill in any `Unknown` dimension with the ambient defaults used when
    /// neither ZZRM nor preflight narrowed it down further.
    pub fn with_defaults(mut self) -> Self {
        if self.lang == LanguageType::Unknown {
            self.lang = DEFAULT_LANGUAGE_TYPE;
        }
        if self.engine == EngineType::Unknown {
            self.engine = DEFAULT_ENGINE_TYPE;
        }
        if self.output == OutputType::Unknown {
            self.output = DEFAULT_OUTPUT_TYPE;
        }
        if self.postp == PostProcessType::Unknown {
            self.postp = DEFAULT_POSTPROCESS_TYPE;
        }
        self
    }
}

/// A `\cmd{arg}`-shaped include found while scanning a TeX source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncludeSpec {
    pub cmd: String,
    pub source: String,
    pub file_type: FileType,
    pub file_argument: usize,
    pub extensions: Option<Vec<String>>,
}

/// One TeX/Bib/Bbl/... file found in a submission, after scanning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedTeXFile {
    pub filename: String,
    pub file_type: FileType,
    pub language: LanguageType,
    /// Unknown until a resolved include lands in a `/luatex/` or `/lualatex/`
    /// system path; see `parser::parse_tex_source` and
    /// `PreflightOrchestrator::resolve_includes`.
    pub engine: EngineType,
    pub output: OutputType,
    pub includes: Vec<ResolvedInclude>,
    pub issues: Vec<TeXFileIssue>,
    pub uses_bibliography: bool,
    pub bib_compiler_hint: Option<BibCompiler>,
    pub contains_documentclass: bool,
    pub contains_bye: bool,
    pub uses_biblatex: bool,
    pub uses_makeindex: bool,
    /// Any byte in the decoded body fell outside ASCII — drives
    /// `unsupported_compiler_type_unicode`.
    pub contains_non_ascii: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedInclude {
    pub cmd: String,
    pub requested: String,
    pub resolved: Option<String>,
    pub file_type: FileType,
}

/// A file preflight considers a plausible compilation entrypoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToplevelFile {
    pub filename: String,
    pub process: CompilerSpec,
    pub issues: Vec<TeXFileIssue>,
}

/// The final report produced by the preflight orchestrator: one entry per
/// toplevel candidate plus submission-wide status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightResponse {
    pub status: PreflightStatus,
    pub toplevels: Vec<ToplevelFile>,
    /// Every parsed file (excluding graph edges/raw contents), independent of
    /// whether it ended up reachable from a toplevel.
    #[serde(default)]
    pub tex_files: Vec<ParsedTeXFile>,
    /// Non-TeX files present in the bundle that aren't part of any subgraph
    /// (figures, data files, etc).
    #[serde(default)]
    pub ancillary_files: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub stamp_annotation: Vec<String>,
}

/// A single engine invocation's accounting, as attached to the outcome record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub tex_file: String,
    pub bbl_file: Option<String>,
    pub index: usize,
    pub converter: String,
    pub out_files: Vec<String>,
    pub elapse_time: f64,
    pub cpu_time: f64,
    pub status: String,
    pub log_excerpt: String,
}

/// Metadata describing the whole compilation attempt, serialized alongside
/// the artifacts in the outcome archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeMeta {
    pub version: u32,
    pub in_directory: PathBuf,
    pub out_directory: PathBuf,
    pub in_files: Vec<String>,
    pub out_files: Vec<String>,
    pub status: String,
    pub tag: String,
    pub runs: Vec<RunRecord>,
    pub used_figures: Vec<String>,
    pub unused_figures: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// The 00README this compilation ran under, as the same ordered
    /// structure `ZeroZeroReadMe::to_json`/`to_yaml` would produce.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub zzrm: Option<serde_json::Value>,
    /// Toplevel TeX filenames this attempt compiled, in run order.
    #[serde(default)]
    pub tex_files: Vec<String>,
    /// Human-readable failure reasons accumulated across every run, distinct
    /// from `note` (which is a single top-level summary).
    #[serde(default)]
    pub reasons: Vec<String>,
    /// The single assembled PDF, once merging/watermarking has run.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pdf_file: Option<String>,
    /// Per-toplevel PDFs produced before assembly (same entries as
    /// `out_files` until an `Assembler` pass merges them).
    #[serde(default)]
    pub pdf_files: Vec<String>,
    /// The watermark text actually stamped onto `pdf_file`, if any.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub watermark: Option<String>,
    #[serde(default)]
    pub total_time: f64,
    #[serde(default)]
    pub total_cpu_time: f64,
}

impl OutcomeMeta {
    pub fn new(tag: impl Into<String>, in_directory: PathBuf, out_directory: PathBuf) -> Self {
        Self {
            version: 1,
            in_directory,
            out_directory,
            in_files: Vec::new(),
            out_files: Vec::new(),
            status: "fail".to_string(),
            tag: tag.into(),
            runs: Vec::new(),
            used_figures: Vec::new(),
            unused_figures: Vec::new(),
            note: None,
            zzrm: None,
            tex_files: Vec::new(),
            reasons: Vec::new(),
            pdf_file: None,
            pdf_files: Vec::new(),
            watermark: None,
            total_time: 0.0,
            total_cpu_time: 0.0,
        }
    }
}

/// Per-pipeline scorecard row: how many submissions touched a given compiler
/// pipeline and how they scored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorecardRow {
    pub pipeline: String,
    pub touched: u64,
    pub succeeded: u64,
    pub removed_unused_files: u64,
}

pub type IssueMap = HashMap<String, Vec<TeXFileIssue>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiler_spec_round_trips_for_every_determined_pipeline() {
        for &(lang, engine, output, postp, name) in COMPILER_SELECTION {
            let spec = CompilerSpec { lang, engine, output, postp };
            assert_eq!(spec.compiler_string(), name);
            assert_eq!(CompilerSpec::from_compiler_string(name), Some(spec));
        }
    }

    #[test]
    fn pdfetex_alias_normalizes_to_pdftex() {
        let spec = CompilerSpec::from_compiler_string("pdfetex").unwrap();
        assert_eq!(spec.compiler_string(), "pdftex");
    }

    #[test]
    fn tex_alias_normalizes_to_etex() {
        let spec = CompilerSpec::from_compiler_string("tex").unwrap();
        assert_eq!(spec.compiler_string(), "etex");
    }

    #[test]
    fn etex_dvipdfmx_round_trips() {
        let spec = CompilerSpec::from_compiler_string("etex+dvipdfmx").unwrap();
        assert_eq!(spec, CompilerSpec { lang: LanguageType::Tex, engine: EngineType::Tex, output: OutputType::Dvi, postp: PostProcessType::Dvipdfmx });
        assert_eq!(spec.compiler_string(), "etex+dvipdfmx");
    }

    #[test]
    fn pdf_and_html_submission_round_trip() {
        let pdf = CompilerSpec::from_compiler_string("pdf_submission").unwrap();
        assert_eq!(pdf.compiler_string(), "pdf_submission");
        let html = CompilerSpec::from_compiler_string("html_submission").unwrap();
        assert_eq!(html.compiler_string(), "html_submission");
    }

    #[test]
    fn only_three_pipelines_are_runnable() {
        let supported = CompilerSpec::from_compiler_string("pdflatex").unwrap();
        assert!(supported.is_supported());
        let unsupported = CompilerSpec::from_compiler_string("lualatex").unwrap();
        assert!(!unsupported.is_supported());
    }
}
