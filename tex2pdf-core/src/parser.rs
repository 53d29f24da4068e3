//! Scans a single TeX-family source file and turns it into a [`ParsedTeXFile`].
//!
//! Never fails: decode and IO errors become issues attached to the record
//! rather than a `Result::Err`, so one bad file in a submission never aborts
//! the whole preflight pass.

use crate::types::{
    BibCompiler, EngineType, FileType, ImageInfo, IssueType, LanguageType, OutputType, ParsedTeXFile,
    ResolvedInclude, TeXFileIssue,
};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// Image extensions pdftex/pdflatex can embed directly.
const PDFTEX_IMAGE_EXTS: &[&str] = &["pdf", "png", "jpg", "jpeg", "gif"];
/// Image extensions only usable through a dvips/ps2pdf postprocess pipeline.
const DVIPS_IMAGE_EXTS: &[&str] = &["eps", "ps"];

/// One entry in the include-command semantics table: how many braced
/// arguments to expect, which one names the file, whether to split the
/// argument on commas, and what extensions/file-type the target implies.
struct IncludeCommandSpec {
    file_argument: usize,
    multi_args: bool,
    file_type: FileType,
    default_ext: Option<&'static str>,
}

fn include_commands_dict() -> &'static std::collections::HashMap<&'static str, IncludeCommandSpec> {
    static DICT: OnceLock<std::collections::HashMap<&'static str, IncludeCommandSpec>> = OnceLock::new();
    DICT.get_or_init(|| {
        use FileType::*;
        let mut m = std::collections::HashMap::new();
        let mut add = |name, file_argument, multi_args, file_type, default_ext| {
            m.insert(name, IncludeCommandSpec { file_argument, multi_args, file_type, default_ext });
        };
        add("input", 1, false, Tex, Some("tex"));
        add("include", 1, false, Tex, Some("tex"));
        add("InputIfFileExists", 1, false, Tex, Some("tex"));
        add("documentstyle", 1, false, Other, Some("cls"));
        add("documentclass", 1, false, Other, Some("cls"));
        add("LoadClass", 1, false, Other, Some("cls"));
        add("LoadClassWithOptions", 1, false, Other, Some("cls"));
        add("usepackage", 1, true, Other, Some("sty"));
        add("RequirePackage", 1, true, Other, Some("sty"));
        add("RequirePackageWithOptions", 1, true, Other, Some("sty"));
        add("bibliography", 1, true, Bib, Some("bib"));
        add("includegraphics", 1, false, Other, None);
        add("psfig", 1, false, Other, None);
        add("import", 2, false, Tex, None);
        add("subfile", 1, false, Tex, Some("tex"));
        add("subfileinclude", 1, false, Tex, Some("tex"));
        add("includesvg", 1, false, Other, Some("svg"));
        add("includepdf", 1, false, Other, Some("pdf"));
        add("epsfbox", 1, false, Other, Some("eps"));
        add("epsfig", 1, false, Other, Some("eps"));
        add("loadglsentries", 1, false, Tex, Some("tex"));
        add("DTLloaddb", 2, false, Other, None);
        add("DTLloadrawdb", 2, false, Other, None);
        add("lstinputlisting", 1, false, Tex, None);
        add("usetikzlibrary", 1, true, Tex, None);
        add("usepgflibrary", 1, true, Tex, None);
        add("tcbuselibrary", 1, true, Tex, None);
        add("tcbincludegraphics", 1, false, Other, None);
        add("asyinclude", 1, false, Other, None);
        m
    })
}

fn input_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\\input\s+([-A-Za-z0-9._]+)").unwrap())
}

fn command_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let cmds = [
            "input", "include", "InputIfFileExists", "documentstyle", "documentclass", "LoadClass",
            "LoadClassWithOptions", "usepackage", "RequirePackage", "RequirePackageWithOptions",
            "bibliography", "includegraphics", "psfig", "import", "subfile", "subfileinclude",
            "includesvg", "includepdf", "epsfbox", "epsfig", "loadglsentries", "DTLloaddb",
            "DTLloadrawdb", "lstinputlisting", "usetikzlibrary", "usepgflibrary", "tcbuselibrary",
            "tcbincludegraphics", "asyinclude",
        ]
        .join("|");
        let pattern = format!(r"(?m)^[^%\n]*\\({cmds})(?:\[[^\]]*\])?\{{([^{{}}]*)\}}(?:\{{([^{{}}]*)\}})?");
        Regex::new(&pattern).unwrap()
    })
}

fn documentclass_hint_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\\documentclass[^A-Za-z]").unwrap())
}

fn bye_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\\bye(?:[^A-Za-z]|$)").unwrap())
}

fn latex_marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\\(text(bf|it|sl)|section|chapter)\b").unwrap())
}

fn documentstyle209_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^[^%\n]*\\documentstyle\{").unwrap())
}

fn makeindex_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\\makeindex\b").unwrap())
}

fn addbibresource_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\\addbibresource\b").unwrap())
}

/// Decode raw bytes deterministically: BOM sniff (UTF-8/UTF-16 LE/BE), then
/// strict UTF-8, then a byte-preserving Latin-1 fallback. No statistical
/// charset classifier — see the Open Question resolution in SPEC_FULL.md §9.
pub fn decode_source(bytes: &[u8]) -> (String, Vec<TeXFileIssue>) {
    let mut issues = Vec::new();

    if let Some(body) = bytes.strip_prefix(&[0xFF, 0xFE]) {
        let text = decode_utf16(body, u16::from_le_bytes);
        return (normalize_newlines(&text), issues);
    }
    if let Some(body) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let text = decode_utf16(body, u16::from_be_bytes);
        return (normalize_newlines(&text), issues);
    }

    let body = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);

    let text = match std::str::from_utf8(body) {
        Ok(s) => s.to_string(),
        Err(_) => {
            issues.push(TeXFileIssue::new(
                IssueType::ContentsDecodeError,
                "not valid UTF-8, falling back to Latin-1",
                None,
            ));
            body.iter().map(|&b| b as char).collect()
        }
    };

    (normalize_newlines(&text), issues)
}

fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Decode a UTF-16 body (after its BOM has been stripped) with `to_u16`
/// selecting byte order, replacing unpaired/invalid code units with U+FFFD.
fn decode_utf16(body: &[u8], to_u16: fn([u8; 2]) -> u16) -> String {
    let units: Vec<u16> = body.chunks_exact(2).map(|c| to_u16([c[0], c[1]])).collect();
    String::from_utf16_lossy(&units)
}

fn strip_leading_dotslash(s: &str) -> String {
    s.strip_prefix("./").unwrap_or(s).to_string()
}

fn with_ext(name: &str, ext: &str) -> String {
    if name.ends_with(&format!(".{ext}")) {
        name.to_string()
    } else {
        format!("{name}.{ext}")
    }
}

/// Scan one file's already-decoded body and produce its includes, format
/// hints, and local issues. `filename` is the path relative to the sandbox
/// root, used only to label issues.
pub fn parse_tex_source(filename: &str, body: &str) -> ParsedTeXFile {
    let mut issues = Vec::new();
    let mut includes: Vec<ResolvedInclude> = Vec::new();
    let mut seen_keys: std::collections::HashMap<String, usize> = std::collections::HashMap::new();

    let dict = include_commands_dict();

    // Pass 1: brace-free `\input NAME`.
    for cap in input_regex().captures_iter(body) {
        let name = with_ext(&cap[1], "tex");
        push_include(&mut includes, &mut seen_keys, "input", name, FileType::Tex);
    }

    // Pass 2: braced commands with the enumerated semantics table.
    for cap in command_regex().captures_iter(body) {
        let cmd = cap.get(1).unwrap().as_str().to_string();
        let arg1 = cap.get(2).map(|m| m.as_str()).unwrap_or("");
        let arg2 = cap.get(3).map(|m| m.as_str());

        let spec = match dict.get(cmd.as_str()) {
            Some(s) => s,
            None => continue,
        };

        let chosen_raw = if spec.file_argument == 2 {
            arg2.unwrap_or(arg1)
        } else {
            arg1
        };

        if chosen_raw.trim_start().starts_with('#') {
            if let Some(c) = chosen_raw.trim_start().chars().nth(1) {
                if c.is_ascii_digit() && c != '0' {
                    issues.push(TeXFileIssue::new(
                        IssueType::IncludeCommandWithMacro,
                        format!("\\{cmd} argument is a macro parameter: {chosen_raw}"),
                        Some(filename.to_string()),
                    ));
                    continue;
                }
            }
        }

        let names: Vec<String> = match cmd.as_str() {
            "import" => {
                let joined = format!("{}/{}", arg1.trim_end_matches('/'), arg2.unwrap_or(""));
                vec![strip_leading_dotslash(&joined.replace("//", "/"))]
            }
            "usetikzlibrary" | "usepgflibrary" => chosen_raw
                .split(',')
                .map(|n| format!("tikzlibrary{}.code.tex", n.trim()))
                .collect(),
            "bibliography" => strip_eol_comment(chosen_raw)
                .split(',')
                .map(|n| with_ext(n.trim(), "bib"))
                .collect(),
            "usepackage" | "RequirePackage" | "RequirePackageWithOptions" => strip_eol_comment(chosen_raw)
                .split(',')
                .map(|n| with_ext(n.trim(), spec.default_ext.unwrap_or("sty")))
                .collect(),
            _ if spec.multi_args => chosen_raw
                .split(',')
                .map(|n| strip_leading_dotslash(n.trim()))
                .collect(),
            _ => {
                let name = strip_leading_dotslash(chosen_raw.trim());
                let name = match spec.default_ext {
                    Some(ext) if !name.contains('.') => with_ext(&name, ext),
                    _ => name,
                };
                vec![name]
            }
        };

        for name in names {
            if name.is_empty() {
                continue;
            }
            push_include(&mut includes, &mut seen_keys, &cmd, name, spec.file_type);
        }

        if cmd == "bibliography" {
            // handled via uses_bibliography below
        }
    }

    // Format hints.
    let mut language = LanguageType::Unknown;
    let mut contains_documentclass = false;
    let mut contains_bye = false;

    if filename.ends_with(".sty") {
        language = LanguageType::Latex;
    }
    if latex_marker_regex().is_match(body) {
        language = LanguageType::Latex;
    }
    if bye_regex().is_match(body) {
        contains_bye = true;
        if language == LanguageType::Unknown {
            language = LanguageType::Tex;
        }
    }
    if documentclass_hint_regex().is_match(body) {
        contains_documentclass = true;
        language = LanguageType::Latex;
    }
    if documentstyle209_regex().is_match(body) {
        issues.push(TeXFileIssue::new(
            IssueType::UnsupportedCompilerTypeLatex209,
            "bare \\documentstyle found — legacy LaTeX 2.09 submissions are not accepted",
            Some(filename.to_string()),
        ));
        language = LanguageType::Latex209;
    }
    if contains_bye && contains_documentclass {
        issues.push(TeXFileIssue::new(
            IssueType::ConflictingFileType,
            "file contains both \\bye and \\documentclass",
            Some(filename.to_string()),
        ));
        language = LanguageType::Latex;
    }

    let mut output = OutputType::Unknown;
    let mut saw_pdf_image = false;
    let mut saw_dvi_image = false;
    for inc in &includes {
        let ext = Path::new(&inc.requested).extension().and_then(|e| e.to_str()).unwrap_or("").to_lowercase();
        if PDFTEX_IMAGE_EXTS.contains(&ext.as_str()) {
            saw_pdf_image = true;
        }
        if DVIPS_IMAGE_EXTS.contains(&ext.as_str()) {
            saw_dvi_image = true;
        }
    }
    if saw_pdf_image && saw_dvi_image {
        issues.push(TeXFileIssue::new(
            IssueType::ConflictingImageTypes,
            "both pdftex-native and dvips-only image types referenced",
            Some(filename.to_string()),
        ));
        output = OutputType::Unknown;
    } else if saw_pdf_image {
        output = OutputType::Pdf;
    } else if saw_dvi_image {
        output = OutputType::Dvi;
    }

    let uses_bibliography = includes.iter().any(|i| i.file_type == FileType::Bib);
    let uses_biblatex = addbibresource_regex().is_match(body);
    let uses_makeindex = makeindex_regex().is_match(body);
    let bib_compiler_hint = if uses_biblatex {
        Some(BibCompiler::Biber)
    } else if uses_bibliography {
        Some(BibCompiler::Bibtex)
    } else {
        None
    };

    ParsedTeXFile {
        filename: filename.to_string(),
        file_type: classify_file_type(filename),
        language,
        engine: EngineType::Unknown,
        output,
        includes,
        issues,
        uses_bibliography: uses_bibliography || uses_biblatex,
        bib_compiler_hint,
        contains_documentclass,
        contains_bye,
        uses_biblatex,
        uses_makeindex,
        contains_non_ascii: body.chars().any(|c| !c.is_ascii()),
    }
}

fn push_include(
    includes: &mut Vec<ResolvedInclude>,
    seen_keys: &mut std::collections::HashMap<String, usize>,
    cmd: &str,
    name: String,
    file_type: FileType,
) {
    let entry = ResolvedInclude { cmd: cmd.to_string(), requested: name.clone(), resolved: None, file_type };
    if let Some(&idx) = seen_keys.get(&name) {
        includes[idx] = entry;
    } else {
        seen_keys.insert(name, includes.len());
        includes.push(entry);
    }
}

fn strip_eol_comment(s: &str) -> String {
    match s.find('%') {
        Some(i) => s[..i].to_string(),
        None => s.to_string(),
    }
}

fn classify_file_type(filename: &str) -> FileType {
    let ext = Path::new(filename).extension().and_then(|e| e.to_str()).unwrap_or("").to_lowercase();
    match ext.as_str() {
        "tex" => FileType::Tex,
        "bib" => FileType::Bib,
        "bbl" => FileType::Bbl,
        "bst" => FileType::Bst,
        "idx" => FileType::Idx,
        "ind" => FileType::Ind,
        _ => FileType::Other,
    }
}

/// Executable files are never allowed in a submission bundle.
pub fn check_no_exe(files: &[String]) -> Vec<TeXFileIssue> {
    files
        .iter()
        .filter(|f| f.ends_with(".exe") || f.ends_with(".sh") || f.ends_with(".bat"))
        .map(|f| TeXFileIssue::new(IssueType::Other, format!("executable file not allowed: {f}"), Some(f.clone())))
        .collect()
}

pub const DEFAULT_IMAGE_SIZE_THRESHOLD_MPIXELS: f64 = 25.0;

/// Flag images whose pixel area exceeds `threshold_mpixels`. `images` is
/// pre-collected dimension info; decoding image bytes is the caller's job
/// (kept out of this module to avoid a hard image-codec dependency).
pub fn check_image_sizes(images: &[ImageInfo], threshold_mpixels: f64) -> Vec<TeXFileIssue> {
    images
        .iter()
        .filter(|img| img.megapixels > threshold_mpixels)
        .map(|img| {
            TeXFileIssue::new(
                IssueType::OversizedImage,
                format!(
                    "{} is {:.1} megapixels ({:.1} MB), over the {:.1} megapixel threshold",
                    img.filename,
                    img.megapixels,
                    img.file_size_mb(),
                    threshold_mpixels
                ),
                Some(img.filename.clone()),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_plain_input() {
        let parsed = parse_tex_source("main.tex", "\\input macros\n\\documentclass{article}\n");
        assert!(parsed.includes.iter().any(|i| i.requested == "macros.tex"));
        assert!(parsed.contains_documentclass);
        assert_eq!(parsed.language, LanguageType::Latex);
    }

    #[test]
    fn detects_bye_only_as_tex() {
        let parsed = parse_tex_source("plain.tex", "hello world\n\\bye\n");
        assert!(parsed.contains_bye);
        assert_eq!(parsed.language, LanguageType::Tex);
    }

    #[test]
    fn conflicting_bye_and_documentclass_becomes_latex() {
        let parsed = parse_tex_source("weird.tex", "\\documentclass{article}\n\\bye\n");
        assert_eq!(parsed.language, LanguageType::Latex);
        assert!(parsed.issues.iter().any(|i| i.key == IssueType::ConflictingFileType));
    }

    #[test]
    fn detects_legacy_documentstyle() {
        let parsed = parse_tex_source("old.tex", "\\documentstyle{article}\n");
        assert_eq!(parsed.language, LanguageType::Latex209);
        assert!(parsed.issues.iter().any(|i| i.key == IssueType::UnsupportedCompilerTypeLatex209));
    }

    #[test]
    fn macro_parameter_argument_is_flagged_and_skipped() {
        let parsed = parse_tex_source("gen.tex", "\\input{#1}\n");
        assert!(parsed.includes.is_empty());
        assert!(parsed.issues.iter().any(|i| i.key == IssueType::IncludeCommandWithMacro));
    }

    #[test]
    fn conflicting_image_types_resets_output() {
        let parsed = parse_tex_source("figs.tex", "\\includegraphics{a.pdf}\n\\includegraphics{b.eps}\n");
        assert_eq!(parsed.output, OutputType::Unknown);
        assert!(parsed.issues.iter().any(|i| i.key == IssueType::ConflictingImageTypes));
    }

    #[test]
    fn decode_detects_invalid_utf8() {
        let (text, issues) = decode_source(&[0x68, 0x65, 0x6c, 0xff, 0x6f]);
        assert_eq!(text.len(), 5);
        assert!(issues.iter().any(|i| i.key == IssueType::ContentsDecodeError));
    }

    #[test]
    fn decode_sniffs_utf16_le_bom() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "hi".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let (text, issues) = decode_source(&bytes);
        assert_eq!(text, "hi");
        assert!(issues.is_empty());
    }

    #[test]
    fn decode_sniffs_utf16_be_bom() {
        let mut bytes = vec![0xFE, 0xFF];
        for unit in "hi".encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        let (text, issues) = decode_source(&bytes);
        assert_eq!(text, "hi");
        assert!(issues.is_empty());
    }

    #[test]
    fn non_ascii_body_is_flagged() {
        let parsed = parse_tex_source("unicode.tex", "\\documentclass{article}\n% café\n");
        assert!(parsed.contains_non_ascii);
    }

    #[test]
    fn oversized_image_is_flagged() {
        let images = vec![ImageInfo {
            filename: "big.png".to_string(),
            width: 10000,
            height: 10000,
            megapixels: 100.0,
            file_bytes: 5_000_000,
            is_oversized: true,
            pdftex_fast_copy: false,
        }];
        let issues = check_image_sizes(&images, DEFAULT_IMAGE_SIZE_THRESHOLD_MPIXELS);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].key, IssueType::OversizedImage);
    }
}
