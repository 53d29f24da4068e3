//! Idempotent source rewrites applied before the first engine run. Ported
//! line-by-line from `original_source/tex2pdf_service/tex2pdf/tex_patching.py`.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

const TEX_FILE_EXTS: &[&str] = &["tex", "sty", "cls", "clo", "ltx"];

fn graphicspath_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\\graphicspath\{((\{.+?\})+)\}").unwrap())
}

fn paths_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{(.+?)\}").unwrap())
}

fn auto_pst_pdf_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*\\usepackage(\[.*?\])?\{auto-pst-pdf\}").unwrap())
}

fn overleafhome_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\\def\\overleafhome\{(.+?)\}").unwrap())
}

/// Normalize `\graphicspath{{a}{b/}{c}}` so every path also has a
/// trailing-slash variant, de-duplicated. Idempotent: running it twice on
/// its own output changes nothing, since the trailing-slash variant is
/// already present.
pub fn correct_graphicspath(line: &str) -> String {
    let Some(caps) = graphicspath_re().captures(line) else {
        return line.to_string();
    };
    let group = caps.get(1).unwrap().as_str();

    let mut seen = std::collections::HashSet::new();
    let mut normalized = Vec::new();
    for p in paths_re().captures_iter(group) {
        let mut path = p[1].to_string();
        if let Some(stripped) = path.strip_prefix("./") {
            path = stripped.to_string();
        }
        if !path.ends_with('/') {
            path.push('/');
        }
        if seen.insert(path.clone()) {
            normalized.push(path);
        }
    }

    let rebuilt = normalized.iter().map(|p| format!("{{{p}}}")).collect::<String>();
    let whole_match = caps.get(0).unwrap().as_str();
    line.replace(whole_match, &format!("\\graphicspath{{{rebuilt}}}"))
}

/// `auto-pst-pdf` requires shell-escape, which is disallowed; comment the
/// `\usepackage` line out rather than failing the whole submission.
pub fn remove_auto_pst_pdf(line: &str) -> String {
    if auto_pst_pdf_re().is_match(line) {
        format!("% {line}")
    } else {
        line.to_string()
    }
}

/// Overleaf-exported sources sometimes define `\overleafhome` but downstream
/// macros expect `\homepath`; mirror one into the other.
pub fn set_overleafhome_and_homepath(line: &str) -> String {
    if let Some(caps) = overleafhome_re().captures(line) {
        let value = &caps[1];
        let homepath_def = format!("\\def\\homepath{{{value}}}");
        if line.contains(&homepath_def) {
            return line.to_string();
        }
        format!("{line}{homepath_def}")
    } else {
        line.to_string()
    }
}

pub type LineFixer = fn(&str) -> String;

pub const DEFAULT_FIXERS: &[LineFixer] = &[correct_graphicspath, remove_auto_pst_pdf, set_overleafhome_and_homepath];

/// Walk every TeX-like file under `in_dir`, apply `fixers` line-by-line, and
/// only rewrite a file if at least one line actually changed. Also renames
/// `foo.tex.txt` → `foo.tex` for any `toplevels` whose inner extension is
/// TeX-like — Overleaf and some other export tools append a spurious
/// `.txt`.
pub fn fix_tex_sources(in_dir: &Path, fixers: &[LineFixer], toplevels: &[String]) -> std::io::Result<()> {
    for entry in walk_tex_like_files(in_dir)? {
        let contents = std::fs::read(&entry)?;
        let (text, _) = crate::parser::decode_source(&contents);
        let mut changed = false;
        let mut rewritten_lines = Vec::new();
        for line in text.lines() {
            let mut current = line.to_string();
            for fixer in fixers {
                let next = fixer(&current);
                if next != current {
                    changed = true;
                }
                current = next;
            }
            rewritten_lines.push(current);
        }
        if changed {
            std::fs::write(&entry, rewritten_lines.join("\n"))?;
        }
    }

    for top in toplevels {
        if let Some(inner) = top.strip_suffix(".txt") {
            if TEX_FILE_EXTS.iter().any(|ext| inner.ends_with(&format!(".{ext}"))) {
                let from = in_dir.join(top);
                let to = in_dir.join(inner);
                if from.exists() {
                    std::fs::rename(from, to)?;
                }
            }
        }
    }

    Ok(())
}

fn walk_tex_like_files(dir: &Path) -> std::io::Result<Vec<std::path::PathBuf>> {
    let mut found = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
                if TEX_FILE_EXTS.contains(&ext.to_lowercase().as_str()) {
                    found.push(path);
                }
            }
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graphicspath_gets_trailing_slashes_and_dedups() {
        let line = r"\graphicspath{{./a}{b/}{a/}}";
        let fixed = correct_graphicspath(line);
        assert_eq!(fixed, r"\graphicspath{{a/}{b/}}");
    }

    #[test]
    fn graphicspath_fix_is_idempotent() {
        let line = r"\graphicspath{{./a}{b/}{a/}}";
        let once = correct_graphicspath(line);
        let twice = correct_graphicspath(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn auto_pst_pdf_is_commented_out() {
        let line = r"\usepackage[options]{auto-pst-pdf}";
        assert_eq!(remove_auto_pst_pdf(line), format!("% {line}"));
    }

    #[test]
    fn overleafhome_mirrors_to_homepath() {
        let line = r"\def\overleafhome{/compile/}";
        let fixed = set_overleafhome_and_homepath(line);
        assert!(fixed.contains(r"\def\homepath{/compile/}"));
    }

    #[test]
    fn unrelated_line_is_unchanged() {
        let line = "hello world";
        assert_eq!(correct_graphicspath(line), line);
        assert_eq!(remove_auto_pst_pdf(line), line);
        assert_eq!(set_overleafhome_and_homepath(line), line);
    }
}
