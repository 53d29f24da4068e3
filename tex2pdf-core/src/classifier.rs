//! Turns an include graph into toplevel candidates with a determined
//! compiler pipeline, per SPEC_FULL.md §4.4.

use crate::graph::IncludeGraph;
use crate::types::{
    BblType, CompilerSpec, EngineType, IssueType, LanguageType, OutputType, PostProcessType,
    TeXFileIssue, ToplevelFile, DEFAULT_ENGINE_TYPE, DEFAULT_LANGUAGE_TYPE,
};

pub struct Classifier;

/// Merge two values of a compiler dimension under the `unknown ⊔ x = x` rule,
/// raising `issue` when both sides are known and disagree.
fn merge_dimension<T>(acc: &mut T, next: T, issues: &mut Vec<TeXFileIssue>, issue: IssueType, context: &str)
where
    T: PartialEq + Default + Copy + std::fmt::Debug,
{
    let unknown = T::default();
    if next == unknown {
        return;
    }
    if *acc == unknown {
        *acc = next;
    } else if *acc != next {
        issues.push(TeXFileIssue::new(issue, format!("{context}: {:?} conflicts with {:?}", acc, next), None));
    }
}

impl Classifier {
    /// Only a root whose reachable subgraph contains a `\documentclass` or a
    /// bare `\bye` is a plausible compilation entrypoint. Kept strict per the
    /// Open Question resolution in SPEC_FULL.md §9 — isolated here so
    /// relaxing it later is a one-line change.
    pub fn is_toplevel_candidate(graph: &IncludeGraph, root: crate::types::NodeId) -> bool {
        graph.reachable(root).iter().any(|&id| {
            let node = graph.node(id);
            node.parsed.contains_documentclass || node.parsed.contains_bye
        })
    }

    /// Depth-first merge of every reachable node's (language, output) plus
    /// bibliography/index detection for one root.
    pub fn classify_root(graph: &IncludeGraph, root: crate::types::NodeId) -> ToplevelFile {
        let reachable = graph.reachable(root);
        let filename = graph.node(root).filename.clone();
        let mut issues = Vec::new();

        if !Classifier::is_toplevel_candidate(graph, root) {
            return ToplevelFile { filename, process: CompilerSpec::default(), issues: vec![] };
        }

        let mut language = LanguageType::Unknown;
        let mut engine = EngineType::Unknown;
        let mut output = OutputType::Unknown;

        let mut uses_bib = false;
        let mut uses_biblatex = false;
        let mut uses_makeindex = false;
        let mut uses_non_ascii = false;
        let mut unresolved_bib_files = Vec::new();

        for &id in &reachable {
            let parsed = &graph.node(id).parsed;
            merge_dimension(&mut language, parsed.language, &mut issues, IssueType::ConflictingFileType, "language");
            merge_dimension(&mut output, parsed.output, &mut issues, IssueType::ConflictingOutputType, "output");
            merge_dimension(&mut engine, parsed.engine, &mut issues, IssueType::ConflictingEngineType, "engine");
            issues.extend(parsed.issues.clone());
            uses_bib |= parsed.uses_bibliography;
            uses_biblatex |= parsed.uses_biblatex;
            uses_makeindex |= parsed.uses_makeindex;
            uses_non_ascii |= parsed.contains_non_ascii;
            for inc in &parsed.includes {
                if inc.file_type == crate::types::FileType::Bib && inc.resolved.is_none() {
                    unresolved_bib_files.push(inc.requested.clone());
                }
            }
        }

        // Defaults: engine -> tex; language -> tex; output depends on language.
        let engine = if engine == EngineType::Unknown { DEFAULT_ENGINE_TYPE } else { engine };
        if language == LanguageType::Unknown {
            language = DEFAULT_LANGUAGE_TYPE;
        }
        if output == OutputType::Unknown {
            output = match language {
                LanguageType::Tex => OutputType::Dvi,
                _ => OutputType::Pdf,
            };
        }
        let postp = match output {
            OutputType::Dvi => PostProcessType::DvipsPs2pdf,
            OutputType::Pdf => PostProcessType::None,
            OutputType::Unknown => PostProcessType::Unknown,
        };

        let process = CompilerSpec { lang: language, engine, output, postp };

        if !process.is_supported() {
            let specific = if language == LanguageType::Latex209 {
                IssueType::UnsupportedCompilerTypeLatex209
            } else if output == OutputType::Unknown {
                IssueType::UnsupportedCompilerTypeImageMix
            } else if uses_non_ascii && engine != EngineType::Xetex && engine != EngineType::Luatex {
                IssueType::UnsupportedCompilerTypeUnicode
            } else {
                IssueType::UnsupportedCompilerType
            };
            issues.push(TeXFileIssue::new(specific, format!("{} is not a supported compiler pipeline", process.compiler_string()), Some(filename.clone())));
        }

        classify_bibliography(&filename, uses_bib, uses_biblatex, uses_makeindex, &unresolved_bib_files, &mut issues);

        ToplevelFile { filename, process, issues }
    }
}

/// Newest biblatex `.bbl` format revision this build knows how to consume;
/// a `.bbl` stamped with a higher minor version needs a newer biber/biblatex
/// than this pipeline carries.
const MAX_SUPPORTED_BIBLATEX_BBL_MINOR: u32 = 2;

fn classify_bibliography(
    filename: &str,
    uses_bib: bool,
    uses_biblatex: bool,
    uses_makeindex: bool,
    unresolved_bib_files: &[String],
    issues: &mut Vec<TeXFileIssue>,
) {
    if uses_bib && uses_biblatex {
        issues.push(TeXFileIssue::new(
            IssueType::MultipleBibliographyTypes,
            "both \\bibliography and \\addbibresource found in the same subgraph",
            Some(filename.to_string()),
        ));
    }

    for missing in unresolved_bib_files {
        issues.push(TeXFileIssue::new(
            IssueType::BblBibFileMissing,
            format!("{missing} referenced but could not be resolved"),
            Some(filename.to_string()),
        ));
    }

    let stem = filename.trim_end_matches(".tex");
    let bbl_path = std::path::PathBuf::from(format!("{stem}.bbl"));
    if bbl_path.exists() {
        if let Ok(contents) = std::fs::read_to_string(&bbl_path) {
            match detect_bbl_type(&contents) {
                Ok(bbl_type) => {
                    let expected = if uses_biblatex {
                        BblType::Biblatex
                    } else if uses_bib {
                        BblType::Plain
                    } else {
                        BblType::Unknown
                    };
                    if expected != BblType::Unknown && bbl_type != BblType::Unknown && bbl_type != expected {
                        issues.push(TeXFileIssue::new(
                            IssueType::BblUsageMismatch,
                            format!("{stem}.bbl looks like {bbl_type:?} output but {filename} uses {expected:?}"),
                            Some(filename.to_string()),
                        ));
                    }
                }
                Err(issue) => issues.push(issue),
            }
        }
    } else if uses_bib {
        issues.push(TeXFileIssue::new(IssueType::BblFileMissing, format!("{stem}.bbl not found alongside {filename}"), Some(filename.to_string())));
    }

    if uses_makeindex {
        issues.push(TeXFileIssue::new(
            IssueType::IndexDefinitionMissing,
            format!("{filename} uses \\makeindex but no index style/processor could be resolved"),
            Some(filename.to_string()),
        ));
    }
}

/// Read the `% BBL VERSION` comment (if present) from the first few lines of
/// a pre-generated `.bbl` to tell plain bibtex output from biblatex output.
fn detect_bbl_type(contents: &str) -> Result<BblType, TeXFileIssue> {
    for line in contents.lines().take(5) {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("% BBL VERSION") {
            let version = rest.trim();
            return match version {
                "1" | "1.0" => Ok(BblType::Plain),
                v if v.starts_with("3.") => match v.strip_prefix("3.").and_then(|m| m.parse::<u32>().ok()) {
                    Some(minor) if minor > MAX_SUPPORTED_BIBLATEX_BBL_MINOR => Err(TeXFileIssue::new(
                        IssueType::BblVersionNeedsPreviousVersion,
                        format!("bbl built with biblatex format {v}, newer than this build supports (max 3.{MAX_SUPPORTED_BIBLATEX_BBL_MINOR})"),
                        None,
                    )),
                    _ => Ok(BblType::Biblatex),
                },
                other => Err(TeXFileIssue::new(IssueType::BblVersionMismatch, format!("unrecognized BBL VERSION: {other}"), None)),
            };
        }
    }
    Ok(BblType::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::IncludeGraph;
    use crate::parser::parse_tex_source;

    #[test]
    fn non_toplevel_root_yields_no_process() {
        let mut graph = IncludeGraph::new();
        let id = graph.add_file(parse_tex_source("notes.tex", "just prose, no document\n"));
        graph.link_includes();
        let top = Classifier::classify_root(&graph, id);
        assert_eq!(top.process, CompilerSpec::default());
    }

    #[test]
    fn plain_article_classifies_as_pdflatex() {
        let mut graph = IncludeGraph::new();
        let id = graph.add_file(parse_tex_source("main.tex", "\\documentclass{article}\n\\includegraphics{fig.pdf}\n"));
        graph.link_includes();
        let top = Classifier::classify_root(&graph, id);
        assert_eq!(top.process.compiler_string(), "pdflatex");
        assert!(top.issues.is_empty());
    }

    #[test]
    fn plain_tex_with_bye_defaults_to_etex_dvips() {
        let mut graph = IncludeGraph::new();
        let id = graph.add_file(parse_tex_source("plain.tex", "hello\n\\bye\n"));
        graph.link_includes();
        let top = Classifier::classify_root(&graph, id);
        assert_eq!(top.process.compiler_string(), "etex+dvips_ps2pdf");
    }

    #[test]
    fn conflicting_images_is_flagged_unsupported() {
        let mut graph = IncludeGraph::new();
        let id = graph.add_file(parse_tex_source("main.tex", "\\documentclass{article}\n\\includegraphics{a.pdf}\n\\includegraphics{b.eps}\n"));
        graph.link_includes();
        let top = Classifier::classify_root(&graph, id);
        assert!(top.issues.iter().any(|i| i.key == IssueType::UnsupportedCompilerTypeImageMix));
    }
}
