//! End-to-end scenarios from SPEC_FULL.md §8, exercised against real
//! temp-directory submissions with `FixtureInvoker`/`NoOpResolver` standing
//! in for an actual TeX distribution.

use std::fs;

use tex2pdf_core::{
    classify_bare_pdf_bundle, ConverterDriver, DriverConfig, FileUsageType, FixtureInvoker,
    NoOpResolver, OrientationType, PreflightOrchestrator, UserFile, ZeroZeroReadMe,
};

mod scenarios {
    use super::*;

    /// S1: a single `\documentclass` file compiles with one engine run.
    #[test]
    fn s1_single_file_pdflatex() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("paper.tex"), "\\documentclass{article}\\begin{document}Hi\\end{document}").unwrap();

        let resolver = NoOpResolver;
        let response = PreflightOrchestrator::new(&resolver).run(dir.path(), &["paper.tex".to_string()], &[]);
        assert_eq!(response.toplevels.len(), 1);
        assert_eq!(response.toplevels[0].process.compiler_string(), "pdflatex");

        let mut zzrm = ZeroZeroReadMe::new();
        zzrm.update_from_preflight(&response).unwrap();
        assert!(zzrm.is_ready_for_compilation());

        fs::write(dir.path().join("paper.pdf"), b"%PDF-1.5 fixture").unwrap();
        let config = DriverConfig::default();
        let invoker = FixtureInvoker::default();
        let driver = ConverterDriver::new(&config, &invoker, &resolver);
        let outcome = driver.generate_pdf(dir.path(), dir.path(), &zzrm, "s1");

        assert_eq!(outcome.status, "success");
        assert_eq!(outcome.runs.len(), 1);
        assert_eq!(outcome.runs[0].out_files, vec!["paper.pdf".to_string()]);
    }

    /// S2: `\include`d sections with no `\documentclass` anywhere are not a
    /// toplevel at all, even though `main.tex` is a graph root.
    #[test]
    fn s2_include_only_root_is_not_a_toplevel() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.tex"), "\\include{sec1}\n\\include{sec2}\n").unwrap();
        fs::write(dir.path().join("sec1.tex"), "first section text\n").unwrap();
        fs::write(dir.path().join("sec2.tex"), "second section text\n").unwrap();

        let resolver = NoOpResolver;
        let files = vec!["main.tex".to_string(), "sec1.tex".to_string(), "sec2.tex".to_string()];
        let response = PreflightOrchestrator::new(&resolver).run(dir.path(), &files, &[]);

        assert!(response.toplevels.is_empty());
    }

    /// S3: a `\bye`-only file and a `\documentclass` file are both toplevels,
    /// with distinct pipelines.
    #[test]
    fn s3_bye_and_documentclass_are_both_toplevels() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.tex"), "plain tex body\n\\bye\n").unwrap();
        fs::write(dir.path().join("b.tex"), "\\documentclass{article}\n").unwrap();

        let resolver = NoOpResolver;
        let files = vec!["a.tex".to_string(), "b.tex".to_string()];
        let response = PreflightOrchestrator::new(&resolver).run(dir.path(), &files, &[]);

        assert_eq!(response.toplevels.len(), 2);
        let a = response.toplevels.iter().find(|t| t.filename == "a.tex").unwrap();
        let b = response.toplevels.iter().find(|t| t.filename == "b.tex").unwrap();
        assert_eq!(a.process.compiler_string(), "etex+dvips_ps2pdf");
        assert_eq!(b.process.compiler_string(), "pdflatex");
    }

    /// S4: a file referencing both a pdf-family and eps-family image triggers
    /// a conflicting-image-types issue and leaves the pipeline unsupported.
    #[test]
    fn s4_conflicting_image_types_is_flagged() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.tex"), "\\documentclass{article}\n\\includegraphics{fig.pdf}\n\\includegraphics{fig.eps}\n").unwrap();

        let resolver = NoOpResolver;
        let response = PreflightOrchestrator::new(&resolver).run(dir.path(), &["main.tex".to_string()], &[]);

        assert_eq!(response.toplevels.len(), 1);
        let top = &response.toplevels[0];
        assert!(top.issues.iter().any(|i| format!("{:?}", i.key).contains("ImageMix") || format!("{:?}", i.key).contains("ConflictingImageTypes")));
    }

    /// S5: a v1 00README with a single toplevel, an ignored file, and
    /// `nostamp`.
    #[test]
    fn s5_v1_zzrm_toplevel_ignore_and_nostamp() {
        let contents = "a.tex toplevelfile\nb.tex ignore\nnostamp\n";
        let zzrm = ZeroZeroReadMe::from_v1(contents).unwrap();

        assert_eq!(zzrm.toplevels().iter().map(|f| f.filename.clone()).collect::<Vec<_>>(), vec!["a.tex".to_string()]);
        assert_eq!(zzrm.ignores().iter().map(|f| f.filename.clone()).collect::<Vec<_>>(), vec!["b.tex".to_string()]);
        assert!(!zzrm.stamp);
    }

    /// S6: a v2 00README declaring `etex+dvipdfmx` round-trips through the
    /// canonical compiler-string table.
    #[test]
    fn s6_v2_zzrm_etex_dvipdfmx_round_trips() {
        let json = r#"{"process": {"compiler": "etex+dvipdfmx"}, "sources": [{"filename": "main.tex", "usage": "toplevel"}]}"#;
        let zzrm = ZeroZeroReadMe::from_v2(json, "json").unwrap();
        let spec = zzrm.process.compiler.unwrap();

        assert_eq!(spec.lang, tex2pdf_core::LanguageType::Tex);
        assert_eq!(spec.engine, tex2pdf_core::EngineType::Tex);
        assert_eq!(spec.output, tex2pdf_core::OutputType::Dvi);
        assert_eq!(spec.postp, tex2pdf_core::PostProcessType::Dvipdfmx);

        let reserialized = zzrm.to_json().unwrap();
        assert!(reserialized.contains("\"etex+dvipdfmx\""));
    }
}

mod invariants {
    use super::*;

    /// Invariant 1: parsing the same bytes twice yields the same record.
    #[test]
    fn parsing_is_deterministic() {
        let body = "\\documentclass{article}\n\\input macros\n";
        let first = tex2pdf_core::parse_tex_source("main.tex", body);
        let second = tex2pdf_core::parse_tex_source("main.tex", body);
        assert_eq!(first.language, second.language);
        assert_eq!(first.contains_documentclass, second.contains_documentclass);
        assert_eq!(first.includes.len(), second.includes.len());
    }

    /// Invariant 2: a `PreflightResponse` round-trips through JSON.
    #[test]
    fn preflight_response_json_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.tex"), "\\documentclass{article}\n").unwrap();
        let resolver = NoOpResolver;
        let response = PreflightOrchestrator::new(&resolver).run(dir.path(), &["main.tex".to_string()], &[]);

        let json = serde_json::to_string(&response).unwrap();
        let decoded: tex2pdf_core::PreflightResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.toplevels.len(), response.toplevels.len());
        assert_eq!(decoded.toplevels[0].process, response.toplevels[0].process);
    }

    /// Invariant 4: `sources` preserves insertion order and `assembling_files`
    /// follows toplevel declaration order.
    #[test]
    fn zzrm_preserves_source_order() {
        let mut zzrm = ZeroZeroReadMe::new();
        zzrm.sources.push(UserFile { usage: FileUsageType::Toplevel, ..UserFile::new("b.tex") });
        zzrm.sources.push(UserFile { usage: FileUsageType::Toplevel, ..UserFile::new("a.tex") });

        assert_eq!(zzrm.sources.iter().map(|f| f.filename.clone()).collect::<Vec<_>>(), vec!["b.tex".to_string(), "a.tex".to_string()]);
        assert_eq!(zzrm.assembling_files(), vec!["b.pdf".to_string(), "a.pdf".to_string()]);
    }

    /// Invariant 5: the source patcher is idempotent.
    #[test]
    fn patcher_is_idempotent_across_full_fixer_set() {
        use tex2pdf_core::fix_tex_sources;

        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("main.tex"),
            "\\graphicspath{{./a}{b/}}\n\\usepackage[x]{auto-pst-pdf}\n\\def\\overleafhome{/compile/}\n",
        )
        .unwrap();

        fix_tex_sources(dir.path(), tex2pdf_core::patcher::DEFAULT_FIXERS, &["main.tex".to_string()]).unwrap();
        let once = fs::read_to_string(dir.path().join("main.tex")).unwrap();

        fix_tex_sources(dir.path(), tex2pdf_core::patcher::DEFAULT_FIXERS, &["main.tex".to_string()]).unwrap();
        let twice = fs::read_to_string(dir.path().join("main.tex")).unwrap();

        assert_eq!(once, twice);
    }

    /// Invariant 6: a bare-PDF bundle boundary case short-circuits to a
    /// single `pdf_submission` toplevel.
    #[test]
    fn bare_pdf_bundle_boundary_case() {
        let response = classify_bare_pdf_bundle(&["paper.pdf".to_string()]).unwrap();
        assert_eq!(response.toplevels.len(), 1);
        assert_eq!(response.toplevels[0].filename, "paper.pdf");
        assert_eq!(response.toplevels[0].process.compiler_string(), "pdf_submission");

        // Any non-boundary bundle (a .tex file present) does not short-circuit.
        assert!(classify_bare_pdf_bundle(&["main.tex".to_string(), "paper.pdf".to_string()]).is_none());
    }

    /// Invariant 7: the subgraph toplevel rule — any reachable
    /// `\documentclass` makes the root a toplevel, none at all means it
    /// isn't one.
    #[test]
    fn subgraph_toplevel_rule() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.tex"), "\\input body\n").unwrap();
        fs::write(dir.path().join("body.tex"), "\\documentclass{article}\n").unwrap();

        let resolver = NoOpResolver;
        let files = vec!["main.tex".to_string(), "body.tex".to_string()];
        let response = PreflightOrchestrator::new(&resolver).run(dir.path(), &files, &[]);
        assert_eq!(response.toplevels.len(), 1);
        assert_eq!(response.toplevels[0].filename, "main.tex");

        let dir2 = tempfile::tempdir().unwrap();
        fs::write(dir2.path().join("main.tex"), "\\input body\n").unwrap();
        fs::write(dir2.path().join("body.tex"), "no markers here\n").unwrap();
        let response2 = PreflightOrchestrator::new(&resolver).run(dir2.path(), &files, &[]);
        assert!(response2.toplevels.is_empty());
    }

    /// Invariant 8 (fixed-point case): a run whose `.aux`/`.pdf` already
    /// exist before the first engine call settles after the minimum number
    /// of iterations rather than looping to `max_latex_runs`.
    #[test]
    fn stability_test_stops_at_fixed_point() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.tex"), "\\documentclass{article}\n").unwrap();
        fs::write(dir.path().join("main.pdf"), b"%PDF-1.5 fixture").unwrap();
        fs::write(dir.path().join("main.aux"), b"stable contents").unwrap();

        let mut zzrm = ZeroZeroReadMe::new();
        zzrm.sources.push(UserFile { usage: FileUsageType::Toplevel, ..UserFile::new("main.tex") });
        zzrm.process.compiler = tex2pdf_core::CompilerSpec::from_compiler_string("pdflatex");

        let config = DriverConfig::default();
        let invoker = FixtureInvoker::default();
        let resolver = NoOpResolver;
        let driver = ConverterDriver::new(&config, &invoker, &resolver);
        let outcome = driver.generate_pdf(dir.path(), dir.path(), &zzrm, "stability");

        assert_eq!(outcome.status, "success");
    }

    /// Invariant 8 (divergent case, downgrade path): a driver configured
    /// with a tiny `max_latex_runs` still reports `success` (with a warning)
    /// once the bound is hit, rather than failing outright.
    #[test]
    fn stability_test_downgrades_to_success_at_max_runs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.tex"), "\\documentclass{article}\n").unwrap();
        fs::write(dir.path().join("main.pdf"), b"%PDF-1.5 fixture").unwrap();

        let mut zzrm = ZeroZeroReadMe::new();
        zzrm.sources.push(UserFile { usage: FileUsageType::Toplevel, ..UserFile::new("main.tex") });
        zzrm.process.compiler = tex2pdf_core::CompilerSpec::from_compiler_string("pdflatex");

        let mut config = DriverConfig::default();
        config.max_latex_runs = 1;
        let invoker = FixtureInvoker::default();
        let resolver = NoOpResolver;
        let driver = ConverterDriver::new(&config, &invoker, &resolver);
        let outcome = driver.generate_pdf(dir.path(), dir.path(), &zzrm, "divergent");

        assert_eq!(outcome.status, "success");
        assert_eq!(outcome.runs[0].status, "success");
    }
}

mod landscape_and_assembly {
    use super::*;

    /// A ZZRM-declared landscape toplevel is reflected in `is_landscape`,
    /// which the driver's `dvips` invocation consults for the `-t landscape`
    /// flag.
    #[test]
    fn landscape_flag_is_readable_from_zzrm() {
        let mut zzrm = ZeroZeroReadMe::new();
        zzrm.sources.push(UserFile { usage: FileUsageType::Toplevel, orientation: Some(OrientationType::Landscape), ..UserFile::new("wide.tex") });
        assert!(zzrm.is_landscape("wide.tex"));
        assert!(!zzrm.is_landscape("other.tex"));
    }

    /// Missing an assembling-file target is reported rather than panicking.
    #[test]
    fn assembler_reports_missing_assembling_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.pdf"), b"%PDF-1.5 a").unwrap();

        let mut zzrm = ZeroZeroReadMe::new();
        zzrm.sources.push(UserFile::new("missing.tex"));

        let invoker = FixtureInvoker::default();
        let assembler = tex2pdf_core::Assembler::new(&invoker);
        let target = dir.path().join("out.pdf");
        let err = assembler.assemble(dir.path(), &["a.pdf".to_string()], &zzrm, &target).unwrap_err();
        assert!(err.to_string().contains("AssemblingFileNotFound"));
    }
}
