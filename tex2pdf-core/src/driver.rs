//! The compilation state machine: `start → parse_inputs → resolve_paths →
//! patch_sources → select_pipeline → run_engine(i) → check_output →
//! postprocess → assemble → watermark`. Ported from
//! `original_source/.../converter_driver.py`'s `ConverterDriver`, keeping the
//! teacher's staged-with-timing flow (`processor.rs`,
//! `DocumentProcessor::process_with_config_flow`).

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::config::DriverConfig;
use crate::errors::CompileError;
use crate::patcher::{fix_tex_sources, DEFAULT_FIXERS};
use crate::resolver::PathResolver;
use crate::types::{CompilerSpec, OutcomeMeta, RunRecord};
use crate::zzrm::ZeroZeroReadMe;

const RERUN_NEEDLE: &str = "Rerun to get cross-references right.";
const HEAD_LOG_LINES: usize = 30;
const TAIL_LOG_LINES: usize = 50;

/// Outcome of a single subprocess invocation.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
    pub cpu_time: f64,
    pub process_completion: bool,
}

/// Abstracts spawning the actual TeX engine / postprocess binaries, so the
/// driver's state machine can be exercised in tests without a TeX
/// distribution installed.
pub trait EngineInvoker {
    fn run(&self, program: &str, args: &[String], cwd: &Path, env: &[(String, String)], timeout: Duration) -> RunOutcome;
}

/// Spawns real subprocesses and enforces the timeout with `wait-timeout`.
pub struct SubprocessInvoker;

impl EngineInvoker for SubprocessInvoker {
    fn run(&self, program: &str, args: &[String], cwd: &Path, env: &[(String, String)], timeout: Duration) -> RunOutcome {
        use std::process::Command;
        use wait_timeout::ChildExt;

        let start = Instant::now();
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(cwd);
        for (k, v) in env {
            cmd.env(k, v);
        }
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                return RunOutcome { status: -1, stdout: String::new(), stderr: e.to_string(), cpu_time: 0.0, process_completion: false };
            }
        };

        match child.wait_timeout(timeout) {
            Ok(Some(status)) => {
                let output = child.wait_with_output().unwrap_or_else(|_| std::process::Output {
                    status,
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                });
                RunOutcome {
                    status: status.code().unwrap_or(-1),
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                    cpu_time: start.elapsed().as_secs_f64(),
                    process_completion: true,
                }
            }
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                RunOutcome { status: -1, stdout: String::new(), stderr: "timed out".to_string(), cpu_time: start.elapsed().as_secs_f64(), process_completion: false }
            }
            Err(e) => RunOutcome { status: -1, stdout: String::new(), stderr: e.to_string(), cpu_time: start.elapsed().as_secs_f64(), process_completion: false },
        }
    }
}

/// Returns a canned successful run without spawning anything, for tests
/// that exercise the state machine rather than a real TeX installation.
pub struct FixtureInvoker {
    pub status: i32,
}

impl Default for FixtureInvoker {
    fn default() -> Self {
        Self { status: 0 }
    }
}

impl EngineInvoker for FixtureInvoker {
    fn run(&self, _program: &str, _args: &[String], _cwd: &Path, _env: &[(String, String)], _timeout: Duration) -> RunOutcome {
        RunOutcome { status: self.status, stdout: String::new(), stderr: String::new(), cpu_time: 0.01, process_completion: true }
    }
}

pub struct ConverterDriver<'a> {
    pub config: &'a DriverConfig,
    pub invoker: &'a dyn EngineInvoker,
    pub resolver: &'a dyn PathResolver,
}

impl<'a> ConverterDriver<'a> {
    pub fn new(config: &'a DriverConfig, invoker: &'a dyn EngineInvoker, resolver: &'a dyn PathResolver) -> Self {
        Self { config, invoker, resolver }
    }

    /// Compile every toplevel named by `zzrm` and assemble the final PDF.
    /// Never returns `Err`: all failure modes are recorded in the returned
    /// `OutcomeMeta.status`/`runs`, matching the Python driver's single
    /// always-produced `outcome` record.
    pub fn generate_pdf(&self, in_dir: &Path, out_dir: &Path, zzrm: &ZeroZeroReadMe, tag: &str) -> OutcomeMeta {
        let t0 = Instant::now();
        let mut outcome = OutcomeMeta::new(tag, in_dir.to_path_buf(), out_dir.to_path_buf());
        outcome.zzrm = zzrm.to_json().ok().and_then(|s| serde_json::from_str(&s).ok());

        let toplevels = zzrm.toplevels();
        if toplevels.is_empty() {
            outcome.note = Some("no primary TeX file found in submission".to_string());
            outcome.total_time = t0.elapsed().as_secs_f64();
            return outcome;
        }

        let toplevel_names: Vec<String> = toplevels.iter().map(|f| f.filename.clone()).collect();
        outcome.tex_files = toplevel_names.clone();
        if let Err(e) = fix_tex_sources(in_dir, DEFAULT_FIXERS, &toplevel_names) {
            warn!(error = %e, "source patching failed, continuing with unpatched sources");
        }

        let mut pdf_files = Vec::new();
        for toplevel in &toplevel_names {
            let elapsed = t0.elapsed();
            let budget = Duration::from_secs(self.config.max_time_budget_secs).saturating_sub(elapsed);
            if budget.is_zero() {
                outcome.note = Some("time budget exhausted before all toplevels were attempted".to_string());
                break;
            }

            let compiler = zzrm.process.compiler.unwrap_or_default();
            match self.run_one_toplevel(in_dir, toplevel, compiler, budget) {
                Ok(run) => {
                    if !run.out_files.is_empty() {
                        pdf_files.extend(run.out_files.iter().cloned());
                    }
                    outcome.runs.push(run);
                }
                Err(e) => {
                    outcome.reasons.push(format!("{toplevel}: {e}"));
                    outcome.runs.push(RunRecord {
                        tex_file: toplevel.clone(),
                        bbl_file: None,
                        index: 0,
                        converter: compiler.compiler_string(),
                        out_files: Vec::new(),
                        elapse_time: elapsed.as_secs_f64(),
                        cpu_time: 0.0,
                        status: "fail".to_string(),
                        log_excerpt: e.to_string(),
                    });
                }
            }
        }

        outcome.status = if pdf_files.is_empty() { "fail".to_string() } else { "success".to_string() };
        if !pdf_files.is_empty() {
            outcome.out_files = pdf_files.clone();
            outcome.pdf_files = pdf_files.clone();
            outcome.pdf_file = pdf_files.into_iter().next();
        }
        outcome.total_time = t0.elapsed().as_secs_f64();
        outcome.total_cpu_time = outcome.runs.iter().map(|r| r.cpu_time).sum();
        info!(status = %outcome.status, elapsed = ?t0.elapsed(), "compilation finished");
        outcome
    }

    fn run_one_toplevel(&self, in_dir: &Path, toplevel: &str, compiler: CompilerSpec, budget: Duration) -> Result<RunRecord, CompileError> {
        if !compiler.is_determined() {
            return Err(CompileError::CompilerNotSpecified);
        }

        let program = engine_program(&compiler);
        let stem = toplevel.trim_end_matches(".tex");
        let mut prev_hashes: Option<(String, String)> = None;
        let mut last_outcome = RunOutcome { status: -1, stdout: String::new(), stderr: String::new(), cpu_time: 0.0, process_completion: false };

        for i in 0..self.config.max_latex_runs {
            let env = engine_env(in_dir, stem);
            let args = vec!["-interaction=nonstopmode".to_string(), toplevel.to_string()];
            last_outcome = self.invoker.run(program, &args, in_dir, &env, budget);

            if !last_outcome.process_completion {
                remove_stale_artifacts(in_dir, stem);
                return Err(CompileError::Timeout);
            }
            if last_outcome.status != 0 {
                remove_stale_artifacts(in_dir, stem);
                return Err(CompileError::RunFail { step: program.to_string(), code: last_outcome.status });
            }

            let hashes = (hash_if_exists(&in_dir.join(format!("{stem}.aux"))), hash_if_exists(&in_dir.join(format!("{stem}.out"))));
            let needs_rerun = last_outcome.stdout.contains(RERUN_NEEDLE) || last_outcome.stderr.contains(RERUN_NEEDLE);
            let stable = prev_hashes.as_ref() == Some(&hashes) && !needs_rerun;
            prev_hashes = Some(hashes);

            if stable || i + 1 == self.config.max_latex_runs {
                if !stable {
                    warn!(toplevel, "reached max_latex_runs without a stable cross-reference pass, accepting anyway");
                }
                break;
            }
        }

        let pdf_path = in_dir.join(format!("{stem}.pdf"));
        let out_files = if pdf_path.exists() { vec![pdf_path.file_name().unwrap().to_string_lossy().to_string()] } else { Vec::new() };

        if out_files.is_empty() {
            return Err(CompileError::NoTexFile);
        }

        if compiler.postp != crate::types::PostProcessType::None {
            self.run_postprocess(in_dir, stem, compiler, budget)?;
        }

        Ok(RunRecord {
            tex_file: toplevel.to_string(),
            bbl_file: existing_file(&in_dir.join(format!("{stem}.bbl"))),
            index: 0,
            converter: compiler.compiler_string(),
            out_files,
            elapse_time: last_outcome.cpu_time,
            cpu_time: last_outcome.cpu_time,
            status: "success".to_string(),
            log_excerpt: truncate_log(&format!("{}\n{}", last_outcome.stdout, last_outcome.stderr)),
        })
    }

    fn run_postprocess(&self, in_dir: &Path, stem: &str, compiler: CompilerSpec, budget: Duration) -> Result<(), CompileError> {
        match compiler.postp {
            crate::types::PostProcessType::DvipsPs2pdf => {
                let dvi = format!("{stem}.dvi");
                let ps = format!("{stem}.ps");
                let hyperdvi_args = vec!["-z".to_string(), "-R2".to_string(), dvi.clone(), "-o".to_string(), ps.clone()];
                let hyperdvi = self.invoker.run("dvips", &hyperdvi_args, in_dir, &[], budget);
                if hyperdvi.status != 0 {
                    let retry_args = vec!["-R2".to_string(), dvi, "-o".to_string(), ps.clone()];
                    let retry = self.invoker.run("dvips", &retry_args, in_dir, &[], budget);
                    if retry.status != 0 {
                        remove_stale_artifacts(in_dir, stem);
                        return Err(CompileError::RunFail { step: "dvips".to_string(), code: retry.status });
                    }
                }
                let pdf = format!("{stem}.pdf");
                let ps2pdf = self.invoker.run("ps2pdf", &[ps, pdf], in_dir, &[], budget);
                if ps2pdf.status != 0 {
                    remove_stale_artifacts(in_dir, stem);
                    return Err(CompileError::RunFail { step: "ps2pdf".to_string(), code: ps2pdf.status });
                }
                Ok(())
            }
            crate::types::PostProcessType::Dvipdfmx => {
                let dvi = format!("{stem}.dvi");
                let result = self.invoker.run("dvipdfmx", &[dvi], in_dir, &[], budget);
                if result.status != 0 {
                    remove_stale_artifacts(in_dir, stem);
                    return Err(CompileError::RunFail { step: "dvipdfmx".to_string(), code: result.status });
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

fn engine_program(compiler: &CompilerSpec) -> &'static str {
    use crate::types::EngineType::*;
    match compiler.engine {
        Luatex => "lualatex",
        Xetex => "xelatex",
        Ptex => "platex",
        Uptex => "uplatex",
        Tex | Unknown => {
            if compiler.lang == crate::types::LanguageType::Latex {
                "latex"
            } else {
                "etex"
            }
        }
    }
}

fn engine_env(in_dir: &Path, stem: &str) -> Vec<(String, String)> {
    let mut env = vec![
        ("WORKDIR".to_string(), in_dir.display().to_string()),
        ("max_print_line".to_string(), "4096".to_string()),
        ("error_line".to_string(), "254".to_string()),
        ("half_error_line".to_string(), "238".to_string()),
        ("SECRETS".to_string(), "?".to_string()),
        ("GOOGLE_APPLICATION_CREDENTIALS".to_string(), "?".to_string()),
    ];

    let path = std::env::var("PATH").unwrap_or_default();
    let path = match std::env::var("VIRTUAL_ENV") {
        Ok(venv) => format!("{venv}/bin:{path}"),
        Err(_) => path,
    };
    env.push(("PATH".to_string(), path));
    if let Ok(home) = std::env::var("HOME") {
        env.push(("HOME".to_string(), home));
    }
    if let Ok(epoch) = std::env::var("SOURCE_DATE_EPOCH") {
        env.push(("SOURCE_DATE_EPOCH".to_string(), epoch.clone()));
        env.push(("FORCE_SOURCE_DATE".to_string(), epoch));
    }
    if let Some(tree) = biblatex_auxtree_for(in_dir, stem) {
        env.push(("TEXMFAUXTREES".to_string(), tree));
    }

    env
}

/// A pre-generated `.bbl` stamped with a biblatex format newer than the
/// default texmf tree's own biblatex needs an auxiliary tree prepended so
/// kpathsea finds a matching `.sty`/`.def` pair. Only the first three lines
/// are checked, matching where `converter_driver.py` looks for the
/// `% BBL VERSION` comment.
fn biblatex_auxtree_for(in_dir: &Path, stem: &str) -> Option<String> {
    let contents = std::fs::read_to_string(in_dir.join(format!("{stem}.bbl"))).ok()?;
    for line in contents.lines().take(3) {
        if let Some(version) = line.trim().strip_prefix("% BBL VERSION").map(str::trim) {
            if version.starts_with("3.") {
                return Some(format!("/usr/share/texmf-biblatex-{version}//"));
            }
        }
    }
    None
}

/// Remove a prior run's primary artifacts so a failed run can't be mistaken
/// for success by a stale file left over from an earlier attempt.
fn remove_stale_artifacts(in_dir: &Path, stem: &str) {
    for ext in ["pdf", "dvi"] {
        let _ = std::fs::remove_file(in_dir.join(format!("{stem}.{ext}")));
    }
}

fn hash_if_exists(path: &Path) -> String {
    match std::fs::read(path) {
        Ok(bytes) => {
            let mut hasher = Sha256::new();
            hasher.update(&bytes);
            format!("{:x}", hasher.finalize())
        }
        Err(_) => String::new(),
    }
}

fn existing_file(path: &PathBuf) -> Option<String> {
    if path.exists() {
        path.file_name().map(|f| f.to_string_lossy().to_string())
    } else {
        None
    }
}

/// Truncate a converter log to `{first 30 lines} ... <N lines removed> ...
/// {last 50 lines}` for transport, matching `converter_driver.py`'s outcome
/// truncation. The untruncated log is expected to remain on disk — this
/// function only shapes what gets attached to the outcome record.
fn truncate_log(log: &str) -> String {
    let lines: Vec<&str> = log.lines().collect();
    if lines.len() <= HEAD_LOG_LINES + TAIL_LOG_LINES {
        return log.to_string();
    }
    let head = &lines[..HEAD_LOG_LINES];
    let tail = &lines[lines.len() - TAIL_LOG_LINES..];
    let removed = lines.len() - HEAD_LOG_LINES - TAIL_LOG_LINES;
    format!("{}\n<{removed} lines removed>\n{}", head.join("\n"), tail.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::NoOpResolver;
    use crate::zzrm::{FileUsageType, UserFile, ZeroZeroReadMe};

    #[test]
    fn truncate_log_keeps_head_and_tail() {
        let lines: Vec<String> = (0..200).map(|i| format!("line {i}")).collect();
        let log = lines.join("\n");
        let truncated = truncate_log(&log);
        assert!(truncated.contains("line 0"));
        assert!(truncated.contains("line 199"));
        assert!(truncated.contains("lines removed"));
    }

    #[test]
    fn short_log_is_not_truncated() {
        let log = "line 1\nline 2".to_string();
        assert_eq!(truncate_log(&log), log);
    }

    #[test]
    fn no_toplevels_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let config = DriverConfig::default();
        let invoker = FixtureInvoker::default();
        let resolver = NoOpResolver;
        let driver = ConverterDriver::new(&config, &invoker, &resolver);
        let zzrm = ZeroZeroReadMe::new();
        let outcome = driver.generate_pdf(dir.path(), dir.path(), &zzrm, "t0");
        assert_eq!(outcome.status, "fail");
    }

    #[test]
    fn successful_run_produces_pdf_via_fixture() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.tex"), "\\documentclass{article}\n").unwrap();
        std::fs::write(dir.path().join("main.pdf"), b"%PDF-1.5 fixture").unwrap();

        let config = DriverConfig::default();
        let invoker = FixtureInvoker::default();
        let resolver = NoOpResolver;
        let driver = ConverterDriver::new(&config, &invoker, &resolver);

        let mut zzrm = ZeroZeroReadMe::new();
        zzrm.sources.push(UserFile { usage: FileUsageType::Toplevel, ..UserFile::new("main.tex") });
        zzrm.process.compiler = crate::types::CompilerSpec::from_compiler_string("pdflatex");

        let outcome = driver.generate_pdf(dir.path(), dir.path(), &zzrm, "t1");
        assert_eq!(outcome.status, "success");
        assert_eq!(outcome.runs.len(), 1);
        assert_eq!(outcome.runs[0].status, "success");
    }
}
