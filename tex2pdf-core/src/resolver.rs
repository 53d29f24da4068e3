//! Resolves logical TeX file names (as found by the parser) against a TeX
//! distribution's search path or the submission's own sandbox.
//!
//! Mirrors the teacher's `Preprocessor` trait shape (`preprocessors/preprocessor.rs`):
//! a small trait with one batch entrypoint and a couple of convenience
//! defaults, backed by either a real subprocess or an in-memory test double.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::errors::ResolverError;

/// Where a resolved path lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Found inside the submission sandbox, path relative to its root.
    Sandbox(String),
    /// Found in the TeX distribution itself.
    System(String),
    /// Not found anywhere.
    NotFound,
}

/// One pending lookup: a logical name plus the extensions it may carry.
#[derive(Debug, Clone)]
pub struct ResolveQuery {
    pub name: String,
    pub extensions: Vec<String>,
}

/// A batch path-resolution backend. Implementors answer every query in one
/// call so a submission with hundreds of includes costs one subprocess spawn,
/// not hundreds.
pub trait PathResolver {
    fn resolve_batch(&self, basedir: &Path, queries: &[ResolveQuery]) -> Result<HashMap<String, Resolution>, ResolverError>;

    /// Convenience wrapper for a single lookup.
    fn resolve_one(&self, basedir: &Path, name: &str, extensions: &[String]) -> Result<Resolution, ResolverError> {
        let query = ResolveQuery { name: name.to_string(), extensions: extensions.to_vec() };
        let mut result = self.resolve_batch(basedir, std::slice::from_ref(&query))?;
        Ok(result.remove(name).unwrap_or(Resolution::NotFound))
    }
}

/// Shells out to `texlua kpse_search.lua -mark-sys-files <basedir>` once per
/// batch, feeding it alternating name/extensions lines on stdin and reading
/// back one `name\tresolved` line per query on stdout.
pub struct KpseLuaResolver {
    script_path: String,
}

impl KpseLuaResolver {
    pub fn new(script_path: impl Into<String>) -> Self {
        Self { script_path: script_path.into() }
    }
}

impl PathResolver for KpseLuaResolver {
    fn resolve_batch(&self, basedir: &Path, queries: &[ResolveQuery]) -> Result<HashMap<String, Resolution>, ResolverError> {
        if queries.is_empty() {
            return Ok(HashMap::new());
        }

        let mut child = Command::new("texlua")
            .arg(&self.script_path)
            .arg("-mark-sys-files")
            .arg(basedir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ResolverError::Unavailable(e.to_string()))?;

        {
            let stdin = child.stdin.as_mut().ok_or_else(|| ResolverError::SubprocessFailed("no stdin".to_string()))?;
            for q in queries {
                writeln!(stdin, "{}", q.name).map_err(|e| ResolverError::SubprocessFailed(e.to_string()))?;
                writeln!(stdin, "{}", q.extensions.join(",")).map_err(|e| ResolverError::SubprocessFailed(e.to_string()))?;
            }
        }

        let output = child.wait_with_output().map_err(|e| ResolverError::SubprocessFailed(e.to_string()))?;
        if !output.status.success() {
            return Err(ResolverError::SubprocessFailed(String::from_utf8_lossy(&output.stderr).to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut result = HashMap::new();
        for line in stdout.lines() {
            let mut parts = line.splitn(2, '\t');
            let name = parts.next().ok_or_else(|| ResolverError::MalformedOutput(line.to_string()))?;
            let path = parts.next().unwrap_or("").trim();
            let resolution = if path.is_empty() {
                Resolution::NotFound
            } else if let Some(sys_path) = path.strip_prefix("SYSTEM:") {
                Resolution::System(sys_path.to_string())
            } else {
                Resolution::Sandbox(path.strip_prefix("./").unwrap_or(path).to_string())
            };
            result.insert(name.to_string(), resolution);
        }
        Ok(result)
    }
}

/// Always reports "not found". Used when no TeX distribution is available
/// and the caller only wants the include graph built from files physically
/// present in the sandbox.
#[derive(Default)]
pub struct NoOpResolver;

impl PathResolver for NoOpResolver {
    fn resolve_batch(&self, _basedir: &Path, queries: &[ResolveQuery]) -> Result<HashMap<String, Resolution>, ResolverError> {
        Ok(queries.iter().map(|q| (q.name.clone(), Resolution::NotFound)).collect())
    }
}

/// Resolves against a fixed in-memory map, for deterministic tests that
/// don't want to depend on `texlua`/`kpsewhich` being installed.
#[derive(Default)]
pub struct FixtureResolver {
    pub fixture: HashMap<String, Resolution>,
}

impl FixtureResolver {
    pub fn new(fixture: HashMap<String, Resolution>) -> Self {
        Self { fixture }
    }
}

impl PathResolver for FixtureResolver {
    fn resolve_batch(&self, _basedir: &Path, queries: &[ResolveQuery]) -> Result<HashMap<String, Resolution>, ResolverError> {
        Ok(queries
            .iter()
            .map(|q| (q.name.clone(), self.fixture.get(&q.name).cloned().unwrap_or(Resolution::NotFound)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_resolver_reports_not_found() {
        let resolver = NoOpResolver;
        let resolution = resolver.resolve_one(Path::new("."), "macros.tex", &[]).unwrap();
        assert_eq!(resolution, Resolution::NotFound);
    }

    #[test]
    fn fixture_resolver_answers_from_map() {
        let mut fixture = HashMap::new();
        fixture.insert("article.cls".to_string(), Resolution::System("/usr/share/texmf/article.cls".to_string()));
        let resolver = FixtureResolver::new(fixture);
        let resolution = resolver.resolve_one(Path::new("."), "article.cls", &[]).unwrap();
        assert_eq!(resolution, Resolution::System("/usr/share/texmf/article.cls".to_string()));
        let missing = resolver.resolve_one(Path::new("."), "nope.sty", &[]).unwrap();
        assert_eq!(missing, Resolution::NotFound);
    }
}
