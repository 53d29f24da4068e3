use thiserror::Error;

/// Errors raised while loading or interpreting a 00README manifest.
#[derive(Error, Debug)]
pub enum ZZRMError {
    #[error("00README file not found in {0}")]
    FileNotFound(String),

    #[error("unsupported 00README file: {0}")]
    UnsupportedFile(String),

    #[error("unsupported 00README filetype version: {0}")]
    UnsupportedFiletypeVersion(String),

    #[error("multiple 00README files found: {0}")]
    MultipleFiles(String),

    #[error("invalid key for 00README: {0}")]
    Key(String),

    #[error("failed to parse 00README: {0}")]
    Parse(String),

    #[error("invalid 00README format: {0}")]
    InvalidFormat(String),

    #[error("unsupported value in 00README: {0}")]
    Unsupported(String),

    #[error("00README is underspecified: no toplevel files and no preflight data to fall back on")]
    Underspecified,
}

/// Errors raised by the compilation driver while running a submission through
/// an engine pipeline.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("no primary TeX file found in submission")]
    NoTexFile,

    #[error("{step} exited with status {code}")]
    RunFail { step: String, code: i32 },

    #[error("compiler could not be determined for this submission")]
    CompilerNotSpecified,

    #[error("compilation exceeded its time budget")]
    Timeout,

    #[error("internal error: {0}")]
    ImplementationError(String),
}

/// Errors raised by a `PathResolver` implementation.
#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("resolver subprocess failed: {0}")]
    SubprocessFailed(String),

    #[error("resolver subprocess produced unparseable output: {0}")]
    MalformedOutput(String),

    #[error("resolver is not available on this system: {0}")]
    Unavailable(String),
}

/// Errors raised while unpacking or assembling a submission/outcome archive.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("failed to read archive: {0}")]
    Read(String),

    #[error("failed to write archive: {0}")]
    Write(String),

    #[error("archive entry escapes extraction directory: {0}")]
    PathTraversal(String),
}
