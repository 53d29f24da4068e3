// tex2pdf-core
//
// Compiles arXiv-style TeX submissions to PDF: parses sources, resolves
// includes against a TeX distribution, classifies toplevels and their
// compiler pipeline, merges that with a 00README manifest, drives the
// engine through a stability-tested run loop, and assembles/watermarks
// the result.

pub mod assemble;
pub mod classifier;
pub mod config;
pub mod driver;
pub mod errors;
pub mod graph;
pub mod outcome;
pub mod parser;
pub mod patcher;
pub mod preflight;
pub mod resolver;
pub mod types;
pub mod zzrm;

pub use assemble::{watermark, Assembler};
pub use classifier::Classifier;
pub use config::{ConfigManager, DriverConfig};
pub use driver::{ConverterDriver, EngineInvoker, FixtureInvoker, SubprocessInvoker};
pub use errors::{ArchiveError, CompileError, ResolverError, ZZRMError};
pub use graph::IncludeGraph;
pub use outcome::{pack_outcome, read_outcome_meta, unpack_submission};
pub use parser::{decode_source, parse_tex_source};
pub use patcher::fix_tex_sources;
pub use preflight::{classify_bare_pdf_bundle, PreflightOrchestrator};
pub use resolver::{KpseLuaResolver, NoOpResolver, PathResolver, Resolution};
pub use types::*;
pub use zzrm::{init_from_dir, FileUsageType, OrientationType, UserFile, ZZRMProcessSpec, ZeroZeroReadMe};
