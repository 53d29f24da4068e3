// All TeX/PDF compilation logic lives in tex2pdf-core.
// This crate is a thin CLI (and, behind the `http` feature, HTTP service)
// wrapper around it.

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "scorecard")]
pub mod scorecard;

pub use tex2pdf_core::*;
