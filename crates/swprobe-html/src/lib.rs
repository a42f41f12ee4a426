//! # swprobe HTML
//!
//! Just enough HTML parsing to find a page's scripts.
//!
//! The tokenizer keeps the raw-text content model of `<script>` intact, so
//! inline code reaches callers exactly as the browser would see it, and
//! `src` attributes come back with character references decoded.

pub mod entities;
pub mod scripts;
pub mod tokenizer;

use thiserror::Error;

pub use scripts::{extract_scripts, inline_script_bodies, ScriptElement};
pub use tokenizer::{tokenize, Token, Tokenizer};

/// Errors that can occur during HTML parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Tokenizer error: {0}")]
    TokenizerError(String),
}

/// Result type for HTML parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;
