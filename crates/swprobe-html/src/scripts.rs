//! `<script>` discovery.

use tracing::trace;
use url::Url;

use crate::tokenizer::{tokenize, Token};
use crate::ParseResult;

/// A `<script>` element found in a document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScriptElement {
    /// Raw `src` attribute, if present.
    pub src: Option<String>,
    /// Raw `type` attribute, if present.
    pub kind: Option<String>,
    /// Inline body text.
    pub body: String,
}

impl ScriptElement {
    /// Whether the element carries its code inline rather than by reference.
    pub fn is_inline(&self) -> bool {
        self.src.is_none()
    }

    /// Resolve the `src` reference against the document URL.
    pub fn resolve_src(&self, base: &Url) -> Option<Url> {
        let src = self.src.as_deref()?.trim();
        if src.is_empty() {
            return None;
        }
        base.join(src).ok()
    }
}

/// Collect every `<script>` element in document order.
pub fn extract_scripts(html: &str) -> ParseResult<Vec<ScriptElement>> {
    let tokens = tokenize(html)?;
    let mut scripts = Vec::new();
    let mut open: Option<ScriptElement> = None;

    for token in tokens {
        match token {
            // `<script ... />` is still open until `</script>`
            Token::StartTag { ref name, .. } if name == "script" => {
                let script = ScriptElement {
                    src: token.attr("src").map(str::to_string),
                    kind: token.attr("type").map(str::to_string),
                    body: String::new(),
                };
                if let Some(previous) = open.replace(script) {
                    scripts.push(previous);
                }
            }
            Token::Text(text) => {
                if let Some(script) = open.as_mut() {
                    script.body.push_str(&text);
                }
            }
            Token::EndTag { ref name } if name == "script" => {
                if let Some(script) = open.take() {
                    scripts.push(script);
                }
            }
            _ => {}
        }
    }

    // Unterminated script at end of input
    if let Some(script) = open.take() {
        scripts.push(script);
    }

    trace!(count = scripts.len(), "Extracted scripts");
    Ok(scripts)
}

/// Inline script bodies, skipping empty ones.
pub fn inline_script_bodies(scripts: &[ScriptElement]) -> impl Iterator<Item = &str> {
    scripts
        .iter()
        .filter(|s| s.is_inline())
        .map(|s| s.body.as_str())
        .filter(|body| !body.trim().is_empty())
}
