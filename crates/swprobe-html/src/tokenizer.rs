//! HTML tokenizer.
//!
//! A forgiving tokenizer that understands just enough of HTML5 to find
//! elements and their raw text: tags, attributes, comments, and the
//! raw-text content models of `<script>`, `<style>`, `<textarea>` and
//! `<title>`. Doctypes and other markup declarations are skipped.

use crate::entities;
use crate::{ParseError, ParseResult};

/// Token types emitted by the tokenizer.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Start tag (e.g., `<script src="app.js">`)
    StartTag {
        name: String,
        attrs: Vec<(String, String)>,
        self_closing: bool,
    },
    /// End tag (e.g., `</script>`)
    EndTag { name: String },
    /// A run of text
    Text(String),
    /// Comment
    Comment(String),
    /// End of file
    Eof,
}

impl Token {
    /// Look up an attribute on a start tag.
    pub fn attr(&self, name: &str) -> Option<&str> {
        match self {
            Token::StartTag { attrs, .. } => attrs
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str()),
            _ => None,
        }
    }
}

/// Tokenization state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Data,
    TagOpen,
    TagName,
    EndTagOpen,
    EndTagName,
    SelfClosingStartTag,
    BeforeAttributeName,
    AttributeName,
    AfterAttributeName,
    BeforeAttributeValue,
    AttributeValueDoubleQuoted,
    AttributeValueSingleQuoted,
    AttributeValueUnquoted,
    MarkupDeclarationOpen,
    Comment,
    BogusComment,
    RawText,
}

/// HTML tokenizer.
pub struct Tokenizer {
    input: Vec<char>,
    pos: usize,
    state: State,
    /// The name of the last emitted start tag (for raw-text end tag matching)
    last_start_tag_name: String,
    current_tag_name: String,
    current_attrs: Vec<(String, String)>,
    current_attr_name: String,
    current_attr_value: String,
    self_closing: bool,
    text: String,
    comment: String,
    tokens: Vec<Token>,
}

impl Tokenizer {
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            pos: 0,
            state: State::Data,
            last_start_tag_name: String::new(),
            current_tag_name: String::new(),
            current_attrs: Vec::new(),
            current_attr_name: String::new(),
            current_attr_value: String::new(),
            self_closing: false,
            text: String::new(),
            comment: String::new(),
            tokens: Vec::new(),
        }
    }

    fn current_char(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn peek_char(&self, offset: usize) -> Option<char> {
        self.input.get(self.pos + offset).copied()
    }

    fn consume(&mut self) -> Option<char> {
        let ch = self.current_char();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn reconsume(&mut self) {
        self.pos = self.pos.saturating_sub(1);
    }

    fn emit(&mut self, token: Token) {
        self.flush_text();
        self.tokens.push(token);
    }

    fn flush_text(&mut self) {
        if !self.text.is_empty() {
            let text = std::mem::take(&mut self.text);
            self.tokens.push(Token::Text(text));
        }
    }

    fn emit_comment(&mut self) {
        let comment = std::mem::take(&mut self.comment);
        self.emit(Token::Comment(comment));
    }

    fn emit_current_tag(&mut self) {
        self.emit_current_attr();
        if self.current_tag_name.is_empty() {
            self.state = State::Data;
            return;
        }
        self.last_start_tag_name = self.current_tag_name.clone();

        let tag = Token::StartTag {
            name: std::mem::take(&mut self.current_tag_name),
            attrs: std::mem::take(&mut self.current_attrs),
            self_closing: std::mem::replace(&mut self.self_closing, false),
        };
        self.emit(tag);

        // A trailing slash does not close a non-void element
        self.state = if is_raw_text_element(&self.last_start_tag_name) {
            State::RawText
        } else {
            State::Data
        };
    }

    fn emit_current_end_tag(&mut self) {
        if !self.current_tag_name.is_empty() {
            let tag = Token::EndTag {
                name: std::mem::take(&mut self.current_tag_name),
            };
            self.emit(tag);
        }
        self.current_attrs.clear();
        self.state = State::Data;
    }

    fn emit_current_attr(&mut self) {
        if self.current_attr_name.is_empty() {
            return;
        }
        let name = std::mem::take(&mut self.current_attr_name);
        let value = entities::decode(&std::mem::take(&mut self.current_attr_value));
        // First occurrence wins, as in browsers
        if !self.current_attrs.iter().any(|(existing, _)| *existing == name) {
            self.current_attrs.push((name, value));
        }
    }

    fn start_attr(&mut self, first: char) {
        self.emit_current_attr();
        self.current_attr_name.push(first.to_ascii_lowercase());
        self.state = State::AttributeName;
    }

    pub fn tokenize(mut self) -> ParseResult<Vec<Token>> {
        let mut steps: usize = 0;
        let step_limit = self.input.len().saturating_mul(4) + 64;

        while self.pos < self.input.len() {
            match self.state {
                State::Data => self.state_data(),
                State::TagOpen => self.state_tag_open(),
                State::TagName => self.state_tag_name(),
                State::EndTagOpen => self.state_end_tag_open(),
                State::EndTagName => self.state_end_tag_name(),
                State::SelfClosingStartTag => self.state_self_closing_start_tag(),
                State::BeforeAttributeName => self.state_before_attribute_name(),
                State::AttributeName => self.state_attribute_name(),
                State::AfterAttributeName => self.state_after_attribute_name(),
                State::BeforeAttributeValue => self.state_before_attribute_value(),
                State::AttributeValueDoubleQuoted => self.state_attribute_value_quoted('"'),
                State::AttributeValueSingleQuoted => self.state_attribute_value_quoted('\''),
                State::AttributeValueUnquoted => self.state_attribute_value_unquoted(),
                State::MarkupDeclarationOpen => self.state_markup_declaration_open(),
                State::Comment => self.state_comment(),
                State::BogusComment => self.state_bogus_comment(),
                State::RawText => self.state_raw_text(),
            }

            steps += 1;
            if steps > step_limit {
                return Err(ParseError::TokenizerError(
                    "Tokenizer made no progress".into(),
                ));
            }
        }

        self.finish_at_eof();
        self.emit(Token::Eof);
        Ok(self.tokens)
    }

    /// Flush whatever construct was open when input ran out.
    fn finish_at_eof(&mut self) {
        match self.state {
            State::Comment | State::BogusComment => self.emit_comment(),
            State::TagName
            | State::BeforeAttributeName
            | State::AttributeName
            | State::AfterAttributeName
            | State::BeforeAttributeValue
            | State::AttributeValueDoubleQuoted
            | State::AttributeValueSingleQuoted
            | State::AttributeValueUnquoted
            | State::SelfClosingStartTag => {
                // A tag cut off mid-way is dropped
                self.current_tag_name.clear();
                self.current_attrs.clear();
                self.current_attr_name.clear();
                self.current_attr_value.clear();
            }
            State::TagOpen => self.text.push('<'),
            State::EndTagOpen => self.text.push_str("</"),
            State::EndTagName => self.current_tag_name.clear(),
            State::Data | State::RawText | State::MarkupDeclarationOpen => {}
        }
        self.flush_text();
    }

    fn state_data(&mut self) {
        match self.consume() {
            Some('<') => self.state = State::TagOpen,
            Some(ch) => self.text.push(ch),
            None => {}
        }
    }

    fn state_tag_open(&mut self) {
        match self.current_char() {
            Some('!') => {
                self.consume();
                self.state = State::MarkupDeclarationOpen;
            }
            Some('/') => {
                self.consume();
                self.state = State::EndTagOpen;
            }
            Some(ch) if ch.is_ascii_alphabetic() => {
                self.current_tag_name.clear();
                self.current_attrs.clear();
                self.self_closing = false;
                self.state = State::TagName;
            }
            Some('?') => {
                self.consume();
                self.comment.clear();
                self.state = State::BogusComment;
            }
            _ => {
                self.text.push('<');
                self.state = State::Data;
            }
        }
    }

    fn state_tag_name(&mut self) {
        match self.consume() {
            Some(ch) if ch.is_ascii_whitespace() => self.state = State::BeforeAttributeName,
            Some('/') => self.state = State::SelfClosingStartTag,
            Some('>') => self.emit_current_tag(),
            Some(ch) => self.current_tag_name.push(ch.to_ascii_lowercase()),
            None => {}
        }
    }

    fn state_end_tag_open(&mut self) {
        match self.current_char() {
            Some(ch) if ch.is_ascii_alphabetic() => {
                self.current_tag_name.clear();
                self.state = State::EndTagName;
            }
            Some('>') => {
                self.consume();
                self.state = State::Data;
            }
            _ => {
                self.comment.clear();
                self.state = State::BogusComment;
            }
        }
    }

    fn state_end_tag_name(&mut self) {
        match self.consume() {
            Some('>') => self.emit_current_end_tag(),
            Some(ch) if ch.is_ascii_whitespace() || ch == '/' => {
                // Anything after an end tag's name is ignored
                self.skip_to_tag_end();
                self.emit_current_end_tag();
            }
            Some(ch) => self.current_tag_name.push(ch.to_ascii_lowercase()),
            None => {}
        }
    }

    fn skip_to_tag_end(&mut self) {
        while let Some(ch) = self.consume() {
            if ch == '>' {
                break;
            }
        }
    }

    fn state_self_closing_start_tag(&mut self) {
        match self.consume() {
            Some('>') => {
                self.self_closing = true;
                self.emit_current_tag();
            }
            _ => {
                self.reconsume();
                self.state = State::BeforeAttributeName;
            }
        }
    }

    fn state_before_attribute_name(&mut self) {
        match self.consume() {
            Some(ch) if ch.is_ascii_whitespace() => {}
            Some('/') => self.state = State::SelfClosingStartTag,
            Some('>') => self.emit_current_tag(),
            Some(ch) => self.start_attr(ch),
            None => {}
        }
    }

    fn state_attribute_name(&mut self) {
        match self.consume() {
            Some(ch) if ch.is_ascii_whitespace() => self.state = State::AfterAttributeName,
            Some('/') => {
                self.emit_current_attr();
                self.state = State::SelfClosingStartTag;
            }
            Some('=') => self.state = State::BeforeAttributeValue,
            Some('>') => self.emit_current_tag(),
            Some(ch) => self.current_attr_name.push(ch.to_ascii_lowercase()),
            None => {}
        }
    }

    fn state_after_attribute_name(&mut self) {
        match self.consume() {
            Some(ch) if ch.is_ascii_whitespace() => {}
            Some('/') => {
                self.emit_current_attr();
                self.state = State::SelfClosingStartTag;
            }
            Some('=') => self.state = State::BeforeAttributeValue,
            Some('>') => self.emit_current_tag(),
            Some(ch) => self.start_attr(ch),
            None => {}
        }
    }

    fn state_before_attribute_value(&mut self) {
        match self.consume() {
            Some(ch) if ch.is_ascii_whitespace() => {}
            Some('"') => self.state = State::AttributeValueDoubleQuoted,
            Some('\'') => self.state = State::AttributeValueSingleQuoted,
            Some('>') => self.emit_current_tag(),
            Some(ch) => {
                self.current_attr_value.push(ch);
                self.state = State::AttributeValueUnquoted;
            }
            None => {}
        }
    }

    fn state_attribute_value_quoted(&mut self, quote: char) {
        match self.consume() {
            Some(ch) if ch == quote => {
                self.emit_current_attr();
                self.state = State::BeforeAttributeName;
            }
            Some(ch) => self.current_attr_value.push(ch),
            None => {}
        }
    }

    fn state_attribute_value_unquoted(&mut self) {
        match self.consume() {
            Some(ch) if ch.is_ascii_whitespace() => {
                self.emit_current_attr();
                self.state = State::BeforeAttributeName;
            }
            Some('>') => self.emit_current_tag(),
            Some(ch) => self.current_attr_value.push(ch),
            None => {}
        }
    }

    fn state_markup_declaration_open(&mut self) {
        self.comment.clear();
        if self.current_char() == Some('-') && self.peek_char(1) == Some('-') {
            self.consume();
            self.consume();
            self.state = State::Comment;
        } else {
            // Doctypes, CDATA and friends carry nothing we need
            self.state = State::BogusComment;
        }
    }

    fn state_comment(&mut self) {
        if self.matches_ahead("-->") {
            self.pos += 3;
            self.emit_comment();
            self.state = State::Data;
            return;
        }
        if let Some(ch) = self.consume() {
            self.comment.push(ch);
        }
    }

    fn state_bogus_comment(&mut self) {
        while let Some(ch) = self.consume() {
            if ch == '>' {
                self.emit_comment();
                self.state = State::Data;
                return;
            }
            self.comment.push(ch);
        }
    }

    fn state_raw_text(&mut self) {
        match self.consume() {
            Some('<') if self.current_char() == Some('/') && self.matches_end_tag(1) => {
                self.consume(); // '/'
                self.current_tag_name = self.last_start_tag_name.clone();
                self.pos += self.last_start_tag_name.chars().count();
                self.skip_to_tag_end();
                self.emit_current_end_tag();
            }
            Some(ch) => self.text.push(ch),
            None => {}
        }
    }

    fn matches_ahead(&self, s: &str) -> bool {
        s.chars()
            .enumerate()
            .all(|(i, expected)| self.peek_char(i) == Some(expected))
    }

    /// Whether the last start tag's name follows at `offset`, terminated by
    /// whitespace, `/`, `>` or end of input.
    fn matches_end_tag(&self, offset: usize) -> bool {
        if self.last_start_tag_name.is_empty() {
            return false;
        }

        let mut len = 0;
        for (i, expected) in self.last_start_tag_name.chars().enumerate() {
            match self.peek_char(offset + i) {
                Some(ch) if ch.to_ascii_lowercase() == expected => len += 1,
                _ => return false,
            }
        }

        match self.peek_char(offset + len) {
            Some(ch) => ch.is_ascii_whitespace() || ch == '/' || ch == '>',
            None => true,
        }
    }
}

fn is_raw_text_element(name: &str) -> bool {
    matches!(
        name,
        "script" | "style" | "textarea" | "title" | "xmp" | "iframe" | "noembed" | "noframes"
    )
}

/// Tokenize HTML input.
pub fn tokenize(input: &str) -> ParseResult<Vec<Token>> {
    Tokenizer::new(input).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag_names(tokens: &[Token]) -> Vec<String> {
        tokens
            .iter()
            .filter_map(|t| match t {
                Token::StartTag { name, .. } => Some(name.clone()),
                Token::EndTag { name } => Some(format!("/{}", name)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_simple_tag() {
        let tokens = tokenize("<div></div>").unwrap();
        assert!(matches!(tokens[0], Token::StartTag { ref name, .. } if name == "div"));
        assert!(matches!(tokens[1], Token::EndTag { ref name } if name == "div"));
        assert!(matches!(tokens[2], Token::Eof));
    }

    #[test]
    fn test_text_is_coalesced() {
        let tokens = tokenize("<p>Hello World</p>").unwrap();
        assert_eq!(tokens[1], Token::Text("Hello World".into()));
    }

    #[test]
    fn test_attributes() {
        let tokens = tokenize("<script src=\"/app.js\" async defer=defer></script>").unwrap();
        assert_eq!(tokens[0].attr("src"), Some("/app.js"));
        assert_eq!(tokens[0].attr("async"), Some(""));
        assert_eq!(tokens[0].attr("defer"), Some("defer"));
        assert_eq!(tokens[0].attr("type"), None);
    }

    #[test]
    fn test_attribute_names_are_lowercased() {
        let tokens = tokenize("<SCRIPT SRC='x.js'></SCRIPT>").unwrap();
        assert_eq!(tokens[0].attr("src"), Some("x.js"));
        assert_eq!(tag_names(&tokens), vec!["script", "/script"]);
    }

    #[test]
    fn test_duplicate_attribute_keeps_first() {
        let tokens = tokenize("<script src=a.js src=b.js></script>").unwrap();
        assert_eq!(tokens[0].attr("src"), Some("a.js"));
    }

    #[test]
    fn test_entity_in_attribute() {
        let tokens = tokenize("<a href=\"?foo=1&amp;bar=2\"></a>").unwrap();
        assert_eq!(tokens[0].attr("href"), Some("?foo=1&bar=2"));
    }

    #[test]
    fn test_script_body_is_raw() {
        let html = "<script>if (a < b && c > d) { x = '<div>'; }</script><p>";
        let tokens = tokenize(html).unwrap();
        assert_eq!(
            tokens[1],
            Token::Text("if (a < b && c > d) { x = '<div>'; }".into())
        );
        assert_eq!(tag_names(&tokens), vec!["script", "/script", "p"]);
    }

    #[test]
    fn test_script_body_keeps_comment_markers() {
        let tokens = tokenize("<script><!-- navigator.serviceWorker --></script>").unwrap();
        assert_eq!(tokens[1], Token::Text("<!-- navigator.serviceWorker -->".into()));
    }

    #[test]
    fn test_script_end_tag_needs_exact_name() {
        let tokens = tokenize("<script>a = '</scripts>';</script>").unwrap();
        assert_eq!(tokens[1], Token::Text("a = '</scripts>';".into()));
    }

    #[test]
    fn test_self_closing_script_stays_open() {
        let tokens = tokenize("<script src=x.js /><p>hi</p></script><b>").unwrap();
        assert!(matches!(tokens[0], Token::StartTag { self_closing: true, .. }));
        assert_eq!(tokens[1], Token::Text("<p>hi</p>".into()));
        assert_eq!(tag_names(&tokens), vec!["script", "/script", "b"]);
    }

    #[test]
    fn test_comment() {
        let tokens = tokenize("<!-- comment -->").unwrap();
        assert_eq!(tokens[0], Token::Comment(" comment ".into()));
    }

    #[test]
    fn test_doctype_is_skipped() {
        let tokens = tokenize("<!DOCTYPE html><html></html>").unwrap();
        assert_eq!(tag_names(&tokens), vec!["html", "/html"]);
    }

    #[test]
    fn test_malformed_tag() {
        let tokens = tokenize("<div<p>").unwrap();
        assert!(!tokens.is_empty());
    }

    #[test]
    fn test_unterminated_script() {
        let tokens = tokenize("<script>navigator.serviceWorker.register('/sw.js')").unwrap();
        assert_eq!(
            tokens[1],
            Token::Text("navigator.serviceWorker.register('/sw.js')".into())
        );
    }

    #[test]
    fn test_empty_input() {
        let tokens = tokenize("").unwrap();
        assert!(matches!(tokens[0], Token::Eof));
    }

    #[test]
    fn test_stray_less_than_is_text() {
        let tokens = tokenize("1 < 2").unwrap();
        assert_eq!(tokens[0], Token::Text("1 < 2".into()));
    }
}
