//! Stage 2: single-pass, byte-driven streaming tokeniser (spec.md §4.6).
//!
//! No per-byte allocation: every emitted event borrows slices of the input
//! buffer directly. Malformed input never aborts — unterminated
//! constructs simply close at EOF, matching spec.md's resilience
//! requirement.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Text,
    TagOpen,
    TagName,
    BeforeAttrName,
    AttrName,
    AfterAttrName,
    BeforeAttrValue,
    AttrValueDq,
    AttrValueSq,
    AttrValueUnquoted,
    /// Skipping to the closing `>` of a malformed or already-named tag.
    TagClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event<'a> {
    TagOpen { name: &'a str, is_closing: bool },
    Attribute { name: &'a str, value: Option<&'a str> },
    TagClose { name: &'a str, self_closing: bool },
}

fn is_name_byte(b: u8) -> bool {
    !b.is_ascii_whitespace() && b != b'>' && b != b'/' && b != b'='
}

/// Runs the FSM over `input`, invoking `on_event` for each tag/attribute
/// boundary crossed. Bytes outside tags (`TEXT`) are not emitted — the
/// link extractor only needs tag structure.
pub fn tokenize<'a>(input: &'a [u8], mut on_event: impl FnMut(Event<'a>)) {
    let mut state = State::Text;
    let mut pos = 0usize;
    let len = input.len();

    // Current tag name span, and whether it is a closing tag (`</name>`).
    let mut tag_start = 0usize;
    let mut tag_name: &'a str = "";
    let mut is_closing = false;
    let mut self_closing = false;

    // Current attribute name span.
    let mut attr_name_start = 0usize;
    let mut attr_name: &'a str = "";
    let mut attr_value_start = 0usize;

    let as_str = |s: usize, e: usize| -> &'a str { std::str::from_utf8(&input[s..e]).unwrap_or("") };

    while pos < len {
        let b = input[pos];
        match state {
            State::Text => {
                if b == b'<' {
                    state = State::TagOpen;
                    is_closing = false;
                    self_closing = false;
                }
                pos += 1;
            }
            State::TagOpen => {
                if b == b'/' {
                    is_closing = true;
                    pos += 1;
                } else if b.is_ascii_alphabetic() {
                    tag_start = pos;
                    state = State::TagName;
                } else {
                    // `<` followed by something that isn't a tag (e.g. `<!--`
                    // leftover from an unfiltered comment, or `<3`): bail
                    // back to TEXT without emitting anything.
                    state = State::Text;
                    pos += 1;
                }
            }
            State::TagName => {
                if !b.is_ascii_alphanumeric() && b != b'-' && b != b':' {
                    tag_name = as_str(tag_start, pos);
                    on_event(Event::TagOpen { name: tag_name, is_closing });
                    state = if b.is_ascii_whitespace() {
                        State::BeforeAttrName
                    } else {
                        State::TagClose
                    };
                } else {
                    pos += 1;
                }
            }
            State::BeforeAttrName => {
                if b.is_ascii_whitespace() {
                    pos += 1;
                } else if b == b'>' || b == b'/' {
                    state = State::TagClose;
                } else {
                    attr_name_start = pos;
                    state = State::AttrName;
                }
            }
            State::AttrName => {
                if !is_name_byte(b) {
                    attr_name = as_str(attr_name_start, pos);
                    state = State::AfterAttrName;
                } else {
                    pos += 1;
                }
            }
            State::AfterAttrName => {
                if b.is_ascii_whitespace() {
                    pos += 1;
                } else if b == b'=' {
                    state = State::BeforeAttrValue;
                    pos += 1;
                } else {
                    // Attribute with no value.
                    on_event(Event::Attribute { name: attr_name, value: None });
                    state = State::BeforeAttrName;
                }
            }
            State::BeforeAttrValue => {
                if b.is_ascii_whitespace() {
                    pos += 1;
                } else if b == b'"' {
                    pos += 1;
                    attr_value_start = pos;
                    state = State::AttrValueDq;
                } else if b == b'\'' {
                    pos += 1;
                    attr_value_start = pos;
                    state = State::AttrValueSq;
                } else {
                    attr_value_start = pos;
                    state = State::AttrValueUnquoted;
                }
            }
            State::AttrValueDq => {
                if b == b'"' {
                    let value = as_str(attr_value_start, pos);
                    on_event(Event::Attribute { name: attr_name, value: Some(value) });
                    state = State::BeforeAttrName;
                }
                pos += 1;
            }
            State::AttrValueSq => {
                if b == b'\'' {
                    let value = as_str(attr_value_start, pos);
                    on_event(Event::Attribute { name: attr_name, value: Some(value) });
                    state = State::BeforeAttrName;
                }
                pos += 1;
            }
            State::AttrValueUnquoted => {
                if b.is_ascii_whitespace() || b == b'>' {
                    let value = as_str(attr_value_start, pos);
                    on_event(Event::Attribute { name: attr_name, value: Some(value) });
                    state = if b == b'>' { State::TagClose } else { State::BeforeAttrName };
                } else {
                    pos += 1;
                }
            }
            State::TagClose => {
                if b == b'/' {
                    self_closing = true;
                    pos += 1;
                } else if b == b'>' {
                    on_event(Event::TagClose { name: tag_name, self_closing });
                    state = State::Text;
                    pos += 1;
                } else {
                    pos += 1;
                }
            }
        }
    }

    // Unterminated tag at EOF: close it out so callers see a consistent
    // open/close pair rather than losing the last anchor silently.
    match state {
        State::Text => {}
        State::AttrValueUnquoted => {
            let value = as_str(attr_value_start, len);
            on_event(Event::Attribute { name: attr_name, value: Some(value) });
            on_event(Event::TagClose { name: tag_name, self_closing });
        }
        State::AfterAttrName => {
            on_event(Event::Attribute { name: attr_name, value: None });
            on_event(Event::TagClose { name: tag_name, self_closing });
        }
        State::TagName => {
            on_event(Event::TagOpen { name: as_str(tag_start, len), is_closing });
        }
        _ => {
            on_event(Event::TagClose { name: tag_name, self_closing });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(html: &str) -> Vec<Event<'_>> {
        let mut out = Vec::new();
        tokenize(html.as_bytes(), |e| out.push(e));
        out
    }

    #[test]
    fn emits_tag_open_attribute_close() {
        let events = collect(r#"<a href="/x">text</a>"#);
        assert_eq!(events[0], Event::TagOpen { name: "a", is_closing: false });
        assert_eq!(events[1], Event::Attribute { name: "href", value: Some("/x") });
        assert_eq!(events[2], Event::TagClose { name: "a", self_closing: false });
        assert_eq!(events[3], Event::TagOpen { name: "a", is_closing: true });
        assert_eq!(events[4], Event::TagClose { name: "a", self_closing: false });
    }

    #[test]
    fn handles_self_closing_br() {
        let events = collect("text<br/>more");
        assert_eq!(events[0], Event::TagOpen { name: "br", is_closing: false });
        assert_eq!(events[1], Event::TagClose { name: "br", self_closing: true });
    }

    #[test]
    fn handles_unquoted_attribute_value() {
        let events = collect("<img src=foo.png>");
        assert_eq!(events[1], Event::Attribute { name: "src", value: Some("foo.png") });
    }

    #[test]
    fn handles_attribute_without_value() {
        let events = collect("<input disabled>");
        assert_eq!(events[1], Event::Attribute { name: "disabled", value: None });
    }

    #[test]
    fn handles_single_quoted_value() {
        let events = collect("<a href='/y'>");
        assert_eq!(events[1], Event::Attribute { name: "href", value: Some("/y") });
    }

    #[test]
    fn never_panics_on_unterminated_tag() {
        let events = collect("<a href=\"/x");
        assert!(!events.is_empty());
    }

    #[test]
    fn never_panics_on_malformed_input() {
        tokenize(b"<<<>>>\"'=", |_| {});
        tokenize(b"", |_| {});
        tokenize(&[0xff, 0xfe, b'<', b'a', b'>'], |_| {});
    }
}
