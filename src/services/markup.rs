//! Inline `<b>`/`<i>` markup to formatted runs.
//!
//! Tags toggle two independent flags as they are met; nothing checks that
//! they nest or even pair up. A stray `</b>` just clears bold for the rest of
//! the string. Only literal tags count: text that arrives entity-escaped
//! (`&lt;b&gt;`) is decoded to the characters it stands for and stays text.

use regex::Regex;
use std::sync::LazyLock;

static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?[bi]>").expect("tag pattern is valid"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    pub text: String,
    pub bold: bool,
    pub italic: bool,
}

/// Receives formatted runs in document order.
pub trait RunSink {
    fn push_run(&mut self, text: &str, bold: bool, italic: bool);
}

impl RunSink for Vec<Run> {
    fn push_run(&mut self, text: &str, bold: bool, italic: bool) {
        self.push(Run {
            text: text.to_string(),
            bold,
            italic,
        });
    }
}

pub fn render_markup<S: RunSink + ?Sized>(text: &str, sink: &mut S) {
    let mut bold = false;
    let mut italic = false;
    let mut pending = Pending::default();
    let mut last = 0;

    for tag in TAG.find_iter(text) {
        pending.push(&text[last..tag.start()], (bold, italic), sink);
        match tag.as_str() {
            "<b>" => bold = true,
            "</b>" => bold = false,
            "<i>" => italic = true,
            "</i>" => italic = false,
            _ => {}
        }
        last = tag.end();
    }
    pending.push(&text[last..], (bold, italic), sink);
    pending.flush(sink);
}

/// Buffers text until the formatting changes so equal spans come out as one run.
#[derive(Default)]
struct Pending {
    text: String,
    flags: (bool, bool),
}

impl Pending {
    fn push<S: RunSink + ?Sized>(&mut self, segment: &str, flags: (bool, bool), sink: &mut S) {
        if segment.is_empty() {
            return;
        }
        if self.flags != flags {
            self.flush(sink);
            self.flags = flags;
        }
        self.text.push_str(&html_escape::decode_html_entities(segment));
    }

    fn flush<S: RunSink + ?Sized>(&mut self, sink: &mut S) {
        if !self.text.is_empty() {
            sink.push_run(&self.text, self.flags.0, self.flags.1);
            self.text.clear();
        }
    }
}

pub fn parse_runs(text: &str) -> Vec<Run> {
    let mut runs = Vec::new();
    render_markup(text, &mut runs);
    runs
}

/// Plain text with every tag removed.
pub fn strip_markup(text: &str) -> String {
    parse_runs(text).into_iter().map(|run| run.text).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(text: &str, bold: bool, italic: bool) -> Run {
        Run {
            text: text.to_string(),
            bold,
            italic,
        }
    }

    #[test]
    fn plain_text_is_a_single_run() {
        assert_eq!(parse_runs("just words"), vec![run("just words", false, false)]);
        assert!(parse_runs("").is_empty());
    }

    #[test]
    fn sibling_tags_toggle_independently() {
        assert_eq!(
            parse_runs("<b>x</b><i>y</i>"),
            vec![run("x", true, false), run("y", false, true)]
        );
    }

    #[test]
    fn nested_tags_combine_flags() {
        assert_eq!(
            parse_runs("<b>a<i>b</i>c</b>"),
            vec![
                run("a", true, false),
                run("b", true, true),
                run("c", true, false)
            ]
        );
    }

    #[test]
    fn well_formed_text_round_trips_without_tags() {
        let input = "The <b>cell</b> is the <i>basic</i> unit of <b>life</b>.";
        let runs = parse_runs(input);
        let joined: String = runs.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(joined, "The cell is the basic unit of life.");
        assert_eq!(runs[1], run("cell", true, false));
        assert_eq!(runs[3], run("basic", false, true));
        assert_eq!(runs[5], run("life", true, false));
    }

    #[test]
    fn escaped_tags_stay_literal() {
        assert_eq!(
            parse_runs("&lt;b&gt;x&lt;/b&gt;"),
            vec![run("<b>x</b>", false, false)]
        );
    }

    #[test]
    fn crossed_and_unmatched_tags_just_toggle() {
        assert_eq!(
            parse_runs("<b>a<i>b</b>c</i>d"),
            vec![
                run("a", true, false),
                run("b", true, true),
                run("c", false, true),
                run("d", false, false)
            ]
        );
        assert_eq!(
            parse_runs("a</b>b<b>c"),
            vec![run("ab", false, false), run("c", true, false)]
        );
    }

    #[test]
    fn adjacent_spans_with_same_flags_merge() {
        assert_eq!(
            parse_runs("<b>one</b><b> two</b>"),
            vec![run("one two", true, false)]
        );
    }

    #[test]
    fn strip_markup_drops_tags_and_decodes_entities() {
        assert_eq!(strip_markup("<i>Cells</i> &amp; <b>Tissues</b>"), "Cells & Tissues");
    }
}
