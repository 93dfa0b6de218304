//! Minimal Markdown to ANSI for chat replies.
//!
//! Covers the structures models actually emit: headings, emphasis, inline
//! code, fenced blocks, lists, quotes, rules. Styling is a handful of SGR
//! codes; no color theme and no syntax highlighting.

use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};

const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const ITALIC: &str = "\x1b[3m";
const UNDERLINE: &str = "\x1b[4m";
const STRIKETHROUGH: &str = "\x1b[9m";
const CYAN: &str = "\x1b[36m";
const RESET: &str = "\x1b[0m";

/// Renders markdown to a styled string ending with exactly one newline.
pub fn render_ansi(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);
    let mut renderer = Renderer::default();
    for event in Parser::new_ext(markdown, options) {
        renderer.handle(event);
    }
    renderer.finish()
}

#[derive(Default)]
struct Renderer {
    out: String,
    styles: Vec<&'static str>,
    lists: Vec<Option<u64>>,
    quote_depth: usize,
    in_code_block: bool,
    at_item_start: bool,
}

impl Renderer {
    fn handle(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.start_tag(tag),
            Event::End(tag) => self.end_tag(tag),
            Event::Text(text) => {
                if self.in_code_block {
                    self.push_code_lines(&text);
                } else {
                    self.push_styled(&text);
                }
            }
            Event::Code(code) => {
                self.out.push_str(CYAN);
                self.out.push_str(&code);
                self.out.push_str(RESET);
            }
            Event::SoftBreak | Event::HardBreak => {
                self.out.push('\n');
                self.push_prefix();
            }
            Event::Rule => {
                self.start_block();
                self.out.push_str(DIM);
                self.out.push_str("────────");
                self.out.push_str(RESET);
            }
            Event::Html(text) | Event::InlineHtml(text) => self.push_styled(&text),
            _ => {}
        }
    }

    fn start_tag(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Paragraph => {
                if !self.at_item_start {
                    self.start_block();
                    self.push_prefix();
                }
                self.at_item_start = false;
            }
            Tag::Heading { .. } => {
                self.start_block();
                self.styles.push(BOLD);
                self.styles.push(UNDERLINE);
            }
            Tag::BlockQuote(_) => {
                self.start_block();
                self.quote_depth += 1;
            }
            Tag::CodeBlock(_) => {
                self.start_block();
                self.in_code_block = true;
            }
            Tag::List(first) => {
                if self.lists.is_empty() {
                    self.start_block();
                }
                self.lists.push(first);
            }
            Tag::Item => {
                if !self.out.is_empty() && !self.out.ends_with('\n') {
                    self.out.push('\n');
                }
                self.push_item_prefix();
                let marker = match self.lists.last_mut() {
                    Some(Some(number)) => {
                        let marker = format!("{number}. ");
                        *number += 1;
                        marker
                    }
                    _ => "- ".to_string(),
                };
                self.out.push_str(&marker);
                self.at_item_start = true;
            }
            Tag::Emphasis => self.styles.push(ITALIC),
            Tag::Strong => self.styles.push(BOLD),
            Tag::Strikethrough => self.styles.push(STRIKETHROUGH),
            Tag::Link { .. } => self.styles.push(UNDERLINE),
            _ => {}
        }
    }

    fn end_tag(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Heading(_) => {
                self.styles.pop();
                self.styles.pop();
            }
            TagEnd::BlockQuote(_) => {
                self.quote_depth = self.quote_depth.saturating_sub(1);
            }
            TagEnd::CodeBlock => self.in_code_block = false,
            TagEnd::List(_) => {
                self.lists.pop();
            }
            TagEnd::Item => self.at_item_start = false,
            TagEnd::Emphasis | TagEnd::Strong | TagEnd::Strikethrough | TagEnd::Link => {
                self.styles.pop();
            }
            _ => {}
        }
    }

    /// Separates blocks with one blank line.
    fn start_block(&mut self) {
        if self.out.is_empty() || self.out.ends_with("\n\n") {
            return;
        }
        if self.out.ends_with('\n') {
            self.out.push('\n');
        } else {
            self.out.push_str("\n\n");
        }
    }

    /// Quote bars and list continuation indent for a fresh line.
    fn push_prefix(&mut self) {
        for _ in 0..self.quote_depth {
            self.out.push_str("│ ");
        }
        for _ in 0..self.lists.len() {
            self.out.push_str("  ");
        }
    }

    fn push_item_prefix(&mut self) {
        for _ in 0..self.quote_depth {
            self.out.push_str("│ ");
        }
        for _ in 0..self.lists.len().saturating_sub(1) {
            self.out.push_str("  ");
        }
    }

    fn push_styled(&mut self, text: &str) {
        if self.styles.is_empty() {
            self.out.push_str(text);
            return;
        }
        for code in &self.styles {
            self.out.push_str(code);
        }
        self.out.push_str(text);
        self.out.push_str(RESET);
    }

    fn push_code_lines(&mut self, text: &str) {
        for line in text.lines() {
            self.out.push_str("    ");
            self.out.push_str(DIM);
            self.out.push_str(line);
            self.out.push_str(RESET);
            self.out.push('\n');
        }
    }

    fn finish(mut self) -> String {
        let trimmed = self.out.trim_end().len();
        self.out.truncate(trimmed);
        self.out.push('\n');
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paragraphs_are_separated_by_blank_lines() {
        assert_eq!(render_ansi("one\n\ntwo"), "one\n\ntwo\n");
    }

    #[test]
    fn headings_are_bold_and_underlined() {
        let out = render_ansi("# Title\n\nbody");
        assert!(out.starts_with(&format!("{BOLD}{UNDERLINE}Title{RESET}")));
        assert!(out.ends_with("body\n"));
    }

    #[test]
    fn inline_code_is_colored() {
        assert_eq!(
            render_ansi("run `cargo` now"),
            format!("run {CYAN}cargo{RESET} now\n")
        );
    }

    #[test]
    fn emphasis_variants_style_their_spans() {
        let out = render_ansi("**bold** and *italic* and ~~gone~~");
        assert!(out.contains(&format!("{BOLD}bold{RESET}")));
        assert!(out.contains(&format!("{ITALIC}italic{RESET}")));
        assert!(out.contains(&format!("{STRIKETHROUGH}gone{RESET}")));
    }

    #[test]
    fn lists_render_bullets_and_ordinals() {
        let out = render_ansi("- first\n- second\n\n1. one\n2. two");
        assert!(out.contains("- first\n- second"));
        assert!(out.contains("1. one\n2. two"));
    }

    #[test]
    fn nested_lists_indent() {
        let out = render_ansi("- outer\n  - inner");
        assert!(out.contains("- outer\n  - inner"));
    }

    #[test]
    fn fenced_code_is_indented_and_dimmed() {
        assert_eq!(
            render_ansi("```\nlet x = 1;\n```"),
            format!("    {DIM}let x = 1;{RESET}\n")
        );
    }

    #[test]
    fn blockquotes_carry_a_bar_on_every_line() {
        assert_eq!(
            render_ansi("> quoted line\n> continues"),
            "│ quoted line\n│ continues\n"
        );
    }

    #[test]
    fn output_ends_with_exactly_one_newline() {
        assert_eq!(render_ansi("text\n\n\n"), "text\n");
        assert_eq!(render_ansi(""), "\n");
    }
}
