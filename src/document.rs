//! Locating and rewriting memo blocks inside a daily document.
//!
//! Everything here is pure: a document's full text goes in and the new full
//! text comes out, so the same code runs inside any atomic read-modify-write
//! the storage layer provides. Blocks are found by a line scanner that only
//! understands the memo fences, never full markdown.
use log::{debug, trace};

use crate::{
    memo::{self, normalize_content, ParsedMemo},
    MemoError, MemoItem, Result,
};

/// Byte range of one fenced memo block, fences included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSpan {
    /// Offset of the first byte of the opening fence line
    pub start: usize,
    /// Offset just past the closing fence (line break excluded)
    pub end: usize,
    open_end: usize,
    body_start: usize,
    body_end: usize,
    close_start: usize,
}

impl BlockSpan {
    /// Text between the fences.
    pub fn body<'a>(&self, text: &'a str) -> &'a str {
        &text[self.body_start..self.body_end]
    }

    /// The whole block, fences included.
    pub fn raw<'a>(&self, text: &'a str) -> &'a str {
        &text[self.start..self.end]
    }

    fn open_fence<'a>(&self, text: &'a str) -> &'a str {
        &text[self.start..self.open_end]
    }

    fn close_fence<'a>(&self, text: &'a str) -> &'a str {
        &text[self.close_start..self.end]
    }

    /// Line break used after the opening fence.
    fn line_ending(&self, text: &str) -> &'static str {
        if text[self.open_end..].starts_with("\r\n") {
            "\r\n"
        } else {
            "\n"
        }
    }
}

/// A block span together with its parsed memo.
#[derive(Debug, Clone)]
pub struct MemoSpan {
    pub span: BlockSpan,
    pub memo: ParsedMemo,
}

/// One document's text and the memo blocks found in it.
#[derive(Debug)]
pub struct MemoDocument<'a> {
    text: &'a str,
    spans: Vec<BlockSpan>,
}

impl<'a> MemoDocument<'a> {
    /// Scans `text` for memo blocks.
    pub fn parse(text: &'a str) -> Self {
        let spans = scan_blocks(text);
        trace!("Found {} memo blocks", spans.len());
        Self { text, spans }
    }

    pub fn text(&self) -> &'a str {
        self.text
    }

    /// Every fenced block, valid memo or not, in file order.
    pub fn spans(&self) -> &[BlockSpan] {
        &self.spans
    }

    /// Blocks that parse as memos, in file order.
    pub fn memo_spans(&self) -> Vec<MemoSpan> {
        self.spans
            .iter()
            .filter_map(|span| {
                memo::parse_block_body(span.body(self.text)).map(|memo| MemoSpan {
                    span: span.clone(),
                    memo,
                })
            })
            .collect()
    }

    /// Memo records for this document, with `id = file_path:start`.
    pub fn memos(&self, file_path: &str, date_key: &str) -> Vec<MemoItem> {
        self.memo_spans()
            .into_iter()
            .map(|MemoSpan { span, memo }| MemoItem {
                id: format!("{}:{}", file_path, span.start),
                file_path: file_path.to_string(),
                date_key: date_key.to_string(),
                created_at: memo.created_at,
                created_label: memo.created_label,
                content: memo.content,
                tags: memo.tags,
                attachments: memo.attachments,
            })
            .collect()
    }

    /// Finds the block holding `target`.
    ///
    /// The id's offset is tried first and wins outright when this is the
    /// id's file and a memo starts exactly there. Otherwise the first memo
    /// with the same created label, content and attachment paths is taken.
    /// Two identical memos in one file cannot be told apart; the earlier one
    /// is chosen.
    pub fn locate(&self, file_path: &str, target: &MemoItem) -> Result<BlockSpan> {
        let memo_spans = self.memo_spans();

        if let Some((id_path, offset)) = split_memo_id(&target.id) {
            if id_path == file_path {
                if let Some(found) = memo_spans.iter().find(|found| found.span.start == offset) {
                    trace!("Located memo {} by offset", target.id);
                    return Ok(found.span.clone());
                }
            }
        }

        let content = normalize_content(&target.content);
        let found = memo_spans.into_iter().find(|found| {
            found.memo.created_label == target.created_label
                && found.memo.content == content
                && found
                    .memo
                    .attachments
                    .iter()
                    .map(|attachment| &attachment.path)
                    .eq(target.attachments.iter().map(|attachment| &attachment.path))
        });

        match found {
            Some(found) => {
                debug!(
                    "Located memo {} by content at offset {}",
                    target.id, found.span.start
                );
                Ok(found.span)
            }
            None => Err(MemoError::MemoNotFound {
                id: target.id.clone(),
            }),
        }
    }

    /// Rewrites the block at `span` with new content.
    ///
    /// The fence lines, the `created:` line and any legacy attachment
    /// sub-block are kept verbatim; only the content between them changes.
    pub fn replace(&self, span: &BlockSpan, new_content: &str) -> Result<String> {
        let content = normalize_content(new_content);
        if content.is_empty() {
            return Err(MemoError::EmptyContent);
        }

        let body = span.body(self.text);
        let created = memo::created_line(body).ok_or_else(|| MemoError::InvalidFormat {
            message: format!("block at offset {} has no created line", span.start),
        })?;

        let newline = span.line_ending(self.text);
        let mut block = String::with_capacity(span.end - span.start + content.len());
        block.push_str(span.open_fence(self.text));
        block.push_str(newline);
        block.push_str(created);
        block.push_str(newline);
        block.push_str(&content.replace('\n', newline));
        if let Some(legacy) = memo::legacy_attachment_block(body) {
            block.push_str(newline);
            block.push_str(legacy);
        }
        block.push_str(newline);
        block.push_str(span.close_fence(self.text));

        Ok(format!(
            "{}{}{}",
            &self.text[..span.start],
            block,
            &self.text[span.end..]
        ))
    }

    /// Removes the block at `span`.
    ///
    /// Blank lines on either side of the cut collapse to at most one blank
    /// line; text with no blank line around the block is joined directly.
    /// A document left blank becomes empty; otherwise it ends with exactly
    /// one newline.
    pub fn delete(&self, span: &BlockSpan) -> String {
        let before = &self.text[..span.start];
        let after = &self.text[span.end..];
        let head = trim_trailing_blank_lines(before);
        let rest = trim_leading_blank_lines(after);
        let tail = trim_trailing_blank_lines(rest);

        // Each side keeps the line break of its own last/first line.
        let had_blank = before[head.len()..].matches('\n').count() > 1
            || after[..after.len() - rest.len()].matches('\n').count() > 1;

        match (head.is_empty(), tail.is_empty()) {
            (true, true) => String::new(),
            (false, true) => format!("{}\n", head),
            (true, false) => format!("{}\n", tail),
            (false, false) if had_blank => format!("{}\n\n{}\n", head, tail),
            (false, false) => format!("{}\n{}\n", head, tail),
        }
    }
}

/// Splits `path:offset`. The path may itself contain colons.
pub fn split_memo_id(id: &str) -> Option<(&str, usize)> {
    let (path, offset) = id.rsplit_once(':')?;
    let offset = offset.parse().ok()?;
    Some((path, offset))
}

/// Appends a block at the end of the document, adding a line break first
/// when the document does not already end with one.
pub fn append_block(text: &str, block: &str) -> String {
    let separator = if !text.is_empty() && !text.ends_with('\n') {
        "\n"
    } else {
        ""
    };
    format!("{}{}{}", text, separator, block)
}

/// Appends a block to the end of the section under `heading`.
///
/// The heading matches a whole line, case-insensitively, outside fenced
/// code. The section ends at the next heading of the same or a higher rank.
/// Without a matching heading, the heading and the block go to the end of
/// the document.
pub fn append_block_in_section(text: &str, heading: &str, block: &str) -> String {
    let heading = heading.trim();
    let wanted = heading.to_lowercase();
    let lines = scan_lines(text);

    let mut in_fence = false;
    let mut section: Option<usize> = None;
    let mut insert_at: Option<usize> = None;

    for line in &lines {
        let content = line.content(text);
        if is_fence_toggle(content) {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }

        match section {
            None => {
                if content.trim().to_lowercase() == wanted {
                    section = Some(heading_level(content).unwrap_or(6));
                }
            }
            Some(rank) => {
                if heading_level(content).is_some_and(|level| level <= rank) {
                    insert_at = Some(line.start);
                    break;
                }
            }
        }
    }

    if section.is_none() {
        debug!("Section heading '{}' not found, appending it", heading);
        let head = trim_trailing_blank_lines(text);
        return if head.is_empty() {
            format!("{}\n\n{}", heading, block)
        } else {
            format!("{}\n\n{}\n\n{}", head, heading, block)
        };
    }

    let split = insert_at.unwrap_or(text.len());
    let head = trim_trailing_blank_lines(&text[..split]);
    let tail = &text[split..];
    if tail.is_empty() {
        format!("{}\n\n{}", head, block)
    } else {
        format!("{}\n\n{}\n{}", head, block, tail)
    }
}

#[derive(Debug, Clone, Copy)]
struct Line {
    start: usize,
    /// End of the line's text, `\r` and `\n` excluded
    end: usize,
    /// Whether a `\n` follows the line
    terminated: bool,
}

impl Line {
    fn content<'a>(&self, text: &'a str) -> &'a str {
        &text[self.start..self.end]
    }
}

fn scan_lines(text: &str) -> Vec<Line> {
    let mut lines = Vec::new();
    let mut start = 0;
    while start < text.len() {
        let (raw_end, terminated) = match text[start..].find('\n') {
            Some(pos) => (start + pos, true),
            None => (text.len(), false),
        };
        let end = if text[start..raw_end].ends_with('\r') {
            raw_end - 1
        } else {
            raw_end
        };
        lines.push(Line {
            start,
            end,
            terminated,
        });
        start = raw_end + 1;
    }
    lines
}

fn scan_blocks(text: &str) -> Vec<BlockSpan> {
    let lines = scan_lines(text);
    let mut spans = Vec::new();
    let mut index = 0;

    while index < lines.len() {
        let open = lines[index];
        if !open.terminated || !is_open_fence(open.content(text)) {
            index += 1;
            continue;
        }

        let Some(close_offset) = lines[index + 1..]
            .iter()
            .position(|line| is_close_fence(line.content(text)))
        else {
            // Nothing closes this fence, and nothing can close a later one.
            break;
        };
        let close_index = index + 1 + close_offset;
        let close = lines[close_index];

        let body_start = lines[index + 1].start;
        let body_end = if close_index == index + 1 {
            body_start
        } else {
            lines[close_index - 1].end
        };

        spans.push(BlockSpan {
            start: open.start,
            end: close.end,
            open_end: open.end,
            body_start,
            body_end,
            close_start: close.start,
        });
        index = close_index + 1;
    }

    spans
}

fn is_horizontal_space(c: char) -> bool {
    c.is_whitespace() && c != '\n' && c != '\r'
}

fn is_open_fence(line: &str) -> bool {
    line.trim_start_matches([' ', '\t'])
        .strip_prefix(memo::FENCE_OPEN)
        .is_some_and(|rest| rest.chars().all(is_horizontal_space))
}

fn is_close_fence(line: &str) -> bool {
    line.trim_start_matches([' ', '\t'])
        .strip_prefix(memo::FENCE_CLOSE)
        .is_some_and(|rest| rest.chars().all(is_horizontal_space))
}

fn is_fence_toggle(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("```") || trimmed.starts_with("~~~")
}

fn heading_level(line: &str) -> Option<usize> {
    let trimmed = line.trim_start();
    let level = trimmed.chars().take_while(|&c| c == '#').count();
    if !(1..=6).contains(&level) {
        return None;
    }
    match trimmed[level..].chars().next() {
        None => Some(level),
        Some(c) if c == ' ' || c == '\t' => Some(level),
        Some(_) => None,
    }
}

/// Drops whitespace-only lines (and line breaks) from the end of `text`.
fn trim_trailing_blank_lines(text: &str) -> &str {
    let Some((last, c)) = text.char_indices().rev().find(|(_, c)| !c.is_whitespace()) else {
        return "";
    };
    let after = last + c.len_utf8();
    let line_end = text[after..].find('\n').map_or(text.len(), |pos| after + pos);
    text[..line_end].trim_end_matches('\r')
}

/// Drops whitespace-only lines from the start of `text`.
fn trim_leading_blank_lines(text: &str) -> &str {
    let Some(first) = text.find(|c: char| !c.is_whitespace()) else {
        return "";
    };
    let line_start = text[..first].rfind('\n').map_or(0, |pos| pos + 1);
    &text[line_start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memo::serialize_block;
    use proptest::prelude::*;

    fn block(label: &str, content: &str) -> String {
        serialize_block(content, label).unwrap()
    }

    fn three_blocks() -> String {
        format!(
            "{}\n{}\n{}",
            block("2024-03-10 09:00", "first"),
            block("2024-03-10 10:00", "second"),
            block("2024-03-10 11:00", "third")
        )
    }

    fn target(doc: &MemoDocument<'_>, index: usize) -> MemoItem {
        doc.memos("file.md", "2024-03-10").remove(index)
    }

    #[test]
    fn test_enumerate_in_file_order() {
        let text = format!("# Daily\n\n{}", three_blocks());
        let doc = MemoDocument::parse(&text);
        let memos = doc.memos("Daily/2024-03-10.md", "2024-03-10");
        let contents: Vec<_> = memos.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
        assert_eq!(memos[0].id, "Daily/2024-03-10.md:9");
        assert_eq!(&text[9..17], "```memos");
        assert_eq!(memos[0].date_key, "2024-03-10");
    }

    #[test]
    fn test_malformed_block_is_skipped() {
        let text = format!(
            "```memos\njust text\n```\n{}",
            block("2024-03-10 09:00", "valid")
        );
        let doc = MemoDocument::parse(&text);
        assert_eq!(doc.spans().len(), 2);
        let memos = doc.memos("f.md", "2024-03-10");
        assert_eq!(memos.len(), 1);
        assert_eq!(memos[0].content, "valid");
    }

    #[test]
    fn test_fences_tolerate_indent_and_trailing_space() {
        let text = "  ```memos  \r\ncreated: 2024-03-10 09:00\r\nhello\r\n\t```\t\r\nafter\n";
        let doc = MemoDocument::parse(text);
        assert_eq!(doc.spans().len(), 1);
        let span = &doc.spans()[0];
        assert_eq!(span.start, 0);
        assert_eq!(span.raw(text), "  ```memos  \r\ncreated: 2024-03-10 09:00\r\nhello\r\n\t```\t");
        assert_eq!(span.body(text), "created: 2024-03-10 09:00\r\nhello");
        assert_eq!(doc.memos("f.md", "d")[0].content, "hello");
    }

    #[test]
    fn test_other_fences_are_not_memos() {
        let text = "```rust\nfn main() {}\n```\n```memos\ncreated: 2024-03-10 09:00\nhi\n```";
        let doc = MemoDocument::parse(text);
        assert_eq!(doc.spans().len(), 1);
        assert_eq!(doc.memos("f.md", "d")[0].content, "hi");
    }

    #[test]
    fn test_unterminated_block_is_ignored() {
        let text = "```memos\ncreated: 2024-03-10 09:00\nnever closed\n";
        assert!(MemoDocument::parse(text).spans().is_empty());
    }

    #[test]
    fn test_locate_by_offset_wins_over_content_match() {
        let text = format!(
            "{}\n{}",
            block("2024-03-10 09:00", "same"),
            block("2024-03-10 09:00", "same")
        );
        let doc = MemoDocument::parse(&text);
        let second = target(&doc, 1);
        let span = doc.locate("file.md", &second).unwrap();
        assert_eq!(span.start, doc.spans()[1].start);
    }

    #[test]
    fn test_locate_falls_back_after_shift() {
        let text = three_blocks();
        let doc = MemoDocument::parse(&text);
        let second = target(&doc, 1);

        let shifted = format!("Intro line added later\n\n{}", text);
        let shifted_doc = MemoDocument::parse(&shifted);
        let span = shifted_doc.locate("file.md", &second).unwrap();
        assert_eq!(span.start, shifted_doc.spans()[1].start);
        assert_ne!(span.start, doc.spans()[1].start);
    }

    #[test]
    fn test_locate_ignores_offset_of_other_file() {
        let text = three_blocks();
        let doc = MemoDocument::parse(&text);
        let mut third = target(&doc, 2);
        third.id = format!("other.md:{}", doc.spans()[0].start);
        let span = doc.locate("file.md", &third).unwrap();
        assert_eq!(span.start, doc.spans()[2].start);
    }

    #[test]
    fn test_locate_fallback_requires_same_attachments() {
        let text = block("2024-03-10 09:00", "pic\n![[a.png]]");
        let doc = MemoDocument::parse(&text);
        let mut stale = target(&doc, 0);
        stale.id = "file.md:999".to_string();
        assert!(doc.locate("file.md", &stale).is_ok());

        stale.attachments.clear();
        assert!(matches!(
            doc.locate("file.md", &stale),
            Err(MemoError::MemoNotFound { .. })
        ));
    }

    #[test]
    fn test_locate_not_found() {
        let text = three_blocks();
        let doc = MemoDocument::parse(&text);
        let mut missing = target(&doc, 0);
        missing.id = "file.md:5000".to_string();
        missing.content = "edited elsewhere".to_string();
        assert!(matches!(
            doc.locate("file.md", &missing),
            Err(MemoError::MemoNotFound { id }) if id == "file.md:5000"
        ));
    }

    #[test]
    fn test_replace_keeps_created_line_and_legacy_block() {
        let text = "before\n```memos\ncreated: 2024-03-10 09:00\nold text\n<!-- jm-attachments:start -->\njm-attachment: a.png\n<!-- jm-attachments:end -->\n```\nafter\n";
        let doc = MemoDocument::parse(text);
        let span = doc.spans()[0].clone();
        let updated = doc.replace(&span, "  new text\r\n").unwrap();
        assert_eq!(
            updated,
            "before\n```memos\ncreated: 2024-03-10 09:00\nnew text\n<!-- jm-attachments:start -->\njm-attachment: a.png\n<!-- jm-attachments:end -->\n```\nafter\n"
        );

        let reparsed = MemoDocument::parse(&updated).memos("f.md", "d");
        assert_eq!(reparsed[0].content, "new text");
        assert_eq!(reparsed[0].attachments[0].path, "a.png");
    }

    #[test]
    fn test_replace_rejects_blank_content() {
        let text = block("2024-03-10 09:00", "x");
        let doc = MemoDocument::parse(&text);
        assert!(matches!(
            doc.replace(&doc.spans()[0], "  \n"),
            Err(MemoError::EmptyContent)
        ));
    }

    #[test]
    fn test_delete_only_block_leaves_empty_document() {
        let text = format!("\n\n{}\n\n", block("2024-03-10 09:00", "only"));
        let doc = MemoDocument::parse(&text);
        assert_eq!(doc.delete(&doc.spans()[0]), "");
    }

    #[test]
    fn test_delete_middle_of_three() {
        let text = format!(
            "{}\n\n\n{}\n\n{}\n\n",
            block("2024-03-10 09:00", "first"),
            block("2024-03-10 10:00", "second"),
            block("2024-03-10 11:00", "third")
        );
        let doc = MemoDocument::parse(&text);
        let result = doc.delete(&doc.spans()[1]);
        assert_eq!(
            result,
            format!(
                "{}\n{}",
                block("2024-03-10 09:00", "first"),
                block("2024-03-10 11:00", "third")
            )
        );
        assert!(!result.starts_with('\n'));
        assert!(result.ends_with("```\n") && !result.ends_with("\n\n"));
    }

    #[test]
    fn test_delete_without_blank_lines_adds_none() {
        let text = "intro\n```memos\ncreated: 2024-03-10 09:00\nx\n```\noutro\n";
        let doc = MemoDocument::parse(text);
        assert_eq!(doc.delete(&doc.spans()[0]), "intro\noutro\n");

        let text = "intro\n\n```memos\ncreated: 2024-03-10 09:00\nx\n```\noutro\n";
        let doc = MemoDocument::parse(text);
        assert_eq!(doc.delete(&doc.spans()[0]), "intro\n\noutro\n");
    }

    #[test]
    fn test_replace_keeps_crlf_line_endings() {
        let text = "before\r\n```memos\r\ncreated: 2024-03-10 09:00\r\nold\r\n```\r\nafter\r\n";
        let doc = MemoDocument::parse(text);
        let updated = doc.replace(&doc.spans()[0], "line one\nline two").unwrap();
        assert_eq!(
            updated,
            "before\r\n```memos\r\ncreated: 2024-03-10 09:00\r\nline one\r\nline two\r\n```\r\nafter\r\n"
        );
        assert_eq!(
            MemoDocument::parse(&updated).memos("f.md", "d")[0].content,
            "line one\nline two"
        );
    }

    #[test]
    fn test_delete_last_keeps_heading() {
        let text = format!("# 2024-03-10\n\n{}", block("2024-03-10 09:00", "gone"));
        let doc = MemoDocument::parse(&text);
        assert_eq!(doc.delete(&doc.spans()[0]), "# 2024-03-10\n");
    }

    #[test]
    fn test_append_block_separator() {
        let new_block = block("2024-03-10 09:00", "hi");
        assert_eq!(append_block("", &new_block), new_block);
        assert_eq!(append_block("text\n", &new_block), format!("text\n{}", new_block));
        assert_eq!(append_block("text", &new_block), format!("text\n{}", new_block));
    }

    #[test]
    fn test_append_in_existing_section() {
        let text = "# Day\n\n## Memos\n\nold\n\n\n## Tasks\n- [ ] thing\n";
        let new_block = block("2024-03-10 09:00", "hi");
        let result = append_block_in_section(text, "## memos", &new_block);
        assert_eq!(
            result,
            format!("# Day\n\n## Memos\n\nold\n\n{}\n## Tasks\n- [ ] thing\n", new_block)
        );
    }

    #[test]
    fn test_append_in_section_skips_lower_headings_and_fences() {
        let text = "## Memos\n### detail\n```memos\ncreated: 2024-03-10 08:00\n## not a heading\n```\n";
        let new_block = block("2024-03-10 09:00", "hi");
        let result = append_block_in_section(text, "## Memos", &new_block);
        assert_eq!(
            result,
            format!(
                "## Memos\n### detail\n```memos\ncreated: 2024-03-10 08:00\n## not a heading\n```\n\n{}",
                new_block
            )
        );
    }

    #[test]
    fn test_append_section_heading_missing() {
        let new_block = block("2024-03-10 09:00", "hi");
        assert_eq!(
            append_block_in_section("# Day\n\n", "## Memos", &new_block),
            format!("# Day\n\n## Memos\n\n{}", new_block)
        );
        assert_eq!(
            append_block_in_section("", "## Memos", &new_block),
            format!("## Memos\n\n{}", new_block)
        );
    }

    #[test]
    fn test_split_memo_id() {
        assert_eq!(split_memo_id("Daily/2024-03-10.md:42"), Some(("Daily/2024-03-10.md", 42)));
        assert_eq!(split_memo_id("C:/vault/x.md:7"), Some(("C:/vault/x.md", 7)));
        assert_eq!(split_memo_id("no-offset"), None);
        assert_eq!(split_memo_id("x.md:abc"), None);
    }

    proptest! {
        #[test]
        fn prop_replace_touches_only_the_span(
            prefix in "[a-z #\n]{0,40}",
            suffix in "[a-z #\n]{0,40}",
            content in "[a-z]{1,20}",
        ) {
            let text = format!("{}\n{}{}", prefix, block("2024-03-10 09:00", "old"), suffix);
            let doc = MemoDocument::parse(&text);
            let span = doc.spans()[0].clone();
            let updated = doc.replace(&span, &content).unwrap();
            prop_assert!(updated.starts_with(&text[..span.start]));
            prop_assert!(updated.ends_with(&text[span.end..]));
        }
    }
}
