//! Memo block codec.
//!
//! A memo lives in a markdown document as a fenced block:
//!
//! ````text
//! ```memos
//! created: 2024-03-10 09:30
//! Body text with #tags and ![[image.png]]
//! ```
//! ````
//!
//! [`serialize_block`] produces that text for new memos and
//! [`parse_block_body`] turns the body between the fences back into a
//! [`ParsedMemo`]. Older blocks may also carry a delimited attachment list,
//! which is read but never written.
use std::collections::HashSet;
use std::sync::LazyLock;

use log::trace;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::{date::parse_created_label, Attachment, AttachmentSource};

/// Opening fence of a memo block.
pub const FENCE_OPEN: &str = "```memos";
/// Closing fence of a memo block.
pub const FENCE_CLOSE: &str = "```";
/// Start marker of the legacy attachment sub-block.
pub const LEGACY_ATTACHMENTS_START: &str = "<!-- jm-attachments:start -->";
/// End marker of the legacy attachment sub-block.
pub const LEGACY_ATTACHMENTS_END: &str = "<!-- jm-attachments:end -->";
/// Prefix of one path line inside the legacy sub-block.
pub const LEGACY_ATTACHMENT_PREFIX: &str = "jm-attachment:";

static CREATED_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*created:\s*(.+)$").expect("valid created regex"));
static TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(^|[\s(])#([^\s#.,!?()\[\]{}"']+)"#).expect("valid tag regex")
});
static TAGS_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*tags:\s*(.*)$").expect("valid tags line regex"));
static LEGACY_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<!--\s*jm-attachments:start\s*-->\s*([\s\S]*?)\s*<!--\s*jm-attachments:end\s*-->")
        .expect("valid legacy block regex")
});
static LEGACY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*jm-attachment:\s*(.+?)\s*$").expect("valid legacy line regex")
});
static WIKI_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"!?\[\[([^\]|]+)(?:\|[^\]]+)?\]\]").expect("valid wiki link regex")
});
static WIKI_LINK_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"!?\[\[([^\]|]+)(?:\|[^\]]+)?\]\]\n?").expect("valid wiki link regex")
});
static MARKDOWN_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[[^\]]*]\((.+)\)$").expect("valid markdown link regex"));
static IMAGE_EXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\.(?:png|jpe?g|gif|webp|bmp|svg|avif|heic|heif|tiff?)$")
        .expect("valid image extension regex")
});

/// The structured content of one memo block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedMemo {
    pub created_at: i64,
    pub created_label: String,
    pub content: String,
    pub tags: Vec<String>,
    pub attachments: Vec<Attachment>,
}

/// CRLF to LF, outer whitespace trimmed.
pub fn normalize_content(content: &str) -> String {
    content.replace("\r\n", "\n").trim().to_string()
}

/// Serializes a memo into its canonical block text, terminated by a newline.
///
/// Returns `None` when the content is blank: there is nothing to write.
pub fn serialize_block(content: &str, created_label: &str) -> Option<String> {
    let normalized = normalize_content(content);
    if normalized.is_empty() {
        return None;
    }

    Some(
        [
            FENCE_OPEN,
            &format!("created: {}", created_label.trim()),
            &normalized,
            FENCE_CLOSE,
            "",
        ]
        .join("\n"),
    )
}

/// Parses the text between a block's fences.
///
/// Returns `None` when there is no `created:` line or its label does not
/// parse to an instant. Such blocks are not memos and are skipped silently.
pub fn parse_block_body(body: &str) -> Option<ParsedMemo> {
    let Some(created) = CREATED_LINE.captures(body) else {
        trace!("Skipping block without a created line");
        return None;
    };
    let created_label = created[1].trim().to_string();
    let Some(created_at) = parse_created_label(&created_label) else {
        trace!("Skipping block with unparsable created label: {}", created_label);
        return None;
    };

    let raw_content = CREATED_LINE.replace(body, "");
    let (body_content, legacy_attachments) = extract_legacy_attachments(raw_content.trim());
    let inline_attachments = extract_inline_attachments(&body_content);

    let mut seen = HashSet::new();
    let attachments: Vec<Attachment> = inline_attachments
        .into_iter()
        .chain(legacy_attachments)
        .filter(|attachment| seen.insert(attachment.path.clone()))
        .collect();

    let without_images = strip_image_links(&body_content);
    let (content, tags) = split_content_and_tags(without_images.trim());

    Some(ParsedMemo {
        created_at,
        created_label,
        content,
        tags,
        attachments,
    })
}

/// The first `created:` line of a block body, verbatim.
pub fn created_line(body: &str) -> Option<&str> {
    let found = CREATED_LINE.find(body)?;
    let text = found.as_str();
    let marker = text.find("created:")?;
    let line_start = text[..marker].rfind('\n').map_or(0, |pos| pos + 1);
    Some(text[line_start..].trim_end_matches('\r'))
}

/// The legacy attachment sub-block of a block body, verbatim.
pub fn legacy_attachment_block(body: &str) -> Option<&str> {
    LEGACY_BLOCK.find(body).map(|found| found.as_str())
}

/// Collects hashtags from free text, first occurrence order, no duplicates.
pub fn extract_tags(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    TAG.captures_iter(text)
        .filter_map(|caps| {
            let body = caps[2].trim();
            (!body.is_empty()).then(|| format!("#{}", body))
        })
        .filter(|tag| seen.insert(tag.clone()))
        .collect()
}

/// Whether a path names an image, ignoring any `#anchor` or `?query`.
pub fn is_image_path(path: &str) -> bool {
    let without_anchor = path.split('#').next().unwrap_or_default();
    let without_query = without_anchor.split('?').next().unwrap_or_default();
    IMAGE_EXT.is_match(without_query.trim())
}

/// Last path segment, or the path itself when that is empty.
pub fn file_name_from_path(path: &str) -> String {
    let normalized = path.replace('\\', "/");
    match normalized.rsplit('/').next().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => path.to_string(),
    }
}

/// Reads one attachment reference written as `![[path]]`, `[[path|alias]]`,
/// `[label](path)` or a bare path.
pub fn parse_attachment_path(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let wiki_inner = trimmed
        .strip_prefix("![[")
        .or_else(|| trimmed.strip_prefix("[["))
        .and_then(|rest| rest.strip_suffix("]]"));
    if let Some(inner) = wiki_inner {
        let target = inner.trim().split('|').next().unwrap_or_default().trim();
        return (!target.is_empty()).then(|| target.to_string());
    }

    if let Some(caps) = MARKDOWN_LINK.captures(trimmed) {
        let target = caps[1].trim();
        return (!target.is_empty()).then(|| target.to_string());
    }

    Some(trimmed.to_string())
}

/// Paths of image links in `content`, in order, without duplicates.
pub fn extract_image_link_paths(content: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    WIKI_LINK
        .captures_iter(content)
        .map(|caps| caps[1].trim().to_string())
        .filter(|path| !path.is_empty() && is_image_path(path))
        .filter(|path| seen.insert(path.clone()))
        .collect()
}

/// Paths listed in every legacy attachment sub-block of `text`.
pub fn extract_legacy_paths(text: &str) -> Vec<String> {
    let mut paths: Vec<String> = Vec::new();
    for block in LEGACY_BLOCK.captures_iter(text) {
        for line in LEGACY_LINE.captures_iter(&block[1]) {
            if let Some(path) = parse_attachment_path(&line[1]) {
                if !paths.contains(&path) {
                    paths.push(path);
                }
            }
        }
    }
    paths
}

/// Removes every legacy attachment sub-block, with trailing whitespace.
pub fn strip_legacy_blocks(text: &str) -> String {
    static BLOCK_WITH_TRAILING: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)<!--\s*jm-attachments:start\s*-->\s*[\s\S]*?\s*<!--\s*jm-attachments:end\s*-->\s*")
            .expect("valid legacy block regex")
    });
    BLOCK_WITH_TRAILING.replace_all(text, "").into_owned()
}

/// Removes image links (and the newline right after each) from `text`.
/// Links to other files stay as ordinary content.
pub fn strip_image_links(text: &str) -> String {
    WIKI_LINK_LINE
        .replace_all(text, |caps: &Captures| {
            if is_image_path(caps[1].trim()) {
                String::new()
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

fn attachment_for(path: String, is_image: bool, source: AttachmentSource) -> Attachment {
    Attachment {
        display_name: file_name_from_path(&path),
        path,
        is_image,
        source,
    }
}

fn extract_inline_attachments(content: &str) -> Vec<Attachment> {
    extract_image_link_paths(content)
        .into_iter()
        .map(|path| attachment_for(path, true, AttachmentSource::InlineLink))
        .collect()
}

fn extract_legacy_attachments(raw: &str) -> (String, Vec<Attachment>) {
    let Some(block) = LEGACY_BLOCK.captures(raw) else {
        return (raw.to_string(), Vec::new());
    };

    let mut seen = HashSet::new();
    let attachments = LEGACY_LINE
        .captures_iter(&block[1])
        .filter_map(|line| parse_attachment_path(&line[1]))
        .filter(|path| seen.insert(path.clone()))
        .map(|path| {
            let is_image = is_image_path(&path);
            attachment_for(path, is_image, AttachmentSource::LegacyBlock)
        })
        .collect();

    let content = LEGACY_BLOCK.replace(raw, "").trim().to_string();
    (content, attachments)
}

fn split_content_and_tags(raw: &str) -> (String, Vec<String>) {
    let mut content_lines = Vec::new();
    let mut tags: Vec<String> = Vec::new();

    for line in raw.split('\n').map(|line| line.trim_end_matches('\r')) {
        if let Some(caps) = TAGS_LINE.captures(line) {
            for tag in extract_tags(&caps[1]) {
                if !tags.contains(&tag) {
                    tags.push(tag);
                }
            }
            continue;
        }
        content_lines.push(line);
    }

    let content = content_lines.join("\n").trim().to_string();
    for tag in extract_tags(&content) {
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }

    (content, tags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn body_of(block: &str) -> &str {
        block
            .strip_prefix("```memos\n")
            .and_then(|rest| rest.strip_suffix("\n```\n"))
            .unwrap()
    }

    #[test]
    fn test_parse_standard_block() {
        let parsed =
            parse_block_body("created: 2023-10-27 10:00\nHello world, this is a test memo.").unwrap();
        assert_eq!(parsed.created_label, "2023-10-27 10:00");
        assert_eq!(parsed.content, "Hello world, this is a test memo.");
        assert!(parsed.tags.is_empty());
        assert!(parsed.attachments.is_empty());
    }

    #[test]
    fn test_parse_requires_created_line() {
        assert!(parse_block_body("Hello world").is_none());
        assert!(parse_block_body("created: not a date\nHello").is_none());
    }

    #[test]
    fn test_tags_inline() {
        let parsed = parse_block_body("created: 2023-10-27 10:00\nHello #world #test").unwrap();
        assert_eq!(parsed.tags, vec!["#world", "#test"]);
        assert_eq!(parsed.content, "Hello #world #test");
    }

    #[test]
    fn test_bare_hash_is_not_a_tag() {
        let parsed = parse_block_body("created: 2023-10-27 10:00\nNot a # tag").unwrap();
        assert!(parsed.tags.is_empty());
    }

    #[test]
    fn test_tag_token_rules() {
        assert_eq!(extract_tags("(#paren) a#b #c, #c"), vec!["#paren", "#c"]);
        assert_eq!(extract_tags("#one.#two"), vec!["#one"]);
        assert!(extract_tags("## heading").is_empty());
    }

    #[test]
    fn test_non_ascii_tags() {
        let parsed = parse_block_body("created: 2023-10-27 10:00\n你好 #世界").unwrap();
        assert_eq!(parsed.content, "你好 #世界");
        assert_eq!(parsed.tags, vec!["#世界"]);
    }

    #[test]
    fn test_tags_line_removed_from_content() {
        let parsed =
            parse_block_body("created: 2023-10-27 10:00\nTags: #work #idea\nShip it #work").unwrap();
        assert_eq!(parsed.content, "Ship it #work");
        assert_eq!(parsed.tags, vec!["#work", "#idea"]);
    }

    #[test]
    fn test_image_link_becomes_attachment() {
        let parsed =
            parse_block_body("created: 2023-10-27 10:00\nLook at this\n![[image.png]]").unwrap();
        assert_eq!(parsed.content, "Look at this");
        assert_eq!(parsed.attachments.len(), 1);
        let attachment = &parsed.attachments[0];
        assert_eq!(attachment.path, "image.png");
        assert_eq!(attachment.display_name, "image.png");
        assert!(attachment.is_image);
        assert_eq!(attachment.source, AttachmentSource::InlineLink);
    }

    #[test]
    fn test_aliased_and_nested_image_links() {
        let parsed = parse_block_body(
            "created: 2023-10-27 10:00\n![[Daily/_attachments/shot.JPG|300]]\nSee [[notes.md]]",
        )
        .unwrap();
        assert_eq!(parsed.content, "See [[notes.md]]");
        assert_eq!(parsed.attachments.len(), 1);
        assert_eq!(parsed.attachments[0].path, "Daily/_attachments/shot.JPG");
        assert_eq!(parsed.attachments[0].display_name, "shot.JPG");
    }

    #[test]
    fn test_legacy_attachment_block() {
        let body = "created: 2023-10-27 10:00\nMy Image\n<!-- jm-attachments:start -->\njm-attachment: image.png\njm-attachment: [[report.pdf]]\n<!-- jm-attachments:end -->";
        let parsed = parse_block_body(body).unwrap();
        assert_eq!(parsed.content, "My Image");
        assert_eq!(parsed.attachments.len(), 2);
        assert_eq!(parsed.attachments[0].path, "image.png");
        assert!(parsed.attachments[0].is_image);
        assert_eq!(parsed.attachments[0].source, AttachmentSource::LegacyBlock);
        assert_eq!(parsed.attachments[1].path, "report.pdf");
        assert!(!parsed.attachments[1].is_image);
    }

    #[test]
    fn test_inline_attachment_wins_over_legacy_duplicate() {
        let body = "created: 2023-10-27 10:00\n![[a.png]]\n<!-- jm-attachments:start -->\njm-attachment: b.png\njm-attachment: a.png\n<!-- jm-attachments:end -->";
        let parsed = parse_block_body(body).unwrap();
        let paths: Vec<_> = parsed.attachments.iter().map(|a| a.path.as_str()).collect();
        assert_eq!(paths, vec!["a.png", "b.png"]);
        assert_eq!(parsed.attachments[0].source, AttachmentSource::InlineLink);
        assert_eq!(parsed.content, "");
    }

    #[test]
    fn test_parse_is_idempotent() {
        let body = "created: 2024-01-02 08:15\r\nfirst line #a\r\n![[x.png]]\r\nsecond";
        assert_eq!(parse_block_body(body), parse_block_body(body));
    }

    #[test]
    fn test_serialize_block() {
        let block = serialize_block("  line one\r\nline two  \n", "2024-03-10 09:30").unwrap();
        assert_eq!(
            block,
            "```memos\ncreated: 2024-03-10 09:30\nline one\nline two\n```\n"
        );
    }

    #[test]
    fn test_serialize_blank_is_nothing() {
        assert_eq!(serialize_block(" \r\n\t", "2024-03-10 09:30"), None);
    }

    #[test]
    fn test_created_line_and_legacy_block_verbatim() {
        let body = "  created: 2024-03-10 09:30\r\ntext\n<!-- jm-attachments:start -->\njm-attachment: a.png\n<!-- jm-attachments:end -->";
        assert_eq!(created_line(body), Some("  created: 2024-03-10 09:30"));
        assert_eq!(
            legacy_attachment_block(body),
            Some("<!-- jm-attachments:start -->\njm-attachment: a.png\n<!-- jm-attachments:end -->")
        );
        assert_eq!(legacy_attachment_block("created: x"), None);
    }

    #[test]
    fn test_parse_attachment_path_forms() {
        assert_eq!(parse_attachment_path("![[a/b.png|alias]]").as_deref(), Some("a/b.png"));
        assert_eq!(parse_attachment_path("[[c.pdf]]").as_deref(), Some("c.pdf"));
        assert_eq!(parse_attachment_path("[label](d.png)").as_deref(), Some("d.png"));
        assert_eq!(parse_attachment_path(" e.png ").as_deref(), Some("e.png"));
        assert_eq!(parse_attachment_path("   "), None);
        assert_eq!(parse_attachment_path("[[ ]]"), None);
    }

    #[test]
    fn test_is_image_path_ignores_anchor_and_query() {
        assert!(is_image_path("pic.webp#center"));
        assert!(is_image_path("pic.TIFF?v=2"));
        assert!(!is_image_path("doc.pdf"));
        assert!(!is_image_path("png"));
    }

    fn label_strategy() -> impl Strategy<Value = String> {
        (1990i32..2100, 1u32..=12, 1u32..=28, 4u32..=23, 0u32..=59)
            .prop_map(|(y, mo, d, h, mi)| format!("{:04}-{:02}-{:02} {:02}:{:02}", y, mo, d, h, mi))
    }

    fn content_strategy() -> impl Strategy<Value = String> {
        prop::collection::vec("[a-zA-Z0-9 ,.]{0,30}", 1..5)
            .prop_map(|lines| lines.join("\n"))
            .prop_filter("non-blank", |content| !content.trim().is_empty())
    }

    proptest! {
        #[test]
        fn prop_serialize_parse_round_trip(content in content_strategy(), label in label_strategy()) {
            let block = serialize_block(&content, &label).unwrap();
            let parsed = parse_block_body(body_of(&block)).unwrap();
            prop_assert_eq!(parsed.content, content.trim());
            prop_assert_eq!(parsed.created_label, label);
            prop_assert!(parsed.attachments.is_empty());
        }
    }
}
