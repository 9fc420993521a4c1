//! Helpers for editing memo text before it is written back.
use crate::{
    memo::{
        extract_image_link_paths, extract_legacy_paths, extract_tags, normalize_content,
        strip_image_links, strip_legacy_blocks,
    },
    AttachmentSource, MemoItem,
};

/// A draft split into its text and the attachments it references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    pub body: String,
    /// Image links first, then legacy sub-block paths, without duplicates
    pub attachment_paths: Vec<String>,
}

/// Separates a draft's body from its image links and legacy attachment
/// sub-blocks.
pub fn split_draft_and_attachment_paths(draft: &str) -> Draft {
    let normalized = draft.replace("\r\n", "\n");

    let mut attachment_paths = extract_image_link_paths(&normalized);
    for path in extract_legacy_paths(&normalized) {
        if !attachment_paths.contains(&path) {
            attachment_paths.push(path);
        }
    }

    let body = strip_image_links(&strip_legacy_blocks(&normalized))
        .trim_end()
        .to_string();

    Draft {
        body,
        attachment_paths,
    }
}

/// One `![[path]]` line per path.
pub fn render_attachment_links<S: AsRef<str>>(paths: &[S]) -> String {
    paths
        .iter()
        .map(|path| format!("![[{}]]", path.as_ref()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Appends a line of text to a draft. Blank text leaves the draft as is.
pub fn append_text_to_draft(draft: &str, text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        return draft.to_string();
    }

    let existing = draft.trim_end();
    if existing.is_empty() {
        text.to_string()
    } else {
        format!("{}\n{}", existing, text)
    }
}

/// Adds links for `paths` the draft does not reference yet.
///
/// Existing links are gathered below the body together with the new ones,
/// separated from it by a blank line.
pub fn upsert_attachment_links<S: AsRef<str>>(draft: &str, paths: &[S]) -> String {
    let Draft {
        body,
        mut attachment_paths,
    } = split_draft_and_attachment_paths(draft);

    let before = attachment_paths.len();
    for path in paths.iter().map(|p| p.as_ref().trim()) {
        if !path.is_empty() && !attachment_paths.iter().any(|known| known == path) {
            attachment_paths.push(path.to_string());
        }
    }
    if attachment_paths.len() == before {
        return draft.to_string();
    }

    let links = render_attachment_links(attachment_paths.as_slice());
    let body = body.trim_end();
    if body.is_empty() {
        links
    } else {
        format!("{}\n\n{}", body, links)
    }
}

impl MemoItem {
    /// Text to edit this memo with.
    ///
    /// Tags that only appeared on a `tags:` line come back as such a line and
    /// inline image attachments come back as links, so writing the draft
    /// over the memo keeps both. Legacy attachments stay in the block's
    /// preserved sub-block and are not repeated.
    pub fn to_draft(&self) -> String {
        let mut draft = normalize_content(&self.content);

        let inline_tags = extract_tags(&draft);
        let line_tags: Vec<&str> = self
            .tags
            .iter()
            .filter(|tag| !inline_tags.contains(*tag))
            .map(String::as_str)
            .collect();
        if !line_tags.is_empty() {
            draft = append_text_to_draft(&draft, &format!("tags: {}", line_tags.join(" ")));
        }

        let inline: Vec<&str> = self
            .attachments
            .iter()
            .filter(|attachment| attachment.source == AttachmentSource::InlineLink)
            .map(|attachment| attachment.path.as_str())
            .collect();
        upsert_attachment_links(&draft, inline.as_slice())
    }
}
