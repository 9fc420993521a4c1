use std::path::Path;

use log::{debug, error, trace};
use notify::EventKind;
use pulldown_cmark::{html, Options, Parser};

use crate::{
    cache::ParseCache, draft::render_attachment_links, resolver::DailyFileResolver,
    storage::vault_path_under, MemoError, MemoItem, Result,
};

/// Handles file system events by invalidating cached memos of changed
/// daily files. Returns how many cache entries were dropped.
///
/// Paths outside `root` are ignored. A rename carries both the old and the
/// new path, so both are invalidated.
pub fn handle_fs_event(
    event: &notify::Event,
    root: &Path,
    resolver: &DailyFileResolver,
    cache: &ParseCache,
) -> usize {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {
            let mut invalidated = 0;
            for path in &event.paths {
                let Some(vault_path) = vault_path_under(root, path) else {
                    continue;
                };
                // Files laid out by a template are not tracked but may
                // still be cached.
                if !resolver.is_tracked_path(&vault_path) && !cache.contains(&vault_path) {
                    trace!("Ignoring change to untracked {}", vault_path);
                    continue;
                }

                match cache.invalidate(&vault_path) {
                    Ok(true) => {
                        debug!("Dropped cached memos for changed file {}", vault_path);
                        invalidated += 1;
                    }
                    Ok(false) => {}
                    Err(e) => error!("Failed to invalidate {}: {}", vault_path, e),
                }
            }
            invalidated
        }
        _ => {
            // Ignore other events
            0
        }
    }
}

// Helper method for parsing tags
pub fn parse_tags(tags: Option<String>) -> Vec<String> {
    tags.map(|t| {
        t.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

/// First non-empty line of `content`, cut to `max_chars` characters.
pub fn content_preview(content: &str, max_chars: usize) -> String {
    let first_line = content
        .lines()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("")
        .trim();

    if first_line.chars().count() <= max_chars {
        first_line.to_string()
    } else {
        let cut: String = first_line.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

/// Renders memos as one markdown document, grouped by day in the order
/// given.
pub fn render_markdown_export(memos: &[MemoItem]) -> String {
    let mut out = String::from("# Memos\n");
    let mut current_day: Option<&str> = None;

    for memo in memos {
        if current_day != Some(memo.date_key.as_str()) {
            out.push_str(&format!("\n## {}\n", memo.date_key));
            current_day = Some(memo.date_key.as_str());
        }

        out.push_str(&format!("\n### {}\n\n", memo.created_label));
        if !memo.content.is_empty() {
            out.push_str(&memo.content);
            out.push('\n');
        }

        let links: Vec<&str> = memo.attachments.iter().map(|a| a.path.as_str()).collect();
        if !links.is_empty() {
            out.push('\n');
            out.push_str(&render_attachment_links(links.as_slice()));
            out.push('\n');
        }
    }
    out
}

/// Renders memos as a standalone HTML page.
pub fn render_html_export(memos: &[MemoItem]) -> String {
    let markdown = render_markdown_export(memos);
    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);
    options.insert(Options::ENABLE_TABLES);

    let mut body = String::new();
    html::push_html(&mut body, Parser::new_ext(&markdown, options));

    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>Memos</title>\n</head>\n<body>\n{}</body>\n</html>\n",
        body
    )
}

/// Renders memos in one of `markdown`, `json` or `html`.
pub fn render_export(memos: &[MemoItem], format: &str) -> Result<String> {
    match format.to_lowercase().as_str() {
        "markdown" | "md" => Ok(render_markdown_export(memos)),
        "json" => Ok(serde_json::to_string_pretty(memos)?),
        "html" => Ok(render_html_export(memos)),
        other => Err(MemoError::InvalidFormat {
            message: format!(
                "Invalid export format: {}. Must be one of: markdown, json, html",
                other
            ),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, time::SystemTime};

    use notify::event::{CreateKind, ModifyKind, RenameMode};

    use super::*;
    use crate::{Attachment, AttachmentSource};

    fn memo(date_key: &str, label: &str, content: &str) -> MemoItem {
        MemoItem {
            id: format!("Daily/{}.md:0", date_key),
            file_path: format!("Daily/{}.md", date_key),
            date_key: date_key.to_string(),
            created_at: 0,
            created_label: label.to_string(),
            content: content.to_string(),
            tags: Vec::new(),
            attachments: Vec::new(),
        }
    }

    #[test]
    fn test_fs_event_invalidates_tracked_paths() {
        let root = PathBuf::from("/vault");
        let resolver = DailyFileResolver::new("Daily", None);
        let cache = ParseCache::new();
        for path in ["Daily/2024-03-09.md", "Daily/2024-03-10.md", "Notes/todo.md"] {
            cache.insert(path, SystemTime::UNIX_EPOCH, Vec::new()).unwrap();
        }

        let rename = notify::Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(root.join("Daily/2024-03-09.md"))
            .add_path(root.join("Daily/2024-03-10.md"));
        assert_eq!(handle_fs_event(&rename, &root, &resolver, &cache), 2);

        let outside = notify::Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/elsewhere/Daily/2024-03-11.md"));
        assert_eq!(handle_fs_event(&outside, &root, &resolver, &cache), 0);

        let access = notify::Event::new(EventKind::Access(notify::event::AccessKind::Any))
            .add_path(root.join("Notes/todo.md"));
        assert_eq!(handle_fs_event(&access, &root, &resolver, &cache), 0);
        assert!(cache.contains("Notes/todo.md"));
    }

    #[test]
    fn test_content_preview() {
        assert_eq!(content_preview("\n\n  first line \nsecond", 100), "first line");
        assert_eq!(content_preview("héllo wörld", 5), "héllo...");
        assert_eq!(content_preview("", 10), "");
    }

    #[test]
    fn test_parse_tags() {
        assert_eq!(parse_tags(Some("a, b,,c ".to_string())), vec!["a", "b", "c"]);
        assert!(parse_tags(None).is_empty());
    }

    #[test]
    fn test_markdown_export_groups_by_day() {
        let mut with_image = memo("2024-03-10", "2024-03-10 09:00", "Breakfast");
        with_image.attachments.push(Attachment {
            path: "img/egg.png".to_string(),
            display_name: "egg.png".to_string(),
            is_image: true,
            source: AttachmentSource::InlineLink,
        });
        let memos = vec![
            with_image,
            memo("2024-03-10", "2024-03-10 08:00", "Woke up"),
            memo("2024-03-09", "2024-03-09 22:00", "Late"),
        ];

        assert_eq!(
            render_markdown_export(&memos),
            "# Memos\n\n## 2024-03-10\n\n### 2024-03-10 09:00\n\nBreakfast\n\n![[img/egg.png]]\n\
             \n### 2024-03-10 08:00\n\nWoke up\n\n## 2024-03-09\n\n### 2024-03-09 22:00\n\nLate\n"
        );
    }

    #[test]
    fn test_render_export_formats() {
        let memos = vec![memo("2024-03-10", "2024-03-10 09:00", "**bold** move")];

        let html = render_export(&memos, "html").unwrap();
        assert!(html.contains("<h2>2024-03-10</h2>"));
        assert!(html.contains("<strong>bold</strong>"));

        let json = render_export(&memos, "JSON").unwrap();
        let parsed: Vec<MemoItem> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, memos);

        assert!(matches!(
            render_export(&memos, "pdf"),
            Err(MemoError::InvalidFormat { .. })
        ));
    }
}
