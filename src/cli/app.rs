//! CLI module for the jmemos application
//!
//! This module handles the command-line interface for reading and writing
//! memos through the memo service.
use std::{
    fs::{self, read_to_string, OpenOptions},
    io::{stdin, stdout, Write},
    path::{Path, PathBuf},
    process::Command,
    sync::Arc,
};

use console::style;
use log::{info, warn};
use shell_words::split;
use tempfile::Builder;

use crate::{
    content_preview, memo::is_image_path, normalize_tag, parse_tags, render_export,
    upsert_attachment_links, AttachmentInput, Commands, Config, HeatmapCell, MemoError, MemoItem,
    MemoService, Result,
};

/// First line of every editor buffer; removed again when the editor closes.
const EDITOR_HINT: &str =
    "<!-- jmemos: write the memo below, then save and exit. This line is ignored. -->";

/// CLI Application handler - processes CLI commands and interfaces with MemoService
pub struct App {
    /// The memo service backend
    service: Arc<MemoService>,

    /// Application configuration
    config: Config,

    /// Where `config --set` and `config --reset` write to
    config_path: Option<PathBuf>,

    /// Whether to display verbose output
    verbose: bool,
}

impl App {
    /// Create a new CLI application with the given service and config
    pub fn new(
        service: Arc<MemoService>,
        config: Config,
        config_path: Option<PathBuf>,
        verbose: bool,
    ) -> Self {
        Self {
            service,
            config,
            config_path,
            verbose,
        }
    }

    /// Run the CLI application with the given command
    pub async fn run(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Add {
                content,
                file,
                edit,
                attach,
            } => self.handle_add(content, file, edit, attach)?,

            Commands::List {
                days,
                tag,
                limit,
                json,
                detailed,
            } => self.handle_list(days, tag, limit, json, detailed)?,

            Commands::Search {
                query,
                days,
                limit,
                json,
            } => self.handle_search(&query, days, limit, json)?,

            Commands::Edit { id, content, file } => self.handle_edit(&id, content, file)?,

            Commands::Delete { id, force } => self.handle_delete(&id, force)?,

            Commands::Heatmap { days, json } => self.handle_heatmap(days, json)?,

            Commands::Tags { days } => self.handle_tags(days)?,

            Commands::Export {
                output,
                format,
                days,
                tag,
            } => self.handle_export(&output, &format, days, tag)?,

            Commands::Watch => self.handle_watch().await?,

            Commands::Config { show, set, reset } => self.handle_config(show, set, reset)?,
        }

        Ok(())
    }

    fn stream_days(&self, days: Option<u32>) -> u32 {
        days.filter(|d| *d > 0)
            .unwrap_or_else(|| self.config.stream_window())
    }

    fn handle_add(
        &self,
        content: Option<String>,
        file: Option<PathBuf>,
        edit: bool,
        attach: Vec<PathBuf>,
    ) -> Result<()> {
        // Get content based on the provided options
        let mut text = match (content, file) {
            (Some(c), _) if !edit => c,
            (Some(c), _) => self.open_editor(&c)?,
            (None, Some(file_path)) => {
                let from_file = self.read_content_from_file(&file_path)?;
                if edit {
                    self.open_editor(&from_file)?
                } else {
                    from_file
                }
            }
            (None, None) if attach.is_empty() || edit => self.open_editor("")?,
            (None, None) => String::new(),
        };

        let mut paths = Vec::new();
        for file_path in &attach {
            let attachment = self.service.save_attachment(&read_attachment(file_path)?)?;
            if self.verbose {
                println!("Stored attachment {}", attachment.path);
            }
            paths.push(attachment.path);
        }
        if !paths.is_empty() {
            text = upsert_attachment_links(&text, paths.as_slice());
        }

        match self.service.append_memo(&text)? {
            Some(path) => println!("Memo added to {}", style(path).green()),
            None => println!("Nothing to add: the memo is empty."),
        }
        Ok(())
    }

    fn handle_list(
        &self,
        days: Option<u32>,
        tag: Option<String>,
        limit: usize,
        json: bool,
        detailed: bool,
    ) -> Result<()> {
        let days = self.stream_days(days);
        let wanted: Vec<String> = parse_tags(tag).iter().map(|t| normalize_tag(t)).collect();

        let mut memos: Vec<MemoItem> = self
            .service
            .stream_snapshot(days)?
            .into_iter()
            .filter(|memo| {
                wanted.is_empty()
                    || memo
                        .tags
                        .iter()
                        .any(|t| wanted.contains(&t.to_lowercase()))
            })
            .collect();

        if limit > 0 && memos.len() > limit {
            memos.truncate(limit);
        }

        if json {
            println!("{}", serde_json::to_string_pretty(&memos)?);
            return Ok(());
        }
        if memos.is_empty() {
            println!("No memos in the last {} days.", days);
            return Ok(());
        }
        self.display_memos_text(&memos, detailed);
        println!(
            "\nShowing {} memo{}",
            memos.len(),
            if memos.len() == 1 { "" } else { "s" }
        );
        Ok(())
    }

    /// Display memos in text format
    fn display_memos_text(&self, memos: &[MemoItem], detailed: bool) {
        // Use terminal width for formatting if available
        let term_width = terminal_size::terminal_size()
            .map(|(w, _)| w.0 as usize)
            .unwrap_or(80);

        for (i, memo) in memos.iter().enumerate() {
            // Add separator between memos (except before the first)
            if i > 0 {
                println!("{}", "-".repeat(term_width.min(50)));
            }

            println!(
                "{} {}",
                style(&memo.created_label).bold(),
                style(&memo.id).dim()
            );

            if !memo.tags.is_empty() {
                println!("Tags: {}", style(memo.tags.join(" ")).cyan());
            }

            if detailed {
                println!("\n{}", memo.content);
                for attachment in &memo.attachments {
                    println!("  {} {}", style("attachment:").dim(), attachment.path);
                }
            } else {
                let preview = content_preview(&memo.content, term_width.saturating_sub(10).max(20));
                if !preview.is_empty() {
                    println!("{}", preview);
                }
                if !memo.attachments.is_empty() {
                    println!(
                        "{}",
                        style(format!("({} attachments)", memo.attachments.len())).dim()
                    );
                }
            }
        }
    }

    fn handle_search(&self, query: &str, days: Option<u32>, limit: usize, json: bool) -> Result<()> {
        let mut results = self.service.search(query, self.stream_days(days))?;

        // Apply limit if specified (0 means no limit)
        if limit > 0 && results.len() > limit {
            results.truncate(limit);
        }

        let memos: Vec<MemoItem> = results.into_iter().map(|scored| scored.memo).collect();
        if json {
            println!("{}", serde_json::to_string_pretty(&memos)?);
            return Ok(());
        }

        if memos.is_empty() {
            println!("No memos found matching query: \"{}\"", query);
        } else {
            self.display_memos_text(&memos, false);
            println!("\nFound {} matching memos.", memos.len());
        }
        Ok(())
    }

    fn handle_edit(&self, id: &str, content: Option<String>, file: Option<PathBuf>) -> Result<()> {
        // Validate input - check for conflicting options
        if content.is_some() && file.is_some() {
            return Err(MemoError::ApplicationError {
                message: "Cannot specify both --content and --file options".to_string(),
            });
        }

        let memo = self.service.find_memo(id)?;
        let new_content = match (content, file) {
            (Some(c), _) => c,
            (None, Some(file_path)) => self.read_content_from_file(&file_path)?,
            (None, None) => self.open_editor(&memo.to_draft())?,
        };

        self.service.update_memo(&memo, &new_content)?;
        println!("Memo {} updated", style(&memo.id).green());
        Ok(())
    }

    fn handle_delete(&self, id: &str, force: bool) -> Result<()> {
        // Fetch the memo first, to verify it exists and show it in the prompt
        let memo = self.service.find_memo(id)?;

        if !force {
            println!("You are about to delete the following memo:");
            println!("ID:      {}", memo.id);
            println!("Created: {}", memo.created_label);
            if !memo.tags.is_empty() {
                println!("Tags:    {}", memo.tags.join(" "));
            }

            if !memo.content.is_empty() {
                let preview = memo.content.lines().take(2).collect::<Vec<_>>().join("\n");
                println!("\nContent preview:");
                println!(
                    "{}{}",
                    preview,
                    if memo.content.lines().count() > 2 {
                        "..."
                    } else {
                        ""
                    }
                );
            }

            // Ask for confirmation
            println!("\nThis action cannot be undone!");
            print!("Are you sure you want to delete this memo? [y/N]: ");
            stdout().flush()?;

            let mut input = String::new();
            stdin().read_line(&mut input)?;

            let input = input.trim().to_lowercase();
            if input != "y" && input != "yes" {
                println!("Deletion cancelled.");
                return Ok(());
            }
        }

        self.service.delete_memo(&memo)?;
        println!("Memo {} has been deleted.", memo.id);
        Ok(())
    }

    fn handle_heatmap(&self, days: Option<u32>, json: bool) -> Result<()> {
        let days = days
            .filter(|d| *d > 0)
            .unwrap_or_else(|| self.config.heatmap_window());
        let cells = self.service.heatmap_snapshot(days)?;

        if json {
            println!("{}", serde_json::to_string_pretty(&cells)?);
            return Ok(());
        }

        for week in cells.chunks(7) {
            let Some(first) = week.first() else {
                continue;
            };
            let row: String = week.iter().map(heat_symbol).collect::<Vec<_>>().join(" ");
            println!("{}  {}", style(&first.date_key).dim(), row);
        }

        let total: usize = cells.iter().map(|cell| cell.count).sum();
        let active = cells.iter().filter(|cell| cell.count > 0).count();
        println!(
            "\n{} memos on {} of the last {} days",
            style(total).bold(),
            active,
            cells.len()
        );
        Ok(())
    }

    fn handle_tags(&self, days: Option<u32>) -> Result<()> {
        let counts = self.service.tag_counts(self.stream_days(days))?;
        if counts.is_empty() {
            println!("No tags found.");
            return Ok(());
        }
        for (tag, count) in counts {
            println!("{:>5}  {}", count, style(tag).cyan());
        }
        Ok(())
    }

    fn handle_export(
        &self,
        output: &Path,
        format: &str,
        days: Option<u32>,
        tag: Option<String>,
    ) -> Result<()> {
        let days = self.stream_days(days);
        let memos = match tag {
            Some(tag) => self.service.memos_with_tag(&tag, days)?,
            None => self.service.stream_snapshot(days)?,
        };

        let rendered = render_export(&memos, format)?;
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(output, rendered)?;

        println!(
            "Exported {} memos to {}",
            memos.len(),
            style(output.display()).green()
        );
        Ok(())
    }

    async fn handle_watch(&self) -> Result<()> {
        let warmed = self.service.warm_cache().await?;
        println!("Indexed {} daily notes", warmed);

        let Some(watcher) = self.service.start_watcher(self.config.vault_dir.clone())? else {
            println!(
                "Change tracking is off. Enable it with {}",
                style("config --set watch_changes=true").cyan()
            );
            return Ok(());
        };
        println!(
            "Watching {} for changes. Press Ctrl-C to stop.",
            style(self.config.vault_dir.display()).green()
        );

        tokio::signal::ctrl_c().await?;
        watcher.stop().await;
        println!("Stopped watching.");
        Ok(())
    }

    fn handle_config(&self, show: bool, set: Option<String>, reset: bool) -> Result<()> {
        // Without other flags, show the configuration
        let show = show || (set.is_none() && !reset);
        let path = self
            .config_path
            .clone()
            .or_else(Config::default_path)
            .ok_or_else(|| MemoError::ConfigError {
                message: "Cannot determine the configuration file location".to_string(),
            })?;

        if reset {
            Config::default().save(&path)?;
            println!("Configuration reset to defaults at {}", path.display());
        }

        if let Some(assignment) = set {
            let mut config = Config::load(Some(&path))?;
            config.set(&assignment)?;
            config.save(&path)?;
            println!("Updated {}", style(assignment).green());
        }

        if show {
            let config = Config::load(Some(&path))?;
            println!("# {}", path.display());
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Ok(())
    }

    // Helper function for reading content from file
    fn read_content_from_file(&self, path: &Path) -> Result<String> {
        if !path.exists() {
            return Err(MemoError::FileNotFound {
                file_path: path.display().to_string(),
            });
        }

        if !path.is_file() {
            return Err(MemoError::ApplicationError {
                message: format!("Not a file: {}", path.display()),
            });
        }

        read_to_string(path).map_err(MemoError::Io)
    }

    fn open_editor(&self, initial: &str) -> Result<String> {
        // Create a temporary file with .md extension
        let temp_file = Builder::new().suffix(".md").tempfile()?;
        let temp_path = temp_file.path().to_path_buf();

        {
            let mut file = OpenOptions::new().write(true).open(&temp_path)?;
            writeln!(file, "{}", EDITOR_HINT)?;
            if !initial.is_empty() {
                writeln!(file, "{}", initial)?;
            }
        }

        let editor_cmd = self.config.get_editor_command();
        info!("Opening editor to write the memo. Save and exit when done...");
        self.launch_editor(&editor_cmd, &temp_path)?;

        let content = read_to_string(&temp_path)?;
        Ok(strip_editor_hint(&content))
    }

    fn launch_editor(&self, editor_cmd: &str, file_path: &Path) -> Result<()> {
        // Handle shell-like command parsing
        let args = split(editor_cmd).map_err(|e| MemoError::EditorError {
            message: format!("Failed to parse editor command: {}", e),
        })?;

        let Some((program, rest)) = args.split_first() else {
            return Err(MemoError::EditorError {
                message: "Empty editor command".to_string(),
            });
        };

        let status = Command::new(program)
            .args(rest)
            .arg(file_path)
            .status()
            .map_err(|e| MemoError::EditorError {
                message: format!("Failed to execute editor command '{}': {}", program, e),
            })?;

        if !status.success() {
            return Err(MemoError::EditorError {
                message: "Editor exited with non-zero status".to_string(),
            });
        }

        Ok(())
    }
}

fn strip_editor_hint(content: &str) -> String {
    content
        .lines()
        .filter(|line| line.trim() != EDITOR_HINT)
        .collect::<Vec<&str>>()
        .join("\n")
}

fn read_attachment(path: &Path) -> Result<AttachmentInput> {
    let data = fs::read(path).map_err(|e| {
        warn!("Cannot read attachment {}: {}", path.display(), e);
        MemoError::Io(e)
    })?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mime_type = if is_image_path(&name) {
        let ext = name.rsplit('.').next().unwrap_or_default().to_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => "image/jpeg".to_string(),
            "svg" => "image/svg+xml".to_string(),
            "tif" => "image/tiff".to_string(),
            other => format!("image/{}", other),
        }
    } else {
        String::new()
    };

    Ok(AttachmentInput {
        name,
        mime_type,
        data,
    })
}

fn heat_symbol(cell: &HeatmapCell) -> String {
    match cell.count {
        0 => style("·").dim().to_string(),
        1 => style("▪").green().to_string(),
        2..=3 => style("■").green().to_string(),
        _ => style("■").green().bold().to_string(),
    }
}
