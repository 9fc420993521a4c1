use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{mpsc as std_mpsc, Arc},
    time::Duration,
};

use chrono::{DateTime, Local, NaiveDate};
use fuzzy_matcher::{skim::SkimMatcherV2, FuzzyMatcher};
use log::{debug, error, info, trace, warn};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    cache::ParseCache,
    date::{created_label, date_key, date_key_of_millis, parse_date_key, recent_dates},
    document::{append_block, append_block_in_section, split_memo_id, MemoDocument},
    handle_fs_event,
    memo::{file_name_from_path, is_image_path, normalize_content, serialize_block},
    resolver::DailyFileResolver,
    storage::{normalize_vault_path, Vault},
    Attachment, AttachmentInput, AttachmentSource, Config, DailyFile, HeatmapCell, MemoError,
    MemoItem, MemoSnapshot, Result,
};

/// Upper bound on `name-N.ext` candidates tried for one attachment.
const MAX_ATTACHMENT_SUFFIX: usize = 9999;

/// Keeps the vault watcher alive. Dropping it stops change tracking.
pub struct MemoWatcher {
    watcher: RecommendedWatcher,
    handle: JoinHandle<()>,
}

impl MemoWatcher {
    /// Stops watching and waits for the event task to finish.
    pub async fn stop(self) {
        let MemoWatcher { watcher, handle } = self;
        drop(watcher);
        if let Err(e) = handle.await {
            error!("File system watcher task failed: {}", e);
        }
        debug!("File system watcher stopped");
    }
}

/// A memo matched by a search, with its relevance score.
#[derive(Debug, Clone)]
pub struct ScoredMemo {
    pub memo: MemoItem,
    pub score: i64,
}

/// Reads, aggregates and rewrites the memos of a vault's daily notes.
pub struct MemoService {
    vault: Arc<dyn Vault>,
    config: Config,
    resolver: DailyFileResolver,
    cache: ParseCache,
}

impl MemoService {
    pub fn new(vault: Arc<dyn Vault>, config: Config) -> Self {
        let resolver = DailyFileResolver::from_config(&config);
        Self {
            vault,
            config,
            resolver,
            cache: ParseCache::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn resolver(&self) -> &DailyFileResolver {
        &self.resolver
    }

    /// The parse cache, shared with any running watcher.
    pub fn cache(&self) -> &ParseCache {
        &self.cache
    }

    pub fn invalidate(&self, path: &str) -> Result<bool> {
        self.cache.invalidate(&normalize_vault_path(path))
    }

    pub fn clear_cache(&self) -> Result<()> {
        self.cache.clear()
    }

    pub fn is_tracked_path(&self, path: &str) -> bool {
        self.resolver.is_tracked_path(path)
    }

    /// Memos of one daily file, from the cache while its modification time
    /// is unchanged.
    pub fn get_memos(&self, file: &DailyFile) -> Result<Vec<MemoItem>> {
        let mod_time = self.vault.stat_mod_time(&file.path)?;
        self.cache.get_or_compute(&file.path, mod_time, || {
            let text = self.vault.read_text(&file.path)?;
            let memos = MemoDocument::parse(&text).memos(&file.path, &file.date_key);
            trace!("Parsed {} memos from {}", memos.len(), file.path);
            Ok(memos)
        })
    }

    /// Memos of the last `days` days ending at `base`, newest first.
    ///
    /// Memos with equal timestamps keep their file order, and files are
    /// visited newest day first.
    pub fn stream_snapshot_at(&self, days: u32, base: NaiveDate) -> Result<Vec<MemoItem>> {
        let mut stream = Vec::new();
        for file in self
            .resolver
            .files_for_window(self.vault.as_ref(), i64::from(days), base)
        {
            stream.extend(self.get_memos(&file)?);
        }
        stream.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        debug!("Stream snapshot: {} memos over {} days", stream.len(), days);
        Ok(stream)
    }

    pub fn stream_snapshot(&self, days: u32) -> Result<Vec<MemoItem>> {
        self.stream_snapshot_at(days, Local::now().date_naive())
    }

    /// Memo counts for the last `days` days ending at `base`, oldest first.
    ///
    /// A file holding a single day counts all of its memos. When several
    /// days share one file, each memo counts toward the day it was created.
    pub fn heatmap_snapshot_at(&self, days: u32, base: NaiveDate) -> Result<Vec<HeatmapCell>> {
        let files: Vec<DailyFile> = recent_dates(i64::from(days), base)
            .into_iter()
            .rev()
            .map(|date| self.resolver.daily_file(date))
            .collect();
        let mut days_per_path: HashMap<&str, usize> = HashMap::new();
        for file in &files {
            *days_per_path.entry(file.path.as_str()).or_default() += 1;
        }

        let mut cells = Vec::new();
        for file in &files {
            let cell = if self.vault.exists(&file.path) {
                let memos = self.get_memos(file)?;
                let count = if days_per_path[file.path.as_str()] > 1 {
                    memos
                        .iter()
                        .filter(|memo| {
                            date_key_of_millis(memo.created_at).as_deref()
                                == Some(file.date_key.as_str())
                        })
                        .count()
                } else {
                    memos.len()
                };
                HeatmapCell {
                    count,
                    date_key: file.date_key.clone(),
                    file_path: Some(file.path.clone()),
                }
            } else {
                HeatmapCell {
                    date_key: file.date_key.clone(),
                    count: 0,
                    file_path: None,
                }
            };
            cells.push(cell);
        }
        Ok(cells)
    }

    pub fn heatmap_snapshot(&self, days: u32) -> Result<Vec<HeatmapCell>> {
        self.heatmap_snapshot_at(days, Local::now().date_naive())
    }

    /// Stream and heatmap over the configured windows.
    pub fn snapshot(&self) -> Result<MemoSnapshot> {
        let today = Local::now().date_naive();
        Ok(MemoSnapshot {
            stream: self.stream_snapshot_at(self.config.stream_window(), today)?,
            heatmap: self.heatmap_snapshot_at(self.config.heatmap_window(), today)?,
        })
    }

    /// Creates the daily file for `date_key` and its folders when missing.
    /// Returns the file's path.
    pub fn ensure_daily_file(&self, date_key: &str) -> Result<String> {
        let date = parse_date_key(date_key)?;
        let path = self.resolver.path_for_date(date);
        if self.vault.exists(&path) {
            return Ok(path);
        }

        if let Some((folder, _)) = path.rsplit_once('/') {
            self.vault.ensure_folder(folder)?;
        }
        match self.vault.create_file(&path, "") {
            Ok(()) => info!("Created daily file {}", path),
            Err(MemoError::FileAlreadyExists { .. }) => {}
            Err(e) => return Err(e),
        }
        Ok(path)
    }

    /// Appends a memo stamped with the current local time to today's file.
    pub fn append_memo(&self, content: &str) -> Result<Option<String>> {
        self.append_memo_at(content, Local::now())
    }

    /// Appends a memo stamped `now` to that day's file, creating the file
    /// when needed. Blank content writes nothing and returns `None`.
    pub fn append_memo_at(&self, content: &str, now: DateTime<Local>) -> Result<Option<String>> {
        let label = created_label(&now);
        let Some(block) = serialize_block(content, &label) else {
            debug!("Ignoring empty memo");
            return Ok(None);
        };

        let path = self.ensure_daily_file(&date_key(&now))?;
        let heading = self.config.section_heading();
        self.vault.atomic_transform(&path, &|text| {
            Ok(match heading {
                Some(heading) => append_block_in_section(text, heading, &block),
                None => append_block(text, &block),
            })
        })?;

        self.cache.invalidate(&path)?;
        info!("Appended memo to {}", path);
        Ok(Some(path))
    }

    /// Looks a memo up by its `path:offset` id.
    pub fn find_memo(&self, id: &str) -> Result<MemoItem> {
        let (path, _) = split_memo_id(id).ok_or_else(|| MemoError::InvalidMemoId {
            id: id.to_string(),
        })?;
        let path = normalize_vault_path(path);
        if !self.vault.exists(&path) {
            return Err(MemoError::FileNotFound { file_path: path });
        }

        let file = DailyFile {
            date_key: self.resolver.date_key_for_path(&path).unwrap_or_default(),
            path,
        };
        self.get_memos(&file)?
            .into_iter()
            .find(|memo| memo.id == id)
            .ok_or_else(|| MemoError::MemoNotFound { id: id.to_string() })
    }

    /// Replaces the content of `target`, keeping its created line and any
    /// legacy attachment list.
    pub fn update_memo(&self, target: &MemoItem, new_content: &str) -> Result<()> {
        if normalize_content(new_content).is_empty() {
            return Err(MemoError::EmptyContent);
        }

        let path = target.file_path.as_str();
        self.vault.atomic_transform(path, &|text| {
            let document = MemoDocument::parse(text);
            let span = document.locate(path, target)?;
            document.replace(&span, new_content)
        })?;

        self.cache.invalidate(path)?;
        info!("Updated memo {}", target.id);
        Ok(())
    }

    /// Removes `target` from its daily file.
    pub fn delete_memo(&self, target: &MemoItem) -> Result<()> {
        let path = target.file_path.as_str();
        self.vault.atomic_transform(path, &|text| {
            let document = MemoDocument::parse(text);
            let span = document.locate(path, target)?;
            Ok(document.delete(&span))
        })?;

        self.cache.invalidate(path)?;
        info!("Deleted memo {}", target.id);
        Ok(())
    }

    /// Folder attachments are stored in, with `{folder}` substituted.
    pub fn attachments_folder(&self) -> String {
        normalize_vault_path(
            &self
                .config
                .attachments_template()
                .replace("{folder}", self.resolver.folder()),
        )
    }

    /// Stores attachment bytes under the attachments folder. An existing
    /// file is never overwritten; the name gets a `-1`, `-2`, ... suffix.
    pub fn save_attachment(&self, input: &AttachmentInput) -> Result<Attachment> {
        let folder = self.attachments_folder();
        if !folder.is_empty() {
            self.vault.ensure_folder(&folder)?;
        }

        let name = sanitize_file_name(&input.name);
        let (stem, extension) = match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), format!(".{}", ext)),
            _ => (name.clone(), String::new()),
        };

        for suffix in 0..=MAX_ATTACHMENT_SUFFIX {
            let file_name = if suffix == 0 {
                name.clone()
            } else {
                format!("{}-{}{}", stem, suffix, extension)
            };
            let path = normalize_vault_path(&format!("{}/{}", folder, file_name));

            match self.vault.create_binary_file(&path, &input.data) {
                Ok(()) => {
                    info!("Saved attachment {} ({} bytes)", path, input.data.len());
                    return Ok(Attachment {
                        display_name: file_name_from_path(&path),
                        is_image: is_image_path(&path)
                            || input.mime_type.trim().to_lowercase().starts_with("image/"),
                        source: AttachmentSource::InlineLink,
                        path,
                    });
                }
                Err(MemoError::FileAlreadyExists { .. }) => {
                    trace!("Attachment name {} taken", path);
                }
                Err(e) => return Err(e),
            }
        }

        Err(MemoError::ApplicationError {
            message: format!("No free file name for attachment {}", name),
        })
    }

    /// Parses every daily file in the vault into the cache, a batch at a
    /// time, yielding to other tasks between batches. Returns the number of
    /// files visited. Files that fail to parse are logged and skipped.
    pub async fn warm_cache(&self) -> Result<usize> {
        let files = self.resolver.indexed_daily_files(self.vault.as_ref())?;
        let batch_size = self.config.batch_size();

        for batch in files.chunks(batch_size) {
            for file in batch {
                if let Err(e) = self.get_memos(file) {
                    warn!("Failed to warm cache for {}: {}", file.path, e);
                }
            }
            tokio::task::yield_now().await;
        }

        info!("Warmed cache with {} daily files", files.len());
        Ok(files.len())
    }

    /// Watches `root`, the vault's directory, and invalidates cached memos
    /// of daily files changed outside this service.
    ///
    /// Returns `None` without watching when `watch_changes` is off.
    pub fn start_watcher(&self, root: PathBuf) -> Result<Option<MemoWatcher>> {
        if !self.config.watch_changes {
            info!("Change tracking is disabled, not watching {}", root.display());
            return Ok(None);
        }

        // Create a standard mpsc channel for notify crate
        let (std_tx, std_rx) = std_mpsc::channel();

        // Create a tokio mpsc channel for async event handling
        let (tx, mut rx) = mpsc::channel(100);

        let mut watcher: RecommendedWatcher = Watcher::new(
            std_tx,
            notify::Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&root, RecursiveMode::Recursive)?;
        info!("Watching {} for changes", root.display());

        // Bridge the blocking notify channel into the tokio channel. The
        // bridge ends when the watcher is dropped.
        tokio::task::spawn_blocking(move || {
            while let Ok(event) = std_rx.recv() {
                if let Err(e) = tx.blocking_send(event) {
                    error!("Failed to forward file system event: {}", e);
                    break;
                }
            }
            debug!("File system event bridge task stopped");
        });

        let cache = self.cache.clone();
        let resolver = self.resolver.clone();
        let handle = tokio::spawn(async move {
            debug!("File system watcher event handler task started");
            while let Some(event) = rx.recv().await {
                match event {
                    Ok(event) => {
                        trace!("File system event: {:?}", event.kind);
                        handle_fs_event(&event, &root, &resolver, &cache);
                    }
                    Err(e) => error!("File system watcher error: {}", e),
                }
            }
            debug!("File system watcher event handler task stopped");
        });

        Ok(Some(MemoWatcher { watcher, handle }))
    }

    /// Fuzzy search over the memos of the last `days` days, best match
    /// first.
    pub fn search(&self, query: &str, days: u32) -> Result<Vec<ScoredMemo>> {
        info!("Searching memos with query: '{}'", query);
        let matcher = SkimMatcherV2::default();

        let mut matched: Vec<ScoredMemo> = self
            .stream_snapshot(days)?
            .into_iter()
            .filter_map(|memo| {
                let content_score = matcher.fuzzy_match(&memo.content, query).unwrap_or(0);
                let tag_score = matcher
                    .fuzzy_match(&memo.tags.join(" "), query)
                    .unwrap_or(0);
                let score = content_score + tag_score;
                (score > 0).then_some(ScoredMemo { memo, score })
            })
            .collect();

        // Stable: equal scores stay newest first
        matched.sort_by(|a, b| b.score.cmp(&a.score));
        debug!("Found {} matching memos", matched.len());
        Ok(matched)
    }

    /// Memos of the last `days` days carrying `tag`, with or without its
    /// leading `#`, compared case-insensitively.
    pub fn memos_with_tag(&self, tag: &str, days: u32) -> Result<Vec<MemoItem>> {
        let wanted = normalize_tag(tag);
        Ok(self
            .stream_snapshot(days)?
            .into_iter()
            .filter(|memo| memo.tags.iter().any(|t| t.to_lowercase() == wanted))
            .collect())
    }

    /// Tags used over the last `days` days with how many memos carry each,
    /// most used first.
    pub fn tag_counts(&self, days: u32) -> Result<Vec<(String, usize)>> {
        Ok(count_tags(&self.stream_snapshot(days)?))
    }
}

/// `#tag` in lower case.
pub fn normalize_tag(tag: &str) -> String {
    let trimmed = tag.trim().trim_start_matches('#');
    format!("#{}", trimmed.to_lowercase())
}

pub fn count_tags(memos: &[MemoItem]) -> Vec<(String, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for memo in memos {
        for tag in &memo.tags {
            *counts.entry(tag.as_str()).or_default() += 1;
        }
    }

    let mut counts: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(tag, count)| (tag.to_string(), count))
        .collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    counts
}

fn sanitize_file_name(name: &str) -> String {
    let base = file_name_from_path(name.trim());
    let cleaned: String = base
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '[' | ']' | '#' | '^' => '-',
            c if c.is_control() => '-',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_matches('.').to_string();
    if cleaned.is_empty() {
        "attachment".to_string()
    } else {
        cleaned
    }
}
