//! Mapping date keys to daily note paths and back.
use std::{collections::HashSet, sync::LazyLock};

use chrono::{Datelike, NaiveDate};
use globset::{GlobBuilder, GlobMatcher};
use log::{debug, warn};
use regex::Regex;

use crate::{
    date::{date_key_of, parse_date_key, recent_dates},
    storage::{normalize_vault_path, Vault},
    Config, DailyFile, Result,
};

static DAILY_NOTE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}\.md$").expect("valid daily name regex"));

/// Date placeholders a path template may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placeholder {
    YearMonthDay,
    YearMonth,
    Year,
    Month,
    Day,
}

impl Placeholder {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "{yyyy-MM-dd}" => Some(Self::YearMonthDay),
            "{yyyy-MM}" => Some(Self::YearMonth),
            "{yyyy}" => Some(Self::Year),
            "{MM}" => Some(Self::Month),
            "{dd}" => Some(Self::Day),
            _ => None,
        }
    }

    fn render(self, date: NaiveDate) -> String {
        match self {
            Self::YearMonthDay => date_key_of(date),
            Self::YearMonth => format!("{:04}-{:02}", date.year(), date.month()),
            Self::Year => format!("{:04}", date.year()),
            Self::Month => format!("{:02}", date.month()),
            Self::Day => format!("{:02}", date.day()),
        }
    }

    fn regex(self) -> &'static str {
        match self {
            Self::YearMonthDay => r"(\d{4})-(\d{2})-(\d{2})",
            Self::YearMonth => r"(\d{4})-(\d{2})",
            Self::Year => r"(\d{4})",
            Self::Month | Self::Day => r"(\d{2})",
        }
    }

    fn glob(self) -> &'static str {
        match self {
            Self::YearMonthDay => "[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]",
            Self::YearMonth => "[0-9][0-9][0-9][0-9]-[0-9][0-9]",
            Self::Year => "[0-9][0-9][0-9][0-9]",
            Self::Month | Self::Day => "[0-9][0-9]",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Date(Placeholder),
}

/// Whether the last path segment ends in a literal `.ext`.
fn has_extension(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.rsplit_once('.').is_some_and(|(stem, ext)| {
        !stem.is_empty() && !ext.is_empty() && !ext.contains(['{', '}'])
    })
}

/// Splits a template into literal text and date placeholders. `{folder}`
/// is substituted up front; unknown `{...}` tokens stay literal.
fn tokenize(template: &str, folder: &str) -> Vec<Segment> {
    let expanded = template.replace("{folder}", folder);
    let mut normalized = normalize_vault_path(&expanded);
    if !has_extension(&normalized) {
        normalized.push_str(".md");
    }

    let mut segments = Vec::new();
    let mut rest = normalized.as_str();
    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}').map(|pos| open + pos) else {
            break;
        };
        match Placeholder::parse(&rest[open..=close]) {
            Some(placeholder) => {
                if open > 0 {
                    segments.push(Segment::Literal(rest[..open].to_string()));
                }
                segments.push(Segment::Date(placeholder));
            }
            None => segments.push(Segment::Literal(rest[..=close].to_string())),
        }
        rest = &rest[close + 1..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Literal(rest.to_string()));
    }
    segments
}

/// Renders `template` for a date key, e.g. `{folder}/{yyyy}/{yyyy-MM-dd}.md`.
///
/// Duplicate separators collapse. A template whose file name has no
/// extension gets `.md`; any other extension is kept.
pub fn path_for(date_key: &str, template: &str, folder: &str) -> Result<String> {
    let date = parse_date_key(date_key)?;
    Ok(render(&tokenize(template, &normalize_vault_path(folder)), date))
}

fn render(segments: &[Segment], date: NaiveDate) -> String {
    let rendered: String = segments
        .iter()
        .map(|segment| match segment {
            Segment::Literal(text) => text.clone(),
            Segment::Date(placeholder) => placeholder.render(date),
        })
        .collect();
    normalize_vault_path(&rendered)
}

fn escape_glob(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '{' | '}' | '\\' | '!') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Resolves daily note paths for the configured folder and template.
#[derive(Debug, Clone)]
pub struct DailyFileResolver {
    folder: String,
    segments: Option<Vec<Segment>>,
    path_pattern: Option<Regex>,
    path_glob: Option<GlobMatcher>,
}

impl DailyFileResolver {
    /// A resolver for `folder`. Without a template, files live at
    /// `<folder>/<yyyy-MM-dd>.md`.
    pub fn new(folder: &str, template: Option<&str>) -> Self {
        let folder = normalize_vault_path(folder);
        let segments = template
            .map(str::trim)
            .filter(|template| !template.is_empty())
            .map(|template| tokenize(template, &folder));

        let path_pattern = segments.as_deref().and_then(|segments| {
            let pattern: String = segments
                .iter()
                .map(|segment| match segment {
                    Segment::Literal(text) => regex::escape(text),
                    Segment::Date(placeholder) => placeholder.regex().to_string(),
                })
                .collect();
            Regex::new(&format!("^{}$", pattern))
                .map_err(|e| warn!("Cannot invert path template: {}", e))
                .ok()
        });

        let path_glob = segments.as_deref().and_then(|segments| {
            let pattern: String = segments
                .iter()
                .map(|segment| match segment {
                    Segment::Literal(text) => escape_glob(text),
                    Segment::Date(placeholder) => placeholder.glob().to_string(),
                })
                .collect();
            GlobBuilder::new(&pattern)
                .literal_separator(true)
                .backslash_escape(true)
                .build()
                .map(|glob| glob.compile_matcher())
                .map_err(|e| warn!("Cannot build glob for path template: {}", e))
                .ok()
        });

        Self {
            folder,
            segments,
            path_pattern,
            path_glob,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.daily_notes_folder, config.template())
    }

    /// The normalized daily notes folder.
    pub fn folder(&self) -> &str {
        &self.folder
    }

    /// Path of the daily note for a date key.
    pub fn path_for(&self, date_key: &str) -> Result<String> {
        Ok(self.path_for_date(parse_date_key(date_key)?))
    }

    pub fn path_for_date(&self, date: NaiveDate) -> String {
        match &self.segments {
            Some(segments) => render(segments, date),
            None => normalize_vault_path(&format!("{}/{}.md", self.folder, date_key_of(date))),
        }
    }

    pub fn daily_file(&self, date: NaiveDate) -> DailyFile {
        DailyFile {
            date_key: date_key_of(date),
            path: self.path_for_date(date),
        }
    }

    /// Existing daily files for the `days` days ending at `base`, most
    /// recent first.
    ///
    /// A file shared by several days (e.g. a `{yyyy-MM}` template) appears
    /// once, under its most recent date key.
    pub fn files_for_window(&self, vault: &dyn Vault, days: i64, base: NaiveDate) -> Vec<DailyFile> {
        let mut seen = HashSet::new();
        recent_dates(days, base)
            .into_iter()
            .map(|date| self.daily_file(date))
            .filter(|file| seen.insert(file.path.clone()))
            .filter(|file| vault.exists(&file.path))
            .collect()
    }

    /// Whether a changed path should invalidate cached memos: a direct child
    /// of the daily folder named `yyyy-MM-dd.md`. The template is not
    /// consulted.
    pub fn is_tracked_path(&self, path: &str) -> bool {
        let normalized = normalize_vault_path(path);
        let file_name = if self.folder.is_empty() {
            normalized.as_str()
        } else {
            match normalized
                .strip_prefix(self.folder.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
            {
                Some(rest) => rest,
                None => return false,
            }
        };
        DAILY_NOTE_NAME.is_match(file_name)
    }

    /// Recovers the date key of a daily note path, from the template when
    /// one is set, otherwise from the file name.
    pub fn date_key_for_path(&self, path: &str) -> Option<String> {
        let normalized = normalize_vault_path(path);

        if let Some(pattern) = &self.path_pattern {
            if let Some(date) = pattern
                .captures(&normalized)
                .and_then(|caps| self.date_from_captures(&caps))
            {
                return Some(date_key_of(date));
            }
        }

        let file_name = normalized.rsplit('/').next().unwrap_or_default();
        let stem = file_name.strip_suffix(".md")?;
        parse_date_key(stem).ok().map(date_key_of)
    }

    fn date_from_captures(&self, caps: &regex::Captures<'_>) -> Option<NaiveDate> {
        let segments = self.segments.as_deref()?;
        let (mut year, mut month, mut day) = (None, None, None);
        let mut group = 1;
        let mut next = |caps: &regex::Captures<'_>| {
            let value = caps.get(group).and_then(|m| m.as_str().parse::<u32>().ok());
            group += 1;
            value
        };

        for segment in segments {
            let Segment::Date(placeholder) = segment else {
                continue;
            };
            match placeholder {
                Placeholder::YearMonthDay => {
                    year = year.or(next(caps));
                    month = month.or(next(caps));
                    day = day.or(next(caps));
                }
                Placeholder::YearMonth => {
                    year = year.or(next(caps));
                    month = month.or(next(caps));
                }
                Placeholder::Year => year = year.or(next(caps)),
                Placeholder::Month => month = month.or(next(caps)),
                Placeholder::Day => day = day.or(next(caps)),
            }
        }

        NaiveDate::from_ymd_opt(year? as i32, month?, day?)
    }

    /// Every daily note present in the vault: tracked direct children of
    /// the folder, plus files laid out by the template.
    pub fn indexed_daily_files(&self, vault: &dyn Vault) -> Result<Vec<DailyFile>> {
        let files: Vec<DailyFile> = vault
            .list_files(&self.folder)?
            .into_iter()
            .filter(|path| {
                self.is_tracked_path(path)
                    || self.path_glob.as_ref().is_some_and(|glob| glob.is_match(path))
            })
            .filter_map(|path| {
                let date_key = self.date_key_for_path(&path)?;
                Some(DailyFile { date_key, path })
            })
            .collect();

        debug!("Indexed {} daily files under '{}'", files.len(), self.folder);
        Ok(files)
    }
}
