//! Core data structures for the journal-memos application.
//!
//! This module contains the records produced by parsing daily notes, the
//! aggregates built from them and the CLI subcommands.
use std::path::PathBuf;

use clap::Subcommand;
use serde::{Deserialize, Serialize};

use crate::MemoError;

/// A specialized Result type for journal-memos operations.
pub type Result<T> = std::result::Result<T, MemoError>;

/// Where an attachment reference was declared inside a memo block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentSource {
    /// An `![[path]]` or `[[path]]` link in the body.
    InlineLink,
    /// A line of the legacy `jm-attachments` sub-block.
    LegacyBlock,
}

/// A file referenced from a memo's body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Vault-relative path, alias stripped
    pub path: String,
    /// Base name of the path
    pub display_name: String,
    pub is_image: bool,
    pub source: AttachmentSource,
}

/// Raw attachment bytes handed in by the caller for storage.
#[derive(Debug, Clone)]
pub struct AttachmentInput {
    /// Preferred file name, e.g. `Pasted image.png`
    pub name: String,
    /// Declared MIME type, may be empty
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// A memo as parsed out of one daily file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoItem {
    /// `file_path:byte_offset` of the block. Only valid until an earlier
    /// part of the file changes.
    pub id: String,
    pub file_path: String,
    pub date_key: String,
    /// Milliseconds since the Unix epoch
    pub created_at: i64,
    /// Timestamp text exactly as written in the block
    pub created_label: String,
    /// Body with the created line, tags line and image links removed
    pub content: String,
    /// Hashtags including the leading `#`, without duplicates
    pub tags: Vec<String>,
    pub attachments: Vec<Attachment>,
}

/// One day of the activity heatmap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeatmapCell {
    pub date_key: String,
    pub count: usize,
    pub file_path: Option<String>,
}

/// Stream and heatmap computed together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoSnapshot {
    pub stream: Vec<MemoItem>,
    pub heatmap: Vec<HeatmapCell>,
}

/// A daily file resolved from a date key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DailyFile {
    pub date_key: String,
    /// Vault-relative path
    pub path: String,
}

/// Available subcommands for the jmemos application
#[derive(Subcommand)]
pub enum Commands {
    /// Append a memo to today's daily note
    Add {
        /// Content of the memo, can be markdown formatted
        content: Option<String>,

        /// Path to a file containing the memo's content
        #[clap(short, long)]
        file: Option<PathBuf>,

        /// Open content in editor before saving
        #[clap(short, long)]
        edit: bool,

        /// Files to store as attachments and link from the memo
        #[clap(short, long)]
        attach: Vec<PathBuf>,
    },

    /// List recent memos, newest first
    List {
        /// Number of days to look back (defaults to the configured stream window)
        #[clap(short, long)]
        days: Option<u32>,

        /// Only show memos carrying one of these comma-separated tags
        #[clap(short, long)]
        tag: Option<String>,

        /// Limit the number of memos shown
        #[clap(short = 'n', long, default_value_t = 20)]
        limit: usize,

        /// Format output as JSON
        #[clap(short, long)]
        json: bool,

        /// Show full content instead of a one-line preview
        #[clap(short = 'D', long)]
        detailed: bool,
    },

    /// Fuzzy search memo content and tags
    Search {
        /// Search query text
        query: String,

        /// Number of days to look back
        #[clap(short, long)]
        days: Option<u32>,

        /// Limit the number of search results
        #[clap(short = 'n', long, default_value_t = 10)]
        limit: usize,

        /// Format output as JSON
        #[clap(short, long)]
        json: bool,
    },

    /// Replace the content of an existing memo
    Edit {
        /// ID of the memo to edit (`path:offset`)
        id: String,

        /// New content for the memo
        #[clap(short, long)]
        content: Option<String>,

        /// Path to a file containing the new memo content
        #[clap(short, long)]
        file: Option<PathBuf>,
    },

    /// Delete a memo by ID
    Delete {
        /// ID of the memo to delete (`path:offset`)
        id: String,

        /// Skip confirmation prompt
        #[clap(short, long)]
        force: bool,
    },

    /// Show memo counts per day
    Heatmap {
        /// Number of days to show (defaults to the configured heatmap window)
        #[clap(short, long)]
        days: Option<u32>,

        /// Format output as JSON
        #[clap(short, long)]
        json: bool,
    },

    /// List tags used in recent memos with their counts
    Tags {
        /// Number of days to look back
        #[clap(short, long)]
        days: Option<u32>,
    },

    /// Export recent memos
    Export {
        /// Path of the exported file
        #[clap(short, long)]
        output: PathBuf,

        /// Format to export to
        #[clap(short, long, value_parser = ["markdown", "json", "html"], default_value = "markdown")]
        format: String,

        /// Number of days to export
        #[clap(short, long)]
        days: Option<u32>,

        /// Filter memos by tag for export
        #[clap(short, long)]
        tag: Option<String>,
    },

    /// Watch the vault and report daily note changes until interrupted
    Watch,

    /// Configuration management
    Config {
        /// Show current configuration
        #[clap(short = 'S', long)]
        show: bool,

        /// Update a configuration setting (key=value)
        #[clap(short, long)]
        set: Option<String>,

        /// Reset configuration to defaults
        #[clap(short, long)]
        reset: bool,
    },
}
