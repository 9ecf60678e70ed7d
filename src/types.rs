use serde::{Deserialize, Serialize};

/// One of the six activity buckets mirrored per user.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, clap::ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Saved,
    Created,
    Upvoted,
    Downvoted,
    Hidden,
    Awarded,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Saved,
        Category::Created,
        Category::Upvoted,
        Category::Downvoted,
        Category::Hidden,
        Category::Awarded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Saved => "saved",
            Self::Created => "created",
            Self::Upvoted => "upvoted",
            Self::Downvoted => "downvoted",
            Self::Hidden => "hidden",
            Self::Awarded => "awarded",
        }
    }

    /// Listings tracked for this category, each with its own cursor.
    ///
    /// `created` is the only category whose posts and comments come from
    /// separate listings; the others are a single listing, either mixed or
    /// posts-only.
    pub fn slots(&self) -> &'static [CursorSlot] {
        match self {
            Self::Saved | Self::Awarded => &[CursorSlot::Mixed],
            Self::Created => &[CursorSlot::Posts, CursorSlot::Comments],
            Self::Upvoted | Self::Downvoted | Self::Hidden => &[CursorSlot::Posts],
        }
    }

    /// Whether legacy backfill items can be queued for this category.
    pub fn accepts_imports(&self) -> bool {
        !matches!(self, Self::Awarded)
    }

    /// Slot whose cursor must be checked when an item of `kind` is removed.
    pub fn slot_for(&self, kind: ItemKind) -> CursorSlot {
        match self {
            Self::Saved | Self::Awarded => CursorSlot::Mixed,
            Self::Created => match kind {
                ItemKind::Post => CursorSlot::Posts,
                ItemKind::Comment => CursorSlot::Comments,
            },
            Self::Upvoted | Self::Downvoted | Self::Hidden => CursorSlot::Posts,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Which listing of a category a cursor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorSlot {
    Mixed,
    Posts,
    Comments,
}

impl CursorSlot {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mixed => "mixed",
            Self::Posts => "posts",
            Self::Comments => "comments",
        }
    }
}

impl std::fmt::Display for CursorSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Post,
    Comment,
}

impl ItemKind {
    /// Fullname prefix the platform assigns to this kind.
    pub fn fullname_prefix(&self) -> &'static str {
        match self {
            Self::Post => "t3_",
            Self::Comment => "t1_",
        }
    }

    pub fn fullname(&self, id: &str) -> String {
        format!("{}{}", self.fullname_prefix(), id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}
