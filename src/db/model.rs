//! View models returned by repositories.

/// What `append_media` did with the incoming item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// First item of the group; the caller owns the flush timer.
    Created,
    /// Added to a buffer that is still collecting.
    Appended,
    /// The group had already been flushed; the buffer restarted with this item.
    Restarted,
}

impl AppendOutcome {
    /// Whether the caller has to schedule a flush for the buffer.
    pub fn starts_window(&self) -> bool {
        !matches!(self, AppendOutcome::Appended)
    }
}

/// Rows removed by one sweep, per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeCounts {
    pub conversations: u64,
    pub media_groups: u64,
    pub pending_photo_adds: u64,
    pub seen_updates: u64,
}

impl PurgeCounts {
    pub fn total(&self) -> u64 {
        self.conversations + self.media_groups + self.pending_photo_adds + self.seen_updates
    }
}
