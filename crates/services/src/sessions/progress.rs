/// Aggregated view of session progress, useful for UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionProgress {
    pub total: usize,
    pub answered: usize,
    pub remaining: usize,
    pub correct: u32,
    pub incorrect: u32,
    /// Zero-based presentation position of the current question.
    pub position: usize,
    pub is_complete: bool,
}
