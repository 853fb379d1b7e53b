//! Pure scoring rules for finished and abandoned sessions.

/// Outcome of scoring a session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score {
    pub total_questions: u32,
    pub correct_count: u32,
    pub incorrect_count: u32,
    /// Fraction in `[0, 1]`.
    pub score: f64,
    pub passed: bool,
}

/// Fraction of correct answers; zero for an empty session.
#[must_use]
pub fn fraction(correct: u32, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    f64::from(correct.min(total)) / f64::from(total)
}

/// Score a session that was finished normally.
#[must_use]
pub fn score_finished(
    correct_count: u32,
    incorrect_count: u32,
    total_questions: u32,
    passing_score: f64,
) -> Score {
    let score = fraction(correct_count, total_questions);
    Score {
        total_questions,
        correct_count,
        incorrect_count,
        score,
        passed: score >= passing_score,
    }
}

/// Score an abandoned session.
///
/// Every question without a correct answer counts as incorrect, including
/// unanswered ones, and the attempt never passes.
#[must_use]
pub fn score_abandoned(correct_count: u32, total_questions: u32) -> Score {
    let correct_count = correct_count.min(total_questions);
    Score {
        total_questions,
        correct_count,
        incorrect_count: total_questions - correct_count,
        score: fraction(correct_count, total_questions),
        passed: false,
    }
}
