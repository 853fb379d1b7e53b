use std::sync::Arc;

use rand::Rng;
use rand::seq::SliceRandom;

use assess_core::model::{DeckError, OptionOrder, QuestionDeck, TestDefinition};

/// Builds per-session question decks for a test definition.
///
/// Question order is shuffled for every fresh session. Option order is
/// shuffled per question only when the definition asks for it, and is never
/// persisted: resumed sessions get a new option order over the replayed
/// question order.
pub struct DeckBuilder {
    definition: Arc<TestDefinition>,
    shuffle_questions: bool,
}

impl DeckBuilder {
    #[must_use]
    pub fn new(definition: Arc<TestDefinition>) -> Self {
        Self {
            definition,
            shuffle_questions: true,
        }
    }

    /// Keep canonical question order instead of shuffling it.
    #[must_use]
    pub fn with_shuffle_questions(mut self, shuffle: bool) -> Self {
        self.shuffle_questions = shuffle;
        self
    }

    #[must_use]
    pub fn definition(&self) -> &Arc<TestDefinition> {
        &self.definition
    }

    /// Fresh presentation order plus option orders.
    ///
    /// # Errors
    ///
    /// Returns `DeckError` if the generated orders fail validation.
    pub fn build_fresh<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<QuestionDeck, DeckError> {
        let mut order: Vec<usize> = (0..self.definition.question_count()).collect();
        if self.shuffle_questions {
            order.as_mut_slice().shuffle(rng);
        }
        self.replay(order, rng)
    }

    /// Deck over a known presentation order with freshly drawn option orders.
    ///
    /// # Errors
    ///
    /// Returns `DeckError` if `order` is not a permutation of the canonical
    /// question positions.
    pub fn replay<R: Rng + ?Sized>(
        &self,
        order: Vec<usize>,
        rng: &mut R,
    ) -> Result<QuestionDeck, DeckError> {
        let option_orders = self.option_orders(&order, rng)?;
        QuestionDeck::from_parts(Arc::clone(&self.definition), order, option_orders)
    }

    fn option_orders<R: Rng + ?Sized>(
        &self,
        order: &[usize],
        rng: &mut R,
    ) -> Result<Vec<OptionOrder>, DeckError> {
        let questions = self.definition.questions();
        order
            .iter()
            .map(|&canonical| {
                let count = questions
                    .get(canonical)
                    .map(|q| q.option_count())
                    .ok_or(DeckError::NotABijection { len: order.len() })?;
                if !self.definition.randomize_answers() {
                    return Ok(OptionOrder::identity(count));
                }
                let mut perm: Vec<usize> = (0..count).collect();
                perm.as_mut_slice().shuffle(rng);
                OptionOrder::from_permutation(perm)
            })
            .collect()
    }
}
