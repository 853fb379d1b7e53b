use std::sync::Arc;

use thiserror::Error;

use crate::model::definition::TestDefinition;
use crate::model::ids::QuestionId;
use crate::model::question::Question;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DeckError {
    #[error("permutation of length {len} is not a bijection over [0, {len})")]
    NotABijection { len: usize },

    #[error("presentation order covers {got} questions, definition has {expected}")]
    OrderLengthMismatch { expected: usize, got: usize },

    #[error("option order for position {position} has {got} entries, question has {expected}")]
    OptionCountMismatch {
        position: usize,
        expected: usize,
        got: usize,
    },
}

fn is_bijection(perm: &[usize]) -> bool {
    let mut seen = vec![false; perm.len()];
    for &i in perm {
        match seen.get_mut(i) {
            Some(slot) if !*slot => *slot = true,
            _ => return false,
        }
    }
    true
}

//
// ─── OPTION ORDER ──────────────────────────────────────────────────────────────
//

/// Display-index ↔ canonical-index lookup for one question's options.
///
/// Held in memory for a single session only; the canonical index is what
/// gets persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionOrder {
    display_to_canonical: Vec<usize>,
    canonical_to_display: Vec<usize>,
}

impl OptionOrder {
    /// Options shown in canonical order.
    #[must_use]
    pub fn identity(len: usize) -> Self {
        let order: Vec<usize> = (0..len).collect();
        Self {
            display_to_canonical: order.clone(),
            canonical_to_display: order,
        }
    }

    /// Build from `perm[display] = canonical`.
    ///
    /// # Errors
    ///
    /// Returns `DeckError::NotABijection` if `perm` repeats or skips an index.
    pub fn from_permutation(perm: Vec<usize>) -> Result<Self, DeckError> {
        if !is_bijection(&perm) {
            return Err(DeckError::NotABijection { len: perm.len() });
        }
        let mut canonical_to_display = vec![0; perm.len()];
        for (display, &canonical) in perm.iter().enumerate() {
            canonical_to_display[canonical] = display;
        }
        Ok(Self {
            display_to_canonical: perm,
            canonical_to_display,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.display_to_canonical.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.display_to_canonical.is_empty()
    }

    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.display_to_canonical
            .iter()
            .enumerate()
            .all(|(i, &c)| i == c)
    }

    #[must_use]
    pub fn to_canonical(&self, display: usize) -> Option<usize> {
        self.display_to_canonical.get(display).copied()
    }

    #[must_use]
    pub fn to_display(&self, canonical: usize) -> Option<usize> {
        self.canonical_to_display.get(canonical).copied()
    }

    /// Canonical indices in display order.
    #[must_use]
    pub fn as_slice(&self) -> &[usize] {
        &self.display_to_canonical
    }
}

//
// ─── QUESTION DECK ─────────────────────────────────────────────────────────────
//

/// Per-session presentation of a test definition.
///
/// Questions are referenced by canonical position (`order[pos]` indexes into
/// `definition.questions()`); nothing is physically reordered.
#[derive(Debug, Clone)]
pub struct QuestionDeck {
    definition: Arc<TestDefinition>,
    order: Vec<usize>,
    option_orders: Vec<OptionOrder>,
}

impl QuestionDeck {
    /// Canonical question order with canonical option order.
    #[must_use]
    pub fn canonical(definition: Arc<TestDefinition>) -> Self {
        let order: Vec<usize> = (0..definition.question_count()).collect();
        let option_orders = definition
            .questions()
            .iter()
            .map(|q| OptionOrder::identity(q.option_count()))
            .collect();
        Self {
            definition,
            order,
            option_orders,
        }
    }

    /// Assemble a deck from a presentation order and per-position option orders.
    ///
    /// # Errors
    ///
    /// Returns `DeckError` if `order` is not a permutation of the definition's
    /// questions or an option order does not match its question.
    pub fn from_parts(
        definition: Arc<TestDefinition>,
        order: Vec<usize>,
        option_orders: Vec<OptionOrder>,
    ) -> Result<Self, DeckError> {
        let expected = definition.question_count();
        if order.len() != expected {
            return Err(DeckError::OrderLengthMismatch {
                expected,
                got: order.len(),
            });
        }
        if !is_bijection(&order) {
            return Err(DeckError::NotABijection { len: order.len() });
        }
        if option_orders.len() != expected {
            return Err(DeckError::OrderLengthMismatch {
                expected,
                got: option_orders.len(),
            });
        }
        for (position, (&canonical, opts)) in order.iter().zip(&option_orders).enumerate() {
            let count = definition.questions()[canonical].option_count();
            if opts.len() != count {
                return Err(DeckError::OptionCountMismatch {
                    position,
                    expected: count,
                    got: opts.len(),
                });
            }
        }

        Ok(Self {
            definition,
            order,
            option_orders,
        })
    }

    #[must_use]
    pub fn definition(&self) -> &Arc<TestDefinition> {
        &self.definition
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Question shown at presentation position `pos`.
    #[must_use]
    pub fn question(&self, pos: usize) -> Option<&Question> {
        self.order
            .get(pos)
            .and_then(|&canonical| self.definition.questions().get(canonical))
    }

    #[must_use]
    pub fn option_order(&self, pos: usize) -> Option<&OptionOrder> {
        self.option_orders.get(pos)
    }

    /// Questions in presentation order.
    pub fn questions(&self) -> impl Iterator<Item = &Question> + '_ {
        self.order
            .iter()
            .map(|&canonical| &self.definition.questions()[canonical])
    }

    #[must_use]
    pub fn question_ids(&self) -> Vec<QuestionId> {
        self.questions().map(Question::id).collect()
    }

    #[must_use]
    pub fn to_canonical(&self, pos: usize, display: usize) -> Option<usize> {
        self.option_orders.get(pos)?.to_canonical(display)
    }

    #[must_use]
    pub fn to_display(&self, pos: usize, canonical: usize) -> Option<usize> {
        self.option_orders.get(pos)?.to_display(canonical)
    }

    /// Option labels for position `pos`, in display order.
    #[must_use]
    pub fn display_options(&self, pos: usize) -> Option<Vec<&str>> {
        let question = self.question(pos)?;
        let opts = self.option_orders.get(pos)?;
        Some(
            opts.as_slice()
                .iter()
                .map(|&c| question.options()[c].as_str())
                .collect(),
        )
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TestId;

    fn definition(option_counts: &[usize]) -> Arc<TestDefinition> {
        let questions = option_counts
            .iter()
            .enumerate()
            .map(|(i, &n)| {
                let id = u64::try_from(i).unwrap() + 1;
                let options = (0..n).map(|o| format!("q{id}o{o}")).collect();
                Question::new(QuestionId::new(id), format!("Q{id}"), options, 0).unwrap()
            })
            .collect();
        Arc::new(TestDefinition::new(TestId::new(1), "T", questions, 0.5, 1, true).unwrap())
    }

    #[test]
    fn option_order_is_a_bijection_both_ways() {
        for n in 2..8 {
            let perm: Vec<usize> = (0..n).rev().collect();
            let order = OptionOrder::from_permutation(perm).unwrap();
            for display in 0..n {
                let canonical = order.to_canonical(display).unwrap();
                assert_eq!(order.to_display(canonical), Some(display));
            }
            assert_eq!(order.to_canonical(n), None);
        }
    }

    #[test]
    fn option_order_rejects_non_permutations() {
        assert!(OptionOrder::from_permutation(vec![0, 0, 1]).is_err());
        assert!(OptionOrder::from_permutation(vec![0, 3, 1]).is_err());
        assert!(OptionOrder::from_permutation(vec![]).unwrap().is_empty());
    }

    #[test]
    fn identity_maps_to_itself() {
        let order = OptionOrder::identity(4);
        assert!(order.is_identity());
        assert_eq!(order.to_canonical(2), Some(2));
    }

    #[test]
    fn deck_resolves_positions_through_order() {
        let def = definition(&[2, 3, 2]);
        let deck = QuestionDeck::from_parts(
            Arc::clone(&def),
            vec![2, 0, 1],
            vec![
                OptionOrder::from_permutation(vec![1, 0]).unwrap(),
                OptionOrder::identity(2),
                OptionOrder::from_permutation(vec![2, 0, 1]).unwrap(),
            ],
        )
        .unwrap();

        assert_eq!(
            deck.question_ids(),
            vec![QuestionId::new(3), QuestionId::new(1), QuestionId::new(2)]
        );
        assert_eq!(deck.display_options(0).unwrap(), vec!["q3o1", "q3o0"]);
        assert_eq!(deck.to_canonical(2, 0), Some(2));
        assert_eq!(deck.to_display(2, 2), Some(0));
        assert!(deck.question(3).is_none());
    }

    #[test]
    fn deck_rejects_mismatched_parts() {
        let def = definition(&[2, 3]);
        let err = QuestionDeck::from_parts(
            Arc::clone(&def),
            vec![0, 0],
            vec![OptionOrder::identity(2), OptionOrder::identity(3)],
        )
        .unwrap_err();
        assert!(matches!(err, DeckError::NotABijection { .. }));

        let err = QuestionDeck::from_parts(
            Arc::clone(&def),
            vec![1, 0],
            vec![OptionOrder::identity(2), OptionOrder::identity(2)],
        )
        .unwrap_err();
        assert_eq!(
            err,
            DeckError::OptionCountMismatch {
                position: 0,
                expected: 3,
                got: 2
            }
        );
    }

    #[test]
    fn canonical_deck_matches_definition() {
        let def = definition(&[2, 2]);
        let deck = QuestionDeck::canonical(Arc::clone(&def));
        assert_eq!(deck.len(), 2);
        assert!(deck.option_order(0).unwrap().is_identity());
        assert_eq!(deck.question(1).unwrap().id(), QuestionId::new(2));
    }
}
