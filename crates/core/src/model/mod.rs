mod answer;
mod deck;
mod definition;
mod ids;
mod question;
mod result;
mod snapshot;
mod status;

pub use ids::{ParseIdError, QuestionId, TestId};

pub use answer::{AnswerError, AnswerRecord};
pub use deck::{DeckError, OptionOrder, QuestionDeck};
pub use definition::{DefinitionError, TestDefinition, TestDefinitionDraft};
pub use question::{Question, QuestionDraft, QuestionError};
pub use result::{AnswerDetail, AttemptResult};
pub use snapshot::{SessionMode, SessionSnapshot};
pub use status::TestStatus;
