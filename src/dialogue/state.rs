//! Conversation states — one value per user, owned by that user's lane.

use serde::{Deserialize, Serialize};

/// Where a user is in the conversation.
///
/// Sub-flows that need working memory carry it in the variant, so a score
/// can never arrive for a title that was never named.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DialogueState {
    #[default]
    Start,
    SelectingRole,
    StreamerConfirmation,
    MainMenu,
    ViewingStreamer,
    /// Rating sub-flow, waiting for the title.
    RatingMovie,
    /// Rating sub-flow, title remembered, waiting for the score.
    RatingMovieAwaitingScore { title: String },
    /// Review sub-flow, waiting for the title.
    WritingReview,
    /// Review sub-flow, title remembered, waiting for the text.
    WritingReviewAwaitingText { title: String },
}

impl DialogueState {
    /// The title held in working memory, if any.
    pub fn pending_title(&self) -> Option<&str> {
        match self {
            Self::RatingMovieAwaitingScore { title } | Self::WritingReviewAwaitingText { title } => {
                Some(title)
            }
            _ => None,
        }
    }

    /// Whether the user has a registered role by the time they are here.
    pub fn is_registered(&self) -> bool {
        !matches!(
            self,
            Self::Start | Self::SelectingRole | Self::StreamerConfirmation
        )
    }
}

impl std::fmt::Display for DialogueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Start => "start",
            Self::SelectingRole => "selecting_role",
            Self::StreamerConfirmation => "streamer_confirmation",
            Self::MainMenu => "main_menu",
            Self::ViewingStreamer => "viewing_streamer",
            Self::RatingMovie => "rating_movie",
            Self::RatingMovieAwaitingScore { .. } => "rating_movie_awaiting_score",
            Self::WritingReview => "writing_review",
            Self::WritingReviewAwaitingText { .. } => "writing_review_awaiting_text",
        };
        write!(f, "{s}")
    }
}
