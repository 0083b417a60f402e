//! DialogueEngine — the transition table.
//!
//! `step` takes the current state and one event and returns the next state
//! plus the reply. It never fails: validation problems re-ask the same
//! question, lookup misses go home, and store failures keep the state so the
//! user can simply try again.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::catalog::service::{parse_score, validate_title};
use crate::catalog::{CatalogService, CreatorOutcome, UserId};
use crate::error::FlowError;

use super::event::{Choice, Event};
use super::prompts::{self, Prompt};
use super::state::DialogueState;

/// Who sent the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: UserId,
    pub username: Option<String>,
}

impl Participant {
    pub fn new(id: UserId, username: Option<String>) -> Self {
        Self { id, username }
    }
}

/// Result of one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: DialogueState,
    pub prompt: Prompt,
}

impl Transition {
    fn to(next: DialogueState, prompt: Prompt) -> Self {
        Self { next, prompt }
    }

    /// Move to `next` and show its prompt under `line`.
    fn home(next: DialogueState, line: impl AsRef<str>) -> Self {
        let prompt = prompts::for_state(&next).preface(line);
        Self { next, prompt }
    }
}

pub struct DialogueEngine {
    catalog: Arc<CatalogService>,
}

impl DialogueEngine {
    pub fn new(catalog: Arc<CatalogService>) -> Self {
        Self { catalog }
    }

    /// Advance `state` by `event`.
    pub async fn step(
        &self,
        state: &DialogueState,
        who: &Participant,
        event: Event,
    ) -> Transition {
        let result = self.try_step(state, who, event).await;
        match result {
            Ok(transition) => {
                debug!(user_id = who.id, from = %state, to = %transition.next, "Dialogue step");
                transition
            }
            Err(FlowError::Validation(reason)) => {
                debug!(user_id = who.id, state = %state, %reason, "Re-prompting");
                Transition::home(state.clone(), reason)
            }
            Err(FlowError::Persistence(e)) => {
                warn!(user_id = who.id, state = %state, error = %e, "Store failed; state kept");
                Transition::home(state.clone(), prompts::try_again())
            }
            Err(e) => {
                info!(user_id = who.id, state = %state, error = %e, "Lookup failed");
                let next = if state.is_registered() {
                    DialogueState::MainMenu
                } else {
                    DialogueState::SelectingRole
                };
                Transition::home(next, e.to_string())
            }
        }
    }

    /// The transition table proper; errors are mapped by [`step`](Self::step).
    pub async fn try_step(
        &self,
        state: &DialogueState,
        who: &Participant,
        event: Event,
    ) -> Result<Transition, FlowError> {
        use DialogueState::*;

        // Restart works from anywhere and drops any pending title.
        if event == Event::Restart {
            return Ok(Transition::to(SelectingRole, prompts::role_choice()));
        }

        match state {
            Start => Ok(Transition::to(Start, prompts::start_hint())),

            SelectingRole => match event.choice() {
                Some(Choice::Viewer) => {
                    let outcome = self
                        .catalog
                        .register_viewer(who.id, who.username.clone())
                        .await?;
                    Ok(Transition::home(MainMenu, prompts::viewer_registered(outcome)))
                }
                Some(Choice::Creator) => Ok(Transition::to(
                    StreamerConfirmation,
                    prompts::enter_handle(),
                )),
                _ => Ok(Transition::home(SelectingRole, "Please pick one of the options.")),
            },

            StreamerConfirmation => {
                let handle = typed(&event)?;
                match self
                    .catalog
                    .register_creator(who.id, who.username.clone(), handle)
                    .await?
                {
                    CreatorOutcome::Registered { outcome, profile } => Ok(Transition::home(
                        MainMenu,
                        prompts::creator_registered(outcome, &profile),
                    )),
                    CreatorOutcome::Rejected(rejection) => Ok(Transition::home(
                        SelectingRole,
                        prompts::rejection(&rejection),
                    )),
                }
            }

            MainMenu => Ok(match event.choice() {
                Some(Choice::FindCreator) => {
                    Transition::to(ViewingStreamer, prompts::enter_creator_name())
                }
                Some(Choice::RateTitle) => {
                    Transition::to(RatingMovie, prompts::enter_title_to_rate())
                }
                Some(Choice::WriteReview) => {
                    Transition::to(WritingReview, prompts::enter_title_to_review())
                }
                _ => Transition::to(MainMenu, prompts::main_menu()),
            }),

            ViewingStreamer => {
                let name = typed(&event)?;
                let listing = self.catalog.creator_titles(name).await?;
                Ok(Transition::home(MainMenu, prompts::creator_listing(&listing)))
            }

            RatingMovie => {
                let title = validate_title(typed(&event)?)?.to_string();
                let prompt = prompts::enter_score(&title);
                Ok(Transition::to(RatingMovieAwaitingScore { title }, prompt))
            }

            RatingMovieAwaitingScore { title } => {
                let score = parse_score(typed(&event)?)?;
                let (title, _) = self.catalog.rate_title(who.id, title, score).await?;
                Ok(Transition::home(
                    MainMenu,
                    prompts::rating_saved(&title.name, score.value()),
                ))
            }

            WritingReview => {
                let title = validate_title(typed(&event)?)?.to_string();
                let prompt = prompts::enter_review(&title);
                Ok(Transition::to(WritingReviewAwaitingText { title }, prompt))
            }

            WritingReviewAwaitingText { title } => {
                let review = typed(&event)?;
                let (title, _) = self.catalog.review_title(who.id, title, review).await?;
                Ok(Transition::home(MainMenu, prompts::review_saved(&title.name)))
            }
        }
    }
}

/// Free-text answer, or a validation error for a button press.
fn typed(event: &Event) -> Result<&str, FlowError> {
    event
        .text()
        .ok_or_else(|| FlowError::Validation(prompts::press_or_type().to_string()))
}
