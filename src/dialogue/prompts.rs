//! Reply texts and the choice sets rendered under them.

use crate::catalog::{CreatorListing, CreatorProfile, CreatorRejection, RegistrationOutcome, Role};

use super::event::Choice;
use super::state::DialogueState;

/// Outgoing reply: text plus optional buttons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub text: String,
    pub choices: Vec<Choice>,
}

impl Prompt {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            choices: Vec::new(),
        }
    }

    pub fn with_choices(mut self, choices: &[Choice]) -> Self {
        self.choices = choices.to_vec();
        self
    }

    /// Put `line` above the prompt, separated by a blank line.
    pub fn preface(mut self, line: impl AsRef<str>) -> Self {
        let line = line.as_ref().trim();
        if !line.is_empty() {
            self.text = format!("{line}\n\n{}", self.text);
        }
        self
    }
}

pub fn start_hint() -> Prompt {
    Prompt::new("Send /start to begin.")
}

pub fn role_choice() -> Prompt {
    Prompt::new("Welcome! Are you here to rate what you watch, or are you a creator?")
        .with_choices(&[Choice::Viewer, Choice::Creator])
}

pub fn enter_handle() -> Prompt {
    Prompt::new("What's your Twitch handle?")
}

pub fn main_menu() -> Prompt {
    Prompt::new("What would you like to do?").with_choices(&[
        Choice::FindCreator,
        Choice::RateTitle,
        Choice::WriteReview,
    ])
}

pub fn enter_creator_name() -> Prompt {
    Prompt::new("Which creator are you looking for?")
}

pub fn enter_title_to_rate() -> Prompt {
    Prompt::new("Which title do you want to rate?")
}

pub fn enter_title_to_review() -> Prompt {
    Prompt::new("Which title do you want to review?")
}

pub fn enter_score(title: &str) -> Prompt {
    Prompt::new(format!("How would you score \"{title}\"? Send a number from 1 to 10."))
}

pub fn enter_review(title: &str) -> Prompt {
    Prompt::new(format!("Write your review of \"{title}\"."))
}

/// The prompt a state shows when it is re-entered or re-asked.
pub fn for_state(state: &DialogueState) -> Prompt {
    match state {
        DialogueState::Start => start_hint(),
        DialogueState::SelectingRole => role_choice(),
        DialogueState::StreamerConfirmation => enter_handle(),
        DialogueState::MainMenu => main_menu(),
        DialogueState::ViewingStreamer => enter_creator_name(),
        DialogueState::RatingMovie => enter_title_to_rate(),
        DialogueState::RatingMovieAwaitingScore { title } => enter_score(title),
        DialogueState::WritingReview => enter_title_to_review(),
        DialogueState::WritingReviewAwaitingText { title } => enter_review(title),
    }
}

pub fn viewer_registered(outcome: RegistrationOutcome) -> String {
    match outcome {
        RegistrationOutcome::New(_) => "You're registered as a viewer.".to_string(),
        RegistrationOutcome::Existing(role) => already_registered(role),
    }
}

pub fn creator_registered(outcome: RegistrationOutcome, profile: &CreatorProfile) -> String {
    match outcome {
        RegistrationOutcome::New(_) => format!(
            "Verified! {} has {} followers. You're registered as a creator.",
            profile.handle, profile.followers
        ),
        RegistrationOutcome::Existing(role) => already_registered(role),
    }
}

fn already_registered(role: Role) -> String {
    format!("You're already registered as a {role}.")
}

pub fn rejection(rejection: &CreatorRejection) -> String {
    match rejection {
        CreatorRejection::NotFound { handle } => format!(
            "I couldn't find a Twitch channel called {handle}. Check the spelling and try again."
        ),
        CreatorRejection::TooFewFollowers {
            handle,
            followers,
            required,
        } => format!(
            "{handle} has {followers} followers; creators need at least {required}."
        ),
    }
}

pub fn creator_listing(listing: &CreatorListing) -> String {
    let name = listing
        .creator
        .creator
        .as_ref()
        .map(|p| p.handle.as_str())
        .or(listing.creator.username.as_deref())
        .unwrap_or("This creator");

    if listing.titles.is_empty() {
        return format!("{name} has no titles yet.");
    }
    let mut text = format!("{name}'s titles:");
    for title in &listing.titles {
        text.push_str("\n• ");
        text.push_str(&title.name);
    }
    text
}

pub fn rating_saved(title: &str, score: u8) -> String {
    format!("Saved: \"{title}\" {score}/10.")
}

pub fn review_saved(title: &str) -> String {
    format!("Thanks! Your review of \"{title}\" is saved.")
}

pub fn try_again() -> &'static str {
    "Something went wrong on our side. Please try again."
}

pub fn press_or_type() -> &'static str {
    "Please type your answer."
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::catalog::{Title, User};

    #[test]
    fn preface_adds_blank_line() {
        let p = main_menu().preface("Done.");
        assert_eq!(p.text, "Done.\n\nWhat would you like to do?");
        assert_eq!(p.choices.len(), 3);
        assert_eq!(main_menu().preface("  ").text, main_menu().text);
    }

    #[test]
    fn score_prompt_names_title() {
        let state = DialogueState::RatingMovieAwaitingScore {
            title: "Inception".into(),
        };
        assert!(for_state(&state).text.contains("\"Inception\""));
    }

    #[test]
    fn listing_prefers_creator_handle() {
        let creator = User {
            id: 1,
            username: Some("alice_tg".into()),
            role: Role::Creator,
            creator: Some(CreatorProfile {
                handle: "popularstreamer".into(),
                followers: 500,
            }),
            created_at: Utc::now(),
        };
        let empty = CreatorListing {
            creator: creator.clone(),
            titles: vec![],
        };
        assert_eq!(creator_listing(&empty), "popularstreamer has no titles yet.");

        let full = CreatorListing {
            creator,
            titles: vec![Title {
                id: 1,
                name: "Inception".into(),
                owner_id: Some(1),
            }],
        };
        assert_eq!(creator_listing(&full), "popularstreamer's titles:\n• Inception");
    }

    #[test]
    fn rejection_texts() {
        let text = rejection(&CreatorRejection::TooFewFollowers {
            handle: "smallstreamer".into(),
            followers: 42,
            required: 250,
        });
        assert!(text.contains("42"));
        assert!(text.contains("250"));
    }
}
