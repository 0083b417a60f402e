//! Turning raw gateway payloads into dialogue events.

use serde::{Deserialize, Serialize};

use crate::channels::Payload;

/// A discrete choice offered as a button (and accepted as typed text).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Choice {
    Viewer,
    Creator,
    FindCreator,
    RateTitle,
    WriteReview,
}

impl Choice {
    /// Callback token carried by the button.
    pub fn token(&self) -> &'static str {
        match self {
            Self::Viewer => "role:viewer",
            Self::Creator => "role:creator",
            Self::FindCreator => "menu:find_creator",
            Self::RateTitle => "menu:rate",
            Self::WriteReview => "menu:review",
        }
    }

    /// Button label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Viewer => "I'm a viewer",
            Self::Creator => "I'm a creator",
            Self::FindCreator => "Find a creator",
            Self::RateTitle => "Rate a title",
            Self::WriteReview => "Write a review",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim() {
            "role:viewer" => Some(Self::Viewer),
            "role:creator" => Some(Self::Creator),
            "menu:find_creator" => Some(Self::FindCreator),
            "menu:rate" => Some(Self::RateTitle),
            "menu:review" => Some(Self::WriteReview),
            _ => None,
        }
    }

    /// Match typed text against the labels and their short forms.
    pub fn from_label(text: &str) -> Option<Self> {
        match text.trim().to_lowercase().as_str() {
            "i'm a viewer" | "viewer" => Some(Self::Viewer),
            "i'm a creator" | "creator" | "streamer" => Some(Self::Creator),
            "find a creator" | "find creator" | "find" => Some(Self::FindCreator),
            "rate a title" | "rate title" | "rate" => Some(Self::RateTitle),
            "write a review" | "write review" | "review" => Some(Self::WriteReview),
            _ => None,
        }
    }
}

/// What a user did, as the state machine sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// `/start` or `/restart`.
    Restart,
    /// A button press.
    Pressed(Choice),
    /// A button press whose token we don't know (stale keyboard, other bot).
    UnknownButton(String),
    /// Free text.
    Text(String),
}

impl Event {
    /// Classify a gateway payload.
    pub fn parse(payload: &Payload) -> Self {
        match payload {
            Payload::Callback(token) => match Choice::from_token(token) {
                Some(choice) => Self::Pressed(choice),
                None => Self::UnknownButton(token.clone()),
            },
            Payload::Text(text) => {
                if is_restart(text) {
                    Self::Restart
                } else {
                    Self::Text(text.clone())
                }
            }
        }
    }

    /// The choice this event stands for, pressed or typed.
    pub fn choice(&self) -> Option<Choice> {
        match self {
            Self::Pressed(choice) => Some(*choice),
            Self::Text(text) => Choice::from_label(text),
            _ => None,
        }
    }

    /// Free text, if the user typed something.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// `/start`, `/restart`, optionally addressed as `/start@SomeBot` and
/// followed by a deep-link argument.
fn is_restart(text: &str) -> bool {
    let Some(command) = text.split_whitespace().next() else {
        return false;
    };
    let command = command.split('@').next().unwrap_or(command);
    command.eq_ignore_ascii_case("/start") || command.eq_ignore_ascii_case("/restart")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Event {
        Event::parse(&Payload::Text(s.to_string()))
    }

    #[test]
    fn restart_commands() {
        assert_eq!(text("/start"), Event::Restart);
        assert_eq!(text("  /RESTART "), Event::Restart);
        assert_eq!(text("/start@RatingsBot"), Event::Restart);
        assert_eq!(text("/start deep-link"), Event::Restart);
        assert_eq!(text("start"), Event::Text("start".into()));
        assert_eq!(text("/starting"), Event::Text("/starting".into()));
    }

    #[test]
    fn callbacks_map_to_choices() {
        for choice in [
            Choice::Viewer,
            Choice::Creator,
            Choice::FindCreator,
            Choice::RateTitle,
            Choice::WriteReview,
        ] {
            let event = Event::parse(&Payload::Callback(choice.token().into()));
            assert_eq!(event, Event::Pressed(choice));
            assert_eq!(Choice::from_label(choice.label()), Some(choice));
        }
        assert_eq!(
            Event::parse(&Payload::Callback("menu:bogus".into())),
            Event::UnknownButton("menu:bogus".into())
        );
    }

    #[test]
    fn typed_labels_are_case_insensitive() {
        assert_eq!(text("Viewer").choice(), Some(Choice::Viewer));
        assert_eq!(text("  STREAMER").choice(), Some(Choice::Creator));
        assert_eq!(text("rate a title").choice(), Some(Choice::RateTitle));
        assert_eq!(text("Inception").choice(), None);
    }

    #[test]
    fn text_only_for_typed_input() {
        assert_eq!(text("Inception").text(), Some("Inception"));
        assert_eq!(Event::Restart.text(), None);
        assert_eq!(Event::Pressed(Choice::Viewer).text(), None);
    }
}
