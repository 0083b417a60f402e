//! The catalog: who is registered, what can be rated, and the ratings.

pub mod model;
pub mod service;

pub use model::{CreatorProfile, NewUser, Rating, Role, Score, Title, User, UserId};
pub use service::{
    CatalogService, CreatorListing, CreatorOutcome, CreatorRejection, RegistrationOutcome,
};
