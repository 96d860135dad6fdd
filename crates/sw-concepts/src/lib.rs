//! Concept behaviors for syncweave, plus the bundled demo graphs.
//!
//! The engine in `sw-core` never decides what an action does. This crate
//! supplies behaviors for the concepts the composer palette knows about
//! (`Counter`, `Notification`, `UrlShortening`, ...) through [`Library`],
//! and ships four ready-made graphs with trigger scripts in [`demo`].

pub mod counter;
pub mod demo;
pub mod library;
pub mod notification;
pub mod rate_limit;
pub mod script;
pub mod shortener;
pub mod upvote;

pub use counter::Counter;
pub use demo::Demo;
pub use library::Library;
pub use notification::Notification;
pub use rate_limit::RateLimiter;
pub use script::{Played, Step, parse_script, play};
pub use shortener::{ExpiringResource, NonceGenerator, UrlShortening, WebAnalytics};
pub use upvote::{Recommendation, Upvote};
