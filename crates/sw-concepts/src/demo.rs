//! The bundled demo graphs, each with a script that exercises it.

use std::fmt;
use std::str::FromStr;

use serde_json::json;
use sw_core::ComposerGraph;

use crate::script::Step;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Demo {
    CounterNudge,
    UrlShortener,
    Upvotes,
    RateLimit,
}

impl Demo {
    pub const ALL: [Demo; 4] = [
        Demo::CounterNudge,
        Demo::UrlShortener,
        Demo::Upvotes,
        Demo::RateLimit,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Demo::CounterNudge => "counter-nudge",
            Demo::UrlShortener => "url-shortener",
            Demo::Upvotes => "upvotes",
            Demo::RateLimit => "rate-limit",
        }
    }

    pub fn summary(self) -> &'static str {
        match self {
            Demo::CounterNudge => "notify the clicker when a counter reaches 3",
            Demo::UrlShortener => "shorten, track, visit and expire URLs",
            Demo::Upvotes => "notify authors and re-rank items on upvote",
            Demo::RateLimit => "token bucket per ip in front of a contact form",
        }
    }

    /// The graph as the editor would export it.
    pub fn source(self) -> &'static str {
        match self {
            Demo::CounterNudge => include_str!("../graphs/counter-nudge.json"),
            Demo::UrlShortener => include_str!("../graphs/url-shortener.json"),
            Demo::Upvotes => include_str!("../graphs/upvotes.json"),
            Demo::RateLimit => include_str!("../graphs/rate-limit.json"),
        }
    }

    pub fn graph(self) -> sw_core::Result<ComposerGraph> {
        ComposerGraph::from_json(self.source())
    }

    pub fn script(self) -> Vec<Step> {
        match self {
            Demo::CounterNudge => vec![
                Step::new("Button", "clicked", json!({"kind": "inc", "by": "user"})).times(4),
            ],
            Demo::UrlShortener => vec![
                Step::new(
                    "Web",
                    "request",
                    json!({"method": "shortenUrl", "url": "https://example.com/very-long-url"}),
                ),
                Step::new(
                    "Web",
                    "request",
                    json!({"method": "shortenUrl", "url": "https://example.com/another-long-url"}),
                ),
                Step::new("Web", "request", json!({"method": "visit", "url": "missing"})),
            ],
            Demo::Upvotes => vec![
                Step::new("Upvote", "post", json!({"itemId": "post123", "author": "bob"})),
                Step::new("Upvote", "upvote", json!({"itemId": "post123", "userId": "alice"})),
                Step::new("Upvote", "upvote", json!({"itemId": "post123", "userId": "carol"})),
                Step::new("Upvote", "upvote", json!({"itemId": "post123", "userId": "alice"})),
            ],
            Demo::RateLimit => vec![
                Step::new("Web", "request", json!({"method": "contact", "ip": "192.168.1.1"}))
                    .times(12),
            ],
        }
    }
}

impl fmt::Display for Demo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Demo {
    type Err = String;

    /// Accepts `counter-nudge`, `counter_nudge` or `CounterNudge`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        Demo::ALL
            .into_iter()
            .find(|d| d.name().replace('-', "") == key)
            .ok_or_else(|| {
                let names: Vec<_> = Demo::ALL.iter().map(|d| d.name()).collect();
                format!("unknown demo '{s}' (expected one of: {})", names.join(", "))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_demo_compiles_cleanly() {
        for demo in Demo::ALL {
            let compiled = demo.graph().unwrap().compile().unwrap();
            assert!(
                compiled.diagnostics.is_empty(),
                "{demo}: {:?}",
                compiled.diagnostics
            );
        }
    }

    #[test]
    fn test_from_str_accepts_several_spellings() {
        for s in ["counter-nudge", "counter_nudge", "CounterNudge"] {
            assert_eq!(s.parse::<Demo>().unwrap(), Demo::CounterNudge);
        }
        assert_eq!("rate-limit".parse::<Demo>().unwrap(), Demo::RateLimit);
        let err = "nope".parse::<Demo>().unwrap_err();
        assert!(err.contains("url-shortener"));
    }

    #[test]
    fn test_scripts_name_concepts_in_their_graph() {
        for demo in Demo::ALL {
            let graph = demo.graph().unwrap();
            for step in demo.script() {
                assert!(
                    graph.concepts.iter().any(|c| c.name == step.concept),
                    "{demo}: {}",
                    step.label()
                );
            }
        }
    }
}
