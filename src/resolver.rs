use glob::{MatchOptions, Pattern, PatternError};
use serde::Serialize;

use crate::color::Color;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// How a rule decides whether it applies to a host.
#[derive(Debug, Clone)]
pub enum HostPattern {
    Exact(String),
    Glob(Pattern),
}

impl HostPattern {
    pub fn exact(pattern: &str) -> Self {
        HostPattern::Exact(pattern.to_string())
    }

    /// Compile a glob pattern (`*`, `?`, `[...]`). Fails on malformed brackets.
    pub fn glob(pattern: &str) -> Result<Self, PatternError> {
        Ok(HostPattern::Glob(Pattern::new(pattern)?))
    }

    pub fn matches(&self, host: &str) -> bool {
        match self {
            HostPattern::Exact(exact) => exact == host,
            HostPattern::Glob(pattern) => pattern.matches_with(host, MATCH_OPTIONS),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            HostPattern::Exact(exact) => exact,
            HostPattern::Glob(pattern) => pattern.as_str(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HostRule {
    pub pattern: HostPattern,
    pub color: Color,
}

/// Where a resolved colour came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Source {
    Rule { index: usize, pattern: String },
    SshConfig,
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub color: Color,
    pub source: Source,
}

/// Ordered host rules plus the optional fallback colour.
#[derive(Debug, Clone, Default)]
pub struct ColorRules {
    pub rules: Vec<HostRule>,
    pub default: Option<Color>,
}

impl ColorRules {
    pub fn new(rules: Vec<HostRule>, default: Option<Color>) -> Self {
        Self { rules, default }
    }

    /// First rule matching `host`, ignoring the fallback.
    pub fn first_match(&self, host: &str) -> Option<Resolution> {
        self.rules
            .iter()
            .enumerate()
            .find(|(_, rule)| rule.pattern.matches(host))
            .map(|(index, rule)| Resolution {
                color: rule.color,
                source: Source::Rule {
                    index,
                    pattern: rule.pattern.as_str().to_string(),
                },
            })
    }

    pub fn fallback(&self) -> Option<Resolution> {
        self.default.map(|color| Resolution {
            color,
            source: Source::Default,
        })
    }

    /// Colour for `host`: first matching rule, else the default, else no change.
    pub fn resolve(&self, host: &str) -> Option<Resolution> {
        self.first_match(host).or_else(|| self.fallback())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Color = Color::rgb(0xff, 0, 0);
    const BLUE: Color = Color::rgb(0, 0, 0xff);
    const GREY: Color = Color::rgb(0x20, 0x20, 0x20);

    fn glob(pattern: &str, color: Color) -> HostRule {
        HostRule {
            pattern: HostPattern::glob(pattern).unwrap(),
            color,
        }
    }

    #[test]
    fn test_first_match_wins() {
        let rules = ColorRules::new(vec![glob("prod-*", RED), glob("prod-db*", BLUE)], None);
        let resolved = rules.resolve("prod-db1").unwrap();
        assert_eq!(resolved.color, RED);
        assert_eq!(
            resolved.source,
            Source::Rule {
                index: 0,
                pattern: "prod-*".to_string()
            }
        );
    }

    #[test]
    fn test_order_matters() {
        let rules = ColorRules::new(vec![glob("prod-db*", BLUE), glob("prod-*", RED)], None);
        assert_eq!(rules.resolve("prod-db1").unwrap().color, BLUE);
        assert_eq!(rules.resolve("prod-web1").unwrap().color, RED);
    }

    #[test]
    fn test_no_match_without_default() {
        let rules = ColorRules::new(vec![glob("prod-*", RED)], None);
        assert!(rules.resolve("staging1").is_none());
    }

    #[test]
    fn test_no_match_uses_default() {
        let rules = ColorRules::new(vec![glob("prod-*", RED)], Some(GREY));
        let resolved = rules.resolve("staging1").unwrap();
        assert_eq!(resolved.color, GREY);
        assert_eq!(resolved.source, Source::Default);
    }

    #[test]
    fn test_glob_is_case_sensitive() {
        let rules = ColorRules::new(vec![glob("prod-*", RED)], None);
        assert!(rules.resolve("PROD-db1").is_none());
    }

    #[test]
    fn test_glob_question_mark_and_class() {
        let rules = ColorRules::new(vec![glob("web?.[ab]*", BLUE)], None);
        assert!(rules.resolve("web1.a.example.com").is_some());
        assert!(rules.resolve("web12.a.example.com").is_none());
        assert!(rules.resolve("web1.c.example.com").is_none());
    }

    #[test]
    fn test_exact_does_not_expand_wildcards() {
        let rule = HostRule {
            pattern: HostPattern::exact("prod-*"),
            color: RED,
        };
        let rules = ColorRules::new(vec![rule], None);
        assert!(rules.resolve("prod-db1").is_none());
        assert!(rules.resolve("prod-*").is_some());
    }

    #[test]
    fn test_invalid_glob_rejected() {
        assert!(HostPattern::glob("prod-[").is_err());
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let rules = ColorRules::new(vec![glob("*.internal", BLUE)], Some(GREY));
        for _ in 0..3 {
            assert_eq!(rules.resolve("db.internal").unwrap().color, BLUE);
            assert_eq!(rules.resolve("db.external").unwrap().color, GREY);
        }
    }
}
