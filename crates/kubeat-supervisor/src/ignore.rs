use std::collections::HashMap;

use anyhow::{Context, Result};
use regex::Regex;

/// Annotation that opts a pod out of collection
pub const DISABLE_ANNOTATION: &str = "kubeat_disable";

/// Pod-name patterns plus the annotation opt-out, evaluated on every tick
#[derive(Debug, Default)]
pub struct IgnoreRules {
    rules: Vec<Regex>,
}

impl IgnoreRules {
    /// Compile a comma-separated regex list; empty input means no rules
    pub fn parse(patterns: &str) -> Result<Self> {
        if patterns.is_empty() {
            return Ok(Self::default());
        }

        let mut rules = Vec::new();
        for pattern in patterns.split(',') {
            let rule = Regex::new(pattern)
                .with_context(|| format!("can't compile ignore pattern {pattern:?}"))?;
            rules.push(rule);
        }
        Ok(Self { rules })
    }

    /// True when the pod must not be collected from
    pub fn is_ignored(&self, name: &str, annotations: &HashMap<String, String>) -> bool {
        if annotations
            .get(DISABLE_ANNOTATION)
            .is_some_and(|value| value == "yes")
        {
            return true;
        }
        self.rules.iter().any(|rule| rule.is_match(name))
    }
}
