//! Remote bindings: which remote indexes replicate which namespaces.

use std::collections::HashMap;

use regex::Regex;

/// Mapping from remote index address to the namespace patterns it receives.
pub struct Remotes {
    bindings: Vec<(String, Vec<Regex>)>,
}

impl Remotes {
    /// Build bindings from configuration.
    ///
    /// Addresses are sorted so fan-out order is deterministic.
    ///
    /// # Errors
    ///
    /// Returns the regex compile failure for a bad pattern.
    pub fn from_config(remotes: &HashMap<String, Vec<String>>) -> Result<Self, regex::Error> {
        let mut bindings = Vec::with_capacity(remotes.len());
        for (addr, patterns) in remotes {
            let compiled = patterns
                .iter()
                .map(|pattern| Regex::new(pattern))
                .collect::<Result<Vec<_>, _>>()?;
            bindings.push((addr.clone(), compiled));
        }
        bindings.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(Self { bindings })
    }

    /// Destinations whose any pattern matches the tag.
    #[must_use]
    pub fn matches(&self, tag: &str) -> Vec<String> {
        self.bindings
            .iter()
            .filter(|(_, patterns)| patterns.iter().any(|pattern| pattern.is_match(tag)))
            .map(|(addr, _)| addr.clone())
            .collect()
    }

    /// Whether `addr` is a configured destination for `tag`.
    #[must_use]
    pub fn valid(&self, tag: &str, addr: &str) -> bool {
        self.matches(tag).iter().any(|matched| matched == addr)
    }
}
