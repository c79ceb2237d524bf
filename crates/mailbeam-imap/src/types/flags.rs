//! Message flag update directives.
//!
//! A [`FlagUpdate`] describes, per standard flag, whether to leave it alone,
//! add it or remove it, plus a keyword map for server-defined flags. The
//! five standard flags are enumerated explicitly so rendering is checked at
//! compile time.

use std::collections::BTreeMap;

/// Action to take on a single flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlagAction {
    /// Leave the flag untouched.
    #[default]
    Unset,
    /// Add the flag.
    Add,
    /// Remove the flag.
    Remove,
}

/// Per-message flag update description.
///
/// Rendered into the `+FLAGS (…)` and `-FLAGS (…)` groups of a single
/// `UID STORE` command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagUpdate {
    /// `\Seen` action.
    pub seen: FlagAction,
    /// `\Answered` action.
    pub answered: FlagAction,
    /// `\Flagged` action.
    pub flagged: FlagAction,
    /// `\Deleted` action.
    pub deleted: FlagAction,
    /// `\Draft` action.
    pub draft: FlagAction,
    /// Server-side keyword flags: `true` adds, `false` removes.
    pub keywords: BTreeMap<String, bool>,
}

impl FlagUpdate {
    /// Creates an update that touches nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for adding `\Seen`.
    #[must_use]
    pub fn add_seen() -> Self {
        Self {
            seen: FlagAction::Add,
            ..Self::default()
        }
    }

    /// Shorthand for adding `\Deleted`.
    #[must_use]
    pub fn add_deleted() -> Self {
        Self {
            deleted: FlagAction::Add,
            ..Self::default()
        }
    }

    /// Returns true if the update does nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let (add, remove) = self.render();
        add.is_empty() && remove.is_empty()
    }

    /// Renders the update into flag lists to add and remove.
    #[must_use]
    pub fn render(&self) -> (Vec<String>, Vec<String>) {
        let mut add = Vec::new();
        let mut remove = Vec::new();

        for (name, action) in [
            ("\\Seen", self.seen),
            ("\\Answered", self.answered),
            ("\\Flagged", self.flagged),
            ("\\Deleted", self.deleted),
            ("\\Draft", self.draft),
        ] {
            match action {
                FlagAction::Add => add.push(name.to_string()),
                FlagAction::Remove => remove.push(name.to_string()),
                FlagAction::Unset => {}
            }
        }

        for (keyword, state) in &self.keywords {
            if *state {
                add.push(keyword.clone());
            } else {
                remove.push(keyword.clone());
            }
        }

        (add, remove)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_render_standard_flags() {
        let update = FlagUpdate {
            seen: FlagAction::Add,
            deleted: FlagAction::Remove,
            ..FlagUpdate::default()
        };
        let (add, remove) = update.render();
        assert_eq!(add, vec!["\\Seen"]);
        assert_eq!(remove, vec!["\\Deleted"]);
    }

    #[test]
    fn test_render_keywords() {
        let mut update = FlagUpdate::new();
        update.keywords.insert("Junk".into(), true);
        update.keywords.insert("Old".into(), false);

        let (add, remove) = update.render();
        assert_eq!(add, vec!["Junk"]);
        assert_eq!(remove, vec!["Old"]);
    }

    #[test]
    fn test_empty_update() {
        assert!(FlagUpdate::new().is_empty());
        assert!(!FlagUpdate::add_seen().is_empty());
    }
}
