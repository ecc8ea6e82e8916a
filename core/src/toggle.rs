use crate::catalog::Course;
use crate::completion::{CompletionKey, CompletionSet};
use crate::error::{CourseError, InvalidOperation};

/// An optimistic completion toggle: captured state, applied flip, then either
/// `commit` or `revert` once the backend answers.
#[must_use = "a pending toggle must be committed or reverted"]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingToggle {
    key: CompletionKey,
    was_complete: bool,
}

impl PendingToggle {
    /// Validate `key` against the catalog and flip its membership in `set`.
    pub fn apply(
        set: &mut CompletionSet,
        course: &Course,
        key: CompletionKey,
    ) -> Result<Self, CourseError> {
        let item = course
            .item(&key)
            .ok_or_else(|| InvalidOperation::UnknownItem(key.clone()))?;
        if !item.kind.is_countable() {
            return Err(InvalidOperation::ExtraItem(key).into());
        }

        let was_complete = set.contains(&key);
        set.set(key.clone(), !was_complete);
        Ok(Self { key, was_complete })
    }

    pub fn key(&self) -> &CompletionKey {
        &self.key
    }

    pub fn was_complete(&self) -> bool {
        self.was_complete
    }

    /// Membership the backend is asked to record.
    pub fn target(&self) -> bool {
        !self.was_complete
    }

    /// The backend accepted the change; the set already reflects it.
    pub fn commit(self) -> CompletionKey {
        self.key
    }

    /// Restore the key's captured membership. Other keys are untouched, so
    /// concurrent toggles on different keys survive the rollback.
    pub fn revert(self, set: &mut CompletionSet) -> CompletionKey {
        set.set(self.key.clone(), self.was_complete);
        self.key
    }
}
