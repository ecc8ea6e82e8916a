use serde::{Deserialize, Serialize};

use crate::completion::CompletionKey;
use crate::ids::{ContentId, CourseId, ModuleId};

/// Kind of a content item. `Extra` items are supplementary material: they are
/// never completable and never counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Video,
    Reading,
    Document,
    Exercise,
    Quiz,
    Extra,
}

impl ContentKind {
    pub fn is_countable(self) -> bool {
        !matches!(self, ContentKind::Extra)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: ContentId,
    pub kind: ContentKind,
    /// Position within the owning module.
    pub ordinal: u32,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub id: ModuleId,
    #[serde(default)]
    pub title: String,
    pub items: Vec<ContentItem>,
}

impl Module {
    pub fn countable_count(&self) -> usize {
        self.items.iter().filter(|i| i.kind.is_countable()).count()
    }

    /// Completion keys of every non-`Extra` item, in presentation order.
    pub fn countable_keys(&self) -> impl Iterator<Item = CompletionKey> + '_ {
        self.items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.kind.is_countable())
            .map(|(index, _)| CompletionKey::new(self.id.clone(), index as u32))
    }
}

/// A course as served by the catalog. Read-only for the duration of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: CourseId,
    #[serde(default)]
    pub title: String,
    pub modules: Vec<Module>,
}

impl Course {
    /// Sort each module's items by ordinal so that a completion key's
    /// `content_index` is the item's position in `items`.
    pub fn normalized(mut self) -> Self {
        for module in &mut self.modules {
            module.items.sort_by_key(|item| item.ordinal);
        }
        self
    }

    pub fn total_countable(&self) -> usize {
        self.modules.iter().map(Module::countable_count).sum()
    }

    pub fn module(&self, module_id: &ModuleId) -> Option<&Module> {
        self.modules.iter().find(|m| &m.id == module_id)
    }

    pub fn item(&self, key: &CompletionKey) -> Option<&ContentItem> {
        self.module(&key.module_id)?
            .items
            .get(key.content_index as usize)
    }

    pub fn is_countable(&self, key: &CompletionKey) -> bool {
        self.item(key).is_some_and(|item| item.kind.is_countable())
    }

    pub fn countable_keys(&self) -> impl Iterator<Item = CompletionKey> + '_ {
        self.modules.iter().flat_map(Module::countable_keys)
    }
}
