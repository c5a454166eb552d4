use std::ops::Bound;

use data_model::FunctionRecord;

/// Exact-match criteria applied to a listing before it is paginated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub image: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionPage {
    pub functions: Vec<FunctionRecord>,
    /// Name of the last returned function when more matching functions
    /// follow it.
    pub next_cursor: Option<String>,
}

/// Ordered view of every stored function.
///
/// Backed by persistent maps, so cloning is cheap and a clone is an
/// immutable snapshot that later writes do not affect.
#[derive(Debug, Clone, Default)]
pub struct InMemoryState {
    // Function Name -> FunctionRecord
    functions: im::OrdMap<String, FunctionRecord>,

    // (Image, Function Name)
    functions_by_image: im::OrdSet<(String, String)>,
}

impl InMemoryState {
    pub fn new(records: impl IntoIterator<Item = FunctionRecord>) -> Self {
        let mut state = Self::default();
        for record in records {
            state.upsert(record);
        }
        state
    }

    pub fn get(&self, name: &str) -> Option<FunctionRecord> {
        self.functions.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn upsert(&mut self, record: FunctionRecord) {
        if let Some(previous) = self.functions.get(&record.name) {
            self.functions_by_image
                .remove(&(previous.image.clone(), previous.name.clone()));
        }
        self.functions_by_image
            .insert((record.image.clone(), record.name.clone()));
        self.functions.insert(record.name.clone(), record);
    }

    pub fn remove(&mut self, name: &str) -> Option<FunctionRecord> {
        let removed = self.functions.remove(name)?;
        self.functions_by_image
            .remove(&(removed.image.clone(), removed.name.clone()));
        Some(removed)
    }

    /// Returns up to `limit` functions ordered by name, starting strictly
    /// after `cursor`.
    ///
    /// The cursor is only a position in the key space; it does not have to
    /// name a function that still exists.
    pub fn list(&self, filter: &ListFilter, cursor: Option<&str>, limit: usize) -> FunctionPage {
        if limit == 0 {
            return FunctionPage::default();
        }
        let cursor = cursor.filter(|c| !c.is_empty());

        // One extra function tells whether another page exists.
        let mut functions: Vec<FunctionRecord> = match &filter.image {
            Some(image) => {
                let lower = match cursor {
                    Some(cursor) => Bound::Excluded((image.clone(), cursor.to_string())),
                    None => Bound::Included((image.clone(), String::new())),
                };
                self.functions_by_image
                    .range((lower, Bound::Unbounded))
                    .take_while(|(indexed_image, _)| indexed_image == image)
                    .filter_map(|(_, name)| self.functions.get(name).cloned())
                    .take(limit.saturating_add(1))
                    .collect()
            }
            None => {
                let lower = match cursor {
                    Some(cursor) => Bound::Excluded(cursor.to_string()),
                    None => Bound::Unbounded,
                };
                self.functions
                    .range((lower, Bound::Unbounded))
                    .map(|(_, record)| record.clone())
                    .take(limit.saturating_add(1))
                    .collect()
            }
        };

        let next_cursor = if functions.len() > limit {
            functions.truncate(limit);
            functions.last().map(|f| f.name.clone())
        } else {
            None
        };
        FunctionPage {
            functions,
            next_cursor,
        }
    }
}
