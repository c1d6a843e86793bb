use std::collections::HashSet;

use super::IngredientError;
use crate::list::NewListItem;

/// Extracted ingredients with a per-entry pick flag. Everything starts
/// selected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngredientSelection {
    entries: Vec<(String, bool)>,
}

impl IngredientSelection {
    /// Names are trimmed; blanks and case-insensitive repeats are dropped
    pub fn new(ingredients: Vec<String>) -> Self {
        let mut seen = HashSet::new();
        let entries = ingredients
            .into_iter()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty() && seen.insert(name.to_lowercase()))
            .map(|name| (name, true))
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.entries.iter().map(|(name, picked)| (name.as_str(), *picked))
    }

    /// Flip one entry; returns the new flag, or `None` for a bad index
    pub fn toggle(&mut self, index: usize) -> Option<bool> {
        let entry = self.entries.get_mut(index)?;
        entry.1 = !entry.1;
        Some(entry.1)
    }

    pub fn set_all(&mut self, picked: bool) {
        for entry in &mut self.entries {
            entry.1 = picked;
        }
    }

    /// Keep exactly the entries at `indices`
    pub fn pick_only(&mut self, indices: &[usize]) {
        for (i, entry) in self.entries.iter_mut().enumerate() {
            entry.1 = indices.contains(&i);
        }
    }

    pub fn selected(&self) -> Vec<&str> {
        self.iter()
            .filter_map(|(name, picked)| picked.then_some(name))
            .collect()
    }

    pub fn into_rows(self, added_by: &str) -> Result<Vec<NewListItem>, IngredientError> {
        let rows: Vec<NewListItem> = self
            .entries
            .iter()
            .filter(|(_, picked)| *picked)
            .filter_map(|(name, _)| NewListItem::new(name, added_by))
            .collect();

        if rows.is_empty() {
            return Err(IngredientError::EmptySelection);
        }
        Ok(rows)
    }
}
