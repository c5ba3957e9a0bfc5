//! Tag-keyed unit constructors, registered once at startup.

use std::collections::BTreeMap;

use crate::core::{SchedulerError, Unit};

type Constructor = Box<dyn Fn() -> Result<Unit, SchedulerError> + Send + Sync>;

/// Map from a string tag to a unit constructor, so data (config files,
/// scripts, network messages) can name the work to run.
#[derive(Default)]
pub struct UnitFactoryRegistry {
    constructors: BTreeMap<String, Constructor>,
}

impl UnitFactoryRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `constructor` under `tag`. Tags are unique.
    pub fn register<F>(&mut self, tag: impl Into<String>, constructor: F) -> Result<(), SchedulerError>
    where
        F: Fn() -> Result<Unit, SchedulerError> + Send + Sync + 'static,
    {
        let tag = tag.into();
        if tag.is_empty() {
            return Err(SchedulerError::Validation("unit tag must not be empty".into()));
        }
        if self.constructors.contains_key(&tag) {
            return Err(SchedulerError::Validation(format!(
                "unit tag `{tag}` already registered"
            )));
        }
        self.constructors.insert(tag, Box::new(constructor));
        Ok(())
    }

    /// Build a fresh unit for `tag`.
    pub fn build(&self, tag: &str) -> Result<Unit, SchedulerError> {
        let constructor = self
            .constructors
            .get(tag)
            .ok_or_else(|| SchedulerError::Validation(format!("unknown unit tag `{tag}`")))?;
        constructor()
    }

    /// Whether `tag` is registered.
    #[must_use]
    pub fn contains(&self, tag: &str) -> bool {
        self.constructors.contains_key(tag)
    }

    /// Registered tags in sorted order.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    /// Number of registered tags.
    #[must_use]
    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }
}

impl std::fmt::Debug for UnitFactoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitFactoryRegistry")
            .field("tags", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}
