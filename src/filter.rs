use crate::error::DispatchError;
use std::sync::Arc;

/// A named middleware constructor, generic over the handler type it wraps.
///
/// Scope 0 marks a filter as global; other scopes are opted into by name via
/// a [`Chain`].
pub trait Filter<H>: Send + Sync {
  fn name(&self) -> &str;

  /// A higher priority wraps closer to the outside of the composed handler.
  fn priority(&self) -> i32;

  fn scope(&self) -> i32;

  fn new_handler(&self, next: H, name: &str) -> Result<H, DispatchError>;
}

/// Registry of filters keyed by name. Registering a name twice replaces the
/// earlier filter.
pub struct FilterRegistry<H> {
  filters: Vec<Arc<dyn Filter<H>>>,
}

impl<H> FilterRegistry<H> {
  pub fn new() -> FilterRegistry<H> {
    FilterRegistry { filters: Vec::new() }
  }

  pub fn provide(&mut self, filter: Arc<dyn Filter<H>>) {
    match self.filters.iter_mut().find(|f| f.name() == filter.name()) {
      Some(slot) => *slot = filter,
      None => self.filters.push(filter),
    }
  }

  pub fn with_filter<F: FnOnce(&dyn Filter<H>)>(&self, name: &str, f: F) {
    if let Some(filter) = self.filters.iter().find(|f| f.name() == name) {
      f(filter.as_ref());
    }
  }

  /// Wraps `terminal` in every scope-0 filter, lowest priority innermost.
  pub fn global_chain(&self, terminal: H) -> Result<H, DispatchError> {
    let mut globals: Vec<&Arc<dyn Filter<H>>> =
      self.filters.iter().filter(|f| f.scope() == 0).collect();
    globals.sort_by_key(|f| f.priority());

    let mut next = terminal;
    for filter in globals {
      next = filter.new_handler(next, filter.name())?;
    }
    Ok(next)
  }

  pub fn chain(&self) -> Chain<'_, H> {
    Chain {
      registry: self,
      names: Vec::new(),
    }
  }
}

impl<H> Default for FilterRegistry<H> {
  fn default() -> FilterRegistry<H> {
    FilterRegistry::new()
  }
}

/// Append-only builder composing filters by name. The first appended filter
/// ends up outermost.
pub struct Chain<'a, H> {
  registry: &'a FilterRegistry<H>,
  names: Vec<String>,
}

impl<'a, H> Chain<'a, H> {
  pub fn append(mut self, name: &str) -> Chain<'a, H> {
    self.names.push(name.to_string());
    self
  }

  pub fn build(self, terminal: H) -> Result<H, DispatchError> {
    for (index, name) in self.names.iter().enumerate() {
      if self.names[..index].contains(name) {
        let trail: Vec<&str> = self.names[..=index].iter().map(String::as_str).collect();
        return Err(DispatchError::FilterRecursion(trail.join("->")));
      }
    }

    let mut next = terminal;
    for name in self.names.iter().rev() {
      let filter = self
        .registry
        .filters
        .iter()
        .find(|f| f.name() == *name)
        .ok_or_else(|| DispatchError::UnknownFilter(name.clone()))?;
      next = filter.new_handler(next, name)?;
    }
    Ok(next)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  /// Handler recording the wrap order, outermost tag first.
  #[derive(Debug, PartialEq, Eq)]
  struct Tagged {
    tags: Vec<&'static str>,
  }

  struct TagFilter {
    name: &'static str,
    priority: i32,
    scope: i32,
    tag: &'static str,
  }

  impl Filter<Tagged> for TagFilter {
    fn name(&self) -> &str {
      self.name
    }

    fn priority(&self) -> i32 {
      self.priority
    }

    fn scope(&self) -> i32 {
      self.scope
    }

    fn new_handler(&self, next: Tagged, _name: &str) -> Result<Tagged, DispatchError> {
      let mut tags = vec![self.tag];
      tags.extend(next.tags);
      Ok(Tagged { tags })
    }
  }

  fn registry() -> FilterRegistry<Tagged> {
    let mut registry = FilterRegistry::new();
    for (name, priority, scope) in [("audit", 5, 0), ("limit", 1, 0), ("scoped", 9, 3)] {
      registry.provide(Arc::new(TagFilter {
        name,
        priority,
        scope,
        tag: name,
      }));
    }
    registry
  }

  #[test]
  pub fn global_chain_sorts_ascending_and_skips_scoped_filters() {
    let composed = registry().global_chain(Tagged { tags: vec!["end"] }).unwrap();

    // the highest priority global ends up outermost, scoped filters stay out
    assert_eq!(composed.tags, vec!["audit", "limit", "end"]);
  }

  #[test]
  pub fn chain_wraps_first_appended_outermost() {
    let registry = registry();
    let composed = registry
      .chain()
      .append("scoped")
      .append("limit")
      .build(Tagged { tags: vec!["end"] })
      .unwrap();

    assert_eq!(composed.tags, vec!["scoped", "limit", "end"]);
  }

  #[test]
  pub fn duplicate_name_in_a_chain_is_recursion() {
    let registry = registry();
    let result = registry
      .chain()
      .append("limit")
      .append("audit")
      .append("limit")
      .build(Tagged { tags: vec![] });

    match result {
      Err(DispatchError::FilterRecursion(trail)) => {
        assert_eq!(trail, "limit->audit->limit")
      }
      other => panic!("expected recursion error, got {:?}", other),
    }
  }

  #[test]
  pub fn unknown_name_fails_the_build() {
    let registry = registry();
    let result = registry.chain().append("missing").build(Tagged { tags: vec![] });

    assert!(matches!(result, Err(DispatchError::UnknownFilter(name)) if name == "missing"));
  }

  #[test]
  pub fn providing_a_name_twice_replaces_the_filter() {
    let mut registry = registry();
    registry.provide(Arc::new(TagFilter {
      name: "limit",
      priority: 1,
      scope: 0,
      tag: "limit-v2",
    }));

    let composed = registry.global_chain(Tagged { tags: vec!["end"] }).unwrap();
    assert_eq!(composed.tags, vec!["audit", "limit-v2", "end"]);
  }

  #[test]
  pub fn with_filter_runs_only_for_registered_names() {
    let registry = registry();

    let mut seen = Vec::new();
    registry.with_filter("audit", |f| seen.push(f.priority()));
    registry.with_filter("missing", |f| seen.push(f.priority()));

    assert_eq!(seen, vec![5]);
  }
}
