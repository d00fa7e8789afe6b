//! Explicit registration of named operations, for an outer layer (e.g. HTTP) to dispatch on.

use crate::error::{Error, Result};

/// Paths mapped to handlers, in registration order.
#[derive(Debug, Clone)]
pub struct RouteTable<H> {
    routes: Vec<(String, H)>,
}

impl<H> Default for RouteTable<H> {
    fn default() -> Self {
        Self { routes: vec![] }
    }
}

impl<H> RouteTable<H> {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler at a path.
    ///
    /// A path can only be registered once, see [`Error::RouteExists`].
    pub fn register<S: Into<String>>(&mut self, path: S, handler: H) -> Result<()> {
        let path = path.into();

        if self.get(&path).is_some() {
            return Err(Error::RouteExists(path));
        }

        self.routes.push((path, handler));
        Ok(())
    }

    /// The handler at the path.
    pub fn get(&self, path: &str) -> Option<&H> {
        self.routes
            .iter()
            .find(|(registered, _)| registered == path)
            .map(|(_, handler)| handler)
    }

    /// All routes, in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &H)> {
        self.routes
            .iter()
            .map(|(path, handler)| (path.as_str(), handler))
    }

    /// The number of routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether there are no routes.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn keeps_registration_order() {
        let mut table = RouteTable::new();
        table.register("/send", 1).unwrap();
        table.register("/receive", 2).unwrap();
        table.register("/available", 3).unwrap();

        let paths = table.iter().map(|(path, _)| path).collect::<Vec<_>>();

        assert_eq!(paths, vec!["/send", "/receive", "/available"]);
        assert_eq!(table.get("/receive"), Some(&2));
        assert_eq!(table.get("/nope"), None);
    }

    #[test]
    fn duplicates_are_refused() {
        let mut table = RouteTable::new();
        table.register("/send", "first").unwrap();

        let err = table.register("/send", "second").unwrap_err();

        assert!(matches!(err, Error::RouteExists(path) if path == "/send"));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("/send"), Some(&"first"));
    }
}
