//! Explicit route table owned by the server.
//!
//! Handlers claim routes while they start; the server then freezes the table into an
//! axum [`Router`] before binding the listener. A path can be claimed once, and only one
//! handler may install the catch-all.
use std::collections::BTreeMap;

use axum::{Router, routing::MethodRouter};

use crate::ports::metrics_handler::{HandlerError, HandlerResult};

/// Name under which the catch-all route is reported in conflicts
pub const CATCH_ALL: &str = "/*";

#[derive(Default)]
pub struct RouteTable {
    routes: BTreeMap<String, MethodRouter>,
    catch_all: Option<MethodRouter>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a concrete path.
    pub fn route(&mut self, path: &str, method_router: MethodRouter) -> HandlerResult<()> {
        if self.routes.contains_key(path) {
            return Err(HandlerError::RouteConflict(path.to_string()));
        }
        tracing::debug!(path = %path, "Route registered");
        self.routes.insert(path.to_string(), method_router);
        Ok(())
    }

    /// Claim every request not answered by a concrete route, including requests to a
    /// concrete path with a method that path does not serve.
    pub fn catch_all(&mut self, method_router: MethodRouter) -> HandlerResult<()> {
        if self.catch_all.is_some() {
            return Err(HandlerError::RouteConflict(CATCH_ALL.to_string()));
        }
        tracing::debug!("Catch-all route registered");
        self.catch_all = Some(method_router);
        Ok(())
    }

    pub fn has_catch_all(&self) -> bool {
        self.catch_all.is_some()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.routes.contains_key(path)
    }

    /// Freeze the table into a router.
    pub fn into_router(self) -> Router {
        let mut router = Router::new();
        for (path, method_router) in self.routes {
            let method_router = match &self.catch_all {
                Some(catch_all) => method_router.fallback_service(catch_all.clone()),
                None => method_router,
            };
            router = router.route(&path, method_router);
        }
        if let Some(catch_all) = self.catch_all {
            router = router.fallback_service(catch_all);
        }
        router
    }
}
