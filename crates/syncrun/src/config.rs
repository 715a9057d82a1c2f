//! # Session Configuration
//!
//! Provides a fluent API for composing a session's sequencing, resolution and
//! dispatch policy.

use std::collections::HashSet;
use std::sync::Arc;

use syncrpc::MethodResolver;

use crate::session::Session;
use crate::sequence::Sequencer;

/// Policy shared by everything one session does.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    sequencer: Sequencer,
    resolver: Arc<MethodResolver>,
    strict_unknown_connectors: bool,
    allow_when_disabled: HashSet<String>,
}

impl SessionConfig {
    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    pub fn resolver(&self) -> &Arc<MethodResolver> {
        &self.resolver
    }

    /// Whether a call for an unmapped connector key fails the batch instead of
    /// being skipped.
    pub fn strict_unknown_connectors(&self) -> bool {
        self.strict_unknown_connectors
    }

    /// Whether calls on `interface` reach connectors that are disabled.
    pub fn allows_when_disabled(&self, interface: &str) -> bool {
        self.allow_when_disabled.contains(interface)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sequencer: Sequencer::new(),
            resolver: MethodResolver::global(),
            strict_unknown_connectors: false,
            allow_when_disabled: HashSet::new(),
        }
    }
}

/// Fluent builder for sessions.
#[derive(Debug, Default)]
pub struct SessionBuilder {
    config: SessionConfig,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shares a sequencer with other sessions, ordering their calls globally.
    pub fn sequencer(mut self, sequencer: Sequencer) -> Self {
        self.config.sequencer = sequencer;
        self
    }

    /// Uses a private method cache instead of the process-wide one.
    pub fn resolver(mut self, resolver: Arc<MethodResolver>) -> Self {
        self.config.resolver = resolver;
        self
    }

    pub fn strict_unknown_connectors(mut self, strict: bool) -> Self {
        self.config.strict_unknown_connectors = strict;
        self
    }

    /// Lets calls on `interface` through even when the connector is disabled.
    pub fn allow_when_disabled(mut self, interface: impl Into<String>) -> Self {
        self.config.allow_when_disabled.insert(interface.into());
        self
    }

    pub fn build(self) -> Session {
        Session::new(self.config)
    }
}
