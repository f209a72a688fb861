//! Shared latest-status map keyed by display coordinate.
//!
//! Each check loop is the only writer of its own key. Readers take whole-map
//! snapshots, so a report never sees a half-replaced entry and never holds the
//! lock while rendering.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::models::{CheckResult, Color, Coordinate};

#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    inner: Arc<RwLock<HashMap<Coordinate, CheckResult>>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the entry for `at`.
    pub async fn record(&self, at: Coordinate, result: CheckResult) {
        self.inner.write().await.insert(at, result);
    }

    pub async fn get(&self, at: Coordinate) -> Option<CheckResult> {
        self.inner.read().await.get(&at).cloned()
    }

    /// Point-in-time copy of the board, ordered by coordinate.
    pub async fn snapshot(&self) -> Vec<(Coordinate, CheckResult)> {
        let mut entries: Vec<_> = {
            let state = self.inner.read().await;
            state.iter().map(|(at, r)| (*at, r.clone())).collect()
        };
        entries.sort_by_key(|(at, _)| *at);
        entries
    }

    pub async fn report(&self) -> Report {
        let state = self.inner.read().await;
        Report::tally(state.values())
    }
}

/// Aggregate over the hosts that have reported at least once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Report {
    pub up: usize,
    pub down: usize,
    pub total: usize,
}

impl Report {
    pub fn tally<'a>(results: impl IntoIterator<Item = &'a CheckResult>) -> Self {
        let (mut up, mut total) = (0, 0);
        for result in results {
            total += 1;
            if result.is_up() {
                up += 1;
            }
        }
        Self { up, down: total - up, total }
    }

    pub fn message(&self) -> String {
        format!(
            "{}/{} UP {}/{} DOWN",
            self.up, self.total, self.down, self.total
        )
    }

    /// Green only when every reporting host is up and at least one has reported.
    pub fn color(&self) -> Color {
        if self.total > 0 && self.up == self.total {
            Color::SUCCESS
        } else {
            Color::FAILURE
        }
    }
}
