use std::sync::Arc;

use sqlx::SqlitePool;

use crate::core::config::Settings;
use crate::services::generation::QuestionGenerator;

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    db: SqlitePool,
    generator: QuestionGenerator,
}

impl AppState {
    pub(crate) fn new(settings: Settings, db: SqlitePool, generator: QuestionGenerator) -> Self {
        Self { inner: Arc::new(InnerState { settings, db, generator }) }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn db(&self) -> &SqlitePool {
        &self.inner.db
    }

    pub(crate) fn generator(&self) -> &QuestionGenerator {
        &self.inner.generator
    }
}
