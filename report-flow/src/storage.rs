use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::sync::Arc;
use tracing::info;

use crate::checklist::Checklist;
use crate::compiler::CompiledQuestions;
use crate::error::{FlowError, Result};
use crate::interview::AnswerSession;
use crate::question::Response;
use crate::report::{CaseMetadata, Report};
use crate::task::Stage;

/// Answer handed to the interview stage on the next step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAnswer {
    pub response: Response,
    #[serde(default)]
    pub details: String,
}

/// Everything one case carries between steps. Sessions never share state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseSession {
    pub id: String,
    pub current_stage: Stage,
    pub case: CaseMetadata,
    #[serde(default)]
    pub status_message: Option<String>,
    #[serde(default)]
    pub protocol_excerpt: String,
    #[serde(default)]
    pub checklist: Option<Checklist>,
    #[serde(default)]
    pub compiled: Option<CompiledQuestions>,
    #[serde(default)]
    pub interview: AnswerSession,
    #[serde(default)]
    pub pending_answer: Option<PendingAnswer>,
    #[serde(default)]
    pub report: Option<Report>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CaseSession {
    pub fn new(case: CaseMetadata) -> Self {
        let now = Utc::now();
        Self {
            id: case.case_id.clone(),
            current_stage: Stage::GenerateChecklist,
            case,
            status_message: None,
            protocol_excerpt: String::new(),
            checklist: None,
            compiled: None,
            interview: AnswerSession::default(),
            pending_answer: None,
            report: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Checklist items of one subcategory, empty before a checklist exists.
    pub fn subcategory_items(&self, category: &str, subcategory: &str) -> Vec<String> {
        self.checklist
            .as_ref()
            .map(|c| c.subcategory_items(category, subcategory))
            .unwrap_or_default()
    }

    /// Starts the interview over from the compiled questions; answers,
    /// dynamic questions and any report are discarded.
    pub fn restart_interview(&mut self) -> Result<()> {
        let compiled = self.compiled.as_ref().ok_or_else(|| {
            FlowError::InvalidInput(format!(
                "case {} has no compiled questions to restart from",
                self.id
            ))
        })?;
        self.interview = AnswerSession::new(compiled.questions.clone())?;
        self.pending_answer = None;
        self.report = None;
        self.current_stage = Stage::Interview;
        self.status_message = Some("Interview restarted".to_string());
        Ok(())
    }
}

#[async_trait]
pub trait SessionStorage: Send + Sync {
    async fn save(&self, session: CaseSession) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<CaseSession>>;
    async fn delete(&self, id: &str) -> Result<()>;
}

/// In-memory implementation of SessionStorage
pub struct InMemorySessionStorage {
    sessions: Arc<DashMap<String, CaseSession>>,
}

impl InMemorySessionStorage {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }
}

impl Default for InMemorySessionStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStorage for InMemorySessionStorage {
    async fn save(&self, mut session: CaseSession) -> Result<()> {
        session.updated_at = Utc::now();
        self.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<CaseSession>> {
        Ok(self.sessions.get(id).map(|entry| entry.clone()))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.sessions.remove(id);
        Ok(())
    }
}

/// Sessions stored as JSONB rows keyed by case id.
pub struct PostgresSessionStorage {
    pool: PgPool,
}

impl PostgresSessionStorage {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        let storage = Self { pool };
        storage.migrate().await?;
        info!("Connected to PostgreSQL session storage");
        Ok(storage)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS case_sessions (
                id TEXT PRIMARY KEY,
                data JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStorage for PostgresSessionStorage {
    async fn save(&self, mut session: CaseSession) -> Result<()> {
        session.updated_at = Utc::now();
        sqlx::query(
            "INSERT INTO case_sessions (id, data, updated_at) VALUES ($1, $2, now())
             ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data, updated_at = now()",
        )
        .bind(&session.id)
        .bind(Json(&session))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<CaseSession>> {
        let row = sqlx::query_as::<_, (Json<CaseSession>,)>(
            "SELECT data FROM case_sessions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(Json(session),)| session))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM case_sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
