//! SQLite implementation of the remote store.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::FromRow;
use tether_protocol::{Message, ModelMetadata, Role};
use tracing::{debug, instrument};

use super::{
    NewProject, ProjectRecord, ProjectUpdate, RemoteError, RemoteFile, RemoteResult, RemoteStore,
};
use crate::db::Database;

#[derive(Debug, FromRow)]
struct ProjectRow {
    id: String,
    local_chat_id: String,
    user_id: String,
    description: String,
    url_slug: Option<String>,
    metadata: String,
    rewound_to: Option<String>,
    archived_message_ids: String,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<ProjectRow> for ProjectRecord {
    type Error = RemoteError;

    fn try_from(row: ProjectRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            local_chat_id: row.local_chat_id,
            user_id: row.user_id,
            description: row.description,
            url_slug: row.url_slug,
            metadata: serde_json::from_str(&row.metadata)?,
            rewound_to: row.rewound_to,
            archived_message_ids: serde_json::from_str(&row.archived_message_ids)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: String,
    role: String,
    content: String,
    model_metadata: Option<String>,
    created_at: i64,
}

impl MessageRow {
    fn into_message(self, chat_id: &str) -> RemoteResult<Message> {
        let role: Role = self.role.parse().map_err(RemoteError::Backend)?;
        let model_metadata = self
            .model_metadata
            .map(|raw| serde_json::from_str::<ModelMetadata>(&raw))
            .transpose()?;
        Ok(Message {
            id: self.id,
            chat_id: chat_id.to_string(),
            role,
            content: self.content,
            created_at: self.created_at,
            model_metadata,
        })
    }
}

const PROJECT_COLUMNS: &str = "id, local_chat_id, user_id, description, url_slug, metadata, \
     rewound_to, archived_message_ids, created_at, updated_at";

/// Remote store on the authoritative SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteRemoteStore {
    db: Database,
}

impl SqliteRemoteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn generate_project_id() -> String {
        format!("prj_{}", nanoid::nanoid!(12))
    }

    /// Number of projects mapped to a local chat (0 or 1).
    pub async fn count_projects_for_chat(&self, local_chat_id: &str) -> RemoteResult<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM projects WHERE local_chat_id = ?")
            .bind(local_chat_id)
            .fetch_one(self.db.pool())
            .await?;
        Ok(count)
    }

    pub async fn count_messages(&self, project_id: &str) -> RemoteResult<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM chat_history WHERE project_id = ?")
            .bind(project_id)
            .fetch_one(self.db.pool())
            .await?;
        Ok(count)
    }

    pub async fn load_screen(&self, project_id: &str, name: &str) -> RemoteResult<Option<String>> {
        let html = sqlx::query_scalar("SELECT html FROM screens WHERE project_id = ? AND name = ?")
            .bind(project_id)
            .bind(name)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(html)
    }
}

#[async_trait]
impl RemoteStore for SqliteRemoteStore {
    #[instrument(skip(self))]
    async fn find_project_by_chat(
        &self,
        local_chat_id: &str,
    ) -> RemoteResult<Option<ProjectRecord>> {
        let sql = format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE local_chat_id = ?");
        sqlx::query_as::<_, ProjectRow>(&sql)
            .bind(local_chat_id)
            .fetch_optional(self.db.pool())
            .await?
            .map(ProjectRecord::try_from)
            .transpose()
    }

    #[instrument(skip(self))]
    async fn get_project(&self, project_id: &str) -> RemoteResult<Option<ProjectRecord>> {
        let sql = format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?");
        sqlx::query_as::<_, ProjectRow>(&sql)
            .bind(project_id)
            .fetch_optional(self.db.pool())
            .await?
            .map(ProjectRecord::try_from)
            .transpose()
    }

    #[instrument(skip(self, project), fields(local_chat_id = %project.local_chat_id))]
    async fn create_project(&self, project: NewProject) -> RemoteResult<ProjectRecord> {
        let id = Self::generate_project_id();
        let now = Utc::now().timestamp_millis();

        // Plain INSERT: the UNIQUE(local_chat_id) violation is how callers
        // detect a concurrent create.
        sqlx::query(
            r#"
            INSERT INTO projects (id, local_chat_id, user_id, description, url_slug, metadata,
                                  created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&project.local_chat_id)
        .bind(&project.user_id)
        .bind(&project.description)
        .bind(&project.url_slug)
        .bind(serde_json::to_string(&project.metadata)?)
        .bind(now)
        .bind(now)
        .execute(self.db.pool())
        .await?;

        debug!("created project {} for chat {}", id, project.local_chat_id);

        self.get_project(&id)
            .await?
            .ok_or_else(|| RemoteError::NotFound(format!("project {id} after creation")))
    }

    #[instrument(skip(self, update))]
    async fn update_project(&self, project_id: &str, update: &ProjectUpdate) -> RemoteResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE projects
            SET description = ?, url_slug = ?, metadata = ?, rewound_to = ?,
                archived_message_ids = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&update.description)
        .bind(&update.url_slug)
        .bind(serde_json::to_string(&update.metadata)?)
        .bind(&update.rewound_to)
        .bind(serde_json::to_string(&update.archived_message_ids)?)
        .bind(Utc::now().timestamp_millis())
        .bind(project_id)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(RemoteError::NotFound(format!("project {project_id}")));
        }
        Ok(())
    }

    #[instrument(skip(self, message), fields(message_id = %message.id))]
    async fn upsert_message(&self, project_id: &str, message: &Message) -> RemoteResult<()> {
        let model_metadata = message
            .model_metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO chat_history (id, project_id, role, content, model_metadata, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(project_id, id) DO UPDATE SET
                role = excluded.role,
                content = excluded.content,
                model_metadata = excluded.model_metadata
            "#,
        )
        .bind(&message.id)
        .bind(project_id)
        .bind(message.role.to_string())
        .bind(&message.content)
        .bind(model_metadata)
        .bind(message.created_at)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    #[instrument(skip(self, content))]
    async fn upsert_file(
        &self,
        project_id: &str,
        path: &str,
        content: Option<&str>,
    ) -> RemoteResult<()> {
        sqlx::query(
            r#"
            INSERT INTO project_files (project_id, path, content, deleted, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(project_id, path) DO UPDATE SET
                content = excluded.content,
                deleted = excluded.deleted,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(project_id)
        .bind(path)
        .bind(content)
        .bind(content.is_none())
        .bind(Utc::now().timestamp_millis())
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    #[instrument(skip(self, html))]
    async fn upsert_canvas(
        &self,
        project_id: &str,
        screen_name: &str,
        html: &str,
    ) -> RemoteResult<()> {
        sqlx::query(
            r#"
            INSERT INTO screens (project_id, name, html, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(project_id, name) DO UPDATE SET
                html = excluded.html,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(project_id)
        .bind(screen_name)
        .bind(html)
        .bind(Utc::now().timestamp_millis())
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn load_messages(&self, project_id: &str, chat_id: &str) -> RemoteResult<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, role, content, model_metadata, created_at
            FROM chat_history
            WHERE project_id = ?
            ORDER BY created_at, rowid
            "#,
        )
        .bind(project_id)
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter().map(|row| row.into_message(chat_id)).collect()
    }

    #[instrument(skip(self))]
    async fn load_files(&self, project_id: &str) -> RemoteResult<Vec<RemoteFile>> {
        let rows = sqlx::query_as::<_, (String, Option<String>, bool, i64)>(
            r#"
            SELECT path, content, deleted, updated_at
            FROM project_files
            WHERE project_id = ?
            ORDER BY path
            "#,
        )
        .bind(project_id)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|(path, content, deleted, updated_at)| RemoteFile {
                path,
                content: if deleted { None } else { content },
                updated_at,
            })
            .collect())
    }
}
