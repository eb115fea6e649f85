// SPDX-License-Identifier: MIT

//! `sqlx`-backed `Store`, grounded in
//! `examples/adamtc007-ob-poc/bpmn-lite/bpmn-lite-core/src/store_postgres.rs`'s
//! raw-query + `sqlx::migrate!` style, adapted to sqlite and this schema.

use crate::error::{from_sqlx, json_error};
use crate::{clarification_is_open_blocking, EventFilter, Store};
use async_trait::async_trait;
use forge_core::{
    Clarification, ClarificationId, ClarificationScope, ClarificationStatus, CodexRun,
    CodexRunId, CodexRunStatus, CoreError, CoreResult, EnforcementMode, Event, EventId, Job,
    JobId, JobStatus, JobType, NewEvent, NewProject, NewProtocolRun, NewStepRun, PolicyPack,
    PolicyPackId, PolicyPackStatus, PolicyUpdate, Project, ProjectId, ProtocolRun, ProtocolRunId,
    ProtocolStatus, StepRun, StepRunId, StepStatus, StepType,
};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

/// sqlite-backed `Store`. Connection pool is shared by `forge-queue`'s
/// durable `StoreQueue` implementation.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(db_path: &std::path::Path) -> CoreResult<Self> {
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(&url)
            .await
            .map_err(from_sqlx)?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Runs forward-only migrations embedded at compile time (§4.A).
    pub async fn migrate(&self) -> CoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| CoreError::Storage(format!("migration failed: {e}")))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_status_str(status: ProtocolStatus) -> &'static str {
    match status {
        ProtocolStatus::Pending => "pending",
        ProtocolStatus::Planning => "planning",
        ProtocolStatus::Planned => "planned",
        ProtocolStatus::Running => "running",
        ProtocolStatus::Paused => "paused",
        ProtocolStatus::Blocked => "blocked",
        ProtocolStatus::Failed => "failed",
        ProtocolStatus::Cancelled => "cancelled",
        ProtocolStatus::Completed => "completed",
    }
}

fn protocol_status_from_str(s: &str) -> CoreResult<ProtocolStatus> {
    Ok(match s {
        "pending" => ProtocolStatus::Pending,
        "planning" => ProtocolStatus::Planning,
        "planned" => ProtocolStatus::Planned,
        "running" => ProtocolStatus::Running,
        "paused" => ProtocolStatus::Paused,
        "blocked" => ProtocolStatus::Blocked,
        "failed" => ProtocolStatus::Failed,
        "cancelled" => ProtocolStatus::Cancelled,
        "completed" => ProtocolStatus::Completed,
        other => return Err(CoreError::Storage(format!("unknown protocol status {other:?}"))),
    })
}

fn step_status_from_str(s: &str) -> CoreResult<StepStatus> {
    Ok(match s {
        "pending" => StepStatus::Pending,
        "running" => StepStatus::Running,
        "needs_qa" => StepStatus::NeedsQa,
        "completed" => StepStatus::Completed,
        "failed" => StepStatus::Failed,
        "cancelled" => StepStatus::Cancelled,
        "blocked" => StepStatus::Blocked,
        other => return Err(CoreError::Storage(format!("unknown step status {other:?}"))),
    })
}

fn step_status_str(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Pending => "pending",
        StepStatus::Running => "running",
        StepStatus::NeedsQa => "needs_qa",
        StepStatus::Completed => "completed",
        StepStatus::Failed => "failed",
        StepStatus::Cancelled => "cancelled",
        StepStatus::Blocked => "blocked",
    }
}

fn step_type_from_str(s: &str) -> CoreResult<StepType> {
    Ok(match s {
        "setup" => StepType::Setup,
        "work" => StepType::Work,
        "qa" => StepType::Qa,
        other => return Err(CoreError::Storage(format!("unknown step type {other:?}"))),
    })
}

fn enforcement_mode_from_str(s: &str) -> EnforcementMode {
    match s {
        "block" => EnforcementMode::Block,
        _ => EnforcementMode::Warn,
    }
}

fn row_to_project(row: &sqlx::sqlite::SqliteRow) -> CoreResult<Project> {
    Ok(Project {
        id: ProjectId::new(row.try_get("id").map_err(from_sqlx)?),
        name: row.try_get("name").map_err(from_sqlx)?,
        git_url: row.try_get("git_url").map_err(from_sqlx)?,
        local_path: row.try_get("local_path").map_err(from_sqlx)?,
        base_branch: row.try_get("base_branch").map_err(from_sqlx)?,
        ci_provider: row.try_get("ci_provider").map_err(from_sqlx)?,
        secrets_enc: row.try_get("secrets_enc").map_err(from_sqlx)?,
        default_models: parse_opt_json(row.try_get("default_models").map_err(from_sqlx)?)?,
        policy_pack_key: row.try_get("policy_pack_key").map_err(from_sqlx)?,
        policy_pack_version: row.try_get("policy_pack_version").map_err(from_sqlx)?,
        policy_overrides: parse_opt_json(row.try_get("policy_overrides").map_err(from_sqlx)?)?,
        policy_repo_local_enabled: row.try_get::<i64, _>("policy_repo_local_enabled").map_err(from_sqlx)? != 0,
        policy_effective_hash: row.try_get("policy_effective_hash").map_err(from_sqlx)?,
        policy_enforcement_mode: enforcement_mode_from_str(&row.try_get::<String, _>("policy_enforcement_mode").map_err(from_sqlx)?),
        created_at: row.try_get("created_at").map_err(from_sqlx)?,
        updated_at: row.try_get("updated_at").map_err(from_sqlx)?,
    })
}

fn parse_opt_json(raw: Option<String>) -> CoreResult<Option<serde_json::Value>> {
    raw.map(|s| serde_json::from_str(&s).map_err(json_error)).transpose()
}

fn row_to_protocol_run(row: &sqlx::sqlite::SqliteRow) -> CoreResult<ProtocolRun> {
    Ok(ProtocolRun {
        id: ProtocolRunId::new(row.try_get("id").map_err(from_sqlx)?),
        project_id: ProjectId::new(row.try_get("project_id").map_err(from_sqlx)?),
        protocol_name: row.try_get("protocol_name").map_err(from_sqlx)?,
        status: protocol_status_from_str(&row.try_get::<String, _>("status").map_err(from_sqlx)?)?,
        base_branch: row.try_get("base_branch").map_err(from_sqlx)?,
        worktree_path: row.try_get("worktree_path").map_err(from_sqlx)?,
        protocol_root: row.try_get("protocol_root").map_err(from_sqlx)?,
        description: row.try_get("description").map_err(from_sqlx)?,
        template_config: parse_opt_json(row.try_get("template_config").map_err(from_sqlx)?)?,
        template_source: row.try_get("template_source").map_err(from_sqlx)?,
        policy_pack_key: row.try_get("policy_pack_key").map_err(from_sqlx)?,
        policy_pack_version: row.try_get("policy_pack_version").map_err(from_sqlx)?,
        policy_effective_hash: row.try_get("policy_effective_hash").map_err(from_sqlx)?,
        policy_effective_json: parse_opt_json(row.try_get("policy_effective_json").map_err(from_sqlx)?)?,
        created_at: row.try_get("created_at").map_err(from_sqlx)?,
        updated_at: row.try_get("updated_at").map_err(from_sqlx)?,
    })
}

fn row_to_step_run(row: &sqlx::sqlite::SqliteRow) -> CoreResult<StepRun> {
    let depends_on_raw: String = row.try_get("depends_on").map_err(from_sqlx)?;
    let depends_on: Vec<i64> = serde_json::from_str(&depends_on_raw).map_err(json_error)?;
    Ok(StepRun {
        id: StepRunId::new(row.try_get("id").map_err(from_sqlx)?),
        protocol_run_id: ProtocolRunId::new(row.try_get("protocol_run_id").map_err(from_sqlx)?),
        step_index: row.try_get("step_index").map_err(from_sqlx)?,
        step_name: row.try_get("step_name").map_err(from_sqlx)?,
        step_type: step_type_from_str(&row.try_get::<String, _>("step_type").map_err(from_sqlx)?)?,
        status: step_status_from_str(&row.try_get::<String, _>("status").map_err(from_sqlx)?)?,
        retries: row.try_get("retries").map_err(from_sqlx)?,
        priority: row.try_get("priority").map_err(from_sqlx)?,
        model: row.try_get("model").map_err(from_sqlx)?,
        engine_id: row.try_get("engine_id").map_err(from_sqlx)?,
        policy: parse_opt_json(row.try_get("policy").map_err(from_sqlx)?)?,
        runtime_state: parse_opt_json(row.try_get("runtime_state").map_err(from_sqlx)?)?,
        depends_on: depends_on.into_iter().map(StepRunId::new).collect(),
        parallel_group: row.try_get("parallel_group").map_err(from_sqlx)?,
        assigned_agent: row.try_get("assigned_agent").map_err(from_sqlx)?,
        summary: row.try_get("summary").map_err(from_sqlx)?,
        created_at: row.try_get("created_at").map_err(from_sqlx)?,
        updated_at: row.try_get("updated_at").map_err(from_sqlx)?,
    })
}

fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> CoreResult<Event> {
    Ok(Event {
        id: EventId::new(row.try_get("id").map_err(from_sqlx)?),
        protocol_run_id: row.try_get::<Option<i64>, _>("protocol_run_id").map_err(from_sqlx)?.map(ProtocolRunId::new),
        step_run_id: row.try_get::<Option<i64>, _>("step_run_id").map_err(from_sqlx)?.map(StepRunId::new),
        project_id: row.try_get::<Option<i64>, _>("project_id").map_err(from_sqlx)?.map(ProjectId::new),
        event_type: row.try_get("event_type").map_err(from_sqlx)?,
        message: row.try_get("message").map_err(from_sqlx)?,
        metadata: parse_opt_json(row.try_get("metadata").map_err(from_sqlx)?)?,
        created_at: row.try_get("created_at").map_err(from_sqlx)?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_project(&self, new: NewProject) -> CoreResult<Project> {
        let now = chrono::Utc::now();
        let mode = if matches!(new.policy_enforcement_mode, EnforcementMode::Block) { "block" } else { "warn" };
        let row = sqlx::query(
            r#"INSERT INTO projects
               (name, git_url, local_path, base_branch, ci_provider, secrets_enc, default_models,
                policy_pack_key, policy_pack_version, policy_overrides, policy_repo_local_enabled,
                policy_enforcement_mode, created_at, updated_at)
               VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?)
               RETURNING *"#,
        )
        .bind(&new.name)
        .bind(&new.git_url)
        .bind(&new.local_path)
        .bind(&new.base_branch)
        .bind(&new.ci_provider)
        .bind(&new.secrets_enc)
        .bind(new.default_models.as_ref().map(|v| v.to_string()))
        .bind(&new.policy_pack_key)
        .bind(&new.policy_pack_version)
        .bind(new.policy_overrides.as_ref().map(|v| v.to_string()))
        .bind(new.policy_repo_local_enabled as i64)
        .bind(mode)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(from_sqlx)?;
        row_to_project(&row)
    }

    async fn get_project(&self, id: ProjectId) -> CoreResult<Project> {
        let row = sqlx::query("SELECT * FROM projects WHERE id = ?")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(from_sqlx)?
            .ok_or_else(|| CoreError::NotFound(format!("project {id}")))?;
        row_to_project(&row)
    }

    async fn get_project_by_name(&self, name: &str) -> CoreResult<Option<Project>> {
        let row = sqlx::query("SELECT * FROM projects WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(from_sqlx)?;
        row.as_ref().map(row_to_project).transpose()
    }

    async fn update_project_policy(&self, id: ProjectId, update: PolicyUpdate) -> CoreResult<Project> {
        if update.is_conflicting() {
            return Err(CoreError::Conflict("ConflictingOptions".to_string()));
        }
        let mut project = self.get_project(id).await?;
        if let Some(key) = update.policy_pack_key {
            project.policy_pack_key = Some(key);
        }
        if update.clear_policy_pack_version {
            project.policy_pack_version = None;
        } else if let Some(version) = update.policy_pack_version {
            project.policy_pack_version = Some(version);
        }
        if let Some(overrides) = update.policy_overrides {
            project.policy_overrides = Some(overrides);
        }
        if let Some(enabled) = update.policy_repo_local_enabled {
            project.policy_repo_local_enabled = enabled;
        }
        if let Some(mode) = update.policy_enforcement_mode {
            project.policy_enforcement_mode = mode;
        }
        project.policy_effective_hash = Some(placeholder_hash(&project));
        let now = chrono::Utc::now();
        let mode = if matches!(project.policy_enforcement_mode, EnforcementMode::Block) { "block" } else { "warn" };
        let row = sqlx::query(
            r#"UPDATE projects SET policy_pack_key=?, policy_pack_version=?, policy_overrides=?,
               policy_repo_local_enabled=?, policy_enforcement_mode=?, policy_effective_hash=?, updated_at=?
               WHERE id=? RETURNING *"#,
        )
        .bind(&project.policy_pack_key)
        .bind(&project.policy_pack_version)
        .bind(project.policy_overrides.as_ref().map(|v| v.to_string()))
        .bind(project.policy_repo_local_enabled as i64)
        .bind(mode)
        .bind(&project.policy_effective_hash)
        .bind(now)
        .bind(id.get())
        .fetch_one(&self.pool)
        .await
        .map_err(from_sqlx)?;
        row_to_project(&row)
    }

    async fn list_projects(&self) -> CoreResult<Vec<Project>> {
        let rows = sqlx::query("SELECT * FROM projects ORDER BY id").fetch_all(&self.pool).await.map_err(from_sqlx)?;
        rows.iter().map(row_to_project).collect()
    }

    async fn delete_project(&self, id: ProjectId) -> CoreResult<()> {
        let result = sqlx::query("DELETE FROM projects WHERE id = ?").bind(id.get()).execute(&self.pool).await.map_err(from_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("project {id}")));
        }
        Ok(())
    }

    async fn create_protocol_run(&self, new: NewProtocolRun) -> CoreResult<ProtocolRun> {
        let project = self.get_project(new.project_id).await?;
        let now = chrono::Utc::now();
        let row = sqlx::query(
            r#"INSERT INTO protocol_runs
               (project_id, protocol_name, status, base_branch, description, template_source, template_config,
                policy_pack_key, policy_pack_version, policy_effective_hash, created_at, updated_at)
               VALUES (?,?,?,?,?,?,?,?,?,?,?,?)
               RETURNING *"#,
        )
        .bind(new.project_id.get())
        .bind(&new.protocol_name)
        .bind(to_status_str(ProtocolStatus::Pending))
        .bind(&new.base_branch)
        .bind(&new.description)
        .bind(&new.template_source)
        .bind(new.template_config.as_ref().map(|v| v.to_string()))
        .bind(&project.policy_pack_key)
        .bind(&project.policy_pack_version)
        .bind(&project.policy_effective_hash)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                CoreError::Conflict(format!("DuplicateProtocol: {} already exists for project {}", new.protocol_name, new.project_id))
            }
            other => from_sqlx(other),
        })?;
        row_to_protocol_run(&row)
    }

    async fn get_protocol_run(&self, id: ProtocolRunId) -> CoreResult<ProtocolRun> {
        let row = sqlx::query("SELECT * FROM protocol_runs WHERE id = ?")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(from_sqlx)?
            .ok_or_else(|| CoreError::NotFound(format!("protocol run {id}")))?;
        row_to_protocol_run(&row)
    }

    async fn update_protocol_status(&self, id: ProtocolRunId, new_status: ProtocolStatus) -> CoreResult<ProtocolRun> {
        let current = self.get_protocol_run(id).await?;
        if !current.status.can_transition(new_status) {
            return Err(CoreError::IllegalTransition { from: current.status.to_string(), to: new_status.to_string() });
        }
        let row = sqlx::query("UPDATE protocol_runs SET status=?, updated_at=? WHERE id=? AND status=? RETURNING *")
            .bind(to_status_str(new_status))
            .bind(chrono::Utc::now())
            .bind(id.get())
            .bind(to_status_str(current.status))
            .fetch_optional(&self.pool)
            .await
            .map_err(from_sqlx)?
            .ok_or_else(|| CoreError::IllegalTransition { from: current.status.to_string(), to: new_status.to_string() })?;
        row_to_protocol_run(&row)
    }

    async fn list_protocol_runs(&self, project_id: ProjectId) -> CoreResult<Vec<ProtocolRun>> {
        let rows = sqlx::query("SELECT * FROM protocol_runs WHERE project_id = ? ORDER BY id")
            .bind(project_id.get())
            .fetch_all(&self.pool)
            .await
            .map_err(from_sqlx)?;
        rows.iter().map(row_to_protocol_run).collect()
    }

    async fn create_step_run(&self, new: NewStepRun) -> CoreResult<StepRun> {
        let depends_on_json = serde_json::to_string(&new.depends_on.iter().map(|id| id.get()).collect::<Vec<_>>()).map_err(json_error)?;
        let now = chrono::Utc::now();
        let row = sqlx::query(
            r#"INSERT INTO step_runs
               (protocol_run_id, step_index, step_name, step_type, status, priority, model, engine_id,
                policy, depends_on, parallel_group, created_at, updated_at)
               VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?)
               RETURNING *"#,
        )
        .bind(new.protocol_run_id.get())
        .bind(new.step_index)
        .bind(&new.step_name)
        .bind(new.step_type.to_string())
        .bind(step_status_str(new.status))
        .bind(new.priority)
        .bind(&new.model)
        .bind(&new.engine_id)
        .bind(new.policy.as_ref().map(|v| v.to_string()))
        .bind(depends_on_json)
        .bind(new.parallel_group)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => CoreError::Conflict(format!(
                "DuplicateStep: index {} or name {:?} already exists in protocol run {}",
                new.step_index, new.step_name, new.protocol_run_id
            )),
            other => from_sqlx(other),
        })?;
        row_to_step_run(&row)
    }

    async fn get_step_run(&self, id: StepRunId) -> CoreResult<StepRun> {
        let row = sqlx::query("SELECT * FROM step_runs WHERE id = ?")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(from_sqlx)?
            .ok_or_else(|| CoreError::NotFound(format!("step run {id}")))?;
        row_to_step_run(&row)
    }

    async fn update_step_status(&self, id: StepRunId, new_status: StepStatus, summary: Option<String>) -> CoreResult<StepRun> {
        let current = self.get_step_run(id).await?;
        if !current.status.can_transition(new_status) {
            return Err(CoreError::IllegalTransition { from: current.status.to_string(), to: new_status.to_string() });
        }
        let retries = if matches!(new_status, StepStatus::Pending) && matches!(current.status, StepStatus::Failed) {
            current.retries + 1
        } else {
            current.retries
        };
        let summary = summary.or(current.summary);
        let row = sqlx::query(
            "UPDATE step_runs SET status=?, retries=?, summary=?, updated_at=? WHERE id=? AND status=? RETURNING *",
        )
        .bind(step_status_str(new_status))
        .bind(retries)
        .bind(&summary)
        .bind(chrono::Utc::now())
        .bind(id.get())
        .bind(step_status_str(current.status))
        .fetch_optional(&self.pool)
        .await
        .map_err(from_sqlx)?
        .ok_or_else(|| CoreError::IllegalTransition { from: current.status.to_string(), to: new_status.to_string() })?;
        row_to_step_run(&row)
    }

    async fn list_step_runs(&self, protocol_run_id: ProtocolRunId) -> CoreResult<Vec<StepRun>> {
        let rows = sqlx::query("SELECT * FROM step_runs WHERE protocol_run_id = ? ORDER BY step_index, id")
            .bind(protocol_run_id.get())
            .fetch_all(&self.pool)
            .await
            .map_err(from_sqlx)?;
        rows.iter().map(row_to_step_run).collect()
    }

    async fn append_event(&self, new: NewEvent) -> CoreResult<Event> {
        if !new.has_scope() {
            return Err(CoreError::ValidationError("append_event requires protocol_run_id or project_id".to_string()));
        }
        let row = sqlx::query(
            r#"INSERT INTO events (protocol_run_id, step_run_id, project_id, event_type, message, metadata, created_at)
               VALUES (?,?,?,?,?,?,?) RETURNING *"#,
        )
        .bind(new.protocol_run_id.map(|id| id.get()))
        .bind(new.step_run_id.map(|id| id.get()))
        .bind(new.project_id.map(|id| id.get()))
        .bind(&new.event_type)
        .bind(&new.message)
        .bind(new.metadata.as_ref().map(|v| v.to_string()))
        .bind(chrono::Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(from_sqlx)?;
        row_to_event(&row)
    }

    async fn list_events(&self, filter: EventFilter) -> CoreResult<Vec<Event>> {
        let mut sql = String::from("SELECT * FROM events WHERE 1=1");
        if filter.protocol_run_id.is_some() {
            sql.push_str(" AND protocol_run_id = ?");
        }
        if filter.step_run_id.is_some() {
            sql.push_str(" AND step_run_id = ?");
        }
        if filter.project_id.is_some() {
            sql.push_str(" AND project_id = ?");
        }
        if filter.event_type.is_some() {
            sql.push_str(" AND event_type = ?");
        }
        if filter.after_id.is_some() {
            sql.push_str(" AND id < ?");
        }
        sql.push_str(" ORDER BY id DESC");
        if filter.limit > 0 {
            sql.push_str(" LIMIT ?");
        }
        let mut query = sqlx::query(&sql);
        if let Some(v) = filter.protocol_run_id {
            query = query.bind(v.get());
        }
        if let Some(v) = filter.step_run_id {
            query = query.bind(v.get());
        }
        if let Some(v) = filter.project_id {
            query = query.bind(v.get());
        }
        if let Some(v) = &filter.event_type {
            query = query.bind(v.clone());
        }
        if let Some(v) = filter.after_id {
            query = query.bind(v.get());
        }
        if filter.limit > 0 {
            query = query.bind(filter.limit);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(from_sqlx)?;
        rows.iter().map(row_to_event).collect()
    }

    async fn upsert_policy_pack(&self, pack: PolicyPack) -> CoreResult<PolicyPack> {
        let now = chrono::Utc::now();
        let status = match pack.status {
            PolicyPackStatus::Active => "active",
            PolicyPackStatus::Draft => "draft",
            PolicyPackStatus::Deprecated => "deprecated",
        };
        let document = serde_json::to_string(&pack.pack).map_err(json_error)?;
        let row = sqlx::query(
            r#"INSERT INTO policy_packs (key, version, name, description, status, pack, created_at, updated_at)
               VALUES (?,?,?,?,?,?,?,?)
               ON CONFLICT (key, version) DO UPDATE SET
                 name=excluded.name, description=excluded.description, status=excluded.status,
                 pack=excluded.pack, updated_at=excluded.updated_at
               RETURNING *"#,
        )
        .bind(&pack.key)
        .bind(&pack.version)
        .bind(&pack.name)
        .bind(&pack.description)
        .bind(status)
        .bind(document)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(from_sqlx)?;
        row_to_policy_pack(&row)
    }

    async fn load_policy_pack(&self, key: &str, version: Option<&str>) -> CoreResult<PolicyPack> {
        let row = if let Some(version) = version {
            sqlx::query("SELECT * FROM policy_packs WHERE key = ? AND version = ?")
                .bind(key)
                .bind(version)
                .fetch_optional(&self.pool)
                .await
        } else {
            sqlx::query("SELECT * FROM policy_packs WHERE key = ? AND status = 'active' ORDER BY version DESC LIMIT 1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
        }
        .map_err(from_sqlx)?
        .ok_or_else(|| CoreError::NotFound(format!("policy pack {key}")))?;
        row_to_policy_pack(&row)
    }

    async fn create_codex_run(&self, run: CodexRun) -> CoreResult<CodexRun> {
        sqlx::query(
            r#"INSERT INTO codex_runs
               (run_id, job_type, run_kind, status, project_id, protocol_run_id, step_run_id, queue,
                attempt, worker_id, started_at, finished_at, prompt_version, params, result, error,
                log_path, cost_tokens, cost_cents)
               VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)"#,
        )
        .bind(run.run_id.to_string())
        .bind(&run.job_type)
        .bind(&run.run_kind)
        .bind(codex_status_str(run.status))
        .bind(run.project_id.map(|id| id.get()))
        .bind(run.protocol_run_id.map(|id| id.get()))
        .bind(run.step_run_id.map(|id| id.get()))
        .bind(&run.queue)
        .bind(run.attempt)
        .bind(&run.worker_id)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(&run.prompt_version)
        .bind(run.params.as_ref().map(|v| v.to_string()))
        .bind(run.result.as_ref().map(|v| v.to_string()))
        .bind(&run.error)
        .bind(&run.log_path)
        .bind(run.cost_tokens)
        .bind(run.cost_cents)
        .execute(&self.pool)
        .await
        .map_err(from_sqlx)?;
        Ok(run)
    }

    async fn update_codex_run(&self, run: CodexRun) -> CoreResult<CodexRun> {
        sqlx::query(
            r#"UPDATE codex_runs SET status=?, started_at=?, finished_at=?, result=?, error=?,
               cost_tokens=?, cost_cents=? WHERE run_id=?"#,
        )
        .bind(codex_status_str(run.status))
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.result.as_ref().map(|v| v.to_string()))
        .bind(&run.error)
        .bind(run.cost_tokens)
        .bind(run.cost_cents)
        .bind(run.run_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(from_sqlx)?;
        Ok(run)
    }

    async fn get_codex_run(&self, id: CodexRunId) -> CoreResult<CodexRun> {
        let row = sqlx::query("SELECT * FROM codex_runs WHERE run_id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(from_sqlx)?
            .ok_or_else(|| CoreError::NotFound(format!("codex run {id}")))?;
        row_to_codex_run(&row)
    }

    async fn insert_job(&self, job: Job) -> CoreResult<Job> {
        sqlx::query(
            r#"INSERT INTO jobs (job_id, job_type, payload, queue, status, attempts, max_attempts, next_run_at)
               VALUES (?,?,?,?,?,?,?,?)"#,
        )
        .bind(job.job_id.to_string())
        .bind(job.job_type.to_string())
        .bind(job.payload.to_string())
        .bind(&job.queue)
        .bind(job_status_str(job.status))
        .bind(job.attempts)
        .bind(job.max_attempts)
        .bind(job.next_run_at)
        .execute(&self.pool)
        .await
        .map_err(from_sqlx)?;
        Ok(job)
    }

    async fn claim_job(&self, queue: &str) -> CoreResult<Option<Job>> {
        let mut tx = self.pool.begin().await.map_err(from_sqlx)?;
        let row = sqlx::query(
            "SELECT * FROM jobs WHERE queue = ? AND status = 'queued' AND next_run_at <= ? ORDER BY next_run_at, rowid LIMIT 1",
        )
        .bind(queue)
        .bind(chrono::Utc::now())
        .fetch_optional(&mut *tx)
        .await
        .map_err(from_sqlx)?;
        let Some(row) = row else {
            tx.commit().await.map_err(from_sqlx)?;
            return Ok(None);
        };
        let job_id: String = row.try_get("job_id").map_err(from_sqlx)?;
        let claimed = sqlx::query("UPDATE jobs SET status='started', started_at=? WHERE job_id=? RETURNING *")
            .bind(chrono::Utc::now())
            .bind(&job_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(from_sqlx)?;
        tx.commit().await.map_err(from_sqlx)?;
        Ok(Some(row_to_job(&claimed)?))
    }

    async fn finish_job(&self, job_id: JobId, status: JobStatus, result: Option<serde_json::Value>, error: Option<String>) -> CoreResult<Job> {
        let row = sqlx::query("UPDATE jobs SET status=?, ended_at=?, result=?, error=? WHERE job_id=? RETURNING *")
            .bind(job_status_str(status))
            .bind(chrono::Utc::now())
            .bind(result.as_ref().map(|v| v.to_string()))
            .bind(&error)
            .bind(job_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(from_sqlx)?
            .ok_or_else(|| CoreError::NotFound(format!("job {job_id}")))?;
        row_to_job(&row)
    }

    async fn requeue_job(&self, job_id: JobId, delay: chrono::Duration, bump_attempts: bool) -> CoreResult<Job> {
        let next_run_at = chrono::Utc::now() + delay;
        let sql = if bump_attempts {
            "UPDATE jobs SET status='queued', next_run_at=?, started_at=NULL, attempts=attempts+1 WHERE job_id=? RETURNING *"
        } else {
            "UPDATE jobs SET status='queued', next_run_at=?, started_at=NULL WHERE job_id=? RETURNING *"
        };
        let row = sqlx::query(sql)
            .bind(next_run_at)
            .bind(job_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(from_sqlx)?
            .ok_or_else(|| CoreError::NotFound(format!("job {job_id}")))?;
        row_to_job(&row)
    }

    async fn recover_expired_jobs(&self, visibility_timeout: chrono::Duration) -> CoreResult<usize> {
        let cutoff = chrono::Utc::now() - visibility_timeout;
        let result = sqlx::query("UPDATE jobs SET status='queued', started_at=NULL, attempts=attempts+1 WHERE status='started' AND started_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(from_sqlx)?;
        Ok(result.rows_affected() as usize)
    }

    async fn list_jobs(&self, status: Option<JobStatus>) -> CoreResult<Vec<Job>> {
        let rows = if let Some(status) = status {
            sqlx::query("SELECT * FROM jobs WHERE status = ?").bind(job_status_str(status)).fetch_all(&self.pool).await
        } else {
            sqlx::query("SELECT * FROM jobs").fetch_all(&self.pool).await
        }
        .map_err(from_sqlx)?;
        rows.iter().map(row_to_job).collect()
    }

    async fn get_job(&self, job_id: JobId) -> CoreResult<Job> {
        let row = sqlx::query("SELECT * FROM jobs WHERE job_id = ?")
            .bind(job_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(from_sqlx)?
            .ok_or_else(|| CoreError::NotFound(format!("job {job_id}")))?;
        row_to_job(&row)
    }

    async fn create_clarification(&self, clarification: Clarification) -> CoreResult<Clarification> {
        let row = sqlx::query(
            r#"INSERT INTO clarifications
               (scope, project_id, protocol_run_id, step_run_id, key, question, options, recommended,
                blocking, status)
               VALUES (?,?,?,?,?,?,?,?,?,?)
               RETURNING *"#,
        )
        .bind(clarification_scope_str(clarification.scope))
        .bind(clarification.project_id.get())
        .bind(clarification.protocol_run_id.map(|id| id.get()))
        .bind(clarification.step_run_id.map(|id| id.get()))
        .bind(&clarification.key)
        .bind(&clarification.question)
        .bind(clarification.options.as_ref().map(|o| serde_json::to_string(o).unwrap_or_default()))
        .bind(&clarification.recommended)
        .bind(clarification.blocking as i64)
        .bind(clarification_status_str(clarification.status))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                CoreError::Conflict(format!("clarification key {:?} already exists in scope", clarification.key))
            }
            other => from_sqlx(other),
        })?;
        row_to_clarification(&row)
    }

    async fn answer_clarification(&self, id: ClarificationId, answer: String, answered_by: String) -> CoreResult<Clarification> {
        let row = sqlx::query(
            "UPDATE clarifications SET answer=?, status='answered', answered_at=?, answered_by=? WHERE id=? RETURNING *",
        )
        .bind(&answer)
        .bind(chrono::Utc::now())
        .bind(&answered_by)
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(from_sqlx)?
        .ok_or_else(|| CoreError::NotFound(format!("clarification {id}")))?;
        row_to_clarification(&row)
    }

    async fn list_clarifications(&self, scope: Option<ClarificationScope>, protocol_run_id: Option<ProtocolRunId>) -> CoreResult<Vec<Clarification>> {
        let mut sql = String::from("SELECT * FROM clarifications WHERE 1=1");
        if scope.is_some() {
            sql.push_str(" AND scope = ?");
        }
        if protocol_run_id.is_some() {
            sql.push_str(" AND protocol_run_id = ?");
        }
        let mut query = sqlx::query(&sql);
        if let Some(s) = scope {
            query = query.bind(clarification_scope_str(s));
        }
        if let Some(p) = protocol_run_id {
            query = query.bind(p.get());
        }
        let rows = query.fetch_all(&self.pool).await.map_err(from_sqlx)?;
        rows.iter().map(row_to_clarification).collect()
    }

    async fn has_open_blocking_clarification(&self, protocol_run_id: ProtocolRunId) -> CoreResult<bool> {
        let clarifications = self.list_clarifications(None, Some(protocol_run_id)).await?;
        Ok(clarifications.iter().any(clarification_is_open_blocking))
    }
}

fn row_to_policy_pack(row: &sqlx::sqlite::SqliteRow) -> CoreResult<PolicyPack> {
    let document_raw: String = row.try_get("pack").map_err(from_sqlx)?;
    let status_raw: String = row.try_get("status").map_err(from_sqlx)?;
    Ok(PolicyPack {
        id: PolicyPackId::new(row.try_get("id").map_err(from_sqlx)?),
        key: row.try_get("key").map_err(from_sqlx)?,
        version: row.try_get("version").map_err(from_sqlx)?,
        name: row.try_get("name").map_err(from_sqlx)?,
        description: row.try_get("description").map_err(from_sqlx)?,
        status: match status_raw.as_str() {
            "draft" => PolicyPackStatus::Draft,
            "deprecated" => PolicyPackStatus::Deprecated,
            _ => PolicyPackStatus::Active,
        },
        pack: serde_json::from_str(&document_raw).map_err(json_error)?,
        created_at: row.try_get("created_at").map_err(from_sqlx)?,
        updated_at: row.try_get("updated_at").map_err(from_sqlx)?,
    })
}

fn codex_status_str(status: CodexRunStatus) -> &'static str {
    match status {
        CodexRunStatus::Queued => "queued",
        CodexRunStatus::Running => "running",
        CodexRunStatus::Succeeded => "succeeded",
        CodexRunStatus::Failed => "failed",
        CodexRunStatus::Cancelled => "cancelled",
    }
}

fn row_to_codex_run(row: &sqlx::sqlite::SqliteRow) -> CoreResult<CodexRun> {
    let run_id_raw: String = row.try_get("run_id").map_err(from_sqlx)?;
    let run_id = run_id_raw
        .strip_prefix(CodexRunId::PREFIX)
        .and_then(|s| uuid::Uuid::parse_str(s).ok())
        .map(CodexRunId::from_uuid)
        .ok_or_else(|| CoreError::Storage(format!("malformed codex run id {run_id_raw:?}")))?;
    let status_raw: String = row.try_get("status").map_err(from_sqlx)?;
    Ok(CodexRun {
        run_id,
        job_type: row.try_get("job_type").map_err(from_sqlx)?,
        run_kind: row.try_get("run_kind").map_err(from_sqlx)?,
        status: match status_raw.as_str() {
            "running" => CodexRunStatus::Running,
            "succeeded" => CodexRunStatus::Succeeded,
            "failed" => CodexRunStatus::Failed,
            "cancelled" => CodexRunStatus::Cancelled,
            _ => CodexRunStatus::Queued,
        },
        project_id: row.try_get::<Option<i64>, _>("project_id").map_err(from_sqlx)?.map(ProjectId::new),
        protocol_run_id: row.try_get::<Option<i64>, _>("protocol_run_id").map_err(from_sqlx)?.map(ProtocolRunId::new),
        step_run_id: row.try_get::<Option<i64>, _>("step_run_id").map_err(from_sqlx)?.map(StepRunId::new),
        queue: row.try_get("queue").map_err(from_sqlx)?,
        attempt: row.try_get("attempt").map_err(from_sqlx)?,
        worker_id: row.try_get("worker_id").map_err(from_sqlx)?,
        started_at: row.try_get("started_at").map_err(from_sqlx)?,
        finished_at: row.try_get("finished_at").map_err(from_sqlx)?,
        prompt_version: row.try_get("prompt_version").map_err(from_sqlx)?,
        params: parse_opt_json(row.try_get("params").map_err(from_sqlx)?)?,
        result: parse_opt_json(row.try_get("result").map_err(from_sqlx)?)?,
        error: row.try_get("error").map_err(from_sqlx)?,
        log_path: row.try_get("log_path").map_err(from_sqlx)?,
        cost_tokens: row.try_get("cost_tokens").map_err(from_sqlx)?,
        cost_cents: row.try_get("cost_cents").map_err(from_sqlx)?,
    })
}

fn job_status_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Queued => "queued",
        JobStatus::Started => "started",
        JobStatus::Finished => "finished",
        JobStatus::Failed => "failed",
    }
}

fn job_type_from_str(s: &str) -> CoreResult<JobType> {
    Ok(match s {
        "plan_protocol_job" => JobType::PlanProtocol,
        "execute_step_job" => JobType::ExecuteStep,
        "run_quality_job" => JobType::RunQuality,
        "open_pr_job" => JobType::OpenPr,
        "project_setup_job" => JobType::ProjectSetup,
        other => return Err(CoreError::Storage(format!("unknown job type {other:?}"))),
    })
}

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> CoreResult<Job> {
    let job_id_raw: String = row.try_get("job_id").map_err(from_sqlx)?;
    let job_id = job_id_raw
        .strip_prefix(JobId::PREFIX)
        .and_then(|s| uuid::Uuid::parse_str(s).ok())
        .map(JobId::from_uuid)
        .ok_or_else(|| CoreError::Storage(format!("malformed job id {job_id_raw:?}")))?;
    let status_raw: String = row.try_get("status").map_err(from_sqlx)?;
    let payload_raw: String = row.try_get("payload").map_err(from_sqlx)?;
    Ok(Job {
        job_id,
        job_type: job_type_from_str(&row.try_get::<String, _>("job_type").map_err(from_sqlx)?)?,
        payload: serde_json::from_str(&payload_raw).map_err(json_error)?,
        queue: row.try_get("queue").map_err(from_sqlx)?,
        status: match status_raw.as_str() {
            "started" => JobStatus::Started,
            "finished" => JobStatus::Finished,
            "failed" => JobStatus::Failed,
            _ => JobStatus::Queued,
        },
        attempts: row.try_get("attempts").map_err(from_sqlx)?,
        max_attempts: row.try_get("max_attempts").map_err(from_sqlx)?,
        next_run_at: row.try_get("next_run_at").map_err(from_sqlx)?,
        started_at: row.try_get("started_at").map_err(from_sqlx)?,
        ended_at: row.try_get("ended_at").map_err(from_sqlx)?,
        result: parse_opt_json(row.try_get("result").map_err(from_sqlx)?)?,
        error: row.try_get("error").map_err(from_sqlx)?,
    })
}

fn clarification_scope_str(scope: ClarificationScope) -> &'static str {
    match scope {
        ClarificationScope::Project => "project",
        ClarificationScope::Protocol => "protocol",
        ClarificationScope::Step => "step",
    }
}

fn clarification_status_str(status: ClarificationStatus) -> &'static str {
    match status {
        ClarificationStatus::Open => "open",
        ClarificationStatus::Answered => "answered",
        ClarificationStatus::Dismissed => "dismissed",
    }
}

fn row_to_clarification(row: &sqlx::sqlite::SqliteRow) -> CoreResult<Clarification> {
    let scope_raw: String = row.try_get("scope").map_err(from_sqlx)?;
    let status_raw: String = row.try_get("status").map_err(from_sqlx)?;
    let options_raw: Option<String> = row.try_get("options").map_err(from_sqlx)?;
    Ok(Clarification {
        id: ClarificationId::new(row.try_get("id").map_err(from_sqlx)?),
        scope: match scope_raw.as_str() {
            "project" => ClarificationScope::Project,
            "protocol" => ClarificationScope::Protocol,
            _ => ClarificationScope::Step,
        },
        project_id: ProjectId::new(row.try_get("project_id").map_err(from_sqlx)?),
        protocol_run_id: row.try_get::<Option<i64>, _>("protocol_run_id").map_err(from_sqlx)?.map(ProtocolRunId::new),
        step_run_id: row.try_get::<Option<i64>, _>("step_run_id").map_err(from_sqlx)?.map(StepRunId::new),
        key: row.try_get("key").map_err(from_sqlx)?,
        question: row.try_get("question").map_err(from_sqlx)?,
        options: options_raw.map(|s| serde_json::from_str(&s)).transpose().map_err(json_error)?,
        recommended: row.try_get("recommended").map_err(from_sqlx)?,
        blocking: row.try_get::<i64, _>("blocking").map_err(from_sqlx)? != 0,
        answer: row.try_get("answer").map_err(from_sqlx)?,
        status: match status_raw.as_str() {
            "answered" => ClarificationStatus::Answered,
            "dismissed" => ClarificationStatus::Dismissed,
            _ => ClarificationStatus::Open,
        },
        answered_at: row.try_get("answered_at").map_err(from_sqlx)?,
        answered_by: row.try_get("answered_by").map_err(from_sqlx)?,
    })
}

fn placeholder_hash(project: &Project) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(project.policy_pack_key.as_deref().unwrap_or(""));
    hasher.update(project.policy_pack_version.as_deref().unwrap_or(""));
    if let Some(overrides) = &project.policy_overrides {
        hasher.update(overrides.to_string());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
#[path = "sqlite_tests.rs"]
mod tests;
