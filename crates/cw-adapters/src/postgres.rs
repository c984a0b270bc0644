//! PostgreSQL application store.
//!
//! Every contract operation runs in one transaction; the application row is
//! locked `FOR UPDATE` wherever a read feeds a write, and the state
//! compare-and-set is the ordering point for all transitions.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cw_domain::{
    ApplicantForm, Application, ApplicationId, ApplicationState, Decision, DecisionOutcome,
    Document, DocumentId, DocumentKind, Lease, OwnerId, Stage, StageErrorKind, StageRecord,
    StageStatus, StepId, StepStatus, WorkflowStateMachine, WorkflowStep,
};
use cw_ports::{
    ApplicationStore, DocumentMeta, FullApplication, LeaseOutcome, NewStep, StageUpdate,
    StoreError, TransitionOutcome,
};
use sqlx::{postgres::PgRow, PgPool, Postgres, Row, Transaction};
use tracing::{debug, instrument};

/// PostgreSQL-backed [`ApplicationStore`].
pub struct PgApplicationStore {
    pool: PgPool,
}

impl PgApplicationStore {
    /// Wrap an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to PostgreSQL and create a new store.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(connection_error)?;
        Ok(Self { pool })
    }

    /// Get a reference to the underlying pool (for health checks/tests).
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending schema migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Connection {
                message: e.to_string(),
            })
    }

    /// Lock the application row and return its current state.
    async fn lock_state(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        application_id: &ApplicationId,
    ) -> Result<ApplicationState, StoreError> {
        let row = sqlx::query("SELECT state FROM applications WHERE id = $1 FOR UPDATE")
            .bind(application_id.as_str())
            .fetch_optional(&mut **tx)
            .await
            .map_err(connection_error)?
            .ok_or_else(|| not_found(application_id))?;
        parse_state(row.get("state"))
    }

    /// Insert the next workflow step inside an open transaction. The caller
    /// must hold the application row lock so sequences stay gapless.
    async fn insert_step(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        application_id: &ApplicationId,
        from: ApplicationState,
        to: ApplicationState,
        step: NewStep,
    ) -> Result<(), StoreError> {
        let sequence: i32 = sqlx::query(
            "SELECT COALESCE(MAX(sequence), 0) + 1 AS next FROM workflow_steps WHERE application_id = $1",
        )
        .bind(application_id.as_str())
        .fetch_one(&mut **tx)
        .await
        .map_err(connection_error)?
        .get("next");

        let duration_ms = step
            .completed_at
            .map(|end| (end - step.started_at).num_milliseconds());

        sqlx::query(
            r#"
            INSERT INTO workflow_steps
                (id, application_id, sequence, step_name, from_state, to_state,
                 status, message, payload, started_at, completed_at, duration_ms, attempt)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(StepId::new().as_str())
        .bind(application_id.as_str())
        .bind(sequence)
        .bind(&step.step_name)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(step.status.as_str())
        .bind(&step.message)
        .bind(&step.payload)
        .bind(step.started_at)
        .bind(step.completed_at)
        .bind(duration_ms)
        .bind(step.attempt as i32)
        .execute(&mut **tx)
        .await
        .map_err(connection_error)?;
        Ok(())
    }
}

impl ApplicationStore for PgApplicationStore {
    #[instrument(skip(self, form, step), fields(owner_id = %owner_id.as_str()))]
    async fn create_application(
        &self,
        owner_id: &OwnerId,
        form: &ApplicantForm,
        step: NewStep,
    ) -> Result<Application, StoreError> {
        let id = ApplicationId::new();
        let now = step.started_at;

        let mut tx = self.pool.begin().await.map_err(connection_error)?;
        sqlx::query(
            r#"
            INSERT INTO applications
                (id, owner_id, full_name, national_id, phone, email, state,
                 cancel_requested, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, FALSE, $8, $8)
            "#,
        )
        .bind(id.as_str())
        .bind(owner_id.as_str())
        .bind(&form.full_name)
        .bind(&form.national_id)
        .bind(&form.phone)
        .bind(&form.email)
        .bind(ApplicationState::Draft.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(connection_error)?;

        self.insert_step(
            &mut tx,
            &id,
            ApplicationState::Draft,
            ApplicationState::Draft,
            step,
        )
        .await?;
        tx.commit().await.map_err(connection_error)?;

        self.load(&id).await
    }

    #[instrument(skip(self, meta), fields(application_id = %application_id.as_str(), kind = kind.as_str()))]
    async fn attach_document(
        &self,
        application_id: &ApplicationId,
        kind: DocumentKind,
        storage_handle: &str,
        meta: DocumentMeta,
    ) -> Result<Document, StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(connection_error)?;

        let row = sqlx::query(
            "SELECT state, lease_expires_at FROM applications WHERE id = $1 FOR UPDATE",
        )
        .bind(application_id.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(connection_error)?
        .ok_or_else(|| not_found(application_id))?;

        let state = parse_state(row.get("state"))?;
        if !matches!(
            state,
            ApplicationState::FormSubmitted
                | ApplicationState::DocumentsUploaded
                | ApplicationState::ProcessingFailed
        ) {
            return Err(StoreError::InvalidState {
                state: state.as_str().to_string(),
                action: "attach_document".to_string(),
            });
        }
        let lease_expires: Option<DateTime<Utc>> = row.get("lease_expires_at");
        if state == ApplicationState::ProcessingFailed
            && lease_expires.map(|t| t > now).unwrap_or(false)
        {
            return Err(StoreError::Busy);
        }

        sqlx::query("DELETE FROM documents WHERE application_id = $1 AND kind = $2")
            .bind(application_id.as_str())
            .bind(kind.as_str())
            .execute(&mut *tx)
            .await
            .map_err(connection_error)?;

        let id = DocumentId::new();
        sqlx::query(
            r#"
            INSERT INTO documents
                (id, application_id, kind, filename, byte_size, content_type,
                 storage_handle, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            "#,
        )
        .bind(id.as_str())
        .bind(application_id.as_str())
        .bind(kind.as_str())
        .bind(&meta.filename)
        .bind(meta.byte_size)
        .bind(&meta.content_type)
        .bind(storage_handle)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(connection_error)?;
        tx.commit().await.map_err(connection_error)?;

        let row = sqlx::query("SELECT * FROM documents WHERE id = $1")
            .bind(id.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(connection_error)?;
        document_from_row(&row)
    }

    #[instrument(
        skip(self, step),
        fields(
            application_id = %application_id.as_str(),
            from = expected_from.as_str(),
            to = to.as_str(),
        )
    )]
    async fn transition(
        &self,
        application_id: &ApplicationId,
        expected_from: ApplicationState,
        to: ApplicationState,
        step: NewStep,
    ) -> Result<TransitionOutcome, StoreError> {
        WorkflowStateMachine::validate(expected_from, to)?;

        let now = step.completed_at.unwrap_or(step.started_at);
        let mut tx = self.pool.begin().await.map_err(connection_error)?;

        let actual = self.lock_state(&mut tx, application_id).await?;
        if actual != expected_from {
            debug!(actual = actual.as_str(), "transition conflict");
            return Ok(TransitionOutcome::Conflict { actual });
        }

        sqlx::query(
            r#"
            UPDATE applications SET
                state = $2,
                updated_at = $3,
                submitted_at = CASE WHEN $4 THEN COALESCE(submitted_at, $3) ELSE submitted_at END,
                processed_at = CASE WHEN $5 THEN $3 ELSE processed_at END,
                decided_at   = CASE WHEN $6 THEN $3 ELSE decided_at END
            WHERE id = $1
            "#,
        )
        .bind(application_id.as_str())
        .bind(to.as_str())
        .bind(now)
        .bind(to == ApplicationState::FormSubmitted)
        .bind(to == ApplicationState::DecisionCompleted)
        .bind(to.is_decided())
        .execute(&mut *tx)
        .await
        .map_err(connection_error)?;

        self.insert_step(&mut tx, application_id, expected_from, to, step)
            .await?;
        tx.commit().await.map_err(connection_error)?;
        Ok(TransitionOutcome::Applied)
    }

    async fn append_step(
        &self,
        application_id: &ApplicationId,
        step: NewStep,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(connection_error)?;
        let state = self.lock_state(&mut tx, application_id).await?;
        self.insert_step(&mut tx, application_id, state, state, step)
            .await?;
        tx.commit().await.map_err(connection_error)
    }

    async fn acquire_lease(
        &self,
        application_id: &ApplicationId,
        worker_id: &str,
        ttl: Duration,
    ) -> Result<LeaseOutcome, StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(connection_error)?;

        let row = sqlx::query(
            r#"
            SELECT lease_worker_id, lease_acquired_at, lease_expires_at
            FROM applications WHERE id = $1 FOR UPDATE
            "#,
        )
        .bind(application_id.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(connection_error)?
        .ok_or_else(|| not_found(application_id))?;

        let holder: Option<String> = row.get("lease_worker_id");
        let acquired_at: Option<DateTime<Utc>> = row.get("lease_acquired_at");
        let expires_at: Option<DateTime<Utc>> = row.get("lease_expires_at");
        if let (Some(worker), Some(acquired_at), Some(expires_at)) =
            (holder, acquired_at, expires_at)
        {
            if expires_at > now {
                return Ok(LeaseOutcome::Held(Lease {
                    worker_id: worker,
                    acquired_at,
                    expires_at,
                }));
            }
        }

        let lease = Lease {
            worker_id: worker_id.to_string(),
            acquired_at: now,
            expires_at: now
                + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(30)),
        };
        sqlx::query(
            r#"
            UPDATE applications
            SET lease_worker_id = $2, lease_acquired_at = $3, lease_expires_at = $4
            WHERE id = $1
            "#,
        )
        .bind(application_id.as_str())
        .bind(&lease.worker_id)
        .bind(lease.acquired_at)
        .bind(lease.expires_at)
        .execute(&mut *tx)
        .await
        .map_err(connection_error)?;
        tx.commit().await.map_err(connection_error)?;
        Ok(LeaseOutcome::Acquired(lease))
    }

    async fn release_lease(
        &self,
        application_id: &ApplicationId,
        worker_id: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE applications
            SET lease_worker_id = NULL, lease_acquired_at = NULL, lease_expires_at = NULL
            WHERE id = $1 AND lease_worker_id = $2
            "#,
        )
        .bind(application_id.as_str())
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(connection_error)?;
        Ok(())
    }

    async fn request_cancel(&self, application_id: &ApplicationId) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE applications SET cancel_requested = TRUE, updated_at = $2 WHERE id = $1",
        )
        .bind(application_id.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(connection_error)?;
        if result.rows_affected() == 0 {
            return Err(not_found(application_id));
        }
        Ok(())
    }

    async fn update_document_stage(
        &self,
        document_id: &DocumentId,
        update: StageUpdate,
    ) -> Result<bool, StoreError> {
        let prefix = match update.stage {
            Stage::Ocr => "ocr",
            Stage::Extract => "extract",
            Stage::Decide => return Ok(false),
        };
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(connection_error)?;

        let row = sqlx::query(&format!(
            "SELECT {prefix}_status AS status, {prefix}_attempt AS attempt \
             FROM documents WHERE id = $1 FOR UPDATE"
        ))
        .bind(document_id.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(connection_error)?
        .ok_or_else(|| StoreError::NotFound {
            resource: "document",
            id: document_id.as_str().to_string(),
        })?;

        let current_status = StageStatus::from_str(row.get("status")).map_err(serialization)?;
        let current_attempt = row.get::<i32, _>("attempt") as u32;

        // Write-once per attempt: stale attempts and duplicate terminal
        // writes are discarded.
        if update.attempt < current_attempt
            || (update.attempt == current_attempt && current_status.is_terminal())
        {
            return Ok(false);
        }

        let resetting = update.status == StageStatus::Running;
        match update.stage {
            Stage::Ocr => {
                sqlx::query(
                    r#"
                    UPDATE documents SET
                        ocr_status = $2, ocr_attempt = $3, ocr_confidence = $4,
                        ocr_error_kind = $5, ocr_error_message = $6, ocr_completed_at = $7,
                        ocr_text  = CASE WHEN $8 THEN NULL ELSE COALESCE($9, ocr_text) END,
                        ocr_pages = CASE WHEN $8 THEN NULL ELSE COALESCE($10, ocr_pages) END,
                        updated_at = $11
                    WHERE id = $1
                    "#,
                )
                .bind(document_id.as_str())
                .bind(update.status.as_str())
                .bind(update.attempt as i32)
                .bind(update.confidence)
                .bind(update.error_kind.map(|k| k.as_str()))
                .bind(&update.error_message)
                .bind(update.completed_at)
                .bind(resetting)
                .bind(&update.text)
                .bind(update.pages.map(|p| p as i32))
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(connection_error)?;
            }
            Stage::Extract => {
                sqlx::query(
                    r#"
                    UPDATE documents SET
                        extract_status = $2, extract_attempt = $3, extract_confidence = $4,
                        extract_error_kind = $5, extract_error_message = $6,
                        extract_completed_at = $7,
                        extracted_fields = CASE WHEN $8 THEN NULL
                                                ELSE COALESCE($9, extracted_fields) END,
                        updated_at = $10
                    WHERE id = $1
                    "#,
                )
                .bind(document_id.as_str())
                .bind(update.status.as_str())
                .bind(update.attempt as i32)
                .bind(update.confidence)
                .bind(update.error_kind.map(|k| k.as_str()))
                .bind(&update.error_message)
                .bind(update.completed_at)
                .bind(resetting)
                .bind(&update.fields)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(connection_error)?;
            }
            Stage::Decide => {}
        }
        tx.commit().await.map_err(connection_error)?;
        Ok(true)
    }

    async fn record_decision(
        &self,
        application_id: &ApplicationId,
        decision: &Decision,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(connection_error)?;
        let state = self.lock_state(&mut tx, application_id).await?;

        let existing = sqlx::query("SELECT 1 AS one FROM decisions WHERE application_id = $1")
            .bind(application_id.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(connection_error)?;
        if existing.is_some() {
            return Err(StoreError::DecisionExists {
                application_id: application_id.as_str().to_string(),
            });
        }
        if state != ApplicationState::MakingDecision {
            return Err(StoreError::InvalidState {
                state: state.as_str().to_string(),
                action: "record_decision".to_string(),
            });
        }

        sqlx::query(
            r#"
            INSERT INTO decisions
                (application_id, outcome, confidence, reasoning, benefit_amount, decided_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(application_id.as_str())
        .bind(decision.outcome.as_str())
        .bind(decision.confidence)
        .bind(&decision.reasoning)
        .bind(decision.benefit_amount)
        .bind(decision.decided_at)
        .execute(&mut *tx)
        .await
        .map_err(connection_error)?;
        tx.commit().await.map_err(connection_error)
    }

    async fn load(&self, application_id: &ApplicationId) -> Result<Application, StoreError> {
        let row = sqlx::query("SELECT * FROM applications WHERE id = $1")
            .bind(application_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(connection_error)?
            .ok_or_else(|| not_found(application_id))?;
        application_from_row(&row)
    }

    async fn load_full(
        &self,
        application_id: &ApplicationId,
    ) -> Result<FullApplication, StoreError> {
        let application = self.load(application_id).await?;

        let doc_rows =
            sqlx::query("SELECT * FROM documents WHERE application_id = $1 ORDER BY created_at, id")
                .bind(application_id.as_str())
                .fetch_all(&self.pool)
                .await
                .map_err(connection_error)?;
        let documents = doc_rows
            .iter()
            .map(document_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let step_rows = sqlx::query(
            "SELECT * FROM workflow_steps WHERE application_id = $1 ORDER BY sequence",
        )
        .bind(application_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(connection_error)?;
        let steps = step_rows
            .iter()
            .map(step_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let decision_row = sqlx::query("SELECT * FROM decisions WHERE application_id = $1")
            .bind(application_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(connection_error)?;
        let decision = decision_row.map(|r| decision_from_row(&r)).transpose()?;

        Ok(FullApplication {
            application,
            documents,
            steps,
            decision,
        })
    }

    async fn reset(
        &self,
        application_id: &ApplicationId,
        to: ApplicationState,
        step: NewStep,
    ) -> Result<Application, StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(connection_error)?;
        let from = self.lock_state(&mut tx, application_id).await?;
        WorkflowStateMachine::validate_reset(from, to)?;

        sqlx::query("DELETE FROM decisions WHERE application_id = $1")
            .bind(application_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(connection_error)?;

        sqlx::query(
            r#"
            UPDATE documents SET
                ocr_status = 'PENDING', ocr_attempt = 0, ocr_confidence = NULL,
                ocr_error_kind = NULL, ocr_error_message = NULL, ocr_completed_at = NULL,
                ocr_text = NULL, ocr_pages = NULL,
                extract_status = 'PENDING', extract_attempt = 0, extract_confidence = NULL,
                extract_error_kind = NULL, extract_error_message = NULL,
                extract_completed_at = NULL, extracted_fields = NULL,
                updated_at = $2
            WHERE application_id = $1
            "#,
        )
        .bind(application_id.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(connection_error)?;

        sqlx::query(
            r#"
            UPDATE applications SET
                state = $2, cancel_requested = FALSE,
                lease_worker_id = NULL, lease_acquired_at = NULL, lease_expires_at = NULL,
                processed_at = NULL, decided_at = NULL,
                submitted_at = CASE WHEN $3 THEN NULL ELSE submitted_at END,
                updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(application_id.as_str())
        .bind(to.as_str())
        .bind(to == ApplicationState::Draft)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(connection_error)?;

        self.insert_step(&mut tx, application_id, from, to, step)
            .await?;
        tx.commit().await.map_err(connection_error)?;

        self.load(application_id).await
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn application_from_row(row: &PgRow) -> Result<Application, StoreError> {
    let lease = match (
        row.get::<Option<String>, _>("lease_worker_id"),
        row.get::<Option<DateTime<Utc>>, _>("lease_acquired_at"),
        row.get::<Option<DateTime<Utc>>, _>("lease_expires_at"),
    ) {
        (Some(worker_id), Some(acquired_at), Some(expires_at)) => Some(Lease {
            worker_id,
            acquired_at,
            expires_at,
        }),
        _ => None,
    };

    Ok(Application {
        id: ApplicationId::from_string(row.get("id")),
        owner_id: OwnerId::from_string(row.get("owner_id")),
        form: ApplicantForm {
            full_name: row.get("full_name"),
            national_id: row.get("national_id"),
            phone: row.get("phone"),
            email: row.get("email"),
        },
        state: parse_state(row.get("state"))?,
        cancel_requested: row.get("cancel_requested"),
        lease,
        created_at: row.get("created_at"),
        submitted_at: row.get("submitted_at"),
        processed_at: row.get("processed_at"),
        decided_at: row.get("decided_at"),
        updated_at: row.get("updated_at"),
    })
}

fn stage_record_from_row(row: &PgRow, prefix: &str) -> Result<StageRecord, StoreError> {
    let status: String = row.get(format!("{prefix}_status").as_str());
    let error_kind: Option<String> = row.get(format!("{prefix}_error_kind").as_str());
    Ok(StageRecord {
        status: StageStatus::from_str(&status).map_err(serialization)?,
        attempt: row.get::<i32, _>(format!("{prefix}_attempt").as_str()) as u32,
        confidence: row.get(format!("{prefix}_confidence").as_str()),
        error_kind: error_kind
            .map(|k| StageErrorKind::from_str(&k).map_err(serialization))
            .transpose()?,
        error_message: row.get(format!("{prefix}_error_message").as_str()),
        completed_at: row.get(format!("{prefix}_completed_at").as_str()),
    })
}

fn document_from_row(row: &PgRow) -> Result<Document, StoreError> {
    let kind: String = row.get("kind");
    Ok(Document {
        id: DocumentId::from_string(row.get("id")),
        application_id: ApplicationId::from_string(row.get("application_id")),
        kind: DocumentKind::from_str(&kind).map_err(serialization)?,
        filename: row.get("filename"),
        byte_size: row.get("byte_size"),
        content_type: row.get("content_type"),
        storage_handle: row.get("storage_handle"),
        ocr: stage_record_from_row(row, "ocr")?,
        ocr_text: row.get("ocr_text"),
        ocr_pages: row.get::<Option<i32>, _>("ocr_pages").map(|p| p as u32),
        extract: stage_record_from_row(row, "extract")?,
        extracted_fields: row.get("extracted_fields"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn step_from_row(row: &PgRow) -> Result<WorkflowStep, StoreError> {
    let from_state: String = row.get("from_state");
    let to_state: String = row.get("to_state");
    let status: String = row.get("status");
    Ok(WorkflowStep {
        id: StepId::from_string(row.get("id")),
        application_id: ApplicationId::from_string(row.get("application_id")),
        sequence: row.get::<i32, _>("sequence") as u32,
        step_name: row.get("step_name"),
        from_state: parse_state(&from_state)?,
        to_state: parse_state(&to_state)?,
        status: StepStatus::from_str(&status).map_err(serialization)?,
        message: row.get("message"),
        payload: row.get("payload"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        duration_ms: row.get("duration_ms"),
        attempt: row.get::<i32, _>("attempt") as u32,
    })
}

fn decision_from_row(row: &PgRow) -> Result<Decision, StoreError> {
    let outcome: String = row.get("outcome");
    Ok(Decision {
        application_id: ApplicationId::from_string(row.get("application_id")),
        outcome: DecisionOutcome::from_str(&outcome).map_err(serialization)?,
        confidence: row.get("confidence"),
        reasoning: row.get("reasoning"),
        benefit_amount: row.get("benefit_amount"),
        decided_at: row.get("decided_at"),
    })
}

fn parse_state(s: &str) -> Result<ApplicationState, StoreError> {
    ApplicationState::from_str(s).map_err(serialization)
}

fn not_found(id: &ApplicationId) -> StoreError {
    StoreError::NotFound {
        resource: "application",
        id: id.as_str().to_string(),
    }
}

fn connection_error(e: sqlx::Error) -> StoreError {
    StoreError::Connection {
        message: e.to_string(),
    }
}

fn serialization(message: String) -> StoreError {
    StoreError::Serialization { message }
}
