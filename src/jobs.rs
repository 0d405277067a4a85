use crate::authz::sync::{SyncEngine, SyncReport};
use crate::entities;
use crate::errors::OrgError;
use crate::settings::Jobs as JobsCfg;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, IntoActiveModel, Set};
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

pub const RETRY_DEFERRED: &str = "retry_deferred_facts";
pub const RECONCILE: &str = "reconcile_facts";

/// Initialize and start the job scheduler with all background tasks
pub async fn init_scheduler(
    db: DatabaseConnection,
    sync: Arc<SyncEngine>,
    cfg: &JobsCfg,
) -> Result<JobScheduler, OrgError> {
    let sched = JobScheduler::new()
        .await
        .map_err(|e| OrgError::Other(format!("Failed to create job scheduler: {}", e)))?;

    for (name, schedule) in [
        (RETRY_DEFERRED, cfg.retry_deferred.as_str()),
        (RECONCILE, cfg.reconcile.as_str()),
    ] {
        let db = db.clone();
        let sync = sync.clone();
        let job = Job::new_async(schedule, move |_uuid, _l| {
            let db = db.clone();
            let sync = sync.clone();
            Box::pin(async move {
                if let Err(e) = run_job(&db, &sync, name).await {
                    error!(job = name, error = %e, "Failed to record job run");
                }
            })
        })
        .map_err(|e| OrgError::Other(format!("Failed to create {} job: {}", name, e)))?;

        sched
            .add(job)
            .await
            .map_err(|e| OrgError::Other(format!("Failed to add {} job: {}", name, e)))?;
    }

    sched
        .start()
        .await
        .map_err(|e| OrgError::Other(format!("Failed to start job scheduler: {}", e)))?;

    info!(
        retry_deferred = %cfg.retry_deferred,
        reconcile = %cfg.reconcile,
        "Job scheduler started with 2 jobs"
    );

    Ok(sched)
}

/// Runs a job by name and records the run in `sync_runs`. Returns the
/// write counts of the run.
pub async fn run_job(
    db: &DatabaseConnection,
    sync: &SyncEngine,
    job_name: &str,
) -> Result<SyncReport, OrgError> {
    info!("Running {} job", job_name);
    let run_id = start_sync_run(db, job_name).await?;

    let result = match job_name {
        RETRY_DEFERRED => Ok(sync.retry_deferred().await),
        RECONCILE => sync
            .reconcile_all()
            .await
            .map_err(OrgError::from)
            .and_then(|summary| {
                if summary.failed_companies > 0 {
                    Err(OrgError::Other(format!(
                        "{} of {} companies could not be reconciled",
                        summary.failed_companies, summary.companies
                    )))
                } else {
                    Ok(summary.repair)
                }
            }),
        _ => {
            let err = OrgError::Other(format!("Unknown job name: {}", job_name));
            complete_sync_run(db, run_id, false, Some(err.to_string()), None).await?;
            return Err(err);
        }
    };

    match result {
        Ok(report) => {
            info!(
                job = job_name,
                applied = report.applied,
                failed = report.failed,
                "Job completed"
            );
            complete_sync_run(db, run_id, report.is_clean(), None, Some(report)).await?;
            Ok(report)
        }
        Err(e) => {
            error!(job = job_name, error = %e, "Job failed");
            complete_sync_run(db, run_id, false, Some(e.to_string()), None).await?;
            Err(e)
        }
    }
}

/// Record the start of a job run
pub async fn start_sync_run(db: &DatabaseConnection, job_name: &str) -> Result<i64, OrgError> {
    use entities::sync_run;

    let run = sync_run::ActiveModel {
        job_name: Set(job_name.to_string()),
        started_at: Set(Utc::now().timestamp()),
        completed_at: Set(None),
        success: Set(None),
        error_message: Set(None),
        facts_applied: Set(None),
        facts_failed: Set(None),
        ..Default::default()
    };

    let result = run.insert(db).await?;
    Ok(result.id)
}

/// Record the completion of a job run
pub async fn complete_sync_run(
    db: &DatabaseConnection,
    run_id: i64,
    success: bool,
    error_message: Option<String>,
    report: Option<SyncReport>,
) -> Result<(), OrgError> {
    if let Some(run) = entities::SyncRun::find_by_id(run_id).one(db).await? {
        let mut active = run.into_active_model();
        active.completed_at = Set(Some(Utc::now().timestamp()));
        active.success = Set(Some(if success { 1 } else { 0 }));
        active.error_message = Set(error_message);
        active.facts_applied = Set(report.map(|r| r.applied as i64));
        active.facts_failed = Set(report.map(|r| r.failed as i64));
        active.update(db).await?;
    }

    Ok(())
}

/// Most recent runs, newest first.
pub async fn recent_runs(
    db: &DatabaseConnection,
    limit: u64,
) -> Result<Vec<entities::sync_run::Model>, OrgError> {
    use entities::sync_run::Column;
    use sea_orm::{QueryOrder, QuerySelect};

    Ok(entities::SyncRun::find()
        .order_by_desc(Column::StartedAt)
        .order_by_desc(Column::Id)
        .limit(limit)
        .all(db)
        .await?)
}
