use sea_orm_migration::{prelude::*, schema::*};

use crate::id_column;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();

        // One row per (subject, role, resource) triple; the key makes inserts idempotent
        manager
            .create_table(
                Table::create()
                    .table(RoleFacts::Table)
                    .if_not_exists()
                    .col(string(RoleFacts::SubjectType))
                    .col(string(RoleFacts::SubjectId))
                    .col(string(RoleFacts::Role))
                    .col(string(RoleFacts::ResourceType))
                    .col(string(RoleFacts::ResourceId))
                    .col(big_integer(RoleFacts::CreatedAt))
                    .primary_key(
                        Index::create()
                            .col(RoleFacts::SubjectType)
                            .col(RoleFacts::SubjectId)
                            .col(RoleFacts::Role)
                            .col(RoleFacts::ResourceType)
                            .col(RoleFacts::ResourceId),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_role_facts_resource")
                    .table(RoleFacts::Table)
                    .col(RoleFacts::ResourceType)
                    .col(RoleFacts::ResourceId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SyncRuns::Table)
                    .if_not_exists()
                    .col(id_column(backend, SyncRuns::Id))
                    .col(string(SyncRuns::JobName))
                    .col(big_integer(SyncRuns::StartedAt))
                    .col(big_integer_null(SyncRuns::CompletedAt))
                    .col(big_integer_null(SyncRuns::Success))
                    .col(string_null(SyncRuns::ErrorMessage))
                    .col(big_integer_null(SyncRuns::FactsApplied))
                    .col(big_integer_null(SyncRuns::FactsFailed))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_sync_runs_started")
                    .table(SyncRuns::Table)
                    .col(SyncRuns::StartedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SyncRuns::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(RoleFacts::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum RoleFacts {
    Table,
    SubjectType,
    SubjectId,
    Role,
    ResourceType,
    ResourceId,
    CreatedAt,
}

#[derive(DeriveIden)]
enum SyncRuns {
    Table,
    Id,
    JobName,
    StartedAt,
    CompletedAt,
    Success,
    ErrorMessage,
    FactsApplied,
    FactsFailed,
}
