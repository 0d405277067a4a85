use sea_orm_migration::{prelude::*, schema::*};

use crate::id_column;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();

        if backend == sea_orm::DatabaseBackend::Sqlite {
            manager
                .get_connection()
                .execute_unprepared("PRAGMA foreign_keys = ON")
                .await?;
        }

        manager
            .create_table(
                Table::create()
                    .table(Companies::Table)
                    .if_not_exists()
                    .col(id_column(backend, Companies::Id))
                    .col(string(Companies::Name))
                    .col(big_integer(Companies::CreatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Users::Table)
                    .if_not_exists()
                    .col(id_column(backend, Users::Id))
                    .col(big_integer(Users::CompanyId))
                    .col(
                        ColumnDef::new(Users::Email)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(string(Users::FirstName))
                    .col(string(Users::LastName))
                    .col(string_null(Users::Location))
                    .col(big_integer_null(Users::ManagerId))
                    .col(big_integer_null(Users::Salary))
                    .col(string_null(Users::Ssn))
                    .col(
                        ColumnDef::new(Users::Role)
                            .string()
                            .not_null()
                            .default("employee"),
                    )
                    .col(big_integer(Users::CreatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_users_company")
                            .from(Users::Table, Users::CompanyId)
                            .to(Companies::Table, Companies::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_users_company")
                    .table(Users::Table)
                    .col(Users::CompanyId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_users_manager")
                    .table(Users::Table)
                    .col(Users::ManagerId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(TimeOffRequests::Table)
                    .if_not_exists()
                    .col(id_column(backend, TimeOffRequests::Id))
                    .col(big_integer(TimeOffRequests::UserId))
                    .col(date(TimeOffRequests::StartDate))
                    .col(date(TimeOffRequests::EndDate))
                    .col(
                        ColumnDef::new(TimeOffRequests::Reason)
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(TimeOffRequests::Status)
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(big_integer_null(TimeOffRequests::ApprovedBy))
                    .col(big_integer(TimeOffRequests::CreatedAt))
                    .col(big_integer(TimeOffRequests::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_time_off_requests_user")
                            .from(TimeOffRequests::Table, TimeOffRequests::UserId)
                            .to(Users::Table, Users::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_time_off_requests_user")
                    .table(TimeOffRequests::Table)
                    .col(TimeOffRequests::UserId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(TimeOffRequests::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Users::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Companies::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Companies {
    Table,
    Id,
    Name,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
    CompanyId,
    Email,
    FirstName,
    LastName,
    Location,
    ManagerId,
    Salary,
    Ssn,
    Role,
    CreatedAt,
}

#[derive(DeriveIden)]
enum TimeOffRequests {
    Table,
    Id,
    UserId,
    StartDate,
    EndDate,
    Reason,
    Status,
    ApprovedBy,
    CreatedAt,
    UpdatedAt,
}
