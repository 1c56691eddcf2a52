use std::time::Duration;

use sea_orm::sea_query::{Index, PostgresQueryBuilder};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr};
use tracing::info;

use crate::entity::{directory, file_record};

pub async fn init_db(db_url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(db_url.to_owned());

    opt.max_connections(50)
        .min_connections(2)
        .connect_timeout(Duration::from_secs(8))
        .acquire_timeout(Duration::from_secs(8))
        .idle_timeout(Duration::from_secs(8))
        .max_lifetime(Duration::from_secs(8))
        .sqlx_logging(false);

    let db = Database::connect(opt).await?;
    db.get_schema_registry("drive::entity::*").sync(&db).await?;
    ensure_indexes(&db).await?;

    Ok(db)
}

/// Ensure indexes that schema-sync does not derive from the entities.
///
/// The composite unique indexes back the sibling-name rule at the storage
/// level. Directory and file names share one namespace per parent, which no
/// single index can express; the per-user mutation lock covers that part.
pub async fn ensure_indexes(db: &DatabaseConnection) -> Result<(), DbErr> {
    let statements = [
        (
            "uq_directory_parent_name",
            Index::create()
                .if_not_exists()
                .unique()
                .name("uq_directory_parent_name")
                .table(directory::Entity)
                .col(directory::Column::ParentId)
                .col(directory::Column::Name)
                .to_string(PostgresQueryBuilder),
        ),
        (
            "uq_file_record_parent_name",
            Index::create()
                .if_not_exists()
                .unique()
                .name("uq_file_record_parent_name")
                .table(file_record::Entity)
                .col(file_record::Column::ParentId)
                .col(file_record::Column::Name)
                .to_string(PostgresQueryBuilder),
        ),
        (
            "idx_file_record_blob",
            Index::create()
                .if_not_exists()
                .name("idx_file_record_blob")
                .table(file_record::Entity)
                .col(file_record::Column::BlobId)
                .to_string(PostgresQueryBuilder),
        ),
    ];

    for (name, stmt) in statements {
        db.execute_unprepared(&stmt).await?;
        info!("Ensured index {} exists", name);
    }

    Ok(())
}
