use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use common::storage::BlobId;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, SqlErr, TransactionTrait,
};
use uuid::Uuid;

use super::MetadataStore;
use crate::entity::{directory, file_record, user};
use crate::error::DriveError;
use crate::models::{DirectoryNode, FileRecord, User};

/// PostgreSQL-backed metadata store.
///
/// Child and file id lists are not stored; they are derived from the
/// `parent_id` columns whenever a directory is loaded.
#[derive(Clone)]
pub struct SqlMetadataStore {
    db: DatabaseConnection,
}

impl SqlMetadataStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

/// Map a write failure, turning unique-index hits into a name collision.
fn write_err(err: DbErr, name: &str) -> DriveError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => {
            DriveError::BadRequest(format!("An entry named '{name}' already exists"))
        }
        _ => err.into(),
    }
}

fn user_from_model(model: user::Model) -> User {
    User {
        id: model.id,
        username: model.username,
        root_id: model.root_id,
        created_at: model.created_at,
    }
}

fn file_from_model(model: file_record::Model) -> Result<FileRecord, DriveError> {
    let blob_id = BlobId::from_hex(&model.blob_id)?;
    Ok(FileRecord {
        id: model.id,
        name: model.name,
        owner_id: model.owner_id,
        parent_id: model.parent_id,
        blob_id,
        size: u64::try_from(model.size).unwrap_or(0),
        content_type: model.content_type,
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}

/// Build nodes for `models`, fetching all their child and file ids in two
/// queries.
async fn load_dirs<C: ConnectionTrait>(
    db: &C,
    models: Vec<directory::Model>,
) -> Result<Vec<DirectoryNode>, DriveError> {
    if models.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<Uuid> = models.iter().map(|model| model.id).collect();

    let mut child_ids: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    let children = directory::Entity::find()
        .filter(directory::Column::ParentId.is_in(ids.clone()))
        .select_only()
        .column(directory::Column::ParentId)
        .column(directory::Column::Id)
        .into_tuple::<(Option<Uuid>, Uuid)>()
        .all(db)
        .await?;
    for (parent_id, id) in children {
        if let Some(parent_id) = parent_id {
            child_ids.entry(parent_id).or_default().push(id);
        }
    }

    let mut file_ids: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    let files = file_record::Entity::find()
        .filter(file_record::Column::ParentId.is_in(ids))
        .select_only()
        .column(file_record::Column::ParentId)
        .column(file_record::Column::Id)
        .into_tuple::<(Uuid, Uuid)>()
        .all(db)
        .await?;
    for (parent_id, id) in files {
        file_ids.entry(parent_id).or_default().push(id);
    }

    Ok(models
        .into_iter()
        .map(|model| DirectoryNode {
            child_ids: child_ids.remove(&model.id).unwrap_or_default(),
            file_ids: file_ids.remove(&model.id).unwrap_or_default(),
            id: model.id,
            name: model.name,
            owner_id: model.owner_id,
            parent_id: model.parent_id,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
        .collect())
}

async fn require_dir<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<directory::Model, DriveError> {
    directory::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| DriveError::NotFound(format!("Directory {id} does not exist")))
}

#[async_trait]
impl MetadataStore for SqlMetadataStore {
    async fn create_user(&self, username: &str) -> Result<User, DriveError> {
        let txn = self.db.begin().await?;

        let taken = user::Entity::find()
            .filter(user::Column::Username.eq(username))
            .one(&txn)
            .await?
            .is_some();
        if taken {
            return Err(DriveError::BadRequest(format!(
                "Username '{username}' is already taken"
            )));
        }

        let user_id = Uuid::now_v7();
        let root = DirectoryNode::new_root(user_id);
        let now = Utc::now();

        let user_model = user::ActiveModel {
            id: Set(user_id),
            username: Set(username.to_string()),
            root_id: Set(root.id),
            created_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(|e| match e.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => {
                DriveError::BadRequest(format!("Username '{username}' is already taken"))
            }
            _ => e.into(),
        })?;

        directory::ActiveModel {
            id: Set(root.id),
            name: Set(root.name.clone()),
            owner_id: Set(user_id),
            parent_id: Set(None),
            created_at: Set(root.created_at),
            updated_at: Set(root.updated_at),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;
        Ok(user_from_model(user_model))
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>, DriveError> {
        Ok(user::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .map(user_from_model))
    }

    async fn get_dir(&self, id: Uuid) -> Result<Option<DirectoryNode>, DriveError> {
        let model = directory::Entity::find_by_id(id).one(&self.db).await?;
        Ok(load_dirs(&self.db, model.into_iter().collect())
            .await?
            .into_iter()
            .next())
    }

    async fn child_dirs(&self, parent_id: Uuid) -> Result<Vec<DirectoryNode>, DriveError> {
        let models = directory::Entity::find()
            .filter(directory::Column::ParentId.eq(parent_id))
            .order_by_asc(directory::Column::Name)
            .all(&self.db)
            .await?;
        load_dirs(&self.db, models).await
    }

    async fn find_child_dir(
        &self,
        parent_id: Uuid,
        name: &str,
    ) -> Result<Option<DirectoryNode>, DriveError> {
        let model = directory::Entity::find()
            .filter(directory::Column::ParentId.eq(parent_id))
            .filter(directory::Column::Name.eq(name))
            .one(&self.db)
            .await?;
        Ok(load_dirs(&self.db, model.into_iter().collect())
            .await?
            .into_iter()
            .next())
    }

    async fn name_taken(&self, parent_id: Uuid, name: &str) -> Result<bool, DriveError> {
        let dirs = directory::Entity::find()
            .filter(directory::Column::ParentId.eq(parent_id))
            .filter(directory::Column::Name.eq(name))
            .count(&self.db)
            .await?;
        if dirs > 0 {
            return Ok(true);
        }
        let files = file_record::Entity::find()
            .filter(file_record::Column::ParentId.eq(parent_id))
            .filter(file_record::Column::Name.eq(name))
            .count(&self.db)
            .await?;
        Ok(files > 0)
    }

    async fn insert_dir(&self, node: &DirectoryNode) -> Result<(), DriveError> {
        let parent_id = node
            .parent_id
            .ok_or_else(|| DriveError::Internal("roots are created with their user".into()))?;
        require_dir(&self.db, parent_id).await?;

        directory::ActiveModel {
            id: Set(node.id),
            name: Set(node.name.clone()),
            owner_id: Set(node.owner_id),
            parent_id: Set(Some(parent_id)),
            created_at: Set(node.created_at),
            updated_at: Set(node.updated_at),
        }
        .insert(&self.db)
        .await
        .map_err(|e| write_err(e, &node.name))?;
        Ok(())
    }

    async fn update_dir(&self, node: &DirectoryNode) -> Result<(), DriveError> {
        let existing = require_dir(&self.db, node.id).await?;
        if existing.parent_id.is_none() != node.parent_id.is_none() {
            return Err(DriveError::Internal(
                "the root cannot gain or lose a parent".into(),
            ));
        }
        if let Some(parent_id) = node.parent_id {
            require_dir(&self.db, parent_id).await?;
        }

        let mut active: directory::ActiveModel = existing.into();
        active.name = Set(node.name.clone());
        active.parent_id = Set(node.parent_id);
        active.updated_at = Set(node.updated_at);
        active
            .update(&self.db)
            .await
            .map_err(|e| write_err(e, &node.name))?;
        Ok(())
    }

    async fn remove_dir(&self, id: Uuid) -> Result<bool, DriveError> {
        let txn = self.db.begin().await?;
        if directory::Entity::find_by_id(id).one(&txn).await?.is_none() {
            return Ok(false);
        }

        let children = directory::Entity::find()
            .filter(directory::Column::ParentId.eq(id))
            .count(&txn)
            .await?;
        let files = file_record::Entity::find()
            .filter(file_record::Column::ParentId.eq(id))
            .count(&txn)
            .await?;
        if children > 0 || files > 0 {
            return Err(DriveError::Internal(format!(
                "directory {id} still has entries"
            )));
        }

        directory::Entity::delete_by_id(id).exec(&txn).await?;
        txn.commit().await?;
        Ok(true)
    }

    async fn get_file(&self, id: Uuid) -> Result<Option<FileRecord>, DriveError> {
        file_record::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .map(file_from_model)
            .transpose()
    }

    async fn files_in(&self, parent_id: Uuid) -> Result<Vec<FileRecord>, DriveError> {
        file_record::Entity::find()
            .filter(file_record::Column::ParentId.eq(parent_id))
            .order_by_asc(file_record::Column::Name)
            .all(&self.db)
            .await?
            .into_iter()
            .map(file_from_model)
            .collect()
    }

    async fn find_file(
        &self,
        parent_id: Uuid,
        name: &str,
    ) -> Result<Option<FileRecord>, DriveError> {
        file_record::Entity::find()
            .filter(file_record::Column::ParentId.eq(parent_id))
            .filter(file_record::Column::Name.eq(name))
            .one(&self.db)
            .await?
            .map(file_from_model)
            .transpose()
    }

    async fn insert_file(&self, file: &FileRecord) -> Result<(), DriveError> {
        require_dir(&self.db, file.parent_id).await?;

        file_record::ActiveModel {
            id: Set(file.id),
            name: Set(file.name.clone()),
            owner_id: Set(file.owner_id),
            parent_id: Set(file.parent_id),
            blob_id: Set(file.blob_id.to_hex()),
            size: Set(i64::try_from(file.size).unwrap_or(i64::MAX)),
            content_type: Set(file.content_type.clone()),
            created_at: Set(file.created_at),
            updated_at: Set(file.updated_at),
        }
        .insert(&self.db)
        .await
        .map_err(|e| write_err(e, &file.name))?;
        Ok(())
    }

    async fn update_file(&self, file: &FileRecord) -> Result<(), DriveError> {
        let existing = file_record::Entity::find_by_id(file.id)
            .one(&self.db)
            .await?
            .ok_or_else(|| DriveError::NotFound(format!("File {} does not exist", file.id)))?;
        if existing.parent_id != file.parent_id {
            require_dir(&self.db, file.parent_id).await?;
        }

        let mut active: file_record::ActiveModel = existing.into();
        active.name = Set(file.name.clone());
        active.parent_id = Set(file.parent_id);
        active.updated_at = Set(file.updated_at);
        active
            .update(&self.db)
            .await
            .map_err(|e| write_err(e, &file.name))?;
        Ok(())
    }

    async fn remove_file(&self, id: Uuid) -> Result<bool, DriveError> {
        let result = file_record::Entity::delete_by_id(id).exec(&self.db).await?;
        Ok(result.rows_affected > 0)
    }

    async fn referenced_blobs(&self) -> Result<Vec<BlobId>, DriveError> {
        let hexes = file_record::Entity::find()
            .select_only()
            .column(file_record::Column::BlobId)
            .into_tuple::<String>()
            .all(&self.db)
            .await?;

        Ok(hexes
            .iter()
            .filter_map(|hex| match BlobId::from_hex(hex) {
                Ok(id) => Some(id),
                Err(e) => {
                    tracing::warn!("Skipping file record with malformed blob id {hex}: {e}");
                    None
                }
            })
            .collect())
    }
}
