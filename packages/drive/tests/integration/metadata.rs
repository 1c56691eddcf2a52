use chrono::Utc;
use common::storage::BlobId;
use drive::error::DriveError;
use drive::models::{DirectoryNode, FileRecord};
use drive::repo::MetadataStore;
use uuid::Uuid;

use crate::support::spawn_store;

fn file_in(parent: &DirectoryNode, name: &str) -> FileRecord {
    let now = Utc::now();
    FileRecord {
        id: Uuid::now_v7(),
        name: name.to_string(),
        owner_id: parent.owner_id,
        parent_id: parent.id,
        blob_id: BlobId::generate(),
        size: 3,
        content_type: "text/plain".into(),
        created_at: now,
        updated_at: now,
    }
}

mod users {
    use super::*;

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn user_is_created_with_root() {
        let store = spawn_store().await;

        let user = store.create_user("alice").await.unwrap();
        let root = store.get_dir(user.root_id).await.unwrap().unwrap();

        assert!(root.is_root());
        assert_eq!(root.owner_id, user.id);
        assert_eq!(root.name, "");
        let found = store.find_user(user.id).await.unwrap().unwrap();
        assert_eq!(found.username, "alice");
        assert_eq!(found.root_id, root.id);
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn usernames_are_unique() {
        let store = spawn_store().await;
        store.create_user("alice").await.unwrap();

        let err = store.create_user("alice").await.unwrap_err();
        assert!(matches!(err, DriveError::BadRequest(_)));
    }
}

mod directories {
    use super::*;

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn child_ids_follow_parent_column() {
        let store = spawn_store().await;
        let user = store.create_user("alice").await.unwrap();
        let root = store.get_dir(user.root_id).await.unwrap().unwrap();

        let a = DirectoryNode::new_child(&root, "a");
        let b = DirectoryNode::new_child(&root, "b");
        store.insert_dir(&a).await.unwrap();
        store.insert_dir(&b).await.unwrap();

        let root = store.get_dir(root.id).await.unwrap().unwrap();
        assert_eq!(root.child_ids.len(), 2);
        let names: Vec<_> = store
            .child_dirs(root.id)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, ["a", "b"]);

        let mut moved = b.clone();
        moved.parent_id = Some(a.id);
        store.update_dir(&moved).await.unwrap();

        let a = store.get_dir(a.id).await.unwrap().unwrap();
        assert_eq!(a.child_ids, vec![b.id]);
        assert!(store.find_child_dir(root.id, "b").await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn listed_children_carry_their_own_ids() {
        let store = spawn_store().await;
        let user = store.create_user("alice").await.unwrap();
        let root = store.get_dir(user.root_id).await.unwrap().unwrap();

        let a = DirectoryNode::new_child(&root, "a");
        let b = DirectoryNode::new_child(&root, "b");
        store.insert_dir(&a).await.unwrap();
        store.insert_dir(&b).await.unwrap();
        let c = DirectoryNode::new_child(&a, "c");
        store.insert_dir(&c).await.unwrap();
        let in_a = file_in(&a, "one");
        store.insert_file(&in_a).await.unwrap();
        for name in ["two", "three"] {
            store.insert_file(&file_in(&b, name)).await.unwrap();
        }

        let listed = store.child_dirs(root.id).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].child_ids, vec![c.id]);
        assert_eq!(listed[0].file_ids, vec![in_a.id]);
        assert!(listed[1].child_ids.is_empty());
        assert_eq!(listed[1].file_ids.len(), 2);

        assert!(store.name_taken(root.id, "a").await.unwrap());
        assert!(store.name_taken(b.id, "two").await.unwrap());
        assert!(!store.name_taken(b.id, "c").await.unwrap());
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn unique_index_rejects_duplicate_sibling() {
        let store = spawn_store().await;
        let user = store.create_user("alice").await.unwrap();
        let root = store.get_dir(user.root_id).await.unwrap().unwrap();

        store.insert_dir(&DirectoryNode::new_child(&root, "dup")).await.unwrap();
        let err = store
            .insert_dir(&DirectoryNode::new_child(&root, "dup"))
            .await
            .unwrap_err();
        assert!(matches!(err, DriveError::BadRequest(_)));
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn remove_requires_empty_directory() {
        let store = spawn_store().await;
        let user = store.create_user("alice").await.unwrap();
        let root = store.get_dir(user.root_id).await.unwrap().unwrap();
        let a = DirectoryNode::new_child(&root, "a");
        store.insert_dir(&a).await.unwrap();
        store.insert_file(&file_in(&a, "f")).await.unwrap();

        let err = store.remove_dir(a.id).await.unwrap_err();
        assert!(matches!(err, DriveError::Internal(_)));

        let file = store.find_file(a.id, "f").await.unwrap().unwrap();
        assert!(store.remove_file(file.id).await.unwrap());
        assert!(store.remove_dir(a.id).await.unwrap());
        assert!(!store.remove_dir(a.id).await.unwrap());
    }
}

mod files {
    use super::*;

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn file_records_round_trip() {
        let store = spawn_store().await;
        let user = store.create_user("alice").await.unwrap();
        let root = store.get_dir(user.root_id).await.unwrap().unwrap();
        let file = file_in(&root, "notes.txt");
        store.insert_file(&file).await.unwrap();

        let loaded = store.get_file(file.id).await.unwrap().unwrap();
        assert_eq!(loaded.blob_id, file.blob_id);
        assert_eq!(loaded.size, 3);
        assert_eq!(store.referenced_blobs().await.unwrap(), vec![file.blob_id]);

        let mut renamed = loaded.clone();
        renamed.name = "renamed.txt".into();
        store.update_file(&renamed).await.unwrap();
        assert!(store.find_file(root.id, "renamed.txt").await.unwrap().is_some());
        assert!(store.name_taken(root.id, "renamed.txt").await.unwrap());
        assert!(!store.name_taken(root.id, "notes.txt").await.unwrap());

        assert!(store.remove_file(file.id).await.unwrap());
        assert!(!store.remove_file(file.id).await.unwrap());
        assert!(store.referenced_blobs().await.unwrap().is_empty());
    }
}
