use drive::error::DriveError;
use tokio::io::AsyncReadExt;

use crate::support::TestDrive;

#[tokio::test]
#[ignore = "requires Docker"]
async fn upload_move_and_cascade_delete() {
    let drive = TestDrive::spawn().await;
    let user = drive.service.register_user("alice").await.unwrap().id;

    drive.service.create_directory(user, "/a/b").await.unwrap();
    drive
        .service
        .upload_file(user, "/a/b", "data.bin", None, Box::new(&b"payload"[..]))
        .await
        .unwrap();
    drive.service.create_directory(user, "/c").await.unwrap();

    drive.service.move_directory(user, "/a", "/c/a").await.unwrap();

    let mut download = drive
        .service
        .download_file(user, "/c/a/b/data.bin")
        .await
        .unwrap();
    assert_eq!(download.content_type, "application/octet-stream");
    let mut out = Vec::new();
    download.reader.read_to_end(&mut out).await.unwrap();
    assert_eq!(out, b"payload");

    let report = drive.service.delete_directory(user, "/c").await.unwrap();
    assert_eq!(report.dirs_removed, 3);
    assert_eq!(report.files_removed, 1);
    assert!(drive.blobs.is_empty().await);

    let listing = drive.service.list_directory(user, "/").await.unwrap();
    assert!(listing.dirs.is_empty());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn move_into_own_subtree_is_rejected() {
    let drive = TestDrive::spawn().await;
    let user = drive.service.register_user("alice").await.unwrap().id;
    drive.service.create_directory(user, "/a/b").await.unwrap();

    let err = drive
        .service
        .move_directory(user, "/a", "/a/b/a")
        .await
        .unwrap_err();
    assert!(matches!(err, DriveError::BadRequest(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires Docker"]
async fn concurrent_creates_yield_one_directory() {
    let drive = TestDrive::spawn().await;
    let user = drive.service.register_user("alice").await.unwrap().id;

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let service = drive.service.clone();
            tokio::spawn(async move { service.create_directory(user, "/shared").await })
        })
        .collect();

    let mut created = 0;
    for task in tasks {
        if task.await.unwrap().is_ok() {
            created += 1;
        }
    }
    assert_eq!(created, 1);

    let listing = drive.service.list_directory(user, "/").await.unwrap();
    assert_eq!(listing.dirs.len(), 1);
}
