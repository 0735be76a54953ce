//! Integration tests for the inspection store.
//!
//! Tests cover:
//! - Creating, listing and fetching owners
//! - Storing images and reports under an owner
//! - Cascading owner deletion, including artifacts on disk
//! - Not-found errors

mod common;

use common::*;

fn new_image(owner_id: i64, filename: &str, seed: u8) -> NewImage {
    NewImage {
        owner_id,
        filename: filename.to_string(),
        bytes: png_bytes(16, 8, seed),
        width: 16,
        height: 8,
    }
}

#[tokio::test]
async fn test_create_and_retrieve_owner() -> anyhow::Result<()> {
    let (db, _temp_dir) = create_test_db().await;

    let owner = db.create_owner(new_owner("  Иванов Иван ")).await?;
    assert!(owner.id > 0, "Owner should have positive ID");
    assert_eq!(owner.full_name, "Иванов Иван");
    assert_eq!(owner.status, "active");
    assert!(owner.images.is_empty());
    assert!(owner.reports.is_empty());

    let fetched = db.get_owner(owner.id).await?;
    assert_eq!(fetched.full_name, owner.full_name);
    assert_eq!(fetched.email, "inspector@example.com");
    assert_eq!(fetched.created_at, owner.created_at);

    Ok(())
}

#[tokio::test]
async fn test_list_owners_in_creation_order() -> anyhow::Result<()> {
    let (db, _temp_dir) = create_test_db().await;

    db.create_owner(new_owner("First")).await?;
    db.create_owner(new_owner("Second")).await?;
    db.create_owner(new_owner("Third")).await?;

    let names: Vec<String> = db
        .list_owners()
        .await?
        .into_iter()
        .map(|owner| owner.full_name)
        .collect();
    assert_eq!(names, vec!["First", "Second", "Third"]);

    Ok(())
}

#[tokio::test]
async fn test_get_missing_owner() -> anyhow::Result<()> {
    let (db, _temp_dir) = create_test_db().await;

    let err = db.get_owner(42).await.unwrap_err();
    assert!(matches!(err, InspectionError::RecordNotFound(42)));
    assert!(err.is_not_found());

    Ok(())
}

#[tokio::test]
async fn test_images_append_in_order() -> anyhow::Result<()> {
    let (db, _temp_dir) = create_test_db().await;
    let owner = db.create_owner(new_owner("Owner")).await?;

    let first = db.add_image(new_image(owner.id, "a.png", 1)).await?;
    let second = db.add_image(new_image(owner.id, "b.png", 2)).await?;

    assert_eq!(first.position, 0);
    assert_eq!(second.position, 1);
    assert_eq!(first.version, 1);
    assert_eq!(first.state, ImageState::Uploaded);
    assert!(first.detections.is_none());
    assert_eq!(first.digest.len(), 64);

    let owner = db.get_owner(owner.id).await?;
    assert_eq!(owner.images, vec!["a.png", "b.png"]);

    let stored = db.read_image("a.png").await?;
    assert_eq!(stored, png_bytes(16, 8, 1));

    Ok(())
}

#[tokio::test]
async fn test_add_image_to_missing_owner() -> anyhow::Result<()> {
    let (db, _temp_dir) = create_test_db().await;

    let err = db.add_image(new_image(7, "orphan.png", 0)).await.unwrap_err();
    assert!(matches!(err, InspectionError::RecordNotFound(7)));
    assert!(db.read_image("orphan.png").await.is_err());

    Ok(())
}

#[tokio::test]
async fn test_image_lookup_is_scoped_to_owner() -> anyhow::Result<()> {
    let (db, _temp_dir) = create_test_db().await;
    let alice = db.create_owner(new_owner("Alice")).await?;
    let bob = db.create_owner(new_owner("Bob")).await?;
    db.add_image(new_image(alice.id, "alice.png", 0)).await?;

    assert!(db.get_image(alice.id, "alice.png").await.is_ok());
    let err = db.get_image(bob.id, "alice.png").await.unwrap_err();
    assert!(matches!(err, InspectionError::ArtifactNotFound(_)));

    Ok(())
}

#[tokio::test]
async fn test_rejects_path_like_filenames() -> anyhow::Result<()> {
    let (db, _temp_dir) = create_test_db().await;

    for filename in ["../escape.png", "nested/file.png", ".hidden", ""] {
        let err = db.read_image(filename).await.unwrap_err();
        assert!(matches!(err, InspectionError::ArtifactNotFound(_)));
    }
    assert!(db.artifact_path(ArtifactKind::Image, "../x.png").is_none());

    Ok(())
}

#[tokio::test]
async fn test_delete_owner_cascades() -> anyhow::Result<()> {
    let (db, _temp_dir) = create_test_db().await;
    let owner = db.create_owner(new_owner("Owner")).await?;
    let other = db.create_owner(new_owner("Other")).await?;
    let image = db.add_image(new_image(owner.id, "weld.png", 0)).await?;
    db.add_image(new_image(other.id, "kept.png", 1)).await?;
    let report = db
        .save_report(NewReport {
            owner_id: owner.id,
            image_id: image.id,
            image_version: image.version,
            filename: "weld_v1.html".to_string(),
            segments: Vec::new(),
            bytes: b"<html></html>".to_vec(),
        })
        .await?;

    let image_path = db
        .artifact_path(ArtifactKind::Image, &image.filename)
        .expect("valid filename");
    let report_path = db
        .artifact_path(ArtifactKind::Report, &report.filename)
        .expect("valid filename");
    assert!(image_path.is_file());
    assert!(report_path.is_file());

    db.delete_owner(owner.id).await?;

    assert!(!image_path.exists(), "image artifact should be removed");
    assert!(!report_path.exists(), "report artifact should be removed");
    assert!(matches!(
        db.get_owner(owner.id).await.unwrap_err(),
        InspectionError::RecordNotFound(_)
    ));
    assert!(db.get_image(owner.id, "weld.png").await.unwrap_err().is_not_found());
    assert!(db.read_image("weld.png").await.unwrap_err().is_not_found());
    assert!(db.get_report("weld_v1.html").await.unwrap_err().is_not_found());
    assert!(db.read_report("weld_v1.html").await.unwrap_err().is_not_found());
    assert!(db.get_image_by_id(image.id).await.unwrap_err().is_not_found());

    // Other owners are untouched.
    assert_eq!(db.get_owner(other.id).await?.images, vec!["kept.png"]);
    assert!(db.read_image("kept.png").await.is_ok());

    Ok(())
}

#[tokio::test]
async fn test_delete_missing_owner() -> anyhow::Result<()> {
    let (db, _temp_dir) = create_test_db().await;

    let err = db.delete_owner(99).await.unwrap_err();
    assert!(matches!(err, InspectionError::RecordNotFound(99)));

    Ok(())
}

#[tokio::test]
async fn test_store_survives_reopen() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let data_dir = dir.path().join("data");

    let owner_id = {
        let db = InspectionDb::open(&data_dir).await?;
        let owner = db.create_owner(new_owner("Persistent")).await?;
        db.add_image(new_image(owner.id, "p.png", 3)).await?;
        db.close().await;
        owner.id
    };

    let db = InspectionDb::open(&data_dir).await?;
    let owner = db.get_owner(owner_id).await?;
    assert_eq!(owner.full_name, "Persistent");
    assert_eq!(owner.images, vec!["p.png"]);
    assert_eq!(db.read_image("p.png").await?, png_bytes(16, 8, 3));

    Ok(())
}

#[tokio::test]
async fn test_no_partial_files_left_behind() -> anyhow::Result<()> {
    let (db, _temp_dir) = create_test_db().await;
    let owner = db.create_owner(new_owner("Owner")).await?;
    db.add_image(new_image(owner.id, "clean.png", 0)).await?;

    let images_dir = db.data_dir().join(ArtifactKind::Image.dir_name());
    let leftovers: Vec<_> = std::fs::read_dir(images_dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".partial"))
        .collect();
    assert!(leftovers.is_empty());

    Ok(())
}
