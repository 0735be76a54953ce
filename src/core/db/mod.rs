mod image;
mod owner;
mod report;
mod state;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use sha2::{Digest, Sha256};
use sqlx::{Connection, SqliteConnection};
use tracing::{debug, info};

use crate::error::{DetectionError, InspectionError, Result};
use crate::models::{Detection, DetectionResult, DetectionSource};
use self::image::{DetectionRow, IMAGE_COLUMNS, ImageRow};
use owner::OwnerRow;
use report::ReportRow;
use state::{StoreState, now_timestamp, parse_timestamp};

pub use self::image::{
    ImageReplacement, ImageRepository, ImageState, InspectionImage, NewImage, RecordOutcome,
    ReplacedImage,
};
pub use owner::{NewOwner, Owner, OwnerRepository};
pub use report::{InspectionReport, NewReport, ReportRepository};
pub use state::ArtifactKind;

const REPORT_COLUMNS: &str =
    "id, owner_id, image_id, image_version, filename, segments, generated_at";

/// SQLite-backed inspection store. Metadata lives in the database, image and report
/// bytes in files under the data directory.
#[derive(Debug, Clone)]
pub struct InspectionDb {
    state: Arc<StoreState>,
}

impl InspectionDb {
    pub async fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        Ok(Self {
            state: Arc::new(StoreState::open(data_dir).await?),
        })
    }

    pub fn data_dir(&self) -> &Path {
        self.state.data_dir()
    }

    /// On-disk location of an artifact, or `None` if the filename is not a plain name.
    pub fn artifact_path(&self, kind: ArtifactKind, filename: &str) -> Option<PathBuf> {
        self.state.artifact_path(kind, filename)
    }

    pub async fn close(&self) {
        self.state.close().await;
    }
}

pub fn content_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn corrupt(err: impl std::fmt::Display) -> InspectionError {
    InspectionError::Corrupt(err.to_string())
}

async fn owner_from_row(conn: &mut SqliteConnection, row: OwnerRow) -> Result<Owner> {
    let images = sqlx::query_scalar::<_, String>(
        "SELECT filename FROM image WHERE owner_id = $1 ORDER BY position ASC",
    )
    .bind(row.id)
    .fetch_all(&mut *conn)
    .await?;
    let reports = sqlx::query_scalar::<_, String>(
        "SELECT filename FROM report WHERE owner_id = $1 ORDER BY id ASC",
    )
    .bind(row.id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(Owner {
        id: row.id,
        full_name: row.full_name,
        status: row.status,
        email: row.email,
        created_at: parse_timestamp(&row.created_at)?,
        images,
        reports,
        _guard: (),
    })
}

async fn fetch_detections(
    conn: &mut SqliteConnection,
    image_id: i64,
    version: i64,
    source: DetectionSource,
) -> Result<Vec<Detection>> {
    let rows = sqlx::query_as::<_, DetectionRow>(
        r#"SELECT class_code, score, x1, y1, x2, y2 FROM detection
        WHERE image_id = $1 AND image_version = $2 AND source = $3
        ORDER BY position ASC"#,
    )
    .bind(image_id)
    .bind(version)
    .bind(i64::from(source))
    .fetch_all(&mut *conn)
    .await?;
    rows.into_iter().map(Detection::try_from).collect()
}

async fn replace_detections(
    conn: &mut SqliteConnection,
    image_id: i64,
    version: i64,
    source: DetectionSource,
    detections: &[Detection],
) -> Result<()> {
    sqlx::query(
        r#"DELETE FROM detection WHERE image_id = $1 AND image_version = $2 AND source = $3"#,
    )
    .bind(image_id)
    .bind(version)
    .bind(i64::from(source))
    .execute(&mut *conn)
    .await?;
    for (position, detection) in detections.iter().enumerate() {
        sqlx::query(
            r#"INSERT INTO detection
            (image_id, image_version, source, position, class_code, score, x1, y1, x2, y2)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"#,
        )
        .bind(image_id)
        .bind(version)
        .bind(i64::from(source))
        .bind(position as i64)
        .bind(i64::from(detection.class_code))
        .bind(f64::from(detection.score))
        .bind(detection.bbox.x1)
        .bind(detection.bbox.y1)
        .bind(detection.bbox.x2)
        .bind(detection.bbox.y2)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn fetch_image_row(conn: &mut SqliteConnection, id: i64) -> Result<Option<ImageRow>> {
    let sql = format!("SELECT {IMAGE_COLUMNS} FROM image WHERE id = $1");
    Ok(sqlx::query_as::<_, ImageRow>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?)
}

async fn image_from_row(conn: &mut SqliteConnection, row: ImageRow) -> Result<InspectionImage> {
    let detections = if row.detected_version == Some(row.version) && row.detection_error.is_none()
    {
        Some(fetch_detections(conn, row.id, row.version, DetectionSource::Model).await?)
    } else {
        None
    };
    Ok(InspectionImage {
        id: row.id,
        owner_id: row.owner_id,
        position: row.position,
        filename: row.filename,
        version: row.version,
        digest: row.sha256,
        state: ImageState::try_from(row.state).map_err(corrupt)?,
        detection_error: row.detection_error,
        width: u32::try_from(row.width).map_err(corrupt)?,
        height: u32::try_from(row.height).map_err(corrupt)?,
        detections,
        created_at: parse_timestamp(&row.created_at)?,
        updated_at: parse_timestamp(&row.updated_at)?,
        _guard: (),
    })
}

fn report_from_row(row: ReportRow) -> Result<InspectionReport> {
    Ok(InspectionReport {
        id: row.id,
        owner_id: row.owner_id,
        image_id: row.image_id,
        image_version: row.image_version,
        filename: row.filename,
        segments: serde_json::from_str(&row.segments)?,
        generated_at: parse_timestamp(&row.generated_at)?,
        _guard: (),
    })
}

impl OwnerRepository for InspectionDb {
    async fn create_owner(&self, owner: NewOwner) -> Result<Owner> {
        let mut conn = self.state.conn().await?;
        let created_at = now_timestamp()?;
        let row = sqlx::query_as::<_, OwnerRow>(
            r#"INSERT INTO owner (full_name, status, email, created_at) VALUES ($1, $2, $3, $4)
            RETURNING id, full_name, status, email, created_at"#,
        )
        .bind(owner.full_name.trim())
        .bind(owner.status.trim())
        .bind(owner.email.trim())
        .bind(created_at)
        .fetch_one(&mut *conn)
        .await?;
        info!(owner_id = row.id, "owner created");
        owner_from_row(&mut conn, row).await
    }

    async fn get_owner(&self, id: i64) -> Result<Owner> {
        let mut conn = self.state.conn().await?;
        let row = sqlx::query_as::<_, OwnerRow>(
            r#"SELECT id, full_name, status, email, created_at FROM owner WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(InspectionError::RecordNotFound(id))?;
        owner_from_row(&mut conn, row).await
    }

    async fn list_owners(&self) -> Result<Vec<Owner>> {
        let mut conn = self.state.conn().await?;
        let rows = sqlx::query_as::<_, OwnerRow>(
            r#"SELECT id, full_name, status, email, created_at FROM owner ORDER BY id ASC"#,
        )
        .fetch_all(&mut *conn)
        .await?;
        let mut owners = Vec::with_capacity(rows.len());
        for row in rows {
            owners.push(owner_from_row(&mut conn, row).await?);
        }
        Ok(owners)
    }

    async fn delete_owner(&self, id: i64) -> Result<()> {
        let _writer = self.state.writer().await;
        let mut conn = self.state.conn().await?;
        let mut tx = conn.begin().await?;
        let exists = sqlx::query_scalar::<_, i64>("SELECT id FROM owner WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(InspectionError::RecordNotFound(id));
        }
        let images =
            sqlx::query_scalar::<_, String>("SELECT filename FROM image WHERE owner_id = $1")
                .bind(id)
                .fetch_all(&mut *tx)
                .await?;
        let reports =
            sqlx::query_scalar::<_, String>("SELECT filename FROM report WHERE owner_id = $1")
                .bind(id)
                .fetch_all(&mut *tx)
                .await?;
        sqlx::query("DELETE FROM owner WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        for filename in &images {
            self.state.remove_artifact(ArtifactKind::Image, filename).await;
        }
        for filename in &reports {
            self.state.remove_artifact(ArtifactKind::Report, filename).await;
        }
        info!(
            owner_id = id,
            images = images.len(),
            reports = reports.len(),
            "owner deleted"
        );
        Ok(())
    }
}

impl ImageRepository for InspectionDb {
    async fn add_image(&self, image: NewImage) -> Result<InspectionImage> {
        let _writer = self.state.writer().await;
        let digest = content_digest(&image.bytes);
        let now = now_timestamp()?;
        let mut conn = self.state.conn().await?;
        let mut tx = conn.begin().await?;

        let owner = sqlx::query_scalar::<_, i64>("SELECT id FROM owner WHERE id = $1")
            .bind(image.owner_id)
            .fetch_optional(&mut *tx)
            .await?;
        if owner.is_none() {
            return Err(InspectionError::RecordNotFound(image.owner_id));
        }
        let position = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM image WHERE owner_id = $1",
        )
        .bind(image.owner_id)
        .fetch_one(&mut *tx)
        .await?;

        let sql = format!(
            r#"INSERT INTO image
            (owner_id, position, filename, version, sha256, state, width, height, created_at, updated_at)
            VALUES ($1, $2, $3, 1, $4, $5, $6, $7, $8, $9)
            RETURNING {IMAGE_COLUMNS}"#
        );
        let row = sqlx::query_as::<_, ImageRow>(&sql)
            .bind(image.owner_id)
            .bind(position)
            .bind(&image.filename)
            .bind(&digest)
            .bind(i64::from(ImageState::Uploaded))
            .bind(i64::from(image.width))
            .bind(i64::from(image.height))
            .bind(&now)
            .bind(&now)
            .fetch_one(&mut *tx)
            .await?;

        self.state
            .write_artifact(ArtifactKind::Image, &image.filename, &image.bytes)
            .await?;
        if let Err(err) = tx.commit().await {
            self.state
                .remove_artifact(ArtifactKind::Image, &image.filename)
                .await;
            return Err(err.into());
        }

        info!(
            owner_id = image.owner_id,
            image_id = row.id,
            filename = %image.filename,
            "image stored"
        );
        image_from_row(&mut conn, row).await
    }

    async fn get_image(&self, owner_id: i64, filename: &str) -> Result<InspectionImage> {
        let mut conn = self.state.conn().await?;
        let sql = format!("SELECT {IMAGE_COLUMNS} FROM image WHERE owner_id = $1 AND filename = $2");
        let row = sqlx::query_as::<_, ImageRow>(&sql)
            .bind(owner_id)
            .bind(filename)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| InspectionError::ArtifactNotFound(filename.to_string()))?;
        image_from_row(&mut conn, row).await
    }

    async fn get_image_by_id(&self, id: i64) -> Result<InspectionImage> {
        let mut conn = self.state.conn().await?;
        let row = fetch_image_row(&mut conn, id)
            .await?
            .ok_or(InspectionError::ImageNotFound(id))?;
        image_from_row(&mut conn, row).await
    }

    async fn list_images(&self, owner_id: i64) -> Result<Vec<InspectionImage>> {
        let mut conn = self.state.conn().await?;
        let sql = format!("SELECT {IMAGE_COLUMNS} FROM image WHERE owner_id = $1 ORDER BY position ASC");
        let rows = sqlx::query_as::<_, ImageRow>(&sql)
            .bind(owner_id)
            .fetch_all(&mut *conn)
            .await?;
        let mut images = Vec::with_capacity(rows.len());
        for row in rows {
            images.push(image_from_row(&mut conn, row).await?);
        }
        Ok(images)
    }

    async fn record_detection(
        &self,
        image_id: i64,
        version: i64,
        outcome: std::result::Result<DetectionResult, DetectionError>,
    ) -> Result<RecordOutcome> {
        let _writer = self.state.writer().await;
        let now = now_timestamp()?;
        let mut conn = self.state.conn().await?;
        let mut tx = conn.begin().await?;

        let current_version = sqlx::query_scalar::<_, i64>("SELECT version FROM image WHERE id = $1")
            .bind(image_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(InspectionError::ImageNotFound(image_id))?;
        if current_version != version {
            info!(
                image_id,
                computed_for = version,
                current_version,
                "discarding stale detection result"
            );
            return Ok(RecordOutcome::Discarded { current_version });
        }

        let (detections, error, state) = match &outcome {
            Ok(result) => (result.detections.as_slice(), None, ImageState::Detected),
            Err(err) => (&[][..], Some(err.to_string()), ImageState::DetectionFailed),
        };
        replace_detections(&mut tx, image_id, version, DetectionSource::Model, detections).await?;
        sqlx::query(
            r#"UPDATE image SET
                state = CASE WHEN state IN ($1, $2, $3) THEN $4 ELSE state END,
                detected_version = $5,
                detection_error = $6,
                updated_at = $7
            WHERE id = $8"#,
        )
        .bind(i64::from(ImageState::Uploaded))
        .bind(i64::from(ImageState::Detected))
        .bind(i64::from(ImageState::DetectionFailed))
        .bind(i64::from(state))
        .bind(version)
        .bind(error)
        .bind(now)
        .bind(image_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        debug!(image_id, version, detections = detections.len(), "detection outcome recorded");
        Ok(RecordOutcome::Recorded)
    }

    async fn replace_image(
        &self,
        image_id: i64,
        replacement: ImageReplacement,
    ) -> Result<ReplacedImage> {
        let _writer = self.state.writer().await;
        let digest = content_digest(&replacement.bytes);
        let now = now_timestamp()?;
        let mut conn = self.state.conn().await?;
        let mut tx = conn.begin().await?;

        let current = fetch_image_row(&mut tx, image_id)
            .await?
            .ok_or(InspectionError::ImageNotFound(image_id))?;
        let new_version = current.sha256 != digest;
        let version = if new_version {
            current.version + 1
        } else {
            current.version
        };

        sqlx::query(
            r#"UPDATE image SET
                version = $1,
                sha256 = $2,
                width = $3,
                height = $4,
                state = $5,
                updated_at = $6
            WHERE id = $7"#,
        )
        .bind(version)
        .bind(&digest)
        .bind(i64::from(replacement.width))
        .bind(i64::from(replacement.height))
        .bind(i64::from(ImageState::Annotated))
        .bind(now)
        .bind(image_id)
        .execute(&mut *tx)
        .await?;
        replace_detections(
            &mut tx,
            image_id,
            version,
            DetectionSource::Operator,
            &replacement.annotations,
        )
        .await?;

        let staged = if new_version {
            Some(
                self.state
                    .stage_artifact(ArtifactKind::Image, &current.filename, &replacement.bytes)
                    .await?,
            )
        } else {
            None
        };
        if let Err(err) = tx.commit().await {
            if let Some(staged) = &staged {
                self.state.discard_artifact(staged).await;
            }
            return Err(err.into());
        }
        if let Some(staged) = staged {
            self.state.publish_artifact(staged).await?;
        }

        info!(
            image_id,
            version,
            new_version,
            annotations = replacement.annotations.len(),
            "image replaced"
        );
        let row = fetch_image_row(&mut conn, image_id)
            .await?
            .ok_or(InspectionError::ImageNotFound(image_id))?;
        Ok(ReplacedImage {
            image: image_from_row(&mut conn, row).await?,
            new_version,
        })
    }

    async fn get_detections(
        &self,
        image_id: i64,
        version: i64,
        source: DetectionSource,
    ) -> Result<Vec<Detection>> {
        let mut conn = self.state.conn().await?;
        fetch_detections(&mut conn, image_id, version, source).await
    }

    async fn read_image(&self, filename: &str) -> Result<Vec<u8>> {
        self.state.read_artifact(ArtifactKind::Image, filename).await
    }
}

impl ReportRepository for InspectionDb {
    async fn save_report(&self, report: NewReport) -> Result<InspectionReport> {
        let _writer = self.state.writer().await;
        let segments = serde_json::to_string(&report.segments)?;
        let now = now_timestamp()?;
        let mut conn = self.state.conn().await?;
        let mut tx = conn.begin().await?;

        let current_version = sqlx::query_scalar::<_, i64>(
            "SELECT version FROM image WHERE id = $1 AND owner_id = $2",
        )
        .bind(report.image_id)
        .bind(report.owner_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(InspectionError::ImageNotFound(report.image_id))?;
        let previous = sqlx::query_scalar::<_, String>(
            "SELECT filename FROM report WHERE image_id = $1 AND image_version = $2",
        )
        .bind(report.image_id)
        .bind(report.image_version)
        .fetch_optional(&mut *tx)
        .await?;

        let sql = format!(
            r#"INSERT INTO report (owner_id, image_id, image_version, filename, segments, generated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (image_id, image_version) DO UPDATE SET
                filename = excluded.filename,
                segments = excluded.segments,
                generated_at = excluded.generated_at
            RETURNING {REPORT_COLUMNS}"#
        );
        let row = sqlx::query_as::<_, ReportRow>(&sql)
            .bind(report.owner_id)
            .bind(report.image_id)
            .bind(report.image_version)
            .bind(&report.filename)
            .bind(&segments)
            .bind(&now)
            .fetch_one(&mut *tx)
            .await?;

        if current_version == report.image_version {
            sqlx::query("UPDATE image SET state = $1, updated_at = $2 WHERE id = $3")
                .bind(i64::from(ImageState::ReportGenerated))
                .bind(&now)
                .bind(report.image_id)
                .execute(&mut *tx)
                .await?;
        }

        let staged = self
            .state
            .stage_artifact(ArtifactKind::Report, &report.filename, &report.bytes)
            .await?;
        if let Err(err) = tx.commit().await {
            self.state.discard_artifact(&staged).await;
            return Err(err.into());
        }
        self.state.publish_artifact(staged).await?;

        if let Some(previous) = previous.filter(|previous| *previous != report.filename) {
            self.state
                .remove_artifact(ArtifactKind::Report, &previous)
                .await;
        }
        info!(
            owner_id = report.owner_id,
            image_id = report.image_id,
            version = report.image_version,
            filename = %report.filename,
            "report stored"
        );
        report_from_row(row)
    }

    async fn list_reports(&self, owner_id: i64) -> Result<Vec<InspectionReport>> {
        let mut conn = self.state.conn().await?;
        let sql = format!("SELECT {REPORT_COLUMNS} FROM report WHERE owner_id = $1 ORDER BY id ASC");
        sqlx::query_as::<_, ReportRow>(&sql)
            .bind(owner_id)
            .fetch_all(&mut *conn)
            .await?
            .into_iter()
            .map(report_from_row)
            .collect()
    }

    async fn get_report(&self, filename: &str) -> Result<InspectionReport> {
        let mut conn = self.state.conn().await?;
        let sql = format!("SELECT {REPORT_COLUMNS} FROM report WHERE filename = $1");
        let row = sqlx::query_as::<_, ReportRow>(&sql)
            .bind(filename)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| InspectionError::ArtifactNotFound(filename.to_string()))?;
        report_from_row(row)
    }

    async fn read_report(&self, filename: &str) -> Result<Vec<u8>> {
        self.state.read_artifact(ArtifactKind::Report, filename).await
    }
}
