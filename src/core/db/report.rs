use std::future::Future;

use time::OffsetDateTime;

use crate::error::Result;
use crate::report::SegmentSummary;

#[derive(Debug, Clone)]
pub struct InspectionReport {
    pub id: i64,
    pub owner_id: i64,
    pub image_id: i64,
    pub image_version: i64,
    pub filename: String,
    pub segments: Vec<SegmentSummary>,
    pub generated_at: OffsetDateTime,
    pub(super) _guard: (),
}

#[derive(Debug, Clone)]
pub struct NewReport {
    pub owner_id: i64,
    pub image_id: i64,
    pub image_version: i64,
    pub filename: String,
    pub segments: Vec<SegmentSummary>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, sqlx::FromRow)]
pub(super) struct ReportRow {
    pub id: i64,
    pub owner_id: i64,
    pub image_id: i64,
    pub image_version: i64,
    pub filename: String,
    pub segments: String,
    pub generated_at: String,
}

pub trait ReportRepository {
    /// Store the document for one image version, replacing an earlier report for the
    /// same version.
    fn save_report(&self, report: NewReport) -> impl Future<Output = Result<InspectionReport>>;
    fn list_reports(&self, owner_id: i64) -> impl Future<Output = Result<Vec<InspectionReport>>>;
    fn get_report(&self, filename: &str) -> impl Future<Output = Result<InspectionReport>>;
    fn read_report(&self, filename: &str) -> impl Future<Output = Result<Vec<u8>>>;
}
