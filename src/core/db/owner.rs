use std::future::Future;

use time::OffsetDateTime;

use crate::error::Result;

/// An inspection record: one person or object whose welds were imaged.
#[derive(Debug, Clone)]
pub struct Owner {
    pub id: i64,
    pub full_name: String,
    pub status: String,
    pub email: String,
    pub created_at: OffsetDateTime,
    /// Image filenames in upload order.
    pub images: Vec<String>,
    /// Report filenames in generation order.
    pub reports: Vec<String>,
    pub(super) _guard: (),
}

#[derive(Debug, Clone, Default)]
pub struct NewOwner {
    pub full_name: String,
    pub status: String,
    pub email: String,
}

#[derive(Debug, sqlx::FromRow)]
pub(super) struct OwnerRow {
    pub id: i64,
    pub full_name: String,
    pub status: String,
    pub email: String,
    pub created_at: String,
}

pub trait OwnerRepository {
    fn create_owner(&self, owner: NewOwner) -> impl Future<Output = Result<Owner>>;
    fn get_owner(&self, id: i64) -> impl Future<Output = Result<Owner>>;
    fn list_owners(&self) -> impl Future<Output = Result<Vec<Owner>>>;
    /// Remove the owner with every image, detection and report, including stored files.
    fn delete_owner(&self, id: i64) -> impl Future<Output = Result<()>>;
}
