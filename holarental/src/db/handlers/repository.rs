//! The editable-record repository trait.

use crate::db::errors::Result;

/// Users, housing areas and rooms: rows that are created, edited field by field and deleted.
///
/// Contracts, transactions and disputes never go through this trait. They change through
/// version- or status-checked transitions and expose those as inherent methods instead.
///
/// Deleting one of these rows is refused once contract or payment records point at it, because
/// those records are kept. Callers ask [`Repository::has_history`] first so they can answer with
/// a conflict; the `ON DELETE RESTRICT` keys catch anything recorded in between.
#[async_trait::async_trait]
pub trait Repository {
    type CreateRequest;
    type UpdateRequest;
    /// Row type returned by every operation
    type Response;
    type Id: Send + Sync;
    /// Search and pagination parameters for [`Repository::list`]
    type Filter: Send + Sync;

    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response>;

    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>>;

    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>>;

    /// Apply the fields present in `request`. Fails with `NotFound` for an unknown id.
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response>;

    /// Returns `false` when no row had that id.
    async fn delete(&mut self, id: Self::Id) -> Result<bool>;

    /// Whether any contract or transaction references the row, in any status.
    async fn has_history(&mut self, id: Self::Id) -> Result<bool>;
}
