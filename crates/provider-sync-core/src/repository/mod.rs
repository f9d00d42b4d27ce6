//! Persistence seams for firms, offices and user-profile associations.
//!
//! The reconciliation commands only talk to these traits. The SQLite
//! implementations live in [`sqlite`]; tests substitute their own.

use async_trait::async_trait;

use crate::{
    domain::{Firm, FirmId, NewFirm, NewOffice, Office, OfficeId, UserProfile},
    Result,
};

pub mod sqlite;

pub use sqlite::{SqliteFirmRepository, SqliteOfficeRepository, SqliteUserProfileRepository};

/// Firm persistence.
#[async_trait]
pub trait FirmRepository: Send + Sync {
    // ━━━ Queries ━━━

    /// All firms, ordered by code.
    async fn find_all(&self) -> Result<Vec<Firm>>;

    async fn find_by_id(&self, id: FirmId) -> Result<Option<Firm>>;

    async fn find_by_code(&self, code: &str) -> Result<Option<Firm>>;

    async fn find_by_name(&self, name: &str) -> Result<Option<Firm>>;

    /// Firms whose parent is `id`.
    async fn find_children(&self, id: FirmId) -> Result<Vec<Firm>>;

    // ━━━ Mutations ━━━

    /// Insert a new enabled firm without a parent.
    ///
    /// # Errors
    ///
    /// - `Error::DuplicateName` if another firm already holds the name
    /// - `Error::Conflict` if the code is already taken
    async fn insert(&self, firm: NewFirm) -> Result<Firm>;

    /// Persist name, type, enabled flag and parent of an existing firm.
    ///
    /// # Errors
    ///
    /// - `Error::DuplicateName` if another firm already holds the name
    /// - `Error::NotFound` if the firm no longer exists
    async fn save(&self, firm: &Firm) -> Result<()>;

    /// Delete a firm row.
    ///
    /// # Errors
    ///
    /// - `Error::Conflict` while offices or child firms still reference it
    async fn delete(&self, id: FirmId) -> Result<()>;
}

/// Office persistence.
#[async_trait]
pub trait OfficeRepository: Send + Sync {
    /// All offices, ordered by code.
    async fn find_all(&self) -> Result<Vec<Office>>;

    async fn find_by_code(&self, code: &str) -> Result<Option<Office>>;

    /// Offices owned by `firm`, ordered by code.
    async fn find_by_firm(&self, firm: FirmId) -> Result<Vec<Office>>;

    async fn insert(&self, office: NewOffice) -> Result<Office>;

    async fn save(&self, office: &Office) -> Result<()>;

    /// Delete an office row.
    ///
    /// # Errors
    ///
    /// - `Error::Conflict` while any user profile still references the office
    async fn delete(&self, id: OfficeId) -> Result<()>;
}

/// User-profile to office associations.
#[async_trait]
pub trait UserProfileRepository: Send + Sync {
    /// Every profile associated with `office`, with its full office set.
    async fn find_by_office(&self, office: OfficeId) -> Result<Vec<UserProfile>>;

    /// Persist the office sets of `profiles` in one transaction.
    async fn save_all(&self, profiles: &[UserProfile]) -> Result<()>;

    /// Create a profile with an initial set of offices.
    async fn insert(&self, name: &str, offices: &[OfficeId]) -> Result<UserProfile>;
}
