//! SQLite-backed repositories.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

use std::{collections::BTreeSet, str::FromStr};

use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};

use super::{FirmRepository, OfficeRepository, UserProfileRepository};
use crate::{
    domain::{
        Address, Firm, FirmId, FirmType, NewFirm, NewOffice, Office, OfficeId, UserProfile,
        UserProfileId,
    },
    Error, Result,
};

const FIRM_COLUMNS: &str = "id, code, name, firm_type, enabled, parent_id";
const OFFICE_COLUMNS: &str =
    "id, code, firm_id, address_line1, address_line2, address_line3, city, postcode";

/// Map a sqlx error, classifying unique-constraint violations.
///
/// SQLite reports the offending column as `table.column`, which is how a
/// name collision is told apart from a code collision.
fn classify(err: sqlx::Error, name_column: Option<&str>) -> Error {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return if name_column.is_some_and(|column| db.message().contains(column)) {
                Error::DuplicateName {
                    name: String::new(),
                }
            } else {
                Error::Conflict(db.message().to_string())
            };
        }
    }
    Error::DatabaseError(err.to_string())
}

fn with_name(err: Error, name: &str) -> Error {
    match err {
        Error::DuplicateName { .. } => Error::DuplicateName {
            name: name.to_string(),
        },
        other => other,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// FIRMS
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, FromRow)]
struct FirmRow {
    id: i64,
    code: String,
    name: String,
    firm_type: String,
    enabled: bool,
    parent_id: Option<i64>,
}

impl TryFrom<FirmRow> for Firm {
    type Error = Error;

    fn try_from(row: FirmRow) -> Result<Self> {
        let firm_type = FirmType::from_str(&row.firm_type).map_err(|_| {
            Error::ParseError(format!(
                "Stored firm {} has unknown type '{}'",
                row.code, row.firm_type
            ))
        })?;
        Ok(Self {
            id: FirmId(row.id),
            code: row.code,
            name: row.name,
            firm_type,
            enabled: row.enabled,
            parent_id: row.parent_id.map(FirmId),
        })
    }
}

fn into_firms(rows: Vec<FirmRow>) -> Result<Vec<Firm>> {
    rows.into_iter().map(Firm::try_from).collect()
}

#[derive(Debug, Clone)]
pub struct SqliteFirmRepository {
    db: SqlitePool,
}

impl SqliteFirmRepository {
    pub const fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Initialize the firm table.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS firm (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                code TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL UNIQUE,
                firm_type TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                parent_id INTEGER REFERENCES firm(id)
            )",
        )
        .execute(&self.db)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_firm_parent ON firm(parent_id)")
            .execute(&self.db)
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn fetch_optional(&self, sql: &str, value: &str) -> Result<Option<Firm>> {
        sqlx::query_as::<_, FirmRow>(sql)
            .bind(value)
            .fetch_optional(&self.db)
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?
            .map(Firm::try_from)
            .transpose()
    }
}

#[async_trait]
impl FirmRepository for SqliteFirmRepository {
    async fn find_all(&self) -> Result<Vec<Firm>> {
        let rows = sqlx::query_as::<_, FirmRow>(&format!(
            "SELECT {FIRM_COLUMNS} FROM firm ORDER BY code"
        ))
        .fetch_all(&self.db)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        into_firms(rows)
    }

    async fn find_by_id(&self, id: FirmId) -> Result<Option<Firm>> {
        sqlx::query_as::<_, FirmRow>(&format!("SELECT {FIRM_COLUMNS} FROM firm WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.db)
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?
            .map(Firm::try_from)
            .transpose()
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<Firm>> {
        self.fetch_optional(
            &format!("SELECT {FIRM_COLUMNS} FROM firm WHERE code = ?"),
            code,
        )
        .await
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Firm>> {
        self.fetch_optional(
            &format!("SELECT {FIRM_COLUMNS} FROM firm WHERE name = ?"),
            name,
        )
        .await
    }

    async fn find_children(&self, id: FirmId) -> Result<Vec<Firm>> {
        let rows = sqlx::query_as::<_, FirmRow>(&format!(
            "SELECT {FIRM_COLUMNS} FROM firm WHERE parent_id = ? ORDER BY code"
        ))
        .bind(id.0)
        .fetch_all(&self.db)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        into_firms(rows)
    }

    async fn insert(&self, firm: NewFirm) -> Result<Firm> {
        let result = sqlx::query(
            "INSERT INTO firm (code, name, firm_type, enabled, parent_id) VALUES (?, ?, ?, 1, NULL)",
        )
        .bind(&firm.code)
        .bind(&firm.name)
        .bind(firm.firm_type.as_ref())
        .execute(&self.db)
        .await
        .map_err(|e| with_name(classify(e, Some("firm.name")), &firm.name))?;

        Ok(Firm {
            id: FirmId(result.last_insert_rowid()),
            code: firm.code,
            name: firm.name,
            firm_type: firm.firm_type,
            enabled: true,
            parent_id: None,
        })
    }

    async fn save(&self, firm: &Firm) -> Result<()> {
        let result = sqlx::query(
            "UPDATE firm SET name = ?, firm_type = ?, enabled = ?, parent_id = ? WHERE id = ?",
        )
        .bind(&firm.name)
        .bind(firm.firm_type.as_ref())
        .bind(firm.enabled)
        .bind(firm.parent_id.map(|p| p.0))
        .bind(firm.id.0)
        .execute(&self.db)
        .await
        .map_err(|e| with_name(classify(e, Some("firm.name")), &firm.name))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("firm {}", firm.code)));
        }
        Ok(())
    }

    async fn delete(&self, id: FirmId) -> Result<()> {
        let (offices, children): (i64, i64) = sqlx::query_as(
            "SELECT (SELECT COUNT(*) FROM office WHERE firm_id = ?),
                    (SELECT COUNT(*) FROM firm WHERE parent_id = ?)",
        )
        .bind(id.0)
        .bind(id.0)
        .fetch_one(&self.db)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        if offices > 0 || children > 0 {
            return Err(Error::Conflict(format!(
                "firm {id} still has {offices} office(s) and {children} child firm(s)"
            )));
        }

        sqlx::query("DELETE FROM firm WHERE id = ?")
            .bind(id.0)
            .execute(&self.db)
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;

        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// OFFICES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, FromRow)]
struct OfficeRow {
    id: i64,
    code: String,
    firm_id: i64,
    address_line1: Option<String>,
    address_line2: Option<String>,
    address_line3: Option<String>,
    city: Option<String>,
    postcode: Option<String>,
}

impl From<OfficeRow> for Office {
    fn from(row: OfficeRow) -> Self {
        Self {
            id: OfficeId(row.id),
            code: row.code,
            firm_id: FirmId(row.firm_id),
            address: Address {
                line1: row.address_line1,
                line2: row.address_line2,
                line3: row.address_line3,
                city: row.city,
                postcode: row.postcode,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct SqliteOfficeRepository {
    db: SqlitePool,
}

impl SqliteOfficeRepository {
    pub const fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Initialize the office table. Requires the firm table.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS office (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                code TEXT NOT NULL UNIQUE,
                firm_id INTEGER NOT NULL REFERENCES firm(id),
                address_line1 TEXT,
                address_line2 TEXT,
                address_line3 TEXT,
                city TEXT,
                postcode TEXT
            )",
        )
        .execute(&self.db)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl OfficeRepository for SqliteOfficeRepository {
    async fn find_all(&self) -> Result<Vec<Office>> {
        let rows = sqlx::query_as::<_, OfficeRow>(&format!(
            "SELECT {OFFICE_COLUMNS} FROM office ORDER BY code"
        ))
        .fetch_all(&self.db)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(rows.into_iter().map(Office::from).collect())
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<Office>> {
        let row = sqlx::query_as::<_, OfficeRow>(&format!(
            "SELECT {OFFICE_COLUMNS} FROM office WHERE code = ?"
        ))
        .bind(code)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(row.map(Office::from))
    }

    async fn find_by_firm(&self, firm: FirmId) -> Result<Vec<Office>> {
        let rows = sqlx::query_as::<_, OfficeRow>(&format!(
            "SELECT {OFFICE_COLUMNS} FROM office WHERE firm_id = ? ORDER BY code"
        ))
        .bind(firm.0)
        .fetch_all(&self.db)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(rows.into_iter().map(Office::from).collect())
    }

    async fn insert(&self, office: NewOffice) -> Result<Office> {
        let result = sqlx::query(
            "INSERT INTO office (code, firm_id, address_line1, address_line2, address_line3, city, postcode)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&office.code)
        .bind(office.firm_id.0)
        .bind(&office.address.line1)
        .bind(&office.address.line2)
        .bind(&office.address.line3)
        .bind(&office.address.city)
        .bind(&office.address.postcode)
        .execute(&self.db)
        .await
        .map_err(|e| classify(e, None))?;

        Ok(Office {
            id: OfficeId(result.last_insert_rowid()),
            code: office.code,
            firm_id: office.firm_id,
            address: office.address,
        })
    }

    async fn save(&self, office: &Office) -> Result<()> {
        let result = sqlx::query(
            "UPDATE office SET firm_id = ?, address_line1 = ?, address_line2 = ?, address_line3 = ?,
                    city = ?, postcode = ?
             WHERE id = ?",
        )
        .bind(office.firm_id.0)
        .bind(&office.address.line1)
        .bind(&office.address.line2)
        .bind(&office.address.line3)
        .bind(&office.address.city)
        .bind(&office.address.postcode)
        .bind(office.id.0)
        .execute(&self.db)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("office {}", office.code)));
        }
        Ok(())
    }

    async fn delete(&self, id: OfficeId) -> Result<()> {
        let (referencing,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM user_profile_office WHERE office_id = ?")
                .bind(id.0)
                .fetch_one(&self.db)
                .await
                .map_err(|e| Error::DatabaseError(e.to_string()))?;

        if referencing > 0 {
            return Err(Error::Conflict(format!(
                "office {id} is still referenced by {referencing} user profile(s)"
            )));
        }

        sqlx::query("DELETE FROM office WHERE id = ?")
            .bind(id.0)
            .execute(&self.db)
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;

        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// USER PROFILES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct SqliteUserProfileRepository {
    db: SqlitePool,
}

impl SqliteUserProfileRepository {
    pub const fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Initialize the profile and association tables. Requires the office table.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS user_profile (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL
            )",
        )
        .execute(&self.db)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS user_profile_office (
                user_profile_id INTEGER NOT NULL REFERENCES user_profile(id),
                office_id INTEGER NOT NULL REFERENCES office(id),
                PRIMARY KEY (user_profile_id, office_id)
            )",
        )
        .execute(&self.db)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_user_profile_office_office
             ON user_profile_office(office_id)",
        )
        .execute(&self.db)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn office_ids_of(&self, profile: i64) -> Result<BTreeSet<OfficeId>> {
        let rows: Vec<(i64,)> =
            sqlx::query_as("SELECT office_id FROM user_profile_office WHERE user_profile_id = ?")
                .bind(profile)
                .fetch_all(&self.db)
                .await
                .map_err(|e| Error::DatabaseError(e.to_string()))?;
        Ok(rows.into_iter().map(|(id,)| OfficeId(id)).collect())
    }
}

#[async_trait]
impl UserProfileRepository for SqliteUserProfileRepository {
    async fn find_by_office(&self, office: OfficeId) -> Result<Vec<UserProfile>> {
        let rows: Vec<(i64, String)> = sqlx::query_as(
            "SELECT p.id, p.name FROM user_profile p
             JOIN user_profile_office upo ON upo.user_profile_id = p.id
             WHERE upo.office_id = ?
             ORDER BY p.id",
        )
        .bind(office.0)
        .fetch_all(&self.db)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

        let mut profiles = Vec::with_capacity(rows.len());
        for (id, name) in rows {
            profiles.push(UserProfile {
                id: UserProfileId(id),
                name,
                office_ids: self.office_ids_of(id).await?,
            });
        }
        Ok(profiles)
    }

    async fn save_all(&self, profiles: &[UserProfile]) -> Result<()> {
        let mut tx = self
            .db
            .begin()
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;

        for profile in profiles {
            sqlx::query("DELETE FROM user_profile_office WHERE user_profile_id = ?")
                .bind(profile.id.0)
                .execute(&mut *tx)
                .await
                .map_err(|e| Error::DatabaseError(e.to_string()))?;

            for office in &profile.office_ids {
                sqlx::query(
                    "INSERT INTO user_profile_office (user_profile_id, office_id) VALUES (?, ?)",
                )
                .bind(profile.id.0)
                .bind(office.0)
                .execute(&mut *tx)
                .await
                .map_err(|e| Error::DatabaseError(e.to_string()))?;
            }
        }

        tx.commit()
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))
    }

    async fn insert(&self, name: &str, offices: &[OfficeId]) -> Result<UserProfile> {
        let result = sqlx::query("INSERT INTO user_profile (name) VALUES (?)")
            .bind(name)
            .execute(&self.db)
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;

        let profile = UserProfile {
            id: UserProfileId(result.last_insert_rowid()),
            name: name.to_string(),
            office_ids: offices.iter().copied().collect(),
        };
        self.save_all(std::slice::from_ref(&profile)).await?;
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use crate::db::Database;

    use super::*;

    async fn setup() -> Result<Database> {
        Database::in_memory().await
    }

    fn acme() -> NewFirm {
        NewFirm {
            code: "12345".to_string(),
            name: "Acme Legal".to_string(),
            firm_type: FirmType::LegalServicesProvider,
        }
    }

    #[tokio::test]
    async fn test_insert_and_find_firm() -> Result<()> {
        let db = setup().await?;
        let firms = db.firms();
        let created = firms.insert(acme()).await?;

        assert!(created.enabled);
        assert_eq!(created.parent_id, None);
        assert_eq!(firms.find_by_code("12345").await?, Some(created.clone()));
        assert_eq!(firms.find_by_name("Acme Legal").await?, Some(created.clone()));
        assert_eq!(firms.find_by_id(created.id).await?, Some(created));
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_name_is_classified() -> Result<()> {
        let db = setup().await?;
        let firms = db.firms();
        firms.insert(acme()).await?;

        let result = firms
            .insert(NewFirm {
                code: "99999".to_string(),
                ..acme()
            })
            .await;
        assert_eq!(
            result.err(),
            Some(Error::DuplicateName {
                name: "Acme Legal".to_string()
            })
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_code_is_conflict() -> Result<()> {
        let db = setup().await?;
        let firms = db.firms();
        firms.insert(acme()).await?;

        let result = firms
            .insert(NewFirm {
                name: "Other".to_string(),
                ..acme()
            })
            .await;
        assert!(matches!(result, Err(Error::Conflict(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_find_children_uses_parent_link() -> Result<()> {
        let db = setup().await?;
        let firms = db.firms();
        let parent = firms.insert(acme()).await?;
        let mut child = firms
            .insert(NewFirm {
                code: "200".to_string(),
                name: "Child".to_string(),
                firm_type: FirmType::Advocate,
            })
            .await?;
        child.parent_id = Some(parent.id);
        firms.save(&child).await?;

        let children = firms.find_children(parent.id).await?;
        assert_eq!(children, vec![child]);
        Ok(())
    }

    #[tokio::test]
    async fn test_office_delete_refused_while_referenced() -> Result<()> {
        let db = setup().await?;
        let firm = db.firms().insert(acme()).await?;
        let office = db
            .offices()
            .insert(NewOffice {
                code: "1A001L".to_string(),
                firm_id: firm.id,
                address: Address::default(),
            })
            .await?;
        let profiles = db.user_profiles();
        let mut profile = profiles.insert("alice", &[office.id]).await?;

        assert!(matches!(
            db.offices().delete(office.id).await,
            Err(Error::Conflict(_))
        ));

        profile.office_ids.clear();
        profiles.save_all(&[profile]).await?;
        db.offices().delete(office.id).await?;
        assert_eq!(db.offices().find_by_code("1A001L").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_find_by_office_returns_full_office_sets() -> Result<()> {
        let db = setup().await?;
        let firm = db.firms().insert(acme()).await?;
        let a = db
            .offices()
            .insert(NewOffice {
                code: "A".to_string(),
                firm_id: firm.id,
                address: Address::default(),
            })
            .await?;
        let b = db
            .offices()
            .insert(NewOffice {
                code: "B".to_string(),
                firm_id: firm.id,
                address: Address::default(),
            })
            .await?;
        db.user_profiles().insert("alice", &[a.id, b.id]).await?;
        db.user_profiles().insert("bob", &[b.id]).await?;

        let on_a = db.user_profiles().find_by_office(a.id).await?;
        assert_eq!(on_a.len(), 1);
        assert_eq!(on_a[0].office_ids, BTreeSet::from([a.id, b.id]));

        let on_b = db.user_profiles().find_by_office(b.id).await?;
        assert_eq!(on_b.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_firm_delete_refused_while_offices_remain() -> Result<()> {
        let db = setup().await?;
        let firm = db.firms().insert(acme()).await?;
        let office = db
            .offices()
            .insert(NewOffice {
                code: "1A001L".to_string(),
                firm_id: firm.id,
                address: Address::default(),
            })
            .await?;

        assert_eq!(db.offices().find_by_firm(firm.id).await?, vec![office.clone()]);
        assert!(matches!(
            db.firms().delete(firm.id).await,
            Err(Error::Conflict(_))
        ));

        db.offices().delete(office.id).await?;
        db.firms().delete(firm.id).await?;
        assert_eq!(db.firms().find_by_code("12345").await?, None);
        Ok(())
    }
}
