//! Contact store contract and SQLite implementation.
//!
//! # Responsibility
//! - Provide lookup, create and relink APIs over the `contacts` table.
//! - Keep SQL details inside the persistence boundary.
//!
//! # Invariants
//! - Soft-deleted rows are invisible to every read and never mutated.
//! - Write paths call `Contact::validate()` before SQL mutations.
//! - Read paths reject invalid persisted state instead of masking it.
//! - Result lists are ordered by `(created_at, id)`.

use crate::db::DbError;
use crate::model::contact::{Contact, ContactId, ContactValidationError, LinkPrecedence};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};

const CONTACT_SELECT_SQL: &str = "SELECT
    id,
    email,
    phone,
    linked_id,
    link_precedence,
    created_at,
    updated_at,
    deleted_at
FROM contacts";

/// Current time in epoch milliseconds, evaluated by SQLite.
const NOW_MS_SQL: &str = "CAST((julianday('now') - 2440587.5) * 86400000 AS INTEGER)";

pub type RepoResult<T> = Result<T, RepoError>;

/// Store-level error for contact persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Validation(ContactValidationError),
    Db(DbError),
    NotFound(ContactId),
    /// Relink target would create a chain or a cycle.
    InvalidLink {
        id: ContactId,
        target: ContactId,
        reason: &'static str,
    },
    InvalidData(String),
}

impl RepoError {
    /// Whether the store gave up waiting for a competing writer.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Db(err) if err.is_busy())
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "contact not found: {id}"),
            Self::InvalidLink { id, target, reason } => {
                write!(f, "cannot link contact {id} to {target}: {reason}")
            }
            Self::InvalidData(message) => write!(f, "invalid persisted contact data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::NotFound(_) | Self::InvalidLink { .. } | Self::InvalidData(_) => None,
        }
    }
}

impl From<ContactValidationError> for RepoError {
    fn from(value: ContactValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Persistence operations the identity resolver depends on.
///
/// Implementations must run every call against the same transaction scope
/// for the lifetime of one resolution.
pub trait ContactStore {
    /// Live contacts whose email or phone equals the given value.
    ///
    /// `None` never matches anything.
    fn find_by_email_or_phone(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> RepoResult<Vec<Contact>>;

    /// Inserts a new contact and returns the stored row.
    fn create_contact(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
        link_precedence: LinkPrecedence,
        linked_id: Option<ContactId>,
    ) -> RepoResult<Contact>;

    /// Marks `id` secondary and links it to `new_primary_id`.
    ///
    /// # Errors
    /// - `NotFound` when `id` is unknown or soft-deleted.
    /// - `InvalidLink` when `id == new_primary_id` or the target is not a
    ///   live primary.
    fn demote_to_secondary(&self, id: ContactId, new_primary_id: ContactId) -> RepoResult<()>;

    /// One live contact by id.
    fn get_contact(&self, id: ContactId) -> RepoResult<Option<Contact>>;

    /// The live primary followed by every live contact that reaches it
    /// through `linked_id`, directly or via other members, oldest first.
    ///
    /// Returns an empty list when `primary_id` is not a live contact.
    fn find_cluster(&self, primary_id: ContactId) -> RepoResult<Vec<Contact>>;

    /// Repoints every live secondary of `from_id` to `to_id`.
    ///
    /// Returns the number of rows touched.
    fn relink_secondaries(&self, from_id: ContactId, to_id: ContactId) -> RepoResult<usize>;

    /// Administrative soft delete. Idempotent on already-deleted rows.
    fn soft_delete_contact(&self, id: ContactId) -> RepoResult<()>;
}

/// SQLite-backed contact store.
///
/// Borrows a connection, or a `Transaction` through deref, so callers decide
/// the transaction scope.
pub struct SqliteContactStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteContactStore<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl ContactStore for SqliteContactStore<'_> {
    fn find_by_email_or_phone(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> RepoResult<Vec<Contact>> {
        if email.is_none() && phone.is_none() {
            return Ok(Vec::new());
        }

        // NULL = NULL is never true, so an absent side matches nothing.
        let mut stmt = self.conn.prepare(&format!(
            "{CONTACT_SELECT_SQL}
             WHERE deleted_at IS NULL
               AND (email = ?1 OR phone = ?2)
             ORDER BY created_at ASC, id ASC;"
        ))?;
        let mut rows = stmt.query(params![email, phone])?;
        let mut contacts = Vec::new();
        while let Some(row) = rows.next()? {
            contacts.push(parse_contact_row(row)?);
        }
        Ok(contacts)
    }

    fn create_contact(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
        link_precedence: LinkPrecedence,
        linked_id: Option<ContactId>,
    ) -> RepoResult<Contact> {
        let draft = Contact {
            id: 0,
            email: email.map(str::to_string),
            phone: phone.map(str::to_string),
            linked_id,
            link_precedence,
            created_at: 0,
            updated_at: 0,
            deleted_at: None,
        };
        draft.validate()?;

        if let Some(target) = linked_id {
            ensure_live_primary(self.conn, 0, target)?;
        }

        self.conn.execute(
            &format!(
                "INSERT INTO contacts (
                    email,
                    phone,
                    linked_id,
                    link_precedence,
                    created_at,
                    updated_at
                ) VALUES (?1, ?2, ?3, ?4, {NOW_MS_SQL}, {NOW_MS_SQL});"
            ),
            params![email, phone, linked_id, link_precedence.as_str()],
        )?;

        let id = self.conn.last_insert_rowid();
        self.get_contact(id)?.ok_or_else(|| {
            RepoError::InvalidData(format!("inserted contact {id} missing on read-back"))
        })
    }

    fn demote_to_secondary(&self, id: ContactId, new_primary_id: ContactId) -> RepoResult<()> {
        if id == new_primary_id {
            return Err(RepoError::InvalidLink {
                id,
                target: new_primary_id,
                reason: "contact cannot link to itself",
            });
        }
        ensure_live_primary(self.conn, id, new_primary_id)?;

        let changed = self.conn.execute(
            &format!(
                "UPDATE contacts
                 SET
                    link_precedence = 'secondary',
                    linked_id = ?2,
                    updated_at = {NOW_MS_SQL}
                 WHERE id = ?1
                   AND deleted_at IS NULL;"
            ),
            params![id, new_primary_id],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }

        Ok(())
    }

    fn get_contact(&self, id: ContactId) -> RepoResult<Option<Contact>> {
        let mut stmt = self.conn.prepare(&format!(
            "{CONTACT_SELECT_SQL}
             WHERE id = ?1
               AND deleted_at IS NULL;"
        ))?;

        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_contact_row(row)?));
        }

        Ok(None)
    }

    fn find_cluster(&self, primary_id: ContactId) -> RepoResult<Vec<Contact>> {
        let Some(primary) = self.get_contact(primary_id)? else {
            return Ok(Vec::new());
        };

        // `UNION` dedupes, so a cycle below the primary still terminates.
        let mut stmt = self.conn.prepare(&format!(
            "WITH RECURSIVE members(id) AS (
                SELECT ?1
                UNION
                SELECT contacts.id
                FROM contacts
                JOIN members ON contacts.linked_id = members.id
                WHERE contacts.deleted_at IS NULL
             )
             {CONTACT_SELECT_SQL}
             WHERE id IN (SELECT id FROM members)
               AND id <> ?1
               AND deleted_at IS NULL
             ORDER BY created_at ASC, id ASC;"
        ))?;
        let mut rows = stmt.query([primary_id])?;
        let mut cluster = vec![primary];
        while let Some(row) = rows.next()? {
            cluster.push(parse_contact_row(row)?);
        }
        Ok(cluster)
    }

    fn relink_secondaries(&self, from_id: ContactId, to_id: ContactId) -> RepoResult<usize> {
        if from_id == to_id {
            return Ok(0);
        }
        ensure_live_primary(self.conn, from_id, to_id)?;

        // `id <> ?2` keeps the target itself out of its own cluster.
        let changed = self.conn.execute(
            &format!(
                "UPDATE contacts
                 SET
                    linked_id = ?2,
                    updated_at = {NOW_MS_SQL}
                 WHERE linked_id = ?1
                   AND id <> ?2
                   AND link_precedence = 'secondary'
                   AND deleted_at IS NULL;"
            ),
            params![from_id, to_id],
        )?;
        Ok(changed)
    }

    fn soft_delete_contact(&self, id: ContactId) -> RepoResult<()> {
        let changed = self.conn.execute(
            &format!(
                "UPDATE contacts
                 SET
                    deleted_at = COALESCE(deleted_at, {NOW_MS_SQL}),
                    updated_at = CASE
                        WHEN deleted_at IS NULL THEN {NOW_MS_SQL}
                        ELSE updated_at
                    END
                 WHERE id = ?1;"
            ),
            [id],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }

        Ok(())
    }
}

fn ensure_live_primary(conn: &Connection, id: ContactId, target: ContactId) -> RepoResult<()> {
    let precedence: Option<String> = conn
        .query_row(
            "SELECT link_precedence
             FROM contacts
             WHERE id = ?1
               AND deleted_at IS NULL;",
            [target],
            |row| row.get(0),
        )
        .optional()?;

    match precedence.as_deref().and_then(LinkPrecedence::parse) {
        Some(LinkPrecedence::Primary) => Ok(()),
        Some(LinkPrecedence::Secondary) => Err(RepoError::InvalidLink {
            id,
            target,
            reason: "target is a secondary contact",
        }),
        None => Err(RepoError::InvalidLink {
            id,
            target,
            reason: "target is not a live contact",
        }),
    }
}

fn parse_contact_row(row: &Row<'_>) -> RepoResult<Contact> {
    let id: ContactId = row.get("id")?;
    let precedence_text: String = row.get("link_precedence")?;
    let link_precedence = LinkPrecedence::parse(&precedence_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid link precedence `{precedence_text}` in contacts.link_precedence for id {id}"
        ))
    })?;

    let contact = Contact {
        id,
        email: row.get("email")?,
        phone: row.get("phone")?,
        linked_id: row.get("linked_id")?,
        link_precedence,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        deleted_at: row.get("deleted_at")?,
    };
    contact
        .validate()
        .map_err(|err| RepoError::InvalidData(format!("contact {id}: {err}")))?;
    Ok(contact)
}
