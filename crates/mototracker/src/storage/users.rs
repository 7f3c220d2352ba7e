//! User accounts.

use rusqlite::{params, ErrorCode, OptionalExtension};
use tracing::debug;

use super::{flag, Storage};
use crate::error::{Error, Result};
use crate::records::User;

const USER_COLUMNS: &str =
    "id, name, email, phone, password_digest, company, image_uri, synced";

impl Storage {
    /// Insert a new user, returning its id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmailTaken`] if the email is already registered.
    pub fn insert_user(&self, user: &User) -> Result<i64> {
        let conn = self.conn()?;
        let result = conn.execute(
            r"
            INSERT INTO users (name, email, phone, password_digest, company, image_uri, synced)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
            params![
                user.name,
                user.email,
                user.phone,
                user.password_digest,
                user.company,
                user.image_uri,
                user.synced,
            ],
        );

        match result {
            Ok(_) => {
                let id = conn.last_insert_rowid();
                debug!(id, "Inserted user");
                Ok(id)
            }
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(Error::EmailTaken(user.email.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Look up a user by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn user_by_id(&self, id: i64) -> Result<Option<User>> {
        let user = self
            .conn()?
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                [id],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    /// Look up a user by email.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = self
            .conn()?
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1 LIMIT 1"),
                [email],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    /// Update a user's profile fields. The synced flag is left alone.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the user has no id or does not exist.
    pub fn update_user(&self, user: &User) -> Result<()> {
        let id = user.id.ok_or_else(|| Error::not_found("user", 0))?;
        let affected = self.conn()?.execute(
            r"
            UPDATE users
            SET name = ?1, phone = ?2, password_digest = ?3, company = ?4, image_uri = ?5
            WHERE id = ?6
            ",
            params![
                user.name,
                user.phone,
                user.password_digest,
                user.company,
                user.image_uri,
                id
            ],
        )?;
        if affected == 0 {
            return Err(Error::not_found("user", id));
        }
        Ok(())
    }

    /// Users not yet acknowledged by the remote store.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn unsynced_users(&self) -> Result<Vec<User>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE synced = 0 ORDER BY id"
        ))?;
        let users = stmt
            .query_map([], row_to_user)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(users)
    }

    /// Flip a user's synced flag. Returns `false` if no row changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn mark_user_synced(&self, id: i64) -> Result<bool> {
        let affected = self.conn()?.execute(
            "UPDATE users SET synced = 1 WHERE id = ?1 AND synced = 0",
            [id],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    Ok(User {
        id: Some(row.get(0)?),
        name: row.get(1)?,
        email: row.get(2)?,
        phone: row.get(3)?,
        password_digest: row.get(4)?,
        company: row.get(5)?,
        image_uri: row.get(6)?,
        synced: flag(row.get(7)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> Storage {
        Storage::open_in_memory().expect("failed to create test storage")
    }

    fn ana() -> User {
        User::new("Ana", "ana@example.com", "5512345678", "pw", "ACME")
    }

    #[test]
    fn test_insert_and_get_user() {
        let storage = storage();
        let id = storage.insert_user(&ana()).unwrap();

        let user = storage.user_by_id(id).unwrap().unwrap();
        assert_eq!(user.id, Some(id));
        assert_eq!(user.name, "Ana");
        assert!(user.verify_password("pw"));
        assert!(!user.synced);

        let by_email = storage.user_by_email("ana@example.com").unwrap().unwrap();
        assert_eq!(by_email, user);
    }

    #[test]
    fn test_duplicate_email_rejected() {
        let storage = storage();
        storage.insert_user(&ana()).unwrap();

        let err = storage.insert_user(&ana()).unwrap_err();
        assert!(matches!(err, Error::EmailTaken(ref e) if e == "ana@example.com"));
    }

    #[test]
    fn test_missing_user() {
        let storage = storage();
        assert!(storage.user_by_id(99).unwrap().is_none());
        assert!(storage.user_by_email("nobody@example.com").unwrap().is_none());
    }

    #[test]
    fn test_update_user_keeps_synced_flag() {
        let storage = storage();
        let id = storage.insert_user(&ana()).unwrap();
        assert!(storage.mark_user_synced(id).unwrap());

        let mut user = storage.user_by_id(id).unwrap().unwrap();
        user.name = "Ana María".to_string();
        user.synced = false;
        storage.update_user(&user).unwrap();

        let stored = storage.user_by_id(id).unwrap().unwrap();
        assert_eq!(stored.name, "Ana María");
        assert!(stored.synced);
    }

    #[test]
    fn test_update_missing_user() {
        let storage = storage();
        let mut user = ana();
        user.id = Some(404);
        assert!(matches!(
            storage.update_user(&user),
            Err(Error::NotFound { id: 404, .. })
        ));
    }

    #[test]
    fn test_unsynced_users_and_mark() {
        let storage = storage();
        let a = storage.insert_user(&ana()).unwrap();
        let b = storage
            .insert_user(&User::new("Beto", "beto@example.com", "5500000000", "pw", ""))
            .unwrap();

        assert_eq!(storage.unsynced_users().unwrap().len(), 2);

        assert!(storage.mark_user_synced(a).unwrap());
        assert!(!storage.mark_user_synced(a).unwrap());

        let pending = storage.unsynced_users().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, Some(b));
    }
}
