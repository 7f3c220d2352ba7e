//! Motorcycles and emergency contacts, both owned by a user.

use rusqlite::{params, OptionalExtension};
use tracing::debug;

use super::{flag, Storage};
use crate::error::{Error, Result};
use crate::records::{EmergencyContact, Motorcycle};

const MOTORCYCLE_COLUMNS: &str =
    "id, user_id, brand, model, year, plate, displacement, insurance, color, synced";

const CONTACT_COLUMNS: &str =
    "id, user_id, full_name, phone_number, relationship, email, synced";

impl Storage {
    /// Insert a motorcycle, returning its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn insert_motorcycle(&self, motorcycle: &Motorcycle) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            r"
            INSERT INTO motorcycles
                (user_id, brand, model, year, plate, displacement, insurance, color, synced)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ",
            params![
                motorcycle.user_id,
                motorcycle.brand,
                motorcycle.model,
                motorcycle.year,
                motorcycle.plate,
                motorcycle.displacement,
                motorcycle.insurance,
                motorcycle.color,
                motorcycle.synced,
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, user_id = motorcycle.user_id, "Inserted motorcycle");
        Ok(id)
    }

    /// Look up a motorcycle by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn motorcycle_by_id(&self, id: i64) -> Result<Option<Motorcycle>> {
        let motorcycle = self
            .conn()?
            .query_row(
                &format!("SELECT {MOTORCYCLE_COLUMNS} FROM motorcycles WHERE id = ?1"),
                [id],
                row_to_motorcycle,
            )
            .optional()?;
        Ok(motorcycle)
    }

    /// A user's motorcycles, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn motorcycles_by_user(&self, user_id: i64) -> Result<Vec<Motorcycle>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {MOTORCYCLE_COLUMNS} FROM motorcycles WHERE user_id = ?1 ORDER BY id"
        ))?;
        let motorcycles = stmt
            .query_map([user_id], row_to_motorcycle)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(motorcycles)
    }

    /// Update a motorcycle's fields. The synced flag is left alone.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the motorcycle has no id or does not exist.
    pub fn update_motorcycle(&self, motorcycle: &Motorcycle) -> Result<()> {
        let id = motorcycle
            .id
            .ok_or_else(|| Error::not_found("motorcycle", 0))?;
        let affected = self.conn()?.execute(
            r"
            UPDATE motorcycles
            SET brand = ?1, model = ?2, year = ?3, plate = ?4,
                displacement = ?5, insurance = ?6, color = ?7
            WHERE id = ?8
            ",
            params![
                motorcycle.brand,
                motorcycle.model,
                motorcycle.year,
                motorcycle.plate,
                motorcycle.displacement,
                motorcycle.insurance,
                motorcycle.color,
                id,
            ],
        )?;
        if affected == 0 {
            return Err(Error::not_found("motorcycle", id));
        }
        Ok(())
    }

    /// Motorcycles not yet acknowledged by the remote store.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn unsynced_motorcycles(&self) -> Result<Vec<Motorcycle>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {MOTORCYCLE_COLUMNS} FROM motorcycles WHERE synced = 0 ORDER BY id"
        ))?;
        let motorcycles = stmt
            .query_map([], row_to_motorcycle)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(motorcycles)
    }

    /// Flip a motorcycle's synced flag. Returns `false` if no row changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn mark_motorcycle_synced(&self, id: i64) -> Result<bool> {
        let affected = self.conn()?.execute(
            "UPDATE motorcycles SET synced = 1 WHERE id = ?1 AND synced = 0",
            [id],
        )?;
        Ok(affected > 0)
    }

    /// Insert an emergency contact, returning its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn insert_contact(&self, contact: &EmergencyContact) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            r"
            INSERT INTO emergency_contacts
                (user_id, full_name, phone_number, relationship, email, synced)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
            params![
                contact.user_id,
                contact.full_name,
                contact.phone_number,
                contact.relationship,
                contact.email,
                contact.synced,
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, user_id = contact.user_id, "Inserted emergency contact");
        Ok(id)
    }

    /// Look up a contact by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn contact_by_id(&self, id: i64) -> Result<Option<EmergencyContact>> {
        let contact = self
            .conn()?
            .query_row(
                &format!("SELECT {CONTACT_COLUMNS} FROM emergency_contacts WHERE id = ?1"),
                [id],
                row_to_contact,
            )
            .optional()?;
        Ok(contact)
    }

    /// A user's contacts, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn contacts_by_user(&self, user_id: i64) -> Result<Vec<EmergencyContact>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CONTACT_COLUMNS} FROM emergency_contacts WHERE user_id = ?1 ORDER BY id"
        ))?;
        let contacts = stmt
            .query_map([user_id], row_to_contact)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(contacts)
    }

    /// Update a contact's fields. The synced flag is left alone.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the contact has no id or does not exist.
    pub fn update_contact(&self, contact: &EmergencyContact) -> Result<()> {
        let id = contact
            .id
            .ok_or_else(|| Error::not_found("emergency contact", 0))?;
        let affected = self.conn()?.execute(
            r"
            UPDATE emergency_contacts
            SET full_name = ?1, phone_number = ?2, relationship = ?3, email = ?4
            WHERE id = ?5
            ",
            params![
                contact.full_name,
                contact.phone_number,
                contact.relationship,
                contact.email,
                id,
            ],
        )?;
        if affected == 0 {
            return Err(Error::not_found("emergency contact", id));
        }
        Ok(())
    }

    /// Delete a contact. Returns `true` if a row was deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn delete_contact(&self, id: i64) -> Result<bool> {
        let affected = self
            .conn()?
            .execute("DELETE FROM emergency_contacts WHERE id = ?1", [id])?;
        Ok(affected > 0)
    }

    /// Contacts not yet acknowledged by the remote store.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn unsynced_contacts(&self) -> Result<Vec<EmergencyContact>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CONTACT_COLUMNS} FROM emergency_contacts WHERE synced = 0 ORDER BY id"
        ))?;
        let contacts = stmt
            .query_map([], row_to_contact)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(contacts)
    }

    /// Flip a contact's synced flag. Returns `false` if no row changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn mark_contact_synced(&self, id: i64) -> Result<bool> {
        let affected = self.conn()?.execute(
            "UPDATE emergency_contacts SET synced = 1 WHERE id = ?1 AND synced = 0",
            [id],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_motorcycle(row: &rusqlite::Row) -> rusqlite::Result<Motorcycle> {
    Ok(Motorcycle {
        id: Some(row.get(0)?),
        user_id: row.get(1)?,
        brand: row.get(2)?,
        model: row.get(3)?,
        year: row.get(4)?,
        plate: row.get(5)?,
        displacement: row.get(6)?,
        insurance: row.get(7)?,
        color: row.get(8)?,
        synced: flag(row.get(9)?),
    })
}

fn row_to_contact(row: &rusqlite::Row) -> rusqlite::Result<EmergencyContact> {
    Ok(EmergencyContact {
        id: Some(row.get(0)?),
        user_id: row.get(1)?,
        full_name: row.get(2)?,
        phone_number: row.get(3)?,
        relationship: row.get(4)?,
        email: row.get(5)?,
        synced: flag(row.get(6)?),
    })
}
