//! Rider accounts: registration, session, profile, vehicle and contacts.
//!
//! All operations act on the logged-in user recorded in the local store.
//! Form input is validated here; the storage layer stores whatever it is
//! given.

use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::records::{EmergencyContact, Motorcycle, User};
use crate::storage::Storage;

const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";
const PHONE_PATTERN: &str = r"^\d{10}$";
const MAX_CONTACT_NAME: usize = 80;

/// Registration form.
#[derive(Debug, Clone, Default)]
pub struct Registration {
    /// Display name.
    pub name: String,
    /// Login email.
    pub email: String,
    /// Phone number.
    pub phone: String,
    /// Plain password, digested before storage.
    pub password: String,
    /// Company, optional.
    pub company: Option<String>,
}

/// Profile edits. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    /// New display name.
    pub name: Option<String>,
    /// New phone number.
    pub phone: Option<String>,
    /// New company.
    pub company: Option<String>,
    /// New profile picture location.
    pub image_uri: Option<String>,
    /// New password.
    pub password: Option<String>,
}

/// Motorcycle editor form.
#[derive(Debug, Clone, Default)]
pub struct MotorcycleForm {
    /// Brand.
    pub brand: String,
    /// Model.
    pub model: String,
    /// License plate.
    pub plate: String,
    /// Model year.
    pub year: Option<i32>,
    /// Engine displacement in cc.
    pub displacement: Option<i32>,
    /// Insurance policy.
    pub insurance: Option<String>,
    /// Color.
    pub color: Option<String>,
}

/// Emergency contact form.
#[derive(Debug, Clone, Default)]
pub struct ContactForm {
    /// Contact name.
    pub full_name: String,
    /// Ten-digit phone number.
    pub phone_number: String,
    /// Relationship to the rider.
    pub relationship: Option<String>,
    /// Contact email.
    pub email: Option<String>,
}

/// The logged-in user with everything they own.
#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    /// The user.
    pub user: User,
    /// Registered motorcycles.
    pub motorcycles: Vec<Motorcycle>,
    /// Emergency contacts.
    pub contacts: Vec<EmergencyContact>,
}

/// Account operations over the local store.
#[derive(Debug, Clone)]
pub struct Accounts {
    storage: Arc<Storage>,
}

impl Accounts {
    /// Create the account service.
    #[must_use]
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Register a new user.
    ///
    /// The email is trimmed and lowercased. The new user is not logged in.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for blank or malformed fields and
    /// [`Error::EmailTaken`] if the email is already registered.
    pub fn register(&self, form: &Registration) -> Result<User> {
        let name = required("name", &form.name)?;
        let email = normalize_email(&form.email);
        if email.is_empty() {
            return Err(Error::validation("email", "must not be blank"));
        }
        if !email_pattern().is_match(&email) {
            return Err(Error::validation("email", "is not a valid address"));
        }
        let phone = required("phone", &form.phone)?;
        if form.password.trim().is_empty() {
            return Err(Error::validation("password", "must not be blank"));
        }
        let company = form.company.as_deref().map(str::trim).unwrap_or_default();

        let mut user = User::new(name, email, phone, &form.password, company);
        user.id = Some(self.storage.insert_user(&user)?);
        info!(id = ?user.id, email = %user.email, "Registered user");
        Ok(user)
    }

    /// Log in and remember the session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for empty fields and
    /// [`Error::InvalidCredentials`] if the email is unknown or the password
    /// does not match.
    pub fn login(&self, email: &str, password: &str) -> Result<User> {
        let email = normalize_email(email);
        if email.is_empty() {
            return Err(Error::validation("email", "must not be blank"));
        }
        if password.is_empty() {
            return Err(Error::validation("password", "must not be blank"));
        }

        let user = self
            .storage
            .user_by_email(&email)?
            .filter(|user| user.verify_password(password))
            .ok_or_else(|| {
                warn!(%email, "Login failed");
                Error::InvalidCredentials
            })?;

        let id = user
            .id
            .ok_or_else(|| Error::internal("stored user without id"))?;
        self.storage.set_session_user_id(id)?;
        info!(id, "Logged in");
        Ok(user)
    }

    /// Forget the session. Returns whether someone was logged in.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn logout(&self) -> Result<bool> {
        let was_logged_in = self.storage.session_user_id()?.is_some();
        self.storage.clear_session()?;
        Ok(was_logged_in)
    }

    /// The logged-in user.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoActiveSession`] if nobody is logged in or the
    /// session points at a missing user.
    pub fn current_user(&self) -> Result<User> {
        let id = self
            .storage
            .session_user_id()?
            .ok_or(Error::NoActiveSession)?;
        self.storage.user_by_id(id)?.ok_or_else(|| {
            warn!(id, "Session refers to a missing user");
            Error::NoActiveSession
        })
    }

    /// The logged-in user with their motorcycles and contacts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoActiveSession`] if nobody is logged in.
    pub fn profile(&self) -> Result<Profile> {
        let user = self.current_user()?;
        let id = user
            .id
            .ok_or_else(|| Error::internal("stored user without id"))?;
        Ok(Profile {
            motorcycles: self.storage.motorcycles_by_user(id)?,
            contacts: self.storage.contacts_by_user(id)?,
            user,
        })
    }

    /// Edit the logged-in user's profile.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if a provided field is blank.
    pub fn update_profile(&self, update: &ProfileUpdate) -> Result<User> {
        let mut user = self.current_user()?;

        if let Some(name) = &update.name {
            user.name = required("name", name)?.to_string();
        }
        if let Some(phone) = &update.phone {
            user.phone = required("phone", phone)?.to_string();
        }
        if let Some(company) = &update.company {
            user.company = company.trim().to_string();
        }
        if let Some(image_uri) = &update.image_uri {
            let image_uri = image_uri.trim();
            user.image_uri = (!image_uri.is_empty()).then(|| image_uri.to_string());
        }
        if let Some(password) = &update.password {
            if password.trim().is_empty() {
                return Err(Error::validation("password", "must not be blank"));
            }
            user.password_digest = User::digest_password(&user.email, password);
        }

        self.storage.update_user(&user)?;
        debug!(id = ?user.id, "Updated profile");
        Ok(user)
    }

    /// Save the logged-in user's motorcycle.
    ///
    /// Edits the first registered motorcycle in place, or registers one if
    /// there is none.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if brand, model or plate is blank.
    pub fn save_motorcycle(&self, form: &MotorcycleForm) -> Result<Motorcycle> {
        let user_id = self.session_user_id()?;
        let brand = required("brand", &form.brand)?;
        let model = required("model", &form.model)?;
        let plate = required("plate", &form.plate)?;

        let existing = self.storage.motorcycles_by_user(user_id)?.into_iter().next();
        let mut motorcycle = match existing {
            Some(mut motorcycle) => {
                motorcycle.brand = brand.to_string();
                motorcycle.model = model.to_string();
                motorcycle.plate = plate.to_string();
                motorcycle
            }
            None => Motorcycle::new(user_id, brand, model, plate),
        };
        motorcycle.year = form.year;
        motorcycle.displacement = form.displacement;
        motorcycle.insurance = optional(form.insurance.as_deref());
        motorcycle.color = optional(form.color.as_deref());

        if motorcycle.id.is_some() {
            self.storage.update_motorcycle(&motorcycle)?;
            debug!(id = ?motorcycle.id, "Updated motorcycle");
        } else {
            motorcycle.id = Some(self.storage.insert_motorcycle(&motorcycle)?);
            info!(id = ?motorcycle.id, plate = %motorcycle.plate, "Registered motorcycle");
        }
        Ok(motorcycle)
    }

    /// The logged-in user's motorcycles.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoActiveSession`] if nobody is logged in.
    pub fn motorcycles(&self) -> Result<Vec<Motorcycle>> {
        let user_id = self.session_user_id()?;
        self.storage.motorcycles_by_user(user_id)
    }

    /// Add an emergency contact for the logged-in user.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the name or phone is invalid.
    pub fn add_contact(&self, form: &ContactForm) -> Result<EmergencyContact> {
        let user_id = self.session_user_id()?;
        let mut contact = validate_contact(user_id, form)?;
        contact.id = Some(self.storage.insert_contact(&contact)?);
        info!(id = ?contact.id, user_id, "Added emergency contact");
        Ok(contact)
    }

    /// Replace one of the logged-in user's contacts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the contact does not exist or belongs to
    /// someone else, and [`Error::Validation`] for invalid fields.
    pub fn update_contact(&self, id: i64, form: &ContactForm) -> Result<EmergencyContact> {
        let existing = self.owned_contact(id)?;
        let mut contact = validate_contact(existing.user_id, form)?;
        contact.id = existing.id;
        contact.synced = existing.synced;
        self.storage.update_contact(&contact)?;
        debug!(id, "Updated emergency contact");
        Ok(contact)
    }

    /// Delete one of the logged-in user's contacts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the contact does not exist or belongs to
    /// someone else.
    pub fn delete_contact(&self, id: i64) -> Result<()> {
        self.owned_contact(id)?;
        if !self.storage.delete_contact(id)? {
            return Err(Error::not_found("emergency contact", id));
        }
        info!(id, "Deleted emergency contact");
        Ok(())
    }

    /// The logged-in user's contacts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoActiveSession`] if nobody is logged in.
    pub fn contacts(&self) -> Result<Vec<EmergencyContact>> {
        let user_id = self.session_user_id()?;
        self.storage.contacts_by_user(user_id)
    }

    /// Mark the start of a route. A running route keeps its first start.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn start_route(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        if let Some(started) = self.storage.route_started_at()? {
            return Ok(started);
        }
        self.storage.set_route_started_at(now)?;
        info!(started_at = %now.to_rfc3339(), "Route started");
        Ok(now)
    }

    /// Clear the route marker, returning how long the route lasted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stop_route(&self, now: DateTime<Utc>) -> Result<Option<chrono::Duration>> {
        let Some(started) = self.storage.route_started_at()? else {
            return Ok(None);
        };
        self.storage.clear_route()?;
        let elapsed = now - started;
        info!(secs = elapsed.num_seconds(), "Route stopped");
        Ok(Some(elapsed))
    }

    fn session_user_id(&self) -> Result<i64> {
        self.current_user()?
            .id
            .ok_or_else(|| Error::internal("stored user without id"))
    }

    fn owned_contact(&self, id: i64) -> Result<EmergencyContact> {
        let user_id = self.session_user_id()?;
        self.storage
            .contact_by_id(id)?
            .filter(|contact| contact.user_id == user_id)
            .ok_or_else(|| Error::not_found("emergency contact", id))
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn required<'a>(field: &'static str, value: &'a str) -> Result<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::validation(field, "must not be blank"));
    }
    Ok(value)
}

fn optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(EMAIL_PATTERN).expect("valid email pattern"))
}

fn phone_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(PHONE_PATTERN).expect("valid phone pattern"))
}

fn validate_contact(user_id: i64, form: &ContactForm) -> Result<EmergencyContact> {
    let full_name = required("full name", &form.full_name)?;
    if full_name.chars().count() > MAX_CONTACT_NAME {
        return Err(Error::validation(
            "full name",
            format!("must be at most {MAX_CONTACT_NAME} characters"),
        ));
    }

    let phone = form.phone_number.trim();
    if !phone_pattern().is_match(phone) {
        return Err(Error::validation("phone number", "must be exactly 10 digits"));
    }

    let mut contact = EmergencyContact::new(user_id, full_name, phone);
    contact.relationship = optional(form.relationship.as_deref());
    contact.email = optional(form.email.as_deref()).map(|e| normalize_email(&e));
    Ok(contact)
}
