//! Input validation rule set.
//!
//! Rules are an explicit, immutable value built once at startup and handed to
//! the services that need them. There is no process-wide validator registry.

use crate::error::{DomainError, DomainResult};

/// Immutable validation rules shared by the application services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationRules {
    pub villa_name_min_len: usize,
    pub villa_description_min_len: usize,
    pub username_min_len: usize,
    pub username_max_len: usize,
    pub email_min_len: usize,
    pub password_min_len: usize,
    pub guest_name_min_len: usize,
    pub catalog_name_max_len: usize,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            villa_name_min_len: 4,
            villa_description_min_len: 8,
            username_min_len: 1,
            username_max_len: 64,
            email_min_len: 5,
            password_min_len: 5,
            guest_name_min_len: 1,
            catalog_name_max_len: 100,
        }
    }
}

impl ValidationRules {
    pub fn villa_name(&self, name: &str) -> DomainResult<()> {
        min_len("name", name, self.villa_name_min_len)
    }

    pub fn villa_description(&self, description: &str) -> DomainResult<()> {
        min_len("description", description, self.villa_description_min_len)
    }

    /// Strictly positive numeric attribute (bedrooms, baths, guests, price).
    pub fn positive<N>(&self, field: &str, value: N) -> DomainResult<()>
    where
        N: PartialOrd + Default,
    {
        if value > N::default() {
            Ok(())
        } else {
            Err(DomainError::validation(format!("{field} must be positive")))
        }
    }

    /// Usernames are non-empty, bounded and contain no whitespace.
    pub fn username(&self, username: &str) -> DomainResult<()> {
        min_len("username", username, self.username_min_len)?;
        if username.chars().count() > self.username_max_len {
            return Err(DomainError::validation(format!(
                "username must be at most {} characters",
                self.username_max_len
            )));
        }
        if username.chars().any(char::is_whitespace) {
            return Err(DomainError::validation("username must not contain whitespace"));
        }
        Ok(())
    }

    pub fn email(&self, email: &str) -> DomainResult<()> {
        min_len("email", email, self.email_min_len)?;
        let Some((local, domain)) = email.split_once('@') else {
            return Err(DomainError::validation("email must contain '@'"));
        };
        let domain_ok = domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty());
        if local.is_empty() || !domain_ok || domain.contains('@') || email.contains(' ') {
            return Err(DomainError::validation("email is malformed"));
        }
        Ok(())
    }

    /// No whitespace; at least one upper-case letter, one digit and one symbol.
    pub fn password(&self, password: &str) -> DomainResult<()> {
        min_len("password", password, self.password_min_len)?;
        if password.chars().any(char::is_whitespace) {
            return Err(DomainError::validation("password must not contain whitespace"));
        }
        let upper = password.chars().any(char::is_uppercase);
        let digit = password.chars().any(|c| c.is_ascii_digit());
        let symbol = password.chars().any(|c| !c.is_alphanumeric());
        if !(upper && digit && symbol) {
            return Err(DomainError::validation(
                "password needs an upper-case letter, a digit and a symbol",
            ));
        }
        Ok(())
    }

    pub fn guest_name(&self, field: &str, name: &str) -> DomainResult<()> {
        min_len(field, name.trim(), self.guest_name_min_len)
    }

    /// Catalog labels (category, location area, amenity, amenity type).
    pub fn catalog_name(&self, field: &str, name: &str) -> DomainResult<()> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation(format!("{field} is required")));
        }
        if trimmed.chars().count() > self.catalog_name_max_len {
            return Err(DomainError::validation(format!(
                "{field} must be at most {} characters",
                self.catalog_name_max_len
            )));
        }
        Ok(())
    }
}

fn min_len(field: &str, value: &str, min: usize) -> DomainResult<()> {
    if value.chars().count() < min {
        Err(DomainError::validation(format!(
            "{field} must be at least {min} characters"
        )))
    } else {
        Ok(())
    }
}
