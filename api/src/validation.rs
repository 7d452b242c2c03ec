use xerror::api::{ApiError, FieldError};

pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_PASSWORD_LEN: usize = 128;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_NAME_LEN: usize = 64;
/// Longest description a BOLT11 invoice carries inline.
pub const MAX_MEMO_LEN: usize = 639;

/// Collects every rejected field of a request before failing it as a whole.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    pub fn check(&mut self, valid: bool, field: &str, code: &str, message: &str) -> &mut Self {
        if !valid {
            self.errors.push(FieldError::new(field, code, message));
        }
        self
    }

    pub fn email(&mut self, field: &str, email: &str) -> &mut Self {
        if email.is_empty() {
            return self.check(false, field, "required", "Email is required.");
        }
        self.check(email.len() <= MAX_EMAIL_LEN, field, "too_long", "Email is too long.")
            .check(is_email(email), field, "invalid", "Email is not valid.")
    }

    /// Checks length bounds and the estimated strength of `password`. `user_inputs` are words
    /// the password should not be built from, such as the user's email.
    pub fn password(&mut self, field: &str, password: &str, user_inputs: &[&str], min_score: u8) -> &mut Self {
        let length = password.chars().count();
        if length < MIN_PASSWORD_LEN {
            return self.check(false, field, "too_short", "Password must have at least 8 characters.");
        }
        if length > MAX_PASSWORD_LEN {
            return self.check(false, field, "too_long", "Password must have at most 128 characters.");
        }

        let strong = zxcvbn::zxcvbn(password, user_inputs)
            .map(|entropy| entropy.score() >= min_score)
            .unwrap_or(false);
        self.check(strong, field, "weak", "Password is too weak.")
    }

    pub fn name(&mut self, field: &str, name: Option<&str>) -> &mut Self {
        match name {
            Some(name) => self
                .check(!name.trim().is_empty(), field, "required", "Name must not be blank.")
                .check(name.chars().count() <= MAX_NAME_LEN, field, "too_long", "Name is too long."),
            None => self,
        }
    }

    pub fn finish(&mut self) -> Result<(), ApiError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ApiError::Validation(std::mem::take(&mut self.errors)))
        }
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn is_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !domain.contains("..")
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(result: Result<(), ApiError>) -> Vec<(String, String)> {
        match result {
            Err(ApiError::Validation(fields)) => fields.into_iter().map(|f| (f.field, f.code)).collect(),
            Err(other) => panic!("unexpected error {:?}", other),
            Ok(()) => vec![],
        }
    }

    #[test]
    fn emails() {
        for valid in ["satoshi@example.com", "a.b+c@mail.example.org"] {
            assert!(is_email(valid), "{}", valid);
        }
        for invalid in ["", "example.com", "a@b", "a@@b.com", "a b@c.com", "@example.com", "a@.com", "a@b..com"] {
            assert!(!is_email(invalid), "{}", invalid);
        }
        assert_eq!(normalize_email("  Satoshi@Example.COM "), "satoshi@example.com");
    }

    #[test]
    fn weak_passwords_are_rejected() {
        let result = Validator::default().password("password", "password1", &[], 3).finish();
        assert_eq!(fields(result), vec![("password".to_string(), "weak".to_string())]);
    }

    #[test]
    fn strong_passwords_are_accepted() {
        let result = Validator::default()
            .password("password", "correct-Horse-battery-staple-91", &[], 3)
            .finish();
        assert!(result.is_ok());
    }

    #[test]
    fn password_built_from_the_email_is_weak() {
        let email = "moonshot.lambo@example.com";
        let result = Validator::default().password("password", "moonshot.lambo", &[email, "moonshot", "lambo"], 3).finish();
        assert_eq!(fields(result).len(), 1);
    }

    #[test]
    fn short_passwords_report_length_only() {
        let result = Validator::default().password("password", "abc", &[], 0).finish();
        assert_eq!(fields(result), vec![("password".to_string(), "too_short".to_string())]);
    }

    #[test]
    fn every_failing_field_is_reported() {
        let result = Validator::default()
            .email("email", "not-an-email")
            .password("password", "12345678", &[], 3)
            .name("first_name", Some("  "))
            .name("last_name", None)
            .finish();
        let fields = fields(result);
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[0], ("email".to_string(), "invalid".to_string()));
        assert_eq!(fields[2], ("first_name".to_string(), "required".to_string()));
    }
}
