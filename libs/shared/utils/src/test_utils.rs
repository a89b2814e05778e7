use std::sync::Arc;
use chrono::{Duration, Utc};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::{Actor, JwtClaims, Role, User};

use crate::jwt::sign_token;

pub struct TestConfig {
    pub jwt_secret: String,
    pub reschedule_notice_hours: i64,
    pub staff_bound_by_notice: bool,
    pub max_daily_bookings_per_patient: usize,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            reschedule_notice_hours: 24,
            staff_bound_by_notice: false,
            max_daily_bookings_per_patient: 3,
        }
    }
}

impl TestConfig {
    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            jwt_secret: self.jwt_secret.clone(),
            reschedule_notice_hours: self.reschedule_notice_hours,
            staff_bound_by_notice: self.staff_bound_by_notice,
            max_daily_bookings_per_patient: self.max_daily_bookings_per_patient,
            ..AppConfig::default()
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: Uuid,
    pub email: String,
    pub role: String,
}

impl Default for TestUser {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            email: "test@example.com".to_string(),
            role: "patient".to_string(),
        }
    }
}

impl TestUser {
    pub fn new(email: &str, role: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.to_string(),
            role: role.to_string(),
        }
    }

    pub fn doctor(email: &str) -> Self {
        Self::new(email, "doctor")
    }

    pub fn patient(email: &str) -> Self {
        Self::new(email, "patient")
    }

    pub fn staff(email: &str) -> Self {
        Self::new(email, "staff")
    }

    pub fn admin(email: &str) -> Self {
        Self::new(email, "admin")
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.to_string(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            metadata: None,
            created_at: Some(Utc::now()),
        }
    }

    pub fn actor(&self) -> Actor {
        let role = self.role.parse::<Role>().unwrap_or(Role::Patient);
        Actor::new(self.id, role)
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        let claims = JwtClaims {
            sub: user.id.to_string(),
            exp: Some(exp.timestamp().max(0) as u64),
            email: Some(user.email.clone()),
            role: Some(user.role.clone()),
            user_metadata: None,
            iat: Some(now.timestamp() as u64),
        };

        sign_token(&claims, secret).expect("test secret must not be empty")
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }

    pub fn create_malformed_token() -> String {
        "invalid.token.format".to_string()
    }
}
