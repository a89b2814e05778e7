use std::env;
use std::fmt::Display;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub jwt_secret: String,
    pub bind_address: String,
    pub reschedule_notice_hours: i64,
    pub staff_bound_by_notice: bool,
    pub strict_slot_check: bool,
    pub max_daily_bookings_per_patient: usize,
    pub default_utc_offset_minutes: i32,
    pub queue_broadcast_capacity: usize,
    pub minutes_per_patient: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            bind_address: "0.0.0.0:3000".to_string(),
            reschedule_notice_hours: 24,
            staff_bound_by_notice: false,
            strict_slot_check: true,
            max_daily_bookings_per_patient: 3,
            default_utc_offset_minutes: 0,
            queue_broadcast_capacity: 64,
            minutes_per_patient: 5,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            jwt_secret: env::var("JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("JWT_SECRET not set, using empty value");
                    String::new()
                }),
            bind_address: env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| {
                    warn!("BIND_ADDRESS not set, using default");
                    defaults.bind_address.clone()
                }),
            reschedule_notice_hours: parse_var("RESCHEDULE_NOTICE_HOURS", defaults.reschedule_notice_hours),
            staff_bound_by_notice: parse_var("STAFF_BOUND_BY_NOTICE", defaults.staff_bound_by_notice),
            strict_slot_check: parse_var("STRICT_SLOT_CHECK", defaults.strict_slot_check),
            max_daily_bookings_per_patient: parse_var(
                "MAX_DAILY_BOOKINGS_PER_PATIENT",
                defaults.max_daily_bookings_per_patient,
            ),
            default_utc_offset_minutes: parse_var("DEFAULT_UTC_OFFSET_MINUTES", defaults.default_utc_offset_minutes),
            queue_broadcast_capacity: parse_var("QUEUE_BROADCAST_CAPACITY", defaults.queue_broadcast_capacity),
            minutes_per_patient: parse_var("MINUTES_PER_PATIENT", defaults.minutes_per_patient),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - JWT_SECRET missing, every request will be rejected");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.jwt_secret.is_empty()
    }
}

fn parse_var<T>(key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|e| {
            warn!("{} has invalid value '{}' ({}), using default {}", key, raw, e, default);
            default
        }),
        Err(_) => default,
    }
}
