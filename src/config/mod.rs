use serde::Deserialize;
use std::env;

// Top-level configuration container, one section per concern
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub salon: SalonConfig,
    pub loyalty: LoyaltyConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub expires_in_hours: i64,
}

// Salon identity, printed on receipts
#[derive(Debug, Clone, Deserialize)]
pub struct SalonConfig {
    pub nom: String,
    pub adresse: String,
    pub telephone: String,
    pub email: String,
}

// Loyalty rule: every Nth visit is free
#[derive(Debug, Clone, Deserialize)]
pub struct LoyaltyConfig {
    pub free_interval: u32,
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    pub max_batch_size: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            app: AppConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8000".to_string())
                    .parse()
                    .expect("PORT must be a valid number"),
                environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
                rust_log: env::var("RUST_LOG")
                    .unwrap_or_else(|_| "salon_system=debug,tower_http=debug".to_string()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
                pool_size: env::var("DB_POOL_SIZE")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()
                    .expect("DB_POOL_SIZE must be a valid number"),
            },
            jwt: JwtConfig {
                secret: env::var("JWT_SECRET").expect("JWT_SECRET must be set"),
                expires_in_hours: env::var("JWT_EXPIRES_IN_HOURS")
                    .unwrap_or_else(|_| "24".to_string())
                    .parse()
                    .expect("JWT_EXPIRES_IN_HOURS must be a valid number"),
            },
            salon: SalonConfig {
                nom: env::var("SALON_NAME").unwrap_or_else(|_| "Salon de Coiffure".to_string()),
                adresse: env::var("SALON_ADDRESS")
                    .unwrap_or_else(|_| "Abidjan, Côte d'Ivoire".to_string()),
                telephone: env::var("SALON_PHONE")
                    .unwrap_or_else(|_| "+225 00 00 00 00".to_string()),
                email: env::var("SALON_EMAIL").unwrap_or_else(|_| "contact@salon.ci".to_string()),
            },
            loyalty: LoyaltyConfig {
                free_interval: env::var("LOYALTY_FREE_INTERVAL")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .expect("LOYALTY_FREE_INTERVAL must be a valid number"),
                enabled: env::var("LOYALTY_ENABLED")
                    .unwrap_or_else(|_| "true".to_string())
                    .parse()
                    .expect("LOYALTY_ENABLED must be true or false"),
            },
            sync: SyncConfig {
                max_batch_size: env::var("SYNC_MAX_BATCH_SIZE")
                    .unwrap_or_else(|_| "100".to_string())
                    .parse()
                    .expect("SYNC_MAX_BATCH_SIZE must be a valid number"),
            },
        }
    }
}
