use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CookieConfig {
    pub max_age_days: i64,
    pub secure: bool,
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct HashConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    pub public_url: String,
    pub folder: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResetConfig {
    pub frontend_url: String,
    pub ttl_minutes: i64,
    pub notify_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

/// How notifications leave the process.
#[derive(Debug, Clone, Deserialize)]
pub enum NotifierKind {
    /// Log recipient and subject only; nothing is delivered.
    Log,
    Smtp(SmtpConfig),
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// `None` runs the service against the in-memory account store.
    pub database_url: Option<String>,
    pub jwt: JwtConfig,
    pub cookie: CookieConfig,
    pub hash: HashConfig,
    pub media: MediaConfig,
    pub reset: ResetConfig,
    pub notify: NotifierKind,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").ok();
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            issuer: env_or("JWT_ISSUER", "telefaces"),
            audience: env_or("JWT_AUDIENCE", "telefaces-users"),
            ttl_days: env_parse("SESSION_TTL_DAYS", 10),
        };
        let cookie = CookieConfig {
            max_age_days: env_parse("COOKIE_MAX_AGE_DAYS", 7),
            secure: env_parse("COOKIE_SECURE", true),
        };
        let hash = HashConfig {
            memory_kib: env_parse("HASH_MEMORY_KIB", 19 * 1024),
            iterations: env_parse("HASH_ITERATIONS", 2),
            parallelism: env_parse("HASH_PARALLELISM", 1),
        };

        let endpoint = std::env::var("MEDIA_ENDPOINT").context("MEDIA_ENDPOINT must be set")?;
        let bucket = std::env::var("MEDIA_BUCKET").context("MEDIA_BUCKET must be set")?;
        let public_url = std::env::var("MEDIA_PUBLIC_URL").unwrap_or_else(|_| {
            format!("{}/{}", endpoint.trim_end_matches('/'), bucket)
        });
        let media = MediaConfig {
            access_key: std::env::var("MEDIA_ACCESS_KEY").context("MEDIA_ACCESS_KEY must be set")?,
            secret_key: std::env::var("MEDIA_SECRET_KEY").context("MEDIA_SECRET_KEY must be set")?,
            region: env_or("MEDIA_REGION", "us-east-1"),
            folder: env_or("MEDIA_FOLDER", "telefaces"),
            timeout_secs: env_parse("MEDIA_TIMEOUT_SECS", 15),
            endpoint,
            bucket,
            public_url,
        };
        let reset = ResetConfig {
            frontend_url: env_or("FRONTEND_URL", "http://localhost:3000"),
            ttl_minutes: env_parse("RESET_TOKEN_TTL_MINUTES", 15),
            notify_timeout_secs: env_parse("NOTIFY_TIMEOUT_SECS", 10),
        };

        let notify = match env_or("NOTIFIER", "log").as_str() {
            "log" => NotifierKind::Log,
            "smtp" => NotifierKind::Smtp(SmtpConfig {
                host: std::env::var("SMTP_HOST").context("SMTP_HOST must be set")?,
                port: env_parse("SMTP_PORT", 587),
                username: std::env::var("SMTP_USERNAME").context("SMTP_USERNAME must be set")?,
                password: std::env::var("SMTP_PASSWORD").context("SMTP_PASSWORD must be set")?,
                from: std::env::var("SMTP_FROM").context("SMTP_FROM must be set")?,
            }),
            other => anyhow::bail!("NOTIFIER must be `log` or `smtp`, got `{other}`"),
        };

        Ok(Self {
            database_url,
            jwt,
            cookie,
            hash,
            media,
            reset,
            notify,
        })
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    AppConfig {
        database_url: None,
        jwt: JwtConfig {
            secret: "test-secret".into(),
            issuer: "test-issuer".into(),
            audience: "test-aud".into(),
            ttl_days: 10,
        },
        cookie: CookieConfig {
            max_age_days: 7,
            secure: true,
        },
        // Minimum Argon2 cost keeps the test suite fast.
        hash: HashConfig {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        },
        media: MediaConfig {
            endpoint: "fake".into(),
            bucket: "fake".into(),
            access_key: "fake".into(),
            secret_key: "fake".into(),
            region: "us-east-1".into(),
            public_url: "https://media.fake.local".into(),
            folder: "telefaces".into(),
            timeout_secs: 2,
        },
        reset: ResetConfig {
            frontend_url: "https://app.fake.local".into(),
            ttl_minutes: 15,
            notify_timeout_secs: 2,
        },
        notify: NotifierKind::Log,
    }
}
