use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub session_ttl_hours: i64,
    pub smtp: Option<SmtpConfig>,
    pub whatsapp: Option<WhatsAppConfig>,
}

/// SMTP settings for the email channel. Absent when SMTP_HOST is not set,
/// in which case email sends fail with a configuration error.
#[derive(Clone, Debug)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub from_address: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Vendor API settings for the WhatsApp channel. The OAuth provisioning flow
/// lives outside this server; we only carry the resulting endpoint + token.
#[derive(Clone, Debug)]
pub struct WhatsAppConfig {
    pub api_url: String,
    pub api_token: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let session_ttl_hours = env::var("SESSION_TTL_HOURS")
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(24);

        let smtp = env::var("SMTP_HOST").ok().map(|host| SmtpConfig {
            host,
            port: env::var("SMTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(587),
            from_address: env::var("SMTP_FROM")
                .unwrap_or_else(|_| "noreply@clinic.local".to_string()),
            username: env::var("SMTP_USER").ok(),
            password: env::var("SMTP_PASSWORD").ok(),
        });

        let whatsapp = match (env::var("WHATSAPP_API_URL"), env::var("WHATSAPP_API_TOKEN")) {
            (Ok(api_url), Ok(api_token)) => Some(WhatsAppConfig { api_url, api_token }),
            _ => None,
        };

        Ok(Self {
            database_url,
            bind_addr,
            session_ttl_hours,
            smtp,
            whatsapp,
        })
    }
}
