use super::parsing::{
    env_optional, env_or_default, parse_bool, parse_cors_origins, parse_environment, parse_f64,
    parse_u32, parse_u64,
};
use super::types::{
    AiSettings, ConfigError, CorsSettings, DatabaseSettings, RuntimeSettings, ServerHost,
    ServerPort, ServerSettings, Settings, TelemetrySettings, UploadSettings,
};

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("PAPER_HOST", "0.0.0.0");
        let port = env_or_default("PAPER_PORT", "5000");

        let environment =
            parse_environment(env_optional("PAPER_ENV").or_else(|| env_optional("ENVIRONMENT")));
        let strict_config =
            env_optional("PAPER_STRICT_CONFIG").map(|value| parse_bool(&value)).unwrap_or(false)
                || environment.is_production();

        let cors_origins = parse_cors_origins(env_optional("BACKEND_CORS_ORIGINS"))?;

        let database_url = env_or_default("DATABASE_URL", "sqlite://questions.db");
        let max_connections = parse_u32(
            "DATABASE_MAX_CONNECTIONS",
            env_or_default("DATABASE_MAX_CONNECTIONS", "5"),
        )?;

        let api_key = env_or_default("XAI_API_KEY", "");
        let base_url = env_or_default("AI_BASE_URL", "https://api.x.ai/v1");
        let model = env_or_default("AI_MODEL", "grok-3");
        let max_tokens = parse_u32("AI_MAX_TOKENS", env_or_default("AI_MAX_TOKENS", "3000"))?;
        let temperature = parse_f64("AI_TEMPERATURE", env_or_default("AI_TEMPERATURE", "0.7"))?;
        let request_timeout =
            parse_u64("AI_REQUEST_TIMEOUT", env_or_default("AI_REQUEST_TIMEOUT", "15"))?;
        let max_attempts = parse_u32("AI_MAX_ATTEMPTS", env_or_default("AI_MAX_ATTEMPTS", "3"))?;
        let retry_base_ms =
            parse_u64("AI_RETRY_BASE_MS", env_or_default("AI_RETRY_BASE_MS", "1000"))?;

        let max_upload_size_mb =
            parse_u64("MAX_UPLOAD_SIZE_MB", env_or_default("MAX_UPLOAD_SIZE_MB", "10"))?;

        let log_level = env_or_default("PAPER_LOG_LEVEL", "info");
        let json = env_optional("PAPER_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            server: ServerSettings {
                host: ServerHost::parse(host)?,
                port: ServerPort::parse(port)?,
            },
            runtime: RuntimeSettings { environment, strict_config },
            cors: CorsSettings { origins: cors_origins },
            database: DatabaseSettings { database_url, max_connections },
            ai: AiSettings {
                api_key,
                base_url: base_url.trim_end_matches('/').to_string(),
                model,
                max_tokens,
                temperature,
                request_timeout,
                max_attempts,
                retry_base_ms,
            },
            upload: UploadSettings { max_upload_size_mb },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn server_host(&self) -> &str {
        &self.server.host.0
    }

    pub(crate) fn server_port(&self) -> u16 {
        self.server.port.0
    }

    pub(crate) fn cors(&self) -> &CorsSettings {
        &self.cors
    }

    pub(crate) fn database(&self) -> &DatabaseSettings {
        &self.database
    }

    pub(crate) fn ai(&self) -> &AiSettings {
        &self.ai
    }

    pub(crate) fn upload(&self) -> &UploadSettings {
        &self.upload
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                field: "DATABASE_MAX_CONNECTIONS",
                value: "0".to_string(),
            });
        }

        if self.ai.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "AI_MAX_ATTEMPTS",
                value: "0".to_string(),
            });
        }

        if self.ai.request_timeout == 0 {
            return Err(ConfigError::InvalidValue {
                field: "AI_REQUEST_TIMEOUT",
                value: "0".to_string(),
            });
        }

        if !(0.0..=2.0).contains(&self.ai.temperature) {
            return Err(ConfigError::InvalidValue {
                field: "AI_TEMPERATURE",
                value: self.ai.temperature.to_string(),
            });
        }

        if self.upload.max_upload_size_mb == 0 {
            return Err(ConfigError::InvalidValue {
                field: "MAX_UPLOAD_SIZE_MB",
                value: "0".to_string(),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if self.ai.api_key.is_empty() {
            return Err(ConfigError::MissingSecret("XAI_API_KEY"));
        }

        Ok(())
    }
}
