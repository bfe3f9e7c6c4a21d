mod access_gate;
mod bot_flow;
mod error;
mod kinda_db;
mod model;
mod publisher;
mod questionnaire;
mod synthesizer;
mod web;

use std::sync::Arc;
use std::time::Duration;

use config::{Config, Environment};
use dotenv::dotenv;
use serde::Deserialize;
use teloxide::{Bot, dptree};
use teloxide::prelude::Dispatcher;
use teloxide::types::ChatId;

use crate::access_gate::AccessGate;
use crate::error::ConfigError;
use crate::kinda_db::{KindaDb, ReportStore};
use crate::publisher::ReportPublisher;
use crate::synthesizer::{GenerationSettings, OpenAiGenerator, Synthesizer};
use crate::web::{PageLinks, WebState};

#[derive(Deserialize, Clone)]
pub struct LlmConfig {
    api_base: String,
    api_key: String,
    model: String,
    max_tokens: u16,
    temperature: f32,
    timeout_secs: u64,
    attempts: u32,
    backoff_ms: u64,
}

impl LlmConfig {
    fn settings(&self) -> GenerationSettings {
        GenerationSettings {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            timeout: Duration::from_secs(self.timeout_secs),
            attempts: self.attempts,
            backoff: Duration::from_millis(self.backoff_ms),
        }
    }
}

#[derive(Deserialize, Clone)]
pub struct AppConfig {
    admin_id: Option<ChatId>,
    db_path: String,
    channel_id: String,
    channel_url: String,
    guide_url: Option<String>,
    welcome_photo_url: Option<String>,
    public_url: String,
    web_port: u16,
    report_ttl_secs: u64,
    llm: LlmConfig,
}

/// `platform_port` is the hosting platform's `PORT`; `APP__WEB_PORT` still wins over it.
fn load_config(env: Environment, platform_port: Option<String>) -> Result<AppConfig, ConfigError> {
    let default_port = match platform_port {
        Some(raw) => raw.trim().parse::<u16>().map_err(|err| ConfigError::InvalidValue {
            key: "PORT",
            message: format!("{:?}: {}", raw, err),
        })?,
        None => 8080,
    };

    let config: AppConfig = Config::builder()
        .set_default("db_path", "./data")?
        .set_default("channel_id", "@metaformula_life")?
        .set_default("channel_url", "https://t.me/metaformula_life")?
        .set_default("public_url", "http://localhost:8080")?
        .set_default("web_port", i64::from(default_port))?
        .set_default("report_ttl_secs", 7 * 24 * 3600)?
        .set_default("llm.api_base", "https://api.cerebras.ai/v1")?
        .set_default("llm.api_key", "")?
        .set_default("llm.model", "llama-3.3-70b")?
        .set_default("llm.max_tokens", 2048)?
        .set_default("llm.temperature", 0.4)?
        .set_default("llm.timeout_secs", 18)?
        .set_default("llm.attempts", 3)?
        .set_default("llm.backoff_ms", 1000)?
        .add_source(env)
        .build()?
        .try_deserialize()?;

    let channel = &config.channel_id;
    if !channel.starts_with('@') && channel.parse::<i64>().is_err() {
        return Err(ConfigError::InvalidValue {
            key: "channel_id",
            message: format!("{:?} is neither @username nor a numeric id", channel),
        });
    }
    if config.llm.attempts == 0 {
        return Err(ConfigError::InvalidValue {
            key: "llm.attempts",
            message: "at least one attempt is needed".to_string(),
        });
    }

    Ok(config)
}

fn app_env() -> Environment {
    Environment::with_prefix("APP")
        .try_parsing(true)
        .separator("__")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenv().ok();
    pretty_env_logger::init();

    log::info!("reading cfg, loading sessions, wiring the navigator...");

    let config = load_config(app_env(), std::env::var("PORT").ok())?;
    if config.llm.api_key.is_empty() {
        log::warn!("APP__LLM__API_KEY is empty, every report will use the template");
    }

    let db = KindaDb::new(&config.db_path, Duration::from_secs(config.report_ttl_secs)).await?;
    let bot = Bot::from_env();

    let generator = OpenAiGenerator::new(&config.llm.api_base, &config.llm.api_key, config.llm.model.clone());
    let synthesizer = Arc::new(Synthesizer::new(Arc::new(generator), config.llm.settings()));

    let store: Arc<dyn ReportStore> = Arc::new(db.clone());
    let publisher = ReportPublisher::new(store.clone(), &config.public_url);
    let gate = AccessGate::new(Arc::new(bot.clone()), config.channel_id.clone());

    let web_state = WebState {
        store,
        links: PageLinks {
            channel_url: config.channel_url.clone(),
            guide_url: config.guide_url.clone(),
        },
    };
    let web_port = config.web_port;
    tokio::spawn(async move {
        if let Err(err) = web::serve(web_port, web_state).await {
            log::error!("web view stopped: {}", err);
        }
    });

    let sweeper = db.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(3600));
        loop {
            tick.tick().await;
            sweeper.sweep_expired().await;
        }
    });

    log::info!("navigator bot started...");

    Dispatcher::builder(bot, bot_flow::schema())
        .dependencies(dptree::deps![db, synthesizer, publisher, gate, config])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    log::info!("navigator bot stopped...");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_of(vars: &[(&str, &str)]) -> Environment {
        let source: config::Map<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        app_env().source(Some(source))
    }

    #[test]
    fn defaults_fill_everything_but_optionals() {
        let cfg = load_config(env_of(&[]), None).unwrap();
        assert_eq!(cfg.channel_id, "@metaformula_life");
        assert_eq!(cfg.web_port, 8080);
        assert_eq!(cfg.admin_id, None);
        assert_eq!(cfg.guide_url, None);

        let settings = cfg.llm.settings();
        assert_eq!(settings.attempts, 3);
        assert_eq!(settings.timeout, Duration::from_secs(18));
        assert_eq!(settings.max_tokens, 2048);
    }

    #[test]
    fn env_overrides_nested_keys() {
        let cfg = load_config(env_of(&[
            ("APP__ADMIN_ID", "370884641"),
            ("APP__LLM__MODEL", "llama-3.1-8b"),
            ("APP__LLM__ATTEMPTS", "1"),
            ("APP__GUIDE_URL", "https://example.com/guide.pdf"),
        ]), None)
        .unwrap();

        assert_eq!(cfg.admin_id, Some(ChatId(370884641)));
        assert_eq!(cfg.llm.model, "llama-3.1-8b");
        assert_eq!(cfg.llm.attempts, 1);
        assert_eq!(cfg.guide_url.as_deref(), Some("https://example.com/guide.pdf"));
    }

    #[test]
    fn rejects_unusable_channel_and_zero_attempts() {
        assert!(matches!(
            load_config(env_of(&[("APP__CHANNEL_ID", "metaformula")]), None),
            Err(ConfigError::InvalidValue { key: "channel_id", .. })
        ));
        assert!(matches!(
            load_config(env_of(&[("APP__LLM__ATTEMPTS", "0")]), None),
            Err(ConfigError::InvalidValue { key: "llm.attempts", .. })
        ));
    }

    #[test]
    fn platform_port_is_used_when_web_port_unset() {
        let cfg = load_config(env_of(&[]), Some("10000".to_string())).unwrap();
        assert_eq!(cfg.web_port, 10000);
    }

    #[test]
    fn explicit_web_port_beats_platform_port() {
        let cfg = load_config(env_of(&[("APP__WEB_PORT", "9090")]), Some("10000".to_string())).unwrap();
        assert_eq!(cfg.web_port, 9090);
    }

    #[test]
    fn garbage_platform_port_is_rejected() {
        assert!(matches!(
            load_config(env_of(&[]), Some("http".to_string())),
            Err(ConfigError::InvalidValue { key: "PORT", .. })
        ));
    }
}
