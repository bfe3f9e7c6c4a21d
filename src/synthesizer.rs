use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::{ChatCompletionRequestMessageArgs, CreateChatCompletionRequestArgs, Role};
use async_openai::Client;
use async_trait::async_trait;

use crate::error::GenerationError;
use crate::model::{ReportBody, ReportSource};

const SYSTEM_PROMPT: &str = "Ты «Мета-Навигатор», проводник, который проводит «Аудит Автопилота». \
Тебе пришлют ответы человека на вопросы о его повседневной жизни. \
Не жалей и не обвиняй: показывай, как человек сам поддерживает свой тупик, и возвращай ему авторство. \
Используй образы «застойной доминанты» и «режима заставки». Никакой эзотерики, говори просто и честно. \
Структура ответа: главный сбой системы; метаформула решения (короткая фраза-код); рекомендация проводника.";

const MIN_SCORE: u8 = 60;
const MAX_SCORE: u8 = 95;
const POINTS_PER_HIT: usize = 5;

const STAGNATION_LEXICON: &[&str] = &[
    "не знаю",
    "устал",
    "опять",
    "снова",
    "круг",
    "петл",
    "тупик",
    "застр",
    "страх",
    "боюсь",
    "привык",
    "должен",
    "надо",
    "никогда",
    "всегда",
    "пассажир",
    "автопилот",
    "тяжело",
    "холод",
    "зажим",
];

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        system_prompt: &str,
        user_payload: &str,
        max_tokens: u16,
        temperature: f32,
    ) -> Result<String, GenerationError>;
}

/// Any OpenAI-compatible chat completion endpoint (Cerebras by default).
pub struct OpenAiGenerator {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiGenerator {
    pub fn new(api_base: &str, api_key: &str, model: impl Into<String>) -> OpenAiGenerator {
        let config = OpenAIConfig::new()
            .with_api_base(api_base)
            .with_api_key(api_key);
        OpenAiGenerator {
            client: Client::with_config(config),
            model: model.into(),
        }
    }
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    async fn generate(
        &self,
        system_prompt: &str,
        user_payload: &str,
        max_tokens: u16,
        temperature: f32,
    ) -> Result<String, GenerationError> {
        let msgs = vec![
            ChatCompletionRequestMessageArgs::default()
                .role(Role::System)
                .content(system_prompt)
                .build()?,
            ChatCompletionRequestMessageArgs::default()
                .role(Role::User)
                .content(user_payload)
                .build()?,
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .max_tokens(max_tokens)
            .temperature(temperature)
            .model(self.model.as_str())
            .messages(msgs)
            .build()?;

        let response = self.client.chat().create(request).await?;

        response
            .choices
            .into_iter()
            .filter_map(|choice| choice.message.content)
            .find(|txt| !txt.trim().is_empty())
            .ok_or(GenerationError::Empty)
    }
}

#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub max_tokens: u16,
    pub temperature: f32,
    pub timeout: Duration,
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        GenerationSettings {
            max_tokens: 2048,
            temperature: 0.4,
            timeout: Duration::from_secs(18),
            attempts: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

pub struct Synthesizer {
    generator: Arc<dyn TextGenerator>,
    settings: GenerationSettings,
}

impl Synthesizer {
    pub fn new(generator: Arc<dyn TextGenerator>, settings: GenerationSettings) -> Synthesizer {
        Synthesizer { generator, settings }
    }

    /// Never fails: exhausting the generation attempts falls back to the local template.
    pub async fn synthesize(&self, answers: &[String]) -> ReportBody {
        let score = stagnation_score(answers);

        match self.generate_with_retries(&user_payload(answers)).await {
            Ok(text) => ReportBody {
                text: format!("Индекс автопилота: {}%\n\n{}", score, text.trim()),
                score,
                source: ReportSource::Generated,
            },
            Err(err) => {
                log::warn!("report generation failed, using template: {}", err);
                ReportBody {
                    text: fallback_report(answers, score),
                    score,
                    source: ReportSource::Fallback { reason: err.to_string() },
                }
            }
        }
    }

    async fn generate_with_retries(&self, payload: &str) -> Result<String, GenerationError> {
        let attempts = self.settings.attempts.max(1);
        let mut last_err = GenerationError::Empty;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.settings.backoff * 2u32.saturating_pow(attempt - 1);
                tokio::time::sleep(delay).await;
            }

            let call = self.generator.generate(
                SYSTEM_PROMPT,
                payload,
                self.settings.max_tokens,
                self.settings.temperature,
            );

            match tokio::time::timeout(self.settings.timeout, call).await {
                Ok(Ok(text)) if !text.trim().is_empty() => return Ok(text),
                Ok(Ok(_)) => last_err = GenerationError::Empty,
                Ok(Err(err)) => last_err = err,
                Err(_) => last_err = GenerationError::Timeout(self.settings.timeout),
            }
            log::info!("generation attempt {}/{} failed: {}", attempt + 1, attempts, last_err);
        }

        Err(last_err)
    }
}

fn user_payload(answers: &[String]) -> String {
    answers
        .iter()
        .enumerate()
        .map(|(i, answer)| format!("Вопрос {}: {}", i + 1, answer))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Keyword density over all answers, mapped linearly onto `[MIN_SCORE, MAX_SCORE]`.
pub fn stagnation_score(answers: &[String]) -> u8 {
    let text = answers.join(" ").to_lowercase();
    let hits: usize = STAGNATION_LEXICON
        .iter()
        .map(|word| text.matches(word).count())
        .sum();

    let score = (MIN_SCORE as usize).saturating_add(hits.saturating_mul(POINTS_PER_HIT));
    score.min(MAX_SCORE as usize) as u8
}

fn quoted(answers: &[String], idx: usize) -> &str {
    answers
        .get(idx)
        .map(|s| s.as_str())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or("—")
}

fn fallback_report(answers: &[String], score: u8) -> String {
    let verdict = if score >= 80 {
        "Автопилот держит руль почти полностью. Застойная доминанта уже стала фоном твоей жизни."
    } else if score >= 70 {
        "Автопилот включается чаще, чем тебе кажется. Режим заставки забирает заметную часть энергии."
    } else {
        "Ты ещё держишь руль, но автопилот уже ищет, где перехватить управление."
    };

    let mut report = format!(
        "Индекс автопилота: {}%\n\n\
        {}\n\n\
        Главный сбой системы.\n\
        Ты сам назвал то, что хочешь изменить: «{}». Но твой «день сурка» звучит так: «{}». \
        Пока эти две картинки живут отдельно, двигатель крутится вхолостую.\n\n\
        Где утекает энергия.\n\
        «{}». Тело отвечает на это так: «{}». Это и есть застойная доминанта.\n\n\
        Скрытый ресурс.\n\
        Раздражение подсказывает, какую свободу ты себе не разрешаешь: «{}».\n\n\
        Метаформула решения.\n\
        «Я замечаю автопилот и выбираю маршрут сам».\n\n\
        Рекомендация проводника.\n\
        Ты отвёл петле срок: «{}». Твой ответ про руль: «{}». \
        Начни с одного осознанного действия в ближайшие сутки.",
        score,
        verdict,
        quoted(answers, 0),
        quoted(answers, 1),
        quoted(answers, 2),
        quoted(answers, 3),
        quoted(answers, 4),
        quoted(answers, 5),
        quoted(answers, 6),
    );

    if answers.len() > 7 {
        report.push_str("\n\nТвои ответы целиком:\n");
        report.push_str(&user_payload(answers));
    }
    report
}
