use std::sync::Arc;

use teloxide::Bot;
use teloxide::dispatching::UpdateHandler;
use teloxide::macros::BotCommands;
use teloxide::prelude::*;
use teloxide::types::{ChatMemberKind, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, User};
use url::Url;

use crate::AppConfig;
use crate::access_gate::AccessGate;
use crate::kinda_db::{KindaDb, ReportStore};
use crate::model::{Report, ReportSource, SubjectId};
use crate::publisher::{ChatSink, PublishOutcome, ReportPublisher};
use crate::questionnaire::{SequencerOutcome, QUESTIONS};
use crate::synthesizer::Synthesizer;

const CHECK: &str = "check";
const RUN: &str = "run";
const MENU: &str = "menu";
const GET_GUIDE: &str = "get_guide";

const WELCOME_TEXT: &str = "Привет! Я Мета-Навигатор. Помогу увидеть, где в твоей жизни рулит автопилот.";
const SUBSCRIBE_TEXT: &str = "Прежде чем мы начнём искать сбои автопилота, присоединись к каналу Проводников:";
const INTRO_TEXT: &str = "Я задам 8 вопросов, чтобы увидеть твой автопилот. Отвечай честно, из глубины.";

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
pub enum Command {
    Start,
    Menu,
}

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

pub fn schema() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync + 'static>> {
    use dptree::case;

    dptree::entry()
        .branch(Update::filter_my_chat_member().endpoint(chat_member))
        .branch(
            Update::filter_message()
                .filter_command::<Command>()
                .branch(case![Command::Start].endpoint(start))
                .branch(case![Command::Menu].endpoint(menu_cmd)),
        )
        .branch(Update::filter_message().endpoint(answer_msg))
        .branch(Update::filter_callback_query().endpoint(callback))
}

fn subject_of(user: &User) -> SubjectId {
    SubjectId(user.id.0)
}

fn channel_button(cfg: &AppConfig, text: &str) -> Option<InlineKeyboardButton> {
    match Url::parse(&cfg.channel_url) {
        Ok(url) => Some(InlineKeyboardButton::url(text, url)),
        Err(err) => {
            log::warn!("channel url {:?} is not usable: {}", cfg.channel_url, err);
            None
        }
    }
}

fn subscribe_keyboard(cfg: &AppConfig) -> InlineKeyboardMarkup {
    let mut rows = vec![];
    if let Some(btn) = channel_button(cfg, "Подписаться на Метаформулу") {
        rows.push(vec![btn]);
    }
    rows.push(vec![InlineKeyboardButton::callback("Я подписался (проверить)", CHECK)]);
    InlineKeyboardMarkup::new(rows)
}

fn menu_keyboard(cfg: &AppConfig) -> InlineKeyboardMarkup {
    let mut rows = vec![
        vec![InlineKeyboardButton::callback("Пройти аудит", RUN)],
        vec![InlineKeyboardButton::callback("Получить гайд", GET_GUIDE)],
    ];
    if let Some(btn) = channel_button(cfg, "Канал Метаформулы") {
        rows.push(vec![btn]);
    }
    InlineKeyboardMarkup::new(rows)
}

pub async fn start(bot: Bot, msg: Message, db: KindaDb, gate: AccessGate, cfg: AppConfig) -> HandlerResult {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let subject = subject_of(user);
    log::info!("{} {} started", user.full_name(), subject);

    db.discard_session(subject).await;

    if gate.is_authorized(subject).await {
        send_welcome(&bot, msg.chat.id, &cfg).await;
        start_audit(&bot, msg.chat.id, subject, &db).await?;
    } else {
        bot.send_message(msg.chat.id, SUBSCRIBE_TEXT)
            .reply_markup(subscribe_keyboard(&cfg))
            .await?;
    }

    Ok(())
}

pub async fn menu_cmd(bot: Bot, msg: Message, cfg: AppConfig) -> HandlerResult {
    send_menu(&bot, msg.chat.id, &cfg).await?;
    Ok(())
}

async fn send_menu(bot: &Bot, chat_id: ChatId, cfg: &AppConfig) -> Result<(), teloxide::RequestError> {
    bot.send_message(chat_id, "Что дальше?")
        .reply_markup(menu_keyboard(cfg))
        .await?;
    Ok(())
}

async fn send_welcome(bot: &Bot, chat_id: ChatId, cfg: &AppConfig) {
    if let Some(photo) = cfg.welcome_photo_url.as_deref().and_then(|u| Url::parse(u).ok()) {
        match bot.send_photo(chat_id, InputFile::url(photo)).caption(WELCOME_TEXT).await {
            Ok(_) => return,
            Err(err) => log::warn!("welcome photo for {} failed, sending text: {}", chat_id, err),
        }
    }

    if let Err(err) = bot.send_message(chat_id, WELCOME_TEXT).await {
        log::warn!("welcome for {} failed: {}", chat_id, err);
    }
}

async fn start_audit(bot: &Bot, chat_id: ChatId, subject: SubjectId, db: &KindaDb) -> HandlerResult {
    let session = db.start_session(subject).await;
    log::info!("audit started for {}", subject);

    bot.send_message(chat_id, INTRO_TEXT).await?;
    if let Some(prompt) = session.current_prompt(QUESTIONS) {
        bot.send_message(chat_id, prompt).await?;
    }
    Ok(())
}

async fn send_guide(bot: &Bot, chat_id: ChatId, cfg: &AppConfig) -> HandlerResult {
    let Some(guide) = cfg.guide_url.as_deref() else {
        bot.send_message(chat_id, "Гайд скоро появится в канале.").await?;
        return Ok(());
    };

    let sent = match Url::parse(guide) {
        Ok(url) => bot
            .send_document(chat_id, InputFile::url(url))
            .caption("Твой гайд Метаформулы")
            .await
            .map_err(|err| err.to_string()),
        Err(err) => Err(err.to_string()),
    };

    if let Err(err) = sent {
        log::warn!("guide document for {} failed, sending link: {}", chat_id, err);
        bot.send_message(chat_id, format!("Твой гайд Метаформулы: {}", guide)).await?;
    }
    Ok(())
}

pub async fn answer_msg(
    bot: Bot,
    msg: Message,
    db: KindaDb,
    synthesizer: Arc<Synthesizer>,
    publisher: ReportPublisher,
    cfg: AppConfig,
) -> HandlerResult {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let subject = subject_of(user);
    let msg_txt = msg.text().unwrap_or("");
    log::info!("msg from {}: {}", subject, msg_txt);

    match db.advance(subject, msg_txt).await {
        None => {
            bot.send_message(msg.chat.id, "Чтобы пройти аудит, нажми /start").await?;
        }
        Some(SequencerOutcome::Rejected(reason)) => {
            bot.send_message(msg.chat.id, reason.hint()).await?;
            if let Some(session) = db.session(subject).await {
                log::info!("answer {} of {} rejected: {:?}", session.current_index() + 1, subject, reason);
                if let Some(prompt) = session.current_prompt(QUESTIONS) {
                    bot.send_message(msg.chat.id, prompt).await?;
                }
            }
        }
        Some(SequencerOutcome::NextQuestion(prompt)) => {
            bot.send_message(msg.chat.id, prompt).await?;
        }
        Some(SequencerOutcome::Completed(answers)) => {
            let user_name = user.full_name();
            complete_audit(&bot, subject, &user_name, &answers, &synthesizer, &publisher, cfg.admin_id).await;
            if let Err(err) = send_menu(&bot, msg.chat.id, &cfg).await {
                log::warn!("menu for {} failed: {}", subject, err);
            }
        }
    }

    Ok(())
}

/// Turns finished answers into a stored report. Every chat send here is
/// best effort: the session is already gone, so nothing may stop the report
/// from being built and registered.
async fn complete_audit(
    sink: &dyn ChatSink,
    subject: SubjectId,
    user_name: &str,
    answers: &[String],
    synthesizer: &Synthesizer,
    publisher: &ReportPublisher,
    admin_id: Option<ChatId>,
) -> PublishOutcome {
    if let Err(err) = sink
        .send_text(subject, "Данные получены. Навигатор вычисляет твою Метаформулу... 🌀")
        .await
    {
        log::warn!("progress notice for {} failed: {}", subject, err);
    }

    let body = synthesizer.synthesize(answers).await;
    if let (ReportSource::Fallback { reason }, Some(admin_id)) = (&body.source, admin_id) {
        let alert = format!("Отчёт для {} собран по шаблону: {}", subject, reason);
        if let Err(err) = sink.send_to(admin_id, &alert).await {
            log::warn!("admin alert failed: {}", err);
        }
    }

    let report = Report::new(subject, user_name, body);
    let outcome = publisher.publish(sink, report).await;
    log::info!("report for {} published at {}", subject, outcome.web_handle);

    let link_text = if outcome.chat_delivered {
        format!("Полная версия отчёта: {}", outcome.web_handle)
    } else {
        format!("Не удалось показать отчёт здесь. Он доступен по ссылке: {}", outcome.web_handle)
    };
    for text in [link_text.as_str(), "Твой Авторский Маршрут начинается здесь. Будь на связи в канале!"] {
        if let Err(err) = sink.send_text(subject, text).await {
            log::warn!("closing message for {} failed: {}", subject, err);
        }
    }

    outcome
}

pub async fn callback(
    bot: Bot,
    q: CallbackQuery,
    db: KindaDb,
    gate: AccessGate,
    cfg: AppConfig,
) -> HandlerResult {
    let subject = subject_of(&q.from);
    let chat_id = ChatId::from(q.from.id);
    let data = q.data.clone().unwrap_or_default();
    log::info!("callback {:?} from {}", data, subject);

    match data.as_str() {
        CHECK | RUN => {
            if gate.is_authorized(subject).await {
                bot.answer_callback_query(q.id).await?;
                if data == CHECK {
                    bot.send_message(chat_id, "Доступ открыт. Начинаем сверку координат...").await?;
                }
                start_audit(&bot, chat_id, subject, &db).await?;
            } else {
                bot.answer_callback_query(q.id)
                    .text("Подписка не найдена! Сначала вступи в канал.")
                    .show_alert(true)
                    .await?;
                if data == RUN {
                    bot.send_message(chat_id, SUBSCRIBE_TEXT)
                        .reply_markup(subscribe_keyboard(&cfg))
                        .await?;
                }
            }
        }
        MENU => {
            bot.answer_callback_query(q.id).await?;
            send_menu(&bot, chat_id, &cfg).await?;
        }
        GET_GUIDE => {
            if gate.is_authorized(subject).await {
                bot.answer_callback_query(q.id).await?;
                send_guide(&bot, chat_id, &cfg).await?;
            } else {
                bot.answer_callback_query(q.id)
                    .text("Гайд доступен подписчикам канала.")
                    .show_alert(true)
                    .await?;
            }
        }
        _ => {
            log::warn!("unexpected callback {}", data);
            bot.answer_callback_query(q.id).await?;
        }
    }

    Ok(())
}

/// The user blocked or removed the bot: forget their progress and report.
pub async fn chat_member(mmbr: ChatMemberUpdated, db: KindaDb) -> HandlerResult {
    let new_member = mmbr.new_chat_member.clone();

    if new_member.kind != ChatMemberKind::Member {
        let subject = subject_of(&mmbr.from);
        log::info!("user {} {} left", mmbr.from.full_name(), subject);
        db.discard_session(subject).await;
        db.clear(subject).await;
    }

    Ok(())
}
