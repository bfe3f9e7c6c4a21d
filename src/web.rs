//! Public web view of finished reports, plus the liveness endpoints the hosting
//! platform polls.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;

use crate::kinda_db::ReportStore;
use crate::model::{Report, SubjectId};

#[derive(Clone)]
pub struct PageLinks {
    pub channel_url: String,
    pub guide_url: Option<String>,
}

#[derive(Clone)]
pub struct WebState {
    pub store: Arc<dyn ReportStore>,
    pub links: PageLinks,
}

pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/report/{subject_id}", get(report_handler))
        .with_state(state)
}

pub async fn serve(port: u16, state: WebState) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(&addr).await?;
    log::info!("web view listening on http://{}", addr);
    axum::serve(listener, router(state)).await
}

async fn root_handler() -> &'static str {
    "Meta-Navigator is running"
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn report_handler(Path(subject_id): Path<String>, State(state): State<WebState>) -> Response {
    let report = match subject_id.parse::<u64>() {
        Ok(id) => state.store.get(SubjectId(id)).await,
        Err(_) => None,
    };

    match report {
        Some(report) => Html(render_report_page(&report, &state.links)).into_response(),
        None => (StatusCode::NOT_FOUND, Html(not_found_page())).into_response(),
    }
}

/// Text made safe for HTML body and attribute positions. The page template only
/// takes these, so nothing reaches the markup unescaped.
struct Escaped(String);

impl Escaped {
    fn new(raw: &str) -> Escaped {
        let mut out = String::with_capacity(raw.len());
        for c in raw.chars() {
            match c {
                '&' => out.push_str("&amp;"),
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                '"' => out.push_str("&quot;"),
                '\'' => out.push_str("&#39;"),
                c => out.push(c),
            }
        }
        Escaped(out)
    }
}

impl fmt::Display for Escaped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct ReportPage {
    user_name: Escaped,
    score: Escaped,
    rest: Escaped,
    generated_at: Escaped,
    body: Escaped,
    channel_url: Escaped,
    guide_link: Option<Escaped>,
}

impl fmt::Display for ReportPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            r#"<!DOCTYPE html>
<html lang="ru">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Аудит Автопилота: {user_name}</title>
<style>
body{{background:#0f1115;color:#e8e8e8;font-family:-apple-system,BlinkMacSystemFont,'Segoe UI',sans-serif;margin:0;padding:24px;display:flex;justify-content:center}}
.card{{max-width:720px;width:100%;background:#171a21;border-radius:20px;padding:32px}}
h1{{font-size:1.5rem;margin:0 0 8px}}
.date{{color:#8a8f98;font-size:.85rem;margin-bottom:24px}}
.bar{{display:flex;height:14px;border-radius:7px;overflow:hidden;margin:8px 0 24px}}
.auto{{background:#e0565b;width:{score}%}}
.self{{background:#4cc38a;width:{rest}%}}
.body{{white-space:pre-wrap;line-height:1.55}}
.links a{{display:inline-block;margin:24px 12px 0 0;color:#7ab7ff}}
</style>
</head>
<body>
<div class="card">
<h1>Аудит Автопилота: {user_name}</h1>
<p class="date">{generated_at}</p>
<p>Автопилот: {score}% · Авторство: {rest}%</p>
<div class="bar"><div class="auto"></div><div class="self"></div></div>
<div class="body">{body}</div>
<div class="links">
<a href="{channel_url}" target="_blank" rel="noopener">Канал Метаформулы</a>
"#,
            user_name = self.user_name,
            score = self.score,
            rest = self.rest,
            generated_at = self.generated_at,
            body = self.body,
            channel_url = self.channel_url,
        )?;

        if let Some(guide) = &self.guide_link {
            writeln!(f, r#"<a href="{}" target="_blank" rel="noopener">Гайд</a>"#, guide)?;
        }
        f.write_str("</div>\n</div>\n</body>\n</html>")
    }
}

fn render_report_page(report: &Report, links: &PageLinks) -> String {
    let score = report.computed_score.min(100);
    ReportPage {
        user_name: Escaped::new(&report.user_name),
        score: Escaped::new(&score.to_string()),
        rest: Escaped::new(&(100 - score).to_string()),
        generated_at: Escaped::new(&report.generated_at.format("%d.%m.%Y %H:%M UTC").to_string()),
        body: Escaped::new(&report.body_text),
        channel_url: Escaped::new(&links.channel_url),
        guide_link: links.guide_url.as_deref().map(Escaped::new),
    }
    .to_string()
}

fn not_found_page() -> String {
    r#"<!DOCTYPE html>
<html lang="ru"><head><meta charset="UTF-8"><title>Отчёт не найден</title></head>
<body><h1>Отчёт не найден</h1><p>Пройди аудит в боте, и ссылка появится здесь.</p></body></html>"#
        .to_string()
}
