use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::model::{Report, SubjectId};
use crate::questionnaire::{SequencerOutcome, Session, QUESTIONS};

/// Where finished reports live between synthesis and the web view.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Last write wins.
    async fn put(&self, report: Report);
    async fn get(&self, subject: SubjectId) -> Option<Report>;
    async fn clear(&self, subject: SubjectId);
}

type Sessions = Arc<RwLock<HashMap<SubjectId, Session>>>;
type Reports = Arc<RwLock<HashMap<SubjectId, Report>>>;

/// File-backed store. Memory is authoritative, disk is best effort: a failed
/// write is logged and the process keeps serving from memory.
#[derive(Clone)]
pub struct KindaDb {
    path: PathBuf,
    report_ttl: Duration,
    sessions: Sessions,
    reports: Reports,
}

impl KindaDb {
    pub async fn new(path: impl Into<PathBuf>, report_ttl: Duration) -> Result<KindaDb, StoreError> {
        let path = path.into();
        fs::create_dir_all(path.join("reports")).await?;

        let sessions = match load_sessions(&path.join("sessions.json")).await {
            Ok(sessions) => sessions,
            Err(err) => {
                log::warn!("could not read saved sessions, starting empty: {}", err);
                HashMap::default()
            }
        };
        log::info!("loaded {} unfinished sessions", sessions.len());

        let reports = match load_reports(&path.join("reports"), report_ttl).await {
            Ok(reports) => reports,
            Err(err) => {
                log::warn!("could not read saved reports, starting empty: {}", err);
                HashMap::default()
            }
        };
        log::info!("loaded {} reports", reports.len());

        Ok(KindaDb {
            path,
            report_ttl,
            sessions: Arc::new(RwLock::new(sessions)),
            reports: Arc::new(RwLock::new(reports)),
        })
    }

    /// Replaces whatever session the subject had with a fresh one at question 0.
    pub async fn start_session(&self, subject: SubjectId) -> Session {
        let session = Session::new(subject);
        let mut sessions = self.sessions.write().await;
        sessions.insert(subject, session.clone());
        self.save_sessions(&sessions).await;
        session
    }

    pub async fn session(&self, subject: SubjectId) -> Option<Session> {
        self.sessions.read().await.get(&subject).cloned()
    }

    pub async fn discard_session(&self, subject: SubjectId) {
        let mut sessions = self.sessions.write().await;
        if sessions.remove(&subject).is_some() {
            self.save_sessions(&sessions).await;
        }
    }

    /// Feeds one answer to the subject's session while holding the write lock,
    /// so two messages racing for the same subject advance it one at a time.
    /// A completed session is dropped. `None` means there is no session.
    pub async fn advance(&self, subject: SubjectId, raw: &str) -> Option<SequencerOutcome> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&subject)?;
        let outcome = session.advance(QUESTIONS, raw);

        match &outcome {
            SequencerOutcome::Rejected(_) => return Some(outcome),
            SequencerOutcome::Completed(_) => {
                sessions.remove(&subject);
            }
            SequencerOutcome::NextQuestion(_) => {}
        }

        self.save_sessions(&sessions).await;
        Some(outcome)
    }

    fn report_path(&self, subject: SubjectId) -> PathBuf {
        self.path.join("reports").join(format!("{}.json", subject))
    }

    /// Drops every expired report from memory and disk.
    pub async fn sweep_expired(&self) {
        let mut reports = self.reports.write().await;
        self.sweep_locked(&mut reports).await;
    }

    async fn sweep_locked(&self, reports: &mut HashMap<SubjectId, Report>) {
        let expired: Vec<SubjectId> = reports
            .values()
            .filter(|r| is_expired(r, self.report_ttl))
            .map(|r| r.subject_id)
            .collect();

        for subject in expired {
            reports.remove(&subject);
            let _ = fs::remove_file(self.report_path(subject)).await;
        }
    }

    /// Evicts only if the report stored right now is still expired, so a fresh
    /// report written since the caller looked is left alone.
    async fn evict_if_expired(&self, subject: SubjectId) {
        let mut reports = self.reports.write().await;
        if reports.get(&subject).is_some_and(|r| is_expired(r, self.report_ttl)) {
            log::info!("report of {} expired", subject);
            reports.remove(&subject);
            let _ = fs::remove_file(self.report_path(subject)).await;
        }
    }

    async fn save_sessions(&self, sessions: &HashMap<SubjectId, Session>) {
        let db_path = self.path.join("sessions.json");
        let all: Vec<&Session> = sessions.values().collect();

        let result = match serde_json::to_vec(&all) {
            Ok(bytes) => fs::write(&db_path, bytes).await.map_err(StoreError::from),
            Err(err) => Err(err.into()),
        };
        if let Err(err) = result {
            log::warn!("sessions kept in memory only: {}", err);
        }
    }
}

fn is_expired(report: &Report, ttl: Duration) -> bool {
    let age = Utc::now().signed_duration_since(report.generated_at);
    age.to_std().map(|age| age > ttl).unwrap_or(false)
}

async fn load_reports(dir: &Path, ttl: Duration) -> Result<HashMap<SubjectId, Report>, StoreError> {
    let mut reports = HashMap::default();
    let mut entries = fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }

        let report = match read_report(&path).await {
            Ok(report) => report,
            Err(err) => {
                log::warn!("skipping unreadable report {}: {}", path.display(), err);
                continue;
            }
        };

        if is_expired(&report, ttl) {
            let _ = fs::remove_file(&path).await;
        } else {
            reports.insert(report.subject_id, report);
        }
    }

    Ok(reports)
}

async fn read_report(path: &Path) -> Result<Report, StoreError> {
    let raw = fs::read(path).await?;
    Ok(serde_json::from_slice(&raw)?)
}

async fn load_sessions(path: &Path) -> Result<HashMap<SubjectId, Session>, StoreError> {
    if !fs::try_exists(path).await? {
        return Ok(HashMap::default());
    }

    let raw = fs::read(path).await?;
    let saved: Vec<Session> = serde_json::from_slice(&raw)?;

    Ok(saved
        .into_iter()
        .filter(|s| {
            let ok = s.is_consistent(QUESTIONS) && !s.is_complete(QUESTIONS);
            if !ok {
                log::warn!("dropping broken session of {}", s.subject_id);
            }
            ok
        })
        .map(|s| (s.subject_id, s))
        .collect())
}

#[async_trait]
impl ReportStore for KindaDb {
    async fn put(&self, report: Report) {
        let subject = report.subject_id;
        let mut reports = self.reports.write().await;

        let write = match serde_json::to_vec_pretty(&report) {
            Ok(bytes) => fs::write(self.report_path(subject), bytes)
                .await
                .map_err(StoreError::from),
            Err(err) => Err(err.into()),
        };
        if let Err(err) = write {
            log::warn!("report of {} kept in memory only: {}", subject, err);
        }

        reports.insert(subject, report);
        self.sweep_locked(&mut reports).await;
    }

    async fn get(&self, subject: SubjectId) -> Option<Report> {
        let cached = self.reports.read().await.get(&subject).cloned();
        let report = cached?;

        if is_expired(&report, self.report_ttl) {
            self.evict_if_expired(subject).await;
            return None;
        }
        Some(report)
    }

    async fn clear(&self, subject: SubjectId) {
        let mut reports = self.reports.write().await;
        reports.remove(&subject);
        let _ = fs::remove_file(self.report_path(subject)).await;
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::model::{ReportBody, ReportSource};

    const WEEK: Duration = Duration::from_secs(7 * 24 * 3600);

    fn report(subject: u64, text: &str) -> Report {
        Report::new(
            SubjectId(subject),
            "Анна",
            ReportBody {
                text: text.to_string(),
                score: 70,
                source: ReportSource::Generated,
            },
        )
    }

    #[tokio::test]
    async fn missing_report_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let db = KindaDb::new(dir.path(), WEEK).await.unwrap();
        assert_eq!(db.get(SubjectId(5)).await, None);
    }

    #[tokio::test]
    async fn reports_survive_restart_and_last_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = KindaDb::new(dir.path(), WEEK).await.unwrap();
            db.put(report(5, "first")).await;
            db.put(report(5, "second")).await;
        }

        let db = KindaDb::new(dir.path(), WEEK).await.unwrap();
        let stored = db.get(SubjectId(5)).await.unwrap();
        assert_eq!(stored.body_text, "second");
    }

    #[tokio::test]
    async fn expired_reports_are_evicted() {
        let dir = tempfile::tempdir().unwrap();
        let db = KindaDb::new(dir.path(), Duration::from_secs(60)).await.unwrap();

        let mut old = report(9, "stale");
        old.generated_at = Utc::now() - ChronoDuration::minutes(5);
        db.put(old).await;

        assert_eq!(db.get(SubjectId(9)).await, None);
        assert!(!dir.path().join("reports/9.json").exists());
    }

    #[tokio::test]
    async fn expired_reports_of_other_subjects_are_swept() {
        let dir = tempfile::tempdir().unwrap();
        let db = KindaDb::new(dir.path(), Duration::from_secs(60)).await.unwrap();

        for subject in 0..200 {
            let mut old = report(subject, "stale");
            old.generated_at = Utc::now() - ChronoDuration::days(30);
            db.put(old).await;
        }

        assert_eq!(db.get(SubjectId(99_999)).await, None);
        assert!(db.reports.read().await.is_empty());
        assert_eq!(std::fs::read_dir(dir.path().join("reports")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn put_sweeps_old_reports_but_keeps_fresh_ones() {
        let dir = tempfile::tempdir().unwrap();
        let db = KindaDb::new(dir.path(), Duration::from_secs(60)).await.unwrap();

        let mut old = report(1, "stale");
        old.generated_at = Utc::now() - ChronoDuration::minutes(5);
        db.reports.write().await.insert(SubjectId(1), old);
        std::fs::write(dir.path().join("reports/1.json"), b"{}").unwrap();

        db.put(report(2, "fresh")).await;

        assert_eq!(db.reports.read().await.keys().collect::<Vec<_>>(), [&SubjectId(2)]);
        assert!(!dir.path().join("reports/1.json").exists());
        assert!(dir.path().join("reports/2.json").exists());
    }

    #[tokio::test]
    async fn expired_files_are_dropped_on_startup() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = KindaDb::new(dir.path(), WEEK).await.unwrap();
            db.put(report(1, "fresh")).await;
        }
        let mut old = report(2, "stale");
        old.generated_at = Utc::now() - ChronoDuration::days(30);
        std::fs::write(dir.path().join("reports/2.json"), serde_json::to_vec(&old).unwrap()).unwrap();
        std::fs::write(dir.path().join("reports/3.json"), b"garbage").unwrap();

        let db = KindaDb::new(dir.path(), WEEK).await.unwrap();

        assert!(db.get(SubjectId(1)).await.is_some());
        assert_eq!(db.get(SubjectId(2)).await, None);
        assert!(!dir.path().join("reports/2.json").exists());
    }

    #[tokio::test]
    async fn eviction_spares_report_rewritten_meanwhile() {
        let dir = tempfile::tempdir().unwrap();
        let db = KindaDb::new(dir.path(), Duration::from_secs(60)).await.unwrap();

        let mut stale = report(4, "stale");
        stale.generated_at = Utc::now() - ChronoDuration::minutes(5);
        db.reports.write().await.insert(SubjectId(4), stale);

        // a reader saw the stale copy, then a new audit landed before eviction
        let seen = db.reports.read().await.get(&SubjectId(4)).cloned().unwrap();
        assert!(is_expired(&seen, db.report_ttl));
        db.put(report(4, "fresh")).await;
        db.evict_if_expired(SubjectId(4)).await;

        assert_eq!(db.get(SubjectId(4)).await.unwrap().body_text, "fresh");
        assert!(dir.path().join("reports/4.json").exists());
    }

    #[tokio::test]
    async fn unwritable_disk_degrades_to_memory() {
        let dir = tempfile::tempdir().unwrap();
        let db = KindaDb::new(dir.path(), WEEK).await.unwrap();
        std::fs::remove_dir_all(dir.path().join("reports")).unwrap();

        db.put(report(3, "in memory")).await;
        assert_eq!(db.get(SubjectId(3)).await.unwrap().body_text, "in memory");
    }

    #[tokio::test]
    async fn advance_without_session_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let db = KindaDb::new(dir.path(), WEEK).await.unwrap();
        assert_eq!(db.advance(SubjectId(1), "Я бы сменил работу").await, None);
    }

    #[tokio::test]
    async fn sessions_resume_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = KindaDb::new(dir.path(), WEEK).await.unwrap();
            db.start_session(SubjectId(11)).await;
            db.advance(SubjectId(11), "Я бы сменил работу").await;
        }

        let db = KindaDb::new(dir.path(), WEEK).await.unwrap();
        let session = db.session(SubjectId(11)).await.unwrap();
        assert_eq!(session.current_index(), 1);
        assert_eq!(session.answers(), ["Я бы сменил работу".to_string()]);
    }

    #[tokio::test]
    async fn completed_session_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let db = KindaDb::new(dir.path(), WEEK).await.unwrap();
        let subject = SubjectId(8);
        db.start_session(subject).await;

        let answers = [
            "Я бы сменил работу",
            "Работа, дом, сериалы",
            "Созвоны, похоже на камень",
            "В груди холод",
            "Наглость, свобода",
            "5 лет",
            "Готов",
            "да",
        ];
        let mut last = None;
        for answer in answers {
            last = db.advance(subject, answer).await;
        }

        assert!(matches!(last, Some(SequencerOutcome::Completed(ref a)) if a.len() == 8));
        assert_eq!(db.session(subject).await, None);
        assert_eq!(db.advance(subject, "да").await, None);
    }

    #[tokio::test]
    async fn concurrent_answers_never_double_advance() {
        let dir = tempfile::tempdir().unwrap();
        let db = KindaDb::new(dir.path(), WEEK).await.unwrap();
        let subject = SubjectId(21);
        db.start_session(subject).await;

        let (a, b) = tokio::join!(
            db.advance(subject, "Первый вариант ответа"),
            db.advance(subject, "Второй вариант ответа"),
        );
        assert!(matches!(a, Some(SequencerOutcome::NextQuestion(_))));
        assert!(matches!(b, Some(SequencerOutcome::NextQuestion(_))));

        let session = db.session(subject).await.unwrap();
        assert_eq!(session.current_index(), 2);
        assert_eq!(session.answers().len(), 2);
    }

    #[tokio::test]
    async fn corrupt_session_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sessions.json"), b"{not json").unwrap();

        let db = KindaDb::new(dir.path(), WEEK).await.unwrap();
        assert_eq!(db.session(SubjectId(1)).await, None);
    }
}
