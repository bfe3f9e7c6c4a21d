use serde::{Deserialize, Serialize};

use crate::model::SubjectId;

pub struct Question {
    pub prompt: &'static str,
    pub min_chars: usize,
    pub needs_vowel: bool,
    /// A bare number such as "10" is a full answer here.
    pub allows_number: bool,
}

pub const QUESTIONS: &[Question] = &[
    Question {
        prompt: "1. Если бы ты был на 100% автором своей жизни, что бы ты изменил прямо сейчас? Или пока ты просто наблюдатель?",
        min_chars: 10,
        needs_vowel: true,
        allows_number: false,
    },
    Question {
        prompt: "2. Опиши свой «день сурка» тремя словами. Какие мысли крутятся фоном, когда ты ничем не занят?",
        min_chars: 10,
        needs_vowel: true,
        allows_number: false,
    },
    Question {
        prompt: "3. Какая ситуация забирает больше всего энергии? На какой физический предмет она похожа?",
        min_chars: 10,
        needs_vowel: true,
        allows_number: false,
    },
    Question {
        prompt: "4. Где в теле появляется зажим или холод, когда ты об этом думаешь? Или ты живёшь «только в голове»?",
        min_chars: 8,
        needs_vowel: true,
        allows_number: false,
    },
    Question {
        prompt: "5. Какое качество в людях тебя раздражает сильнее всего? Какая свобода в нём спрятана?",
        min_chars: 8,
        needs_vowel: true,
        allows_number: false,
    },
    Question {
        prompt: "6. Сколько ещё лет ты готов ходить по этому кругу, пока внутренний двигатель не перегорит?",
        min_chars: 2,
        needs_vowel: true,
        allows_number: true,
    },
    Question {
        prompt: "7. Ты готов забрать управление у автопилота или тебе привычнее роль пассажира в чужом кино?",
        min_chars: 3,
        needs_vowel: true,
        allows_number: false,
    },
    Question {
        prompt: "8. Последний шаг: подтверди, что готов увидеть свой отчёт без прикрас (например, «да»).",
        min_chars: 2,
        needs_vowel: false,
        allows_number: false,
    },
];

const VOWELS: &str = "aeiouyаеёиоуыэюя";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Empty,
    TooShort { min: usize },
    RepeatedChar,
    NoVowels,
    SessionFinished,
}

impl RejectReason {
    pub fn hint(&self) -> String {
        match self {
            RejectReason::Empty => "Мне нужен текстовый ответ. Напиши пару слов.".to_string(),
            RejectReason::TooShort { min } => {
                format!("Слишком коротко. Раскрой мысль хотя бы на {} символов.", min)
            }
            RejectReason::RepeatedChar => "Похоже на случайное нажатие. Ответь по-настоящему.".to_string(),
            RejectReason::NoVowels => "Не могу разобрать ответ. Попробуй сформулировать словами.".to_string(),
            RejectReason::SessionFinished => "Аудит уже завершён. Нажми /start, чтобы пройти заново.".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequencerOutcome {
    Rejected(RejectReason),
    NextQuestion(&'static str),
    Completed(Vec<String>),
}

/// Checks an answer for gross malformation only; content is never judged.
/// `Ok` means acceptable for question `idx`.
pub fn check_answer(questions: &[Question], raw: &str, idx: usize) -> Result<(), RejectReason> {
    let question = questions.get(idx).ok_or(RejectReason::SessionFinished)?;
    let answer = raw.trim();
    if answer.is_empty() {
        return Err(RejectReason::Empty);
    }
    if question.allows_number && answer.chars().all(|c| c.is_ascii_digit()) {
        return Ok(());
    }

    let len = answer.chars().count();
    if len < question.min_chars {
        return Err(RejectReason::TooShort { min: question.min_chars });
    }

    let mut chars = answer.chars();
    if let Some(first) = chars.next() {
        if len > 1 && chars.all(|c| c == first) {
            return Err(RejectReason::RepeatedChar);
        }
    }

    if question.needs_vowel && !answer.to_lowercase().chars().any(|c| VOWELS.contains(c)) {
        return Err(RejectReason::NoVowels);
    }

    Ok(())
}

/// Progress of one subject through the questionnaire.
///
/// `answers.len() == current_index` holds after every call to [`Session::advance`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub subject_id: SubjectId,
    current_index: usize,
    answers: Vec<String>,
}

impl Session {
    pub fn new(subject_id: SubjectId) -> Session {
        Session {
            subject_id,
            current_index: 0,
            answers: vec![],
        }
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn answers(&self) -> &[String] {
        &self.answers
    }

    pub fn current_prompt(&self, questions: &[Question]) -> Option<&'static str> {
        questions.get(self.current_index).map(|q| q.prompt)
    }

    pub fn is_complete(&self, questions: &[Question]) -> bool {
        self.current_index >= questions.len()
    }

    pub fn advance(&mut self, questions: &[Question], raw: &str) -> SequencerOutcome {
        if self.is_complete(questions) {
            return SequencerOutcome::Rejected(RejectReason::SessionFinished);
        }

        if let Err(reason) = check_answer(questions, raw, self.current_index) {
            return SequencerOutcome::Rejected(reason);
        }

        self.answers.push(raw.trim().to_string());
        self.current_index += 1;

        match questions.get(self.current_index) {
            Some(next) => SequencerOutcome::NextQuestion(next.prompt),
            None => SequencerOutcome::Completed(self.answers.clone()),
        }
    }

    /// Sessions read back from disk are dropped unless this holds.
    pub fn is_consistent(&self, questions: &[Question]) -> bool {
        self.answers().len() == self.current_index && self.current_index <= questions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: [&str; 8] = [
        "Я бы сменил работу",
        "Работа, дом, сериалы",
        "Бесконечные созвоны, похоже на камень",
        "В груди холод",
        "Наглость, свобода говорить",
        "5 лет",
        "Готов",
        "да",
    ];

    #[test]
    fn answers_track_index_through_accepts_and_rejects() {
        let mut session = Session::new(SubjectId(1));
        let inputs = ["", "aaaaaaaa", GOOD[0], "кк", GOOD[1], "   ", GOOD[2]];
        for input in inputs {
            session.advance(QUESTIONS, input);
            assert_eq!(session.answers().len(), session.current_index());
        }
        assert_eq!(session.current_index(), 3);
    }

    #[test]
    fn repeated_rejection_leaves_session_untouched() {
        let mut session = Session::new(SubjectId(1));
        session.advance(QUESTIONS, GOOD[0]);
        let before = session.clone();

        for _ in 0..5 {
            let outcome = session.advance(QUESTIONS, "zzzzzzzzzzzz");
            assert_eq!(outcome, SequencerOutcome::Rejected(RejectReason::RepeatedChar));
        }
        assert_eq!(session, before);
    }

    #[test]
    fn single_repeated_char_rejected_at_first_question() {
        let mut session = Session::new(SubjectId(7));
        let outcome = session.advance(QUESTIONS, "aaaaaaaaaaaa");
        assert_eq!(outcome, SequencerOutcome::Rejected(RejectReason::RepeatedChar));
        assert_eq!(session.current_index(), 0);
        assert!(session.answers().is_empty());
    }

    #[test]
    fn eight_valid_answers_complete_once_in_order() {
        let mut session = Session::new(SubjectId(42));
        let mut completed = vec![];

        for (i, answer) in GOOD.iter().enumerate() {
            match session.advance(QUESTIONS, answer) {
                SequencerOutcome::NextQuestion(prompt) => assert_eq!(prompt, QUESTIONS[i + 1].prompt),
                SequencerOutcome::Completed(answers) => completed.push(answers),
                other => panic!("answer {} rejected: {:?}", i, other),
            }
        }

        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0], GOOD.iter().map(|s| s.to_string()).collect::<Vec<_>>());

        let again = session.advance(QUESTIONS, "да");
        assert_eq!(again, SequencerOutcome::Rejected(RejectReason::SessionFinished));
        assert_eq!(session.answers().len(), 8);
    }

    #[test]
    fn short_answer_reports_threshold() {
        assert_eq!(
            check_answer(QUESTIONS, "коротко", 0),
            Err(RejectReason::TooShort { min: 10 })
        );
        assert!(check_answer(QUESTIONS, "Вот такой ответ", 0).is_ok());
    }

    #[test]
    fn vowelless_mash_rejected_except_on_final_question() {
        assert_eq!(check_answer(QUESTIONS, "qwrtpsdfgh", 0), Err(RejectReason::NoVowels));
        assert_eq!(check_answer(QUESTIONS, "ЙЦКНГШЩЗХ", 3), Err(RejectReason::NoVowels));
        assert!(check_answer(QUESTIONS, "ok", 7).is_ok());
        assert!(check_answer(QUESTIONS, "+1", 7).is_ok());
    }

    #[test]
    fn bare_number_accepted_for_years_question() {
        for years in ["10", "5", "11", " 3 "] {
            assert_eq!(check_answer(QUESTIONS, years, 5), Ok(()), "{:?}", years);
        }
        assert_eq!(check_answer(QUESTIONS, "птн", 5), Err(RejectReason::NoVowels));
        assert_eq!(check_answer(QUESTIONS, "1234567890", 0), Err(RejectReason::NoVowels));
        assert_eq!(check_answer(QUESTIONS, "1000", 6), Err(RejectReason::NoVowels));
    }

    #[test]
    fn answers_are_trimmed() {
        let mut session = Session::new(SubjectId(3));
        session.advance(QUESTIONS, "   Я бы сменил работу \n");
        assert_eq!(session.answers(), ["Я бы сменил работу".to_string()]);
    }

    #[test]
    fn out_of_range_index_is_not_acceptable() {
        assert!(check_answer(QUESTIONS, "сколько угодно текста", QUESTIONS.len()).is_err());
    }
}
